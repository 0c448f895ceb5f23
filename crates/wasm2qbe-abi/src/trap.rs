//! Trap handlers. Compiled code calls these and never expects them to return.

/// Reasons compiled code can trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapKind {
    /// `unreachable` executed.
    Unreachable,
    /// Integer division or remainder by zero.
    DivByZero,
    /// Signed division overflow, or a float-to-int conversion out of range.
    IntegerOverflow,
    /// Float-to-int conversion of NaN.
    InvalidConversion,
    /// Memory, table or array access out of bounds.
    OutOfBounds,
    /// Null reference dereferenced.
    NullReference,
    /// `call_indirect` signature mismatch or failed `ref.cast`.
    CastFailure,
}

impl TrapKind {
    /// Every trap kind.
    pub const ALL: [TrapKind; 7] = [
        TrapKind::Unreachable,
        TrapKind::DivByZero,
        TrapKind::IntegerOverflow,
        TrapKind::InvalidConversion,
        TrapKind::OutOfBounds,
        TrapKind::NullReference,
        TrapKind::CastFailure,
    ];

    /// Linker symbol of the handler.
    pub fn symbol(self) -> &'static str {
        match self {
            TrapKind::Unreachable => "__wasm_trap_unreachable",
            TrapKind::DivByZero => "__wasm_trap_div_by_zero",
            TrapKind::IntegerOverflow => "__wasm_trap_integer_overflow",
            TrapKind::InvalidConversion => "__wasm_trap_invalid_conversion",
            TrapKind::OutOfBounds => "__wasm_trap_out_of_bounds",
            TrapKind::NullReference => "__wasm_trap_null_reference",
            TrapKind::CastFailure => "__wasm_trap_cast_failure",
        }
    }

    /// Human-readable description, as printed by the runtime.
    pub fn message(self) -> &'static str {
        match self {
            TrapKind::Unreachable => "unreachable executed",
            TrapKind::DivByZero => "integer divide by zero",
            TrapKind::IntegerOverflow => "integer overflow",
            TrapKind::InvalidConversion => "invalid conversion to integer",
            TrapKind::OutOfBounds => "out of bounds access",
            TrapKind::NullReference => "null reference",
            TrapKind::CastFailure => "cast failure",
        }
    }
}

impl core::fmt::Display for TrapKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_kind_is_copy() {
        let trap = TrapKind::OutOfBounds;
        let trap2 = trap;
        assert_eq!(trap, trap2);
    }

    #[test]
    fn trap_symbols() {
        assert_eq!(TrapKind::DivByZero.symbol(), "__wasm_trap_div_by_zero");
        assert_eq!(TrapKind::CastFailure.symbol(), "__wasm_trap_cast_failure");
    }
}
