//! In-memory layouts shared by compiled code and the runtime.
//!
//! Function references point at a descriptor emitted by the compiler:
//!
//! ```text
//! offset 0: l  code address
//! offset 8: l  canonical type id (first structurally equal type index)
//! ```
//!
//! Tables store descriptor addresses; a null entry is 0.

/// Offset of the code pointer inside a function-reference descriptor.
pub const FUNCREF_CODE_OFFSET: u64 = 0;

/// Offset of the canonical type id inside a function-reference descriptor.
pub const FUNCREF_TYPE_OFFSET: u64 = 8;

/// Size and alignment of a `v128` value.
pub const V128_SIZE: u32 = 16;
pub const V128_ALIGN: u32 = 16;

/// Stride of one value in an exception payload buffer.
pub const EXCEPTION_SLOT_SIZE: u32 = 16;

/// Size of a scalar or reference GC struct field / array element slot.
pub const FIELD_SIZE: u32 = 8;

/// Size of a `v128` GC struct field / array element slot.
pub const FIELD_SIZE_V128: u32 = 16;

/// Arrays start with an `i32` length; elements follow the header. Struct
/// fields are laid out in declaration order without a header. A reference to
/// a GC object with its low bit set is an `i31ref` (`(value << 1) | 1`), not
/// a pointer.
pub const ARRAY_HEADER_SIZE: u32 = 8;
