//! Decoding ceilings that bound resource use on adversarial input.

/// Upper bounds applied while decoding. Every count is compared against its
/// limit before storage for it is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    /// Any vector (types, imports, exports, segments, params, br_table
    /// targets, ...).
    pub max_vector_size: usize,
    /// Function section entries, code section entries and imported functions.
    pub max_function_count: usize,
    /// Declared locals of a single function (summed over local groups).
    pub max_local_count: usize,
    /// Payload bytes of a single data segment.
    pub max_data_segment_size: usize,
    /// Nesting of structured control instructions; checked by the validator.
    pub max_nesting_depth: usize,
    /// Import, export, custom section and debug names.
    pub max_name_length: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_vector_size: 1_000_000,
            max_function_count: 1_000_000,
            max_local_count: 50_000,
            max_data_segment_size: 64 * 1024 * 1024,
            max_nesting_depth: 1024,
            max_name_length: 4096,
        }
    }
}

impl ParserLimits {
    /// Tight limits for fuzzing and untrusted input.
    pub fn strict() -> Self {
        Self {
            max_vector_size: 10_000,
            max_function_count: 10_000,
            max_local_count: 1_000,
            max_data_segment_size: 1024 * 1024,
            max_nesting_depth: 256,
            max_name_length: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_is_tighter_than_default() {
        let d = ParserLimits::default();
        let s = ParserLimits::strict();
        assert!(s.max_vector_size < d.max_vector_size);
        assert!(s.max_function_count < d.max_function_count);
        assert!(s.max_local_count < d.max_local_count);
        assert!(s.max_data_segment_size < d.max_data_segment_size);
        assert!(s.max_nesting_depth < d.max_nesting_depth);
        assert!(s.max_name_length < d.max_name_length);
    }
}
