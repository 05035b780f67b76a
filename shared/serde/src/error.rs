use thiserror::Error;

/// Errors produced while reading a value back out of a bit stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// The reader ran past the end of its buffer
    #[error("Attempted to read {requested} bits with only {remaining} bits remaining")]
    EndOfBuffer { requested: usize, remaining: usize },

    /// A length prefix described more bytes than the stream may contain
    #[error("Length prefix {length} exceeds the limit of {limit}")]
    LengthOutOfRange { length: u64, limit: u64 },

    /// An enum discriminant did not match any known variant
    #[error("Invalid {type_name} discriminant {value}")]
    InvalidDiscriminant { type_name: &'static str, value: u8 },

    /// A decoded integer does not fit in the requested type
    #[error("Decoded integer {value} does not fit in {type_name}")]
    IntegerOutOfRange { value: i128, type_name: &'static str },

    /// A decoded string was not valid UTF-8
    #[error("Decoded string is not valid UTF-8")]
    InvalidUtf8,
}
