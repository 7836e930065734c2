use thiserror::Error;

/// Shared lightweight error type for core primitive operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid caller input or malformed primitive value.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A typed accessor was called on a component of another type.
    #[error("component is not a {0} component")]
    WrongComponentType(&'static str),
    /// A number component value does not fit the decoder.
    #[error("number component overflow")]
    NumberOverflow,
}
