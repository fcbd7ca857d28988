use thiserror::Error;

/// Errors produced by the container, schema and binary serializer.
///
/// These map directly onto the `EncodingError` / `DecodingError` / `LogicError`
/// / `CastError` taxonomy: wire-format violations are fatal to the message
/// that triggered them, never to the process.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("key {key:?} is {len} bytes, which exceeds the 255-byte wire limit")]
    KeyTooLong { key: String, len: usize },

    #[error("key {key:?} is not a valid container key (must start with a letter or underscore, contain only letters, digits and underscores)")]
    InvalidKey { key: String },

    #[error("container nesting exceeds the maximum supported depth ({max}); this usually indicates a cycle")]
    TooDeep { max: usize },

    #[error("unknown type tag {tag} encountered while decoding")]
    UnknownTypeTag { tag: u32 },

    #[error("truncated input: expected at least {needed} more byte(s), only {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("decoded string is not valid UTF-8")]
    InvalidUtf8,

    #[error("inconsistent buffer segment: claimed length {claimed} does not match backing length {actual}")]
    InconsistentSegment { claimed: usize, actual: usize },

    #[error("value at path {path:?} could not be cast to the requested type")]
    CastError { path: String },

    #[error("schema validation failed for {count} path(s)")]
    SchemaValidation { count: usize },
}

pub type DataResult<T> = Result<T, DataError>;
