//! Error types for the types crate.

/// Errors produced while parsing discovery metadata or wire messages.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// A space identifier was not a non-negative integer.
    #[error("invalid space id: {0:?}")]
    InvalidSpace(String),

    /// A discovery metadata entry could not be parsed.
    #[error("invalid metadata {key}={value:?}")]
    InvalidMetadata {
        /// Metadata key.
        key: String,
        /// Raw value as published by the node.
        value: String,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
