//! Error types for blobvault-core

use thiserror::Error;

/// Errors raised while validating a digest string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("Invalid digest length: expected {expected} hex chars, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid digest character {character:?} at position {position}")]
    InvalidCharacter { character: char, position: usize },
}

/// Errors raised while validating a blob table name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableNameError {
    #[error("Table name must not be empty")]
    Empty,

    #[error("Table name {0:?} is reserved")]
    Reserved(String),

    #[error("Table name {name:?} contains forbidden character {character:?}")]
    ForbiddenCharacter { name: String, character: char },
}
