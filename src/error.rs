//! Error Types
//!
//! Domain errors carry a machine-readable code alongside the human message;
//! everything else is a wrapped transport or backend error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoutError>;

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("key is required")]
    KeyRequired,

    #[error("value is required")]
    ValueRequired,

    #[error("malformed search string")]
    MalformedSearchString,

    #[error("key not found")]
    KeyNotFound,

    #[error("key not put")]
    KeyNotPut,

    #[error("key not deleted")]
    KeyNotDeleted,

    /// Any transport or backend failure, wrapped with operation context.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ScoutError {
    /// Machine-readable code paired with the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyRequired => "KEY_REQUIRED",
            Self::ValueRequired => "VALUE_REQUIRED",
            Self::MalformedSearchString => "MALFORMED_SEARCH_STRING",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::KeyNotPut => "KEY_NOT_PUT",
            Self::KeyNotDeleted => "KEY_NOT_DELETED",
            Self::Backend(_) => "INTERNAL_ERROR",
        }
    }
}
