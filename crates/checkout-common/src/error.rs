//! Errors shared by the gateway and the agents.

use std::fmt::Display;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad environment value, catalog file or startup option.
    #[error("configuration error: {0}")]
    Config(String),

    /// A request field was missing or malformed.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed JSON: {0}")]
    Serialization(String),
}

impl Error {
    pub fn config(msg: impl Display) -> Self {
        Self::Config(msg.to_string())
    }

    pub fn validation(msg: impl Display) -> Self {
        Self::Validation(msg.to_string())
    }

    pub fn not_found(msg: impl Display) -> Self {
        Self::NotFound(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
