use std::io;
use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, CdError>;

#[derive(Error, Debug)]
pub enum CdError {
    #[error("Input output error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Save state version {0:#06x} is not supported")]
    UnsupportedStateVersion(u32),
}
