//! Crate-wide error type
//!
//! Resource and environment failures (temp files, decompression, corrupted
//! archives) travel as `ForgeError`. Content errors such as out-of-range
//! channel indices are assertions at the call site instead.

use std::path::PathBuf;

use crate::runtime::OpType;

/// Result alias used across the crate
pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] bincode::Error),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Could not create a temporary file in {dir} after {attempts} attempts")]
    TempFileCreation { attempts: u32, dir: PathBuf },

    #[error("Constant value was released after linking")]
    ValueDiscarded,

    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    #[error("Operation {0:?} is not supported by the interpreter")]
    UnsupportedOperation(OpType),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Create a corrupted data error
pub fn corrupted_data(reason: impl Into<String>) -> ForgeError {
    ForgeError::CorruptedData(reason.into())
}

/// Create a version mismatch error
pub fn version_mismatch(expected: u32, found: u32) -> ForgeError {
    ForgeError::VersionMismatch { expected, found }
}

/// Create an invalid program error
pub fn invalid_program(reason: impl std::fmt::Display) -> ForgeError {
    ForgeError::InvalidProgram(reason.to_string())
}

impl From<toml::de::Error> for ForgeError {
    fn from(error: toml::de::Error) -> Self {
        ForgeError::Config(error.to_string())
    }
}

impl From<toml::ser::Error> for ForgeError {
    fn from(error: toml::ser::Error) -> Self {
        ForgeError::Config(error.to_string())
    }
}
