//! Shared error type for ferrocni

use thiserror::Error;

/// CNI error codes from the CNI spec (`0.4.0`), plus internal extensions.
pub mod cni_code {
    pub const VERSION: u32 = 1;
    pub const UNSUPPORTED_FIELD: u32 = 2;
    pub const CONTAINER: u32 = 3;
    pub const ENV_VAR: u32 = 4;
    pub const IO: u32 = 5;
    pub const DECODE: u32 = 6;
    pub const NETWORK: u32 = 7;
    pub const RETRY: u32 = 11;
    pub const INTERNAL: u32 = 278;
    pub const NOT_SUPPORTED: u32 = 287;
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing or invalid environment: {0}")]
    Env(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unsupported field: {0}")]
    UnsupportedField(String),

    #[error("container error: {0}")]
    Container(String),

    #[error("command not supported")]
    NotSupported,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Maps this error onto the CNI result-code taxonomy.
    pub fn cni_code(&self) -> u32 {
        match self {
            Error::Config(_) => cni_code::NETWORK,
            Error::Env(_) => cni_code::ENV_VAR,
            Error::Network(_) => cni_code::NETWORK,
            Error::Storage(_) => cni_code::INTERNAL,
            Error::UnsupportedField(_) => cni_code::UNSUPPORTED_FIELD,
            Error::Container(_) => cni_code::CONTAINER,
            Error::NotSupported => cni_code::NOT_SUPPORTED,
            Error::Internal(_) => cni_code::INTERNAL,
            Error::Io(_) => cni_code::IO,
            Error::Serialization(_) => cni_code::DECODE,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
