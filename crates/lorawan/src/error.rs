use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LorawanError {
    #[error("unsupported region: {0}")]
    UnsupportedRegion(String),

    #[error("invalid data rate {dr} for region {region}")]
    InvalidDataRate { region: String, dr: u8 },

    #[error("invalid {kind}: expected {expected} hex-encoded bytes, got '{value}'")]
    InvalidHex {
        kind: &'static str,
        expected: usize,
        value: String,
    },

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown command identifier: {0:#04x}")]
    UnknownCommand(u8),

    #[error("invalid fragmentation input: {0}")]
    Fragmentation(String),
}

pub type Result<T> = std::result::Result<T, LorawanError>;
