//! Column conversions between PostgreSQL types and domain types.

use std::time::Duration;

use payload_codec::Codec;

use crate::domain::{DomainError, DomainResult};

pub(crate) fn repo_err<E: Into<anyhow::Error>>(e: E) -> DomainError {
    DomainError::RepositoryError(e.into())
}

/// Maps unique violations to `AlreadyExists`.
pub(crate) fn insert_err(e: tokio_postgres::Error, what: impl Into<String>) -> DomainError {
    if let Some(db_err) = e.as_db_error() {
        if db_err.code().code() == "23505" {
            return DomainError::AlreadyExists(what.into());
        }
    }
    DomainError::RepositoryError(e.into())
}

pub(crate) fn to_u32(value: i64, column: &str) -> DomainResult<u32> {
    u32::try_from(value)
        .map_err(|_| repo_err(anyhow::anyhow!("{} out of range: {}", column, value)))
}

pub(crate) fn to_u16(value: i32, column: &str) -> DomainResult<u16> {
    u16::try_from(value)
        .map_err(|_| repo_err(anyhow::anyhow!("{} out of range: {}", column, value)))
}

pub(crate) fn to_u8(value: i16, column: &str) -> DomainResult<u8> {
    u8::try_from(value).map_err(|_| repo_err(anyhow::anyhow!("{} out of range: {}", column, value)))
}

pub(crate) fn to_duration(secs: i64, column: &str) -> DomainResult<Duration> {
    u64::try_from(secs)
        .map(Duration::from_secs)
        .map_err(|_| repo_err(anyhow::anyhow!("{} out of range: {}", column, secs)))
}

pub(crate) fn to_descriptor(bytes: &[u8]) -> DomainResult<[u8; 4]> {
    bytes
        .try_into()
        .map_err(|_| repo_err(anyhow::anyhow!("descriptor must be 4 bytes")))
}

pub(crate) fn duration_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

pub(crate) fn to_codec(kind: &str, encoder: &str, decoder: &str) -> DomainResult<Codec> {
    Codec::from_kind(kind, encoder, decoder).map_err(repo_err)
}

/// Parses a text column into one of the domain's string-backed enums.
pub(crate) fn to_enum<T>(value: &str) -> DomainResult<T>
where
    T: std::str::FromStr<Err = DomainError>,
{
    value
        .parse()
        .map_err(|e: DomainError| repo_err(anyhow::anyhow!("{}", e)))
}
