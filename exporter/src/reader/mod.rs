//! Snapshot readers
//!
//! A [`Connector`] opens a [`SnapshotReader`], which returns every row of the
//! queue table on each call to [`SnapshotReader::fetch`].

pub mod postgres;

use async_trait::async_trait;
use queue_exporter_shared::QueueRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest identifier PostgreSQL keeps without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("connection timed out after {0}s")]
    ConnectTimeout(u64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid table name '{0}': expected [schema.]table made of letters, digits and underscores")]
    InvalidTableName(String),
}

/// A validated, optionally schema-qualified table name.
///
/// Only plain identifiers are accepted so the name can be placed in a query
/// without quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_identifier(part: &str) -> bool {
        let mut chars = part.chars();
        let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        starts_ok
            && part.len() <= MAX_IDENTIFIER_LEN
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    }
}

impl FromStr for TableName {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > 2 || !parts.iter().all(|p| Self::is_identifier(p)) {
            return Err(ReaderError::InvalidTableName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opens connections to the data store.
#[async_trait]
pub trait Connector: Send + Sync {
    type Reader: SnapshotReader;

    /// Make one connection attempt.
    async fn connect(&self) -> Result<Self::Reader, ReaderError>;

    /// Human readable target (`host:port/db as user`) for log messages.
    fn describe(&self) -> String;
}

/// An open connection that can read the queue table.
#[async_trait]
pub trait SnapshotReader: Send {
    /// Read all current rows of the queue table.
    async fn fetch(&mut self) -> Result<Vec<QueueRow>, ReaderError>;

    /// Release the connection.
    async fn close(self) -> Result<(), ReaderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_accepts_identifiers() {
        assert_eq!("queue".parse::<TableName>().unwrap().as_str(), "queue");
        assert_eq!(
            "hydro.api_queue".parse::<TableName>().unwrap().to_string(),
            "hydro.api_queue"
        );
        assert!("_jobs2".parse::<TableName>().is_ok());
    }

    #[test]
    fn test_table_name_rejects_injection() {
        for bad in [
            "",
            "queue; DROP TABLE queue",
            "queue--",
            "a.b.c",
            "2queue",
            "que ue",
            "\"queue\"",
            ".queue",
        ] {
            assert!(bad.parse::<TableName>().is_err(), "accepted {bad:?}");
        }
        let long = "q".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(long.parse::<TableName>().is_err());
    }
}
