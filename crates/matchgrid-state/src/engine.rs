//! Storage engine seam.
//!
//! The store talks to its backend through a small command set modelled on a
//! key/value server with sorted sets and hashes. Every command is atomic on
//! its own; nothing here composes commands into transactions.
//!
//! # Command set
//!
//! ```text
//! keyspace:    set_nx / get / set / del
//! sorted set:  zadd / zrange_by_score / zrem      (i64 scores, inclusive ranges)
//! hash:        hset / hdel / hgetall
//! ```
//!
//! Sorted-set and hash names must not contain `/`.

pub mod memory;
pub mod redb_engine;

use std::collections::HashMap;

use thiserror::Error;

/// Result type alias for engine commands.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by a storage engine or its connections.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),
}

impl EngineError {
    /// Whether the connection that produced this error should be discarded
    /// instead of returned to the pool.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, EngineError::Connect(_) | EngineError::Closed(_))
    }
}

/// A single connection to the storage engine.
///
/// Connections are checked out from a [`crate::pool::ConnectionPool`] for the
/// duration of one store operation and are never shared between callers.
pub trait Connection: Send + std::fmt::Debug {
    /// Store `value` under `key` only if the key is absent. Returns `true`
    /// if the value was stored.
    fn set_nx(&mut self, key: &str, value: &[u8]) -> EngineResult<bool>;

    /// Read the value stored under `key`.
    fn get(&mut self, key: &str) -> EngineResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any existing value.
    fn set(&mut self, key: &str, value: &[u8]) -> EngineResult<()>;

    /// Remove `key`. Returns `true` if it existed.
    fn del(&mut self, key: &str) -> EngineResult<bool>;

    /// Insert `member` into sorted set `set` with `score`, or update its score.
    fn zadd(&mut self, set: &str, score: i64, member: &str) -> EngineResult<()>;

    /// Members of `set` with `min <= score <= max`, ascending by score then
    /// member.
    fn zrange_by_score(&mut self, set: &str, min: i64, max: i64) -> EngineResult<Vec<String>>;

    /// Remove `member` from `set`. Returns `true` if it was present.
    fn zrem(&mut self, set: &str, member: &str) -> EngineResult<bool>;

    /// Set `field` of hash `hash` to `value`.
    fn hset(&mut self, hash: &str, field: &str, value: &[u8]) -> EngineResult<()>;

    /// Remove `field` from `hash`. Returns `true` if it was present.
    fn hdel(&mut self, hash: &str, field: &str) -> EngineResult<bool>;

    /// All fields and values of `hash`.
    fn hgetall(&mut self, hash: &str) -> EngineResult<HashMap<String, Vec<u8>>>;

    /// Health-check ping. Returns `true` if the connection is usable.
    fn ping(&mut self) -> bool;
}

/// Factory for new engine connections, injected into the pool.
pub trait ConnectionFactory: Send + Sync {
    /// Establish a new connection.
    fn connect(&self) -> EngineResult<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_classified() {
        assert!(EngineError::Connect("refused".into()).is_connection_error());
        assert!(EngineError::Closed("reset".into()).is_connection_error());
        assert!(!EngineError::Write("disk full".into()).is_connection_error());
        assert!(!EngineError::Read("corrupt page".into()).is_connection_error());
    }
}
