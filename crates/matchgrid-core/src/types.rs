//! Domain types for the MatchGrid backfill state store.
//!
//! A `Backfill` is an open matchmaking request waiting for more players.
//! The types are `prost` messages so they share the protobuf field layout of
//! the matchmaking API; fields this version does not know about are skipped
//! on decode rather than rejected.

use std::collections::HashMap;

/// Unique identifier for a backfill. Chosen by the caller.
pub type BackfillId = String;

/// Unique identifier for a ticket held by a backfill.
pub type TicketId = String;

// ── Backfill ───────────────────────────────────────────────────────

/// An open matchmaking request awaiting additional players.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Backfill {
    #[prost(string, tag = "1")]
    pub id: String,
    /// Fields used by the matchmaker to filter and pool backfills.
    #[prost(message, optional, tag = "2")]
    pub search_fields: Option<SearchFields>,
    /// Opaque application data, keyed by extension name.
    #[prost(map = "string, message", tag = "3")]
    pub extensions: HashMap<String, Any>,
    /// Application data that survives across match function runs.
    #[prost(map = "string, message", tag = "4")]
    pub persistent_field: HashMap<String, Any>,
    #[prost(message, optional, tag = "5")]
    pub create_time: Option<Timestamp>,
    /// Version counter advanced by the owner on every semantic update.
    #[prost(int64, tag = "6")]
    pub generation: i64,
}

/// Searchable attributes of a backfill.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchFields {
    #[prost(map = "string, double", tag = "1")]
    pub double_args: HashMap<String, f64>,
    #[prost(map = "string, string", tag = "2")]
    pub string_args: HashMap<String, String>,
    #[prost(string, repeated, tag = "3")]
    pub tags: Vec<String>,
}

/// Arbitrary serialized message tagged with its type URL.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

/// Point in time as seconds and nanoseconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

// ── Persisted record ───────────────────────────────────────────────

/// The stored form of a backfill: the backfill itself plus the tickets it
/// currently holds.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackfillRecord {
    #[prost(message, optional, tag = "1")]
    pub backfill: Option<Backfill>,
    #[prost(string, repeated, tag = "2")]
    pub ticket_ids: Vec<String>,
}

impl Backfill {
    /// Create a backfill with the given id and generation and no payload.
    pub fn new(id: impl Into<String>, generation: i64) -> Self {
        Self {
            id: id.into(),
            generation,
            ..Default::default()
        }
    }

    /// Attach an extension entry.
    pub fn with_extension(mut self, name: impl Into<String>, value: Any) -> Self {
        self.extensions.insert(name.into(), value);
        self
    }
}

impl BackfillRecord {
    pub fn new(backfill: Backfill, ticket_ids: Vec<TicketId>) -> Self {
        Self {
            backfill: Some(backfill),
            ticket_ids,
        }
    }
}

impl Any {
    pub fn new(type_url: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            type_url: type_url.into(),
            value: value.into(),
        }
    }
}

impl Timestamp {
    /// Convert from nanoseconds since the Unix epoch.
    pub fn from_unix_nanos(nanos: i64) -> Self {
        Self {
            seconds: nanos.div_euclid(1_000_000_000),
            nanos: nanos.rem_euclid(1_000_000_000) as i32,
        }
    }
}
