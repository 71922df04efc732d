//! matchgrid-core — domain types and configuration for MatchGrid.
//!
//! Backfill messages are plain `prost` structs so the state store can
//! persist them with protobuf encoding. Configuration is parsed from TOML.

pub mod config;
pub mod types;

pub use config::{PoolSettings, StateSettings, StoreConfig};
pub use types::*;
