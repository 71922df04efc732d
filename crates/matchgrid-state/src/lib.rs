//! matchgrid-state — backfill state store for MatchGrid.
//!
//! Persists backfills (open matchmaking requests) together with the tickets
//! they hold, tracks when each backfill was last acknowledged so stale ones
//! can be reclaimed, and keeps a separate active index that a scanner can
//! enumerate without reading every record.
//!
//! # Architecture
//!
//! ```text
//! BackfillStore
//!   → ConnectionPool::acquire()          (bounded, one connection per call)
//!     → Connection (engine commands)
//!         keyspace:  {id} → protobuf(BackfillRecord)
//!         sorted set "backfill_last_ack_time": id → ack time (unix nanos)
//!         hash "allBackfills": id → generation
//! ```
//!
//! The engine sits behind the [`Connection`] / [`ConnectionFactory`] traits.
//! [`RedbEngine`] is the durable implementation; [`MemoryEngine`] is an
//! in-memory fake with fault injection for tests.
//!
//! Each command is atomic on its own. Operations that issue more than one
//! command (delete: remove record, then remove ack entry) are not
//! transactional, so the ack set and the active index may reference ids
//! whose records are gone. Callers must treat expired-id scans and index
//! listings as candidates and re-validate them.

pub mod clock;
pub mod codec;
pub mod engine;
pub mod error;
pub mod pool;
pub mod store;
pub mod tables;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::memory::MemoryEngine;
pub use engine::redb_engine::RedbEngine;
pub use engine::{Connection, ConnectionFactory, EngineError, EngineResult};
pub use error::{ErrorKind, InternalCause, Operation, StoreError, StoreResult};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use store::{ALL_BACKFILLS, BACKFILL_LAST_ACK_TIME, BackfillStore};
