//! BackfillStore — persistence and indexing for backfills.
//!
//! Every operation checks a connection out of the pool, issues its engine
//! commands and releases the connection when the guard drops. There is no
//! locking and no retry here; concurrency safety comes from the atomicity
//! of the individual engine commands.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use matchgrid_core::{Backfill, BackfillId, StateSettings, StoreConfig, TicketId};
use tracing::debug;

use crate::clock::{Clock, SystemClock, unix_nanos};
use crate::codec;
use crate::engine::redb_engine::RedbEngine;
use crate::engine::{ConnectionFactory, EngineResult};
use crate::error::{InternalCause, Operation, StoreError, StoreResult};
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};

/// Sorted set of backfill ids scored by last acknowledgement (unix nanos).
pub const BACKFILL_LAST_ACK_TIME: &str = "backfill_last_ack_time";

/// Hash of indexed backfill ids to their generation.
pub const ALL_BACKFILLS: &str = "allBackfills";

/// Backfill state store over a pooled storage engine.
///
/// Cheap to clone; clones share the pool.
///
/// Engine commands run synchronously inside the async calls. With the
/// on-disk [`RedbEngine`] each write commits (and fsyncs) on the runtime
/// worker thread, so a call may block that thread for the duration.
#[derive(Clone, Debug)]
pub struct BackfillStore {
    pool: Arc<ConnectionPool>,
    clock: Arc<dyn Clock>,
    settings: StateSettings,
}

impl BackfillStore {
    /// Create a store over `factory` using the system clock.
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: &StoreConfig) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(factory, &config.pool)),
            clock: Arc::new(SystemClock),
            settings: config.state.clone(),
        }
    }

    /// Replace the clock used for acknowledgement timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open (or create) a redb-backed store at the given path.
    pub fn open(path: &Path, config: &StoreConfig) -> EngineResult<Self> {
        let engine = RedbEngine::open(path)?;
        Ok(Self::new(Arc::new(engine), config))
    }

    /// Create an ephemeral store backed by in-memory redb.
    pub fn open_in_memory(config: &StoreConfig) -> EngineResult<Self> {
        let engine = RedbEngine::open_in_memory()?;
        Ok(Self::new(Arc::new(engine), config))
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    async fn connection(&self, op: Operation, id: Option<&str>) -> StoreResult<PooledConnection> {
        self.pool
            .acquire()
            .await
            .map_err(|e| StoreError::unavailable(op, id, e))
    }

    // ── Records ────────────────────────────────────────────────────

    /// Store a new backfill with the tickets it holds and mark it
    /// acknowledged now. Fails with `AlreadyExists` if the id is taken.
    pub async fn create_backfill(
        &self,
        backfill: &Backfill,
        ticket_ids: &[TicketId],
    ) -> StoreResult<()> {
        let op = Operation::CreateBackfill;
        let id = backfill.id.as_str();
        let mut conn = self.connection(op, Some(id)).await?;

        let value = codec::encode_record(backfill, ticket_ids);
        let created = conn
            .run(|c| c.set_nx(id, &value))
            .map_err(|e| StoreError::internal(op, Some(id), e))?;
        if !created {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }

        self.acknowledge(&mut conn, op, id)?;
        debug!(%id, generation = backfill.generation, tickets = ticket_ids.len(), "backfill created");
        Ok(())
    }

    /// Read a backfill and the tickets it holds.
    pub async fn get_backfill(&self, id: &str) -> StoreResult<(Backfill, Vec<TicketId>)> {
        let op = Operation::GetBackfill;
        let mut conn = self.connection(op, Some(id)).await?;

        let value = conn
            .run(|c| c.get(id))
            .map_err(|e| StoreError::internal(op, Some(id), e))?;
        // An empty payload is treated exactly like a missing key.
        let value = match value {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Err(StoreError::NotFound(id.to_string())),
        };

        let record =
            codec::decode_record(&value).map_err(|e| StoreError::internal(op, Some(id), e))?;
        let backfill = record
            .backfill
            .ok_or_else(|| StoreError::internal(op, Some(id), InternalCause::MissingBackfill))?;
        Ok((backfill, record.ticket_ids))
    }

    /// Replace a backfill and its ticket list. No existence or generation
    /// check is made; an empty `ticket_ids` clears the held tickets.
    pub async fn update_backfill(
        &self,
        backfill: &Backfill,
        ticket_ids: &[TicketId],
    ) -> StoreResult<()> {
        let op = Operation::UpdateBackfill;
        let id = backfill.id.as_str();
        let mut conn = self.connection(op, Some(id)).await?;

        let value = codec::encode_record(backfill, ticket_ids);
        conn.run(|c| c.set(id, &value))
            .map_err(|e| StoreError::internal(op, Some(id), e))?;
        debug!(%id, generation = backfill.generation, tickets = ticket_ids.len(), "backfill updated");
        Ok(())
    }

    /// Delete a backfill record and its acknowledgement entry. Succeeds if
    /// the backfill does not exist. The active index is left untouched.
    ///
    /// The two removals are separate commands; if the second one fails the
    /// acknowledgement entry outlives the record.
    pub async fn delete_backfill(&self, id: &str) -> StoreResult<()> {
        let op = Operation::DeleteBackfill;
        let mut conn = self.connection(op, Some(id)).await?;

        let existed = conn
            .run(|c| c.del(id))
            .map_err(|e| StoreError::internal(op, Some(id), e))?;
        conn.run(|c| c.zrem(BACKFILL_LAST_ACK_TIME, id))
            .map_err(|e| StoreError::internal(op, Some(id), e))?;
        debug!(%id, existed, "backfill deleted");
        Ok(())
    }

    // ── Acknowledgement ────────────────────────────────────────────

    /// Record that the backfill was seen now. Does not check that the
    /// backfill exists; that is the caller's responsibility.
    pub async fn acknowledge_backfill(&self, id: &str) -> StoreResult<()> {
        let op = Operation::AcknowledgeBackfill;
        let mut conn = self.connection(op, Some(id)).await?;
        self.acknowledge(&mut conn, op, id)
    }

    fn acknowledge(&self, conn: &mut PooledConnection, op: Operation, id: &str) -> StoreResult<()> {
        let now = unix_nanos(self.clock.now());
        conn.run(|c| c.zadd(BACKFILL_LAST_ACK_TIME, now, id))
            .map_err(|e| StoreError::internal(op, Some(id), e))?;
        debug!(%id, ack_time = now, "backfill acknowledged");
        Ok(())
    }

    /// Ids of backfills last acknowledged at or before `now - ttl`.
    ///
    /// The result is a snapshot. A backfill may be acknowledged or deleted
    /// concurrently, so callers must re-validate each id before acting on it.
    pub async fn list_expired_backfill_ids(
        &self,
        now: SystemTime,
        ttl: Duration,
    ) -> StoreResult<Vec<BackfillId>> {
        let op = Operation::ListExpiredBackfillIds;
        let mut conn = self.connection(op, None).await?;

        let cutoff = expiry_cutoff(now, ttl);
        if cutoff < 0 {
            return Ok(Vec::new());
        }
        conn.run(|c| c.zrange_by_score(BACKFILL_LAST_ACK_TIME, 0, cutoff))
            .map_err(|e| StoreError::internal(op, None, e))
    }

    /// [`Self::list_expired_backfill_ids`] at the clock's current time with
    /// the configured backfill TTL.
    pub async fn expired_backfill_ids(&self) -> StoreResult<Vec<BackfillId>> {
        self.list_expired_backfill_ids(self.clock.now(), self.settings.backfill_ttl())
            .await
    }

    // ── Active index ───────────────────────────────────────────────

    /// Add the backfill to the active index with its current generation.
    pub async fn index_backfill(&self, backfill: &Backfill) -> StoreResult<()> {
        let op = Operation::IndexBackfill;
        let id = backfill.id.as_str();
        let mut conn = self.connection(op, Some(id)).await?;

        let generation = codec::encode_generation(backfill.generation);
        conn.run(|c| c.hset(ALL_BACKFILLS, id, &generation))
            .map_err(|e| StoreError::internal(op, Some(id), e))?;
        debug!(%id, generation = backfill.generation, "backfill indexed");
        Ok(())
    }

    /// Remove the id from the active index. The record, if any, remains.
    pub async fn deindex_backfill(&self, id: &str) -> StoreResult<()> {
        let op = Operation::DeindexBackfill;
        let mut conn = self.connection(op, Some(id)).await?;

        conn.run(|c| c.hdel(ALL_BACKFILLS, id))
            .map_err(|e| StoreError::internal(op, Some(id), e))?;
        debug!(%id, "backfill deindexed");
        Ok(())
    }

    /// All indexed backfill ids with their generations. A single malformed
    /// entry fails the whole call.
    pub async fn list_indexed_backfills(&self) -> StoreResult<HashMap<BackfillId, i64>> {
        let op = Operation::ListIndexedBackfills;
        let mut conn = self.connection(op, None).await?;

        let raw = conn
            .run(|c| c.hgetall(ALL_BACKFILLS))
            .map_err(|e| StoreError::internal(op, None, e))?;
        let mut indexed = HashMap::with_capacity(raw.len());
        for (id, value) in raw {
            let generation = codec::decode_generation(&value).ok_or_else(|| {
                StoreError::internal(
                    op,
                    None,
                    InternalCause::InvalidGeneration {
                        id: id.clone(),
                        len: value.len(),
                    },
                )
            })?;
            indexed.insert(id, generation);
        }
        Ok(indexed)
    }
}

/// Latest acknowledgement time (unix nanos) that counts as expired.
fn expiry_cutoff(now: SystemTime, ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
    unix_nanos(now).saturating_sub(ttl)
}
