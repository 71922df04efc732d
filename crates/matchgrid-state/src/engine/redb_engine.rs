//! redb-backed storage engine.
//!
//! Every command runs in its own redb transaction, which gives the
//! per-command atomicity the store relies on (`set_nx` in particular).
//! Connections are lightweight handles on a shared `Arc<Database>`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use super::{Connection, ConnectionFactory, EngineError, EngineResult};
use crate::tables::*;

/// Convert any `Display` error into an `EngineError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| EngineError::$variant(e.to_string())
    };
}

/// Storage engine backed by a redb database, on disk or in memory.
#[derive(Clone)]
pub struct RedbEngine {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbEngine").finish_non_exhaustive()
    }
}

impl RedbEngine {
    /// Open (or create) a persistent engine at the given path.
    pub fn open(path: &Path) -> EngineResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let engine = Self { db: Arc::new(db) };
        engine.ensure_tables()?;
        debug!(?path, "redb engine opened");
        Ok(engine)
    }

    /// Create an ephemeral in-memory engine.
    pub fn open_in_memory() -> EngineResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let engine = Self { db: Arc::new(db) };
        engine.ensure_tables()?;
        debug!("in-memory redb engine opened");
        Ok(engine)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> EngineResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RECORDS).map_err(map_err!(Table))?;
        txn.open_table(ZSET_SCORES).map_err(map_err!(Table))?;
        txn.open_table(ZSET_MEMBERS).map_err(map_err!(Table))?;
        txn.open_table(HASHES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl ConnectionFactory for RedbEngine {
    fn connect(&self) -> EngineResult<Box<dyn Connection>> {
        Ok(Box::new(RedbConnection {
            db: Arc::clone(&self.db),
        }))
    }
}

/// A connection handle on a shared redb database.
pub struct RedbConnection {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbConnection").finish_non_exhaustive()
    }
}

impl Connection for RedbConnection {
    fn set_nx(&mut self, key: &str, value: &[u8]) -> EngineResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            let exists = table.get(key).map_err(map_err!(Read))?.is_some();
            if !exists {
                table.insert(key, value).map_err(map_err!(Write))?;
            }
            inserted = !exists;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(inserted)
    }

    fn get(&mut self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> EngineResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn del(&mut self, key: &str) -> EngineResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn zadd(&mut self, set: &str, score: i64, member: &str) -> EngineResult<()> {
        let mkey = member_key(set, member);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut members = txn.open_table(ZSET_MEMBERS).map_err(map_err!(Table))?;
            let mut scores = txn.open_table(ZSET_SCORES).map_err(map_err!(Table))?;
            let previous = members
                .insert(mkey.as_str(), score)
                .map_err(map_err!(Write))?
                .map(|guard| guard.value());
            if let Some(old) = previous {
                let old_key = score_key(set, old, member);
                scores.remove(old_key.as_str()).map_err(map_err!(Write))?;
            }
            let skey = score_key(set, score, member);
            scores.insert(skey.as_str(), ()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn zrange_by_score(&mut self, set: &str, min: i64, max: i64) -> EngineResult<Vec<String>> {
        if min > max {
            return Ok(Vec::new());
        }
        let set_prefix = prefix(set);
        let floor = score_floor(set, min);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ZSET_SCORES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(floor.as_str()..).map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            let Some(rest) = key.strip_prefix(set_prefix.as_str()) else {
                break;
            };
            let (score, member) = split_score_key(rest)
                .ok_or_else(|| EngineError::Read(format!("malformed sorted-set key: {key}")))?;
            if score > max {
                break;
            }
            results.push(member.to_string());
        }
        Ok(results)
    }

    fn zrem(&mut self, set: &str, member: &str) -> EngineResult<bool> {
        let mkey = member_key(set, member);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut members = txn.open_table(ZSET_MEMBERS).map_err(map_err!(Table))?;
            let mut scores = txn.open_table(ZSET_SCORES).map_err(map_err!(Table))?;
            let previous = members
                .remove(mkey.as_str())
                .map_err(map_err!(Write))?
                .map(|guard| guard.value());
            if let Some(old) = previous {
                let old_key = score_key(set, old, member);
                scores.remove(old_key.as_str()).map_err(map_err!(Write))?;
            }
            existed = previous.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn hset(&mut self, hash: &str, field: &str, value: &[u8]) -> EngineResult<()> {
        let key = member_key(hash, field);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HASHES).map_err(map_err!(Table))?;
            table.insert(key.as_str(), value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn hdel(&mut self, hash: &str, field: &str) -> EngineResult<bool> {
        let key = member_key(hash, field);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(HASHES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn hgetall(&mut self, hash: &str) -> EngineResult<HashMap<String, Vec<u8>>> {
        let hash_prefix = prefix(hash);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HASHES).map_err(map_err!(Table))?;
        let mut results = HashMap::new();
        for entry in table.range(hash_prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            let Some(field) = key.strip_prefix(hash_prefix.as_str()) else {
                break;
            };
            results.insert(field.to_string(), value.value().to_vec());
        }
        Ok(results)
    }

    fn ping(&mut self) -> bool {
        true
    }
}
