//! In-memory storage engine with fault injection.
//!
//! All connections share one `Mutex`-guarded dataset, so every command is
//! atomic. Faults can be switched on to exercise the store's error paths:
//! refusing new connections, or failing every command on existing ones.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{Connection, ConnectionFactory, EngineError, EngineResult};

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

#[derive(Debug, Default)]
struct Data {
    strings: HashMap<String, Vec<u8>>,
    zsets: HashMap<String, SortedSet>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
}

#[derive(Debug, Default)]
struct Inner {
    data: Mutex<Data>,
    refuse_connections: AtomicBool,
    fail_commands: AtomicBool,
    connects: AtomicUsize,
}

/// In-memory storage engine for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, `connect()` fails with [`EngineError::Connect`].
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// When set, every command on every connection fails with
    /// [`EngineError::Closed`] and `ping()` reports the connection dead.
    pub fn fail_commands(&self, fail: bool) {
        self.inner.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Number of connections established so far.
    pub fn connection_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for MemoryEngine {
    fn connect(&self) -> EngineResult<Box<dyn Connection>> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(EngineError::Connect("connection refused".to_string()));
        }
        let id = self.inner.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(connection = id, "memory engine connection opened");
        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// A connection to a [`MemoryEngine`].
#[derive(Debug)]
pub struct MemoryConnection {
    inner: Arc<Inner>,
}

impl MemoryConnection {
    fn data(&self) -> EngineResult<MutexGuard<'_, Data>> {
        if self.inner.fail_commands.load(Ordering::SeqCst) {
            return Err(EngineError::Closed("connection reset by peer".to_string()));
        }
        Ok(self.inner.data.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Connection for MemoryConnection {
    fn set_nx(&mut self, key: &str, value: &[u8]) -> EngineResult<bool> {
        let mut data = self.data()?;
        if data.strings.contains_key(key) {
            return Ok(false);
        }
        data.strings.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    fn get(&mut self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.data()?.strings.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> EngineResult<()> {
        self.data()?.strings.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn del(&mut self, key: &str) -> EngineResult<bool> {
        Ok(self.data()?.strings.remove(key).is_some())
    }

    fn zadd(&mut self, set: &str, score: i64, member: &str) -> EngineResult<()> {
        let mut data = self.data()?;
        let zset = data.zsets.entry(set.to_string()).or_default();
        if let Some(old) = zset.scores.insert(member.to_string(), score) {
            zset.ordered.remove(&(old, member.to_string()));
        }
        zset.ordered.insert((score, member.to_string()));
        Ok(())
    }

    fn zrange_by_score(&mut self, set: &str, min: i64, max: i64) -> EngineResult<Vec<String>> {
        let data = self.data()?;
        let Some(zset) = data.zsets.get(set) else {
            return Ok(Vec::new());
        };
        Ok(zset
            .ordered
            .range((min, String::new())..)
            .take_while(|(score, _)| *score <= max)
            .map(|(_, member)| member.clone())
            .collect())
    }

    fn zrem(&mut self, set: &str, member: &str) -> EngineResult<bool> {
        let mut data = self.data()?;
        let Some(zset) = data.zsets.get_mut(set) else {
            return Ok(false);
        };
        match zset.scores.remove(member) {
            Some(old) => {
                zset.ordered.remove(&(old, member.to_string()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn hset(&mut self, hash: &str, field: &str, value: &[u8]) -> EngineResult<()> {
        self.data()?
            .hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_vec());
        Ok(())
    }

    fn hdel(&mut self, hash: &str, field: &str) -> EngineResult<bool> {
        let mut data = self.data()?;
        Ok(data
            .hashes
            .get_mut(hash)
            .is_some_and(|fields| fields.remove(field).is_some()))
    }

    fn hgetall(&mut self, hash: &str) -> EngineResult<HashMap<String, Vec<u8>>> {
        Ok(self.data()?.hashes.get(hash).cloned().unwrap_or_default())
    }

    fn ping(&mut self) -> bool {
        !self.inner.fail_commands.load(Ordering::SeqCst)
    }
}
