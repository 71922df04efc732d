//! Backfill store behaviour tests.
//!
//! Each scenario runs against the redb engine and the in-memory engine so
//! both satisfy the same contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use matchgrid_core::{Any, Backfill, PoolSettings, SearchFields, StoreConfig, Timestamp};
use matchgrid_state::*;

const T0: u64 = 1_700_000_000_000_000_000;

fn config() -> StoreConfig {
    StoreConfig {
        pool: PoolSettings {
            max_size: 8,
            connect_timeout: Duration::from_secs(2),
            idle_max: 8,
        },
        ..StoreConfig::default()
    }
}

fn stores() -> Vec<(&'static str, BackfillStore, Arc<ManualClock>)> {
    let redb: Arc<dyn ConnectionFactory> = Arc::new(RedbEngine::open_in_memory().unwrap());
    let memory: Arc<dyn ConnectionFactory> = Arc::new(MemoryEngine::new());

    [("redb", redb), ("memory", memory)]
        .into_iter()
        .map(|(name, factory)| {
            let clock = Arc::new(ManualClock::at_unix_nanos(T0));
            let store = BackfillStore::new(factory, &config()).with_clock(clock.clone());
            (name, store, clock)
        })
        .collect()
}

fn sample_backfill(id: &str, generation: i64) -> Backfill {
    let mut backfill = Backfill::new(id, generation)
        .with_extension("match", Any::new("type.example/Match", b"open-slots:2".to_vec()));
    backfill.search_fields = Some(SearchFields {
        double_args: HashMap::from([("mmr".to_string(), 1450.5)]),
        string_args: HashMap::from([("region".to_string(), "eu-west".to_string())]),
        tags: vec!["ranked".to_string()],
    });
    backfill.create_time = Some(Timestamp::from_unix_nanos(T0 as i64));
    backfill
}

fn tickets(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

// ── Records ────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get_round_trips() {
    for (name, store, _) in stores() {
        let backfill = sample_backfill("bf-1", 1);
        let held = tickets(&["t-2", "t-1"]);

        store.create_backfill(&backfill, &held).await.unwrap();
        let (got, got_tickets) = store.get_backfill("bf-1").await.unwrap();

        assert_eq!(got, backfill, "{name}");
        assert_eq!(got_tickets, held, "{name}");
    }
}

#[tokio::test]
async fn create_with_no_tickets() {
    for (name, store, _) in stores() {
        store.create_backfill(&Backfill::new("bf-1", 0), &[]).await.unwrap();
        let (_, got_tickets) = store.get_backfill("bf-1").await.unwrap();
        assert!(got_tickets.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn second_create_is_already_exists() {
    for (name, store, _) in stores() {
        store.create_backfill(&sample_backfill("bf-1", 1), &[]).await.unwrap();
        let err = store
            .create_backfill(&sample_backfill("bf-1", 1), &[])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{name}");
        assert_eq!(err.to_string(), "backfill already exists, id: bf-1", "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_have_one_winner() {
    for (name, store, _) in stores() {
        let mut handles = Vec::new();
        for generation in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_backfill(&Backfill::new("contested", generation), &[])
                    .await
            }));
        }

        let mut winners = 0;
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => losers += 1,
                Err(e) => panic!("{name}: unexpected error: {e}"),
            }
        }
        assert_eq!((winners, losers), (1, 7), "{name}");
    }
}

#[tokio::test]
async fn update_replaces_instead_of_merging() {
    for (name, store, _) in stores() {
        let original = sample_backfill("bf-1", 1);
        store
            .create_backfill(&original, &tickets(&["t-1", "t-2"]))
            .await
            .unwrap();

        let replacement = Backfill::new("bf-1", 2);
        store
            .update_backfill(&replacement, &tickets(&["t-3"]))
            .await
            .unwrap();

        let (got, got_tickets) = store.get_backfill("bf-1").await.unwrap();
        assert_eq!(got, replacement, "{name}");
        assert!(got.search_fields.is_none(), "{name}");
        assert_eq!(got_tickets, tickets(&["t-3"]), "{name}");

        store.update_backfill(&replacement, &[]).await.unwrap();
        assert!(store.get_backfill("bf-1").await.unwrap().1.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn update_of_missing_backfill_creates_it() {
    for (name, store, _) in stores() {
        store.update_backfill(&Backfill::new("bf-1", 5), &[]).await.unwrap();
        assert_eq!(store.get_backfill("bf-1").await.unwrap().0.generation, 5, "{name}");
    }
}

#[tokio::test]
async fn delete_is_idempotent() {
    for (name, store, _) in stores() {
        store.delete_backfill("never-existed").await.unwrap();

        store.create_backfill(&sample_backfill("bf-1", 1), &[]).await.unwrap();
        store.delete_backfill("bf-1").await.unwrap();
        store.delete_backfill("bf-1").await.unwrap();

        let err = store.get_backfill("bf-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{name}");
    }
}

#[tokio::test]
async fn deleted_id_can_be_created_again() {
    for (name, store, _) in stores() {
        store.create_backfill(&Backfill::new("bf-1", 1), &[]).await.unwrap();
        store.delete_backfill("bf-1").await.unwrap();
        store.create_backfill(&Backfill::new("bf-1", 9), &[]).await.unwrap();

        assert_eq!(store.get_backfill("bf-1").await.unwrap().0.generation, 9, "{name}");
    }
}

// ── Expiry ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unacknowledged_backfill_expires() {
    for (name, store, _) in stores() {
        let ttl = Duration::from_secs(10);
        store.create_backfill(&sample_backfill("bf-1", 1), &[]).await.unwrap();

        let now = UNIX_EPOCH + Duration::from_nanos(T0) + ttl + Duration::from_nanos(1);
        let expired = store.list_expired_backfill_ids(now, ttl).await.unwrap();
        assert_eq!(expired, vec!["bf-1"], "{name}");
    }
}

#[tokio::test]
async fn acknowledgement_defers_expiry() {
    for (name, store, clock) in stores() {
        let ttl = Duration::from_secs(10);
        store.create_backfill(&sample_backfill("bf-1", 1), &[]).await.unwrap();

        clock.advance(ttl / 2);
        store.acknowledge_backfill("bf-1").await.unwrap();

        let now = UNIX_EPOCH + Duration::from_nanos(T0) + ttl + Duration::from_nanos(1);
        let expired = store.list_expired_backfill_ids(now, ttl).await.unwrap();
        assert!(expired.is_empty(), "{name}: {expired:?}");
    }
}

#[tokio::test]
async fn acknowledged_exactly_at_cutoff_is_expired() {
    for (name, store, clock) in stores() {
        let ttl = Duration::from_secs(30);
        store.acknowledge_backfill("bf-1").await.unwrap();

        let now = clock.now() + ttl;
        let expired = store.list_expired_backfill_ids(now, ttl).await.unwrap();
        assert_eq!(expired, vec!["bf-1"], "{name}");

        let just_before = now - Duration::from_nanos(1);
        let expired = store.list_expired_backfill_ids(just_before, ttl).await.unwrap();
        assert!(expired.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn expired_ids_are_ordered_by_ack_time() {
    for (name, store, clock) in stores() {
        for id in ["bf-c", "bf-a", "bf-b"] {
            store.acknowledge_backfill(id).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }
        // bf-b was acknowledged at T0 + 2s; only the first two are past a 2s TTL.
        let expired = store
            .list_expired_backfill_ids(clock.now(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(expired, vec!["bf-c", "bf-a"], "{name}");
    }
}

#[tokio::test]
async fn empty_ack_set_yields_empty_list() {
    for (name, store, clock) in stores() {
        let expired = store
            .list_expired_backfill_ids(clock.now(), Duration::ZERO)
            .await
            .unwrap();
        assert!(expired.is_empty(), "{name}");
    }
}

// ── Active index ───────────────────────────────────────────────────

#[tokio::test]
async fn index_survives_record_deletion() {
    for (name, store, _) in stores() {
        let backfill = sample_backfill("bf-1", 3);
        store.create_backfill(&backfill, &[]).await.unwrap();
        store.index_backfill(&backfill).await.unwrap();

        store.delete_backfill("bf-1").await.unwrap();

        let err = store.get_backfill("bf-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{name}");
        let indexed = store.list_indexed_backfills().await.unwrap();
        assert_eq!(indexed.get("bf-1"), Some(&3), "{name}");
    }
}

#[tokio::test]
async fn index_tracks_latest_generation() {
    for (name, store, _) in stores() {
        store.index_backfill(&Backfill::new("bf-1", 1)).await.unwrap();
        store.index_backfill(&Backfill::new("bf-2", 7)).await.unwrap();
        store.index_backfill(&Backfill::new("bf-1", 2)).await.unwrap();

        let indexed = store.list_indexed_backfills().await.unwrap();
        let expected = HashMap::from([("bf-1".to_string(), 2), ("bf-2".to_string(), 7)]);
        assert_eq!(indexed, expected, "{name}");

        store.deindex_backfill("bf-1").await.unwrap();
        let indexed = store.list_indexed_backfills().await.unwrap();
        assert_eq!(indexed.len(), 1, "{name}");
        assert!(indexed.contains_key("bf-2"), "{name}");
    }
}

#[tokio::test]
async fn index_accepts_negative_generation() {
    for (name, store, _) in stores() {
        store.index_backfill(&Backfill::new("bf-1", -4)).await.unwrap();
        assert_eq!(store.list_indexed_backfills().await.unwrap()["bf-1"], -4, "{name}");
    }
}

// ── Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn redb_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backfills.redb");
    let backfill = sample_backfill("bf-1", 2);

    {
        let store = BackfillStore::open(&path, &config()).unwrap();
        store.create_backfill(&backfill, &tickets(&["t-1"])).await.unwrap();
        store.index_backfill(&backfill).await.unwrap();
    }

    let store = BackfillStore::open(&path, &config()).unwrap();
    let (got, got_tickets) = store.get_backfill("bf-1").await.unwrap();
    assert_eq!(got, backfill);
    assert_eq!(got_tickets, tickets(&["t-1"]));
    assert_eq!(store.list_indexed_backfills().await.unwrap()["bf-1"], 2);
}

#[tokio::test]
async fn connections_are_returned_after_every_call() {
    for (name, store, _) in stores() {
        store.create_backfill(&Backfill::new("bf-1", 1), &[]).await.unwrap();
        let _ = store.create_backfill(&Backfill::new("bf-1", 1), &[]).await;
        let _ = store.get_backfill("missing").await;
        store.list_indexed_backfills().await.unwrap();

        let stats = store.pool_stats();
        assert_eq!(stats.active, 0, "{name}");
        assert_eq!(stats.total, stats.idle, "{name}");
    }
}
