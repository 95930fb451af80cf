//! Journal and serial tests for irr-storage
//!
//! These tests verify gapless serial allocation under concurrent writers,
//! write-behind cache semantics, status bookkeeping and journal expiry.

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use irr_core::{
    DatabaseOperation, Record, RecordKey, RecordParser, RoutePreferenceStatus, RpkiStatus,
    RpslParser,
};
use irr_storage::{
    ChangeEvent, DatabaseHandler, JournalOrigin, RecordQuery, StorageConfig, StorageContext,
};
use tempfile::TempDir;

fn open(journaled: &[&str]) -> (Arc<StorageContext>, TempDir) {
    let temp = TempDir::new().unwrap();
    let mut config = StorageConfig::with_base_dir(temp.path()).with_batch_size(16);
    for source in journaled {
        config = config.with_journaled_source(source);
    }
    (Arc::new(StorageContext::open(config).unwrap()), temp)
}

fn mntner(name: &str, source: &str, descr: &str) -> Record {
    let text = format!("mntner: {name}\ndescr: {descr}\nsource: {source}\n");
    RpslParser::new().record_from_text(&text, false).unwrap()
}

// ============================================================================
// Serial Allocation
// ============================================================================

/// Two threads interleaving commits to one source never produce a gap or a
/// duplicate serial
#[test]
fn test_interleaved_commits_are_gapless() {
    let (ctx, _temp) = open(&["TEST"]);
    let commits_per_writer = 25;

    let writers: Vec<_> = (0..2)
        .map(|writer| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                for i in 0..commits_per_writer {
                    let mut handler = DatabaseHandler::new(ctx.clone());
                    let name = format!("MNT-W{writer}-{i}");
                    handler
                        .upsert_record(mntner(&name, "TEST", "x"), JournalOrigin::AuthChange, None)
                        .unwrap();
                    handler.commit().unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let mut handler = DatabaseHandler::new(ctx.clone());
    let serials: Vec<u64> = handler
        .journal_entries("TEST", 0, None)
        .unwrap()
        .iter()
        .map(|e| e.serial)
        .collect();
    let expected: Vec<u64> = (1..=2 * commits_per_writer).collect();
    assert_eq!(serials, expected);

    let status = ctx.source_status("TEST").unwrap().unwrap();
    assert_eq!(status.serial_oldest_journal, Some(1));
    assert_eq!(status.serial_newest_journal, Some(2 * commits_per_writer));
}

/// Writers to different sources do not wait for each other
#[test]
fn test_sources_commit_independently() {
    let (ctx, _temp) = open(&["ALPHA", "BETA"]);

    let mut alpha = DatabaseHandler::new(ctx.clone());
    alpha
        .upsert_record(mntner("MNT-A", "ALPHA", "a"), JournalOrigin::AuthChange, None)
        .unwrap();

    // alpha still holds its lock while beta commits
    let mut beta = DatabaseHandler::new(ctx.clone());
    beta.upsert_record(mntner("MNT-B", "BETA", "b"), JournalOrigin::AuthChange, None)
        .unwrap();
    beta.commit().unwrap();
    alpha.commit().unwrap();

    assert_eq!(ctx.all_statuses().unwrap().len(), 2);
}

/// Serials continue after the journal was expired
#[test]
fn test_serials_monotonic_after_expiry() {
    let (ctx, _temp) = open(&["TEST"]);
    let mut handler = DatabaseHandler::new(ctx.clone());
    for i in 0..5 {
        handler
            .upsert_record(
                mntner(&format!("MNT-{i}"), "TEST", "x"),
                JournalOrigin::AuthChange,
                None,
            )
            .unwrap();
    }
    handler.commit().unwrap();

    assert_eq!(handler.expire_journal("TEST", 6).unwrap(), 5);
    handler.commit().unwrap();
    let status = ctx.source_status("TEST").unwrap().unwrap();
    assert_eq!(status.serial_oldest_journal, None);
    assert_eq!(status.serial_newest_seen, Some(5));

    handler
        .upsert_record(mntner("MNT-NEW", "TEST", "x"), JournalOrigin::AuthChange, None)
        .unwrap();
    handler.commit().unwrap();
    let entries = handler.journal_entries("TEST", 0, None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].serial, 6);
}

/// Expiry of a prefix of the journal moves the oldest journal serial
#[test]
fn test_partial_expiry_updates_bounds() {
    let (ctx, _temp) = open(&["TEST"]);
    let mut handler = DatabaseHandler::new(ctx.clone());
    for i in 0..4 {
        handler
            .upsert_record(
                mntner(&format!("MNT-{i}"), "TEST", "x"),
                JournalOrigin::AuthChange,
                None,
            )
            .unwrap();
    }
    handler.expire_journal("TEST", 3).unwrap();
    handler.commit().unwrap();

    let status = ctx.source_status("TEST").unwrap().unwrap();
    assert_eq!(status.serial_oldest_journal, Some(3));
    assert_eq!(status.serial_newest_journal, Some(4));
}

// ============================================================================
// Status Passes
// ============================================================================

fn route(prefix: &str, source: &str) -> Record {
    let text = format!("route: {prefix}\norigin: AS65546\nsource: {source}\n");
    RpslParser::new().record_from_text(&text, false).unwrap()
}

/// Status passes visiting sources in opposite orders both finish
#[test]
fn test_concurrent_status_passes_do_not_deadlock() {
    let (ctx, _temp) = open(&["ALPHA", "BETA"]);
    let alpha = route("192.0.2.0/24", "ALPHA");
    let beta = route("198.51.100.0/24", "BETA");
    let (alpha_key, beta_key) = (alpha.key(), beta.key());
    let mut handler = DatabaseHandler::new(ctx.clone());
    handler.upsert_record(alpha, JournalOrigin::AuthChange, None).unwrap();
    handler.upsert_record(beta, JournalOrigin::AuthChange, None).unwrap();
    handler.commit().unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let (done_tx, done_rx) = mpsc::channel();

    let rpki = {
        let (ctx, barrier, done_tx) = (ctx.clone(), barrier.clone(), done_tx.clone());
        let (first, second) = (beta_key.clone(), alpha_key.clone());
        thread::spawn(move || {
            let mut handler = DatabaseHandler::new(ctx);
            let result = handler
                .update_rpki_status(&[(first, RpkiStatus::Invalid)])
                .and_then(|_| {
                    barrier.wait();
                    handler.update_rpki_status(&[(second, RpkiStatus::Invalid)])
                })
                .and_then(|_| handler.commit());
            done_tx.send(result.is_ok()).unwrap();
        })
    };
    let preference = {
        let (ctx, barrier) = (ctx.clone(), barrier.clone());
        let (first, second) = (alpha_key.clone(), beta_key.clone());
        thread::spawn(move || {
            let mut handler = DatabaseHandler::new(ctx);
            let result = handler
                .update_route_preference_status(&[(first, RoutePreferenceStatus::Suppressed)])
                .and_then(|_| {
                    barrier.wait();
                    handler.update_route_preference_status(&[(second, RoutePreferenceStatus::Suppressed)])
                })
                .and_then(|_| handler.commit());
            done_tx.send(result.is_ok()).unwrap();
        })
    };

    for _ in 0..2 {
        let finished = done_rx.recv_timeout(Duration::from_secs(30));
        assert_eq!(finished, Ok(true));
    }
    rpki.join().unwrap();
    preference.join().unwrap();

    let mut handler = DatabaseHandler::new(ctx);
    for key in [&alpha_key, &beta_key] {
        let record = handler.get_record(key).unwrap().unwrap();
        assert_eq!(record.rpki_status, RpkiStatus::Invalid);
        assert_eq!(record.route_preference_status, RoutePreferenceStatus::Suppressed);
    }
}

/// A status flip on a mirrored source does not take the next upstream serial
#[test]
fn test_status_flip_leaves_upstream_serials_free() {
    let (ctx, _temp) = open(&["TEST"]);
    let record = route("192.0.2.0/24", "TEST");
    let key = record.key();

    let mut handler = DatabaseHandler::new(ctx.clone());
    handler.upsert_record(record, JournalOrigin::Mirror, Some(103)).unwrap();
    handler.commit().unwrap();

    handler.update_rpki_status(&[(key.clone(), RpkiStatus::Invalid)]).unwrap();
    handler.commit().unwrap();
    let stored = handler.get_record(&key).unwrap().unwrap();
    assert_eq!(stored.rpki_status, RpkiStatus::Invalid);

    handler
        .upsert_record(mntner("MNT-NEXT", "TEST", "x"), JournalOrigin::Mirror, Some(104))
        .unwrap();
    handler.commit().unwrap();

    let serials: Vec<u64> = handler
        .journal_entries("TEST", 0, None)
        .unwrap()
        .iter()
        .map(|e| e.serial)
        .collect();
    assert_eq!(serials, vec![103, 104]);
    assert_eq!(ctx.source_status("TEST").unwrap().unwrap().serial_newest_mirror, Some(104));
}

/// Sources configured as mirrored never journal status flips
#[test]
fn test_configured_mirror_skips_flip_journal() {
    let temp = TempDir::new().unwrap();
    let config = StorageConfig::with_base_dir(temp.path())
        .with_journaled_source("TEST")
        .with_journaled_source("LOCAL")
        .with_mirrored_source("TEST");
    let ctx = Arc::new(StorageContext::open(config).unwrap());

    let mirrored = route("192.0.2.0/24", "TEST");
    let local = route("192.0.2.0/24", "LOCAL");
    let changes = [
        (mirrored.key(), RoutePreferenceStatus::Suppressed),
        (local.key(), RoutePreferenceStatus::Suppressed),
    ];
    let mut handler = DatabaseHandler::new(ctx);
    handler.disable_journaling();
    handler.upsert_record(mirrored, JournalOrigin::Mirror, None).unwrap();
    handler.upsert_record(local, JournalOrigin::AuthChange, None).unwrap();
    handler.commit().unwrap();

    let mut handler = DatabaseHandler::new(handler.context().clone());
    assert_eq!(handler.update_route_preference_status(&changes).unwrap(), 2);
    handler.commit().unwrap();

    assert!(handler.journal_entries("TEST", 0, None).unwrap().is_empty());
    let entries = handler.journal_entries("LOCAL", 0, None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].serial, 1);
    assert_eq!(entries[0].operation, DatabaseOperation::Delete);
    assert_eq!(entries[0].origin, JournalOrigin::RoutePreference);
}

// ============================================================================
// Write-behind Cache
// ============================================================================

/// The same upsert twice gives one record and two journal entries
#[test]
fn test_double_upsert_one_record_two_entries() {
    let (ctx, _temp) = open(&["TEST"]);
    let mut handler = DatabaseHandler::new(ctx);
    handler
        .upsert_record(mntner("MNT-A", "TEST", "first"), JournalOrigin::Mirror, None)
        .unwrap();
    handler
        .upsert_record(mntner("MNT-A", "TEST", "second"), JournalOrigin::Mirror, None)
        .unwrap();
    handler.commit().unwrap();

    let records = handler
        .execute_query(&RecordQuery::new().sources(["TEST"]))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].object_text.contains("second"));

    let entries = handler.journal_entries("TEST", 0, None).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.operation == DatabaseOperation::AddOrUpdate));
    assert!(entries[1].object_text.contains("second"));
}

/// Capacity flushes keep arrival order in the journal
#[test]
fn test_capacity_flush_preserves_order() {
    let (ctx, _temp) = open(&["TEST"]);
    let mut handler = DatabaseHandler::new(ctx);
    for i in 0..40 {
        handler
            .upsert_record(
                mntner(&format!("MNT-{i:02}"), "TEST", "x"),
                JournalOrigin::Mirror,
                None,
            )
            .unwrap();
    }
    handler.commit().unwrap();

    let entries = handler.journal_entries("TEST", 0, None).unwrap();
    assert_eq!(entries.len(), 40);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.rpsl_pk, format!("MNT-{i:02}"));
        assert_eq!(entry.serial, i as u64 + 1);
    }
}

/// A delete after a pending upsert of the same key sees the upsert
#[test]
fn test_delete_after_pending_upsert() {
    let (ctx, _temp) = open(&["TEST"]);
    let mut handler = DatabaseHandler::new(ctx);
    handler
        .upsert_record(mntner("MNT-A", "TEST", "x"), JournalOrigin::Mirror, None)
        .unwrap();
    let removed = handler
        .delete_record(&RecordKey::new("MNT-A", "TEST"), JournalOrigin::Mirror, None)
        .unwrap();
    assert!(removed.is_some());
    handler.commit().unwrap();

    let ops: Vec<_> = handler
        .journal_entries("TEST", 0, None)
        .unwrap()
        .iter()
        .map(|e| e.operation)
        .collect();
    assert_eq!(ops, vec![DatabaseOperation::AddOrUpdate, DatabaseOperation::Delete]);
}

// ============================================================================
// Status Bookkeeping
// ============================================================================

/// Unjournaled sources still remember forced serials
#[test]
fn test_forced_serial_without_journal() {
    let (ctx, _temp) = open(&[]);
    let mut handler = DatabaseHandler::new(ctx.clone());
    handler
        .upsert_record(mntner("MNT-A", "TEST", "x"), JournalOrigin::Mirror, Some(41))
        .unwrap();
    handler
        .upsert_record(mntner("MNT-B", "TEST", "x"), JournalOrigin::Mirror, Some(42))
        .unwrap();
    handler.commit().unwrap();

    let status = ctx.source_status("TEST").unwrap().unwrap();
    assert_eq!(status.serial_newest_mirror, Some(42));
    assert_eq!(status.serial_oldest_seen, Some(41));
    assert_eq!(status.serial_newest_journal, None);
    assert!(handler.journal_entries("TEST", 0, None).unwrap().is_empty());
}

/// Only the most recent mirror error is kept, and force_reload is cleared
#[test]
fn test_mirror_error_and_force_reload() {
    let (ctx, _temp) = open(&[]);
    let mut handler = DatabaseHandler::new(ctx.clone());
    handler.set_force_reload("TEST");
    handler.commit().unwrap();
    assert!(ctx.source_status("TEST").unwrap().unwrap().force_reload);

    handler.record_mirror_error("TEST", "first failure");
    handler.record_mirror_error("TEST", "second failure");
    handler.record_serial_exported("TEST", 9);
    handler.commit().unwrap();

    let status = ctx.source_status("TEST").unwrap().unwrap();
    assert!(!status.force_reload);
    assert_eq!(status.last_error.as_deref(), Some("second failure"));
    assert!(status.last_error_timestamp.is_some());
    assert_eq!(status.serial_last_export, Some(9));
}

/// A wipe plus bulk load resets the seen range and announces a full reload
#[tokio::test]
async fn test_full_reload_resets_and_notifies() {
    let (ctx, _temp) = open(&["TEST"]);
    let mut events = ctx.subscribe();

    let mut handler = DatabaseHandler::new(ctx.clone());
    handler
        .upsert_record(mntner("MNT-OLD", "TEST", "x"), JournalOrigin::Mirror, Some(10))
        .unwrap();
    handler.commit().unwrap();

    let mut reload = DatabaseHandler::new(ctx.clone());
    reload.delete_all_records_with_journal("TEST").unwrap();
    reload.disable_journaling();
    reload
        .upsert_record(mntner("MNT-NEW", "TEST", "x"), JournalOrigin::Mirror, None)
        .unwrap();
    reload.force_record_serial_seen("TEST", 100);
    reload.commit().unwrap();

    let status = ctx.source_status("TEST").unwrap().unwrap();
    assert_eq!(status.serial_newest_mirror, Some(100));
    assert_eq!(status.serial_oldest_seen, Some(100));
    assert_eq!(status.serial_newest_journal, None);

    let records = reload.execute_query(&RecordQuery::new()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rpsl_pk, "MNT-NEW");

    assert_eq!(
        events.recv().await.unwrap(),
        ChangeEvent::Committed {
            source: "TEST".into(),
            serial_newest: Some(10)
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        ChangeEvent::FullReload {
            source: "TEST".into()
        }
    );
}
