//! Indexer Integration Tests
//!
//! Full cycles over the in-memory metadata store, change log and scripted
//! bulk client:
//! - projection of a change into a bulk update
//! - deduplication and log-row deletion
//! - deletes removing exactly the projected path, in log order with writes
//! - retries after transport and per-item failures
//! - cache behaviour across cycles
//! - scheduler-driven operation on a paused clock

mod harness;

use harness::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rivven_indexer::reader::{META_FIELDS, META_TEMPLATES};
use rivven_indexer::testing::MockResponse;
use rivven_indexer::{ChangeOp, ReaderKind};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Projection
// ============================================================================

#[tokio::test]
async fn test_add_then_update_becomes_one_bulk_update() -> anyhow::Result<()> {
    init_test_logging();
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    let t = TestIndexerBuilder::new(store).build()?;

    t.append_all([
        entry(1, (10, 2, 100), ChangeOp::Add),
        entry(2, (10, 2, 100), ChangeOp::Update),
    ]);
    let report = t.indexer.run_cycle().await?;

    let submitted = t.client.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        ndjson_lines(&submitted[0]),
        vec![
            json!({"update": {"_index": "projects", "_id": 55}}),
            json!({"doc": {"xattr": {"meta": {"t1": {"status": "ok"}}}}, "doc_as_upsert": true}),
        ]
    );
    assert_eq!(report.operations, 1);
    assert_eq!(report.deleted, 2);
    assert!(t.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_fields_of_one_document_are_typed_and_merged() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    store.add_value(11, 3, 100, "42");
    store.add_value(12, 4, 100, "private");
    let t = TestIndexerBuilder::new(store).readers(1).build()?;

    t.append_all([
        entry(1, (10, 2, 100), ChangeOp::Add),
        entry(2, (11, 3, 100), ChangeOp::Add),
        entry(3, (12, 4, 100), ChangeOp::Add),
    ]);
    let report = t.indexer.run_cycle().await?;

    let lines = ndjson_lines(&t.client.submitted()[0]);
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[1]["doc"],
        json!({"xattr": {"meta": {"t1": {"status": "ok", "size": 42}}}})
    );
    // The non-searchable field is never projected but its row is done.
    assert_eq!(report.deleted, 3);
    assert!(t.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_superseded_entries_are_deleted_with_the_winner() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    let t = TestIndexerBuilder::new(store).build()?;

    t.append_all([
        entry(5, (10, 2, 100), ChangeOp::Update),
        entry(7, (10, 2, 100), ChangeOp::Update),
        entry(3, (10, 2, 100), ChangeOp::Add),
    ]);
    let report = t.indexer.run_cycle().await?;

    assert_eq!(report.operations, 1);
    assert_eq!(report.superseded, 2);
    assert_eq!(report.deleted, 3);
    assert_eq!(t.client.submitted().len(), 1);
    assert!(t.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_field_from_owning_document() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    let t = TestIndexerBuilder::new(store.clone()).build()?;

    t.append_all([
        entry(1, (10, 2, 100), ChangeOp::Add),
        entry(2, (10, 2, 100), ChangeOp::Delete),
    ]);
    let report = t.indexer.run_cycle().await?;

    let submitted = t.client.submitted();
    assert_eq!(submitted.len(), 1);
    let lines = ndjson_lines(&submitted[0]);
    assert_eq!(lines.len(), 2);
    // Tuple 100 belongs to inode 55; the metadata row id 10 names no document.
    assert_eq!(lines[0], json!({"update": {"_index": "projects", "_id": 55}}));
    assert_eq!(
        lines[1]["script"]["params"],
        json!({"path": ["xattr", "meta", "t1", "status"]})
    );
    assert!(lines[1].get("doc").is_none());
    assert_eq!(report.deleted, 2);
    assert!(t.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_and_later_write_of_same_field_apply_in_log_order() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(13, 2, 100, "replaced");
    let t = TestIndexerBuilder::new(store).readers(4).build()?;

    t.append_all([
        entry(1, (10, 2, 100), ChangeOp::Delete),
        entry(2, (13, 2, 100), ChangeOp::Add),
    ]);
    t.indexer.run_cycle().await?;

    let submitted = t.client.submitted();
    assert_eq!(submitted.len(), 1);
    let lines = ndjson_lines(&submitted[0]);
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["update"]["_id"], 55);
    assert!(lines[1].get("script").is_some());
    assert_eq!(lines[2]["update"]["_id"], 55);
    assert_eq!(
        lines[3]["doc"],
        json!({"xattr": {"meta": {"t1": {"status": "replaced"}}}})
    );
    assert!(t.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_xattr_delete_then_add_on_one_inode_keep_log_order() -> anyhow::Result<()> {
    let store = catalog();
    store.add_xattr(5, 1, 2, "b", "v");
    let t = TestIndexerBuilder::new(store)
        .reader(ReaderKind::XAttr)
        .readers(3)
        .build()?;

    t.append_all([
        entry(1, (5, 1, 1), ChangeOp::Delete),
        entry(2, (5, 1, 2), ChangeOp::Add),
    ]);
    t.indexer.run_cycle().await?;

    let submitted = t.client.submitted();
    assert_eq!(submitted.len(), 1);
    let lines = ndjson_lines(&submitted[0]);
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], json!({"update": {"_index": "projects", "_id": 5}}));
    assert_eq!(lines[1]["script"]["params"], json!({"key": "1-1"}));
    assert_eq!(lines[2], json!({"update": {"_index": "projects", "_id": 5}}));
    assert_eq!(
        lines[3]["doc"],
        json!({"xattr": {"b": "v"}, "xattr_keys": {"1-2": "b"}})
    );
    assert!(t.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_xattr_reader_projects_attributes() -> anyhow::Result<()> {
    let store = catalog();
    store.add_xattr(55, 1, 1, "owner", "alice");
    store.add_xattr(55, 1, 2, "quota", "1024");
    let t = TestIndexerBuilder::new(store)
        .reader(ReaderKind::XAttr)
        .readers(1)
        .build()?;

    t.append_all([
        entry(1, (55, 1, 1), ChangeOp::Add),
        entry(2, (55, 1, 2), ChangeOp::Add),
    ]);
    t.indexer.run_cycle().await?;

    let lines = ndjson_lines(&t.client.submitted()[0]);
    assert_eq!(lines[0], json!({"update": {"_index": "projects", "_id": 55}}));
    assert_eq!(
        lines[1]["doc"]["xattr"],
        json!({"owner": "alice", "quota": 1024})
    );
    assert!(t.log.is_empty());
    Ok(())
}

// ============================================================================
// Failure and retry
// ============================================================================

#[tokio::test]
async fn test_retry_after_transport_failure_is_byte_identical() -> anyhow::Result<()> {
    init_test_logging();
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    store.add_value(11, 3, 100, "42");
    store.add_value(20, 2, 200, "new");
    let t = TestIndexerBuilder::new(store).readers(3).build()?;
    t.client.push_response(MockResponse::TransportError);

    t.append_all([
        entry(1, (10, 2, 100), ChangeOp::Add),
        entry(2, (11, 3, 100), ChangeOp::Add),
        entry(3, (20, 2, 200), ChangeOp::Add),
    ]);

    let failed = t.indexer.run_cycle().await?;
    assert!(!failed.index_ok);
    assert_eq!(failed.deleted, 0);
    assert_eq!(failed.requeued, 3);
    assert_eq!(t.log.len(), 3);

    let retried = t.indexer.run_cycle().await?;
    assert!(retried.index_ok);
    assert!(t.log.is_empty());

    let submitted = t.client.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0], submitted[1]);
    Ok(())
}

#[tokio::test]
async fn test_item_failure_keeps_only_that_documents_rows() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    store.add_value(20, 2, 200, "new");
    let t = TestIndexerBuilder::new(store).readers(1).build()?;
    // Documents are emitted in target-id order: inode 55 first.
    t.client.push_response(MockResponse::ItemFailures(vec![0]));

    t.append_all([
        entry(1, (10, 2, 100), ChangeOp::Add),
        entry(2, (20, 2, 200), ChangeOp::Add),
    ]);

    let report = t.indexer.run_cycle().await?;
    assert!(report.index_ok);
    assert_eq!(report.failed, 1);
    assert_eq!(t.log.log_ids(), vec![1]);
    assert_eq!(t.indexer.metrics().snapshot().items_failed, 1);

    t.indexer.run_cycle().await?;
    assert!(t.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_schema_is_retried_until_it_resolves() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(30, 9, 100, "pending");
    let t = TestIndexerBuilder::new(store.clone()).readers(1).build()?;

    t.append(entry(1, (30, 9, 100), ChangeOp::Add));

    for _ in 0..3 {
        let report = t.indexer.run_cycle().await?;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.held, 1);
        assert_eq!(report.requeued, 0);
    }
    assert_eq!(t.log.log_ids(), vec![1]);

    store.add_field(9, "phase", 7, true, rivven_indexer::common::FieldType::Text);
    let report = t.indexer.run_cycle().await?;
    assert_eq!(report.deleted, 1);
    assert!(t.log.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unresolvable_backlog_does_not_block_new_changes() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(30, 9, 100, "stuck");
    store.add_value(31, 9, 200, "stuck");
    store.add_value(10, 2, 100, "ok");
    let t = TestIndexerBuilder::new(store).readers(2).batch_size(2).build()?;

    t.append_all([
        entry(1, (30, 9, 100), ChangeOp::Add),
        entry(2, (31, 9, 200), ChangeOp::Add),
        entry(3, (10, 2, 100), ChangeOp::Add),
    ]);
    for _ in 0..3 {
        t.indexer.run_cycle().await?;
    }

    assert_eq!(t.log.log_ids(), vec![1, 2]);
    assert_eq!(t.indexer.pending_retries(), vec![1, 2]);
    assert_eq!(t.client.submitted().len(), 1);
    Ok(())
}

// ============================================================================
// Caches
// ============================================================================

#[tokio::test]
async fn test_second_cycle_reads_no_schema() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    let t = TestIndexerBuilder::new(store.clone()).readers(1).build()?;

    t.append(entry(1, (10, 2, 100), ChangeOp::Add));
    t.indexer.run_cycle().await?;
    t.append(entry(2, (10, 2, 100), ChangeOp::Update));
    t.indexer.run_cycle().await?;

    assert_eq!(store.read_calls(META_FIELDS), 1);
    assert_eq!(store.read_calls(META_TEMPLATES), 1);
    let snapshot = t.indexer.metrics().snapshot();
    assert_eq!(snapshot.cache_misses, 3);
    assert_eq!(snapshot.cache_hits, 3);
    Ok(())
}

#[tokio::test]
async fn test_lru_eviction_forces_reread() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    store.add_value(11, 3, 100, "1");
    let t = TestIndexerBuilder::new(store.clone())
        .readers(1)
        .lru_capacity(1)
        .build()?;

    t.append(entry(1, (10, 2, 100), ChangeOp::Add));
    t.indexer.run_cycle().await?;
    t.append(entry(2, (11, 3, 100), ChangeOp::Add));
    t.indexer.run_cycle().await?;
    t.append(entry(3, (10, 2, 100), ChangeOp::Update));
    t.indexer.run_cycle().await?;

    assert_eq!(store.read_calls(META_FIELDS), 3);
    assert!(t.log.is_empty());
    Ok(())
}

// ============================================================================
// Ordering and recovery
// ============================================================================

#[tokio::test]
async fn test_queue_drains_in_log_order() -> anyhow::Result<()> {
    let t = TestIndexerBuilder::new(catalog()).build()?;

    let mut ids: Vec<i64> = (1..=500).collect();
    ids.shuffle(&mut StdRng::seed_from_u64(7));
    for id in &ids {
        t.indexer.push(entry(*id, (*id, 2, 100), ChangeOp::Add));
    }

    let mut drained = Vec::new();
    loop {
        let chunk = t.indexer.queue().drain_up_to(64);
        if chunk.is_empty() {
            break;
        }
        drained.extend(chunk.into_iter().map(|e| e.log_id));
    }

    ids.sort_unstable();
    assert_eq!(drained, ids);
    Ok(())
}

#[tokio::test]
async fn test_recovery_indexes_rows_left_in_the_log() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    store.add_value(20, 2, 200, "new");
    let t = TestIndexerBuilder::new(store).build()?;
    t.log.append(entry(11, (10, 2, 100), ChangeOp::Add));
    t.log.append(entry(12, (20, 2, 200), ChangeOp::Add));

    assert_eq!(t.indexer.recover().await?, 2);
    let report = t.indexer.run_cycle().await?;

    assert_eq!(report.drained, 2);
    assert_eq!(report.deleted, 2);
    assert!(t.log.is_empty());
    Ok(())
}

// ============================================================================
// Scheduler-driven operation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scheduled_cycles_drain_the_log() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    let t = TestIndexerBuilder::new(store)
        .interval(Duration::from_millis(500))
        .build()?;
    t.indexer.start();

    t.append(entry(1, (10, 2, 100), ChangeOp::Add));
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(t.log.is_empty());
    assert!(t.indexer.scheduler().cycles() >= 1);

    t.indexer.shutdown();
    t.indexer.wait_to_finish().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_held_entries_do_not_trigger_early_cycles() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(30, 9, 100, "stuck");
    store.add_value(31, 9, 200, "stuck");
    store.add_value(10, 2, 100, "ok");
    let t = TestIndexerBuilder::new(store)
        .interval(Duration::from_secs(60))
        .batch_size(2)
        .build()?;
    t.indexer.start();

    t.append_all([
        entry(1, (30, 9, 100), ChangeOp::Add),
        entry(2, (31, 9, 200), ChangeOp::Add),
    ]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(t.indexer.scheduler().resets(), 1);
    assert_eq!(t.indexer.pending_retries(), vec![1, 2]);

    // The held entries no longer fill the batch.
    t.append(entry(3, (10, 2, 100), ChangeOp::Add));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(t.indexer.scheduler().resets(), 1);
    assert_eq!(t.log.log_ids(), vec![1, 2, 3]);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(t.log.log_ids(), vec![1, 2]);

    t.indexer.shutdown();
    t.indexer.wait_to_finish().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_triggers_cycle_early() -> anyhow::Result<()> {
    let store = catalog();
    store.add_value(10, 2, 100, "ok");
    store.add_value(20, 2, 200, "new");
    let t = TestIndexerBuilder::new(store)
        .interval(Duration::from_secs(60))
        .batch_size(2)
        .build()?;
    t.indexer.start();

    t.append_all([
        entry(1, (10, 2, 100), ChangeOp::Add),
        entry(2, (20, 2, 200), ChangeOp::Add),
    ]);
    // Far below the earliest jittered first fire of 15s.
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(t.indexer.scheduler().resets() >= 1);
    assert!(t.log.is_empty());

    t.indexer.shutdown();
    t.indexer.wait_to_finish().await?;
    Ok(())
}
