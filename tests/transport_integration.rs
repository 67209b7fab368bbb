//! Delivery policy tests: latest value, bounded FIFO, pull and upstream
//! failure, observed end to end through component threads

mod common;

use common::builders::{Collected, Collector, Faulty, LogBuilder};
use common::{test_settings, test_timeout, wait_until, POSE};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use uwv_dataflow::pipeline::{Buffering, OverflowPolicy, MAX_FIFO_CAPACITY};
use uwv_dataflow::runtime::{Catalog, Orchestrator};
use uwv_dataflow::{ComponentState, ConnectionPolicy, DataflowError, PlaybackMode};

/// Replays `count` depth samples (payloads 1..=count) into a gated
/// collector through `policy` and returns what the collector read.
fn deliver(count: u64, policy: ConnectionPolicy) -> Vec<serde_json::Value> {
    let dir = TempDir::new().unwrap();
    let log = LogBuilder::new("depth_reader")
        .channel("depth_samples", POSE)
        .series("depth_samples", 0, 1_000, count)
        .write_to(dir.path());

    let collected = Collected::default();
    let handle = collected.clone();
    let mut catalog = Catalog::new();
    catalog.register("consumers", "uw_particle_localization", move || {
        Collector::gated(POSE, handle.clone())
    });

    let mut orch = Orchestrator::new(test_settings(), catalog);
    orch.launch("consumers").unwrap();
    let replay = orch.open_replay(&[log], PlaybackMode::Step).unwrap();
    let depth = orch.replay(replay).unwrap().task("depth_reader").unwrap();
    let filter = orch.resolve("uw_particle_localization").unwrap();
    orch.connect(depth, "depth_samples", filter, "in", policy)
        .unwrap();
    orch.activate().unwrap();

    for _ in 0..count {
        orch.step_replay(replay).unwrap();
    }
    collected.open();
    assert!(wait_until(test_timeout(), || collected.len() > 0));
    std::thread::sleep(Duration::from_millis(20));
    collected.values()
}

#[test]
fn test_latest_value_keeps_only_the_newest() {
    assert_eq!(deliver(10, ConnectionPolicy::data()), vec![json!(10)]);
}

#[test]
fn test_fifo_drop_oldest_keeps_the_last_three() {
    assert_eq!(
        deliver(5, ConnectionPolicy::buffer(3)),
        vec![json!(3), json!(4), json!(5)]
    );
}

#[test]
fn test_fifo_drop_newest_keeps_the_first_three() {
    let policy = ConnectionPolicy::buffer(3).with_overflow(OverflowPolicy::DropNewest);
    assert_eq!(deliver(10, policy), vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn test_large_fifo_preserves_production_order() {
    let expected: Vec<_> = (1..=10).map(|i| json!(i)).collect();
    assert_eq!(deliver(10, ConnectionPolicy::buffer(100)), expected);
}

#[test]
fn test_pull_reads_latest_once() {
    assert_eq!(deliver(10, ConnectionPolicy::pull()), vec![json!(10)]);
}

#[test]
fn test_block_policy_times_out_on_a_full_buffer() {
    let dir = TempDir::new().unwrap();
    let log = LogBuilder::new("depth_reader")
        .channel("depth_samples", POSE)
        .series("depth_samples", 0, 1_000, 3)
        .write_to(dir.path());

    let mut catalog = Catalog::new();
    catalog.register("consumers", "uw_particle_localization", || {
        Collector::gated(POSE, Collected::default())
    });
    let mut orch = Orchestrator::new(test_settings(), catalog);
    orch.launch("consumers").unwrap();
    let replay = orch.open_replay(&[log], PlaybackMode::Step).unwrap();
    let depth = orch.replay(replay).unwrap().task("depth_reader").unwrap();
    let filter = orch.resolve("uw_particle_localization").unwrap();
    orch.connect(
        depth,
        "depth_samples",
        filter,
        "in",
        ConnectionPolicy::blocking(1, Duration::from_millis(20)),
    )
    .unwrap();
    orch.activate().unwrap();

    orch.step_replay(replay).unwrap();
    let err = orch.step_replay(replay).unwrap_err();
    assert!(matches!(err, DataflowError::BackpressureTimeout { .. }));
}

#[test]
fn test_reader_sees_upstream_failure() {
    let mut settings = test_settings();
    settings.fail_fast = false;

    let collected = Collected::default();
    let handle = collected.clone();
    let mut catalog = Catalog::new();
    catalog
        .register("nav", "depth_reader", || Faulty::new(3))
        .register("nav", "uw_particle_localization", move || {
            Collector::gated(POSE, handle.clone())
        });

    let mut orch = Orchestrator::new(settings, catalog);
    orch.launch("nav").unwrap();
    orch.connect_by_name(
        "depth_reader.out",
        "uw_particle_localization.in",
        ConnectionPolicy::buffer(10),
    )
    .unwrap();
    orch.activate().unwrap();

    let depth = orch.resolve("depth_reader").unwrap();
    let filter = orch.resolve("uw_particle_localization").unwrap();
    assert!(wait_until(test_timeout(), || {
        orch.state(depth).unwrap() == ComponentState::Failed
    }));

    collected.open();
    assert!(wait_until(test_timeout(), || {
        orch.state(filter).unwrap() == ComponentState::Failed
    }));
    let reason = orch.component(filter).unwrap().failure().unwrap();
    assert!(reason.contains("depth_reader"), "{reason}");
}

#[test]
fn test_policy_from_toml() {
    let policy: ConnectionPolicy = toml::from_str(
        r#"
        buffer = { fifo = 5 }
        overflow = "block"
        block_timeout_ms = 250
        "#,
    )
    .unwrap();
    assert_eq!(policy.buffer, Buffering::Fifo(5));
    assert!(policy.is_blocking());
}

#[test]
fn test_oversized_fifo_is_rejected_without_touching_the_graph() {
    let dir = TempDir::new().unwrap();
    let log = LogBuilder::new("depth_reader")
        .channel("depth_samples", POSE)
        .series("depth_samples", 0, 1_000, 1)
        .write_to(dir.path());
    let collected = Collected::default();
    let handle = collected.clone();
    let mut catalog = Catalog::new();
    catalog.register("consumers", "uw_particle_localization", move || {
        Collector::new(POSE, handle.clone())
    });

    let mut orch = Orchestrator::new(test_settings(), catalog);
    orch.launch("consumers").unwrap();
    orch.open_replay(&[log], PlaybackMode::Step).unwrap();

    let policy: ConnectionPolicy = toml::from_str("buffer = { fifo = 100000000000000 }").unwrap();
    let err = orch
        .connect_by_name("depth_reader.depth_samples", "uw_particle_localization.in", policy)
        .unwrap_err();
    assert!(
        matches!(err.root(), DataflowError::InvalidConfiguration { .. }),
        "{err}"
    );
    assert!(orch.graph().is_empty());

    let policy = ConnectionPolicy::buffer(MAX_FIFO_CAPACITY);
    orch.connect_by_name("depth_reader.depth_samples", "uw_particle_localization.in", policy)
        .unwrap();
    assert_eq!(orch.graph().len(), 1);
}
