//! Dual-backend store integration tests.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleetmon_core::agent::{Agent, AgentStatus};
use fleetmon_core::config::CentralConfig;
use fleetmon_core::logs::{LogDimension, LogQuery, LogRecord};
use fleetmon_core::ports::Backend;
use fleetmon_core::snapshot::{AgentSnapshot, MetricPoint};
use fleetmon_core::Error;
use fleetmon_store::{DualStore, MirrorStore, PrimaryStore, ReadPreference};
use std::time::Duration;
use tempfile::TempDir;

async fn open_store() -> (TempDir, DualStore) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = DualStore::open(dir.path()).await.expect("Failed to open store");
    (dir, store)
}

fn agent(name: &str) -> Agent {
    Agent::new(name, "http://10.0.0.5:9000", None)
}

fn log(agent_id: &str, ts: DateTime<Utc>, message: &str) -> LogRecord {
    LogRecord {
        id: String::new(),
        agent_id: agent_id.into(),
        agent_name: "node".into(),
        timestamp: ts,
        kind: "vm_start".into(),
        target_vm: "vm-100".into(),
        status: "ok".into(),
        message: message.into(),
    }
}

fn point(ts: DateTime<Utc>, cpu: f64) -> MetricPoint {
    MetricPoint {
        timestamp: ts,
        cpu_pct: cpu,
        ram_pct: 40.0,
        ram_used_gb: 6.4,
        disk_pct: 55.0,
        vm_running: 2,
        vm_total: 3,
    }
}

#[tokio::test]
async fn test_agent_crud() {
    let (_dir, store) = open_store().await;

    let a = agent("node-1");
    store.save_agent(&a).await.expect("save");

    let found = store.get_agent(&a.id).await.expect("get").expect("present");
    assert_eq!(found.name, "node-1");
    assert_eq!(found.status, AgentStatus::Pending);

    let all = store.list_agents().await.expect("list");
    assert_eq!(all.len(), 1);

    store.delete_agent(&a.id).await.expect("delete");
    assert!(store.get_agent(&a.id).await.expect("get").is_none());
}

#[tokio::test]
async fn test_delete_missing_agent_is_not_found() {
    let (_dir, store) = open_store().await;
    match store.delete_agent("nope").await {
        Err(Error::AgentNotFound(id)) => assert_eq!(id, "nope"),
        other => panic!("expected AgentNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_agent_cascades() {
    let (_dir, store) = open_store().await;

    let a = agent("node-1");
    store.save_agent(&a).await.expect("save agent");
    store
        .save_snapshot(&AgentSnapshot::new(&a.id))
        .await
        .expect("save snapshot");
    store
        .append_metric(&a.id, &point(Utc::now(), 10.0), 720)
        .await
        .expect("append metric");
    store
        .save_logs(&[log(&a.id, Utc::now(), "vm started")])
        .await
        .expect("save logs");

    store.delete_agent(&a.id).await.expect("delete");

    assert!(store.get_snapshot(&a.id).await.expect("get").is_none());
    assert!(store.get_metrics(&a.id, 720).await.expect("metrics").is_empty());
    let logs = store.query_logs(&LogQuery::default()).await.expect("query");
    assert!(logs.is_empty());

    // The mirror cascaded too.
    let mirror = store.mirror().expect("mirror open");
    assert!(mirror.get_snapshot(&a.id).await.expect("get").is_none());
    assert!(mirror.get_metrics(&a.id, 720).await.expect("metrics").is_empty());
}

#[tokio::test]
async fn test_snapshot_replace_semantics() {
    let (_dir, store) = open_store().await;

    let mut first = AgentSnapshot::new("a1");
    first.error = Some("unreachable".into());
    store.save_snapshot(&first).await.expect("save");

    let second = AgentSnapshot::new("a1");
    store.save_snapshot(&second).await.expect("save");

    let current = store.get_snapshot("a1").await.expect("get").expect("present");
    assert!(current.error.is_none());
    assert_eq!(store.all_snapshots().await.expect("all").len(), 1);
}

#[tokio::test]
async fn test_metric_window_bound_in_both_backends() {
    let (_dir, store) = open_store().await;
    let base = Utc::now();

    for i in 0..8 {
        let p = point(base + ChronoDuration::seconds(i), i as f64);
        store.append_metric("a1", &p, 5).await.expect("append");
    }

    let history = store.get_metrics("a1", 5).await.expect("get");
    assert_eq!(history.len(), 5);
    // The retained points are exactly the newest, oldest-first.
    let cpus: Vec<f64> = history.iter().map(|p| p.cpu_pct).collect();
    assert_eq!(cpus, vec![3.0, 4.0, 5.0, 6.0, 7.0]);

    let mirrored = store
        .mirror()
        .expect("mirror open")
        .get_metrics("a1", 5)
        .await
        .expect("mirror get");
    let mirror_cpus: Vec<f64> = mirrored.iter().map(|p| p.cpu_pct).collect();
    assert_eq!(mirror_cpus, cpus);
}

#[tokio::test]
async fn test_log_dedup_idempotence() {
    let (_dir, store) = open_store().await;
    let ts = Utc::now();

    let records = vec![log("a1", ts, "vm started")];
    assert_eq!(store.save_logs(&records).await.expect("first"), 1);
    assert_eq!(store.save_logs(&records).await.expect("repeat"), 0);

    let logs = store.query_logs(&LogQuery::default()).await.expect("query");
    assert_eq!(logs.len(), 1);

    // Duplicates within one batch count once.
    let twice = vec![log("a1", ts, "same event"), log("a1", ts, "same event")];
    assert_eq!(store.save_logs(&twice).await.expect("batch"), 1);
}

#[tokio::test]
async fn test_query_logs_newest_first() {
    let (_dir, store) = open_store().await;
    let base = Utc::now();

    // Inserted out of order on purpose.
    for offset in [3i64, 1, 4, 0, 2] {
        let rec = log("a1", base + ChronoDuration::seconds(offset), &format!("event {offset}"));
        store.save_logs(&[rec]).await.expect("save");
    }

    let logs = store.query_logs(&LogQuery::default()).await.expect("query");
    assert_eq!(logs.len(), 5);
    for pair in logs.windows(2) {
        assert!(pair[0].timestamp > pair[1].timestamp);
    }
}

#[tokio::test]
async fn test_query_logs_filters_and_limit() {
    let (_dir, store) = open_store().await;
    let base = Utc::now();

    let mut records = Vec::new();
    for i in 0..10 {
        let mut rec = log("a1", base + ChronoDuration::seconds(i), &format!("event {i}"));
        if i % 2 == 0 {
            rec.agent_id = "a2".into();
            rec.kind = "vm_stop".into();
        }
        records.push(rec);
    }
    assert_eq!(store.save_logs(&records).await.expect("save"), 10);

    let by_agent = store
        .query_logs(&LogQuery { agent_id: Some("a2".into()), ..Default::default() })
        .await
        .expect("query");
    assert_eq!(by_agent.len(), 5);
    assert!(by_agent.iter().all(|r| r.agent_id == "a2"));

    let by_kind = store
        .query_logs(&LogQuery { kind: Some("vm_start".into()), ..Default::default() })
        .await
        .expect("query");
    assert_eq!(by_kind.len(), 5);

    let bounded = store
        .query_logs(&LogQuery {
            from: Some(base + ChronoDuration::seconds(3)),
            to: Some(base + ChronoDuration::seconds(6)),
            ..Default::default()
        })
        .await
        .expect("query");
    assert_eq!(bounded.len(), 4);

    let limited = store
        .query_logs(&LogQuery { limit: 3, ..Default::default() })
        .await
        .expect("query");
    assert_eq!(limited.len(), 3);
}

#[tokio::test]
async fn test_retention_purge_boundary() {
    let (_dir, store) = open_store().await;
    let max_age = Duration::from_secs(3600);
    let now = Utc::now();

    let older = log("a1", now - ChronoDuration::seconds(3601), "too old");
    let newer = log("a1", now - ChronoDuration::seconds(3599), "still fresh");
    assert_eq!(store.save_logs(&[older, newer]).await.expect("save"), 2);

    let deleted = store.purge_logs(max_age).await.expect("purge");
    assert_eq!(deleted, 1);

    let logs = store.query_logs(&LogQuery::default()).await.expect("query");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "still fresh");

    // The mirror purged as well.
    let mirror_logs = store
        .mirror()
        .expect("mirror open")
        .query_logs(&LogQuery::default())
        .await
        .expect("mirror query");
    assert_eq!(mirror_logs.len(), 1);
}

#[tokio::test]
async fn test_log_labels_distinct() {
    let (_dir, store) = open_store().await;
    let base = Utc::now();

    let mut a = log("a1", base, "x");
    a.kind = "vm_start".into();
    let mut b = log("a1", base + ChronoDuration::seconds(1), "y");
    b.kind = "vm_stop".into();
    let mut c = log("a2", base + ChronoDuration::seconds(2), "z");
    c.kind = "vm_start".into();
    store.save_logs(&[a, b, c]).await.expect("save");

    let kinds = store.log_labels(LogDimension::Kind).await.expect("labels");
    assert_eq!(kinds, vec!["vm_start".to_string(), "vm_stop".to_string()]);

    let ids = store.log_labels(LogDimension::AgentId).await.expect("labels");
    assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);

    // Mirror agrees via DISTINCT.
    let mirror_kinds = store
        .mirror()
        .expect("mirror open")
        .log_labels(LogDimension::Kind)
        .await
        .expect("mirror labels");
    assert_eq!(mirror_kinds, kinds);
}

#[tokio::test]
async fn test_mirror_preferred_read_falls_back_to_primary() {
    let dir = TempDir::new().expect("temp dir");
    let primary = PrimaryStore::open(dir.path().join("fleetmon.redb")).expect("primary");
    let mirror = MirrorStore::open_in_memory().await.expect("mirror");

    // Simulate a prior mirror-write failure: the record exists only in the
    // primary.
    let a = agent("node-1");
    primary.save_agent(&a).await.expect("primary save");

    let store =
        DualStore::from_parts(primary, Some(mirror)).with_read_preference(ReadPreference::Mirror);

    let found = store.get_agent(&a.id).await.expect("get").expect("fallback hit");
    assert_eq!(found.id, a.id);
}

#[tokio::test]
async fn test_mirror_preferred_read_uses_mirror_when_present() {
    let (_dir, store) = open_store().await;
    let store = store.with_read_preference(ReadPreference::Mirror);

    let a = agent("node-1");
    store.save_agent(&a).await.expect("save");

    let found = store.get_agent(&a.id).await.expect("get").expect("present");
    assert_eq!(found.name, "node-1");
}

#[tokio::test]
async fn test_config_defaults_then_round_trip() {
    let (_dir, store) = open_store().await;

    let config = store.get_config().await.expect("defaults");
    assert_eq!(config.poll_interval_secs, 15);
    assert_eq!(config.log_retention_days, 30);

    let updated = CentralConfig { poll_interval_secs: 60, ..config };
    store.save_config(&updated).await.expect("save");

    let reread = store.get_config().await.expect("get");
    assert_eq!(reread.poll_interval_secs, 60);
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = TempDir::new().expect("temp dir");
    let a = agent("node-1");
    {
        let store = DualStore::open(dir.path()).await.expect("open");
        store.save_agent(&a).await.expect("save");
        store
            .save_logs(&[log(&a.id, Utc::now(), "persisted")])
            .await
            .expect("save logs");
    }

    let store = DualStore::open(dir.path()).await.expect("reopen");
    assert!(store.get_agent(&a.id).await.expect("get").is_some());
    assert_eq!(
        store.query_logs(&LogQuery::default()).await.expect("query").len(),
        1
    );
}
