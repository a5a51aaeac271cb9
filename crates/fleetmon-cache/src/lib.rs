//! In-memory snapshot cache.
//!
//! Holds, per agent, the most recent [`AgentSnapshot`] and a capped FIFO
//! window of [`MetricPoint`]s. One mutex guards the composite structure so a
//! reader never observes a snapshot update interleaved with a metric append
//! for the same agent. No durability: the cache is warmed from the
//! persistent store on start-up and rebuilt by the poller afterwards.

use fleetmon_core::ports::Backend;
use fleetmon_core::snapshot::{AgentSnapshot, MetricPoint};
use fleetmon_core::{Result, MAX_HISTORY_POINTS};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Default)]
struct CacheInner {
    snapshots: HashMap<String, AgentSnapshot>,
    history: HashMap<String, VecDeque<MetricPoint>>,
}

pub struct SnapshotCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_POINTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { inner: Mutex::new(CacheInner::default()), capacity }
    }

    /// The cached snapshot for one agent, if any. Never touches the network
    /// or the disk.
    pub fn get(&self, agent_id: &str) -> Option<AgentSnapshot> {
        self.inner.lock().snapshots.get(agent_id).cloned()
    }

    /// A defensive copy of every cached snapshot.
    pub fn get_all(&self) -> HashMap<String, AgentSnapshot> {
        self.inner.lock().snapshots.clone()
    }

    /// Replace the agent's cached snapshot wholesale.
    pub fn record_snapshot(&self, snapshot: AgentSnapshot) {
        let mut inner = self.inner.lock();
        inner.snapshots.insert(snapshot.agent_id.clone(), snapshot);
    }

    /// Push a metric point onto the agent's window, evicting from the head
    /// once the window exceeds capacity.
    pub fn append_metric(&self, agent_id: &str, point: MetricPoint) {
        let mut inner = self.inner.lock();
        let window = inner.history.entry(agent_id.to_string()).or_default();
        window.push_back(point);
        while window.len() > self.capacity {
            window.pop_front();
        }
    }

    /// A copy of the agent's metric window, oldest-first.
    pub fn history(&self, agent_id: &str) -> Vec<MetricPoint> {
        self.inner
            .lock()
            .history
            .get(agent_id)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all cached state for an agent (after a registry delete).
    pub fn remove(&self, agent_id: &str) {
        let mut inner = self.inner.lock();
        inner.snapshots.remove(agent_id);
        inner.history.remove(agent_id);
    }

    /// Load the latest persisted snapshot and metric history for every
    /// registered agent. Called once at process start.
    pub async fn warm(&self, store: &dyn Backend) -> Result<()> {
        let agents = store.list_agents().await?;
        let mut warmed = 0usize;
        for agent in &agents {
            if let Some(snapshot) = store.get_snapshot(&agent.id).await? {
                self.record_snapshot(snapshot);
                warmed += 1;
            }
            let points = store.get_metrics(&agent.id, self.capacity).await?;
            if !points.is_empty() {
                let mut inner = self.inner.lock();
                inner.history.insert(agent.id.clone(), points.into());
            }
        }
        debug!(agents = agents.len(), warmed, "Snapshot cache warmed");
        Ok(())
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn point(cpu: f64) -> MetricPoint {
        MetricPoint {
            timestamp: Utc::now(),
            cpu_pct: cpu,
            ram_pct: 0.0,
            ram_used_gb: 0.0,
            disk_pct: 0.0,
            vm_running: 0,
            vm_total: 0,
        }
    }

    #[test]
    fn test_window_bound_fifo() {
        let cache = SnapshotCache::with_capacity(3);
        for i in 0..5 {
            cache.append_metric("a1", point(i as f64));
        }
        let history = cache.history("a1");
        assert_eq!(history.len(), 3);
        // Oldest two dropped from the head; remainder oldest-first.
        let cpus: Vec<f64> = history.iter().map(|p| p.cpu_pct).collect();
        assert_eq!(cpus, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_window_under_capacity() {
        let cache = SnapshotCache::with_capacity(10);
        cache.append_metric("a1", point(1.0));
        cache.append_metric("a1", point(2.0));
        assert_eq!(cache.history("a1").len(), 2);
    }

    #[test]
    fn test_snapshot_replaced_wholesale() {
        let cache = SnapshotCache::new();
        let mut first = AgentSnapshot::new("a1");
        first.error = Some("unreachable".into());
        cache.record_snapshot(first);

        let second = AgentSnapshot::new("a1");
        cache.record_snapshot(second);
        assert!(cache.get("a1").unwrap().error.is_none());
    }

    #[test]
    fn test_get_all_is_a_copy() {
        let cache = SnapshotCache::new();
        cache.record_snapshot(AgentSnapshot::new("a1"));
        let mut copy = cache.get_all();
        copy.remove("a1");
        assert!(cache.get("a1").is_some());
    }

    #[test]
    fn test_remove_clears_both_maps() {
        let cache = SnapshotCache::new();
        cache.record_snapshot(AgentSnapshot::new("a1"));
        cache.append_metric("a1", point(1.0));
        cache.remove("a1");
        assert!(cache.get("a1").is_none());
        assert!(cache.history("a1").is_empty());
    }
}
