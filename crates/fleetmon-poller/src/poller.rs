//! Per-cycle collection orchestration.
//!
//! One cycle loads the agent registry, runs an independent fetch pipeline
//! per agent concurrently, joins, and then purges expired logs. A failed
//! required status fetch short-circuits that agent's pipeline; optional
//! sub-fetches degrade independently. No failure is fatal to the cycle.

use crate::client::{AgentClient, AgentLogEntry};
use chrono::{DateTime, Utc};
use fleetmon_cache::SnapshotCache;
use fleetmon_core::agent::{Agent, AgentStatus};
use fleetmon_core::config::CentralConfig;
use fleetmon_core::logs::LogRecord;
use fleetmon_core::ports::Backend;
use fleetmon_core::snapshot::{AgentSnapshot, MetricPoint};
use fleetmon_core::{Error, Result, MAX_HISTORY_POINTS};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Poller {
    store: Arc<dyn Backend>,
    cache: Arc<SnapshotCache>,
    client: AgentClient,
}

impl Poller {
    pub fn new(store: Arc<dyn Backend>, cache: Arc<SnapshotCache>) -> Result<Self> {
        Ok(Self { store, cache, client: AgentClient::new()? })
    }

    /// Construct with a preconfigured client (shorter timeouts in tests).
    pub fn with_client(
        store: Arc<dyn Backend>,
        cache: Arc<SnapshotCache>,
        client: AgentClient,
    ) -> Self {
        Self { store, cache, client }
    }

    /// Run one full collection cycle: fan out to every registered agent,
    /// wait for all of them, then purge expired logs.
    pub async fn run_cycle(&self) {
        let started = std::time::Instant::now();
        let agents = match self.store.list_agents().await {
            Ok(agents) => agents,
            Err(e) => {
                warn!(error = %e, "Agent registry unavailable, skipping cycle");
                Vec::new()
            }
        };

        if agents.is_empty() {
            debug!("No agents registered, nothing to poll");
        } else {
            let count = agents.len();
            let mut tasks = Vec::with_capacity(count);
            for agent in agents {
                let poller = self.clone();
                tasks.push(tokio::spawn(async move { poller.poll_agent(agent).await }));
            }
            for joined in futures::future::join_all(tasks).await {
                if let Err(e) = joined {
                    error!(error = %e, "Poll task panicked");
                }
            }
            info!(
                agents = count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Collection cycle complete"
            );
        }

        // Retention runs every cycle, independent of any agent's outcome.
        let retention = match self.store.get_config().await {
            Ok(config) => config.log_retention(),
            Err(e) => {
                warn!(error = %e, "Config unreadable, using default retention");
                CentralConfig::default().log_retention()
            }
        };
        match self.store.purge_logs(retention).await {
            Ok(0) => {}
            Ok(deleted) => debug!(deleted, "Purged expired logs"),
            Err(e) => warn!(error = %e, "Log retention purge failed"),
        }
    }

    /// Refresh a single agent outside the scheduled cycle.
    pub async fn poll_one(&self, agent_id: &str) -> Result<()> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        self.poll_agent(agent).await;
        Ok(())
    }

    /// The per-agent fetch pipeline. Writes only this agent's cache slot and
    /// store records, so concurrent pipelines never contend on data.
    async fn poll_agent(&self, mut agent: Agent) {
        let agent_id = agent.id.clone();
        let mut snapshot = AgentSnapshot::new(&agent_id);

        let base = match AgentClient::normalize_base_url(&agent.base_url) {
            Ok(base) => base,
            Err(e) => {
                snapshot.error = Some(e.to_string());
                self.set_agent_status(&mut agent, AgentStatus::Offline).await;
                self.store_snapshot(snapshot).await;
                return;
            }
        };
        let api_key = agent.api_key.clone();
        let api_key = api_key.as_deref();

        // Required fetch: failure ends this agent's cycle.
        match self.client.fetch_status(&base, api_key).await {
            Ok(status) => {
                snapshot.status = Some(status);
                self.set_agent_status(&mut agent, AgentStatus::Online).await;
            }
            Err(e) => {
                debug!(agent = %agent.name, error = %e, "Status fetch failed, marking offline");
                snapshot.error = Some(e.to_string());
                self.set_agent_status(&mut agent, AgentStatus::Offline).await;
                self.store_snapshot(snapshot).await;
                return;
            }
        }

        // Optional fetches: each failure is non-fatal to the others. One
        // error slot; the last failure's message wins.
        match self.client.fetch_host(&base, api_key).await {
            Ok(host) => snapshot.host = Some(host),
            Err(e) => {
                warn!(agent = %agent.name, error = %e, "Host info fetch failed");
                snapshot.error = Some(e.to_string());
            }
        }
        match self.client.fetch_vms(&base, api_key).await {
            Ok(vms) => snapshot.vms = vms,
            Err(e) => {
                warn!(agent = %agent.name, error = %e, "VM inventory fetch failed");
                snapshot.error = Some(e.to_string());
            }
        }
        match self.client.fetch_health(&base, api_key).await {
            Ok(health) => snapshot.health = Some(health),
            Err(e) => {
                warn!(agent = %agent.name, error = %e, "Health fetch failed");
                snapshot.error = Some(e.to_string());
            }
        }

        if let Some(host) = &snapshot.host {
            let running = snapshot.vms.iter().filter(|vm| vm.is_running()).count() as u32;
            let point =
                MetricPoint::from_host(host, snapshot.fetched_at, running, snapshot.vms.len() as u32);
            self.cache.append_metric(&agent_id, point.clone());
            if let Err(e) = self
                .store
                .append_metric(&agent_id, &point, MAX_HISTORY_POINTS)
                .await
            {
                warn!(agent = %agent.name, error = %e, "Metric append failed");
            }
        }

        match self.client.fetch_logs(&base, api_key).await {
            Ok(entries) if !entries.is_empty() => {
                let records = translate_logs(&agent, entries, snapshot.fetched_at);
                match self.store.save_logs(&records).await {
                    Ok(0) => {}
                    Ok(inserted) => debug!(agent = %agent.name, inserted, "Ingested agent logs"),
                    Err(e) => warn!(agent = %agent.name, error = %e, "Log ingestion failed"),
                }
            }
            Ok(_) => {}
            Err(e) => debug!(agent = %agent.name, error = %e, "Log fetch failed"),
        }

        self.store_snapshot(snapshot).await;
    }

    async fn set_agent_status(&self, agent: &mut Agent, status: AgentStatus) {
        let now = Utc::now();
        agent.status = status;
        agent.updated_at = now;
        if status == AgentStatus::Online {
            agent.last_seen = Some(now);
        }
        if let Err(e) = self.store.save_agent(agent).await {
            warn!(agent = %agent.name, error = %e, "Agent status update failed");
        }
    }

    /// Publish the finished snapshot: cache first, so readers see it before
    /// the durable write lands, then the store. The previous snapshot is
    /// replaced wholesale; change this function to preserve last-known-good
    /// fields on partial failure instead.
    async fn store_snapshot(&self, snapshot: AgentSnapshot) {
        self.cache.record_snapshot(snapshot.clone());
        if let Err(e) = self.store.save_snapshot(&snapshot).await {
            warn!(agent_id = %snapshot.agent_id, error = %e, "Durable snapshot write failed");
        }
    }
}

/// Translate a page of agent-local log entries into store records, attaching
/// the central-side agent identity. An unparseable source timestamp is
/// stamped with the collection time rather than dropping the record.
pub fn translate_logs(
    agent: &Agent,
    entries: Vec<AgentLogEntry>,
    collected_at: DateTime<Utc>,
) -> Vec<LogRecord> {
    entries
        .into_iter()
        .map(|entry| {
            let timestamp = DateTime::parse_from_rfc3339(&entry.timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(collected_at);
            LogRecord {
                id: entry.id,
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                timestamp,
                kind: entry.kind,
                target_vm: entry.target_vm,
                status: entry.status,
                message: entry.message,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp: &str) -> AgentLogEntry {
        AgentLogEntry {
            id: String::new(),
            timestamp: timestamp.to_string(),
            kind: "vm_start".into(),
            target_vm: "vm-100".into(),
            status: "ok".into(),
            message: "started".into(),
        }
    }

    #[test]
    fn test_translate_parses_rfc3339() {
        let agent = Agent::new("node-1", "http://10.0.0.5", None);
        let collected = Utc::now();
        let records = translate_logs(&agent, vec![entry("2025-06-01T12:00:00Z")], collected);
        assert_eq!(records[0].timestamp.to_rfc3339(), "2025-06-01T12:00:00+00:00");
        assert_eq!(records[0].agent_id, agent.id);
        assert_eq!(records[0].agent_name, "node-1");
    }

    #[test]
    fn test_translate_bad_timestamp_uses_collection_time() {
        let agent = Agent::new("node-1", "http://10.0.0.5", None);
        let collected = Utc::now();
        let records = translate_logs(&agent, vec![entry("last tuesday")], collected);
        assert_eq!(records[0].timestamp, collected);
    }
}
