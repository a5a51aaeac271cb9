//! Port traits (hexagonal architecture).
//!
//! `Backend` is the single capability interface both storage backends
//! implement, so either can be swapped independently and the dual-write
//! decorator can treat them uniformly.

use crate::agent::Agent;
use crate::config::CentralConfig;
use crate::logs::{LogDimension, LogQuery, LogRecord};
use crate::snapshot::{AgentSnapshot, MetricPoint};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Durable storage for agents, configuration, snapshots, metric history,
/// and logs.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Upsert an agent record.
    async fn save_agent(&self, agent: &Agent) -> Result<()>;

    /// Get an agent by ID.
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;

    /// List all registered agents.
    async fn list_agents(&self) -> Result<Vec<Agent>>;

    /// Delete an agent, cascading to its snapshot, metric history, and logs.
    async fn delete_agent(&self, id: &str) -> Result<()>;

    /// Replace the agent's snapshot wholesale (never a merge).
    async fn save_snapshot(&self, snapshot: &AgentSnapshot) -> Result<()>;

    /// Get the latest snapshot for an agent.
    async fn get_snapshot(&self, agent_id: &str) -> Result<Option<AgentSnapshot>>;

    /// Get the latest snapshot of every agent.
    async fn all_snapshots(&self) -> Result<Vec<AgentSnapshot>>;

    /// Append a metric point, truncating the history to the newest
    /// `max_points` entries.
    async fn append_metric(&self, agent_id: &str, point: &MetricPoint, max_points: usize) -> Result<()>;

    /// Get metric history for an agent, oldest-first, at most `max_points`.
    async fn get_metrics(&self, agent_id: &str, max_points: usize) -> Result<Vec<MetricPoint>>;

    /// Get the singleton config, synthesizing defaults when absent.
    async fn get_config(&self) -> Result<CentralConfig>;

    /// Persist the singleton config.
    async fn save_config(&self, config: &CentralConfig) -> Result<()>;

    /// Ingest log records with idempotent insert-if-absent semantics.
    /// Returns the count of newly inserted records only.
    async fn save_logs(&self, records: &[LogRecord]) -> Result<usize>;

    /// Query logs, newest-first, capped at the query limit.
    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>>;

    /// Delete every log older than `max_age`. Returns the deleted count.
    async fn purge_logs(&self, max_age: Duration) -> Result<u64>;

    /// Distinct observed values for one log dimension.
    async fn log_labels(&self, dimension: LogDimension) -> Result<Vec<String>>;
}
