//! Primary embedded key-value backend (redb).
//!
//! Each record family lives in its own `&str`-keyed table holding
//! JSON-serialized values, so the schema can evolve without migrations.
//! Metric history is one JSON array per agent, truncated on append. Log
//! records are keyed by [`crate::keys::encode_log_key`], which makes
//! lexicographic range scans time-ordered.

use crate::keys;
use async_trait::async_trait;
use chrono::Utc;
use fleetmon_core::agent::Agent;
use fleetmon_core::config::CentralConfig;
use fleetmon_core::logs::{LogDimension, LogQuery, LogRecord};
use fleetmon_core::ports::Backend;
use fleetmon_core::snapshot::{AgentSnapshot, MetricPoint};
use fleetmon_core::{Error, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Agent records keyed by agent id.
const AGENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("agents");

/// Singleton config under [`CONFIG_KEY`].
const CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("config");

/// Latest snapshot keyed by agent id.
const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Bounded metric history (one JSON array) keyed by agent id.
const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");

/// Log records keyed by `{nanos:019}{id}`.
const LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("logs");

const CONFIG_KEY: &str = "central";

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// The authoritative storage backend.
pub struct PrimaryStore {
    db: Arc<Database>,
}

impl PrimaryStore {
    /// Open (or create) the database file and ensure all tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(store_err)?;

        // Pre-create tables so reads never hit TableDoesNotExist.
        let txn = db.begin_write().map_err(store_err)?;
        {
            txn.open_table(AGENTS).map_err(store_err)?;
            txn.open_table(CONFIG).map_err(store_err)?;
            txn.open_table(SNAPSHOTS).map_err(store_err)?;
            txn.open_table(METRICS).map_err(store_err)?;
            txn.open_table(LOGS).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;

        info!(path = %path.display(), "Opened primary store");
        Ok(Self { db: Arc::new(db) })
    }

    fn put(&self, table: TableDefinition<&str, &[u8]>, key: &str, value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut t = txn.open_table(table).map_err(store_err)?;
            t.insert(key, value).map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<T>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let t = txn.open_table(table).map_err(store_err)?;
        match t.get(key).map_err(store_err)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_values<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> Result<Vec<T>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let t = txn.open_table(table).map_err(store_err)?;
        let mut out = Vec::new();
        for item in t.iter().map_err(store_err)? {
            let (_, value) = item.map_err(store_err)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }
}

#[async_trait]
impl Backend for PrimaryStore {
    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        self.put(AGENTS, &agent.id, &encode(agent)?)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.get_value(AGENTS, id)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.list_values(AGENTS)
    }

    async fn delete_agent(&self, id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut agents = txn.open_table(AGENTS).map_err(store_err)?;
            if agents.remove(id).map_err(store_err)?.is_none() {
                return Err(Error::AgentNotFound(id.to_string()));
            }
            let mut snapshots = txn.open_table(SNAPSHOTS).map_err(store_err)?;
            snapshots.remove(id).map_err(store_err)?;
            let mut metrics = txn.open_table(METRICS).map_err(store_err)?;
            metrics.remove(id).map_err(store_err)?;

            let mut logs = txn.open_table(LOGS).map_err(store_err)?;
            let mut doomed = Vec::new();
            for item in logs.iter().map_err(store_err)? {
                let (key, value) = item.map_err(store_err)?;
                let record: LogRecord = decode(value.value())?;
                if record.agent_id == id {
                    doomed.push(key.value().to_string());
                }
            }
            for key in doomed {
                logs.remove(key.as_str()).map_err(store_err)?;
            }
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &AgentSnapshot) -> Result<()> {
        self.put(SNAPSHOTS, &snapshot.agent_id, &encode(snapshot)?)
    }

    async fn get_snapshot(&self, agent_id: &str) -> Result<Option<AgentSnapshot>> {
        self.get_value(SNAPSHOTS, agent_id)
    }

    async fn all_snapshots(&self) -> Result<Vec<AgentSnapshot>> {
        self.list_values(SNAPSHOTS)
    }

    async fn append_metric(
        &self,
        agent_id: &str,
        point: &MetricPoint,
        max_points: usize,
    ) -> Result<()> {
        let txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut t = txn.open_table(METRICS).map_err(store_err)?;
            let mut history: Vec<MetricPoint> = match t.get(agent_id).map_err(store_err)? {
                Some(guard) => decode(guard.value())?,
                None => Vec::new(),
            };
            history.push(point.clone());
            if history.len() > max_points {
                let excess = history.len() - max_points;
                history.drain(..excess);
            }
            t.insert(agent_id, encode(&history)?.as_slice())
                .map_err(store_err)?;
        }
        txn.commit().map_err(store_err)?;
        Ok(())
    }

    async fn get_metrics(&self, agent_id: &str, max_points: usize) -> Result<Vec<MetricPoint>> {
        let mut history: Vec<MetricPoint> =
            self.get_value(METRICS, agent_id)?.unwrap_or_default();
        if history.len() > max_points {
            let excess = history.len() - max_points;
            history.drain(..excess);
        }
        Ok(history)
    }

    async fn get_config(&self) -> Result<CentralConfig> {
        Ok(self.get_value(CONFIG, CONFIG_KEY)?.unwrap_or_default())
    }

    async fn save_config(&self, config: &CentralConfig) -> Result<()> {
        self.put(CONFIG, CONFIG_KEY, &encode(config)?)
    }

    async fn save_logs(&self, records: &[LogRecord]) -> Result<usize> {
        let txn = self.db.begin_write().map_err(store_err)?;
        let mut inserted = 0;
        {
            let mut t = txn.open_table(LOGS).map_err(store_err)?;
            for record in records {
                let mut record = record.clone();
                keys::ensure_id(&mut record);
                let key = keys::encode_log_key(record.timestamp, &record.id);
                if t.get(key.as_str()).map_err(store_err)?.is_some() {
                    continue;
                }
                t.insert(key.as_str(), encode(&record)?.as_slice())
                    .map_err(store_err)?;
                inserted += 1;
            }
        }
        txn.commit().map_err(store_err)?;
        Ok(inserted)
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let t = txn.open_table(LOGS).map_err(store_err)?;

        // Seek to just above the `to` bound (or the table end) and scan
        // backward, filtering in memory until the limit fills or the scan
        // passes below `from`.
        let mut out = Vec::new();
        let upper = query.to.map(keys::upper_bound_key);
        let iter = match &upper {
            Some(u) => t.range::<&str>(..u.as_str()).map_err(store_err)?.rev(),
            None => t.iter().map_err(store_err)?.rev(),
        };
        for item in iter {
            if out.len() >= query.limit {
                break;
            }
            let (_, value) = item.map_err(store_err)?;
            let record: LogRecord = decode(value.value())?;
            if let Some(from) = query.from
                && record.timestamp < from
            {
                // Keys are time-ordered, so everything below is older.
                break;
            }
            if query.matches(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn purge_logs(&self, max_age: std::time::Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).map_err(|e| Error::Internal(e.to_string()))?;
        let cutoff_key = keys::cutoff_key(cutoff);

        let txn = self.db.begin_write().map_err(store_err)?;
        let mut deleted = 0u64;
        {
            let mut t = txn.open_table(LOGS).map_err(store_err)?;
            let mut doomed = Vec::new();
            for item in t.range::<&str>(..cutoff_key.as_str()).map_err(store_err)? {
                let (key, _) = item.map_err(store_err)?;
                doomed.push(key.value().to_string());
            }
            for key in doomed {
                t.remove(key.as_str()).map_err(store_err)?;
                deleted += 1;
            }
        }
        txn.commit().map_err(store_err)?;
        Ok(deleted)
    }

    async fn log_labels(&self, dimension: LogDimension) -> Result<Vec<String>> {
        let txn = self.db.begin_read().map_err(store_err)?;
        let t = txn.open_table(LOGS).map_err(store_err)?;
        let mut labels = BTreeSet::new();
        for item in t.iter().map_err(store_err)? {
            let (_, value) = item.map_err(store_err)?;
            let record: LogRecord = decode(value.value())?;
            let label = dimension.value_of(&record);
            if !label.is_empty() {
                labels.insert(label);
            }
        }
        Ok(labels.into_iter().collect())
    }
}
