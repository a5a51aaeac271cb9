//! Fleetmon persistent storage.
//!
//! Two coordinated backends sit behind the [`Backend`] port: an embedded
//! key-value store ([`PrimaryStore`], redb) that is the source of truth, and
//! a relational mirror ([`MirrorStore`], SQLite) kept on a best-effort basis
//! for cheap ad-hoc queries. [`DualStore`] is the decorator that coordinates
//! them: every write hits the primary synchronously and the mirror
//! opportunistically; reads dispatch on a runtime switch and fall back to the
//! primary when the mirror misses or fails. The two backends are never
//! updated atomically together; the mirror may lag after a mirror-only
//! failure, and that is an accepted trade-off.

pub mod keys;
mod mirror;
mod primary;

pub use mirror::MirrorStore;
pub use primary::PrimaryStore;

use async_trait::async_trait;
use fleetmon_core::agent::Agent;
use fleetmon_core::config::CentralConfig;
use fleetmon_core::logs::{LogDimension, LogQuery, LogRecord};
use fleetmon_core::ports::Backend;
use fleetmon_core::snapshot::{AgentSnapshot, MetricPoint};
use fleetmon_core::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// File name of the primary embedded database.
pub const PRIMARY_DB_FILE: &str = "fleetmon.redb";

/// File name of the mirror database.
pub const MIRROR_DB_FILE: &str = "fleetmon.db";

/// Environment variable selecting mirror-preferred reads.
pub const READ_MIRROR_ENV: &str = "FLEETMON_READ_MIRROR";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "FLEETMON_DATA_DIR";

/// Which backend serves reads. Writes always go primary-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreference {
    Primary,
    Mirror,
}

/// Resolve the on-disk data directory: explicit override, else environment,
/// else the current working directory, else the running binary's directory.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        return cwd;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Dual-backend store: primary-synchronous, mirror-best-effort.
pub struct DualStore {
    primary: PrimaryStore,
    mirror: Option<MirrorStore>,
    read_pref: ReadPreference,
}

impl DualStore {
    /// Open both backends in `data_dir`. A mirror that fails to open is
    /// disabled with a warning rather than failing the store.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let primary = PrimaryStore::open(data_dir.join(PRIMARY_DB_FILE))?;
        let mirror = match MirrorStore::open(data_dir.join(MIRROR_DB_FILE)).await {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(error = %e, "Mirror store unavailable, continuing primary-only");
                None
            }
        };
        let read_pref = if std::env::var(READ_MIRROR_ENV).is_ok_and(|v| v == "1" || v == "true") {
            ReadPreference::Mirror
        } else {
            ReadPreference::Primary
        };
        Ok(Self { primary, mirror, read_pref })
    }

    /// Assemble a store from already-open backends.
    pub fn from_parts(primary: PrimaryStore, mirror: Option<MirrorStore>) -> Self {
        Self { primary, mirror, read_pref: ReadPreference::Primary }
    }

    pub fn with_read_preference(mut self, pref: ReadPreference) -> Self {
        self.read_pref = pref;
        self
    }

    pub fn primary(&self) -> &PrimaryStore {
        &self.primary
    }

    pub fn mirror(&self) -> Option<&MirrorStore> {
        self.mirror.as_ref()
    }

    /// The mirror, when it both exists and is preferred for reads.
    fn read_mirror(&self) -> Option<&MirrorStore> {
        match self.read_pref {
            ReadPreference::Mirror => self.mirror.as_ref(),
            ReadPreference::Primary => None,
        }
    }
}

/// Log and discard a mirror-side failure; the mirror never blocks or fails
/// an operation for the caller.
fn mirror_lag<T>(result: Result<T>, op: &str) {
    if let Err(e) = result {
        warn!(error = %e, op, "Mirror write failed, backends may diverge");
    }
}

#[async_trait]
impl Backend for DualStore {
    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        self.primary.save_agent(agent).await?;
        if let Some(m) = &self.mirror {
            mirror_lag(m.save_agent(agent).await, "save_agent");
        }
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        if let Some(m) = self.read_mirror() {
            match m.get_agent(id).await {
                Ok(Some(agent)) => return Ok(Some(agent)),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Mirror read failed, falling back to primary"),
            }
        }
        self.primary.get_agent(id).await
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        if let Some(m) = self.read_mirror() {
            match m.list_agents().await {
                Ok(agents) if !agents.is_empty() => return Ok(agents),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Mirror read failed, falling back to primary"),
            }
        }
        self.primary.list_agents().await
    }

    async fn delete_agent(&self, id: &str) -> Result<()> {
        self.primary.delete_agent(id).await?;
        if let Some(m) = &self.mirror {
            mirror_lag(m.delete_agent(id).await, "delete_agent");
        }
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &AgentSnapshot) -> Result<()> {
        self.primary.save_snapshot(snapshot).await?;
        if let Some(m) = &self.mirror {
            mirror_lag(m.save_snapshot(snapshot).await, "save_snapshot");
        }
        Ok(())
    }

    async fn get_snapshot(&self, agent_id: &str) -> Result<Option<AgentSnapshot>> {
        if let Some(m) = self.read_mirror() {
            match m.get_snapshot(agent_id).await {
                Ok(Some(snapshot)) => return Ok(Some(snapshot)),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Mirror read failed, falling back to primary"),
            }
        }
        self.primary.get_snapshot(agent_id).await
    }

    async fn all_snapshots(&self) -> Result<Vec<AgentSnapshot>> {
        if let Some(m) = self.read_mirror() {
            match m.all_snapshots().await {
                Ok(snapshots) if !snapshots.is_empty() => return Ok(snapshots),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Mirror read failed, falling back to primary"),
            }
        }
        self.primary.all_snapshots().await
    }

    async fn append_metric(
        &self,
        agent_id: &str,
        point: &MetricPoint,
        max_points: usize,
    ) -> Result<()> {
        self.primary.append_metric(agent_id, point, max_points).await?;
        if let Some(m) = &self.mirror {
            mirror_lag(m.append_metric(agent_id, point, max_points).await, "append_metric");
        }
        Ok(())
    }

    async fn get_metrics(&self, agent_id: &str, max_points: usize) -> Result<Vec<MetricPoint>> {
        if let Some(m) = self.read_mirror() {
            match m.get_metrics(agent_id, max_points).await {
                Ok(points) if !points.is_empty() => return Ok(points),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Mirror read failed, falling back to primary"),
            }
        }
        self.primary.get_metrics(agent_id, max_points).await
    }

    async fn get_config(&self) -> Result<CentralConfig> {
        // Config defaults are synthesized on a miss, so a mirror that never
        // received the record would silently mask a saved config. The
        // primary stays authoritative here.
        self.primary.get_config().await
    }

    async fn save_config(&self, config: &CentralConfig) -> Result<()> {
        self.primary.save_config(config).await?;
        if let Some(m) = &self.mirror {
            mirror_lag(m.save_config(config).await, "save_config");
        }
        Ok(())
    }

    async fn save_logs(&self, records: &[LogRecord]) -> Result<usize> {
        // Derive missing identifiers once so both backends dedup on the
        // same keys.
        let mut records = records.to_vec();
        for record in &mut records {
            keys::ensure_id(record);
        }
        let inserted = self.primary.save_logs(&records).await?;
        if let Some(m) = &self.mirror {
            mirror_lag(m.save_logs(&records).await.map(|_| ()), "save_logs");
        }
        Ok(inserted)
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>> {
        if let Some(m) = self.read_mirror() {
            match m.query_logs(query).await {
                Ok(records) if !records.is_empty() => return Ok(records),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Mirror read failed, falling back to primary"),
            }
        }
        self.primary.query_logs(query).await
    }

    async fn purge_logs(&self, max_age: Duration) -> Result<u64> {
        let deleted = self.primary.purge_logs(max_age).await?;
        if let Some(m) = &self.mirror {
            mirror_lag(m.purge_logs(max_age).await.map(|_| ()), "purge_logs");
        }
        Ok(deleted)
    }

    async fn log_labels(&self, dimension: LogDimension) -> Result<Vec<String>> {
        if let Some(m) = self.read_mirror() {
            match m.log_labels(dimension).await {
                Ok(labels) if !labels.is_empty() => return Ok(labels),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Mirror read failed, falling back to primary"),
            }
        }
        self.primary.log_labels(dimension).await
    }
}
