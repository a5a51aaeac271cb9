//! Relational mirror backend (SQLite via sqlx).
//!
//! Best-effort replica of the primary store that exists to make filtered and
//! range queries cheap. Metric points are one row per `(agent_id, timestamp)`
//! rather than one array per agent; log dedup uses the same identifier rule
//! as the primary, expressed as `INSERT OR IGNORE` on the id primary key.

use crate::keys;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetmon_core::agent::{Agent, AgentStatus};
use fleetmon_core::config::CentralConfig;
use fleetmon_core::logs::{LogDimension, LogQuery, LogRecord};
use fleetmon_core::ports::Backend;
use fleetmon_core::snapshot::{AgentSnapshot, MetricPoint};
use fleetmon_core::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        base_url TEXT NOT NULL,
        api_key TEXT,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        last_seen TEXT
    )",
    "CREATE TABLE IF NOT EXISTS snapshots (
        agent_id TEXT PRIMARY KEY,
        fetched_at TEXT NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS metrics (
        agent_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        cpu_pct REAL NOT NULL,
        ram_pct REAL NOT NULL,
        ram_used_gb REAL NOT NULL,
        disk_pct REAL NOT NULL,
        vm_running INTEGER NOT NULL,
        vm_total INTEGER NOT NULL,
        PRIMARY KEY (agent_id, timestamp)
    )",
    "CREATE TABLE IF NOT EXISTS config (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        body TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS logs (
        id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        kind TEXT NOT NULL,
        target_vm TEXT NOT NULL,
        status TEXT NOT NULL,
        message TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_logs_agent ON logs (agent_id)",
];

fn db_err(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

/// The query-oriented mirror backend.
#[derive(Clone)]
pub struct MirrorStore {
    pool: SqlitePool,
}

impl MirrorStore {
    /// Open (or create) the database file and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(db_err)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&pool).await.map_err(db_err)?;
        }

        info!(path = %path.display(), "Opened mirror store");
        Ok(Self { pool })
    }

    /// In-memory instance, for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&pool).await.map_err(db_err)?;
        }
        Ok(Self { pool })
    }

    fn row_to_agent(r: &SqliteRow) -> Agent {
        let status: String = r.get("status");
        Agent {
            id: r.get("id"),
            name: r.get("name"),
            base_url: r.get("base_url"),
            api_key: r.get("api_key"),
            status: AgentStatus::from_str(&status),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
            last_seen: r.get("last_seen"),
        }
    }

    fn row_to_metric(r: &SqliteRow) -> MetricPoint {
        MetricPoint {
            timestamp: DateTime::from_timestamp_nanos(r.get::<i64, _>("timestamp")),
            cpu_pct: r.get("cpu_pct"),
            ram_pct: r.get("ram_pct"),
            ram_used_gb: r.get("ram_used_gb"),
            disk_pct: r.get("disk_pct"),
            vm_running: r.get::<i64, _>("vm_running") as u32,
            vm_total: r.get::<i64, _>("vm_total") as u32,
        }
    }

    fn row_to_log(r: &SqliteRow) -> LogRecord {
        LogRecord {
            id: r.get("id"),
            agent_id: r.get("agent_id"),
            agent_name: r.get("agent_name"),
            timestamp: DateTime::from_timestamp_nanos(r.get::<i64, _>("timestamp")),
            kind: r.get("kind"),
            target_vm: r.get("target_vm"),
            status: r.get("status"),
            message: r.get("message"),
        }
    }
}

#[async_trait]
impl Backend for MirrorStore {
    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO agents (id, name, base_url, api_key, status, created_at, updated_at, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.base_url)
        .bind(&agent.api_key)
        .bind(agent.status.as_str())
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .bind(agent.last_seen)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| Self::row_to_agent(&r)))
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(Self::row_to_agent).collect())
    }

    async fn delete_agent(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM snapshots WHERE agent_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM metrics WHERE agent_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM logs WHERE agent_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &AgentSnapshot) -> Result<()> {
        let body = serde_json::to_string(snapshot)?;
        sqlx::query(
            "INSERT OR REPLACE INTO snapshots (agent_id, fetched_at, body) VALUES (?, ?, ?)",
        )
        .bind(&snapshot.agent_id)
        .bind(snapshot.fetched_at)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_snapshot(&self, agent_id: &str) -> Result<Option<AgentSnapshot>> {
        let row = sqlx::query("SELECT body FROM snapshots WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => Ok(Some(serde_json::from_str(&r.get::<String, _>("body"))?)),
            None => Ok(None),
        }
    }

    async fn all_snapshots(&self) -> Result<Vec<AgentSnapshot>> {
        let rows = sqlx::query("SELECT body FROM snapshots")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|r| Ok(serde_json::from_str(&r.get::<String, _>("body"))?))
            .collect()
    }

    async fn append_metric(
        &self,
        agent_id: &str,
        point: &MetricPoint,
        max_points: usize,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO metrics (agent_id, timestamp, cpu_pct, ram_pct, ram_used_gb, disk_pct, vm_running, vm_total)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(agent_id)
        .bind(keys::nanos(point.timestamp) as i64)
        .bind(point.cpu_pct)
        .bind(point.ram_pct)
        .bind(point.ram_used_gb)
        .bind(point.disk_pct)
        .bind(point.vm_running as i64)
        .bind(point.vm_total as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // Trim rows beyond the newest max_points; the primary applies the
        // same bound to its array representation.
        sqlx::query(
            "DELETE FROM metrics WHERE agent_id = ? AND timestamp NOT IN
             (SELECT timestamp FROM metrics WHERE agent_id = ? ORDER BY timestamp DESC LIMIT ?)",
        )
        .bind(agent_id)
        .bind(agent_id)
        .bind(max_points as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_metrics(&self, agent_id: &str, max_points: usize) -> Result<Vec<MetricPoint>> {
        let rows = sqlx::query(
            "SELECT * FROM metrics WHERE agent_id = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(agent_id)
        .bind(max_points as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut points: Vec<MetricPoint> = rows.iter().map(Self::row_to_metric).collect();
        points.reverse();
        Ok(points)
    }

    async fn get_config(&self) -> Result<CentralConfig> {
        let row = sqlx::query("SELECT body FROM config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => Ok(serde_json::from_str(&r.get::<String, _>("body"))?),
            None => Ok(CentralConfig::default()),
        }
    }

    async fn save_config(&self, config: &CentralConfig) -> Result<()> {
        let body = serde_json::to_string(config)?;
        sqlx::query("INSERT OR REPLACE INTO config (id, body) VALUES (1, ?)")
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn save_logs(&self, records: &[LogRecord]) -> Result<usize> {
        let mut inserted = 0usize;
        for record in records {
            let mut record = record.clone();
            keys::ensure_id(&mut record);
            let result = sqlx::query(
                "INSERT OR IGNORE INTO logs (id, agent_id, agent_name, timestamp, kind, target_vm, status, message)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.id)
            .bind(&record.agent_id)
            .bind(&record.agent_name)
            .bind(keys::nanos(record.timestamp) as i64)
            .bind(&record.kind)
            .bind(&record.target_vm)
            .bind(&record.status)
            .bind(&record.message)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, agent_id, agent_name, timestamp, kind, target_vm, status, message FROM logs WHERE 1=1",
        );
        if let Some(agent_id) = &query.agent_id {
            qb.push(" AND agent_id = ").push_bind(agent_id.clone());
        }
        if let Some(kind) = &query.kind {
            qb.push(" AND kind = ").push_bind(kind.clone());
        }
        if let Some(status) = &query.status {
            qb.push(" AND status = ").push_bind(status.clone());
        }
        if let Some(from) = query.from {
            qb.push(" AND timestamp >= ").push_bind(keys::nanos(from) as i64);
        }
        if let Some(to) = query.to {
            qb.push(" AND timestamp <= ").push_bind(keys::nanos(to) as i64);
        }
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(query.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(rows.iter().map(Self::row_to_log).collect())
    }

    async fn purge_logs(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).map_err(|e| Error::Internal(e.to_string()))?;
        let result = sqlx::query("DELETE FROM logs WHERE timestamp < ?")
            .bind(keys::nanos(cutoff) as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn log_labels(&self, dimension: LogDimension) -> Result<Vec<String>> {
        let column = match dimension {
            LogDimension::AgentName => "agent_name",
            LogDimension::AgentId => "agent_id",
            LogDimension::Kind => "kind",
            LogDimension::Status => "status",
            LogDimension::TargetVm => "target_vm",
        };
        let sql = format!(
            "SELECT DISTINCT {column} FROM logs WHERE {column} != '' ORDER BY {column}"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }
}
