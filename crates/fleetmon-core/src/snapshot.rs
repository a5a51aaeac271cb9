//! Snapshot and metric types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The complete latest known state fetched from one agent in one cycle.
///
/// Exactly one live snapshot exists per agent; each cycle replaces it
/// wholesale. A failed required status fetch still produces a snapshot with
/// only `error` populated. A failed optional sub-fetch leaves its field
/// absent and overwrites `error` (single slot, last write wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub fetched_at: DateTime<Utc>,
    pub status: Option<StatusInfo>,
    pub host: Option<HostInfo>,
    #[serde(default)]
    pub vms: Vec<VmInfo>,
    pub health: Option<HealthInfo>,
    pub error: Option<String>,
}

impl AgentSnapshot {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            fetched_at: Utc::now(),
            status: None,
            host: None,
            vms: Vec::new(),
            health: None,
            error: None,
        }
    }
}

/// Required status payload reported by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uptime_secs: u64,
}

/// Host-level resource usage reported by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub cpu_pct: f64,
    #[serde(default)]
    pub ram_used_gb: f64,
    #[serde(default)]
    pub ram_total_gb: f64,
    #[serde(default)]
    pub ram_pct: f64,
    #[serde(default)]
    pub uptime_secs: u64,
    #[serde(default)]
    pub disks: Vec<DiskInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    #[serde(default)]
    pub mount: String,
    #[serde(default)]
    pub used_gb: f64,
    #[serde(default)]
    pub total_gb: f64,
}

/// One virtual machine in an agent's inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: VmState,
    #[serde(default)]
    pub cpu_count: u32,
    #[serde(default)]
    pub ram_mb: u64,
}

impl VmInfo {
    pub fn is_running(&self) -> bool {
        self.state == VmState::Running
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Running,
    Stopped,
    Paused,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthInfo {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// One point of derived host metrics, appended per successful host fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub cpu_pct: f64,
    pub ram_pct: f64,
    pub ram_used_gb: f64,
    pub disk_pct: f64,
    pub vm_running: u32,
    pub vm_total: u32,
}

impl MetricPoint {
    /// Derive a metric point from a host-info fetch.
    ///
    /// Disk percentage aggregates across all disks:
    /// `sum(used) / sum(total) * 100`, or 0 when total is 0.
    pub fn from_host(
        host: &HostInfo,
        timestamp: DateTime<Utc>,
        vm_running: u32,
        vm_total: u32,
    ) -> Self {
        let used: f64 = host.disks.iter().map(|d| d.used_gb).sum();
        let total: f64 = host.disks.iter().map(|d| d.total_gb).sum();
        let disk_pct = if total > 0.0 { used / total * 100.0 } else { 0.0 };
        Self {
            timestamp,
            cpu_pct: host.cpu_pct,
            ram_pct: host.ram_pct,
            ram_used_gb: host.ram_used_gb,
            disk_pct,
            vm_running,
            vm_total,
        }
    }
}
