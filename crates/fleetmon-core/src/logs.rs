//! Log record types and query parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default page size for log queries.
pub const DEFAULT_LOG_LIMIT: usize = 200;

/// One immutable log record collected from an agent.
///
/// `id` is a content fingerprint when the agent does not supply one, which
/// makes re-ingesting a byte-identical event a no-op. Removed only by the
/// retention purge or a cascading agent delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub target_vm: String,
    pub status: String,
    pub message: String,
}

/// Filters for a log query. All filters are optional; results come back
/// newest-first, capped at `limit`.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub agent_id: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            agent_id: None,
            kind: None,
            status: None,
            from: None,
            to: None,
            limit: DEFAULT_LOG_LIMIT,
        }
    }
}

impl LogQuery {
    /// Whether a record passes every configured filter.
    pub fn matches(&self, record: &LogRecord) -> bool {
        if let Some(agent_id) = &self.agent_id
            && record.agent_id != *agent_id
        {
            return false;
        }
        if let Some(kind) = &self.kind
            && record.kind != *kind
        {
            return false;
        }
        if let Some(status) = &self.status
            && record.status != *status
        {
            return false;
        }
        if let Some(from) = self.from
            && record.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.to
            && record.timestamp > to
        {
            return false;
        }
        true
    }
}

/// Dimensions over which distinct log label values can be listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDimension {
    AgentName,
    AgentId,
    Kind,
    Status,
    TargetVm,
}

impl LogDimension {
    pub fn value_of(&self, record: &LogRecord) -> String {
        match self {
            LogDimension::AgentName => record.agent_name.clone(),
            LogDimension::AgentId => record.agent_id.clone(),
            LogDimension::Kind => record.kind.clone(),
            LogDimension::Status => record.status.clone(),
            LogDimension::TargetVm => record.target_vm.clone(),
        }
    }
}
