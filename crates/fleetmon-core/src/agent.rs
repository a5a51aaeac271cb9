//! Agent registry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered remote agent: a monitored host exposing a status/metrics/log
/// HTTP API. Owned by the persistent store; the poller only reads it and
/// flips its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            base_url: base_url.into(),
            api_key,
            status: AgentStatus::Pending,
            created_at: now,
            updated_at: now,
            last_seen: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Online,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> AgentStatus {
        match s {
            "online" => AgentStatus::Online,
            "offline" => AgentStatus::Offline,
            _ => AgentStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [AgentStatus::Pending, AgentStatus::Online, AgentStatus::Offline] {
            assert_eq!(AgentStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_new_agent_is_pending() {
        let agent = Agent::new("node-1", "http://10.0.0.5:9000", None);
        assert_eq!(agent.status, AgentStatus::Pending);
        assert!(agent.last_seen.is_none());
    }
}
