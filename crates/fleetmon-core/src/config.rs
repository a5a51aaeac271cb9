//! Central configuration record.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Singleton configuration record. Exactly one instance exists in the store;
/// reads synthesize these defaults when no record has been written yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralConfig {
    pub poll_interval_secs: u64,
    pub listen_port: u16,
    pub theme: String,
    pub language: String,
    pub log_retention_days: u32,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            listen_port: 8080,
            theme: "dark".to_string(),
            language: "en".to_string(),
            log_retention_days: 30,
        }
    }
}

impl CentralConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.log_retention_days) * 24 * 3600)
    }
}
