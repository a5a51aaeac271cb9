//! HTTP client for talking to agents.
//!
//! Agents live on a private network behind self-issued certificates, so TLS
//! verification toward them is deliberately disabled. Every transport
//! failure, timeout, and non-2xx response collapses into [`Error::Fetch`];
//! the next scheduled cycle is the retry mechanism.

use fleetmon_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Port assumed when an agent's base URL does not name one.
pub const DEFAULT_AGENT_PORT: u16 = 9000;

/// Per-request timeout toward agents.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Most recent log entries requested per cycle.
pub const LOG_PAGE_SIZE: usize = 100;

const STATUS_PATH: &str = "/api/v1/status";
const HOST_PATH: &str = "/api/v1/host";
const VMS_PATH: &str = "/api/v1/vms";
const HEALTH_PATH: &str = "/api/v1/health";
const LOGS_PATH: &str = "/api/v1/logs";

const API_KEY_HEADER: &str = "X-API-Key";

/// A log entry as an agent reports it. The timestamp is kept as a string so
/// an unparseable value can fall back to the collection time instead of
/// failing the whole page.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentLogEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub target_vm: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { http })
    }

    /// Normalize a configured agent base URL: scheme defaults to `http`,
    /// port to [`DEFAULT_AGENT_PORT`] when omitted, trailing slash stripped.
    pub fn normalize_base_url(raw: &str) -> Result<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidUrl("empty base URL".to_string()));
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
        let mut url = Url::parse(&with_scheme)
            .map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
        if url.port().is_none() {
            url.set_port(Some(DEFAULT_AGENT_PORT))
                .map_err(|_| Error::InvalidUrl(raw.to_string()))?;
        }
        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        api_key: Option<&str>,
    ) -> Result<T> {
        let url = format!("{base_url}{path}");
        let mut request = self.http.get(&url);
        if let Some(key) = api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!("{url}: HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))
    }

    pub async fn fetch_status(
        &self,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<fleetmon_core::snapshot::StatusInfo> {
        self.get_json(base_url, STATUS_PATH, api_key).await
    }

    pub async fn fetch_host(
        &self,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<fleetmon_core::snapshot::HostInfo> {
        self.get_json(base_url, HOST_PATH, api_key).await
    }

    pub async fn fetch_vms(
        &self,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<Vec<fleetmon_core::snapshot::VmInfo>> {
        self.get_json(base_url, VMS_PATH, api_key).await
    }

    pub async fn fetch_health(
        &self,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<fleetmon_core::snapshot::HealthInfo> {
        self.get_json(base_url, HEALTH_PATH, api_key).await
    }

    pub async fn fetch_logs(
        &self,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<Vec<AgentLogEntry>> {
        let path = format!("{LOGS_PATH}?limit={LOG_PAGE_SIZE}");
        self.get_json(base_url, &path, api_key).await
    }
}
