//! Readiness snapshots and the HTTP calls that produce them.
//!
//! Each fetch is a single attempt; retrying is the poller's job.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CHECK_PARTICIPANT_REGISTERED: &str = "participant_registered";
pub const CHECK_ML_NODE_REGISTERED: &str = "ml_node_registered";

/// Model state reported by the ML node once weights are loaded and serving.
pub const MODEL_READY_STATE: &str = "INFERENCE";

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub height: u64,
    pub catching_up: bool,
}

impl SyncStatus {
    pub fn is_synced(&self) -> bool {
        !self.catching_up && self.height > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLoadStatus {
    pub status: String,
}

impl ModelLoadStatus {
    pub fn is_loaded(&self) -> bool {
        self.status.eq_ignore_ascii_case(MODEL_READY_STATE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skip,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub details: Option<String>,
}

/// Body of the node API setup report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// Healthy means at least one check reported and none failing.
    pub fn all_passing(&self) -> bool {
        !self.checks.is_empty() && self.failing().next().is_none()
    }

    pub fn failing(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Fail | CheckStatus::Unknown))
    }

    pub fn passed(&self, name: &str) -> bool {
        self.checks
            .iter()
            .any(|c| c.name == name && c.status == CheckStatus::Pass)
    }

    pub fn summary(&self) -> String {
        let passed = self
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Pass)
            .count();
        format!("{passed}/{} checks passing", self.checks.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub participant_registered: bool,
    pub ml_node_registered: bool,
}

impl RegistrationStatus {
    pub fn from_report(report: &HealthReport) -> Self {
        Self {
            participant_registered: report.passed(CHECK_PARTICIPANT_REGISTERED),
            ml_node_registered: report.passed(CHECK_ML_NODE_REGISTERED),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.participant_registered && self.ml_node_registered
    }
}

/// Extract height and catching-up flag from a Tendermint-style `/status`
/// body. Height may be a string or a number.
pub fn parse_sync_status(body: &serde_json::Value) -> Option<SyncStatus> {
    let info = body
        .get("result")
        .unwrap_or(body)
        .get("sync_info")?;
    let height = match info.get("latest_block_height")? {
        serde_json::Value::String(s) => s.parse::<u64>().ok()?,
        serde_json::Value::Number(n) => n.as_u64()?,
        _ => return None,
    };
    let catching_up = info.get("catching_up")?.as_bool()?;
    Some(SyncStatus {
        height,
        catching_up,
    })
}

pub fn parse_model_status(body: &serde_json::Value) -> Option<ModelLoadStatus> {
    let status = body
        .get("state")
        .or_else(|| body.get("status"))?
        .as_str()?
        .to_string();
    Some(ModelLoadStatus { status })
}

#[derive(Debug, Clone)]
pub struct ReadinessClient {
    http: reqwest::Client,
}

impl ReadinessClient {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, ReadinessError> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ReadinessError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }

    pub async fn sync_status(&self, rpc_url: &str) -> Result<SyncStatus, ReadinessError> {
        let url = format!("{}/status", rpc_url.trim_end_matches('/'));
        let body = self.get_json(&url).await?;
        parse_sync_status(&body)
            .ok_or_else(|| ReadinessError::Malformed("missing sync_info".to_string()))
    }

    pub async fn model_status(&self, admin_url: &str) -> Result<ModelLoadStatus, ReadinessError> {
        let url = format!("{}/api/v1/state", admin_url.trim_end_matches('/'));
        let body = self.get_json(&url).await?;
        parse_model_status(&body)
            .ok_or_else(|| ReadinessError::Malformed("missing state".to_string()))
    }

    pub async fn setup_report(&self, api_url: &str) -> Result<HealthReport, ReadinessError> {
        let url = format!("{}/v1/setup/report", api_url.trim_end_matches('/'));
        let body = self.get_json(&url).await?;
        serde_json::from_value(body).map_err(|e| ReadinessError::Malformed(e.to_string()))
    }

    pub async fn registration(&self, api_url: &str) -> Result<RegistrationStatus, ReadinessError> {
        let report = self.setup_report(api_url).await?;
        Ok(RegistrationStatus::from_report(&report))
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_sync_status_string_height() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": -1,
            "result": {
                "node_info": {"network": "kiln-mainnet"},
                "sync_info": {"latest_block_height": "1523401", "catching_up": true}
            }
        });
        let s = parse_sync_status(&body).unwrap();
        assert_eq!(s.height, 1_523_401);
        assert!(s.catching_up);
        assert!(!s.is_synced());
    }

    #[test]
    fn test_parse_sync_status_numeric_and_unwrapped() {
        let body = json!({"sync_info": {"latest_block_height": 12, "catching_up": false}});
        assert!(parse_sync_status(&body).unwrap().is_synced());
        assert!(parse_sync_status(&json!({"result": {}})).is_none());
    }

    #[test]
    fn test_fresh_chain_is_not_synced() {
        let s = SyncStatus {
            height: 0,
            catching_up: false,
        };
        assert!(!s.is_synced());
    }

    #[test]
    fn test_model_status() {
        assert!(parse_model_status(&json!({"state": "inference"}))
            .unwrap()
            .is_loaded());
        assert!(!parse_model_status(&json!({"status": "LOADING"}))
            .unwrap()
            .is_loaded());
        assert!(parse_model_status(&json!({})).is_none());
    }

    fn report(checks: serde_json::Value) -> HealthReport {
        serde_json::from_value(json!({ "checks": checks })).unwrap()
    }

    #[test]
    fn test_health_report_rules() {
        let ok = report(json!([
            {"name": "api", "status": "pass"},
            {"name": "disk", "status": "warn", "details": "85% used"}
        ]));
        assert!(ok.all_passing());

        let bad = report(json!([
            {"name": "api", "status": "pass"},
            {"name": "ml_node", "status": "fail", "details": "connection refused"}
        ]));
        assert!(!bad.all_passing());
        assert_eq!(bad.failing().next().unwrap().name, "ml_node");
        assert_eq!(bad.summary(), "1/2 checks passing");

        assert!(!HealthReport::default().all_passing());
        let odd = report(json!([{"name": "x", "status": "exploded"}]));
        assert!(!odd.all_passing());
    }

    #[test]
    fn test_registration_needs_both_checks() {
        let half = report(json!([
            {"name": CHECK_PARTICIPANT_REGISTERED, "status": "pass"},
            {"name": CHECK_ML_NODE_REGISTERED, "status": "fail"}
        ]));
        let reg = RegistrationStatus::from_report(&half);
        assert!(reg.participant_registered);
        assert!(!reg.is_complete());

        let full = report(json!([
            {"name": CHECK_PARTICIPANT_REGISTERED, "status": "pass"},
            {"name": CHECK_ML_NODE_REGISTERED, "status": "pass"}
        ]));
        assert!(RegistrationStatus::from_report(&full).is_complete());
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_client_reads_mock_endpoints() {
        let app = Router::new()
            .route(
                "/status",
                get(|| async {
                    Json(json!({"result": {"sync_info": {"latest_block_height": "77", "catching_up": false}}}))
                }),
            )
            .route(
                "/v1/setup/report",
                get(|| async {
                    Json(json!({"checks": [
                        {"name": CHECK_PARTICIPANT_REGISTERED, "status": "pass"},
                        {"name": CHECK_ML_NODE_REGISTERED, "status": "pass"}
                    ]}))
                }),
            )
            .route("/api/v1/state", get(|| async { Json(json!({"state": "INFERENCE"})) }));
        let base = serve(app).await;
        let client = ReadinessClient::new(Duration::from_secs(2)).unwrap();

        let sync = client.sync_status(&base).await.unwrap();
        assert_eq!(sync.height, 77);
        assert!(sync.is_synced());
        assert!(client.model_status(&base).await.unwrap().is_loaded());
        assert!(client.registration(&base).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_client_reports_http_status() {
        let base = serve(Router::new()).await;
        let client = ReadinessClient::new(Duration::from_secs(2)).unwrap();
        let err = client.setup_report(&base).await.unwrap_err();
        assert!(matches!(err, ReadinessError::Status(404)), "got {err:?}");
    }
}
