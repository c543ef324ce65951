use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gpu::{DriverInfo, GpuDescriptor, GpuTopology};

/// Bumped whenever the on-disk layout changes incompatibly.
pub const STATE_VERSION: u32 = 1;

pub const DEFAULT_NETWORK: &str = "mainnet";
pub const DEFAULT_CHAIN_ID: &str = "kiln-mainnet";
pub const DEFAULT_KEY_NAME: &str = "node-operator";
pub const DEFAULT_KEYRING_BACKEND: &str = "file";

pub const DEFAULT_P2P_PORT: u16 = 5000;
pub const DEFAULT_RPC_PORT: u16 = 26657;
pub const DEFAULT_API_PORT: u16 = 8000;
pub const DEFAULT_ML_SERVER_PORT: u16 = 8080;
pub const DEFAULT_INFERENCE_PORT: u16 = 5050;
pub const DEFAULT_ML_ADMIN_PORT: u16 = 9200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSelection {
    pub name: String,
    pub chain_id: String,
    #[serde(default)]
    pub seed_api_url: String,
    #[serde(default)]
    pub seed_rpc_url: String,
}

impl Default for NetworkSelection {
    fn default() -> Self {
        Self {
            name: DEFAULT_NETWORK.to_string(),
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            seed_api_url: String::new(),
            seed_rpc_url: String::new(),
        }
    }
}

/// Where the account key lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyWorkflow {
    /// Account key is created and kept on this host.
    #[default]
    Local,
    /// Account key is held elsewhere; only the public key is supplied.
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyState {
    #[serde(default)]
    pub workflow: KeyWorkflow,
    pub key_name: String,
    pub keyring_backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_pubkey: Option<String>,

    /// Never written to disk. Re-supplied each run or recovered from the
    /// side artifact next to the state file.
    #[serde(skip)]
    pub keyring_password: Option<String>,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            workflow: KeyWorkflow::Local,
            key_name: DEFAULT_KEY_NAME.to_string(),
            keyring_backend: DEFAULT_KEYRING_BACKEND.to_string(),
            account_address: None,
            account_pubkey: None,
            keyring_password: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeVersions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<String>,
}

/// Inference-engine parameters chosen for this host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InferenceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub tensor_parallel_size: u32,
    #[serde(default)]
    pub pipeline_parallel_size: u32,
    #[serde(default)]
    pub gpu_memory_utilization: f32,
    #[serde(default)]
    pub max_model_len: u32,
    #[serde(default)]
    pub kv_cache_dtype: String,
    #[serde(default)]
    pub attention_backend: String,
    #[serde(default)]
    pub image_variant: String,
}

impl InferenceSettings {
    pub fn is_configured(&self) -> bool {
        self.model.is_some() && self.tensor_parallel_size > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoints {
    #[serde(default)]
    pub public_host: String,
    pub p2p_port: u16,
    pub rpc_port: u16,
    pub api_port: u16,
    pub ml_server_port: u16,
    pub inference_port: u16,
    pub ml_admin_port: u16,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            public_host: String::new(),
            p2p_port: DEFAULT_P2P_PORT,
            rpc_port: DEFAULT_RPC_PORT,
            api_port: DEFAULT_API_PORT,
            ml_server_port: DEFAULT_ML_SERVER_PORT,
            inference_port: DEFAULT_INFERENCE_PORT,
            ml_admin_port: DEFAULT_ML_ADMIN_PORT,
        }
    }
}

impl Endpoints {
    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.rpc_port)
    }

    pub fn api_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.api_port)
    }

    pub fn ml_admin_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.ml_admin_port)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityFlags {
    #[serde(default)]
    pub expose_rpc: bool,
    #[serde(default)]
    pub tls_upstream: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskMetrics {
    pub path: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

/// Durable snapshot of setup progress and everything derived so far.
///
/// One per output directory, stored as `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetupState {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub output_dir: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub completed_phases: Vec<String>,

    #[serde(default)]
    pub network: NetworkSelection,
    #[serde(default)]
    pub keys: KeyState,

    #[serde(default)]
    pub gpus: Vec<GpuDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_topology: Option<GpuTopology>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverInfo>,
    #[serde(default)]
    pub runtime: RuntimeVersions,

    #[serde(default)]
    pub inference: InferenceSettings,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub security: SecurityFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskMetrics>,
}

impl SetupState {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: None,
            output_dir: output_dir.into(),
            current_phase: None,
            completed_phases: Vec::new(),
            network: NetworkSelection::default(),
            keys: KeyState::default(),
            gpus: Vec::new(),
            gpu_topology: None,
            driver: None,
            runtime: RuntimeVersions::default(),
            inference: InferenceSettings::default(),
            endpoints: Endpoints::default(),
            security: SecurityFlags::default(),
            disk: None,
        }
    }

    /// Record `name` as done. Duplicates are kept; completion is a
    /// membership test.
    pub fn mark_phase_complete(&mut self, name: &str) {
        self.completed_phases.push(name.to_string());
        self.current_phase = None;
    }

    pub fn is_phase_complete(&self, name: &str) -> bool {
        self.completed_phases.iter().any(|p| p == name)
    }

    /// Drop a phase from the completed list so the next run repeats it.
    pub fn forget_phase(&mut self, name: &str) {
        self.completed_phases.retain(|p| p != name);
    }

    /// Zero all derived configuration. Output directory and phase
    /// bookkeeping survive.
    pub fn reset(&mut self) {
        let output_dir = std::mem::take(&mut self.output_dir);
        let current_phase = self.current_phase.take();
        let completed_phases = std::mem::take(&mut self.completed_phases);

        *self = Self::new(output_dir);
        self.current_phase = current_phase;
        self.completed_phases = completed_phases;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuArch;

    #[test]
    fn test_mark_complete_clears_current_phase() {
        let mut state = SetupState::new("/tmp/kiln");
        state.current_phase = Some("gpu-detect".into());
        state.mark_phase_complete("gpu-detect");
        assert!(state.current_phase.is_none());
        assert!(state.is_phase_complete("gpu-detect"));
        assert!(!state.is_phase_complete("disk"));
    }

    #[test]
    fn test_duplicate_completion_is_tolerated() {
        let mut state = SetupState::new("/tmp/kiln");
        state.mark_phase_complete("keys");
        state.mark_phase_complete("keys");
        assert_eq!(state.completed_phases, vec!["keys", "keys"]);
        assert!(state.is_phase_complete("keys"));
    }

    #[test]
    fn test_forget_phase_removes_every_copy() {
        let mut state = SetupState::new("/tmp/kiln");
        state.mark_phase_complete("keys");
        state.mark_phase_complete("disk");
        state.mark_phase_complete("keys");
        state.forget_phase("keys");
        assert_eq!(state.completed_phases, vec!["disk"]);
    }

    #[test]
    fn test_reset_keeps_dir_and_bookkeeping() {
        let mut state = SetupState::new("/srv/node");
        state.mark_phase_complete("network");
        state.current_phase = Some("keys".into());
        state.network.name = "testnet".into();
        state.gpus.push(GpuDescriptor {
            index: 0,
            name: "NVIDIA H100 80GB HBM3".into(),
            memory_mb: 81_559,
            arch: GpuArch::Hopper,
            bus_id: "00000000:17:00.0".into(),
        });
        state.endpoints.api_port = 9999;
        state.keys.keyring_password = Some("hunter2".into());

        state.reset();

        assert_eq!(state.output_dir, PathBuf::from("/srv/node"));
        assert_eq!(state.completed_phases, vec!["network"]);
        assert_eq!(state.current_phase.as_deref(), Some("keys"));
        assert_eq!(state.network, NetworkSelection::default());
        assert!(state.gpus.is_empty());
        assert_eq!(state.endpoints.api_port, DEFAULT_API_PORT);
        assert!(state.keys.keyring_password.is_none());
    }

    #[test]
    fn test_password_never_serialized() {
        let mut state = SetupState::new("/tmp/kiln");
        state.keys.keyring_password = Some("s3cret".into());
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!json.contains("keyring_password"));
    }

    #[test]
    fn test_minimal_document_fills_defaults() {
        let raw = r#"{"version":1,"output_dir":"/data"}"#;
        let state: SetupState = serde_json::from_str(raw).unwrap();
        assert!(state.completed_phases.is_empty());
        assert_eq!(state.endpoints, Endpoints::default());
        assert_eq!(state.keys.key_name, DEFAULT_KEY_NAME);
    }
}
