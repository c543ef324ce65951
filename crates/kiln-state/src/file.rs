use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use kiln_common::SetupState;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::types::{StateError, StateStore};

pub const STATE_FILE_NAME: &str = "state.json";

/// Owner read/write only; the file carries key addresses and endpoints.
#[cfg(unix)]
const STATE_FILE_MODE: u32 = 0o600;

/// JSON file at `<dir>/state.json`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<SetupState, StateError> {
        let path = self.path();
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path=%path.display(), "no state file, starting fresh");
                return Ok(SetupState::new(&self.dir));
            }
            Err(e) => return Err(io_err(&path, e)),
        };

        let state: SetupState =
            serde_json::from_slice(&raw).map_err(|source| StateError::Decode {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(
            path=%path.display(),
            completed=state.completed_phases.len(),
            "loaded setup state"
        );
        Ok(state)
    }

    async fn save(&self, state: &SetupState) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, e))?;

        let mut snapshot = state.clone();
        snapshot.updated_at = Some(Utc::now());
        let body = serde_json::to_vec_pretty(&snapshot).map_err(StateError::Encode)?;

        let path = self.path();
        let tmp = self.dir.join(format!("{STATE_FILE_NAME}.tmp"));
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(STATE_FILE_MODE);
        let mut file = options.open(&tmp).await.map_err(|e| io_err(&tmp, e))?;
        // a leftover temp file keeps its old mode
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(STATE_FILE_MODE))
                .await
                .map_err(|e| io_err(&tmp, e))?;
        }
        file.write_all(&body).await.map_err(|e| io_err(&tmp, e))?;
        file.sync_all().await.map_err(|e| io_err(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, &path).await.map_err(|e| io_err(&path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::setup_state::{DEFAULT_API_PORT, DEFAULT_P2P_PORT};
    use kiln_common::{
        DiskMetrics, DriverInfo, GpuArch, GpuDescriptor, GpuTopology, KeyWorkflow,
    };

    fn populated(dir: &Path) -> SetupState {
        let mut state = SetupState::new(dir);
        state.mark_phase_complete("prerequisites");
        state.mark_phase_complete("network");
        state.mark_phase_complete("network");
        state.current_phase = Some("gpu-detect".into());
        state.network.name = "testnet".into();
        state.network.seed_api_url = "http://seed.example:8000".into();
        state.keys.workflow = KeyWorkflow::External;
        state.keys.account_address = Some("kiln1qxy".into());
        state.keys.keyring_password = Some("do-not-write".into());
        state.gpus = (0..4)
            .map(|i| GpuDescriptor {
                index: i,
                name: "NVIDIA GeForce RTX 4090".into(),
                memory_mb: 24_564,
                arch: GpuArch::Ada,
                bus_id: format!("00000000:{:02X}:00.0", i + 1),
            })
            .collect();
        state.gpu_topology = Some(GpuTopology {
            nvlink: false,
            pcie_gen: Some(4),
        });
        state.driver = Some(DriverInfo {
            driver_version: "550.54.15".into(),
            cuda_version: Some("12.4".into()),
        });
        state.inference.model = Some("Qwen/Qwen3-32B-FP8".into());
        state.inference.tensor_parallel_size = 4;
        state.inference.pipeline_parallel_size = 1;
        state.inference.gpu_memory_utilization = 0.9;
        state.inference.max_model_len = 24_576;
        state.inference.kv_cache_dtype = "auto".into();
        state.endpoints.public_host = "203.0.113.7".into();
        state.security.expose_rpc = true;
        state.disk = Some(DiskMetrics {
            path: dir.display().to_string(),
            total_bytes: 2_000_000_000_000,
            used_bytes: 500_000_000_000,
            available_bytes: 1_500_000_000_000,
        });
        state
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(tmp.path().join("node"));
        let state = store.load().await.unwrap();
        assert!(state.completed_phases.is_empty());
        assert_eq!(state.endpoints.p2p_port, DEFAULT_P2P_PORT);
        assert_eq!(state.endpoints.api_port, DEFAULT_API_PORT);
        assert_eq!(state.output_dir, tmp.path().join("node"));
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips_except_secrets() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("out");
        let store = FileStateStore::new(&dir);
        let state = populated(&dir);

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert!(loaded.keys.keyring_password.is_none());
        assert!(loaded.updated_at.is_some());

        let mut expected = state.clone();
        expected.keys.keyring_password = None;
        expected.updated_at = loaded.updated_at;
        assert_eq!(loaded, expected);
    }

    #[tokio::test]
    async fn test_malformed_file_is_decode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(tmp.path());
        fs::write(store.path(), b"{ not json").await.unwrap();
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StateError::Decode { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(tmp.path());
        store.save(&SetupState::new(tmp.path())).await.unwrap();
        let mode = fs::metadata(store.path()).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_temp_file_does_not_widen_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let stale = tmp.path().join(format!("{STATE_FILE_NAME}.tmp"));
        std::fs::write(&stale, b"partial").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileStateStore::new(tmp.path());
        store.save(&SetupState::new(tmp.path())).await.unwrap();

        let mode = fs::metadata(store.path()).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!stale.exists());
        assert!(store.load().await.is_ok());
    }
}
