use std::path::PathBuf;

use async_trait::async_trait;
use kiln_common::SetupState;
use tokio::fs;

use crate::error::SetupError;

/// Produces the files the deployment reads.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Write artifacts for `state` and return the paths written.
    async fn write(&self, state: &SetupState) -> Result<Vec<PathBuf>, SetupError>;
}

/// Writes the compose env file consumed by `docker compose --env-file`.
#[derive(Debug, Clone)]
pub struct EnvFileWriter {
    path: PathBuf,
}

impl EnvFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ArtifactWriter for EnvFileWriter {
    async fn write(&self, state: &SetupState) -> Result<Vec<PathBuf>, SetupError> {
        let content = render_env(state)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SetupError::io(parent, e))?;
        }
        fs::write(&self.path, content)
            .await
            .map_err(|e| SetupError::io(&self.path, e))?;
        tracing::info!(path=%self.path.display(), "wrote env file");
        Ok(vec![self.path.clone()])
    }
}

/// Render `KEY=value` lines for the deployment. The keyring password is
/// never part of it.
pub fn render_env(state: &SetupState) -> Result<String, SetupError> {
    let inf = &state.inference;
    let model = inf
        .model
        .as_deref()
        .filter(|_| inf.is_configured())
        .ok_or_else(|| SetupError::validation("inference configuration missing; run inference-config first"))?;
    let ep = &state.endpoints;

    let mut vars: Vec<(&str, String)> = vec![
        ("KILN_NETWORK", state.network.name.clone()),
        ("CHAIN_ID", state.network.chain_id.clone()),
        ("SEED_API_URL", state.network.seed_api_url.clone()),
        ("SEED_RPC_URL", state.network.seed_rpc_url.clone()),
        ("KEY_NAME", state.keys.key_name.clone()),
        ("KEYRING_BACKEND", state.keys.keyring_backend.clone()),
        (
            "ACCOUNT_ADDRESS",
            state.keys.account_address.clone().unwrap_or_default(),
        ),
        (
            "ACCOUNT_PUBKEY",
            state.keys.account_pubkey.clone().unwrap_or_default(),
        ),
        ("PUBLIC_HOST", ep.public_host.clone()),
        ("P2P_PORT", ep.p2p_port.to_string()),
        ("RPC_PORT", ep.rpc_port.to_string()),
        ("API_PORT", ep.api_port.to_string()),
        ("ML_SERVER_PORT", ep.ml_server_port.to_string()),
        ("INFERENCE_PORT", ep.inference_port.to_string()),
        ("ML_ADMIN_PORT", ep.ml_admin_port.to_string()),
        ("EXPOSE_RPC", state.security.expose_rpc.to_string()),
        ("TLS_UPSTREAM", state.security.tls_upstream.to_string()),
        ("MODEL_NAME", model.to_string()),
        ("TENSOR_PARALLEL_SIZE", inf.tensor_parallel_size.to_string()),
        ("PIPELINE_PARALLEL_SIZE", inf.pipeline_parallel_size.to_string()),
        ("GPU_MEMORY_UTILIZATION", format!("{:.2}", inf.gpu_memory_utilization)),
        ("MAX_MODEL_LEN", inf.max_model_len.to_string()),
        ("KV_CACHE_DTYPE", inf.kv_cache_dtype.clone()),
        ("ATTENTION_BACKEND", inf.attention_backend.clone()),
        ("IMAGE_VARIANT", inf.image_variant.clone()),
    ];
    if !state.gpus.is_empty() {
        let devices = state
            .gpus
            .iter()
            .map(|g| g.index.to_string())
            .collect::<Vec<_>>()
            .join(",");
        vars.push(("CUDA_VISIBLE_DEVICES", devices));
    }

    let mut out = String::new();
    for (key, value) in vars {
        if value.contains('\n') || value.contains('\r') {
            return Err(SetupError::validation(format!(
                "value for {key} contains a line break"
            )));
        }
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    Ok(out)
}
