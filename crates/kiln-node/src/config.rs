use std::path::PathBuf;
use std::time::Duration;

use crate::parse::Version;

pub const ENV_FILE_NAME: &str = "config.env";
pub const KEYRING_DIR_NAME: &str = "keyring";

pub const MIN_DOCKER: Version = Version::new(20, 10, 0);
pub const MIN_COMPOSE: Version = Version::new(2, 0, 0);

/// Run-wide settings resolved from the command line.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub output_dir: PathBuf,
    pub compose_file: PathBuf,
    /// Image holding the chain CLI, used for key management.
    pub node_image: String,
    pub chain_cli: String,
    /// Compose service that runs the node API and chain CLI.
    pub api_service: String,

    pub command_timeout: Duration,
    pub pull_timeout: Duration,
    pub poll_interval: Duration,
    pub api_timeout: Duration,
    pub sync_timeout: Duration,
    pub model_load_timeout: Duration,
    pub health_timeout: Duration,
    pub registration_timeout: Duration,

    pub min_free_disk_bytes: u64,
    /// Operator-supplied shell pipeline run before `compose up`.
    pub pre_deploy_hook: Option<String>,

    pub expose_rpc: bool,
    pub tls_upstream: bool,
    /// Always go through `sudo -n` for the container runtime.
    pub sudo: bool,
}

impl SetupConfig {
    pub fn env_file(&self) -> PathBuf {
        self.output_dir.join(ENV_FILE_NAME)
    }

    pub fn keyring_dir(&self) -> PathBuf {
        self.output_dir.join(KEYRING_DIR_NAME)
    }

    /// Defaults suitable for tests: short waits, everything under `dir`.
    #[cfg(test)]
    pub fn for_dir(dir: impl Into<PathBuf>) -> Self {
        let output_dir = dir.into();
        Self {
            compose_file: output_dir.join("docker-compose.yml"),
            output_dir,
            node_image: "ghcr.io/kiln/node:latest".to_string(),
            chain_cli: "kilnd".to_string(),
            api_service: "api".to_string(),
            command_timeout: Duration::from_secs(5),
            pull_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            api_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(5),
            model_load_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(5),
            registration_timeout: Duration::from_secs(5),
            min_free_disk_bytes: 0,
            pre_deploy_hook: None,
            expose_rpc: false,
            tls_upstream: false,
            sudo: false,
        }
    }
}
