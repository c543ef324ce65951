use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::config::SetupConfig;
use crate::operator::{DecisionPoint, Overrides, PromptField};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Parser)]
#[command(name = "kiln-node")]
#[command(about = "Resumable bootstrap for a GPU inference node", long_about = None)]
pub struct Args {
    /// Directory holding state.json, config.env and the keyring
    #[arg(long, env = "KILN_OUTPUT_DIR", default_value = "/opt/kiln", global = true)]
    pub output_dir: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// OTLP/HTTP collector for setup traces
    #[arg(long, env = "KILN_OTLP_ENDPOINT", global = true)]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP collector
    #[arg(long, env = "KILN_OTLP_TOKEN", global = true)]
    pub otlp_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run (or resume) the setup
    Run(RunArgs),
    /// Show recorded progress and configuration
    Status,
    /// Print the inference configuration for a GPU set
    Recommend {
        /// Number of GPUs
        #[arg(long)]
        gpus: u32,
        /// Memory per GPU in MB
        #[arg(long)]
        memory_mb: u64,
        /// GPU product name, e.g. "NVIDIA H100 80GB HBM3"
        #[arg(long, default_value = "")]
        name: String,
        /// GPUs are linked by NVLink
        #[arg(long)]
        nvlink: bool,
    },
}

#[derive(Debug, ClapArgs)]
pub struct RunArgs {
    /// Never prompt; unanswered questions take their defaults
    #[arg(long, env = "KILN_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Discard recorded progress and configuration before running
    #[arg(long)]
    pub reset: bool,

    /// Re-run a phase even if it already completed (repeatable)
    #[arg(long = "force-phase", value_name = "PHASE")]
    pub force_phases: Vec<String>,

    /// Answer "yes" to a continue-anyway question: low-disk, pull-failure,
    /// sync-timeout, model-load-timeout, health-timeout (repeatable)
    #[arg(long = "continue-on", value_name = "DECISION")]
    pub continue_on: Vec<String>,

    #[arg(long, env = "KILN_NETWORK")]
    pub network: Option<String>,

    /// Public hostname or IP of this node
    #[arg(long, env = "KILN_PUBLIC_HOST")]
    pub public_host: Option<String>,

    /// local or external
    #[arg(long, env = "KILN_KEY_WORKFLOW")]
    pub key_workflow: Option<String>,

    /// Account public key for the external key workflow
    #[arg(long, env = "KILN_ACCOUNT_PUBKEY")]
    pub account_pubkey: Option<String>,

    /// Keyring password; generated and stored next to the state when absent
    #[arg(long, env = "KILN_KEYRING_PASSWORD", hide_env_values = true)]
    pub keyring_password: Option<String>,

    /// Model to serve instead of the recommended one
    #[arg(long, env = "KILN_MODEL")]
    pub model: Option<String>,

    /// Tensor-parallel size instead of the recommended one
    #[arg(long, env = "KILN_TENSOR_PARALLEL")]
    pub tensor_parallel: Option<u32>,

    #[arg(long, env = "KILN_COMPOSE_FILE")]
    pub compose_file: Option<PathBuf>,

    #[arg(long, env = "KILN_NODE_IMAGE", default_value = "ghcr.io/kiln-network/node:latest")]
    pub node_image: String,

    #[arg(long, env = "KILN_CHAIN_CLI", default_value = "kilnd")]
    pub chain_cli: String,

    /// Compose service that runs the node API
    #[arg(long, default_value = "api")]
    pub api_service: String,

    /// Shell command run before `docker compose up`
    #[arg(long, env = "KILN_PRE_DEPLOY_HOOK")]
    pub pre_deploy_hook: Option<String>,

    /// Allow the chain RPC port to be reached from outside
    #[arg(long)]
    pub expose_rpc: bool,

    /// TLS is terminated by a proxy in front of the node
    #[arg(long)]
    pub tls_upstream: bool,

    /// Skip detection and always run docker through `sudo -n`
    #[arg(long, env = "KILN_SUDO")]
    pub sudo: bool,

    #[arg(long, default_value_t = 100)]
    pub min_free_disk_gib: u64,

    #[arg(long, default_value_t = 120)]
    pub command_timeout_secs: u64,

    #[arg(long, default_value_t = 1800)]
    pub pull_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub poll_interval_secs: u64,

    #[arg(long, default_value_t = 300)]
    pub api_timeout_secs: u64,

    #[arg(long, default_value_t = 3600)]
    pub sync_timeout_secs: u64,

    #[arg(long, default_value_t = 3600)]
    pub model_load_timeout_secs: u64,

    #[arg(long, default_value_t = 600)]
    pub health_timeout_secs: u64,

    #[arg(long, default_value_t = 600)]
    pub registration_timeout_secs: u64,
}

impl RunArgs {
    pub fn to_config(&self, output_dir: PathBuf) -> SetupConfig {
        SetupConfig {
            compose_file: self
                .compose_file
                .clone()
                .unwrap_or_else(|| output_dir.join("docker-compose.yml")),
            output_dir,
            node_image: self.node_image.clone(),
            chain_cli: self.chain_cli.clone(),
            api_service: self.api_service.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            pull_timeout: Duration::from_secs(self.pull_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            api_timeout: Duration::from_secs(self.api_timeout_secs),
            sync_timeout: Duration::from_secs(self.sync_timeout_secs),
            model_load_timeout: Duration::from_secs(self.model_load_timeout_secs),
            health_timeout: Duration::from_secs(self.health_timeout_secs),
            registration_timeout: Duration::from_secs(self.registration_timeout_secs),
            min_free_disk_bytes: self.min_free_disk_gib.saturating_mul(GIB),
            pre_deploy_hook: self.pre_deploy_hook.clone().filter(|h| !h.trim().is_empty()),
            expose_rpc: self.expose_rpc,
            tls_upstream: self.tls_upstream,
            sudo: self.sudo,
        }
    }

    pub fn overrides(&self) -> anyhow::Result<Overrides> {
        let mut overrides = Overrides {
            non_interactive: self.non_interactive,
            model: self.model.clone(),
            tensor_parallel: self.tensor_parallel,
            ..Overrides::default()
        };
        overrides.set_answer(PromptField::Network, self.network.clone());
        overrides.set_answer(PromptField::PublicHost, self.public_host.clone());
        overrides.set_answer(PromptField::KeyWorkflow, self.key_workflow.clone());
        overrides.set_answer(PromptField::AccountPubkey, self.account_pubkey.clone());
        for key in &self.continue_on {
            let point = DecisionPoint::from_key(key).ok_or_else(|| {
                let known: Vec<_> = DecisionPoint::ALL.iter().map(|p| p.key()).collect();
                anyhow::anyhow!("unknown --continue-on `{key}`, expected one of {}", known.join(", "))
            })?;
            overrides.decisions.insert(point, true);
        }
        Ok(overrides)
    }
}
