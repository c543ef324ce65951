use async_trait::async_trait;
use kiln_common::SetupState;

use crate::compose::Compose;
use crate::error::SetupError;
use crate::phase::{Phase, PhaseContext};
use crate::poll::{poll_until, PollSpec};

pub struct RegistrationPhase;

/// URL other participants use to reach this node's API.
pub fn public_url(state: &SetupState) -> String {
    let host = &state.endpoints.public_host;
    if state.security.tls_upstream {
        format!("https://{host}")
    } else {
        format!("http://{host}:{}", state.endpoints.api_port)
    }
}

fn registration_args(cli: &str, state: &SetupState, pubkey: &str) -> Vec<String> {
    vec![
        cli.to_string(),
        "register-participant".to_string(),
        "--node-url".to_string(),
        public_url(state),
        "--account-pubkey".to_string(),
        pubkey.to_string(),
        "--chain-id".to_string(),
        state.network.chain_id.clone(),
        "--seed-api-url".to_string(),
        state.network.seed_api_url.clone(),
    ]
}

#[async_trait]
impl Phase for RegistrationPhase {
    fn name(&self) -> &'static str {
        "registration"
    }

    fn description(&self) -> &'static str {
        "Registering the node on chain"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let api_url = state.endpoints.api_url();

        let already = match ctx.readiness.registration(&api_url).await {
            Ok(status) => status.is_complete(),
            Err(e) => {
                tracing::debug!(error=%e, "registration status unavailable before submit");
                false
            }
        };
        if already {
            tracing::info!("node already registered");
            return Ok(());
        }

        let pubkey = state
            .keys
            .account_pubkey
            .clone()
            .ok_or_else(|| SetupError::validation("no account public key recorded; run keys first"))?;
        let cfg = &ctx.config;
        let compose = Compose::new(&ctx.exec, &cfg.compose_file, cfg.env_file());
        let args = registration_args(&cfg.chain_cli, state, &pubkey);
        let out = compose.exec(&cfg.api_service, &args).await?;
        tracing::info!(
            node_url=%public_url(state),
            output=%out.stdout.trim(),
            "registration submitted"
        );

        let spec = PollSpec::new(cfg.poll_interval, cfg.registration_timeout);
        let status = poll_until(
            &ctx.cancel,
            spec,
            || ctx.readiness.registration(&api_url),
            |s| s.is_complete(),
            |s| {
                tracing::info!(
                    participant = s.participant_registered,
                    ml_node = s.ml_node_registered,
                    "registration"
                )
            },
        )
        .await
        .map_err(|e| e.into_setup_error("waiting for registration"))?;
        tracing::info!(?status, "node registered");
        Ok(())
    }
}
