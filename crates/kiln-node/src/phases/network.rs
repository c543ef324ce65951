use async_trait::async_trait;
use kiln_common::{NetworkSelection, SetupState};

use crate::error::SetupError;
use crate::operator::PromptField;
use crate::phase::{Phase, PhaseContext};

struct KnownNetwork {
    name: &'static str,
    chain_id: &'static str,
    seed_api_url: &'static str,
    seed_rpc_url: &'static str,
}

const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        name: "mainnet",
        chain_id: "kiln-mainnet",
        seed_api_url: "https://seed.kiln.network:8000",
        seed_rpc_url: "https://seed.kiln.network:26657",
    },
    KnownNetwork {
        name: "testnet",
        chain_id: "kiln-testnet-1",
        seed_api_url: "https://seed.testnet.kiln.network:8000",
        seed_rpc_url: "https://seed.testnet.kiln.network:26657",
    },
];

pub fn lookup_network(name: &str) -> Option<NetworkSelection> {
    KNOWN_NETWORKS
        .iter()
        .find(|n| n.name.eq_ignore_ascii_case(name.trim()))
        .map(|n| NetworkSelection {
            name: n.name.to_string(),
            chain_id: n.chain_id.to_string(),
            seed_api_url: n.seed_api_url.to_string(),
            seed_rpc_url: n.seed_rpc_url.to_string(),
        })
}

pub struct NetworkPhase;

#[async_trait]
impl Phase for NetworkPhase {
    fn name(&self) -> &'static str {
        "network"
    }

    fn description(&self) -> &'static str {
        "Selecting network and public endpoint"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let name = ctx
            .operator
            .choose(PromptField::Network, &state.network.name)
            .await;
        let selection = lookup_network(&name).ok_or_else(|| {
            let known: Vec<_> = KNOWN_NETWORKS.iter().map(|n| n.name).collect();
            SetupError::validation(format!(
                "unknown network `{name}`, expected one of {}",
                known.join(", ")
            ))
        })?;

        let host = ctx
            .operator
            .choose(PromptField::PublicHost, &state.endpoints.public_host)
            .await;
        let host = host.trim();
        if host.is_empty() {
            return Err(SetupError::validation("public host is required"));
        }
        if host.contains(char::is_whitespace) || host.contains("://") {
            return Err(SetupError::validation(format!(
                "public host `{host}` must be a bare hostname or IP"
            )));
        }

        tracing::info!(
            network=%selection.name,
            chain_id=%selection.chain_id,
            public_host=%host,
            expose_rpc=ctx.config.expose_rpc,
            "network selected"
        );
        state.network = selection;
        state.endpoints.public_host = host.to_string();
        state.security.expose_rpc = ctx.config.expose_rpc;
        state.security.tls_upstream = ctx.config.tls_upstream;
        Ok(())
    }
}
