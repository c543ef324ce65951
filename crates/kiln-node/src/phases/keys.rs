use async_trait::async_trait;
use kiln_common::{KeyWorkflow, SetupState};

use crate::error::SetupError;
use crate::keys::{generate_password, store_password, write_secret, MNEMONIC_FILE_NAME};
use crate::operator::PromptField;
use crate::phase::{Phase, PhaseContext};

pub struct KeysPhase;

#[async_trait]
impl Phase for KeysPhase {
    fn name(&self) -> &'static str {
        "keys"
    }

    fn description(&self) -> &'static str {
        "Preparing the account key"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let current = match state.keys.workflow {
            KeyWorkflow::Local => "local",
            KeyWorkflow::External => "external",
        };
        let answer = ctx.operator.choose(PromptField::KeyWorkflow, current).await;
        state.keys.workflow = match answer.trim().to_ascii_lowercase().as_str() {
            "local" => KeyWorkflow::Local,
            "external" => KeyWorkflow::External,
            other => {
                return Err(SetupError::validation(format!(
                    "unknown key workflow `{other}`, expected local or external"
                )))
            }
        };

        match state.keys.workflow {
            KeyWorkflow::Local => ensure_local_key(ctx, state).await,
            KeyWorkflow::External => {
                let existing = state.keys.account_pubkey.clone().unwrap_or_default();
                let pubkey = ctx
                    .operator
                    .choose(PromptField::AccountPubkey, &existing)
                    .await;
                let pubkey = pubkey.trim();
                if pubkey.is_empty() {
                    return Err(SetupError::validation(
                        "external key workflow needs the account public key",
                    ));
                }
                tracing::info!(pubkey, "using externally held account key");
                state.keys.account_pubkey = Some(pubkey.to_string());
                Ok(())
            }
        }
    }
}

async fn ensure_local_key(ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
    let dir = ctx.config.output_dir.as_path();
    let password = match state.keys.keyring_password.clone() {
        Some(p) => p,
        None => {
            let p = generate_password();
            let path = store_password(dir, &p).await?;
            tracing::info!(path=%path.display(), "generated keyring password");
            state.keys.keyring_password = Some(p.clone());
            p
        }
    };

    let key = match ctx.keys.show(&state.keys, &password).await? {
        Some(key) => {
            tracing::info!(address=%key.address, "reusing existing account key");
            key
        }
        None => {
            let key = ctx.keys.create(&state.keys, &password).await?;
            if let Some(mnemonic) = key.mnemonic.as_deref() {
                let path = write_secret(&dir.join(MNEMONIC_FILE_NAME), mnemonic).await?;
                tracing::warn!(
                    path=%path.display(),
                    "new account key created; back up the recovery phrase and remove the file"
                );
            }
            tracing::info!(address=%key.address, "created account key");
            key
        }
    };

    state.keys.account_address = Some(key.address);
    state.keys.account_pubkey = Some(key.pubkey);
    Ok(())
}
