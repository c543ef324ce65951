use async_trait::async_trait;
use kiln_common::SetupState;

use crate::error::SetupError;
use crate::phase::{Phase, PhaseContext};

/// Re-renders deployment files on every run so they track the state.
pub struct ArtifactsPhase;

#[async_trait]
impl Phase for ArtifactsPhase {
    fn name(&self) -> &'static str {
        "artifacts"
    }

    fn description(&self) -> &'static str {
        "Writing deployment configuration"
    }

    fn should_run(&self, _state: &SetupState) -> bool {
        true
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let written = ctx.artifacts.write(state).await?;
        tracing::debug!(files = written.len(), "artifacts written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::exec::fake::FakeRunner;
    use crate::operator::Overrides;
    use crate::phase::testing::context;

    #[tokio::test]
    async fn test_requires_inference_config() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::new()), Overrides::default());
        let mut state = SetupState::new(tmp.path());
        let err = ArtifactsPhase.run(&ctx, &mut state).await.unwrap_err();
        assert!(matches!(err, SetupError::Validation(_)));
        assert!(!ctx.config.env_file().exists());
    }

    #[tokio::test]
    async fn test_writes_env_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::new()), Overrides::default());
        let mut state = SetupState::new(tmp.path());
        state.inference.model = Some("Qwen/Qwen2.5-7B-Instruct".into());
        state.inference.tensor_parallel_size = 1;
        assert!(ArtifactsPhase.should_run(&state));

        ArtifactsPhase.run(&ctx, &mut state).await.unwrap();
        let env = std::fs::read_to_string(ctx.config.env_file()).unwrap();
        assert!(env.contains("MODEL_NAME=Qwen/Qwen2.5-7B-Instruct\n"));
    }
}
