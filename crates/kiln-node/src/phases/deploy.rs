use async_trait::async_trait;
use kiln_common::SetupState;

use crate::compose::Compose;
use crate::error::SetupError;
use crate::exec::CommandSpec;
use crate::operator::DecisionPoint;
use crate::phase::{Phase, PhaseContext};
use crate::poll::{poll_until, PollSpec};

pub struct DeployPhase;

#[async_trait]
impl Phase for DeployPhase {
    fn name(&self) -> &'static str {
        "deploy"
    }

    fn description(&self) -> &'static str {
        "Starting node containers"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let cfg = &ctx.config;
        if !cfg.compose_file.exists() {
            return Err(SetupError::validation(format!(
                "compose file {} not found",
                cfg.compose_file.display()
            )));
        }
        let compose = Compose::new(&ctx.exec, &cfg.compose_file, cfg.env_file());

        if let Err(e) = compose.pull(cfg.pull_timeout).await {
            if !ctx.operator.decide(DecisionPoint::ContinueAfterPullFailure).await {
                return Err(e.into());
            }
            tracing::warn!(error=%e, "image pull failed, continuing with local images");
        }

        if let Some(hook) = cfg.pre_deploy_hook.as_deref() {
            tracing::info!(hook, "running pre-deploy hook");
            let spec = CommandSpec::shell(hook)
                .cwd(&cfg.output_dir)
                .env("KILN_OUTPUT_DIR", cfg.output_dir.display().to_string())
                .env("KILN_ENV_FILE", cfg.env_file().display().to_string())
                .timeout(cfg.command_timeout);
            ctx.exec.run(&spec).await?;
        }

        compose.up(cfg.pull_timeout).await?;
        for svc in compose.ps().await? {
            if svc.is_running() {
                tracing::info!(service=%svc.service, health=svc.health.as_deref().unwrap_or("-"), "service up");
            } else {
                tracing::warn!(service=%svc.service, state=%svc.state, "service not running");
            }
        }

        let api_url = state.endpoints.api_url();
        let spec = PollSpec::new(cfg.poll_interval, cfg.api_timeout);
        poll_until(
            &ctx.cancel,
            spec,
            || ctx.readiness.setup_report(&api_url),
            |_| true,
            |_| {},
        )
        .await
        .map_err(|e| e.into_setup_error("waiting for the node API"))?;
        tracing::info!(%api_url, "node API is answering");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::exec::fake::FakeRunner;
    use crate::operator::Overrides;
    use crate::phase::testing::{context, serve};

    async fn prepared(
        runner: Arc<FakeRunner>,
        overrides: Overrides,
    ) -> (tempfile::TempDir, crate::phase::PhaseContext, SetupState) {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(tmp.path(), runner, overrides);
        std::fs::write(&ctx.config.compose_file, "services: {}\n").unwrap();
        ctx.config.poll_interval = Duration::from_millis(50);
        ctx.config.api_timeout = Duration::from_secs(2);
        let port = serve(Router::new().route(
            "/v1/setup/report",
            get(|| async { Json(json!({"checks": []})) }),
        ))
        .await;
        let mut state = SetupState::new(tmp.path());
        state.endpoints.api_port = port;
        (tmp, ctx, state)
    }

    #[tokio::test]
    async fn test_pull_failure_aborts_by_default() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("docker compose -f", 0, "", "");
        let (_tmp, ctx, mut state) = prepared(runner.clone(), Overrides::default()).await;
        let pull = format!(
            "docker compose -f {} --env-file {} pull",
            ctx.config.compose_file.display(),
            ctx.config.env_file().display()
        );
        runner.on(&pull, 1, "", "Error response from daemon: manifest unknown");

        let err = DeployPhase.run(&ctx, &mut state).await.unwrap_err();
        assert!(matches!(err, SetupError::Command(_)));
        assert_eq!(runner.count(&pull), 1);
        assert!(!runner.calls().iter().any(|c| c.ends_with("up -d")));
    }

    #[tokio::test]
    async fn test_pull_failure_continue_then_api_ready() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("docker compose -f", 0, "", "");
        let mut overrides = Overrides::default();
        overrides
            .decisions
            .insert(DecisionPoint::ContinueAfterPullFailure, true);
        let (_tmp, mut ctx, mut state) = prepared(runner.clone(), overrides).await;
        ctx.config.pre_deploy_hook = Some("nvidia-smi -pm 1 && echo ok".into());
        runner.on("sh -c", 0, "ok\n", "");
        let pull = format!(
            "docker compose -f {} --env-file {} pull",
            ctx.config.compose_file.display(),
            ctx.config.env_file().display()
        );
        runner.on(&pull, 1, "", "pull access denied");

        DeployPhase.run(&ctx, &mut state).await.unwrap();
        let calls = runner.calls();
        let hook = calls.iter().position(|c| c == "sh -c nvidia-smi -pm 1 && echo ok");
        let up = calls.iter().position(|c| c.ends_with("up -d"));
        assert!(hook.is_some() && up.is_some());
        assert!(hook < up);
    }

    #[tokio::test]
    async fn test_api_never_answers_is_hard_timeout() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("docker compose -f", 0, "", "");
        let (_tmp, mut ctx, mut state) = prepared(runner, Overrides::default()).await;
        ctx.config.api_timeout = Duration::from_millis(300);
        // nothing listens on port 9
        state.endpoints.api_port = 9;

        let err = DeployPhase.run(&ctx, &mut state).await.unwrap_err();
        assert!(matches!(err, SetupError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_missing_compose_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FakeRunner::new()), Overrides::default());
        let mut state = SetupState::new(tmp.path());
        let err = DeployPhase.run(&ctx, &mut state).await.unwrap_err();
        assert!(err.to_string().contains("compose file"));
    }
}
