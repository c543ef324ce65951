//! Readiness waits whose timeout the operator may wave through.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use kiln_common::SetupState;

use crate::error::SetupError;
use crate::operator::DecisionPoint;
use crate::phase::{Phase, PhaseContext};
use crate::poll::{poll_until, PollError, PollSpec};

/// Turn a poll failure into the phase result. A timeout becomes a warning
/// when the operator agrees to `point`; cancellation never does.
async fn settle<T: Debug>(
    ctx: &PhaseContext,
    result: Result<T, PollError<T>>,
    point: DecisionPoint,
    what: &str,
) -> Result<(), SetupError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_timeout() => {
            let last = e.last().map(|s| format!("{s:?}"));
            if ctx.operator.decide(point).await {
                tracing::warn!(
                    decision = point.key(),
                    last = last.as_deref().unwrap_or("none"),
                    "{what} timed out, continuing anyway"
                );
                Ok(())
            } else {
                Err(e.into_setup_error(what))
            }
        }
        Err(e) => Err(e.into_setup_error(what)),
    }
}

fn spec(ctx: &PhaseContext, timeout: Duration) -> PollSpec {
    PollSpec::new(ctx.config.poll_interval, timeout)
}

pub struct ChainSyncPhase;

#[async_trait]
impl Phase for ChainSyncPhase {
    fn name(&self) -> &'static str {
        "chain-sync"
    }

    fn description(&self) -> &'static str {
        "Waiting for the chain to sync"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let url = state.endpoints.rpc_url();
        let result = poll_until(
            &ctx.cancel,
            spec(ctx, ctx.config.sync_timeout),
            || ctx.readiness.sync_status(&url),
            |s| s.is_synced(),
            |s| tracing::info!(height = s.height, catching_up = s.catching_up, "chain sync"),
        )
        .await;
        settle(ctx, result, DecisionPoint::ContinueAfterSyncTimeout, "waiting for chain sync").await
    }
}

pub struct ModelLoadPhase;

#[async_trait]
impl Phase for ModelLoadPhase {
    fn name(&self) -> &'static str {
        "model-load"
    }

    fn description(&self) -> &'static str {
        "Waiting for the model to load"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let url = state.endpoints.ml_admin_url();
        let model = state.inference.model.clone().unwrap_or_default();
        let result = poll_until(
            &ctx.cancel,
            spec(ctx, ctx.config.model_load_timeout),
            || ctx.readiness.model_status(&url),
            |s| s.is_loaded(),
            |s| tracing::info!(%model, status=%s.status, "model load"),
        )
        .await;
        settle(
            ctx,
            result,
            DecisionPoint::ContinueAfterModelLoadTimeout,
            "waiting for model load",
        )
        .await
    }
}

pub struct HealthPhase;

#[async_trait]
impl Phase for HealthPhase {
    fn name(&self) -> &'static str {
        "health"
    }

    fn description(&self) -> &'static str {
        "Waiting for health checks to pass"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let url = state.endpoints.api_url();
        let result = poll_until(
            &ctx.cancel,
            spec(ctx, ctx.config.health_timeout),
            || ctx.readiness.setup_report(&url),
            |r| r.all_passing(),
            |r| {
                let failing: Vec<&str> = r.failing().map(|c| c.name.as_str()).collect();
                tracing::info!(summary=%r.summary(), ?failing, "health");
            },
        )
        .await;
        if let Err(e) = &result {
            for check in e.last().into_iter().flat_map(|r| r.failing()) {
                tracing::warn!(
                    check=%check.name,
                    details=check.details.as_deref().unwrap_or("-"),
                    "health check failing"
                );
            }
        }
        settle(
            ctx,
            result,
            DecisionPoint::ContinueAfterHealthTimeout,
            "waiting for health checks",
        )
        .await
    }
}
