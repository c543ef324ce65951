//! Ordered, resumable execution of setup phases.
//!
//! A phase is skipped when its applicability predicate says so, otherwise it
//! runs against the shared [`SetupState`]. Completion is persisted right
//! after each phase, so a later run picks up at the first phase that has not
//! finished.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_common::SetupState;
use kiln_state::StateStore;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactWriter;
use crate::config::SetupConfig;
use crate::error::SetupError;
use crate::exec::CommandExecutor;
use crate::keys::KeyManager;
use crate::operator::{Operator, Overrides};
use crate::readiness::ReadinessClient;

/// Collaborators shared by every phase of a run.
pub struct PhaseContext {
    pub config: SetupConfig,
    pub overrides: Overrides,
    pub cancel: CancellationToken,
    pub exec: Arc<CommandExecutor>,
    pub operator: Arc<dyn Operator>,
    pub keys: Arc<dyn KeyManager>,
    pub artifacts: Arc<dyn ArtifactWriter>,
    pub readiness: ReadinessClient,
}

#[async_trait]
pub trait Phase: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether this phase has work to do. Defaults to "not done yet".
    fn should_run(&self, state: &SetupState) -> bool {
        !state.is_phase_complete(self.name())
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Skipped,
    Completed,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<(String, PhaseOutcome)>,
}

impl RunSummary {
    pub fn completed(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == PhaseOutcome::Completed)
            .map(|(n, _)| n.as_str())
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == PhaseOutcome::Skipped)
            .count()
    }
}

pub struct PhaseRunner {
    phases: Vec<Box<dyn Phase>>,
    store: Arc<dyn StateStore>,
    force: Vec<String>,
}

impl PhaseRunner {
    pub fn new(phases: Vec<Box<dyn Phase>>, store: Arc<dyn StateStore>) -> Self {
        Self {
            phases,
            store,
            force: Vec::new(),
        }
    }

    /// Run the named phases even if already complete.
    pub fn force(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.force.extend(names);
        self
    }

    pub fn phase_names(&self) -> Vec<&'static str> {
        self.phases.iter().map(|p| p.name()).collect()
    }

    /// Run every applicable phase in order. The first failure stops the run;
    /// phases completed before it stay recorded.
    pub async fn run(
        &self,
        ctx: &PhaseContext,
        state: &mut SetupState,
    ) -> Result<RunSummary, SetupError> {
        let mut summary = RunSummary::default();
        let total = self.phases.len();

        for (i, phase) in self.phases.iter().enumerate() {
            let name = phase.name();
            if ctx.cancel.is_cancelled() {
                return Err(SetupError::Phase {
                    phase: name.to_string(),
                    source: Box::new(SetupError::Cancelled {
                        what: "starting phase".to_string(),
                    }),
                });
            }

            let forced = self.force.iter().any(|f| f == name);
            if !forced && !phase.should_run(state) {
                tracing::debug!(phase = name, "skipping");
                summary.outcomes.push((name.to_string(), PhaseOutcome::Skipped));
                continue;
            }

            tracing::info!(
                phase = name,
                step = i + 1,
                total,
                forced,
                "{}",
                phase.description()
            );
            if forced {
                state.forget_phase(name);
            }
            state.current_phase = Some(name.to_string());
            if let Err(e) = phase.run(ctx, state).await {
                tracing::error!(phase = name, error = %e, "phase failed");
                return Err(SetupError::Phase {
                    phase: name.to_string(),
                    source: Box::new(e),
                });
            }

            // phases that always run would otherwise add an entry per run
            state.forget_phase(name);
            state.mark_phase_complete(name);
            self.store.save(state).await?;
            tracing::info!(phase = name, "phase complete");
            summary.outcomes.push((name.to_string(), PhaseOutcome::Completed));
        }

        Ok(summary)
    }
}
