use async_trait::async_trait;
use kiln_common::{min_memory_mb, SetupState};

use crate::error::SetupError;
use crate::phase::{Phase, PhaseContext};
use crate::recommend::recommend;

/// Recomputes the engine configuration from the recorded GPUs. Runs every
/// time so a changed recommendation table or override takes effect.
pub struct InferenceConfigPhase;

#[async_trait]
impl Phase for InferenceConfigPhase {
    fn name(&self) -> &'static str {
        "inference-config"
    }

    fn description(&self) -> &'static str {
        "Choosing model and parallelism"
    }

    fn should_run(&self, _state: &SetupState) -> bool {
        true
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let first = state
            .gpus
            .first()
            .ok_or_else(|| SetupError::validation("no GPU inventory recorded; run gpu-detect first"))?;
        let arch = first.arch;
        if state.gpus.iter().any(|g| g.arch != arch) {
            tracing::warn!(%arch, "mixed GPU architectures, configuring for the first GPU");
        }
        let count = u32::try_from(state.gpus.len()).unwrap_or(u32::MAX);
        let per_gpu_mb = min_memory_mb(&state.gpus);
        let nvlink = state.gpu_topology.as_ref().is_some_and(|t| t.nvlink);

        let rec = recommend(count, per_gpu_mb, arch, nvlink);
        if let Some(w) = rec.warning.as_deref() {
            tracing::warn!(warning = w, "configuration note");
        }
        rec.apply_to(&mut state.inference);

        if let Some(model) = ctx.overrides.model.as_ref() {
            tracing::info!(recommended=%rec.model, %model, "model overridden");
            state.inference.model = Some(model.clone());
        }
        if let Some(tp) = ctx.overrides.tensor_parallel {
            let pp = state.inference.pipeline_parallel_size.max(1);
            if tp == 0 || u64::from(tp) * u64::from(pp) > u64::from(count) {
                return Err(SetupError::validation(format!(
                    "tensor-parallel {tp} with pipeline-parallel {pp} needs more than the {count} GPUs present"
                )));
            }
            tracing::info!(recommended = rec.tensor_parallel_size, tp, "tensor-parallel overridden");
            state.inference.tensor_parallel_size = tp;
        }

        let inf = &state.inference;
        tracing::info!(
            model = inf.model.as_deref().unwrap_or("-"),
            tp = inf.tensor_parallel_size,
            pp = inf.pipeline_parallel_size,
            mem = inf.gpu_memory_utilization,
            max_len = inf.max_model_len,
            kv_cache=%inf.kv_cache_dtype,
            backend=%inf.attention_backend,
            variant=%inf.image_variant,
            "inference configuration"
        );
        Ok(())
    }
}
