use async_trait::async_trait;
use kiln_common::SetupState;
use tokio::fs;

use crate::error::SetupError;
use crate::gpu::{read_disk_usage, read_gpu_inventory, read_gpu_topology};
use crate::operator::DecisionPoint;
use crate::phase::{Phase, PhaseContext};

const GIB: u64 = 1024 * 1024 * 1024;

pub struct GpuDetectPhase;

#[async_trait]
impl Phase for GpuDetectPhase {
    fn name(&self) -> &'static str {
        "gpu-detect"
    }

    fn description(&self) -> &'static str {
        "Detecting GPUs and interconnect"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let gpus = read_gpu_inventory(&ctx.exec).await?;
        if gpus.is_empty() {
            return Err(SetupError::validation("no NVIDIA GPUs detected"));
        }
        for gpu in &gpus {
            tracing::info!(
                index = gpu.index,
                name=%gpu.name,
                memory_mb = gpu.memory_mb,
                arch=%gpu.arch,
                "gpu"
            );
        }

        let topology = read_gpu_topology(&ctx.exec).await;
        tracing::info!(
            count = gpus.len(),
            nvlink = topology.nvlink,
            pcie_gen = ?topology.pcie_gen,
            "gpu topology"
        );

        state.gpus = gpus;
        state.gpu_topology = Some(topology);
        Ok(())
    }
}

pub struct DiskPhase;

#[async_trait]
impl Phase for DiskPhase {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn description(&self) -> &'static str {
        "Checking free disk space"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let dir = &ctx.config.output_dir;
        fs::create_dir_all(dir)
            .await
            .map_err(|e| SetupError::io(dir, e))?;

        let path = dir.display().to_string();
        let Some(disk) = read_disk_usage(&ctx.exec, &path).await else {
            tracing::warn!(%path, "could not measure free disk space");
            return Ok(());
        };

        let min = ctx.config.min_free_disk_bytes;
        tracing::info!(
            %path,
            available_gib = disk.available_bytes / GIB,
            required_gib = min / GIB,
            "disk space"
        );
        if disk.available_bytes < min {
            if !ctx.operator.decide(DecisionPoint::LowDiskSpace).await {
                return Err(SetupError::validation(format!(
                    "only {} GiB free under {path}, need {} GiB",
                    disk.available_bytes / GIB,
                    min / GIB
                )));
            }
            tracing::warn!(
                %path,
                available_gib = disk.available_bytes / GIB,
                "continuing with low disk space"
            );
        }
        state.disk = Some(disk);
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

    const INVENTORY: &str = "0, NVIDIA H100 80GB HBM3, 81559, 00000000:18:00.0\n1, NVIDIA H100 80GB HBM3, 81559, 00000000:2A:00.0\n";
    const TOPO: &str = "\tGPU0\tGPU1\tCPU Affinity\nGPU0\t X \tNV18\t0-55\nGPU1\tNV18\t X \t0-55\n";

    #[tokio::test]
    async fn test_gpu_detect_records_inventory() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.on("nvidia-smi --query-gpu=index", 0, INVENTORY, "");
        runner.on("nvidia-smi topo", 0, TOPO, "");
        runner.on("nvidia-smi --query-gpu=pcie", 0, "5\n5\n", "");
        let ctx = context(tmp.path(), runner, Overrides::default());
        let mut state = SetupState::new(tmp.path());

        GpuDetectPhase.run(&ctx, &mut state).await.unwrap();

        assert_eq!(state.gpus.len(), 2);
        assert_eq!(state.gpus[1].bus_id, "00000000:2A:00.0");
        let topo = state.gpu_topology.unwrap();
        assert!(topo.nvlink);
        assert_eq!(topo.pcie_gen, Some(5));
    }

    #[tokio::test]
    async fn test_zero_gpus_is_validation_error() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.on("nvidia-smi --query-gpu=index", 0, "", "");
        let ctx = context(tmp.path(), runner, Overrides::default());
        let mut state = SetupState::new(tmp.path());

        let err = GpuDetectPhase.run(&ctx, &mut state).await.unwrap_err();
        assert!(matches!(err, SetupError::Validation(_)));
    }

    fn df_runner(available: u64) -> Arc<FakeRunner> {
        let runner = Arc::new(FakeRunner::new());
        let out = format!(
            "Filesystem 1B-blocks Used Available Use% Mounted on\n/dev/nvme0n1p2 {} 0 {available} 1% /\n",
            available
        );
        runner.on("df -B1", 0, &out, "");
        runner
    }

    #[tokio::test]
    async fn test_low_disk_aborts_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context(tmp.path(), df_runner(10 * GIB), Overrides::default());
        ctx.config.min_free_disk_bytes = 100 * GIB;
        let mut state = SetupState::new(tmp.path());

        let err = DiskPhase.run(&ctx, &mut state).await.unwrap_err();
        assert!(err.to_string().contains("10 GiB free"), "got {err}");
        assert!(state.disk.is_none());
    }

    #[tokio::test]
    async fn test_low_disk_continues_when_operator_agrees() {
        let tmp = tempfile::tempdir().unwrap();
        let mut overrides = Overrides::default();
        overrides.decisions.insert(DecisionPoint::LowDiskSpace, true);
        let mut ctx = context(tmp.path(), df_runner(10 * GIB), overrides);
        ctx.config.min_free_disk_bytes = 100 * GIB;
        let mut state = SetupState::new(tmp.path());

        DiskPhase.run(&ctx, &mut state).await.unwrap();
        assert_eq!(state.disk.unwrap().available_bytes, 10 * GIB);
    }
}
