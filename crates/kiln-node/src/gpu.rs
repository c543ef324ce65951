use kiln_common::{DiskMetrics, DriverInfo, GpuDescriptor, GpuTopology};

use crate::error::SetupError;
use crate::exec::{CommandExecutor, CommandSpec};
use crate::parse::{
    parse_df_output, parse_driver_info, parse_gpu_inventory, parse_nvlink_present, parse_pcie_gen,
};

pub async fn read_gpu_inventory(exec: &CommandExecutor) -> Result<Vec<GpuDescriptor>, SetupError> {
    let spec = CommandSpec::new("nvidia-smi")
        .arg("--query-gpu=index,name,memory.total,pci.bus_id")
        .arg("--format=csv,noheader,nounits");
    let output = exec.run(&spec).await?;
    Ok(parse_gpu_inventory(&output.stdout))
}

/// Best effort: a driver without `topo` support reads as "no NVLink".
pub async fn read_gpu_topology(exec: &CommandExecutor) -> GpuTopology {
    let nvlink = match exec.run(&CommandSpec::new("nvidia-smi").args(["topo", "-m"])).await {
        Ok(out) => parse_nvlink_present(&out.stdout),
        Err(e) => {
            tracing::warn!(error=%e, "could not read GPU topology, assuming PCIe only");
            false
        }
    };

    let pcie_spec = CommandSpec::new("nvidia-smi")
        .arg("--query-gpu=pcie.link.gen.max")
        .arg("--format=csv,noheader,nounits");
    let pcie_gen = match exec.run(&pcie_spec).await {
        Ok(out) => parse_pcie_gen(&out.stdout),
        Err(e) => {
            tracing::debug!(error=%e, "pcie generation query failed");
            None
        }
    };

    GpuTopology { nvlink, pcie_gen }
}

pub async fn read_driver_info(exec: &CommandExecutor) -> Result<DriverInfo, SetupError> {
    let output = exec.run(&CommandSpec::new("nvidia-smi")).await?;
    parse_driver_info(&output.stdout).ok_or_else(|| {
        SetupError::validation("nvidia-smi ran but reported no driver version")
    })
}

/// Disk usage of the filesystem holding `path` via `df -B1`, falling back
/// to BSD-style `df -k`.
pub async fn read_disk_usage(exec: &CommandExecutor, path: &str) -> Option<DiskMetrics> {
    let gnu = CommandSpec::new("df").args(["-B1", path]);
    let parsed = match exec.run(&gnu).await {
        Ok(out) => parse_df_output(&out.stdout, 1),
        Err(_) => {
            let bsd = CommandSpec::new("df").args(["-k", path]);
            let out = exec.run(&bsd).await.ok()?;
            parse_df_output(&out.stdout, 1024)
        }
    };
    let (total_bytes, used_bytes, available_bytes) = parsed?;
    Some(DiskMetrics {
        path: path.to_string(),
        total_bytes,
        used_bytes,
        available_bytes,
    })
}
