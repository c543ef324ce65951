use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized accelerator architecture family.
///
/// `Unknown` is a real value, not an error: unrecognized cards still get a
/// configuration, just the default backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuArch {
    Blackwell,
    Hopper,
    Ada,
    Ampere,
    Turing,
    Volta,
    #[default]
    Unknown,
}

impl GpuArch {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuArch::Blackwell => "blackwell",
            GpuArch::Hopper => "hopper",
            GpuArch::Ada => "ada",
            GpuArch::Ampere => "ampere",
            GpuArch::Turing => "turing",
            GpuArch::Volta => "volta",
            GpuArch::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected accelerator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GpuDescriptor {
    pub index: u32,
    pub name: String,
    pub memory_mb: u64,
    #[serde(default)]
    pub arch: GpuArch,
    /// PCI bus id as reported by the driver, e.g. "00000000:17:00.0".
    #[serde(default)]
    pub bus_id: String,
}

/// Interconnect classification for the whole GPU set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GpuTopology {
    pub nvlink: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcie_gen: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverInfo {
    pub driver_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda_version: Option<String>,
}

/// Summary used by the recommendation engine.
///
/// Heterogeneous sets are sized by their smallest card.
pub fn min_memory_mb(gpus: &[GpuDescriptor]) -> u64 {
    gpus.iter().map(|g| g.memory_mb).min().unwrap_or(0)
}
