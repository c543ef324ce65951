//! Pure parsers for the text printed by `nvidia-smi`, `docker` and `df`.
//!
//! None of these fail hard: unparseable lines are skipped and missing values
//! come back as `None`, leaving the caller to decide what is fatal.

use kiln_common::{DriverInfo, GpuDescriptor};

use crate::recommend::arch_from_name;

/// Parse `nvidia-smi --query-gpu=index,name,memory.total,pci.bus_id
/// --format=csv,noheader,nounits`.
pub fn parse_gpu_inventory(csv: &str) -> Vec<GpuDescriptor> {
    let mut out = Vec::new();
    for (line_no, line) in csv.lines().enumerate() {
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() < 3 {
            continue;
        }
        let Ok(memory_mb) = parts[2].parse::<u64>() else {
            tracing::debug!(line=%line, "skipping gpu row without numeric memory");
            continue;
        };
        let index = parts[0].parse::<u32>().unwrap_or(line_no as u32);
        let name = parts[1].to_string();
        out.push(GpuDescriptor {
            index,
            arch: arch_from_name(&name),
            name,
            memory_mb,
            bus_id: parts.get(3).map(|s| s.to_string()).unwrap_or_default(),
        });
    }
    out
}

/// True when any cell of the `nvidia-smi topo -m` matrix is an NVLink
/// connection (`NV1`, `NV12`, ...).
pub fn parse_nvlink_present(matrix: &str) -> bool {
    matrix
        .lines()
        .filter(|l| l.trim_start().starts_with("GPU"))
        .flat_map(|l| l.split_whitespace().skip(1))
        .any(is_nvlink_cell)
}

fn is_nvlink_cell(cell: &str) -> bool {
    cell.strip_prefix("NV")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Highest PCIe generation from `--query-gpu=pcie.link.gen.max`.
pub fn parse_pcie_gen(csv: &str) -> Option<u32> {
    csv.lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .max()
}

/// Pull driver and CUDA versions out of the plain `nvidia-smi` banner.
pub fn parse_driver_info(banner: &str) -> Option<DriverInfo> {
    let driver_version = value_after(banner, "Driver Version:")?;
    Some(DriverInfo {
        driver_version,
        cuda_version: value_after(banner, "CUDA Version:"),
    })
}

fn value_after(text: &str, label: &str) -> Option<String> {
    let idx = text.find(label)?;
    let rest = &text[idx + label.len()..];
    rest.split_whitespace()
        .next()
        .map(|v| v.trim_end_matches('|').to_string())
        .filter(|v| !v.is_empty())
}

/// Loose `major.minor.patch`. Ordering is field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn at_least(&self, min: Version) -> bool {
        *self >= min
    }

    /// Accepts `24.0.7`, `v2.24.5`, `2.24.5-desktop.1`, `20.10`.
    pub fn parse(raw: &str) -> Option<Version> {
        let raw = raw.trim().trim_start_matches('v');
        let mut nums = raw.split('.').map(leading_number);
        let major = nums.next()??;
        let minor = nums.next().flatten().unwrap_or(0);
        let patch = nums.next().flatten().unwrap_or(0);
        Some(Version::new(major, minor, patch))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// `Docker version 24.0.7, build afdd53b`
pub fn parse_docker_version(text: &str) -> Option<Version> {
    version_token(text)
}

/// `Docker Compose version v2.24.5` or legacy
/// `docker-compose version 1.29.2, build 5becea4c`.
pub fn parse_compose_version(text: &str) -> Option<Version> {
    version_token(text)
}

fn version_token(text: &str) -> Option<Version> {
    let line = text.lines().find(|l| l.to_ascii_lowercase().contains("version"))?;
    let lower = line.to_ascii_lowercase();
    let after = &line[lower.find("version")? + "version".len()..];
    after
        .split_whitespace()
        .map(|t| t.trim_end_matches(','))
        .find(|t| t.trim_start_matches('v').starts_with(|c: char| c.is_ascii_digit()))
        .and_then(Version::parse)
}

/// Parse `df -B1 <path>`: (total, used, available) bytes from the first
/// data row. Multiplies by `block_size` for `df -k` style output.
pub fn parse_df_output(output: &str, block_size: u64) -> Option<(u64, u64, u64)> {
    // Filesystem     1B-blocks         Used    Available Use% Mounted on
    // /dev/sda1      2000000000000 1500000000000 500000000000  75% /DATA
    let line = output.lines().nth(1)?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    let total = parts[1].parse::<u64>().ok()?.saturating_mul(block_size);
    let used = parts[2].parse::<u64>().ok()?.saturating_mul(block_size);
    let available = parts[3].parse::<u64>().ok()?.saturating_mul(block_size);
    Some((total, used, available))
}

/// One row of `docker compose ps --format json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub service: String,
    pub state: String,
    pub health: Option<String>,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Compose v2 prints either one JSON array or one object per line
/// depending on version; accept both.
pub fn parse_compose_ps(text: &str) -> Vec<ServiceState> {
    let trimmed = text.trim();
    let values: Vec<serde_json::Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).unwrap_or_default()
    } else {
        trimmed
            .lines()
            .filter_map(|l| serde_json::from_str(l.trim()).ok())
            .collect()
    };

    values
        .iter()
        .filter_map(|v| {
            let service = v.get("Service")?.as_str()?.to_string();
            let state = v
                .get("State")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string();
            let health = v
                .get("Health")
                .and_then(|h| h.as_str())
                .filter(|h| !h.is_empty())
                .map(|h| h.to_string());
            Some(ServiceState {
                service,
                state,
                health,
            })
        })
        .collect()
}
