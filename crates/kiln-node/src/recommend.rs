//! GPU-driven inference configuration.
//!
//! `recommend` is a pure decision table over aggregate VRAM (GPU count ×
//! per-GPU memory). Tiers are checked top-down and a value exactly on a
//! threshold belongs to the higher tier. Architecture only picks the image
//! variant and attention backend.

use kiln_common::{GpuArch, InferenceSettings};

pub const LARGE_TIER_MB: u64 = 320_000;
pub const MID_TIER_MB: u64 = 80_000;
pub const SMALL_TIER_MB: u64 = 40_000;

/// At or below this per-GPU size the large model only fits with an fp8 KV cache.
pub const FP8_KV_MAX_PER_GPU_MB: u64 = 41_000;
/// Below this per-GPU size the mid tier runs with tighter margins.
pub const MID_TIGHT_PER_GPU_MB: u64 = 30_000;

pub const LARGE_MODEL: &str = "Qwen/Qwen3-235B-A22B-Instruct-2507-FP8";
pub const MID_MODEL: &str = "Qwen/Qwen3-32B-FP8";
pub const SMALL_MODEL: &str = "Qwen/Qwen2.5-7B-Instruct";

pub const KV_CACHE_AUTO: &str = "auto";
pub const KV_CACHE_FP8: &str = "fp8";

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub model: String,
    pub tensor_parallel_size: u32,
    pub pipeline_parallel_size: u32,
    pub gpu_memory_utilization: f32,
    pub max_model_len: u32,
    pub kv_cache_dtype: String,
    pub image_variant: String,
    pub attention_backend: String,
    /// Non-fatal compatibility note to surface to the operator.
    pub warning: Option<String>,
}

impl Recommendation {
    pub fn apply_to(&self, settings: &mut InferenceSettings) {
        settings.model = Some(self.model.clone());
        settings.tensor_parallel_size = self.tensor_parallel_size;
        settings.pipeline_parallel_size = self.pipeline_parallel_size;
        settings.gpu_memory_utilization = self.gpu_memory_utilization;
        settings.max_model_len = self.max_model_len;
        settings.kv_cache_dtype = self.kv_cache_dtype.clone();
        settings.image_variant = self.image_variant.clone();
        settings.attention_backend = self.attention_backend.clone();
    }
}

struct Shape {
    model: &'static str,
    tp: u32,
    pp: u32,
    mem: f32,
    max_len: u32,
    warning: Option<String>,
}

pub fn recommend(gpu_count: u32, per_gpu_mb: u64, arch: GpuArch, nvlink: bool) -> Recommendation {
    let aggregate_mb = u64::from(gpu_count).saturating_mul(per_gpu_mb);
    let mut kv_cache = KV_CACHE_AUTO;

    let shape = if aggregate_mb >= LARGE_TIER_MB {
        if per_gpu_mb <= FP8_KV_MAX_PER_GPU_MB {
            kv_cache = KV_CACHE_FP8;
        }
        large_tier(gpu_count, nvlink)
    } else if aggregate_mb >= MID_TIER_MB {
        let tight = per_gpu_mb < MID_TIGHT_PER_GPU_MB;
        Shape {
            model: MID_MODEL,
            tp: gpu_count,
            pp: 1,
            mem: if tight { 0.90 } else { 0.92 },
            max_len: if tight { 24_576 } else { 32_768 },
            warning: None,
        }
    } else if aggregate_mb >= SMALL_TIER_MB {
        Shape {
            model: SMALL_MODEL,
            tp: gpu_count,
            pp: 1,
            mem: 0.88,
            max_len: 16_384,
            warning: None,
        }
    } else {
        Shape {
            model: SMALL_MODEL,
            tp: 1,
            pp: 1,
            mem: 0.95,
            max_len: 8_192,
            warning: None,
        }
    };

    let (image_variant, attention_backend) = backend_for(arch);
    Recommendation {
        model: shape.model.to_string(),
        tensor_parallel_size: shape.tp,
        pipeline_parallel_size: shape.pp,
        gpu_memory_utilization: shape.mem,
        max_model_len: shape.max_len,
        kv_cache_dtype: kv_cache.to_string(),
        image_variant: image_variant.to_string(),
        attention_backend: attention_backend.to_string(),
        warning: shape.warning,
    }
}

fn large_tier(gpu_count: u32, nvlink: bool) -> Shape {
    match (gpu_count >= 8, nvlink) {
        (true, true) => Shape {
            model: LARGE_MODEL,
            tp: 8,
            pp: 1,
            mem: 0.90,
            max_len: 240_000,
            warning: None,
        },
        (true, false) => Shape {
            model: LARGE_MODEL,
            tp: 4,
            pp: 2,
            mem: 0.90,
            max_len: 120_000,
            warning: Some(
                "no NVLink detected: using pipeline-parallel 2; some engine features \
                 (e.g. speculative decoding, chunked prefill tuning) are unsupported with \
                 pipeline-parallel > 1"
                    .to_string(),
            ),
        },
        (false, _) => Shape {
            model: LARGE_MODEL,
            tp: gpu_count,
            pp: 1,
            mem: 0.85,
            max_len: 32_768,
            warning: None,
        },
    }
}

/// (image variant, attention backend) for an architecture.
///
/// Blackwell lacks the legacy flash-attention kernels shipped in the default
/// image.
pub fn backend_for(arch: GpuArch) -> (&'static str, &'static str) {
    match arch {
        GpuArch::Blackwell => ("blackwell", "FLASHINFER"),
        _ => ("default", "FLASH_ATTN"),
    }
}

/// Ordered most specific first: several names contain a shorter one
/// ("RTX 6000 ADA" vs "QUADRO RTX 6000", "L40S" vs "L4", "A100" vs "A10").
const ARCH_PATTERNS: &[(&str, GpuArch)] = &[
    ("GB200", GpuArch::Blackwell),
    ("B200", GpuArch::Blackwell),
    ("B100", GpuArch::Blackwell),
    ("RTX PRO 6000", GpuArch::Blackwell),
    ("GH200", GpuArch::Hopper),
    ("H200", GpuArch::Hopper),
    ("H100", GpuArch::Hopper),
    ("H800", GpuArch::Hopper),
    ("H20", GpuArch::Hopper),
    ("RTX 6000 ADA", GpuArch::Ada),
    ("RTX 5000 ADA", GpuArch::Ada),
    ("RTX 4000 ADA", GpuArch::Ada),
    ("RTX 4000 SFF ADA", GpuArch::Ada),
    ("RTX 2000 ADA", GpuArch::Ada),
    ("L40S", GpuArch::Ada),
    ("L40", GpuArch::Ada),
    ("L20", GpuArch::Ada),
    ("L4", GpuArch::Ada),
    ("RTX A6000", GpuArch::Ampere),
    ("RTX A5000", GpuArch::Ampere),
    ("RTX A4000", GpuArch::Ampere),
    ("A100", GpuArch::Ampere),
    ("A800", GpuArch::Ampere),
    ("A40", GpuArch::Ampere),
    ("A30", GpuArch::Ampere),
    ("A10", GpuArch::Ampere),
    ("QUADRO RTX", GpuArch::Turing),
    ("TITAN RTX", GpuArch::Turing),
    ("T4", GpuArch::Turing),
    ("V100", GpuArch::Volta),
    ("TITAN V", GpuArch::Volta),
];

/// GeForce series prefixes. Only a model number follows ("RTX 5090"), which
/// keeps workstation boards ("RTX 5000 Ada", "Quadro RTX 4000") out.
const GEFORCE_SERIES: &[(&str, GpuArch)] = &[
    ("RTX 50", GpuArch::Blackwell),
    ("RTX 40", GpuArch::Ada),
    ("RTX 30", GpuArch::Ampere),
    ("RTX 20", GpuArch::Turing),
];

fn has_series(upper: &str, prefix: &str) -> bool {
    upper.match_indices(prefix).any(|(i, _)| {
        upper[i + prefix.len()..]
            .chars()
            .next()
            .is_some_and(|c| ('1'..='9').contains(&c))
    })
}

/// Map a raw accelerator name to its architecture family. Unrecognized
/// names yield [`GpuArch::Unknown`].
pub fn arch_from_name(name: &str) -> GpuArch {
    let upper = name.to_ascii_uppercase();
    ARCH_PATTERNS
        .iter()
        .find(|(pat, _)| upper.contains(pat))
        .or_else(|| GEFORCE_SERIES.iter().find(|(pat, _)| has_series(&upper, pat)))
        .map(|(_, arch)| *arch)
        .unwrap_or(GpuArch::Unknown)
}
