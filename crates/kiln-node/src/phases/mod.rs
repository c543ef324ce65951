//! The concrete setup phases, in the order they run.

mod artifacts;
mod deploy;
mod hardware;
mod inference;
mod keys;
mod network;
mod prerequisites;
mod registration;
mod wait;

use crate::phase::Phase;

pub use artifacts::ArtifactsPhase;
pub use deploy::DeployPhase;
pub use hardware::{DiskPhase, GpuDetectPhase};
pub use inference::InferenceConfigPhase;
pub use keys::KeysPhase;
pub use network::NetworkPhase;
pub use prerequisites::PrerequisitesPhase;
pub use registration::RegistrationPhase;
pub use wait::{ChainSyncPhase, HealthPhase, ModelLoadPhase};

pub fn all() -> Vec<Box<dyn Phase>> {
    vec![
        Box::new(PrerequisitesPhase),
        Box::new(NetworkPhase),
        Box::new(GpuDetectPhase),
        Box::new(DiskPhase),
        Box::new(InferenceConfigPhase),
        Box::new(KeysPhase),
        Box::new(ArtifactsPhase),
        Box::new(DeployPhase),
        Box::new(ChainSyncPhase),
        Box::new(ModelLoadPhase),
        Box::new(HealthPhase),
        Box::new(RegistrationPhase),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_unique_names() {
        let names: Vec<_> = all().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "prerequisites",
                "network",
                "gpu-detect",
                "disk",
                "inference-config",
                "keys",
                "artifacts",
                "deploy",
                "chain-sync",
                "model-load",
                "health",
                "registration",
            ]
        );
    }
}
