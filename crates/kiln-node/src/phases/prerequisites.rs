use async_trait::async_trait;
use kiln_common::SetupState;

use crate::config::{MIN_COMPOSE, MIN_DOCKER};
use crate::error::SetupError;
use crate::exec::CommandSpec;
use crate::gpu::read_driver_info;
use crate::parse::{parse_compose_version, parse_docker_version, Version};
use crate::phase::{Phase, PhaseContext};

pub struct PrerequisitesPhase;

#[async_trait]
impl Phase for PrerequisitesPhase {
    fn name(&self) -> &'static str {
        "prerequisites"
    }

    fn description(&self) -> &'static str {
        "Checking container runtime and NVIDIA driver"
    }

    async fn run(&self, ctx: &PhaseContext, state: &mut SetupState) -> Result<(), SetupError> {
        let exec = &ctx.exec;

        let out = exec.run(&CommandSpec::new("docker").arg("--version")).await?;
        let docker = require_version("docker", parse_docker_version(&out.stdout), MIN_DOCKER)?;

        let out = exec
            .run(&CommandSpec::new("docker").args(["compose", "version"]))
            .await?;
        let compose = require_version("docker compose", parse_compose_version(&out.stdout), MIN_COMPOSE)?;

        let elevation = exec.elevation().await;
        // the elevation probe tolerates an unreachable daemon; this does not
        exec.docker(["info", "--format", "{{.ServerVersion}}"]).await?;

        let driver = read_driver_info(exec).await?;
        tracing::info!(
            %docker,
            %compose,
            ?elevation,
            driver=%driver.driver_version,
            cuda=driver.cuda_version.as_deref().unwrap_or("-"),
            "prerequisites satisfied"
        );

        state.runtime.docker = Some(docker.to_string());
        state.runtime.compose = Some(compose.to_string());
        state.driver = Some(driver);
        Ok(())
    }
}

fn require_version(tool: &str, found: Option<Version>, min: Version) -> Result<Version, SetupError> {
    let version = found.ok_or_else(|| SetupError::validation(format!("could not read {tool} version")))?;
    if !version.at_least(min) {
        return Err(SetupError::validation(format!(
            "{tool} {version} is too old, need {min} or newer"
        )));
    }
    Ok(version)
}
