use std::path::PathBuf;
use std::time::Duration;

use crate::error::CommandError;
use crate::exec::{CommandExecutor, CommandOutput};
use crate::parse::{parse_compose_ps, ServiceState};

/// `docker compose` bound to one project file and env file.
pub struct Compose<'a> {
    exec: &'a CommandExecutor,
    file: PathBuf,
    env_file: PathBuf,
}

impl<'a> Compose<'a> {
    pub fn new(exec: &'a CommandExecutor, file: impl Into<PathBuf>, env_file: impl Into<PathBuf>) -> Self {
        Self {
            exec,
            file: file.into(),
            env_file: env_file.into(),
        }
    }

    async fn compose<I, S>(&self, args: I, timeout: Option<Duration>) -> Result<CommandOutput, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let base = [
            "compose".to_string(),
            "-f".to_string(),
            self.file.display().to_string(),
            "--env-file".to_string(),
            self.env_file.display().to_string(),
        ];
        let mut spec = self
            .exec
            .runtime_spec(base.into_iter().chain(args.into_iter().map(Into::into)))
            .await;
        spec.timeout = timeout;
        self.exec.run(&spec).await
    }

    pub async fn pull(&self, timeout: Duration) -> Result<(), CommandError> {
        self.compose(["pull"], Some(timeout)).await.map(|_| ())
    }

    pub async fn up(&self, timeout: Duration) -> Result<(), CommandError> {
        self.compose(["up", "-d"], Some(timeout)).await.map(|_| ())
    }

    pub async fn ps(&self) -> Result<Vec<ServiceState>, CommandError> {
        let out = self.compose(["ps", "--format", "json"], None).await?;
        Ok(parse_compose_ps(&out.stdout))
    }

    /// Run `cmd` inside a running service, without a TTY.
    pub async fn exec(&self, service: &str, cmd: &[String]) -> Result<CommandOutput, CommandError> {
        let args = ["exec".to_string(), "-T".to_string(), service.to_string()]
            .into_iter()
            .chain(cmd.iter().cloned());
        self.compose(args, None).await
    }
}
