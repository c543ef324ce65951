use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::error::CommandError;

/// Budget for the `docker info` elevation probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// One external invocation, always an explicit argument vector.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, then stdin is closed.
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// An operator-supplied pipeline run via `sh -c`.
    ///
    /// Only for scripts taken verbatim from operator configuration; pass
    /// runtime values through `env`, never by splicing them into `script`.
    pub fn shell(script: &str) -> Self {
        Self::new("sh").args(["-c", script])
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human-readable form for logs and errors. Not for execution.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Launches processes. The executor only ever talks to this seam.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion. A non-zero exit is still `Ok`; only launch
    /// failures and timeouts are errors here.
    async fn run(&self, spec: &CommandSpec, timeout: Duration)
        -> Result<CommandOutput, CommandError>;
}

/// Real processes via `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = spec.cwd.as_ref() {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|source| CommandError::Launch {
            command: spec.display(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (spec.stdin.as_ref(), child.stdin.take()) {
            // a child that exits without reading stdin is not our failure
            let _ = pipe.write_all(input.as_bytes()).await;
            drop(pipe);
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(CommandError::Launch {
                    command: spec.display(),
                    source,
                })
            }
            Err(_) => {
                return Err(CommandError::TimedOut {
                    command: spec.display(),
                    timeout,
                })
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Whether container-runtime calls must go through `sudo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    None,
    Sudo,
}

/// Runs every external call of a setup run.
///
/// The elevation decision is made at most once per executor, i.e. once per
/// run, and is not persisted.
pub struct CommandExecutor {
    runner: Arc<dyn ProcessRunner>,
    default_timeout: Duration,
    runtime: String,
    elevation: OnceCell<Elevation>,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, default_timeout: Duration) -> Self {
        Self {
            runner,
            default_timeout,
            runtime: "docker".to_string(),
            elevation: OnceCell::new(),
        }
    }

    pub fn system(default_timeout: Duration) -> Self {
        Self::new(Arc::new(SystemRunner), default_timeout)
    }

    /// Skip detection, e.g. when the operator already knows the answer.
    pub fn with_elevation(self, elevation: Elevation) -> Self {
        let _ = self.elevation.set(elevation);
        self
    }

    /// Raw run: returns the output whatever the exit status.
    pub async fn probe(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let timeout = spec.timeout.unwrap_or(self.default_timeout);
        tracing::debug!(command=%spec.display(), ?timeout, "exec");
        self.runner.run(spec, timeout).await
    }

    /// Run and require a zero exit status.
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let output = self.probe(spec).await?;
        if output.success() {
            return Ok(output);
        }
        tracing::debug!(
            command=%spec.display(),
            code=?output.code,
            stderr=%output.stderr.trim(),
            "command failed"
        );
        Err(CommandError::Failed {
            command: spec.display(),
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    pub async fn elevation(&self) -> Elevation {
        *self
            .elevation
            .get_or_init(|| self.detect_elevation())
            .await
    }

    async fn detect_elevation(&self) -> Elevation {
        let plain = CommandSpec::new(&self.runtime)
            .arg("info")
            .timeout(PROBE_TIMEOUT);
        match self.probe(&plain).await {
            Ok(out) if out.success() => {
                tracing::debug!(runtime=%self.runtime, "container runtime usable without sudo");
                return Elevation::None;
            }
            Ok(out) => {
                tracing::debug!(stderr=%out.stderr.trim(), "unprivileged runtime probe failed");
            }
            Err(e) => tracing::debug!(error=%e, "unprivileged runtime probe failed"),
        }

        let elevated = CommandSpec::new("sudo")
            .args(["-n", self.runtime.as_str(), "info"])
            .timeout(PROBE_TIMEOUT);
        match self.probe(&elevated).await {
            Ok(out) if out.success() => {
                tracing::info!(runtime=%self.runtime, "container runtime requires sudo");
                Elevation::Sudo
            }
            _ => {
                tracing::warn!(
                    runtime=%self.runtime,
                    "container runtime unreachable with or without sudo; later calls will fail"
                );
                Elevation::None
            }
        }
    }

    /// Build a container-runtime invocation honouring the elevation policy.
    pub async fn runtime_spec<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.elevation().await {
            Elevation::None => CommandSpec::new(&self.runtime).args(args),
            Elevation::Sudo => CommandSpec::new("sudo")
                .args(["-n", self.runtime.as_str()])
                .args(args),
        }
    }

    pub async fn docker<I, S>(&self, args: I) -> Result<CommandOutput, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = self.runtime_spec(args).await;
        self.run(&spec).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned outputs keyed by command prefix and records calls.
    #[derive(Default)]
    pub struct FakeRunner {
        rules: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a reply for any command whose display form starts with
        /// `prefix`. The last queued reply repeats.
        pub fn on(&self, prefix: &str, code: i32, stdout: &str, stderr: &str) -> &Self {
            let out = CommandOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            };
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, queue)) => queue.push_back(out),
                None => rules.push((prefix.to_string(), VecDeque::from([out]))),
            }
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(
            &self,
            spec: &CommandSpec,
            _timeout: Duration,
        ) -> Result<CommandOutput, CommandError> {
            let line = spec.display();
            self.calls.lock().unwrap().push(line.clone());
            let mut rules = self.rules.lock().unwrap();
            // longest prefix wins so specific rules beat generic ones
            let hit = rules
                .iter_mut()
                .filter(|(p, _)| line.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len());
            match hit {
                Some((_, queue)) if queue.len() > 1 => Ok(queue.pop_front().unwrap()),
                Some((_, queue)) => Ok(queue.front().cloned().unwrap()),
                None => Err(CommandError::Launch {
                    command: line,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not faked"),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;

    fn executor(runner: Arc<FakeRunner>) -> CommandExecutor {
        CommandExecutor::new(runner, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_elevation_probed_once_without_sudo() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("docker info", 0, "Server Version: 24.0.7", "");
        runner.on("docker ps", 0, "", "");
        let exec = executor(runner.clone());

        exec.docker(["ps"]).await.unwrap();
        exec.docker(["ps"]).await.unwrap();

        assert_eq!(exec.elevation().await, Elevation::None);
        assert_eq!(runner.count("docker info"), 1);
        assert_eq!(runner.count("sudo"), 0);
        assert_eq!(runner.count("docker ps"), 2);
    }

    #[tokio::test]
    async fn test_elevation_falls_back_to_sudo() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("docker info", 1, "", "permission denied while trying to connect");
        runner.on("sudo -n docker info", 0, "Server Version: 24.0.7", "");
        runner.on("sudo -n docker compose", 0, "", "");
        let exec = executor(runner.clone());

        exec.docker(["compose", "pull"]).await.unwrap();
        exec.docker(["compose", "up", "-d"]).await.unwrap();

        assert_eq!(exec.elevation().await, Elevation::Sudo);
        assert_eq!(runner.count("docker info"), 1);
        assert_eq!(runner.count("sudo -n docker info"), 1);
        assert!(runner
            .calls()
            .contains(&"sudo -n docker compose up -d".to_string()));
    }

    #[tokio::test]
    async fn test_preset_elevation_skips_probe() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("sudo -n docker ps", 0, "", "");
        let exec = executor(runner.clone()).with_elevation(Elevation::Sudo);
        exec.docker(["ps"]).await.unwrap();
        assert_eq!(runner.count("docker info"), 0);
        assert_eq!(runner.count("sudo -n docker info"), 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_output() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("nvidia-smi", 9, "", "NVIDIA-SMI has failed because it couldn't communicate");
        let exec = executor(runner);
        let err = exec.run(&CommandSpec::new("nvidia-smi")).await.unwrap_err();
        match err {
            CommandError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(9));
                assert!(stderr.contains("couldn't communicate"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_times_out() {
        let exec = CommandExecutor::system(Duration::from_millis(200));
        let err = exec
            .run(&CommandSpec::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_feeds_stdin() {
        let exec = CommandExecutor::system(Duration::from_secs(5));
        let out = exec
            .run(&CommandSpec::new("cat").stdin("pw\npw\n"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "pw\npw\n");
    }

    #[test]
    fn test_display_joins_args() {
        let spec = CommandSpec::new("docker").args(["compose", "-f", "/srv/compose.yml", "ps"]);
        assert_eq!(spec.display(), "docker compose -f /srv/compose.yml ps");
    }
}
