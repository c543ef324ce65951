use std::io;
use std::path::PathBuf;
use std::time::Duration;

use kiln_state::StateError;
use thiserror::Error;

/// Failure of a single external process invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("`{command}` exited with {}: {}", exit_label(.code), last_line(.stderr, .stdout))]
    Failed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "signal".to_string(),
    }
}

fn last_line<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(str::trim)
        .unwrap_or("<no output>")
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{what} not ready after {elapsed:?}")]
    Timeout { what: String, elapsed: Duration },

    #[error("cancelled while {what}")]
    Cancelled { what: String },

    /// A precondition recorded by an earlier phase is missing.
    #[error("{0}")]
    Validation(String),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("phase `{phase}` failed: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<SetupError>,
    },
}

impl SetupError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SetupError::Validation(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SetupError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            SetupError::Cancelled { .. } => true,
            SetupError::Phase { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_message_prefers_stderr_tail() {
        let err = CommandError::Failed {
            command: "docker compose pull".into(),
            code: Some(1),
            stdout: "Pulling api ...\n".into(),
            stderr: "warning: old config\nerror: manifest unknown\n\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "`docker compose pull` exited with status 1: error: manifest unknown"
        );
    }

    #[test]
    fn test_failed_message_falls_back_to_stdout() {
        let err = CommandError::Failed {
            command: "nvidia-smi".into(),
            code: None,
            stdout: "NVIDIA-SMI has failed\n".into(),
            stderr: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "`nvidia-smi` exited with signal: NVIDIA-SMI has failed"
        );
    }

    #[test]
    fn test_cancellation_seen_through_phase_wrapper() {
        let err = SetupError::Phase {
            phase: "chain-sync".into(),
            source: Box::new(SetupError::Cancelled {
                what: "waiting for chain sync".into(),
            }),
        };
        assert!(err.is_cancelled());
        assert!(!SetupError::validation("no gpus").is_cancelled());
    }
}
