use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use kiln_common::SetupState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    /// The state file exists but cannot be decoded. Never auto-repaired.
    #[error("state file {path} is malformed: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("state io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Durable home of a [`SetupState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Existing state, or a fresh default when nothing has been saved yet.
    async fn load(&self) -> Result<SetupState, StateError>;

    async fn save(&self, state: &SetupState) -> Result<(), StateError>;
}
