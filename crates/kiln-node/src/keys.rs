use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_common::KeyState;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{CommandError, SetupError};
use crate::exec::CommandExecutor;

pub const PASSWORD_FILE_NAME: &str = ".keyring-password";
pub const MNEMONIC_FILE_NAME: &str = ".account-mnemonic";

const PASSWORD_LEN: usize = 32;
#[cfg(unix)]
const SECRET_FILE_MODE: u32 = 0o600;
/// Where the host keyring directory is mounted inside the CLI container.
const CONTAINER_KEYRING_DIR: &str = "/keyring";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKey {
    pub address: String,
    pub pubkey: String,
    /// Only present right after creation.
    pub mnemonic: Option<String>,
}

/// Account-key operations. Key material is generated by the chain CLI;
/// this side only drives it.
#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn show(&self, keys: &KeyState, password: &str) -> Result<Option<AccountKey>, SetupError>;

    async fn create(&self, keys: &KeyState, password: &str) -> Result<AccountKey, SetupError>;
}

/// Runs the chain CLI from the node image with the host keyring mounted.
pub struct ImageKeyManager {
    exec: Arc<CommandExecutor>,
    image: String,
    cli: String,
    keyring_dir: PathBuf,
}

impl ImageKeyManager {
    pub fn new(
        exec: Arc<CommandExecutor>,
        image: impl Into<String>,
        cli: impl Into<String>,
        keyring_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            exec,
            image: image.into(),
            cli: cli.into(),
            keyring_dir: keyring_dir.into(),
        }
    }

    fn keys_args(&self, keys: &KeyState, verb: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "-v".to_string(),
            format!("{}:{CONTAINER_KEYRING_DIR}", self.keyring_dir.display()),
            self.image.clone(),
            self.cli.clone(),
            "keys".to_string(),
            verb.to_string(),
            keys.key_name.clone(),
            "--keyring-backend".to_string(),
            keys.keyring_backend.clone(),
            "--keyring-dir".to_string(),
            CONTAINER_KEYRING_DIR.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ]
    }
}

#[async_trait]
impl KeyManager for ImageKeyManager {
    async fn show(&self, keys: &KeyState, password: &str) -> Result<Option<AccountKey>, SetupError> {
        let spec = self
            .exec
            .runtime_spec(self.keys_args(keys, "show"))
            .await
            .stdin(format!("{password}\n"));
        match self.exec.run(&spec).await {
            Ok(out) => Ok(parse_key_json(&out.stdout)),
            Err(CommandError::Failed { stderr, .. }) if is_missing_key(&stderr) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, keys: &KeyState, password: &str) -> Result<AccountKey, SetupError> {
        fs::create_dir_all(&self.keyring_dir)
            .await
            .map_err(|e| SetupError::io(&self.keyring_dir, e))?;
        // a fresh file keyring asks for the passphrase twice
        let spec = self
            .exec
            .runtime_spec(self.keys_args(keys, "add"))
            .await
            .stdin(format!("{password}\n{password}\n"));
        let out = self.exec.run(&spec).await?;
        // some CLI versions print the JSON on stderr
        parse_key_json(&out.stdout)
            .or_else(|| parse_key_json(&out.stderr))
            .ok_or_else(|| SetupError::validation("key creation printed no account address"))
    }
}

fn is_missing_key(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("no such key")
}

/// Find the first JSON object in `text` that has an `address`.
pub fn parse_key_json(text: &str) -> Option<AccountKey> {
    let value: serde_json::Value = text
        .lines()
        .filter(|l| l.trim_start().starts_with('{'))
        .find_map(|l| serde_json::from_str(l.trim()).ok())
        .or_else(|| serde_json::from_str(text.trim()).ok())?;
    let address = value.get("address")?.as_str()?.to_string();
    let pubkey = match value.get("pubkey") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let mnemonic = value
        .get("mnemonic")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string());
    Some(AccountKey {
        address,
        pubkey,
        mnemonic,
    })
}

pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Read the keyring password left by an earlier run, if any.
pub async fn recover_password(dir: &Path) -> Result<Option<String>, SetupError> {
    let path = dir.join(PASSWORD_FILE_NAME);
    match fs::read_to_string(&path).await {
        Ok(raw) => Ok(Some(raw.trim().to_string()).filter(|p| !p.is_empty())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SetupError::io(path, e)),
    }
}

pub async fn store_password(dir: &Path, password: &str) -> Result<PathBuf, SetupError> {
    write_secret(&dir.join(PASSWORD_FILE_NAME), password).await
}

/// Write `content` readable by the owner only. The file never exists with
/// wider permissions, not even briefly.
pub async fn write_secret(path: &Path, content: &str) -> Result<PathBuf, SetupError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SetupError::io(parent, e))?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(SECRET_FILE_MODE);
    let mut file = options.open(path).await.map_err(|e| SetupError::io(path, e))?;
    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(SECRET_FILE_MODE))
            .await
            .map_err(|e| SetupError::io(path, e))?;
    }
    file.write_all(format!("{content}\n").as_bytes())
        .await
        .map_err(|e| SetupError::io(path, e))?;
    file.flush().await.map_err(|e| SetupError::io(path, e))?;
    Ok(path.to_path_buf())
}
