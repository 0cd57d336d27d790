use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: Storage,
    pub server: Server,
    pub auth: Auth,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub listing: Listing,
    #[serde(default)]
    pub encryption: Option<Encryption>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Auth {
    pub users: Vec<User>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    /// Hex SHA-256 of the user's bearer token.
    pub token_sha256: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Limits {
    pub max_request_kb: usize,
    pub requests_per_second: u32,
    pub burst: u32,
    pub per_user_per_second: u32,
    pub per_user_burst: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_request_kb: 64 * 1024,
            requests_per_second: 50,
            burst: 100,
            per_user_per_second: 10,
            per_user_burst: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Listing {
    pub decimal_places: usize,
    pub max_depth: usize,
}

impl Default for Listing {
    fn default() -> Self {
        Self { decimal_places: 2, max_depth: 32 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Encryption {
    /// 32-byte XChaCha20-Poly1305 key, standard base64.
    pub key_b64: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.storage.data_dir.is_dir() {
            anyhow::bail!("data_dir does not exist or is not a directory: {}", self.storage.data_dir.display());
        }
        if self.auth.users.is_empty() { anyhow::bail!("at least one user must be configured"); }
        let mut seen = HashSet::new();
        for user in &self.auth.users {
            if !is_valid_username(&user.username) {
                anyhow::bail!("invalid username: {:?}", user.username);
            }
            if !seen.insert(user.username.as_str()) {
                anyhow::bail!("duplicate username: {}", user.username);
            }
            match hex::decode(&user.token_sha256) {
                Ok(d) if d.len() == 32 => {}
                _ => anyhow::bail!("token_sha256 for {} must be 64 hex characters", user.username),
            }
        }
        if self.limits.max_request_kb == 0 { anyhow::bail!("max_request_kb must be > 0"); }
        if self.limits.requests_per_second == 0 || self.limits.per_user_per_second == 0 {
            anyhow::bail!("rate limits must be > 0");
        }
        if self.listing.max_depth == 0 { anyhow::bail!("max_depth must be > 0"); }
        if let Some(enc) = &self.encryption {
            crate::crypto::FileCipher::from_base64(&enc.key_b64)?;
        }
        Ok(())
    }

    /// Root directory of one user's files.
    pub fn user_root(&self, username: &str) -> PathBuf {
        self.storage.data_dir.join(username)
    }

    /// Creates the root directory of every configured user that lacks one.
    pub fn provision_user_roots(&self) -> anyhow::Result<()> {
        for user in &self.auth.users {
            let root = self.user_root(&user.username);
            if !root.is_dir() {
                fs::create_dir(&root)?;
                tracing::info!(username = %user.username, root = %root.display(), "created user root");
            }
        }
        Ok(())
    }
}

/// A username doubles as a directory name under `data_dir`, so it must be a
/// single plain path component.
fn is_valid_username(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.contains(['/', '\\', '\0'])
}
