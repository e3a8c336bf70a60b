//! Configuration Vault – reads/writes `~/.ara/config.toml`.
//!
//! ```toml
//! embedding_url = "http://localhost:11434"
//! embedding_model = "nomic-embed-text"
//! summarizer_model = "llama3"
//!
//! [memory]
//! capacity = 5000
//! flush_interval = 5
//! ```

use ara_memory::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted user configuration stored in `~/.ara/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible server that computes embeddings.
    #[serde(default = "default_embedding_url")]
    pub embedding_url: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Bearer token for hosted endpoints (stored as plain text; the file is
    /// written owner-only).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Chat model used to summarize merged memories. Without one, merged
    /// memories are concatenated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarizer_model: Option<String>,

    /// Server for the summarizer; defaults to `embedding_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarizer_url: Option<String>,

    /// Snapshot file; defaults to `~/.ara/memory.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,

    #[serde(default)]
    pub memory: MemoryConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("summarizer_model", &self.summarizer_model)
            .field("summarizer_url", &self.summarizer_url)
            .field("state_path", &self.state_path)
            .field("memory", &self.memory)
            .finish()
    }
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_url: default_embedding_url(),
            embedding_model: default_embedding_model(),
            api_key: String::new(),
            summarizer_model: None,
            summarizer_url: None,
            state_path: None,
            memory: MemoryConfig::default(),
        }
    }
}

impl Config {
    /// Where the memory snapshot lives.
    pub fn resolved_state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| ara_dir_for_home(&home_dir()).join("memory.json"))
    }

    pub fn summarizer_url(&self) -> &str {
        self.summarizer_url.as_deref().unwrap_or(&self.embedding_url)
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Return the path to `~/.ara/config.toml`.
pub fn config_path() -> PathBuf {
    ara_dir_for_home(&home_dir()).join("config.toml")
}

pub(crate) fn ara_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ara")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARA_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARA_EMBEDDING_URL` | `embedding_url` |
/// | `ARA_EMBEDDING_MODEL` | `embedding_model` |
/// | `ARA_API_KEY` | `api_key` |
/// | `ARA_SUMMARIZER_MODEL` | `summarizer_model` |
/// | `ARA_STATE_PATH` | `state_path` |
/// | `ARA_CAPACITY` | `memory.capacity` |
/// | `ARA_FLUSH_INTERVAL` | `memory.flush_interval` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARA_EMBEDDING_URL") {
        cfg.embedding_url = v;
    }
    if let Ok(v) = std::env::var("ARA_EMBEDDING_MODEL") {
        cfg.embedding_model = v;
    }
    if let Ok(v) = std::env::var("ARA_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("ARA_SUMMARIZER_MODEL") {
        cfg.summarizer_model = (!v.is_empty()).then_some(v);
    }
    if let Ok(v) = std::env::var("ARA_STATE_PATH") {
        cfg.state_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ARA_CAPACITY")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.memory.capacity = n;
    }
    if let Ok(v) = std::env::var("ARA_FLUSH_INTERVAL")
        && let Ok(n) = v.parse::<u64>()
    {
        cfg.memory.flush_interval = n;
    }
}

/// Save the config to disk, creating `~/.ara/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only directory (rwx------); it also holds the memory snapshot.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
