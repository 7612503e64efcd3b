use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::search::MAX_SEARCH_RESULTS;

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant. Always respond clearly, fully answering questions. \
If the user uploads a file or asks to search the web, handle it accordingly.";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub search: SearchConfig,
    pub features: FeatureConfig,
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Environment variable (or secrets.toml key) holding the credential.
    pub api_key_env: String,
    pub instructions: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            kind: ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: default_model(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret(&self.api_key_env, &Config::get_config_dir().join("secrets.toml"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Empty disables search; research mode then runs without results.
    pub endpoint: String,
    pub api_key_env: String,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            endpoint: String::new(),
            api_key_env: String::new(),
            max_results: MAX_SEARCH_RESULTS,
        }
    }
}

impl SearchConfig {
    /// Never more than three hits reach a prompt.
    pub fn result_limit(&self) -> usize {
        self.max_results.min(MAX_SEARCH_RESULTS)
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret(&self.api_key_env, &Config::get_config_dir().join("secrets.toml"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Show the Normal/Research selector.
    pub research_mode: bool,
    /// Treat `search:` at the start of the input as a search command.
    pub search_command: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            research_mode: true,
            search_command: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 800,
            height: 600,
            min_width: 400,
            min_height: 300,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        let mut config = if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match Self::from_toml_str(&contents) {
                    Ok(config) => config,
                    Err(e) => {
                        log::warn!("Error parsing config.toml: {}. Using defaults.", e);
                        Config::default()
                    }
                },
                Err(e) => {
                    log::warn!("Error reading config.toml: {}. Using defaults.", e);
                    Config::default()
                }
            }
        } else {
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            Config::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// `ASKBAR_MODEL` and `ASKBAR_BASE_URL` win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("ASKBAR_MODEL").filter(|v| !v.trim().is_empty()) {
            self.provider.model = model;
        }
        if let Some(url) = lookup("ASKBAR_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.provider.base_url = url;
        }
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/ask-bar")
        } else {
            PathBuf::from(".")
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiKeysConfig {
    keys: HashMap<String, String>,
}

pub fn load_api_keys(path: &Path) -> Result<HashMap<String, String>, anyhow::Error> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let contents = fs::read_to_string(path)?;
    let config: ApiKeysConfig = toml::from_str(&contents)?;
    Ok(config.keys)
}

/// Environment first, then the `[keys]` table of the secrets file.
fn resolve_secret(name: &str, secrets_path: &Path) -> Option<String> {
    if name.trim().is_empty() {
        return None;
    }

    if let Some(value) = std::env::var(name).ok().filter(|v| !v.trim().is_empty()) {
        return Some(value);
    }

    match load_api_keys(secrets_path) {
        Ok(mut keys) => keys.remove(name).filter(|v| !v.trim().is_empty()),
        Err(e) => {
            log::warn!("Could not read {}: {}", secrets_path.display(), e);
            None
        }
    }
}
