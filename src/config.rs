use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_OWNER: &str = "scusi";
const DEFAULT_PROJECT: &str = "mwdl";
const DEFAULT_BINARY: &str = "mwdl";
const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// ECDSA P-256 key the release signatures are checked against
pub const DEFAULT_PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEDDEtBqbRWOGkYlJLONyuGSndiD+C
lApqBbwd5Rk97zGjaPNJcblIt55s48IxmQU7OA7TxH0zHNfIetjUfguXkA==
-----END PUBLIC KEY-----
";

/// Settings for one update run. Built once at startup and handed to every
/// stage by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateConfig {
    pub owner: String,
    pub project: String,
    /// Name of the executable inside release archives
    pub binary_name: String,
    /// Appended to `binary_name` when looking inside zip archives
    pub platform_suffix: String,
    pub public_key_pem: String,
    pub api_base: String,
    /// Deadline applied to every network request
    pub timeout: Duration,
    /// Where to fetch checksum and signature; `{tag}` and `{asset}` are
    /// substituted. Defaults to `<asset url>.sig`.
    pub attestation_url: Option<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            binary_name: DEFAULT_BINARY.to_string(),
            platform_suffix: default_suffix().to_string(),
            public_key_pem: DEFAULT_PUBLIC_KEY.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            attestation_url: None,
        }
    }
}

fn default_suffix() -> &'static str {
    if cfg!(windows) {
        ".exe"
    } else {
        ""
    }
}

/// On-disk overrides; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    binary_name: Option<String>,
    #[serde(default)]
    platform_suffix: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    api_base: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    attestation_url: Option<String>,
}

impl UpdateConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))
    }

    /// Overlay a TOML document on the built-in defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        let defaults = Self::default();

        Ok(Self {
            owner: file.owner.unwrap_or(defaults.owner),
            project: file.project.unwrap_or(defaults.project),
            binary_name: file.binary_name.unwrap_or(defaults.binary_name),
            platform_suffix: file.platform_suffix.unwrap_or(defaults.platform_suffix),
            public_key_pem: file.public_key.unwrap_or(defaults.public_key_pem),
            api_base: file
                .api_base
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            timeout: file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            attestation_url: file.attestation_url.or(defaults.attestation_url),
        })
    }

    /// Name of the entry looked up inside zip archives
    pub fn zip_entry_name(&self) -> String {
        format!("{}{}", self.binary_name, self.platform_suffix)
    }

    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("mwdl")
            .join("config.toml")
    }
}
