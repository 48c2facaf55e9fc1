//! TOML configuration for subscriptions and core updates

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};

/// Top‑level manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub core_update: CoreUpdateConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// One remote configuration document mirrored to disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub name: String,
    pub url: String,
    pub save_path: PathBuf,
}

/// sing-box core update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreUpdateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub check_prerelease: bool,
    #[serde(default = "default_install_path")]
    pub install_path: PathBuf,
    /// GitHub `owner/name`
    #[serde(default = "default_repository")]
    pub repository: String,
    #[serde(default = "default_binary_name")]
    pub binary_name: String,
}

/// Settings shared by every HTTP request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_true() -> bool {
    true
}

fn default_install_path() -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(r"C:\Program Files\sing-box\sing-box.exe")
    }

    #[cfg(not(windows))]
    {
        PathBuf::from("/usr/local/bin/sing-box")
    }
}

fn default_repository() -> String {
    "SagerNet/sing-box".to_string()
}

fn default_binary_name() -> String {
    "sing-box".to_string()
}

fn default_user_agent() -> String {
    "singbox-manager/2.0".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

impl Default for CoreUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_prerelease: false,
            install_path: default_install_path(),
            repository: default_repository(),
            binary_name: default_binary_name(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            api_base: default_api_base(),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            subscriptions: vec![Subscription {
                name: "default".into(),
                url: "https://example.com/your-singbox-config.json".into(),
                save_path: PathBuf::from("./singbox_config.json"),
            }],
            core_update: CoreUpdateConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Default location: `<config dir>/singbox-manager/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("singbox-manager");
        Ok(config_dir.join("config.toml"))
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ManagerConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from disk, writing the default first if the file is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "Config not found at {}, creating default configuration",
                path.display()
            );

            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }

            let default_toml = toml::to_string_pretty(&ManagerConfig::default())
                .context("Failed to serialize default config")?;
            fs::write(path, default_toml).context("Failed to write config file")?;

            info!("Created default configuration at {}", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        info!("Using config from: {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let repo = &self.core_update.repository;
        match repo.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
            _ => bail!("core_update.repository must be `owner/name`, got `{}`", repo),
        }

        if self.core_update.binary_name.is_empty() {
            bail!("core_update.binary_name must not be empty");
        }

        if self.http.timeout_secs == 0 {
            bail!("http.timeout_secs must be greater than zero");
        }

        for sub in &self.subscriptions {
            if sub.url.is_empty() {
                bail!("subscription `{}` has an empty url", sub.name);
            }
        }

        Ok(())
    }
}
