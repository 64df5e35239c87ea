//! Configuration file management for the CLI.
//!
//! Provides a TOML-based config file at `~/.config/taskforge/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use taskforge_db::config::DbConfig;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub code_host: CodeHostSection,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CodeHostSection {
    pub token: Option<String>,
}

/// Return the CLI's config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/taskforge` or
/// `~/.config/taskforge`. Deliberately ignores the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS) so the layout stays predictable across operators.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("taskforge");
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config").join("taskforge")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix since it may hold a code-host token.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents).with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct TaskforgeConfig {
    pub db_config: DbConfig,
    pub core: taskforge_core::config::Config,
}

impl TaskforgeConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - DB URL: `cli_db_url` > `TASKFORGE_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Code host token: `TASKFORGE_CODE_HOST_TOKEN` env > `config_file.code_host.token` > unset
    pub fn resolve(cli_db_url: Option<&str>) -> Self {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("TASKFORGE_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let mut core = taskforge_core::config::Config::from_env();
        core.db = db_config.clone();
        if core.code_host_token.is_none() {
            core.code_host_token = file_config.and_then(|cfg| cfg.code_host.token);
        }

        Self { db_config, core }
    }
}
