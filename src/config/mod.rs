mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Environment variable overriding `chapters.min_spacing`.
pub const CHAPTER_LENGTH_ENV: &str = "CHAPTER_LENGTH";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./chapterforge.toml", "~/.config/chapterforge/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    let mut config = Config::default();
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(value) = std::env::var(CHAPTER_LENGTH_ENV) {
        config.chapters.min_spacing = value.trim().parse().with_context(|| {
            format!("{CHAPTER_LENGTH_ENV} must be a whole number of seconds, got {value:?}")
        })?;
    }
    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.scan.jobs == 0 {
        anyhow::bail!("scan.jobs must be at least 1");
    }

    if config.scan.extensions.is_empty() {
        anyhow::bail!("scan.extensions cannot be empty");
    }

    if config.tools.timeout_secs == Some(0) {
        anyhow::bail!("tools.timeout_secs must be greater than 0");
    }

    for path in [&config.tools.ffprobe_path, &config.tools.ffmpeg_path]
        .into_iter()
        .flatten()
    {
        if !path.exists() {
            tracing::warn!("Configured tool path does not exist: {:?}", path);
        }
    }

    Ok(())
}
