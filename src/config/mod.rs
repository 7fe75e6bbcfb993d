//! Configuration loading.
//!
//! The configuration types live in `encoded_core::config`; this module finds
//! the TOML file, parses it and applies validation.

pub use encoded_core::config::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Locations searched when no `--config` is given, in order.
const DEFAULT_PATHS: &[&str] = &[
    "./encoded.toml",
    "./config.toml",
    "~/.config/encoded/config.toml",
    "/etc/encoded/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Invalid TOML")?;
    config.check()?;

    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    Ok(config)
}

/// First existing file among the default locations.
pub fn find_default_config() -> Option<PathBuf> {
    DEFAULT_PATHS.iter().find_map(|path_str| {
        let path = PathBuf::from(shellexpand::tilde(path_str).as_ref());
        path.exists().then_some(path)
    })
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    match find_default_config() {
        Some(path) => {
            tracing::debug!("Using config file {}", path.display());
            load_config(&path)
        }
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoded.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9000

            [engine]
            workers = 2
            queue_capacity = 5
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.engine.queue_bound(), Some(5));
        assert_eq!(config.retention.policy, RetentionPolicy::OnFetch);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Path::new("/nonexistent/encoded.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn hard_errors_fail_parsing() {
        let err = parse_config("[engine]\nworkers = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("workers"));
    }

    #[test]
    fn malformed_toml_fails() {
        assert!(parse_config("[engine\nworkers = 2").is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[retention]\npolicy = \"window\"\n").unwrap();
        let config = load_config_or_default(Some(&path)).unwrap();
        assert_eq!(config.retention.policy, RetentionPolicy::Window);
    }
}
