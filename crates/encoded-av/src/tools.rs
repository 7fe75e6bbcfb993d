//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the locations of the external
//! CLI tools the engine shells out to (ffmpeg) and provides lookup
//! methods for the rest of the crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use encoded_core::config::ToolsConfig;
use serde::{Deserialize, Serialize};

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &["ffmpeg"];

/// Configuration for a single external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "ffmpeg").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// For each known tool, if the [`ToolsConfig`] supplies a custom path
    /// **and** that path exists, it is used directly. Otherwise
    /// [`which::which`] is used to locate the tool in `PATH`. Tools that are
    /// not found are omitted from the registry; jobs that need them fail with
    /// `tool_unavailable` instead of the process refusing to start.
    pub fn discover(tools_config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(tool = name, path = %p.display(), "Configured tool path missing, searching PATH");
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            match resolved {
                Some(path) => {
                    tracing::debug!(tool = name, path = %path.display(), "Discovered tool");
                    tools.insert(
                        name.to_string(),
                        ToolConfig {
                            name: name.to_string(),
                            path,
                        },
                    );
                }
                None => tracing::debug!(tool = name, "Tool not found"),
            }
        }

        Self { tools }
    }

    /// Register (or replace) a tool at an explicit path.
    pub fn with_tool(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(
            name.to_string(),
            ToolConfig {
                name: name.to_string(),
                path: path.into(),
            },
        );
        self
    }

    /// Return a reference to the [`ToolConfig`] for the given tool, or an
    /// [`encoded_core::Error::Tool`] if the tool was not found during discovery.
    pub fn require(&self, name: &str) -> encoded_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            encoded_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
