//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the locations of the external
//! CLI tools ripforge orchestrates (eac3to, ffmpeg, ffprobe, x264, fdkaac,
//! mkvmerge, mkvextract, mp4box, tsmuxer, bdsup2sub) and provides lookup
//! methods for the pipeline crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &[
    "eac3to",
    "ffmpeg",
    "ffprobe",
    "x264",
    "fdkaac",
    "mkvmerge",
    "mkvextract",
    "mp4box",
    "tsmuxer",
    "bdsup2sub",
];

/// Configuration for a single external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "x264").
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
    /// Version string (first line of `--version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools from configuration and `PATH`.
    ///
    /// For each known tool, resolution order is:
    /// 1. the explicit `*_path` override, when it exists on disk;
    /// 2. the configured `tools_dir`, preferring a `<name>_x64` variant when
    ///    `prefer_x64` is set and that variant exists;
    /// 3. [`which::which`] on `PATH`.
    ///
    /// Tools that are not found are silently omitted; [`require`] surfaces
    /// the miss when a stage actually needs the tool.
    ///
    /// [`require`]: ToolRegistry::require
    pub fn discover(tools_config: &rf_core::config::ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "eac3to" => tools_config.eac3to_path.as_deref(),
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                "ffprobe" => tools_config.ffprobe_path.as_deref(),
                "x264" => tools_config.x264_path.as_deref(),
                "fdkaac" => tools_config.fdkaac_path.as_deref(),
                "mkvmerge" => tools_config.mkvmerge_path.as_deref(),
                "mkvextract" => tools_config.mkvextract_path.as_deref(),
                "mp4box" => tools_config.mp4box_path.as_deref(),
                "tsmuxer" => tools_config.tsmuxer_path.as_deref(),
                "bdsup2sub" => tools_config.bdsup2sub_path.as_deref(),
                _ => None,
            };

            let resolved = custom_path
                .filter(|p| p.exists())
                .map(Path::to_path_buf)
                .or_else(|| {
                    tools_config.tools_dir.as_deref().and_then(|dir| {
                        resolve_in_dir(dir, name, tools_config.prefer_x64)
                    })
                })
                .or_else(|| which::which(name).ok());

            if let Some(path) = resolved {
                tools.insert(
                    name.to_string(),
                    ToolConfig {
                        name: name.to_string(),
                        path,
                    },
                );
            }
        }

        Self { tools }
    }

    /// Return a reference to the [`ToolConfig`] for the given tool, or an
    /// [`rf_core::Error::Tool`] if the tool was not found during discovery.
    pub fn require(&self, name: &str) -> rf_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| rf_core::Error::Tool {
            tool: name.to_string(),
            message: format!("{name} not found; is it installed and in PATH?"),
        })
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| {
                if let Some(cfg) = self.tools.get(name) {
                    let version = detect_version(name, &cfg.path);
                    ToolInfo {
                        name: name.to_string(),
                        available: true,
                        version,
                        path: Some(cfg.path.clone()),
                    }
                } else {
                    ToolInfo {
                        name: name.to_string(),
                        available: false,
                        version: None,
                        path: None,
                    }
                }
            })
            .collect()
    }

    /// Iterate over all registered tool configs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ToolConfig)> {
        self.tools.iter()
    }
}

/// Resolve a tool inside the bundled tools directory, honoring the x64
/// variant preference.
fn resolve_in_dir(dir: &Path, name: &str, prefer_x64: bool) -> Option<PathBuf> {
    if prefer_x64 {
        let x64 = dir.join(format!("{name}_x64"));
        if x64.is_file() {
            return Some(x64);
        }
    }
    let plain = dir.join(name);
    plain.is_file().then_some(plain)
}

/// Run `<tool> --version` (or `-version` for ffmpeg/ffprobe) and return the
/// first line of stdout.
fn detect_version(name: &str, path: &PathBuf) -> Option<String> {
    let version_arg = match name {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    };

    let output = std::process::Command::new(path)
        .arg(version_arg)
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

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::config::ToolsConfig;

    #[test]
    fn discover_with_default_config() {
        let cfg = ToolsConfig::default();
        let registry = ToolRegistry::discover(&cfg);
        // We cannot guarantee any tool is installed in CI,
        // but the call itself must not panic.
        let _ = registry.check_all();
    }

    #[test]
    fn require_missing_tool_returns_error() {
        let cfg = ToolsConfig::default();
        let registry = ToolRegistry::discover(&cfg);
        let result = registry.require("nonexistent_tool_xyz");
        assert!(result.is_err());
    }

    #[test]
    fn check_all_returns_known_tools() {
        let cfg = ToolsConfig::default();
        let registry = ToolRegistry::discover(&cfg);
        let infos = registry.check_all();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"eac3to"));
        assert!(names.contains(&"x264"));
        assert!(names.contains(&"mkvmerge"));
        assert!(names.contains(&"tsmuxer"));
        assert!(names.contains(&"bdsup2sub"));
    }

    #[test]
    fn explicit_path_wins_when_it_exists() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("my-x264");
        std::fs::write(&custom, b"#!/bin/sh\n").unwrap();

        let mut cfg = ToolsConfig::default();
        cfg.x264_path = Some(custom.clone());
        let registry = ToolRegistry::discover(&cfg);
        let tool = registry.require("x264").unwrap();
        assert_eq!(tool.path, custom);
    }

    #[test]
    fn tools_dir_prefers_x64_variant() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eac3to"), b"32").unwrap();
        std::fs::write(dir.path().join("eac3to_x64"), b"64").unwrap();

        let mut cfg = ToolsConfig::default();
        cfg.tools_dir = Some(dir.path().to_path_buf());
        cfg.prefer_x64 = true;
        let registry = ToolRegistry::discover(&cfg);
        let tool = registry.require("eac3to").unwrap();
        assert_eq!(tool.path, dir.path().join("eac3to_x64"));

        cfg.prefer_x64 = false;
        let registry = ToolRegistry::discover(&cfg);
        let tool = registry.require("eac3to").unwrap();
        assert_eq!(tool.path, dir.path().join("eac3to"));
    }

    #[test]
    fn missing_x64_variant_falls_back_to_plain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mkvmerge"), b"32").unwrap();

        let mut cfg = ToolsConfig::default();
        cfg.tools_dir = Some(dir.path().to_path_buf());
        cfg.prefer_x64 = true;
        let registry = ToolRegistry::discover(&cfg);
        let tool = registry.require("mkvmerge").unwrap();
        assert_eq!(tool.path, dir.path().join("mkvmerge"));
    }

    #[test]
    fn tool_config_serialization() {
        let cfg = ToolConfig {
            name: "x264".to_string(),
            path: PathBuf::from("/usr/bin/x264"),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("x264"));
        let back: ToolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "x264");
    }
}
