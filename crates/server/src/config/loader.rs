//! Configuration file loading and parsing
//!
//! Finds a RON config file in the standard locations, falls back to the
//! profile defaults, then applies `GITGUD_*` environment overrides.

use super::{AppEnv, Config};
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

/// Standard config file names to search for
const CONFIG_FILENAMES: &[&str] = &["gitgud.ron", ".gitgud/config.ron"];

/// Load configuration from a specific file path
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_ron(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration with automatic file discovery
///
/// Searches for config files in the following locations (in order):
/// 1. Path specified in GITGUD_CONFIG_PATH environment variable
/// 2. gitgud.ron in current directory
/// 3. .gitgud/config.ron relative to current directory
///
/// If no config file is found, the defaults of the `APP_ENV` profile are used.
/// Environment overrides are applied last and the result is validated.
pub fn load_with_discovery() -> Result<Config> {
    let mut config = discover(AppEnv::from_process_env())?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate().map_err(|msg| anyhow!(msg))?;
    Ok(config)
}

fn discover(environment: AppEnv) -> Result<Config> {
    // Check environment variable first
    if let Ok(env_path) = std::env::var("GITGUD_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            tracing::info!("Loading config from GITGUD_CONFIG_PATH: {}", path.display());
            return load_from_file(&path);
        } else {
            tracing::warn!(
                "GITGUD_CONFIG_PATH specified but file not found: {}",
                path.display()
            );
        }
    }

    // Search standard locations
    for filename in CONFIG_FILENAMES {
        let path = PathBuf::from(filename);
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return load_from_file(&path);
        }
    }

    tracing::info!(?environment, "No config file found, using profile defaults");
    Ok(Config::for_env(environment))
}

/// Override individual fields from `GITGUD_*` variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("GITGUD_LISTEN_ADDR") {
        config.listen_addr = addr
            .parse()
            .with_context(|| format!("Invalid GITGUD_LISTEN_ADDR: {addr}"))?;
    }
    if let Some(url) = lookup("GITGUD_BASE_URL") {
        config.base_url = url;
    }
    if let Some(root) = lookup("GITGUD_REPOSITORIES_ROOT") {
        config.repositories_root = PathBuf::from(root);
    }
    if let Some(root) = lookup("GITGUD_CLONES_ROOT") {
        config.clones_root = PathBuf::from(root);
    }
    if let Some(branch) = lookup("GITGUD_DEFAULT_BRANCH") {
        config.default_branch = branch;
    }
    if let Some(debug) = lookup("GITGUD_DEBUG") {
        config.debug = parse_bool(&debug)
            .ok_or_else(|| anyhow!("Invalid GITGUD_DEBUG: {debug} (expected true/false)"))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse RON configuration string
fn parse_ron(content: &str) -> Result<Config> {
    ron::from_str(content).context("Failed to parse RON configuration")
}
