//! Configuration management for gitgud
//!
//! Configuration is stored in RON format, resolved once at startup and then
//! handed to the components that need it. Nothing reads settings from global
//! state after that point.

pub mod loader;

use std::net::SocketAddr;
use std::path::PathBuf;

use git_http::{DebugFlags, RepositorySettings};
use serde::{Deserialize, Serialize};

/// Deployment profile selected through `APP_ENV`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum AppEnv {
    #[default]
    Base,
    Development,
    Production,
    Test,
}

impl AppEnv {
    /// Map an `APP_ENV` value (`dev`, `prod`, `test`) to a profile.
    pub fn from_env_value(value: &str) -> Self {
        match value {
            "dev" => AppEnv::Development,
            "prod" => AppEnv::Production,
            "test" => AppEnv::Test,
            _ => AppEnv::Base,
        }
    }

    pub fn from_process_env() -> Self {
        AppEnv::from_env_value(&std::env::var("APP_ENV").unwrap_or_default())
    }

    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(self) -> &'static str {
        match self {
            AppEnv::Development | AppEnv::Test => "debug",
            AppEnv::Base | AppEnv::Production => "info",
        }
    }
}

/// Top-level configuration for gitgud
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub environment: AppEnv,

    /// Address the HTTP listener binds to
    pub listen_addr: SocketAddr,

    /// Public URL prefix used to build clone URLs (e.g. "https://gitgud.com")
    pub base_url: String,

    /// Directory holding `<org>/<name>.git` bare repositories
    pub repositories_root: PathBuf,

    /// Directory holding `<org>/<destination>` working copies
    pub clones_root: PathBuf,

    /// Initial branch of newly created repositories
    pub default_branch: String,

    /// Inject GIT_TRACE_PACKET, GIT_TRACE and GIT_CURL_VERBOSE into git processes
    pub debug: bool,

    /// Serve git-receive-pack
    pub allow_push: bool,

    /// Upper bound on concurrently running transport processes
    pub max_concurrent_services: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: AppEnv::Base,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 1323)),
            base_url: "https://gitgud.com".to_string(),
            repositories_root: PathBuf::from("repositories"),
            clones_root: PathBuf::from("clones"),
            default_branch: git_http::repo::DEFAULT_BRANCH.to_string(),
            debug: false,
            allow_push: true,
            max_concurrent_services: 32,
        }
    }
}

impl Config {
    /// Built-in defaults for a profile.
    pub fn for_env(environment: AppEnv) -> Self {
        Self {
            environment,
            debug: environment == AppEnv::Test,
            ..Self::default()
        }
    }

    pub fn repository_settings(&self) -> RepositorySettings {
        RepositorySettings {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            repositories_root: self.repositories_root.clone(),
            clones_root: self.clones_root.clone(),
            default_branch: self.default_branch.clone(),
            debug: DebugFlags::all(self.debug),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "base_url '{}' must start with http:// or https://",
                self.base_url
            ));
        }
        if self.default_branch.is_empty()
            || self.default_branch.starts_with('-')
            || self.default_branch.chars().any(char::is_whitespace)
        {
            return Err(format!(
                "default_branch '{}' is not a valid branch name",
                self.default_branch
            ));
        }
        if self.max_concurrent_services == 0 {
            return Err("max_concurrent_services must be at least 1".to_string());
        }
        Ok(())
    }
}
