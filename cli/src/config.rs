use anyhow::{Context, Result, bail};
use serde::Deserialize;
use stashpack_core::{Credentials, StashLocation};
use stashpack_stash::StashConfig;
use stashpack_transports::RetryPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// On-disk TOML configuration for the stash coordinator.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    /// Scratch space for bundles, downloads, and git working copies.
    pub work_dir: Option<PathBuf>,
    /// Prefix applied to locations that do not set their own.
    pub remote_prefix: Option<String>,
    #[serde(default)]
    pub enable_fallback: bool,
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub locations: Vec<LocationSection>,
}

#[derive(Debug, Deserialize)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<bool>,
    pub per_attempt_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LocationSection {
    pub url: String,
    pub remote_prefix: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub token: Option<String>,
    pub branch: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ConfigFile =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn into_stash_config(self) -> Result<StashConfig> {
        if self.locations.is_empty() {
            bail!("config declares no stash locations");
        }
        let default_prefix = self.remote_prefix.unwrap_or_else(|| "A".to_string());

        let mut locations = Vec::with_capacity(self.locations.len());
        for section in self.locations {
            let prefix = section
                .remote_prefix
                .clone()
                .unwrap_or_else(|| default_prefix.clone());
            let credentials = Credentials {
                username: section.username,
                password: section.password,
                key_file: section.key_file,
                token: section.token,
            };
            let mut location = StashLocation::from_url(&section.url, prefix, credentials)
                .with_context(|| format!("location {}", section.url))?;
            if let Some(branch) = section.branch {
                location = location.with_branch(branch);
            }
            locations.push(location);
        }

        let work_dir = self
            .work_dir
            .unwrap_or_else(|| std::env::temp_dir().join("stashpack"));
        let mut config = StashConfig::new(locations, work_dir);
        if self.enable_fallback {
            config = config.with_fallback();
        }
        if let Some(retry) = self.retry {
            let mut policy = RetryPolicy::default();
            if let Some(v) = retry.max_attempts {
                policy.max_attempts = v;
            }
            if let Some(v) = retry.initial_backoff_ms {
                policy.initial_backoff = Duration::from_millis(v);
            }
            if let Some(v) = retry.max_backoff_ms {
                policy.max_backoff = Duration::from_millis(v);
            }
            if let Some(v) = retry.backoff_multiplier {
                policy.backoff_multiplier = v;
            }
            if let Some(v) = retry.jitter {
                policy.jitter = v;
            }
            if let Some(v) = retry.per_attempt_timeout_secs {
                policy.per_attempt_timeout = Some(Duration::from_secs(v));
            }
            config = config.with_retry(policy);
        }
        Ok(config)
    }
}
