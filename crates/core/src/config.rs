use std::{path::Path, time::Duration};

use backon::ExponentialBuilder;
use clap::{Args, Parser};
use dapp_common::ProviderArgs;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

mod defaults {
    use url::Url;

    pub const API_URL: &str = "https://ipfs.infura.io:5001/";
    pub const GATEWAY_URL: &str = "https://ipfs.infura.io/";
    pub const AUTHORIZATION_TIMEOUT_SECS: u64 = 120;
    pub const CONFIRMATION_TIMEOUT_SECS: u64 = 300;
    pub const RECEIPT_POLL_INTERVAL_MS: u64 = 1_000;
    pub const SYNC_MAX_RETRIES: usize = 3;
    pub const SYNC_MIN_BACKOFF_MS: u64 = 200;
    pub const SYNC_MAX_BACKOFF_MS: u64 = 5_000;
    pub const INFLIGHT_TTL_SECS: u64 = 600;
    pub const CONTENT_TIMEOUT_SECS: u64 = 60;

    pub fn api_url() -> Url {
        Url::parse(API_URL).expect("static URL")
    }
    pub fn gateway_url() -> Url {
        Url::parse(GATEWAY_URL).expect("static URL")
    }

    pub const fn authorization_timeout_secs() -> u64 {
        AUTHORIZATION_TIMEOUT_SECS
    }
    pub const fn confirmation_timeout_secs() -> u64 {
        CONFIRMATION_TIMEOUT_SECS
    }
    pub const fn receipt_poll_interval_ms() -> u64 {
        RECEIPT_POLL_INTERVAL_MS
    }
    pub const fn sync_max_retries() -> usize {
        SYNC_MAX_RETRIES
    }
    pub const fn sync_min_backoff_ms() -> u64 {
        SYNC_MIN_BACKOFF_MS
    }
    pub const fn sync_max_backoff_ms() -> u64 {
        SYNC_MAX_BACKOFF_MS
    }
    pub const fn inflight_ttl_secs() -> u64 {
        INFLIGHT_TTL_SECS
    }
    pub const fn content_timeout_secs() -> u64 {
        CONTENT_TIMEOUT_SECS
    }
}

/// Content store endpoints.
#[derive(Debug, Clone, Args, Deserialize)]
#[command(next_help_heading = "Content Store")]
pub struct ContentArgs {
    /// IPFS HTTP API base URL. Must end in `/` when it carries a path.
    #[arg(long = "ipfs-api-url", env = "IPFS_API_URL", default_value = defaults::API_URL)]
    #[serde(default = "defaults::api_url")]
    pub api_url: Url,

    /// Gateway that serves stored payloads under `/ipfs/<id>`.
    #[arg(long = "ipfs-gateway-url", env = "IPFS_GATEWAY_URL", default_value = defaults::GATEWAY_URL)]
    #[serde(default = "defaults::gateway_url")]
    pub gateway_url: Url,

    #[arg(id = "ipfs_timeout_secs", long = "ipfs-timeout-secs", env = "IPFS_TIMEOUT_SECS", default_value_t = defaults::CONTENT_TIMEOUT_SECS)]
    #[serde(default = "defaults::content_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ContentArgs {
    fn default() -> Self {
        Self {
            api_url: defaults::api_url(),
            gateway_url: defaults::gateway_url(),
            timeout_secs: defaults::CONTENT_TIMEOUT_SECS,
        }
    }
}

/// Timing of the session pipeline.
#[derive(Debug, Clone, Args, Deserialize)]
#[command(next_help_heading = "Session")]
pub struct SessionArgs {
    /// How long the wallet may take to answer an account authorization.
    #[arg(long, env = "AUTHORIZATION_TIMEOUT_SECS", default_value_t = defaults::AUTHORIZATION_TIMEOUT_SECS)]
    #[serde(default = "defaults::authorization_timeout_secs")]
    pub authorization_timeout_secs: u64,

    /// How long to wait for a receipt after the hash is observed.
    #[arg(long, env = "CONFIRMATION_TIMEOUT_SECS", default_value_t = defaults::CONFIRMATION_TIMEOUT_SECS)]
    #[serde(default = "defaults::confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    #[arg(long, env = "RECEIPT_POLL_INTERVAL_MS", default_value_t = defaults::RECEIPT_POLL_INTERVAL_MS)]
    #[serde(default = "defaults::receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    /// Retries per collection read on transient errors.
    #[arg(long, env = "SYNC_MAX_RETRIES", default_value_t = defaults::SYNC_MAX_RETRIES)]
    #[serde(default = "defaults::sync_max_retries")]
    pub sync_max_retries: usize,

    #[arg(long, env = "SYNC_MIN_BACKOFF_MS", default_value_t = defaults::SYNC_MIN_BACKOFF_MS)]
    #[serde(default = "defaults::sync_min_backoff_ms")]
    pub sync_min_backoff_ms: u64,

    #[arg(long, env = "SYNC_MAX_BACKOFF_MS", default_value_t = defaults::SYNC_MAX_BACKOFF_MS)]
    #[serde(default = "defaults::sync_max_backoff_ms")]
    pub sync_max_backoff_ms: u64,

    /// Upper bound on how long one action can hold an account's in-flight slot.
    #[arg(long, env = "INFLIGHT_TTL_SECS", default_value_t = defaults::INFLIGHT_TTL_SECS)]
    #[serde(default = "defaults::inflight_ttl_secs")]
    pub inflight_ttl_secs: u64,
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self {
            authorization_timeout_secs: defaults::AUTHORIZATION_TIMEOUT_SECS,
            confirmation_timeout_secs: defaults::CONFIRMATION_TIMEOUT_SECS,
            receipt_poll_interval_ms: defaults::RECEIPT_POLL_INTERVAL_MS,
            sync_max_retries: defaults::SYNC_MAX_RETRIES,
            sync_min_backoff_ms: defaults::SYNC_MIN_BACKOFF_MS,
            sync_max_backoff_ms: defaults::SYNC_MAX_BACKOFF_MS,
            inflight_ttl_secs: defaults::INFLIGHT_TTL_SECS,
        }
    }
}

impl SessionArgs {
    pub fn authorization_timeout(&self) -> Duration {
        Duration::from_secs(self.authorization_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn inflight_ttl(&self) -> Duration {
        Duration::from_secs(self.inflight_ttl_secs)
    }

    pub fn sync_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.sync_min_backoff_ms))
            .with_max_delay(Duration::from_millis(self.sync_max_backoff_ms))
            .with_max_times(self.sync_max_retries)
            .with_jitter()
    }
}

#[derive(Debug, Clone, Parser, Deserialize, Default)]
#[command(author, version, about, long_about = None)]
pub struct ClientConfig {
    #[command(flatten)]
    #[serde(default)]
    pub provider: ProviderArgs,

    #[command(flatten)]
    #[serde(default)]
    pub content: ContentArgs,

    #[command(flatten)]
    #[serde(default)]
    pub session: SessionArgs,
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_legacy = self.provider.http.as_ref().is_some_and(|urls| !urls.is_empty());
        if self.provider.wallet.is_none() && !has_legacy {
            tracing::warn!("no wallet or RPC endpoint configured; connecting will fail");
        }
        if self.session.receipt_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "receipt_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.session.sync_min_backoff_ms > self.session.sync_max_backoff_ms {
            return Err(ConfigError::Invalid(
                "sync_min_backoff_ms must not exceed sync_max_backoff_ms".to_string(),
            ));
        }
        // An action holds its account slot across the upload and the wait for
        // confirmation; the slot must not expire before both can finish.
        let longest_action = self
            .session
            .confirmation_timeout_secs
            .saturating_add(self.content.timeout_secs);
        if self.session.inflight_ttl_secs <= longest_action {
            return Err(ConfigError::Invalid(format!(
                "inflight_ttl_secs ({}) must exceed confirmation_timeout_secs plus the content timeout ({longest_action})",
                self.session.inflight_ttl_secs
            )));
        }
        Ok(())
    }
}
