use std::{num::NonZeroUsize, path::Path, time::Duration};

use alloy::{
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::{client::RpcClient, json_rpc::RpcError},
    transports::{
        TransportError, TransportErrorKind,
        http::{Http, reqwest},
        layers::{FallbackLayer, RateLimitRetryPolicy, RetryPolicy},
    },
};
use clap::Args;
use config::ConfigError;
use serde::Deserialize;
use thiserror::Error;
use tower::ServiceBuilder;
use url::Url;

use crate::provider_layers::{RetryConfig, RetryLayer, ThrottleConfig, ThrottleLayer};

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no RPC URLs provided")]
    NoHttpUrls,
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Where the pipeline finds its ledger connection.
///
/// `wallet` is a wallet-controlled endpoint that only exposes accounts after an
/// explicit `eth_requestAccounts` authorization. `http` lists node endpoints
/// that expose already-unlocked accounts through `eth_accounts`; they are used
/// only when no wallet endpoint is configured.
#[derive(Debug, Clone, Args, Deserialize, Default)]
#[command(next_help_heading = "Ledger Connection")]
pub struct ProviderArgs {
    /// Wallet endpoint that requires explicit account authorization.
    #[arg(long = "wallet-url", env = "WALLET_URL")]
    #[serde(default)]
    pub wallet: Option<Url>,

    /// Legacy RPC endpoints with unlocked accounts (in priority order).
    #[arg(long = "rpc-url", value_delimiter = ',', env = "RPC_URL")]
    #[serde(default)]
    pub http: Option<Vec<Url>>,

    #[command(flatten)]
    #[serde(default)]
    pub throttle: Option<ThrottleConfig>,

    #[command(flatten)]
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ProviderArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file, either from a `[provider]` table
    /// or from the top level.
    pub fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        Ok(settings
            .get::<Self>("provider")
            .or_else(|_| settings.try_deserialize::<Self>())?)
    }

    pub fn with_wallet_url(mut self, url: Url) -> Self {
        self.wallet = Some(url);
        self
    }

    pub fn with_http_urls(mut self, urls: impl IntoIterator<Item = Url>) -> Self {
        self.http.get_or_insert_with(Vec::new).extend(urls);
        self
    }

    /// Set the maximum number of RPC retries. Set to 0 to disable retries.
    pub fn with_max_rpc_retries(mut self, max_retries: u32) -> Self {
        self.retry
            .get_or_insert_with(RetryConfig::default)
            .max_retries = max_retries;
        self
    }

    /// Provider for the wallet endpoint, if one is configured.
    pub fn wallet_provider(&self) -> ProviderResult<Option<DynProvider>> {
        self.wallet
            .clone()
            .map(|url| self.connect(vec![url]))
            .transpose()
    }

    /// Provider for the legacy endpoints, if any are configured.
    pub fn legacy_provider(&self) -> ProviderResult<Option<DynProvider>> {
        match &self.http {
            Some(urls) if !urls.is_empty() => self.connect(urls.clone()).map(Some),
            _ => Ok(None),
        }
    }

    fn connect(&self, urls: Vec<Url>) -> ProviderResult<DynProvider> {
        let active = NonZeroUsize::new(urls.len()).ok_or(ProviderError::NoHttpUrls)?;
        let retry_cfg = self.retry.clone().unwrap_or_default();

        // Per-request timeout at the HTTP client so a hanging node surfaces
        // as an error the retry layer can act on.
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(retry_cfg.timeout_secs))
            .build()?;

        let transports = urls
            .into_iter()
            .map(|url| Http::with_client(http_client.clone(), url))
            .collect::<Vec<_>>();

        let fallback_layer = FallbackLayer::default().with_active_transport_count(active);

        let retry_policy =
            RateLimitRetryPolicy::default().or(|error: &TransportError| match error {
                RpcError::Transport(TransportErrorKind::Custom(_)) => true,
                RpcError::Transport(TransportErrorKind::HttpError(e)) => {
                    matches!(e.status, 408 | 502 | 504)
                }
                _ => false,
            });
        let retry_layer = RetryLayer::new(retry_policy, &retry_cfg);

        // RetryLayer -> ThrottleLayer -> FallbackLayer -> transports, so
        // retries are charged against the request budget.
        let client = if let Some(throttle_cfg) = &self.throttle {
            let throttle_layer = ThrottleLayer::new_with_config(
                throttle_cfg.requests_per_second,
                throttle_cfg.burst_size,
            );

            let transport = ServiceBuilder::new()
                .layer(retry_layer)
                .layer(throttle_layer)
                .layer(fallback_layer)
                .service(transports);

            RpcClient::builder().transport(transport, false)
        } else {
            let transport = ServiceBuilder::new()
                .layer(retry_layer)
                .layer(fallback_layer)
                .service(transports);

            RpcClient::builder().transport(transport, false)
        };

        // The wallet behind the endpoint fills gas, nonce and signature.
        Ok(ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_client(client)
            .erased())
    }
}
