use std::{
    future::Future,
    num::NonZeroU32,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use alloy::{
    rpc::json_rpc::{RequestPacket, ResponsePacket},
    transports::{TransportError, TransportErrorKind, layers::RetryPolicy},
};
use backon::{BackoffBuilder, ExponentialBuilder};
use clap::Args;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde::Deserialize;
use tower::{Layer, Service};

/// Methods whose side effects must never be replayed by the transport: a
/// resent transaction is a second transaction, a resent authorization is a
/// second wallet prompt.
const NON_IDEMPOTENT_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_sendRawTransaction",
    "eth_requestAccounts",
];

mod defaults {
    pub const BURST_SIZE: u32 = 5;
    pub const REQUESTS_PER_SECOND: u32 = 25;
    pub const MAX_RETRIES: u32 = 3;
    pub const INITIAL_BACKOFF_MS: u64 = 250;
    pub const MAX_BACKOFF_MS: u64 = 5_000;
    pub const TIMEOUT_SECS: u64 = 30;

    pub const fn burst_size() -> u32 {
        BURST_SIZE
    }
    pub const fn requests_per_second() -> u32 {
        REQUESTS_PER_SECOND
    }
    pub const fn max_retries() -> u32 {
        MAX_RETRIES
    }
    pub const fn initial_backoff_ms() -> u64 {
        INITIAL_BACKOFF_MS
    }
    pub const fn max_backoff_ms() -> u64 {
        MAX_BACKOFF_MS
    }
    pub const fn timeout_secs() -> u64 {
        TIMEOUT_SECS
    }
}

#[derive(Args, Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    /// Outgoing RPC requests allowed per second.
    #[arg(long = "rpc-rps", default_value_t = defaults::REQUESTS_PER_SECOND, env = "RPC_REQUESTS_PER_SECOND")]
    #[serde(default = "defaults::requests_per_second")]
    pub requests_per_second: u32,

    /// Requests allowed back to back before throttling kicks in.
    #[arg(long = "rpc-burst", default_value_t = defaults::BURST_SIZE, env = "RPC_BURST_SIZE")]
    #[serde(default = "defaults::burst_size")]
    pub burst_size: u32,
}

#[derive(Args, Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retry attempts for a failed read. 0 disables retries.
    #[arg(long = "rpc-max-retries", default_value_t = defaults::MAX_RETRIES, env = "RPC_MAX_RETRIES")]
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long = "rpc-initial-backoff-ms", default_value_t = defaults::INITIAL_BACKOFF_MS, env = "RPC_INITIAL_BACKOFF_MS")]
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the exponential delay, in milliseconds.
    #[arg(long = "rpc-max-backoff-ms", default_value_t = defaults::MAX_BACKOFF_MS, env = "RPC_MAX_BACKOFF_MS")]
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// HTTP timeout for a single RPC request, in seconds.
    #[arg(long = "rpc-timeout-secs", default_value_t = defaults::TIMEOUT_SECS, env = "RPC_TIMEOUT_SECS")]
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            initial_backoff_ms: defaults::INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            timeout_secs: defaults::TIMEOUT_SECS,
        }
    }
}

/// True when any call in the packet has side effects on the wallet or ledger.
fn has_side_effects(packet: &RequestPacket) -> bool {
    match packet {
        RequestPacket::Single(req) => NON_IDEMPOTENT_METHODS.contains(&req.method()),
        RequestPacket::Batch(reqs) => reqs
            .iter()
            .any(|req| NON_IDEMPOTENT_METHODS.contains(&req.method())),
    }
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket throttle in front of the node. Over-budget requests wait for
/// a token instead of failing.
#[derive(Clone)]
pub(crate) struct ThrottleLayer {
    limiter: Arc<Limiter>,
}

impl ThrottleLayer {
    /// A zero rate or burst is clamped to one.
    pub fn new_with_config(rps: u32, burst: u32) -> Self {
        let rps = NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(
                Quota::per_second(rps).allow_burst(burst),
            )),
        }
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ThrottleService<S> {
    inner: S,
    limiter: Arc<Limiter>,
}

impl<S> Service<RequestPacket> for ThrottleService<S>
where
    S: Service<RequestPacket> + Clone + Send + Sync + 'static,
    S::Response: Send + Sync + 'static,
    S::Error: Send + Sync + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, packet: RequestPacket) -> Self::Future {
        let limiter = Arc::clone(&self.limiter);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            limiter.until_ready().await;
            inner.call(packet).await
        })
    }
}

/// Retries failed reads with jittered exponential backoff.
///
/// Whether an error is worth retrying is up to the alloy [`RetryPolicy`];
/// packets carrying a transaction submission or an account authorization are
/// always sent exactly once.
#[derive(Debug, Clone)]
pub(crate) struct RetryLayer<P> {
    policy: P,
    max_retries: u32,
    backoff: ExponentialBuilder,
}

impl<P> RetryLayer<P> {
    pub fn new(policy: P, config: &RetryConfig) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(config.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(config.max_backoff_ms))
            .with_jitter()
            .without_max_times();
        Self {
            policy,
            max_retries: config.max_retries,
            backoff,
        }
    }
}

impl<S, P: Clone> Layer<S> for RetryLayer<P> {
    type Service = RetryService<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: self.policy.clone(),
            max_retries: self.max_retries,
            backoff: self.backoff,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RetryService<S, P> {
    inner: S,
    policy: P,
    max_retries: u32,
    backoff: ExponentialBuilder,
}

impl<S, P> Service<RequestPacket> for RetryService<S, P>
where
    S: Service<RequestPacket, Response = ResponsePacket, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
    P: RetryPolicy + Clone + 'static,
{
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, packet: RequestPacket) -> Self::Future {
        let mut this = self.clone();

        if has_side_effects(&packet) {
            return Box::pin(async move { this.inner.call(packet).await });
        }

        Box::pin(async move {
            let mut delays = this.backoff.build();
            let mut attempt: u32 = 0;

            loop {
                let err = match this.inner.call(packet.clone()).await {
                    Ok(resp) => match resp.as_error() {
                        Some(payload) => TransportError::ErrorResp(payload.clone()),
                        None => return Ok(resp),
                    },
                    Err(e) => e,
                };

                if !this.policy.should_retry(&err) {
                    return Err(err);
                }

                attempt += 1;
                if attempt > this.max_retries {
                    return Err(TransportErrorKind::custom_str(&format!(
                        "gave up after {} retries: {err}",
                        this.max_retries
                    )));
                }

                let delay = this
                    .policy
                    .backoff_hint(&err)
                    .or_else(|| delays.next())
                    .unwrap_or(Duration::ZERO);

                tracing::debug!(
                    attempt,
                    max_retries = this.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "retrying RPC read"
                );

                tokio::time::sleep(delay).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::{Id, Request, SerializedRequest};

    fn packet(method: &'static str) -> RequestPacket {
        let req: SerializedRequest = Request::new(method, Id::Number(1), ())
            .try_into()
            .unwrap();
        RequestPacket::Single(req)
    }

    #[test]
    fn submissions_and_authorizations_have_side_effects() {
        assert!(has_side_effects(&packet("eth_sendTransaction")));
        assert!(has_side_effects(&packet("eth_requestAccounts")));
        assert!(!has_side_effects(&packet("eth_call")));
        assert!(!has_side_effects(&packet("eth_accounts")));
    }

    #[test]
    fn batch_with_one_submission_has_side_effects() {
        let batch = ["eth_chainId", "eth_sendTransaction"]
            .into_iter()
            .map(|m| Request::new(m, Id::Number(1), ()).try_into().unwrap())
            .collect::<Vec<SerializedRequest>>();
        assert!(has_side_effects(&RequestPacket::Batch(batch)));
    }

    #[test]
    fn zero_throttle_quota_is_clamped() {
        let layer = ThrottleLayer::new_with_config(0, 0);
        assert!(layer.limiter.check().is_ok());
    }
}
