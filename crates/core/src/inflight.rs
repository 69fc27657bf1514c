use std::time::Duration;

use alloy::primitives::Address;
use moka::{
    future::Cache,
    ops::compute::{CompResult, Op},
};

/// Accounts with a mutating action in progress.
///
/// Entries expire after the TTL so an action that never released its slot
/// cannot block the account for the rest of the session.
#[derive(Clone)]
pub struct InflightTracker {
    cache: Cache<Address, ()>,
}

impl InflightTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Claims `account`. Returns false when it is already claimed.
    pub async fn try_insert(&self, account: Address) -> bool {
        let result = self
            .cache
            .entry(account)
            .and_compute_with(|entry| async move {
                if entry.is_some() { Op::Nop } else { Op::Put(()) }
            })
            .await;

        matches!(result, CompResult::Inserted(_))
    }

    pub async fn remove(&self, account: &Address) {
        self.cache.invalidate(account).await;
    }

    /// Claims `account` for the lifetime of the returned guard.
    pub async fn acquire(&self, account: Address) -> Option<InflightGuard> {
        self.try_insert(account).await.then(|| InflightGuard {
            tracker: self.clone(),
            account: Some(account),
        })
    }
}

/// Releases the account's slot when dropped.
pub struct InflightGuard {
    tracker: InflightTracker,
    account: Option<Address>,
}

impl InflightGuard {
    pub async fn release(mut self) {
        if let Some(account) = self.account.take() {
            self.tracker.remove(&account).await;
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Some(account) = self.account.take() {
            let tracker = self.tracker.clone();
            // Dropped without `release` (early return or cancellation).
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { tracker.remove(&account).await });
                }
                Err(_) => tracing::warn!(%account, "in-flight slot left to expire"),
            }
        }
    }
}
