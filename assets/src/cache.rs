//! Token account lookups per owner, memoized for a fixed time window.
//!
//! Staleness is measured with an injected [`Clock`] so callers (and tests)
//! control time explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_program::pubkey::Pubkey;
use tokio::sync::RwLock;

use crate::rpc::KeyedAccount;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + Duration::from_millis(self.offset_ms.load(Ordering::Relaxed))
    }
}

struct CachedTokenAccounts {
    fetched_at: Instant,
    value: Vec<KeyedAccount>,
}

/// Cache of `getTokenAccountsByOwner` results keyed by (owner, token program)
pub struct TokenAccountCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: RwLock<HashMap<(Pubkey, Pubkey), CachedTokenAccounts>>,
}

impl TokenAccountCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_system_clock(ttl: Duration) -> Self {
        Self::new(Arc::new(SystemClock), ttl)
    }

    /// Fresh entry for the owner, if any
    pub async fn get(&self, owner: &Pubkey, program_id: &Pubkey) -> Option<Vec<KeyedAccount>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(&(*owner, *program_id))
            .filter(|c| now.saturating_duration_since(c.fetched_at) < self.ttl)
            .map(|c| c.value.clone())
    }

    pub async fn insert(&self, owner: Pubkey, program_id: Pubkey, value: Vec<KeyedAccount>) {
        let fetched_at = self.clock.now();
        self.entries
            .write()
            .await
            .insert((owner, program_id), CachedTokenAccounts { fetched_at, value });
    }

    /// Drop every entry for the owner, across token programs
    pub async fn invalidate(&self, owner: &Pubkey) {
        self.entries.write().await.retain(|(o, _), _| o != owner);
    }

    /// Remove expired entries
    pub async fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, c| now.saturating_duration_since(c.fetched_at) < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
