//! In-memory blackboard shared between the refresh loops and the web layer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::{DashboardRepo, RepoChangelog};

pub const DASHBOARD_REPOS_KEY: &str = "dashboard_repos";
pub const DASHBOARD_CHANGELOGS_KEY: &str = "dashboard_changelogs";

/// Values published by the refresh cycles. Each is replaced wholesale.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Repos(Arc<Vec<DashboardRepo>>),
    Changelogs(Arc<Vec<RepoChangelog>>),
}

/// How long a stored value stays visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// The cache's configured default.
    Default,
    Never,
    After(Duration),
}

pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedValue>;

    fn set(&self, key: &str, value: CachedValue, expiration: Expiration);
}

#[derive(Debug)]
struct Entry {
    value: CachedValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// TTL cache held in process memory.
#[derive(Debug, Clone)]
pub struct LocalCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    default_expiration: Option<Duration>,
}

impl LocalCache {
    /// A zero `default_expiration` means entries never expire by default.
    pub fn new(default_expiration: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_expiration: Some(default_expiration).filter(|d| !d.is_zero()),
        }
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn spawn_janitor(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Purged expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

impl Cache for LocalCache {
    fn get(&self, key: &str) -> Option<CachedValue> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    fn set(&self, key: &str, value: CachedValue, expiration: Expiration) {
        let ttl = match expiration {
            Expiration::Default => self.default_expiration,
            Expiration::Never => None,
            Expiration::After(ttl) => Some(ttl),
        };
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), Entry { value, expires_at });
    }
}
