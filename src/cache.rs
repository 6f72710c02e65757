// src/cache.rs
//! Short-lived in-memory cache for read responses.
//!
//! Entries are stored as JSON values keyed by `method:arg1:arg2...` and expire
//! after a per-category TTL.

use crate::config::CacheConfig;
use crate::error::Result;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Data category, each with its own TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    AccountInfo,
    Balance,
    Blockhash,
    TokenAccountBalance,
    TokenAccounts,
    ProgramAccounts,
}

impl CacheCategory {
    /// RPC method name, used as the key prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheCategory::AccountInfo => "getAccountInfo",
            CacheCategory::Balance => "getBalance",
            CacheCategory::Blockhash => "getLatestBlockhash",
            CacheCategory::TokenAccountBalance => "getTokenAccountBalance",
            CacheCategory::TokenAccounts => "getTokenAccountsByOwner",
            CacheCategory::ProgramAccounts => "getProgramAccounts",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "entries: {}, hits: {}, misses: {}, evictions: {}, hit rate: {:.1}%",
            self.entries,
            self.hits,
            self.misses,
            self.evictions,
            self.hit_rate() * 100.0
        )
    }
}

pub struct ReadCache {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ReadCache {
    pub fn new(config: CacheConfig) -> Self {
        if config.enabled {
            info!(
                "Read cache enabled (max {} entries, blockhash TTL {}ms)",
                config.max_entries, config.blockhash_ttl_ms
            );
        }
        Self {
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl_for(&self, category: CacheCategory) -> Duration {
        let ms = match category {
            CacheCategory::AccountInfo => self.config.account_info_ttl_ms,
            CacheCategory::Balance => self.config.balance_ttl_ms,
            CacheCategory::Blockhash => self.config.blockhash_ttl_ms,
            CacheCategory::TokenAccountBalance => self.config.token_account_balance_ttl_ms,
            CacheCategory::TokenAccounts => self.config.token_accounts_ttl_ms,
            CacheCategory::ProgramAccounts => self.config.program_accounts_ttl_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn is_enabled_for(&self, category: CacheCategory) -> bool {
        self.config.enabled && self.config.max_entries > 0 && !self.ttl_for(category).is_zero()
    }

    pub fn generate_key(prefix: &str, params: &[&str]) -> String {
        let mut key = prefix.to_string();
        for param in params {
            key.push(':');
            key.push_str(param);
        }
        key
    }

    pub fn get_json<T: DeserializeOwned>(&self, category: CacheCategory, params: &[&str]) -> Option<T> {
        if !self.is_enabled_for(category) {
            return None;
        }

        let key = Self::generate_key(category.prefix(), params);
        let now = Instant::now();

        let cached = match self.entries.get(&key) {
            Some(entry) if entry.is_valid(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache MISS for key: {}", key);
                return None;
            }
        };

        let Some(value) = cached else {
            self.entries.remove_if(&key, |_, entry| !entry.is_valid(now));
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache EXPIRED for key: {}", key);
            return None;
        };

        match serde_json::from_value::<T>(value) {
            Ok(decoded) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache HIT for key: {}", key);
                Some(decoded)
            }
            Err(e) => {
                warn!("Failed to deserialize cached JSON for key {}: {}", key, e);
                self.entries.remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set_ex<T: Serialize>(&self, category: CacheCategory, params: &[&str], value: &T) -> Result<()> {
        if !self.is_enabled_for(category) {
            return Ok(());
        }

        let key = Self::generate_key(category.prefix(), params);
        let entry = CacheEntry {
            value: serde_json::to_value(value)?,
            expires_at: Instant::now() + self.ttl_for(category),
        };

        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.make_room();
        }

        debug!("Cache SET for key: {} (TTL {:?})", key, self.ttl_for(category));
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Drops expired entries, then the soonest-to-expire one if still full
    fn make_room(&self) {
        let purged = self.purge_expired();
        if purged > 0 && self.entries.len() < self.config.max_entries {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Cache evicted key: {}", key);
        }
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        }
        purged
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
