// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory cache of resolved resource locators
//!
//! Maps a kind name to the locator discovery resolved for it, so repeated
//! operations on the same kind skip the discovery round-trip.
//!
//! Thread safety:
//! - Lookups take the shared lock, inserts and invalidations the exclusive one
//! - No lock is ever held across a network call, so concurrent resolutions of
//!   different kinds cannot deadlock
//! - Only successful resolutions are ever inserted

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::trace;

use super::discovery::ResourceLocator;

/// Cached locator with the time it was resolved
struct CachedLocator {
    locator: ResourceLocator,
    resolved_at: Instant,
}

impl CachedLocator {
    fn new(locator: ResourceLocator) -> Self {
        Self {
            locator,
            resolved_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.resolved_at.elapsed() < ttl,
            None => true, // Indefinite caching
        }
    }
}

/// Concurrent kind name -> locator cache
pub struct LocatorCache {
    entries: RwLock<HashMap<String, CachedLocator>>,
    /// None keeps entries for the lifetime of the process
    ttl: Option<Duration>,
}

impl LocatorCache {
    /// Create an empty cache whose entries never expire
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a kind. Expired entries read as a miss.
    pub async fn get(&self, kind: &str) -> Option<ResourceLocator> {
        let entries = self.entries.read().await;
        let cached = entries.get(kind)?;
        if cached.is_fresh(self.ttl) {
            trace!(kind = %kind, "Locator cache hit");
            Some(cached.locator.clone())
        } else {
            trace!(kind = %kind, "Locator cache entry expired");
            None
        }
    }

    /// Store a resolved locator. Re-storing the same kind replaces the entry.
    pub async fn put(&self, kind: &str, locator: ResourceLocator) {
        let mut entries = self.entries.write().await;
        entries.insert(kind.to_string(), CachedLocator::new(locator));
    }

    /// Drop a single kind, e.g. after a CRD was reinstalled at another version
    pub async fn invalidate(&self, kind: &str) -> bool {
        self.entries.write().await.remove(kind).is_some()
    }

    /// Drop every cached locator
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries (expired ones included)
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for LocatorCache {
    fn default() -> Self {
        Self::new()
    }
}
