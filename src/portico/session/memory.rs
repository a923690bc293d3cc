//! In-process session store for development and tests.

use anyhow::Result;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;

use super::{SessionBag, SessionId, SessionStore};
use crate::portico::BoxFuture;

/// Upper bound on how long expired entries may linger between sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

struct Entry {
    bag: SessionBag,
    written_at: Instant,
}

struct Entries {
    map: HashMap<SessionId, Entry>,
    swept_at: Instant,
}

impl Entries {
    fn purge(&mut self, ttl: Duration) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| entry.written_at.elapsed() <= ttl);
        self.swept_at = Instant::now();
        before - self.map.len()
    }
}

/// Session store backed by a process-local map.
///
/// Entries expire `ttl` after their last write. Reads check expiry for the
/// requested id; writes sweep the whole map at most once per `ttl` (capped at
/// an hour), so abandoned sessions do not accumulate.
pub struct MemorySessionStore {
    ttl: Duration,
    entries: Mutex<Entries>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                swept_at: Instant::now(),
            }),
        }
    }

    /// Number of stored sessions, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired session now; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let removed = self.entries.lock().await.purge(self.ttl);
        if removed > 0 {
            debug!(removed, "purged expired sessions");
        }
        removed
    }
}

impl SessionStore for MemorySessionStore {
    fn get<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, Result<Option<SessionBag>>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let expired = match entries.map.get(id) {
                Some(entry) => entry.written_at.elapsed() > self.ttl,
                None => return Ok(None),
            };
            if expired {
                debug!("Session expired");
                entries.map.remove(id);
                return Ok(None);
            }
            Ok(entries.map.get(id).map(|entry| entry.bag.clone()))
        })
    }

    fn set<'a>(&'a self, id: &'a SessionId, bag: SessionBag) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            if entries.swept_at.elapsed() >= self.ttl.min(SWEEP_INTERVAL) {
                let removed = entries.purge(self.ttl);
                debug!(removed, "swept expired sessions");
            }
            entries.map.insert(
                id.clone(),
                Entry {
                    bag,
                    written_at: Instant::now(),
                },
            );
            Ok(())
        })
    }

    fn remove<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.entries.lock().await.map.remove(id);
            Ok(())
        })
    }
}
