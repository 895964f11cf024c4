//! Warm sandbox pool
//!
//! Caches idle sandboxes keyed by language to avoid cold-start cost. Each
//! language has its own shelf with its own lock, so acquisition and release
//! for different languages never contend on a global lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::sandbox::Sandbox;

type Shelf = Arc<Mutex<VecDeque<Sandbox>>>;

pub struct WarmPool {
    shelves: RwLock<HashMap<String, Shelf>>,
    idle_ttl: Duration,
}

impl WarmPool {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            shelves: RwLock::new(HashMap::new()),
            idle_ttl,
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    async fn shelf(&self, language: &str) -> Shelf {
        if let Some(shelf) = self.shelves.read().await.get(language) {
            return shelf.clone();
        }
        let mut shelves = self.shelves.write().await;
        shelves
            .entry(language.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Take an idle sandbox for the language, marking it busy
    pub async fn checkout(&self, language: &str) -> Option<Sandbox> {
        let shelf = self.shelf(language).await;
        let mut shelf = shelf.lock().await;
        let mut sandbox = shelf.pop_front()?;
        sandbox.mark_busy();
        debug!(
            "Warm pool hit for {}: sandbox {} (runs so far: {})",
            language, sandbox.id, sandbox.execution_count
        );
        Some(sandbox)
    }

    /// Return a sandbox to the pool, marking it idle
    pub async fn park(&self, mut sandbox: Sandbox) {
        sandbox.mark_idle();
        let shelf = self.shelf(&sandbox.language).await;
        shelf.lock().await.push_back(sandbox);
    }

    /// Remove sandboxes idle beyond the TTL; the caller destroys them
    pub async fn evict_expired(&self) -> Vec<Sandbox> {
        let mut expired = Vec::new();
        let shelves = self.shelves.read().await;
        for shelf in shelves.values() {
            let mut shelf = shelf.lock().await;
            // Queue order means the front is always the longest-idle
            while shelf
                .front()
                .is_some_and(|s| s.idle_for() >= self.idle_ttl)
            {
                expired.extend(shelf.pop_front());
            }
        }
        expired
    }

    /// Empty the entire pool; the caller destroys the returned sandboxes
    pub async fn drain(&self) -> Vec<Sandbox> {
        let mut all = Vec::new();
        let shelves = self.shelves.read().await;
        for shelf in shelves.values() {
            all.extend(shelf.lock().await.drain(..));
        }
        all
    }

    pub async fn idle_count(&self) -> usize {
        let shelves = self.shelves.read().await;
        let mut count = 0;
        for shelf in shelves.values() {
            count += shelf.lock().await.len();
        }
        count
    }
}
