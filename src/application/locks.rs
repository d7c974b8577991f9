//! Keyed exclusive sections
//!
//! One async mutex per key (proposal id, voter id), created on first use.
//! Acquisition is bounded by a timeout and retried a fixed number of times
//! before giving up with `ConcurrencyTimeout`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::application::errors::{EngineError, EngineResult};

pub type SectionGuard = OwnedMutexGuard<()>;

pub struct KeyedLocks {
    kind: &'static str,
    sections: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
    attempts: u32,
}

impl KeyedLocks {
    pub fn new(kind: &'static str, timeout: Duration, attempts: u32) -> Self {
        Self {
            kind,
            sections: Mutex::new(HashMap::new()),
            timeout,
            attempts: attempts.max(1),
        }
    }

    fn section(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut sections = self.sections.lock().unwrap_or_else(|e| e.into_inner());
        sections
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Exclusive section for `key`
    pub async fn acquire(&self, key: &str) -> EngineResult<SectionGuard> {
        let section = self.section(key);
        for attempt in 1..=self.attempts {
            match tokio::time::timeout(self.timeout, section.clone().lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => {
                    tracing::warn!(
                        "Waiting for {} {} (attempt {}/{})",
                        self.kind,
                        key,
                        attempt,
                        self.attempts
                    );
                }
            }
        }
        Err(EngineError::ConcurrencyTimeout(format!("{} {}", self.kind, key)))
    }

    /// Sections for every key, taken in sorted order so that two callers
    /// sharing keys cannot deadlock
    pub async fn acquire_all(&self, keys: &[&str]) -> EngineResult<Vec<SectionGuard>> {
        let mut sorted: Vec<&str> = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key).await?);
        }
        Ok(guards)
    }
}
