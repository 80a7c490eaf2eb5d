use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use super::model::StoredSecret;

/// Most expired entries removed per lock acquisition during a sweep.
pub const SWEEP_BATCH: usize = 1024;

/// Result of a retrieval. `Value` and `Burned` both hand back the blob;
/// `Burned` marks the read that consumed the last view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetResult {
    Value(Bytes),
    Burned(Bytes),
    /// Never stored, revoked, burned or swept.
    NotFound,
    /// Expiry passed; the entry was removed by this call.
    Expired,
    /// No views left; the entry was removed by this call.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Success,
    NotFound,
    Expired,
    Exhausted,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
        }
    }
}

impl GetResult {
    pub fn reason(&self) -> Reason {
        match self {
            Self::Value(_) | Self::Burned(_) => Reason::Success,
            Self::NotFound => Reason::NotFound,
            Self::Expired => Reason::Expired,
            Self::Exhausted => Reason::Exhausted,
        }
    }

    pub fn into_blob(self) -> Option<Bytes> {
        match self {
            Self::Value(blob) | Self::Burned(blob) => Some(blob),
            _ => None,
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Generate a drop identifier: 128 random bits as 32 hex chars.
/// Collisions are not checked for.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Thread-safe handle to the in-memory secret map.
///
/// Every operation takes the one lock for its whole check-then-mutate
/// sequence, so operations on the same id are linearizable. Nothing is
/// persisted: dropping the last handle drops every secret.
#[derive(Clone, Default)]
pub struct Store {
    secrets: Arc<Mutex<HashMap<String, StoredSecret>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections never panic midway, so a poisoned map is still
    // consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredSecret>> {
        self.secrets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite a secret.
    pub fn put(&self, id: &str, blob: Bytes, max_views: u32, expires_at: i64) {
        self.lock()
            .insert(id.to_owned(), StoredSecret::new(blob, max_views, expires_at));
        debug!(id = %id, max_views, expires_at, "stored secret");
    }

    /// Retrieve a secret, spending one view.
    pub fn get(&self, id: &str) -> GetResult {
        self.get_at(id, unix_now())
    }

    /// [`Store::get`] against an explicit clock reading.
    pub fn get_at(&self, id: &str, now: i64) -> GetResult {
        let mut secrets = self.lock();

        let Some(secret) = secrets.get_mut(id) else {
            return GetResult::NotFound;
        };

        if secret.is_expired(now) {
            secrets.remove(id);
            debug!(id = %id, "lazy-evicted expired secret");
            return GetResult::Expired;
        }
        if secret.is_exhausted() {
            secrets.remove(id);
            debug!(id = %id, "evicted exhausted secret");
            return GetResult::Exhausted;
        }

        let blob = secret.blob.clone();
        secret.views_remaining -= 1;
        if secret.views_remaining == 0 {
            secrets.remove(id);
            debug!(id = %id, "burned after final read");
            GetResult::Burned(blob)
        } else {
            GetResult::Value(blob)
        }
    }

    /// Remove a secret. Returns true if it existed.
    pub fn delete(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove up to `batch` entries that are expired at `now` (or hold no
    /// views). Returns how many were removed.
    pub fn prune(&self, now: i64, batch: usize) -> usize {
        let mut secrets = self.lock();
        let dead: Vec<String> = secrets
            .iter()
            .filter(|(_, s)| s.is_expired(now) || s.is_exhausted())
            .map(|(id, _)| id.clone())
            .take(batch)
            .collect();
        for id in &dead {
            secrets.remove(id);
        }
        dead.len()
    }

    /// Prune everything expired, one batch per lock acquisition, yielding to
    /// foreground requests between batches.
    pub async fn sweep(&self) -> usize {
        let now = unix_now();
        let mut total = 0;
        loop {
            let removed = self.prune(now, SWEEP_BATCH);
            total += removed;
            if removed < SWEEP_BATCH {
                return total;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Spawn a background Tokio task that calls [`Store::sweep`] every
    /// `interval` until the returned handle is stopped or dropped.
    pub fn spawn_sweep(self, interval: Duration) -> SweepHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep().await;
                        if removed > 0 {
                            info!(removed, "swept expired secrets");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            debug!("background sweep stopped");
                            return;
                        }
                    }
                }
            }
        });
        SweepHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Owner of the background sweep task.
pub struct SweepHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the sweep to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "background sweep ended abnormally");
        }
    }
}
