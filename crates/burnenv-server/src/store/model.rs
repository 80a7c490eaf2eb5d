use bytes::Bytes;

/// One stored drop. The blob is the raw envelope JSON and is never parsed
/// here; only the lifecycle fields are read.
#[derive(Debug, Clone)]
pub struct StoredSecret {
    pub blob: Bytes,
    /// Starts at `max_views`, only ever decremented.
    pub views_remaining: u32,
    /// Unix timestamp (seconds) from which the drop is gone.
    pub expires_at: i64,
}

impl StoredSecret {
    pub fn new(blob: Bytes, max_views: u32, expires_at: i64) -> Self {
        Self {
            blob,
            views_remaining: max_views,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.views_remaining == 0
    }
}
