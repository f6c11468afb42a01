//! Rejects signed events seen before.
//!
//! An event is only accepted within [`MAX_CLOCK_SKEW_SECS`] of its
//! timestamp, so ids are remembered for that long and no longer.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::event::MAX_CLOCK_SKEW_SECS;
use crate::{AuthError, Result};

/// Event ids accepted inside the skew window.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    seen: Mutex<HashMap<String, u64>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id`, failing if it was already accepted.
    pub fn admit(&self, id: &str, created_at: u64, now: u64) -> Result<()> {
        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.abs_diff(*at) <= MAX_CLOCK_SKEW_SECS);

        let id = id.to_ascii_lowercase();
        if seen.contains_key(&id) {
            tracing::warn!(%id, "replayed request event");
            return Err(AuthError::InvalidEvent("replayed event".into()));
        }
        seen.insert(id, created_at);
        Ok(())
    }

    /// Ids currently remembered.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
