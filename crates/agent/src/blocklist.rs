use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Shortest block actually applied.
pub const MIN_BLOCK: Duration = Duration::from_secs(1);
/// Longest block actually applied (100 years).
pub const MAX_BLOCK: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Users whose messages this agent currently ignores, with expiry times.
/// Expired entries are dropped lazily on lookup.
#[derive(Debug, Default)]
pub struct BlockList {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `user_id` for `duration`, clamped to [`MIN_BLOCK`]..=[`MAX_BLOCK`].
    /// A zero duration removes the block. Returns the new expiry.
    pub fn block(&self, user_id: &str, duration: Duration) -> Option<DateTime<Utc>> {
        self.block_at(user_id, duration, Utc::now())
    }

    pub fn block_at(
        &self,
        user_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if duration.is_zero() {
            self.unblock(user_id);
            return None;
        }
        let clamped = duration.clamp(MIN_BLOCK, MAX_BLOCK);
        let until = now
            + chrono::Duration::from_std(clamped)
                .unwrap_or_else(|_| chrono::Duration::days(100 * 365));
        self.entries.lock().insert(user_id.to_owned(), until);
        tracing::info!(user_id, until = %until, "user blocked");
        Some(until)
    }

    pub fn unblock(&self, user_id: &str) -> bool {
        let removed = self.entries.lock().remove(user_id).is_some();
        if removed {
            tracing::info!(user_id, "user unblocked");
        }
        removed
    }

    pub fn is_blocked(&self, user_id: &str) -> bool {
        self.is_blocked_at(user_id, Utc::now())
    }

    pub fn is_blocked_at(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(user_id) {
            Some(until) if *until > now => true,
            Some(_) => {
                entries.remove(user_id);
                false
            }
            None => false,
        }
    }

    /// Active blocks with their remaining time, soonest expiry first.
    pub fn list(&self) -> Vec<(String, Duration)> {
        self.list_at(Utc::now())
    }

    pub fn list_at(&self, now: DateTime<Utc>) -> Vec<(String, Duration)> {
        let mut active: Vec<(String, Duration)> = self
            .entries
            .lock()
            .iter()
            .filter_map(|(user, until)| {
                let left = (*until - now).to_std().ok()?;
                (!left.is_zero()).then(|| (user.clone(), left))
            })
            .collect();
        active.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        active
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Seconds requested by the model as a [`Duration`]. Missing or non-finite
/// values use `default_secs`; negative values count as zero.
pub fn duration_from_secs(secs: Option<f64>, default_secs: f64) -> Duration {
    let secs = match secs {
        Some(s) if s.is_finite() => s,
        _ => default_secs,
    };
    Duration::from_secs_f64(secs.clamp(0.0, MAX_BLOCK.as_secs_f64()))
}
