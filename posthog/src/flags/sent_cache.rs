use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::utils::time::Clock;

/// Identity of one `$feature_flag_called` emission. The response rendering is
/// part of the key, so a flag changing value for the same subject is reported
/// again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SentFlagKey {
    pub flag_key: String,
    pub distinct_id: String,
    pub response: String,
}

/// Bounded dedupe set for `$feature_flag_called` events.
///
/// Entries expire on a sliding window: every sighting refreshes the entry's
/// timestamp. When an insert pushes the cache over its size limit, the oldest
/// configured fraction of entries is dropped in one compaction sweep.
/// Emission is tied to insertion: whoever inserts the key emits the event,
/// and an entry that expired or was compacted away re-emits on its next
/// observation.
pub struct FeatureFlagSentCache {
    entries: Mutex<HashMap<SentFlagKey, DateTime<Utc>>>,
    size_limit: usize,
    sliding_expiration: chrono::Duration,
    compaction_percentage: f64,
    clock: Arc<dyn Clock>,
}

impl FeatureFlagSentCache {
    pub fn new(
        size_limit: usize,
        sliding_expiration: Duration,
        compaction_percentage: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        FeatureFlagSentCache {
            entries: Mutex::new(HashMap::new()),
            size_limit,
            sliding_expiration: chrono::Duration::from_std(sliding_expiration)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
            compaction_percentage,
            clock,
        }
    }

    /// Returns true when the caller should emit the event.
    pub fn check_and_insert(&self, key: SentFlagKey) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("sent cache lock poisoned");

        entries.retain(|_, last_touched| now - *last_touched < self.sliding_expiration);

        if let Some(last_touched) = entries.get_mut(&key) {
            *last_touched = now;
            return false;
        }

        entries.insert(key, now);
        if entries.len() > self.size_limit {
            Self::compact(&mut entries, self.compaction_percentage);
        }
        true
    }

    fn compact(entries: &mut HashMap<SentFlagKey, DateTime<Utc>>, percentage: f64) {
        let to_remove = ((entries.len() as f64 * percentage).ceil() as usize).max(1);

        let mut by_age: Vec<(SentFlagKey, DateTime<Utc>)> = entries
            .iter()
            .map(|(key, touched)| (key.clone(), *touched))
            .collect();
        by_age.sort_by_key(|(_, touched)| *touched);

        for (key, _) in by_age.into_iter().take(to_remove) {
            entries.remove(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().expect("sent cache lock poisoned").len()
    }
}
