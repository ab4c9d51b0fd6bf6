//! Per-topic liveness tracking.
//!
//! The state map is published, as a JSON object of `topic → bool`, to the
//! last-will topic whenever a metric comes online, goes offline or is
//! unloaded. Consumers of that retained message see the bridge membership at
//! a glance, and the broker replaces it with the last-will payload when the
//! bridge disappears uncleanly.

use std::collections::BTreeMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Concurrent `topic → alive` map.
///
/// Every mutation reports whether it changed anything, so callers only
/// republish the snapshot on real transitions.
#[derive(Debug, Default)]
pub struct StateMap {
    entries: DashMap<String, bool>,
}

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a metric's liveness, creating the entry if needed.
    ///
    /// Returns `true` when the entry is new or its value changed.
    pub fn record(&self, topic: &str, alive: bool) -> bool {
        match self.entries.entry(topic.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == alive {
                    false
                } else {
                    entry.insert(alive);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(alive);
                true
            }
        }
    }

    /// Set `topic` to `new` only if it currently holds `current`.
    ///
    /// Missing entries are never created. Returns `true` if the swap happened.
    pub fn compare_and_swap(&self, topic: &str, current: bool, new: bool) -> bool {
        match self.entries.get_mut(topic) {
            Some(mut value) if *value == current => {
                *value = new;
                true
            }
            _ => false,
        }
    }

    /// Remove a topic. Returns `true` if it was present.
    pub fn remove(&self, topic: &str) -> bool {
        self.entries.remove(topic).is_some()
    }

    pub fn get(&self, topic: &str) -> Option<bool> {
        self.entries.get(topic).map(|value| *value)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy, ordered by topic.
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Serialize the snapshot as a JSON object with sorted keys.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reports_changes() {
        let state = StateMap::new();

        assert!(state.record("m/a", true));
        assert!(!state.record("m/a", true));
        assert!(state.record("m/a", false));
        assert_eq!(state.get("m/a"), Some(false));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_compare_and_swap() {
        let state = StateMap::new();
        state.record("m/a", false);

        assert!(!state.compare_and_swap("m/a", true, false));
        assert!(state.compare_and_swap("m/a", false, true));
        assert_eq!(state.get("m/a"), Some(true));
        assert!(!state.compare_and_swap("m/a", false, true));

        // Missing entries are not created.
        assert!(!state.compare_and_swap("m/b", false, true));
        assert!(!state.contains("m/b"));
    }

    #[test]
    fn test_remove() {
        let state = StateMap::new();
        state.record("m/a", true);

        assert!(state.remove("m/a"));
        assert!(!state.remove("m/a"));
        assert!(state.is_empty());
    }

    #[test]
    fn test_json_snapshot_is_sorted() {
        let state = StateMap::new();
        state.record("m/b", true);
        state.record("m/a", false);
        state.record("m/c", true);

        let json = String::from_utf8(state.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"m/a":false,"m/b":true,"m/c":true}"#);
    }

    #[test]
    fn test_concurrent_transitions_flip_once() {
        let state = std::sync::Arc::new(StateMap::new());
        state.record("m/a", false);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || state.compare_and_swap("m/a", false, true))
            })
            .collect();

        let flips = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|flipped| *flipped)
            .count();
        assert_eq!(flips, 1);
    }
}
