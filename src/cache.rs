use std::collections::HashMap;
use std::hash::Hash;

use bitflags::bitflags;
use log::debug;

bitflags! {
    /// Debugger target events that invalidate process-scoped caches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TargetEvents: u32 {
        const MODULES_LOADED = 1;
        const MODULES_UNLOADED = 1 << 1;
        const SYMBOLS_LOADED = 1 << 2;
    }
}

/// A map of values keyed per debugged process. Entries for a process are
/// dropped collectively when the target reports any of the events the cache
/// was created with.
#[derive(Debug)]
pub struct ProcessCache<K, V> {
    name: &'static str,
    clear_on: TargetEvents,
    per_process: HashMap<u64, HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> ProcessCache<K, V> {
    #[must_use]
    pub fn new(name: &'static str, clear_on: TargetEvents) -> Self {
        Self {
            name,
            clear_on,
            per_process: HashMap::new(),
        }
    }

    pub fn get(&self, process_id: u64, key: &K) -> Option<V> {
        self.per_process.get(&process_id)?.get(key).cloned()
    }

    pub fn set(&mut self, process_id: u64, key: K, value: V) {
        self.per_process.entry(process_id).or_default().insert(key, value);
    }

    /// React to target events of one process; clears that process' entries
    /// when an event of interest arrived.
    pub fn handle_target_events(&mut self, process_id: u64, events: TargetEvents) {
        if events.intersects(self.clear_on) && self.per_process.remove(&process_id).is_some() {
            debug!("[{}.Process.{process_id}]: Got an event, clear the cache", self.name);
        }
    }

    pub fn clear(&mut self) {
        self.per_process.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_clear_only_matching_process() {
        let mut cache = ProcessCache::new("test", TargetEvents::MODULES_LOADED);
        cache.set(1, "key", 10);
        cache.set(2, "key", 20);

        cache.handle_target_events(1, TargetEvents::SYMBOLS_LOADED);
        assert_eq!(cache.get(1, &"key"), Some(10));

        cache.handle_target_events(1, TargetEvents::MODULES_LOADED);
        assert_eq!(cache.get(1, &"key"), None);
        assert_eq!(cache.get(2, &"key"), Some(20));
    }
}
