use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

/// Process-wide key/value cache, grouped like the host's object cache.
#[derive(Debug, Default)]
pub struct ObjectCache {
    entries: Mutex<HashMap<(String, String), Value>>,
}

impl ObjectCache {
    pub fn get(&self, group: &str, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .get(&(group.to_string(), key.to_string()))
            .cloned()
    }

    pub fn set(&self, group: &str, key: &str, value: Value) {
        self.entries
            .lock()
            .insert((group.to_string(), key.to_string()), value);
    }

    pub fn delete(&self, group: &str, key: &str) -> bool {
        self.entries
            .lock()
            .remove(&(group.to_string(), key.to_string()))
            .is_some()
    }

    pub fn flush(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
