//! Named extension points.
//!
//! A tag maps to callbacks ordered by priority (lower runs first) and, within
//! one priority, by registration order. Filters thread a value through every
//! callback; actions ignore the returned value and bump a fired counter.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use serde_json::Value;

/// Priority used when callers have no preference.
pub const PRIORITY_DEFAULT: i32 = 10;
/// Runs after every other callback on the tag.
pub const PRIORITY_LAST: i32 = i32::MAX;
/// Runs before every other callback on the tag.
pub const PRIORITY_FIRST: i32 = i32::MIN;

/// Tags the runtime fires itself.
pub mod tags {
    /// Filter over the outgoing status code.
    pub const STATUS_HEADER: &str = "status_header";
    /// Action fired with `[name, value]` for every outgoing header.
    pub const SEND_HEADER: &str = "send_header";
    /// Filter over a redirect location; args `[status]`. A falsy result
    /// cancels the redirect.
    pub const REDIRECT: &str = "wp_redirect";
    /// Filter over a redirect status; args `[location]`.
    pub const REDIRECT_STATUS: &str = "wp_redirect_status";
    /// Filter that may short-circuit an outbound HTTP call.
    pub const PRE_HTTP_REQUEST: &str = "pre_http_request";
    /// Action fired after every outbound HTTP call with `[outcome, url]`.
    pub const HTTP_API_DEBUG: &str = "http_api_debug";
    /// Filter over every SQL statement before it reaches the database.
    pub const QUERY: &str = "query";
    /// Filter producing markup appended after a rendered page.
    pub const FOOTER: &str = "wp_footer";
}

pub type HookCallback = Arc<dyn Fn(Value, &[Value]) -> Value + Send + Sync>;

/// One registered callback.
#[derive(Clone)]
pub struct HookEntry {
    pub id: String,
    pub callback: HookCallback,
}

impl fmt::Debug for HookEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEntry")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Everything the hook layer keeps between calls.
///
/// `Clone` copies every priority list, so a clone never aliases the lists
/// of the value it came from.
#[derive(Debug, Clone, Default)]
pub struct HookState {
    callbacks: HashMap<String, BTreeMap<i32, Vec<HookEntry>>>,
    fired: HashMap<String, u64>,
    firing: Vec<String>,
}

impl HookState {
    pub fn add(
        &mut self,
        tag: &str,
        id: impl Into<String>,
        priority: i32,
        callback: HookCallback,
    ) {
        self.callbacks
            .entry(tag.to_string())
            .or_default()
            .entry(priority)
            .or_default()
            .push(HookEntry {
                id: id.into(),
                callback,
            });
    }

    /// Removes the first entry registered under `id` at `priority`.
    pub fn remove(&mut self, tag: &str, id: &str, priority: i32) -> bool {
        let Some(by_priority) = self.callbacks.get_mut(tag) else {
            return false;
        };
        let Some(entries) = by_priority.get_mut(&priority) else {
            return false;
        };
        let Some(position) = entries.iter().position(|entry| entry.id == id)
        else {
            return false;
        };

        entries.remove(position);
        if entries.is_empty() {
            by_priority.remove(&priority);
        }
        if by_priority.is_empty() {
            self.callbacks.remove(tag);
        }
        true
    }

    pub fn remove_all(&mut self, tag: &str) {
        self.callbacks.remove(tag);
    }

    /// Priority of `id` on `tag`, if registered.
    pub fn priority_of(&self, tag: &str, id: &str) -> Option<i32> {
        self.callbacks.get(tag).and_then(|by_priority| {
            by_priority.iter().find_map(|(priority, entries)| {
                entries
                    .iter()
                    .any(|entry| entry.id == id)
                    .then_some(*priority)
            })
        })
    }

    pub fn has(&self, tag: &str) -> bool {
        self.callbacks
            .get(tag)
            .is_some_and(|by_priority| !by_priority.is_empty())
    }

    /// Callbacks for `tag` in execution order.
    pub fn ordered(&self, tag: &str) -> Vec<HookCallback> {
        self.callbacks
            .get(tag)
            .map(|by_priority| {
                by_priority
                    .values()
                    .flatten()
                    .map(|entry| entry.callback.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entry ids for `tag` in execution order.
    pub fn ids(&self, tag: &str) -> Vec<(i32, String)> {
        self.callbacks
            .get(tag)
            .map(|by_priority| {
                by_priority
                    .iter()
                    .flat_map(|(priority, entries)| {
                        entries.iter().map(|entry| (*priority, entry.id.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }

    pub fn fired(&self, tag: &str) -> u64 {
        self.fired.get(tag).copied().unwrap_or(0)
    }

    pub fn firing(&self) -> &[String] {
        &self.firing
    }
}

/// Thread-safe wrapper the runtime exposes.
///
/// Callbacks always run with the lock released so they are free to register
/// or remove hooks themselves.
#[derive(Debug, Default)]
pub struct Hooks {
    state: Mutex<HookState>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter<F>(
        &self,
        tag: &str,
        id: impl Into<String>,
        priority: i32,
        callback: F,
    ) where
        F: Fn(Value, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.state.lock().add(tag, id, priority, Arc::new(callback));
    }

    pub fn add_action<F>(
        &self,
        tag: &str,
        id: impl Into<String>,
        priority: i32,
        callback: F,
    ) where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.add_filter(tag, id, priority, move |value, args| {
            callback(args);
            value
        });
    }

    pub fn remove_filter(&self, tag: &str, id: &str, priority: i32) -> bool {
        self.state.lock().remove(tag, id, priority)
    }

    pub fn remove_action(&self, tag: &str, id: &str, priority: i32) -> bool {
        self.remove_filter(tag, id, priority)
    }

    pub fn remove_all(&self, tag: &str) {
        self.state.lock().remove_all(tag);
    }

    pub fn has_filter(&self, tag: &str) -> bool {
        self.state.lock().has(tag)
    }

    pub fn priority_of(&self, tag: &str, id: &str) -> Option<i32> {
        self.state.lock().priority_of(tag, id)
    }

    pub fn apply_filters(&self, tag: &str, value: Value, args: &[Value]) -> Value {
        let callbacks = {
            let mut state = self.state.lock();
            let callbacks = state.ordered(tag);
            if callbacks.is_empty() {
                return value;
            }
            state.firing.push(tag.to_string());
            callbacks
        };

        let filtered = callbacks
            .iter()
            .fold(value, |value, callback| callback(value, args));

        self.state.lock().firing.pop();
        filtered
    }

    pub fn do_action(&self, tag: &str, args: &[Value]) {
        let callbacks = {
            let mut state = self.state.lock();
            *state.fired.entry(tag.to_string()).or_insert(0) += 1;
            let callbacks = state.ordered(tag);
            if callbacks.is_empty() {
                return;
            }
            state.firing.push(tag.to_string());
            callbacks
        };

        for callback in &callbacks {
            callback(Value::Null, args);
        }

        self.state.lock().firing.pop();
    }

    /// How many times `tag` has fired as an action.
    pub fn did_action(&self, tag: &str) -> u64 {
        self.state.lock().fired(tag)
    }

    /// Innermost tag currently being applied, if any.
    pub fn current_filter(&self) -> Option<String> {
        self.state.lock().firing.last().cloned()
    }

    /// A deep copy of the whole hook state.
    pub fn snapshot(&self) -> HookState {
        self.state.lock().clone()
    }

    /// Replaces the live state wholesale.
    pub fn replace(&self, state: HookState) {
        *self.state.lock() = state;
    }

    /// Read access for inspection without cloning.
    pub fn inspect<R>(&self, f: impl FnOnce(&HookState) -> R) -> R {
        f(&self.state.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn append(
        suffix: &'static str,
    ) -> impl Fn(Value, &[Value]) -> Value + Send + Sync + 'static {
        move |value, _| {
            json!(format!("{}{}", value.as_str().unwrap_or_default(), suffix))
        }
    }

    #[test]
    fn filters_run_by_priority_then_registration_order() {
        let hooks = Hooks::new();
        hooks.add_filter("title", "b", 20, append("b"));
        hooks.add_filter("title", "a1", 10, append("a1"));
        hooks.add_filter("title", "a2", 10, append("a2"));

        let out = hooks.apply_filters("title", json!(">"), &[]);
        assert_eq!(out, json!(">a1a2b"));
    }

    #[test]
    fn removing_an_entry_only_drops_that_priority_slot() {
        let hooks = Hooks::new();
        hooks.add_filter("title", "x", 5, append("x"));
        hooks.add_filter("title", "x", 15, append("y"));

        assert!(hooks.remove_filter("title", "x", 5));
        assert!(!hooks.remove_filter("title", "x", 5));
        assert_eq!(hooks.priority_of("title", "x"), Some(15));
        assert_eq!(hooks.apply_filters("title", json!(""), &[]), json!("y"));
    }

    #[test]
    fn actions_count_fires_even_without_callbacks() {
        let hooks = Hooks::new();
        hooks.do_action("init", &[]);
        hooks.do_action("init", &[]);
        assert_eq!(hooks.did_action("init"), 2);
        assert_eq!(hooks.did_action("shutdown"), 0);
    }

    #[test]
    fn callbacks_may_register_hooks_while_firing() {
        let hooks = Arc::new(Hooks::new());
        let inner = hooks.clone();
        hooks.add_action("boot", "register", PRIORITY_DEFAULT, move |_| {
            inner.add_filter("late", "late", PRIORITY_DEFAULT, |_, _| json!(1));
        });

        hooks.do_action("boot", &[]);
        assert!(hooks.has_filter("late"));
        assert_eq!(hooks.current_filter(), None);
    }

    #[test]
    fn current_filter_is_visible_inside_callbacks() {
        let hooks = Arc::new(Hooks::new());
        let inner = hooks.clone();
        hooks.add_filter("outer", "whoami", PRIORITY_DEFAULT, move |_, _| {
            json!(inner.current_filter())
        });

        assert_eq!(hooks.apply_filters("outer", Value::Null, &[]), json!("outer"));
    }

    #[test]
    fn snapshot_is_independent_of_live_state() {
        let hooks = Hooks::new();
        hooks.add_filter("title", "kept", PRIORITY_DEFAULT, append("k"));
        let saved = hooks.snapshot();

        hooks.add_filter("title", "leaked", PRIORITY_DEFAULT, append("l"));
        assert_eq!(saved.ids("title").len(), 1);

        hooks.replace(saved.clone());
        assert_eq!(hooks.apply_filters("title", json!(""), &[]), json!("k"));
    }
}
