//! Hook registry snapshot and restore.

use std::collections::BTreeSet;

use hostbench_runtime::{HookState, HostRuntime};

/// Saved copy of the runtime's hook registry.
#[derive(Debug, Clone)]
pub struct HookSnapshot {
    saved: HookState,
}

/// Tags whose callbacks differ between a snapshot and the live registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl HookDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl HookSnapshot {
    pub fn capture(runtime: &HostRuntime) -> Self {
        Self {
            saved: runtime.hooks().snapshot(),
        }
    }

    /// Puts a fresh copy of the saved registry back in place. The snapshot
    /// itself is never handed to the runtime, so it survives any number of
    /// restores.
    pub fn restore(&self, runtime: &HostRuntime) {
        runtime.hooks().replace(self.saved.clone());
    }

    pub fn state(&self) -> &HookState {
        &self.saved
    }

    pub fn diff(&self, runtime: &HostRuntime) -> HookDiff {
        runtime.hooks().inspect(|live| {
            let saved_tags: BTreeSet<&str> = self.saved.tags().collect();
            let live_tags: BTreeSet<&str> = live.tags().collect();

            HookDiff {
                added: live_tags
                    .difference(&saved_tags)
                    .map(|tag| tag.to_string())
                    .collect(),
                removed: saved_tags
                    .difference(&live_tags)
                    .map(|tag| tag.to_string())
                    .collect(),
                changed: saved_tags
                    .intersection(&live_tags)
                    .filter(|tag| self.saved.ids(tag) != live.ids(tag))
                    .map(|tag| tag.to_string())
                    .collect(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbench_runtime::PRIORITY_DEFAULT;
    use serde_json::json;

    fn runtime() -> std::sync::Arc<HostRuntime> {
        HostRuntime::builder().build().unwrap()
    }

    #[test]
    fn restore_drops_hooks_added_after_capture() {
        let runtime = runtime();
        runtime.hooks().add_filter("title", "kept", PRIORITY_DEFAULT, |v, _| v);
        let snapshot = HookSnapshot::capture(&runtime);

        runtime.hooks().add_filter("title", "leak", 5, |_, _| json!("leak"));
        runtime.hooks().add_filter("body", "leak", 5, |_, _| json!("leak"));
        runtime.hooks().do_action("init", &[]);

        let diff = snapshot.diff(&runtime);
        assert_eq!(diff.added, vec!["body".to_string()]);
        assert_eq!(diff.changed, vec!["title".to_string()]);

        snapshot.restore(&runtime);
        assert!(snapshot.diff(&runtime).is_empty());
        assert_eq!(runtime.hooks().did_action("init"), 0);
        assert_eq!(
            runtime.hooks().apply_filters("title", json!("x"), &[]),
            json!("x")
        );
    }

    #[test]
    fn restored_state_does_not_alias_the_snapshot() {
        let runtime = runtime();
        let snapshot = HookSnapshot::capture(&runtime);

        snapshot.restore(&runtime);
        runtime.hooks().add_filter("title", "late", PRIORITY_DEFAULT, |v, _| v);
        assert!(snapshot.state().ids("title").is_empty());

        snapshot.restore(&runtime);
        assert!(!runtime.hooks().has_filter("title"));
    }

    #[test]
    fn removed_tags_are_reported() {
        let runtime = runtime();
        runtime.hooks().add_filter("gone", "x", PRIORITY_DEFAULT, |v, _| v);
        let snapshot = HookSnapshot::capture(&runtime);
        runtime.hooks().remove_all("gone");

        assert_eq!(snapshot.diff(&runtime).removed, vec!["gone".to_string()]);
    }
}
