use std::sync::Arc;

use hostbench_runtime::{HostRuntime, PRIORITY_LAST, RestServer, tags};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

/// What the runtime emitted during one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Emitted {
    /// Final status after every other `status_header` callback ran.
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub redirect: Option<(String, u16)>,
}

/// Per-call hooks on the runtime, removed again on drop.
///
/// Also swaps in a REST server for the duration of the call when one is
/// given.
pub struct CallInterceptors {
    runtime: Arc<HostRuntime>,
    id: String,
    emitted: Arc<Mutex<Emitted>>,
    previous_rest: Option<Arc<dyn RestServer>>,
}

impl CallInterceptors {
    pub fn install(
        runtime: Arc<HostRuntime>,
        rest_server: Option<Arc<dyn RestServer>>,
    ) -> Self {
        let id = format!("dispatch_{}", Uuid::new_v4().simple());
        let emitted = Arc::new(Mutex::new(Emitted::default()));
        let hooks = runtime.hooks();

        let sink = emitted.clone();
        hooks.add_filter(tags::STATUS_HEADER, id.clone(), PRIORITY_LAST, move |value, _| {
            if let Some(status) = value.as_u64().and_then(|s| u16::try_from(s).ok()) {
                sink.lock().status = Some(status);
            }
            value
        });

        let sink = emitted.clone();
        hooks.add_action(tags::SEND_HEADER, id.clone(), PRIORITY_LAST, move |args| {
            if let [Value::String(name), Value::String(value), ..] = args {
                sink.lock().headers.push((name.clone(), value.clone()));
            }
        });

        let sink = emitted.clone();
        hooks.add_filter(tags::REDIRECT, id.clone(), PRIORITY_LAST, move |value, args| {
            if let Some(location) = value.as_str().filter(|l| !l.is_empty()) {
                let status = args
                    .first()
                    .and_then(Value::as_u64)
                    .and_then(|s| u16::try_from(s).ok())
                    .unwrap_or(302);
                sink.lock().redirect = Some((location.to_string(), status));
            }
            value
        });

        let previous_rest = rest_server.map(|server| runtime.set_rest_server(server));

        Self {
            runtime,
            id,
            emitted,
            previous_rest,
        }
    }

    pub fn emitted(&self) -> Emitted {
        self.emitted.lock().clone()
    }
}

impl Drop for CallInterceptors {
    fn drop(&mut self) {
        let hooks = self.runtime.hooks();
        hooks.remove_filter(tags::STATUS_HEADER, &self.id, PRIORITY_LAST);
        hooks.remove_action(tags::SEND_HEADER, &self.id, PRIORITY_LAST);
        hooks.remove_filter(tags::REDIRECT, &self.id, PRIORITY_LAST);
        if let Some(previous) = self.previous_rest.take() {
            self.runtime.set_rest_server(previous);
        }
    }
}

impl std::fmt::Debug for CallInterceptors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallInterceptors")
            .field("id", &self.id)
            .field("emitted", &*self.emitted.lock())
            .finish_non_exhaustive()
    }
}
