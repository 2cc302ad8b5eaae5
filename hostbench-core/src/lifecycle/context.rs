use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::Arc,
};

use hostbench_runtime::HostRuntime;

use crate::{outbound::OutboundFake, request::Dispatcher};

/// Per-test cache of built fixtures, dropped between tests.
#[derive(Default)]
pub struct Fixtures {
    items: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Fixtures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.items.keys().collect();
        keys.sort();
        f.debug_struct("Fixtures").field("keys", &keys).finish()
    }
}

impl Fixtures {
    /// Returns the value cached under `key`, building it on first use.
    ///
    /// A key reused with a different type is rebuilt and replaced.
    pub fn get_or_insert_with<T, F>(&mut self, key: &str, build: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.items.get(key).and_then(|v| v.downcast_ref::<T>()) {
            return value.clone();
        }
        let value = build();
        self.items.insert(key.to_string(), Box::new(value.clone()));
        value
    }

    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.items
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Everything a test body gets to work with.
#[derive(Debug)]
pub struct TestContext {
    runtime: Arc<HostRuntime>,
    pub(super) http: Dispatcher,
    pub(super) outbound: OutboundFake,
    fixtures: Fixtures,
}

impl TestContext {
    pub(super) fn new(
        runtime: Arc<HostRuntime>,
        http: Dispatcher,
        outbound: OutboundFake,
    ) -> Self {
        Self {
            runtime,
            http,
            outbound,
            fixtures: Fixtures::default(),
        }
    }

    pub fn runtime(&self) -> &Arc<HostRuntime> {
        &self.runtime
    }

    pub fn http(&mut self) -> &mut Dispatcher {
        &mut self.http
    }

    pub fn outbound(&self) -> &OutboundFake {
        &self.outbound
    }

    pub fn fixtures(&mut self) -> &mut Fixtures {
        &mut self.fixtures
    }

    /// Makes `user` the current user for the rest of the test.
    pub fn acting_as(&self, user: u64) -> &Self {
        self.runtime.set_current_user(Some(user));
        self
    }
}
