//! Suite and per-test set-up/tear-down.
//!
//! A [`TestSuite`] owns the runtime, the composed [`Concern`]s and the hook
//! snapshot. Each test gets a fresh [`TestContext`]; tear-down runs every
//! step even when earlier ones fail or panic, and hands back what went
//! wrong as a [`TeardownReport`].

pub mod concern;
pub mod context;

use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use hostbench_runtime::{HostRuntime, TOOLBAR_CALLBACK, tags};
use tracing::{debug, info, warn};

pub use concern::{AuthContext, Concern, ConcernKind};
pub use context::{Fixtures, TestContext};

use crate::{
    config::HarnessConfig,
    error::{HarnessError, Result},
    hooks::HookSnapshot,
    isolation::TransactionalIsolation,
    outbound::OutboundFake,
    request::Dispatcher,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub step: String,
    pub message: String,
}

/// Failures collected while tearing down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|failure| failure.step.as_str())
    }

    fn push(&mut self, step: &str, message: String) {
        warn!(step, %message, "teardown step failed");
        self.failures.push(TeardownFailure {
            step: step.to_string(),
            message,
        });
    }

    fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Teardown(self))
        }
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown failed in {} step(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.step, failure.message)?;
        }
        Ok(())
    }
}

/// Runs one tear-down step, recording an error or a panic instead of
/// propagating it.
async fn guarded<F>(report: &mut TeardownReport, step: &str, step_future: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(step_future).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => report.push(step, format!("{err:#}")),
        Err(panic) => {
            report.push(step, format!("panicked: {}", panic_message(&*panic)))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A group of tests sharing one runtime and one set of concerns.
pub struct TestSuite {
    name: String,
    runtime: Arc<HostRuntime>,
    config: HarnessConfig,
    concerns: Vec<Box<dyn Concern>>,
    snapshot: Option<HookSnapshot>,
}

impl fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("name", &self.name)
            .field("concerns", &self.concern_names())
            .field("snapshot", &self.snapshot.is_some())
            .finish_non_exhaustive()
    }
}

impl TestSuite {
    pub fn new(
        name: impl Into<String>,
        runtime: Arc<HostRuntime>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            name: name.into(),
            runtime,
            config,
            concerns: Vec::new(),
            snapshot: None,
        }
    }

    /// Builds the runtime from `config`, connecting its database if one is
    /// configured.
    pub async fn connect(
        name: impl Into<String>,
        config: HarnessConfig,
    ) -> Result<Self> {
        let runtime = config.connect().await?;
        Ok(Self::new(name, runtime, config))
    }

    pub fn with_concern(mut self, concern: impl Concern + 'static) -> Self {
        self.concerns.push(Box::new(concern));
        self
    }

    pub fn with_boxed_concern(mut self, concern: Box<dyn Concern>) -> Self {
        self.concerns.push(concern);
        self
    }

    /// Adds [`TransactionalIsolation`] over the configured core tables.
    pub fn with_isolation(self) -> Self {
        let isolation = TransactionalIsolation::from_config(&self.config);
        self.with_concern(isolation)
    }

    pub fn with_auth_context(self) -> Self {
        self.with_concern(AuthContext::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Arc<HostRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Option<&HookSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn concern_names(&self) -> Vec<&str> {
        self.set_up_order()
            .into_iter()
            .map(|index| self.concerns[index].name())
            .collect()
    }

    /// Isolation, then context, then custom concerns; declaration order
    /// within a kind.
    fn set_up_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.concerns.len()).collect();
        order.sort_by_key(|&index| self.concerns[index].kind());
        order
    }

    /// Suite set-up: concern suite hooks, then the hook snapshot.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            suite = %self.name,
            concerns = ?self.concern_names(),
            "starting suite"
        );

        for index in self.set_up_order() {
            let concern = &mut self.concerns[index];
            concern
                .set_up_suite(&self.runtime)
                .await
                .map_err(|source| HarnessError::Setup {
                    step: format!("{} (suite)", concern.name()),
                    source,
                })?;
        }

        self.snapshot = Some(HookSnapshot::capture(&self.runtime));
        Ok(())
    }

    /// Per-test set-up.
    ///
    /// If a concern fails, everything already set up is torn down again
    /// before the error is returned.
    pub async fn set_up(&mut self) -> Result<TestContext> {
        if self.snapshot.is_none() {
            self.snapshot = Some(HookSnapshot::capture(&self.runtime));
        }

        self.runtime.set_time_limit(None);
        self.runtime.set_permalink_structure(
            self.config.site.permalink_structure.clone(),
        );

        let http = Dispatcher::new(self.runtime.clone())
            .with_max_redirects(self.config.requests.max_redirects);
        let outbound = OutboundFake::new(self.config.outbound.stray_requests.into());
        let cx = TestContext::new(self.runtime.clone(), http, outbound);

        let order = self.set_up_order();
        for (position, &index) in order.iter().enumerate() {
            let concern = &mut self.concerns[index];
            if let Err(source) = concern.set_up(&self.runtime).await {
                let step = concern.name().to_string();
                warn!(suite = %self.name, %step, "set-up failed; tearing down");
                let report = self.tear_down_steps(Some(cx), &order[..=position]).await;
                if !report.is_empty() {
                    warn!(%report, "tear-down after failed set-up was incomplete");
                }
                return Err(HarnessError::Setup { step, source });
            }
        }

        self.runtime.reset_request_state();
        let hooks = self.runtime.hooks();
        if let Some(priority) = hooks.priority_of(tags::FOOTER, TOOLBAR_CALLBACK) {
            hooks.remove_filter(tags::FOOTER, TOOLBAR_CALLBACK, priority);
        }
        cx.outbound.install(&self.runtime);

        debug!(suite = %self.name, "test set up");
        Ok(cx)
    }

    /// Per-test tear-down. Every step runs; failures come back together.
    pub async fn tear_down(&mut self, cx: TestContext) -> Result<()> {
        let order = self.set_up_order();
        self.tear_down_steps(Some(cx), &order).await.into_result()
    }

    async fn tear_down_steps(
        &mut self,
        cx: Option<TestContext>,
        started: &[usize],
    ) -> TeardownReport {
        let mut report = TeardownReport::default();

        for &index in started.iter().rev() {
            let concern = &mut self.concerns[index];
            let step = concern.name().to_string();
            guarded(&mut report, &step, concern.tear_down(&self.runtime)).await;
        }

        let runtime = self.runtime.clone();
        if let Some(mut cx) = cx {
            guarded(&mut report, "outbound", async {
                for call in cx.outbound.uninstall(&runtime) {
                    warn!(
                        method = %call.request.method,
                        url = %call.request.url,
                        "stray outbound request"
                    );
                }
                anyhow::Ok(())
            })
            .await;

            guarded(&mut report, "router", async {
                cx.http.unbind_router();
                anyhow::Ok(())
            })
            .await;
        }

        guarded(&mut report, "request_state", async {
            runtime.reset_request_state();
            runtime.set_current_user(None);
            anyhow::Ok(())
        })
        .await;

        let snapshot = self.snapshot.as_ref();
        guarded(&mut report, "hooks", async {
            if let Some(snapshot) = snapshot {
                let diff = snapshot.diff(&runtime);
                if !diff.is_empty() {
                    debug!(?diff, "restoring hooks changed by the test");
                }
                snapshot.restore(&runtime);
            }
            anyhow::Ok(())
        })
        .await;

        report
    }

    /// Set-up, body, tear-down.
    ///
    /// A panicking body is resumed once tear-down has finished. A failing
    /// body wins over a failing tear-down, which is only logged then.
    pub async fn run_test<F>(&mut self, name: &str, body: F) -> Result<()>
    where
        F: AsyncFnOnce(&mut TestContext) -> anyhow::Result<()>,
    {
        info!(suite = %self.name, test = name, "running test");
        let mut cx = self.set_up().await?;
        let outcome = AssertUnwindSafe(body(&mut cx)).catch_unwind().await;
        let teardown = self.tear_down(cx).await;

        match outcome {
            Ok(Ok(())) => teardown,
            Ok(Err(source)) => {
                if let Err(err) = teardown {
                    warn!(test = name, error = %err, "tear-down failed too");
                }
                Err(HarnessError::TestFailed {
                    name: name.to_string(),
                    source,
                })
            }
            Err(panic) => {
                if let Err(err) = teardown {
                    warn!(test = name, error = %err, "tear-down failed too");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Suite tear-down: concern suite hooks in reverse, then the object
    /// cache is flushed.
    pub async fn finish(&mut self) -> Result<()> {
        let mut report = TeardownReport::default();
        for index in self.set_up_order().into_iter().rev() {
            let concern = &mut self.concerns[index];
            let step = format!("{} (suite)", concern.name());
            guarded(&mut report, &step, concern.tear_down_suite(&self.runtime))
                .await;
        }
        self.runtime.object_cache().flush();
        info!(suite = %self.name, failures = report.failures.len(), "suite finished");
        report.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Recorder {
        name: &'static str,
        kind: ConcernKind,
        log: Arc<Mutex<Vec<String>>>,
        fail_tear_down: bool,
    }

    #[async_trait]
    impl Concern for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> ConcernKind {
            self.kind
        }

        async fn set_up(&mut self, _: &HostRuntime) -> anyhow::Result<()> {
            self.log.lock().push(format!("up:{}", self.name));
            Ok(())
        }

        async fn tear_down(&mut self, _: &HostRuntime) -> anyhow::Result<()> {
            self.log.lock().push(format!("down:{}", self.name));
            if self.fail_tear_down {
                anyhow::bail!("{} refused", self.name);
            }
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        kind: ConcernKind,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Recorder {
        Recorder {
            name,
            kind,
            log: log.clone(),
            fail_tear_down: false,
        }
    }

    fn suite() -> TestSuite {
        let runtime = HostRuntime::builder().build().unwrap();
        TestSuite::new("unit", runtime, HarnessConfig::default())
    }

    #[tokio::test]
    async fn concerns_run_in_kind_order_and_unwind_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut suite = suite()
            .with_concern(recorder("first", ConcernKind::Custom, &log))
            .with_concern(recorder("ctx", ConcernKind::Context, &log))
            .with_concern(recorder("second", ConcernKind::Custom, &log))
            .with_concern(recorder("db", ConcernKind::Isolation, &log));

        suite.start().await.unwrap();
        suite.run_test("order", async |_| Ok(())).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "up:db", "up:ctx", "up:first", "up:second", "down:second",
                "down:first", "down:ctx", "down:db",
            ]
        );
    }

    #[tokio::test]
    async fn failing_steps_are_collected_and_later_steps_still_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = recorder("flaky", ConcernKind::Custom, &log);
        failing.fail_tear_down = true;
        let mut suite = suite()
            .with_concern(failing)
            .with_concern(recorder("ctx", ConcernKind::Context, &log));
        suite.start().await.unwrap();

        let err = suite
            .run_test("teardown", async |cx| {
                cx.runtime().set_current_user(Some(5));
                Ok(())
            })
            .await
            .unwrap_err();

        let HarnessError::Teardown(report) = err else {
            panic!("expected a teardown error");
        };
        assert_eq!(report.steps().collect::<Vec<_>>(), vec!["flaky"]);
        assert!(report.to_string().contains("flaky refused"));
        assert!(log.lock().contains(&"down:ctx".to_string()));
        assert_eq!(suite.runtime().current_user(), None);
    }

    #[tokio::test]
    async fn set_up_disables_the_time_limit_and_the_toolbar() {
        let mut suite = suite();
        suite.start().await.unwrap();

        let cx = suite.set_up().await.unwrap();
        let runtime = cx.runtime().clone();
        assert_eq!(runtime.time_limit(), None);
        assert_eq!(runtime.hooks().priority_of(tags::FOOTER, TOOLBAR_CALLBACK), None);

        suite.tear_down(cx).await.unwrap();
        assert!(runtime.hooks().priority_of(tags::FOOTER, TOOLBAR_CALLBACK).is_some());
    }

    #[test]
    fn report_lists_every_failed_step() {
        let mut report = TeardownReport::default();
        report.push("outbound", "boom".into());
        report.push("hooks", "panicked: oops".into());
        assert_eq!(
            report.to_string(),
            "Teardown failed in 2 step(s); outbound: boom; hooks: panicked: oops"
        );
    }
}
