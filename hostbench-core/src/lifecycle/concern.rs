use async_trait::async_trait;
use hostbench_runtime::HostRuntime;

/// Where a concern runs relative to the others.
///
/// Set-up runs isolation, then context, then custom concerns in declaration
/// order. Tear-down runs custom concerns in reverse, then context, then
/// isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConcernKind {
    Isolation,
    Context,
    Custom,
}

/// A composable set-up/tear-down capability attached to a suite.
#[async_trait]
pub trait Concern: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ConcernKind {
        ConcernKind::Custom
    }

    async fn set_up_suite(&mut self, _runtime: &HostRuntime) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_up(&mut self, runtime: &HostRuntime) -> anyhow::Result<()>;

    async fn tear_down(&mut self, runtime: &HostRuntime) -> anyhow::Result<()>;

    async fn tear_down_suite(
        &mut self,
        _runtime: &HostRuntime,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Backs up the current user and screen, and puts them back afterwards.
#[derive(Debug, Default)]
pub struct AuthContext {
    saved: Option<(Option<u64>, Option<String>)>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Concern for AuthContext {
    fn name(&self) -> &str {
        "auth_context"
    }

    fn kind(&self) -> ConcernKind {
        ConcernKind::Context
    }

    async fn set_up(&mut self, runtime: &HostRuntime) -> anyhow::Result<()> {
        self.saved = Some((runtime.current_user(), runtime.current_screen()));
        Ok(())
    }

    async fn tear_down(&mut self, runtime: &HostRuntime) -> anyhow::Result<()> {
        if let Some((user, screen)) = self.saved.take() {
            runtime.set_current_user(user);
            runtime.set_current_screen(screen);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auth_context_restores_user_and_screen() {
        let runtime = HostRuntime::builder().build().unwrap();
        runtime.set_current_user(Some(1));

        let mut concern = AuthContext::new();
        concern.set_up(&runtime).await.unwrap();
        runtime.set_current_user(Some(99));
        runtime.set_current_screen(Some("edit-post".into()));
        concern.tear_down(&runtime).await.unwrap();

        assert_eq!(runtime.current_user(), Some(1));
        assert_eq!(runtime.current_screen(), None);
    }

    #[test]
    fn kinds_sort_in_set_up_order() {
        let mut kinds =
            vec![ConcernKind::Custom, ConcernKind::Isolation, ConcernKind::Context];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![ConcernKind::Isolation, ConcernKind::Context, ConcernKind::Custom]
        );
    }
}
