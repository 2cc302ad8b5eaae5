use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, Response},
};
use tower::ServiceExt;

/// Request value handed to an application router.
pub type DispatchRequest = Request<Bytes>;

/// Fully buffered response returned by an application router.
pub type DispatchResponse = Response<Bytes>;

/// An application kernel that can serve a request in-process.
///
/// When one is bound, the dispatcher prefers it over the runtime's legacy
/// render path.
#[async_trait]
pub trait AppRouter: Send + Sync {
    async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> anyhow::Result<DispatchResponse>;
}

#[async_trait]
impl AppRouter for Router {
    async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> anyhow::Result<DispatchResponse> {
        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, Body::from(body));

        let response = self.clone().oneshot(request).await?;
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await?;

        Ok(Response::from_parts(parts, bytes))
    }
}

#[async_trait]
impl<T: AppRouter + ?Sized> AppRouter for Arc<T> {
    async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> anyhow::Result<DispatchResponse> {
        (**self).dispatch(request).await
    }
}
