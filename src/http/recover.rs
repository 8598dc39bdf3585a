//! Marks request handling as recoverable for the fatal fault handler.
//!
//! Sits directly inside a `CatchPanicLayer`: the panic is turned into a
//! response there, so the process must not exit on it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::lifecycle::fault::recoverable;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverLayer;

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoverService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RecoverService<S> {
    inner: S,
}

impl<S, R> Service<R> for RecoverService<S>
where
    S: Service<R>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = RecoverFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        let inner = &mut self.inner;
        RecoverFuture {
            inner: Box::pin(recoverable(|| inner.call(request))),
        }
    }
}

pub struct RecoverFuture<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for RecoverFuture<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        recoverable(|| inner.poll(cx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::fault::in_recoverable_scope;
    use tower::{service_fn, ServiceExt};

    #[tokio::test]
    async fn test_inner_service_runs_in_recoverable_scope() {
        let svc = RecoverLayer.layer(service_fn(|_: ()| async {
            tokio::task::yield_now().await;
            Ok::<_, std::convert::Infallible>(in_recoverable_scope())
        }));
        assert!(svc.oneshot(()).await.unwrap());
        assert!(!in_recoverable_scope());
    }
}
