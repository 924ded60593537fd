//! Attaches the current cache snapshot to matched requests.
//!
//! Each request through this layer consults the gateway (which may trigger a
//! refresh), then carries the snapshot as `X-Holiday-Data` / `X-Cache-Info`
//! on the request, so the downstream handler can render from it, and on the
//! response. Client-supplied copies of those headers are discarded first.

use crate::cache::CacheGateway;
use crate::web::encoding::{CACHE_INFO, HOLIDAY_DATA, snapshot_headers};
use axum::extract::Request;
use axum::response::Response;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

#[derive(Clone)]
pub struct CacheHeadersLayer {
    gateway: Arc<CacheGateway>,
}

impl CacheHeadersLayer {
    pub fn new(gateway: Arc<CacheGateway>) -> Self {
        Self { gateway }
    }
}

impl<S> Layer<S> for CacheHeadersLayer {
    type Service = CacheHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheHeadersService {
            inner,
            gateway: self.gateway.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CacheHeadersService<S> {
    inner: S,
    gateway: Arc<CacheGateway>,
}

impl<S, B> Service<Request> for CacheHeadersService<S>
where
    S: Service<Request, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // The gateway is consulted before the inner call, so take the service
        // that was polled ready and leave a fresh clone in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gateway = self.gateway.clone();

        Box::pin(async move {
            let snapshot = gateway.serve().await;
            let headers = snapshot_headers(&snapshot);

            let request_headers = req.headers_mut();
            request_headers.remove(&HOLIDAY_DATA);
            request_headers.remove(&CACHE_INFO);
            for (name, value) in &headers {
                request_headers.insert(name.clone(), value.clone());
            }

            let mut response = inner.call(req).await?;
            let response_headers = response.headers_mut();
            for (name, value) in headers {
                response_headers.insert(name, value);
            }
            Ok(response)
        })
    }
}
