//! gRPC Call Tracing Layer
//!
//! Tower layer wrapped around the whole tonic router. For every call it
//! opens a span carrying the RPC service and method, logs start and end,
//! and records call metrics.
//!
//! A call ends when its status is known: at the response head for
//! trailers-only responses, otherwise when the response body yields its
//! trailers. For server-streaming calls (health `Watch`) that is when the
//! stream closes. A body dropped before it finishes is recorded as
//! `CANCELLED`.
//!
//! Health checking calls are skipped unless explicitly enabled.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use http_body::{Body, Frame, SizeHint};
use tonic::codegen::http;
use tower::{Layer, Service};
use tracing::Instrument;

use crate::infrastructure::metrics;

const HEALTH_SERVICE: &str = "grpc.health.v1.Health";

/// `grpc-status` recorded for a response body dropped before its trailers.
const CANCELLED: &str = "1";

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

// =============================================================================
// Layer
// =============================================================================

/// Layer that traces gRPC call boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallTraceLayer {
    trace_health_checks: bool,
}

impl CallTraceLayer {
    /// Create the layer. When `trace_health_checks` is false, calls to
    /// `grpc.health.v1.Health` are passed through without a span.
    #[must_use]
    pub const fn new(trace_health_checks: bool) -> Self {
        Self {
            trace_health_checks,
        }
    }
}

impl<S> Layer<S> for CallTraceLayer {
    type Service = CallTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallTraceService {
            inner,
            trace_health_checks: self.trace_health_checks,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Service produced by [`CallTraceLayer`].
#[derive(Debug, Clone)]
pub struct CallTraceService<S> {
    inner: S,
    trace_health_checks: bool,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for CallTraceService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = http::Response<TracedBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let call = RpcPath::parse(req.uri().path());
        if !self.trace_health_checks && call.service == HEALTH_SERVICE {
            let future = inner.call(req);
            return Box::pin(async move {
                future
                    .await
                    .map(|response| response.map(|body| TracedBody::new(body, None)))
            });
        }

        let span = tracing::info_span!(
            "grpc.call",
            otel.kind = "server",
            rpc.system = "grpc",
            rpc.service = %call.service,
            rpc.method = %call.method,
            rpc.grpc.status_code = tracing::field::Empty,
        );
        let record_span = span.clone();

        Box::pin(
            async move {
                let start = Instant::now();
                tracing::debug!("gRPC call started");

                match inner.call(req).await {
                    Ok(response) => {
                        let record = CallRecord {
                            span: record_span,
                            call,
                            start,
                        };
                        let pending = if response.headers().contains_key("grpc-status") {
                            record.finish(grpc_status_code(response.headers()));
                            None
                        } else {
                            Some(record)
                        };
                        Ok(response.map(|body| TracedBody::new(body, pending)))
                    }
                    Err(e) => {
                        let elapsed = start.elapsed();
                        tracing::error!(
                            duration_ms = elapsed.as_millis(),
                            error = %e,
                            "gRPC call transport error"
                        );
                        metrics::record_rpc_call(
                            &call.service,
                            &call.method,
                            "transport_error",
                            elapsed,
                        );
                        Err(e)
                    }
                }
            }
            .instrument(span),
        )
    }
}

// =============================================================================
// Call Record
// =============================================================================

/// An open call waiting for its final status.
#[derive(Debug)]
struct CallRecord {
    span: tracing::Span,
    call: RpcPath,
    start: Instant,
}

impl CallRecord {
    /// Log and record the end of the call. Dropping `self` closes the span.
    fn finish(self, code: &str) {
        let elapsed = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("rpc.grpc.status_code", code);

        if code == "0" {
            tracing::info!(duration_ms = elapsed.as_millis(), "gRPC call completed");
        } else {
            tracing::warn!(
                duration_ms = elapsed.as_millis(),
                grpc.status_code = code,
                "gRPC call failed"
            );
        }
        metrics::record_rpc_call(&self.call.service, &self.call.method, code, elapsed);
    }
}

// =============================================================================
// Response Body
// =============================================================================

/// Response body that finishes its call record when the body ends.
#[derive(Debug)]
pub struct TracedBody<B> {
    inner: Pin<Box<B>>,
    record: Option<CallRecord>,
}

impl<B> TracedBody<B> {
    fn new(body: B, record: Option<CallRecord>) -> Self {
        Self {
            inner: Box::pin(body),
            record,
        }
    }

    fn finish(&mut self, code: &str) {
        if let Some(record) = self.record.take() {
            record.finish(code);
        }
    }
}

impl<B: Body> Body for TracedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(trailers) = frame.trailers_ref() {
                    this.finish(grpc_status_code(trailers));
                }
            }
            Poll::Ready(Some(Err(_))) => this.finish("body_error"),
            Poll::Ready(None) => this.finish("0"),
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for TracedBody<B> {
    fn drop(&mut self) {
        self.finish(CANCELLED);
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Service and method parsed from a gRPC request path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RpcPath {
    service: String,
    method: String,
}

impl RpcPath {
    /// Parse `/package.Service/Method`.
    fn parse(path: &str) -> Self {
        let mut parts = path.trim_start_matches('/').splitn(2, '/');
        let service = parts.next().filter(|s| !s.is_empty()).unwrap_or("unknown");
        let method = parts.next().filter(|s| !s.is_empty()).unwrap_or("unknown");
        Self {
            service: service.to_string(),
            method: method.to_string(),
        }
    }
}

/// Status code carried in response headers or trailers; absent means OK.
fn grpc_status_code(headers: &http::HeaderMap) -> &str {
    headers
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("0")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use metrics_exporter_prometheus::PrometheusBuilder;
    use test_case::test_case;
    use tower::ServiceExt;

    use super::*;

    #[test_case("/grpc.health.v1.Health/Check", "grpc.health.v1.Health", "Check")]
    #[test_case("/grpc.examples.echo.Echo/UnaryEcho", "grpc.examples.echo.Echo", "UnaryEcho")]
    #[test_case("/", "unknown", "unknown")]
    #[test_case("/only.Service", "only.Service", "unknown")]
    fn parses_rpc_path(path: &str, service: &str, method: &str) {
        let parsed = RpcPath::parse(path);
        assert_eq!(parsed.service, service);
        assert_eq!(parsed.method, method);
    }

    #[test]
    fn status_code_defaults_to_ok() {
        let mut headers = http::HeaderMap::new();
        assert_eq!(grpc_status_code(&headers), "0");

        headers.insert("grpc-status", http::HeaderValue::from_static("5"));
        assert_eq!(grpc_status_code(&headers), "5");
    }

    /// Body yielding a fixed sequence of frames.
    struct FrameBody {
        frames: VecDeque<Frame<&'static [u8]>>,
    }

    impl Body for FrameBody {
        type Data = &'static [u8];
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.frames.pop_front().map(Ok))
        }
    }

    #[derive(Clone, Default)]
    struct StubService {
        calls: Arc<AtomicUsize>,
        head_status: Option<&'static str>,
        trailer_status: Option<&'static str>,
    }

    impl Service<http::Request<()>> for StubService {
        type Response = http::Response<FrameBody>;
        type Error = Infallible;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: http::Request<()>) -> Self::Future {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let mut builder = http::Response::builder();
            if let Some(code) = self.head_status {
                builder = builder.header("grpc-status", code);
            }

            let mut frames = VecDeque::new();
            frames.push_back(Frame::data(b"payload".as_slice()));
            if let Some(code) = self.trailer_status {
                let mut trailers = http::HeaderMap::new();
                trailers.insert("grpc-status", http::HeaderValue::from_static(code));
                frames.push_back(Frame::trailers(trailers));
            }

            std::future::ready(Ok(builder.body(FrameBody { frames }).unwrap()))
        }
    }

    fn request(path: &str) -> http::Request<()> {
        http::Request::builder().uri(path).body(()).unwrap()
    }

    /// Drain a body, returning the number of data frames seen.
    async fn drain<B: Body + Unpin>(mut body: B) -> usize {
        let mut data = 0;
        while let Some(frame) = std::future::poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await
        {
            if frame.is_ok_and(|f| f.is_data()) {
                data += 1;
            }
        }
        data
    }

    /// Run `f` with a fresh Prometheus recorder and render what it recorded.
    fn recorded<F: FnOnce()>(f: F) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, f);
        handle.render()
    }

    #[tokio::test]
    async fn passes_response_through_unchanged() {
        let stub = StubService {
            trailer_status: Some("0"),
            ..StubService::default()
        };
        let calls = Arc::clone(&stub.calls);
        let service = CallTraceLayer::new(false).layer(stub);

        let response = service
            .oneshot(request("/grpc.examples.echo.Echo/UnaryEcho"))
            .await
            .unwrap();

        assert_eq!(drain(response.into_body()).await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_status_is_passed_through() {
        let stub = StubService {
            head_status: Some("12"),
            ..StubService::default()
        };
        let service = CallTraceLayer::new(false).layer(stub);

        let response = service
            .oneshot(request("/grpc.examples.echo.Echo/Missing"))
            .await
            .unwrap();

        assert_eq!(grpc_status_code(response.headers()), "12");
    }

    #[test_case(false ; "health calls skipped")]
    #[test_case(true ; "health calls traced")]
    fn health_calls_follow_trace_setting(trace_health_checks: bool) {
        let stub = StubService {
            trailer_status: Some("0"),
            ..StubService::default()
        };
        let calls = Arc::clone(&stub.calls);
        let service = CallTraceLayer::new(trace_health_checks).layer(stub);

        let rendered = recorded(|| {
            tokio_test::block_on(async {
                let response = service
                    .oneshot(request("/grpc.health.v1.Health/Check"))
                    .await
                    .unwrap();
                drain(response.into_body()).await;
            });
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            rendered.contains(r#"service="grpc.health.v1.Health""#),
            trace_health_checks
        );
    }

    #[test]
    fn streamed_call_is_recorded_when_trailers_arrive() {
        let stub = StubService {
            trailer_status: Some("5"),
            ..StubService::default()
        };
        let service = CallTraceLayer::new(true).layer(stub);

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            tokio_test::block_on(async {
                let response = service
                    .oneshot(request("/grpc.health.v1.Health/Watch"))
                    .await
                    .unwrap();
                assert!(!handle.render().contains("health_echo_rpc_calls_total"));

                drain(response.into_body()).await;
            });
        });

        let rendered = handle.render();
        assert!(rendered.contains("health_echo_rpc_calls_total"));
        assert!(rendered.contains(r#"method="Watch""#));
        assert!(rendered.contains(r#"code="5""#));
    }

    #[test]
    fn trailers_only_response_is_recorded_at_head() {
        let stub = StubService {
            head_status: Some("12"),
            ..StubService::default()
        };
        let service = CallTraceLayer::new(false).layer(stub);

        let rendered = recorded(|| {
            let response =
                tokio_test::block_on(service.oneshot(request("/grpc.examples.echo.Echo/Missing")))
                    .unwrap();
            drop(response);
        });

        assert!(rendered.contains(r#"code="12""#));
        assert!(!rendered.contains(&format!(r#"code="{CANCELLED}""#)));
    }

    #[test]
    fn abandoned_stream_is_recorded_as_cancelled() {
        let stub = StubService {
            trailer_status: Some("0"),
            ..StubService::default()
        };
        let service = CallTraceLayer::new(true).layer(stub);

        let rendered = recorded(|| {
            let response =
                tokio_test::block_on(service.oneshot(request("/grpc.health.v1.Health/Watch")))
                    .unwrap();
            drop(response);
        });

        assert!(rendered.contains(&format!(r#"code="{CANCELLED}""#)));
    }
}
