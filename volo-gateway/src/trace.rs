//! Distributed tracing for annotated calls.
//!
//! A [`Tracer`] extracts the caller's trace from the request headers and starts the server
//! side span of the call. The span is owned by the [`GatewayContext`] and stays open until
//! the call is done: call [`GatewayContext::finish_span`] after the RPC completes, or let
//! the context drop.
//!
//! Spans are plain `tracing` spans parented with [`OpenTelemetrySpanExt::set_parent`], so
//! they are exported by whatever `tracing_opentelemetry` layer the application installs.
//!
//! [`GatewayContext`]: crate::GatewayContext
//! [`GatewayContext::finish_span`]: crate::GatewayContext::finish_span

use std::time::Instant;

use http::HeaderMap;
pub use opentelemetry::trace::SpanContext;
use opentelemetry::{
    propagation::TextMapPropagator,
    trace::{TraceContextExt, TraceId},
    Context,
};
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    #[error("malformed traceparent: {0:?}")]
    MalformedTraceparent(String),
    #[error("duplicate traceparent header")]
    DuplicateTraceparent,
}

/// Extracts a caller's trace from request headers and starts server spans.
///
/// Implementations are injected into the [`ContextAnnotator`](crate::ContextAnnotator)
/// configuration.
pub trait Tracer: Send + Sync + 'static {
    /// Extracts the caller's span context.
    ///
    /// `Ok(None)` means the request carries no trace; an error means it carries a malformed
    /// one.
    fn extract(&self, headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError>;

    /// Starts the server span of a call named `operation`, child of `parent` if any.
    fn start_server_span(&self, operation: &str, parent: Option<&SpanContext>) -> ServerSpan {
        ServerSpan::start(operation, parent)
    }
}

/// A [`Tracer`] speaking W3C Trace Context (`traceparent` and `tracestate`).
///
/// A `traceparent` header that is present but does not decode to a valid span context is
/// an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct W3cTracer;

impl Tracer for W3cTracer {
    fn extract(&self, headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError> {
        let mut traceparents = headers.get_all(TRACEPARENT_HEADER).iter();
        let Some(traceparent) = traceparents.next() else {
            return Ok(None);
        };
        if traceparents.next().is_some() {
            return Err(TraceError::DuplicateTraceparent);
        }

        let cx = TraceContextPropagator::new()
            .extract_with_context(&Context::new(), &HeaderExtractor(headers));
        let span_context = cx.span().span_context().clone();
        if !span_context.is_valid() {
            return Err(TraceError::MalformedTraceparent(
                String::from_utf8_lossy(traceparent.as_bytes()).into_owned(),
            ));
        }
        Ok(Some(span_context))
    }
}

/// A [`Tracer`] delegating to the propagator installed with
/// [`opentelemetry::global::set_text_map_propagator`].
///
/// Headers the global propagator can not decode are ignored rather than rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalTracer;

impl Tracer for GlobalTracer {
    fn extract(&self, headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError> {
        let cx = opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.extract_with_context(&Context::new(), &HeaderExtractor(headers))
        });
        let span_context = cx.span().span_context().clone();
        Ok(span_context.is_valid().then_some(span_context))
    }
}

/// A [`Tracer`] that ignores incoming traces and records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn extract(&self, _headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError> {
        Ok(None)
    }

    fn start_server_span(&self, operation: &str, _parent: Option<&SpanContext>) -> ServerSpan {
        ServerSpan::none(operation)
    }
}

/// The server side span of a call.
///
/// It is finished by [`ServerSpan::finish`] or when dropped, whichever comes first.
#[derive(Debug)]
pub struct ServerSpan {
    operation: String,
    parent: Option<SpanContext>,
    span: Span,
    started_at: Instant,
    finished: bool,
}

impl ServerSpan {
    /// Starts a span in the trace of `parent`, or in a new trace.
    pub fn start(operation: &str, parent: Option<&SpanContext>) -> Self {
        let span = tracing::info_span!(
            "rpc.server",
            rpc.method = operation,
            otel.name = operation,
            otel.kind = "server",
        );
        if let Some(parent) = parent {
            span.set_parent(Context::new().with_remote_span_context(parent.clone()));
        }

        Self {
            operation: operation.to_owned(),
            parent: parent.cloned(),
            span,
            started_at: Instant::now(),
            finished: false,
        }
    }

    /// A span that records nothing.
    pub fn none(operation: &str) -> Self {
        Self {
            operation: operation.to_owned(),
            parent: None,
            span: Span::none(),
            started_at: Instant::now(),
            finished: false,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The caller's span context this span continues.
    pub fn parent(&self) -> Option<&SpanContext> {
        self.parent.as_ref()
    }

    /// The OpenTelemetry identity of this span.
    ///
    /// `None` unless a `tracing_opentelemetry` layer records the span.
    pub fn span_context(&self) -> Option<SpanContext> {
        let cx = self.span.context();
        let span_context = cx.span().span_context().clone();
        span_context.is_valid().then_some(span_context)
    }

    pub fn trace_id(&self) -> Option<TraceId> {
        self.span_context()
            .or_else(|| self.parent.clone())
            .map(|cx| cx.trace_id())
    }

    /// The `tracing` span, to instrument the downstream call with.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Writes the W3C trace context of the downstream call into `headers`.
    ///
    /// When the span is not recorded the caller's context is passed through unchanged.
    pub fn inject(&self, headers: &mut HeaderMap) {
        let cx = match self.span_context() {
            Some(_) => self.span.context(),
            None => match &self.parent {
                Some(parent) => Context::new().with_remote_span_context(parent.clone()),
                None => return,
            },
        };
        TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(headers));
    }

    /// The `traceparent` value to send downstream.
    pub fn traceparent(&self) -> Option<String> {
        let mut headers = HeaderMap::new();
        self.inject(&mut headers);
        headers
            .get(TRACEPARENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn finish(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.span.is_none() {
            tracing::trace!(
                parent: &self.span,
                elapsed_us = self.started_at.elapsed().as_micros() as u64,
                "[VOLO] server span {} finished",
                self.operation
            );
        }
        self.span = Span::none();
    }
}

impl Drop for ServerSpan {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn with_otel<R>(f: impl FnOnce() -> R) -> R {
        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("volo-gateway")));
        tracing::subscriber::with_default(subscriber, f)
    }

    #[test]
    fn w3c_extract() {
        assert_eq!(W3cTracer.extract(&HeaderMap::new()), Ok(None));

        let cx = W3cTracer
            .extract(&headers(&[
                ("traceparent", TRACEPARENT),
                ("tracestate", "congo=t61rcWkgMzE"),
            ]))
            .unwrap()
            .unwrap();
        assert_eq!(cx.trace_id().to_string(), "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(cx.span_id().to_string(), "b7ad6b7169203331");
        assert!(cx.is_sampled());
        assert!(cx.is_remote());
        assert_eq!(cx.trace_state().header(), "congo=t61rcWkgMzE");
    }

    #[test]
    fn malformed_traceparent() {
        for value in [
            "",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-zz",
            "00-0AF7651916CD43DD8448EB211C80319C-b7ad6b7169203331-01",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ] {
            assert_eq!(
                W3cTracer.extract(&headers(&[("traceparent", value)])),
                Err(TraceError::MalformedTraceparent(value.to_owned())),
                "value = {value:?}"
            );
        }
    }

    #[test]
    fn future_version_may_have_more_fields() {
        let cx = W3cTracer
            .extract(&headers(&[(
                "traceparent",
                "01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00-whatever",
            )]))
            .unwrap()
            .unwrap();
        assert!(!cx.is_sampled());
    }

    #[test]
    fn w3c_extract_rejects_duplicates() {
        let result = W3cTracer.extract(&headers(&[
            ("traceparent", TRACEPARENT),
            ("traceparent", TRACEPARENT),
        ]));
        assert_eq!(result, Err(TraceError::DuplicateTraceparent));
    }

    #[test]
    fn global_tracer_ignores_undecodable_headers() {
        // the global propagator is a no-op until one is installed
        assert_eq!(
            GlobalTracer.extract(&headers(&[("traceparent", TRACEPARENT)])),
            Ok(None)
        );
        assert_eq!(
            GlobalTracer.extract(&headers(&[("traceparent", "garbage")])),
            Ok(None)
        );
    }

    #[test]
    fn child_span_keeps_trace() {
        with_otel(|| {
            let parent = W3cTracer
                .extract(&headers(&[("traceparent", TRACEPARENT)]))
                .unwrap()
                .unwrap();
            let span = W3cTracer.start_server_span("/svc/Method", Some(&parent));

            let cx = span.span_context().unwrap();
            assert_eq!(cx.trace_id(), parent.trace_id());
            assert_ne!(cx.span_id(), parent.span_id());
            assert!(!cx.is_remote());
            assert_eq!(span.parent(), Some(&parent));
            assert_eq!(span.operation(), "/svc/Method");

            let traceparent = span.traceparent().unwrap();
            assert!(traceparent.starts_with("00-0af7651916cd43dd8448eb211c80319c-"));
            assert!(traceparent.ends_with("-01"));
            assert_ne!(traceparent, TRACEPARENT);
        });
    }

    #[test]
    fn root_span() {
        with_otel(|| {
            let span = ServerSpan::start("/svc/Method", None);
            let cx = span.span_context().unwrap();
            assert!(cx.is_valid());
            assert!(cx.is_sampled());
            assert_eq!(span.trace_id(), Some(cx.trace_id()));
            assert!(span.parent().is_none());
            span.finish();
        });
    }

    #[test]
    fn unrecorded_span_passes_caller_trace_through() {
        let parent = W3cTracer
            .extract(&headers(&[("traceparent", TRACEPARENT)]))
            .unwrap()
            .unwrap();
        let span = ServerSpan::start("/svc/Method", Some(&parent));
        assert!(span.span_context().is_none());
        assert_eq!(span.traceparent().as_deref(), Some(TRACEPARENT));

        let mut downstream = HeaderMap::new();
        span.inject(&mut downstream);
        assert_eq!(downstream.get(TRACEPARENT_HEADER).unwrap(), TRACEPARENT);

        assert!(ServerSpan::start("/svc/Method", None).traceparent().is_none());
    }

    #[test]
    fn noop() {
        let span = NoopTracer.start_server_span("/svc/Method", None);
        assert!(span.span_context().is_none());
        assert!(span.traceparent().is_none());
        assert_eq!(NoopTracer.extract(&headers(&[("traceparent", "garbage")])), Ok(None));
    }
}
