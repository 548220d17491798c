//! Turning an inbound HTTP request into the context of a backend call.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use http::HeaderMap;

use crate::{
    annotator::{AnnotatorRegistry, MetadataAnnotator},
    context::GatewayContext,
    forwarded::ForwardedChain,
    metadata::{
        canonical_header_key, decode_bin_header, is_binary_header, DefaultHeaderMatcher,
        DefaultOutgoingHeaderMatcher, HeaderMatcher, Metadata, GRPC_TIMEOUT_HEADER,
    },
    request::RequestHead,
    status::{Code, Status},
    timeout::{decode_timeout, GrpcTimeout, TimeoutError},
    trace::{TraceError, Tracer, W3cTracer},
};

const AUTHORIZATION_HEADER: &str = "Authorization";
const AUTHORIZATION_KEY: &str = "authorization";

/// Why a request could not be annotated.
///
/// Converted into a [`Status`] with [`Code::InvalidArgument`] before it reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("invalid trace context: {0}")]
    Trace(#[from] TraceError),
    #[error("invalid grpc-timeout: {0}")]
    Timeout(#[from] TimeoutError),
    #[error("invalid grpc-timeout: value is not visible ascii")]
    TimeoutEncoding,
    #[error("invalid binary header {name}: {source}")]
    BinaryHeader {
        name: String,
        #[source]
        source: base64::DecodeError,
    },
}

impl From<AnnotateError> for Status {
    fn from(err: AnnotateError) -> Self {
        Status::from_error(Code::InvalidArgument, err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Outgoing,
    Incoming,
}

struct Config {
    incoming_header_matcher: Arc<dyn HeaderMatcher>,
    outgoing_header_matcher: Arc<dyn HeaderMatcher>,
    annotators: AnnotatorRegistry,
    default_timeout: Duration,
    tracer: Arc<dyn Tracer>,
}

/// Builds the context of a backend call from an inbound HTTP request.
///
/// The configuration is fixed when the annotator is built; cloning it is cheap and every
/// clone shares the same configuration.
///
/// ```rust
/// use std::time::Duration;
///
/// use volo_gateway::{ContextAnnotator, GatewayContext};
///
/// let annotator = ContextAnnotator::builder()
///     .default_timeout(Duration::from_secs(10))
///     .build();
///
/// let req = http::Request::get("http://bar.foo.example.com/svc/Method")
///     .header("Grpc-Metadata-Foobar", "Value1")
///     .body(())
///     .unwrap();
///
/// let mut cx = GatewayContext::new();
/// annotator.annotate_context(&mut cx, &req).unwrap();
///
/// let md = cx.outgoing_metadata().unwrap();
/// assert_eq!(md.get_all("foobar"), ["Value1"]);
/// assert!(cx.deadline().is_some());
/// ```
#[derive(Clone)]
pub struct ContextAnnotator {
    inner: Arc<Config>,
}

impl Default for ContextAnnotator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ContextAnnotator {
    pub fn builder() -> ContextAnnotatorBuilder {
        ContextAnnotatorBuilder::new()
    }

    /// The timeout applied when a request has no `grpc-timeout` header.
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Annotates `cx` for a call this process is about to make: the metadata built from
    /// `req` becomes the outgoing metadata of `cx`.
    ///
    /// On error `cx` is left as it was.
    pub fn annotate_context<'a>(
        &self,
        cx: &mut GatewayContext,
        req: impl Into<RequestHead<'a>>,
    ) -> Result<(), Status> {
        self.annotate(cx, req.into(), Direction::Outgoing)
    }

    /// Like [`annotate_context`](Self::annotate_context), but the metadata becomes the
    /// incoming metadata of `cx`, as if it had been received from a peer.
    pub fn annotate_incoming_context<'a>(
        &self,
        cx: &mut GatewayContext,
        req: impl Into<RequestHead<'a>>,
    ) -> Result<(), Status> {
        self.annotate(cx, req.into(), Direction::Incoming)
    }

    /// Writes the header-phase [`ServerMetadata`](crate::metadata::ServerMetadata) of `cx`
    /// into response headers, named by the outgoing header matcher.
    pub fn write_response_headers(&self, cx: &GatewayContext, headers: &mut HeaderMap) {
        if let Some(md) = cx.server_metadata() {
            md.write_headers(headers, &*self.inner.outgoing_header_matcher);
        }
    }

    /// Writes the trailer-phase [`ServerMetadata`](crate::metadata::ServerMetadata) of `cx`
    /// into response trailers.
    pub fn write_response_trailers(&self, cx: &GatewayContext, trailers: &mut HeaderMap) {
        if let Some(md) = cx.server_metadata() {
            md.write_trailers(trailers);
        }
    }

    fn annotate(
        &self,
        cx: &mut GatewayContext,
        req: RequestHead<'_>,
        direction: Direction,
    ) -> Result<(), Status> {
        let config = &*self.inner;

        let parent = config
            .tracer
            .extract(req.headers())
            .map_err(AnnotateError::from)?;
        let timeout = self.resolve_timeout(req.headers())?;
        let mut md = self.header_metadata(req.headers())?;
        ForwardedChain::from_request(&req).append_to(&mut md);

        let span = config.tracer.start_server_span(req.path(), parent.as_ref());
        let previous_deadline = cx.deadline();
        match timeout {
            Some(GrpcTimeout::After(timeout)) => cx.with_timeout(timeout),
            Some(GrpcTimeout::Expired) => cx.set_deadline(Instant::now()),
            None => {}
        }
        let previous_span = cx.replace_span(Some(span));

        if !md.is_empty() {
            if let Err(status) = config.annotators.annotate_into(cx, &req, &mut md) {
                tracing::debug!("[VOLO] metadata annotator failed for {}: {status}", req.path());
                cx.restore_deadline(previous_deadline);
                // the span started above is finished as it is dropped
                cx.replace_span(previous_span);
                return Err(status);
            }
            tracing::trace!(
                "[VOLO] annotated {} with {} {direction:?} metadata keys",
                req.path(),
                md.len()
            );
            match direction {
                Direction::Outgoing => cx.set_outgoing_metadata(md),
                Direction::Incoming => cx.set_incoming_metadata(md),
            }
        }

        if let Some(previous) = previous_span {
            previous.finish();
        }
        Ok(())
    }

    /// The `grpc-timeout` of the request, or the default timeout when it has none.
    ///
    /// `None` means the call has no deadline, which is also what a zero timeout means.
    fn resolve_timeout(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<GrpcTimeout>, AnnotateError> {
        let header = headers
            .get(GRPC_TIMEOUT_HEADER)
            .filter(|value| !value.is_empty());
        let timeout = match header {
            Some(value) => {
                let value = value.to_str().map_err(|_| AnnotateError::TimeoutEncoding)?;
                decode_timeout(value)?
            }
            None => GrpcTimeout::After(self.inner.default_timeout),
        };
        Ok(match timeout {
            GrpcTimeout::After(timeout) if timeout.is_zero() => None,
            timeout => Some(timeout),
        })
    }

    /// Maps the request headers into metadata in a single pass.
    fn header_metadata(&self, headers: &HeaderMap) -> Result<Metadata, AnnotateError> {
        let mut md = Metadata::new();
        for (name, value) in headers {
            let name = canonical_header_key(name.as_str());
            let value = value.as_bytes();

            if name == AUTHORIZATION_HEADER {
                md.append(AUTHORIZATION_KEY, value);
            }

            let Some(key) = self.inner.incoming_header_matcher.match_header(&name) else {
                continue;
            };
            if is_binary_header(&name) {
                let decoded = decode_bin_header(value)
                    .map_err(|source| AnnotateError::BinaryHeader { name, source })?;
                md.append(key, decoded);
            } else {
                md.append(key, value);
            }
        }
        Ok(md)
    }
}

impl fmt::Debug for ContextAnnotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextAnnotator")
            .field("annotators", &self.inner.annotators)
            .field("default_timeout", &self.inner.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Configures a [`ContextAnnotator`].
pub struct ContextAnnotatorBuilder {
    incoming_header_matcher: Arc<dyn HeaderMatcher>,
    outgoing_header_matcher: Arc<dyn HeaderMatcher>,
    annotators: AnnotatorRegistry,
    default_timeout: Duration,
    tracer: Arc<dyn Tracer>,
}

impl Default for ContextAnnotatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextAnnotatorBuilder {
    pub fn new() -> Self {
        Self {
            incoming_header_matcher: Arc::new(DefaultHeaderMatcher),
            outgoing_header_matcher: Arc::new(DefaultOutgoingHeaderMatcher),
            annotators: AnnotatorRegistry::new(),
            default_timeout: Duration::ZERO,
            tracer: Arc::new(W3cTracer),
        }
    }

    /// Sets the matcher mapping request headers to metadata keys.
    ///
    /// Defaults to [`DefaultHeaderMatcher`].
    pub fn incoming_header_matcher<M: HeaderMatcher>(mut self, matcher: M) -> Self {
        self.incoming_header_matcher = Arc::new(matcher);
        self
    }

    /// Sets the matcher mapping response metadata keys to HTTP header names.
    ///
    /// Defaults to [`DefaultOutgoingHeaderMatcher`].
    pub fn outgoing_header_matcher<M: HeaderMatcher>(mut self, matcher: M) -> Self {
        self.outgoing_header_matcher = Arc::new(matcher);
        self
    }

    /// Registers an annotator. Annotators run in registration order.
    pub fn metadata_annotator<A: MetadataAnnotator>(mut self, annotator: A) -> Self {
        self.annotators.push(annotator);
        self
    }

    /// Registers a closure as an annotator, see
    /// [`metadata_annotator`](Self::metadata_annotator).
    pub fn metadata_fn<F>(self, f: F) -> Self
    where
        F: Fn(&GatewayContext, &RequestHead<'_>) -> Result<Metadata, Status>
            + Send
            + Sync
            + 'static,
    {
        self.metadata_annotator(f)
    }

    /// Sets the timeout used when a request has no `grpc-timeout` header. Zero, the default,
    /// means no deadline.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the tracer. Defaults to [`W3cTracer`].
    pub fn tracer<T: Tracer>(mut self, tracer: T) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    pub fn build(self) -> ContextAnnotator {
        ContextAnnotator {
            inner: Arc::new(Config {
                incoming_header_matcher: self.incoming_header_matcher,
                outgoing_header_matcher: self.outgoing_header_matcher,
                annotators: self.annotators,
                default_timeout: self.default_timeout,
                tracer: self.tracer,
            }),
        }
    }
}
