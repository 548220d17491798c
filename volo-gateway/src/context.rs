use std::{
    future::Future,
    time::{Duration, Instant},
};

use crate::{
    metadata::{Metadata, ServerMetadata},
    status::Status,
    trace::ServerSpan,
};

/// Typed state carried by a [`GatewayContext`].
#[derive(Default, Debug)]
pub struct Extensions(http::Extensions);

impl std::ops::Deref for Extensions {
    type Target = http::Extensions;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Extensions {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[derive(Clone)]
struct OutgoingMetadata(Metadata);

#[derive(Clone)]
struct IncomingMetadata(Metadata);

#[derive(Clone)]
struct ServerMetadataSlot(ServerMetadata);

/// The context of one backend call made on behalf of an HTTP request.
///
/// It carries the call deadline, the server span, and the metadata attached by
/// [`ContextAnnotator`](crate::ContextAnnotator), plus any typed state in
/// [`extensions`](Self::extensions).
#[derive(Default, Debug)]
pub struct GatewayContext {
    deadline: Option<Instant>,
    span: Option<ServerSpan>,
    extensions: Extensions,
}

impl GatewayContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sets the deadline, unless the context already has an earlier one.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
    }

    /// Sets the deadline to `timeout` from now, see [`set_deadline`](Self::set_deadline).
    ///
    /// A timeout too large to be represented leaves the deadline unchanged.
    pub fn with_timeout(&mut self, timeout: Duration) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.set_deadline(deadline),
            None => tracing::trace!("[VOLO] timeout {timeout:?} out of range, ignored"),
        }
    }

    pub(crate) fn restore_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Drives `fut` until it completes or the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Status> {
        let Some(deadline) = self.deadline else {
            return Ok(fut.await);
        };
        tokio::time::timeout_at(deadline.into(), fut)
            .await
            .map_err(|_| {
                tracing::trace!("[VOLO] call deadline exceeded");
                Status::deadline_exceeded("deadline exceeded before the call completed")
            })
    }

    /// The server span started for this call, if it is still open.
    pub fn span(&self) -> Option<&ServerSpan> {
        self.span.as_ref()
    }

    /// Attaches `span`, finishing the span it replaces.
    pub fn set_span(&mut self, span: ServerSpan) {
        if let Some(previous) = self.span.replace(span) {
            previous.finish();
        }
    }

    /// Detaches the server span, handing its lifetime to the caller.
    pub fn take_span(&mut self) -> Option<ServerSpan> {
        self.span.take()
    }

    /// Finishes the server span. Call it once the backend call is done.
    pub fn finish_span(&mut self) {
        if let Some(span) = self.span.take() {
            span.finish();
        }
    }

    pub(crate) fn replace_span(&mut self, span: Option<ServerSpan>) -> Option<ServerSpan> {
        std::mem::replace(&mut self.span, span)
    }

    /// Metadata to send with the backend call.
    pub fn outgoing_metadata(&self) -> Option<&Metadata> {
        self.extensions.get::<OutgoingMetadata>().map(|md| &md.0)
    }

    /// Replaces the metadata to send with the backend call.
    pub fn set_outgoing_metadata(&mut self, md: Metadata) {
        self.extensions.insert(OutgoingMetadata(md));
    }

    /// Metadata a local handler should treat as received from a peer.
    pub fn incoming_metadata(&self) -> Option<&Metadata> {
        self.extensions.get::<IncomingMetadata>().map(|md| &md.0)
    }

    /// Replaces the metadata a local handler should treat as received from a peer.
    pub fn set_incoming_metadata(&mut self, md: Metadata) {
        self.extensions.insert(IncomingMetadata(md));
    }

    /// Metadata returned by the backend, once the code performing the call stored it.
    pub fn server_metadata(&self) -> Option<&ServerMetadata> {
        self.extensions.get::<ServerMetadataSlot>().map(|md| &md.0)
    }

    pub fn server_metadata_mut(&mut self) -> Option<&mut ServerMetadata> {
        self.extensions
            .get_mut::<ServerMetadataSlot>()
            .map(|md| &mut md.0)
    }

    pub fn set_server_metadata(&mut self, md: ServerMetadata) {
        self.extensions.insert(ServerMetadataSlot(md));
    }

    #[inline]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    #[inline]
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
