//! User supplied producers of extra metadata.

use std::{fmt, sync::Arc};

use crate::{context::GatewayContext, metadata::Metadata, request::RequestHead, status::Status};

/// Produces extra metadata for a request.
///
/// Annotators run once per annotated request, after the header derived metadata is built,
/// in the order they were registered. Returning an error aborts the annotation and leaves
/// the context untouched.
///
/// Any `Fn(&GatewayContext, &RequestHead<'_>) -> Result<Metadata, Status>` is an annotator.
pub trait MetadataAnnotator: Send + Sync + 'static {
    fn annotate(&self, cx: &GatewayContext, req: &RequestHead<'_>) -> Result<Metadata, Status>;
}

impl<F> MetadataAnnotator for F
where
    F: Fn(&GatewayContext, &RequestHead<'_>) -> Result<Metadata, Status> + Send + Sync + 'static,
{
    #[inline]
    fn annotate(&self, cx: &GatewayContext, req: &RequestHead<'_>) -> Result<Metadata, Status> {
        self(cx, req)
    }
}

/// An ordered list of [`MetadataAnnotator`]s.
#[derive(Clone, Default)]
pub struct AnnotatorRegistry {
    annotators: Vec<Arc<dyn MetadataAnnotator>>,
}

impl AnnotatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<A: MetadataAnnotator>(&mut self, annotator: A) {
        self.annotators.push(Arc::new(annotator));
    }

    pub fn len(&self) -> usize {
        self.annotators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotators.is_empty()
    }

    /// Runs every annotator in registration order and appends its output to `md`.
    ///
    /// Stops at the first error; `md` is only written when every annotator succeeded.
    pub fn annotate_into(
        &self,
        cx: &GatewayContext,
        req: &RequestHead<'_>,
        md: &mut Metadata,
    ) -> Result<(), Status> {
        let produced = self
            .annotators
            .iter()
            .map(|annotator| annotator.annotate(cx, req))
            .collect::<Result<Vec<_>, _>>()?;
        for extra in produced {
            md.merge(extra);
        }
        Ok(())
    }
}

impl fmt::Debug for AnnotatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotatorRegistry")
            .field("len", &self.annotators.len())
            .finish()
    }
}
