#![doc(
    html_logo_url = "https://github.com/cloudwego/volo/raw/main/.github/assets/logo.png?sanitize=true"
)]
#![cfg_attr(not(doctest), doc = include_str!("../README.md"))]

pub mod annotate;
pub mod annotator;
pub mod context;
pub mod forwarded;
pub mod metadata;
pub mod request;
pub mod status;
pub mod timeout;
pub mod trace;

pub use annotate::{AnnotateError, ContextAnnotator, ContextAnnotatorBuilder};
pub use annotator::MetadataAnnotator;
pub use context::GatewayContext;
pub use metadata::{Metadata, MetadataValue, ServerMetadata};
pub use request::{RemoteAddr, RequestHead};
pub use status::{Code, Status};
pub use trace::{GlobalTracer, NoopTracer, ServerSpan, Tracer, W3cTracer};
