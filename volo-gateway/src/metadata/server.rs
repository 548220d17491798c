use http::{HeaderMap, HeaderName, HeaderValue};

use super::{encode_bin_header, HeaderMatcher, Metadata, MetadataValue, METADATA_TRAILER_PREFIX};

/// Metadata sent back by a gRPC server: the header-phase and the trailer-phase metadata.
///
/// It is attached to a [`GatewayContext`] by the code that performs the call and read back
/// when the HTTP response is written.
///
/// [`GatewayContext`]: crate::GatewayContext
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerMetadata {
    pub header: Metadata,
    pub trailer: Metadata,
}

impl ServerMetadata {
    pub fn new(header: Metadata, trailer: Metadata) -> Self {
        Self { header, trailer }
    }

    /// Writes header-phase metadata into `headers`, naming each header with `matcher`.
    ///
    /// Keys rejected by the matcher, and names or values that are not valid in HTTP, are
    /// skipped.
    pub fn write_headers<M>(&self, headers: &mut HeaderMap, matcher: &M)
    where
        M: HeaderMatcher + ?Sized,
    {
        for (key, values) in self.header.iter() {
            let Some(name) = matcher.match_header(key) else {
                continue;
            };
            append_all(headers, &name, key, values);
        }
    }

    /// Writes trailer-phase metadata into `headers` as `Grpc-Trailer-<key>`.
    pub fn write_trailers(&self, headers: &mut HeaderMap) {
        for (key, values) in self.trailer.iter() {
            let name = format!("{METADATA_TRAILER_PREFIX}{key}");
            append_all(headers, &name, key, values);
        }
    }
}

fn append_all(headers: &mut HeaderMap, name: &str, key: &str, values: &[MetadataValue]) {
    let Ok(name) = HeaderName::try_from(name) else {
        tracing::debug!("[VOLO] skip metadata {key}: invalid header name {name}");
        return;
    };
    let binary = key.ends_with("-bin");
    for value in values {
        let value = if binary {
            HeaderValue::try_from(encode_bin_header(value.as_bytes()))
        } else {
            HeaderValue::from_bytes(value.as_bytes())
        };
        match value {
            Ok(value) => {
                headers.append(name.clone(), value);
            }
            Err(_) => {
                tracing::debug!("[VOLO] skip metadata {key}: invalid header value");
            }
        }
    }
}
