//! Rules deciding whether and how an HTTP header becomes a metadata key.

use super::{METADATA_HEADER_PREFIX, METADATA_PREFIX};

/// Request headers from the IANA message header registry that are forwarded as
/// `grpcgateway-` prefixed metadata by [`DefaultHeaderMatcher`].
///
/// See <http://www.iana.org/assignments/message-headers/message-headers.xml>
pub const PERMANENT_HTTP_HEADERS: [&str; 24] = [
    "Accept",
    "Accept-Charset",
    "Accept-Language",
    "Accept-Ranges",
    "Authorization",
    "Cache-Control",
    "Content-Type",
    "Cookie",
    "Date",
    "Expect",
    "From",
    "Host",
    "If-Match",
    "If-Modified-Since",
    "If-None-Match",
    "If-Schedule-Tag-Match",
    "If-Unmodified-Since",
    "Max-Forwards",
    "Origin",
    "Pragma",
    "Referer",
    "User-Agent",
    "Via",
    "Warning",
];

/// Maps a header name onto a metadata key, or drops it by returning `None`.
///
/// Incoming matchers receive the canonical form of the header name (see
/// [`canonical_header_key`]); outgoing matchers receive a lowercase metadata key and return
/// the HTTP header name to write.
///
/// Any `Fn(&str) -> Option<String>` is a matcher:
///
/// ```rust
/// use volo_gateway::metadata::{HeaderMatcher, default_header_matcher};
///
/// let matcher = |name: &str| match name {
///     "X-Tenant" => Some("tenant".to_owned()),
///     _ => default_header_matcher(name),
/// };
///
/// assert_eq!(matcher.match_header("X-Tenant").as_deref(), Some("tenant"));
/// assert_eq!(matcher.match_header("Cookie").as_deref(), Some("grpcgateway-cookie"));
/// ```
pub trait HeaderMatcher: Send + Sync + 'static {
    fn match_header(&self, name: &str) -> Option<String>;
}

impl<F> HeaderMatcher for F
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    #[inline]
    fn match_header(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// The incoming matcher used unless another one is configured.
///
/// See [`default_header_matcher`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHeaderMatcher;

impl HeaderMatcher for DefaultHeaderMatcher {
    #[inline]
    fn match_header(&self, name: &str) -> Option<String> {
        default_header_matcher(name)
    }
}

/// The outgoing matcher used unless another one is configured.
///
/// See [`default_outgoing_header_matcher`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultOutgoingHeaderMatcher;

impl HeaderMatcher for DefaultOutgoingHeaderMatcher {
    #[inline]
    fn match_header(&self, key: &str) -> Option<String> {
        default_outgoing_header_matcher(key)
    }
}

/// Permanent HTTP headers map to `grpcgateway-<name>`, `Grpc-Metadata-<name>` headers map to
/// `<name>`, both lowercased. Every other header is dropped.
///
/// A bare `Grpc-Metadata-` header is dropped too rather than mapped to an empty key.
pub fn default_header_matcher(name: &str) -> Option<String> {
    if is_permanent_http_header(name) {
        return Some(format!("{METADATA_PREFIX}{}", name.to_ascii_lowercase()));
    }
    match name.strip_prefix(METADATA_HEADER_PREFIX) {
        Some(key) if !key.is_empty() => Some(key.to_ascii_lowercase()),
        _ => None,
    }
}

/// Every metadata key is written back as a `Grpc-Metadata-<key>` header.
pub fn default_outgoing_header_matcher(key: &str) -> Option<String> {
    Some(format!("{METADATA_HEADER_PREFIX}{key}"))
}

/// Whether `name`, in canonical form, is one of [`PERMANENT_HTTP_HEADERS`].
pub fn is_permanent_http_header(name: &str) -> bool {
    PERMANENT_HTTP_HEADERS.iter().any(|header| *header == name)
}

/// Returns the canonical format of a header name: the first letter and every letter
/// following a hyphen are upper case, the rest are lower case.
///
/// Names containing a space or a non-token byte are returned unchanged.
///
/// ```rust
/// use volo_gateway::metadata::canonical_header_key;
///
/// assert_eq!(canonical_header_key("grpc-metadata-foo-bAz"), "Grpc-Metadata-Foo-Baz");
/// ```
pub fn canonical_header_key(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_owned();
    }

    let mut upper = true;
    name.chars()
        .map(|c| {
            let c = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            c
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
        | b'`' | b'|' | b'~')
        || b.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_keys() {
        assert_eq!(canonical_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_header_key("GRPC-METADATA-FOOBAR"), "Grpc-Metadata-Foobar");
        assert_eq!(canonical_header_key("x-forwarded-for"), "X-Forwarded-For");
        assert_eq!(canonical_header_key("grpc-metadata-test-bin"), "Grpc-Metadata-Test-Bin");
        assert_eq!(canonical_header_key("bad header"), "bad header");
    }

    #[test]
    fn default_matcher_prefix() {
        assert_eq!(
            default_header_matcher("Grpc-Metadata-Foobar").as_deref(),
            Some("foobar")
        );
        assert_eq!(
            default_header_matcher("Grpc-Metadata-Foo-Baz").as_deref(),
            Some("foo-baz")
        );
        assert_eq!(default_header_matcher("Grpc-Metadata-"), None);
    }

    #[test]
    fn default_matcher_permanent_headers() {
        for header in PERMANENT_HTTP_HEADERS {
            let key = default_header_matcher(header).unwrap();
            assert_eq!(key, format!("grpcgateway-{}", header.to_ascii_lowercase()));
        }
    }

    #[test]
    fn default_matcher_drops_others() {
        assert_eq!(default_header_matcher("Some-Irrelevant-Header"), None);
        assert_eq!(default_header_matcher("X-Forwarded-For"), None);
        assert_eq!(default_header_matcher("Grpc-Timeout"), None);
    }

    #[test]
    fn outgoing_matcher() {
        assert_eq!(
            DefaultOutgoingHeaderMatcher.match_header("foo").as_deref(),
            Some("Grpc-Metadata-foo")
        );
    }

    #[test]
    fn closure_matcher() {
        let matcher = |name: &str| name.strip_prefix("X-").map(str::to_ascii_lowercase);
        assert_eq!(matcher.match_header("X-User").as_deref(), Some("user"));
        assert_eq!(matcher.match_header("Cookie"), None);
    }
}
