//! Ordered, multi-valued metadata attached to a gRPC call, and the rules mapping HTTP headers
//! into it.

mod binary;
mod matcher;
mod server;

use std::{fmt, str::Utf8Error};

use bytes::Bytes;
use linked_hash_map::LinkedHashMap;

pub use self::{
    binary::{decode_bin_header, encode_bin_header, is_binary_header},
    matcher::{
        canonical_header_key, default_header_matcher, default_outgoing_header_matcher,
        is_permanent_http_header, DefaultHeaderMatcher, DefaultOutgoingHeaderMatcher,
        HeaderMatcher, PERMANENT_HTTP_HEADERS,
    },
    server::ServerMetadata,
};

/// The http prefix that represents custom metadata parameters to or from a gRPC call.
pub const METADATA_HEADER_PREFIX: &str = "Grpc-Metadata-";

/// Prepended to permanent HTTP header keys when they are added to the gRPC metadata.
pub const METADATA_PREFIX: &str = "grpcgateway-";

/// Prepended to trailer metadata when it is converted to HTTP headers in a response.
pub const METADATA_TRAILER_PREFIX: &str = "Grpc-Trailer-";

pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

pub(crate) const BINARY_HEADER_SUFFIX: &str = "-Bin";

/// A single metadata value.
///
/// Values are raw bytes: textual headers are stored as they arrived and `-bin` headers are
/// stored after base64 decoding.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct MetadataValue(Bytes);

impl MetadataValue {
    #[inline]
    pub fn from_static(value: &'static str) -> Self {
        Self(Bytes::from_static(value.as_bytes()))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Yields the value as `&str` if it is valid UTF-8.
    #[inline]
    pub fn to_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.0)
    }

    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for MetadataValue {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&[u8]> for MetadataValue {
    fn from(value: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(value))
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl PartialEq<str> for MetadataValue {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for MetadataValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<[u8]> for MetadataValue {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl fmt::Debug for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_str() {
            Ok(s) => fmt::Debug::fmt(s, f),
            Err(_) => fmt::Debug::fmt(&self.0, f),
        }
    }
}

/// An ordered multimap from lowercase keys to one or more values.
///
/// Values appended under the same key keep their insertion order.
///
/// ```rust
/// use volo_gateway::metadata::Metadata;
///
/// let mut md = Metadata::new();
/// md.append("Foo-Baz", "Value2");
/// md.append("foo-baz", "Value3");
///
/// assert_eq!(md.len(), 1);
/// assert_eq!(md.get_all("FOO-BAZ"), ["Value2", "Value3"]);
/// ```
#[derive(Clone, Default, PartialEq)]
pub struct Metadata {
    inner: LinkedHashMap<String, Vec<MetadataValue>>,
}

impl Metadata {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: LinkedHashMap::with_capacity(capacity),
        }
    }

    /// Creates metadata from key/value pairs, accumulating values of repeated keys.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<MetadataValue>,
    {
        let mut md = Self::new();
        md.extend(pairs);
        md
    }

    /// Appends `value` to the values of `key`, creating the key if needed.
    pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<MetadataValue>) {
        let key = key.as_ref().to_ascii_lowercase();
        let value = value.into();
        match self.inner.get_mut(key.as_str()) {
            Some(values) => values.push(value),
            None => {
                self.inner.insert(key, vec![value]);
            }
        }
    }

    /// Replaces all values of `key` with `value`, returning the previous values.
    pub fn insert(
        &mut self,
        key: impl AsRef<str>,
        value: impl Into<MetadataValue>,
    ) -> Option<Vec<MetadataValue>> {
        self.inner
            .insert(key.as_ref().to_ascii_lowercase(), vec![value.into()])
    }

    /// Returns the first value of `key`.
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.get_all(key).first()
    }

    /// Returns all values of `key` in insertion order, or an empty slice.
    pub fn get_all(&self, key: &str) -> &[MetadataValue] {
        let found = match self.inner.get(key) {
            Some(values) => Some(values),
            None => self.inner.get(key.to_ascii_lowercase().as_str()),
        };
        found.map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        !self.get_all(key).is_empty()
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<MetadataValue>> {
        self.inner.remove(key.to_ascii_lowercase().as_str())
    }

    /// Number of distinct keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MetadataValue])> {
        self.inner
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Appends every value of `other` after the values already present for the same key.
    pub fn merge(&mut self, other: Metadata) {
        for (key, values) in other.inner {
            match self.inner.get_mut(key.as_str()) {
                Some(existing) => existing.extend(values),
                None => {
                    self.inner.insert(key, values);
                }
            }
        }
    }

    /// Joins any number of metadata into a single one, left to right.
    pub fn join<I>(mds: I) -> Self
    where
        I: IntoIterator<Item = Metadata>,
    {
        mds.into_iter().fold(Self::new(), |mut acc, md| {
            acc.merge(md);
            acc
        })
    }
}

impl<K, V> Extend<(K, V)> for Metadata
where
    K: AsRef<str>,
    V: Into<MetadataValue>,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.append(key, value);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: AsRef<str>,
    V: Into<MetadataValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}
