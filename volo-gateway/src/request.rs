//! A borrowed view over the parts of an HTTP request the gateway reads.

use std::{fmt, net::SocketAddr};

use http::{header, Extensions, HeaderMap, Method, Uri};

/// Address of the peer that sent the request, formatted as `host:port`.
///
/// The server inserts it into the request extensions when it accepts the request. It is kept
/// as the raw string received from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

impl RemoteAddr {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for RemoteAddr {
    fn from(addr: &str) -> Self {
        Self(addr.to_owned())
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The head of an inbound HTTP request: method, uri, headers and extensions.
#[derive(Clone, Copy, Debug)]
pub struct RequestHead<'a> {
    method: &'a Method,
    uri: &'a Uri,
    headers: &'a HeaderMap,
    extensions: &'a Extensions,
}

impl<'a> RequestHead<'a> {
    pub fn from_request<B>(req: &'a http::Request<B>) -> Self {
        Self {
            method: req.method(),
            uri: req.uri(),
            headers: req.headers(),
            extensions: req.extensions(),
        }
    }

    pub fn from_parts(parts: &'a http::request::Parts) -> Self {
        Self {
            method: &parts.method,
            uri: &parts.uri,
            headers: &parts.headers,
            extensions: &parts.extensions,
        }
    }

    #[inline]
    pub fn method(&self) -> &'a Method {
        self.method
    }

    #[inline]
    pub fn uri(&self) -> &'a Uri {
        self.uri
    }

    #[inline]
    pub fn headers(&self) -> &'a HeaderMap {
        self.headers
    }

    #[inline]
    pub fn extensions(&self) -> &'a Extensions {
        self.extensions
    }

    #[inline]
    pub fn path(&self) -> &'a str {
        self.uri.path()
    }

    /// The host the request is addressed to, with its port if any.
    ///
    /// Taken from the uri authority, falling back to the `Host` header.
    pub fn host(&self) -> Option<&'a str> {
        let host = match self.uri.authority() {
            Some(authority) => {
                let authority = authority.as_str();
                authority
                    .rsplit_once('@')
                    .map_or(authority, |(_, host)| host)
            }
            None => self.header(header::HOST.as_str())?,
        };
        (!host.is_empty()).then_some(host)
    }

    /// The peer address inserted by the server, see [`RemoteAddr`].
    pub fn remote_addr(&self) -> Option<&'a str> {
        self.extensions.get::<RemoteAddr>().map(RemoteAddr::as_str)
    }

    /// The first value of header `name`, if it is visible ascii.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

impl<'a, B> From<&'a http::Request<B>> for RequestHead<'a> {
    fn from(req: &'a http::Request<B>) -> Self {
        Self::from_request(req)
    }
}

impl<'a> From<&'a http::request::Parts> for RequestHead<'a> {
    fn from(parts: &'a http::request::Parts) -> Self {
        Self::from_parts(parts)
    }
}
