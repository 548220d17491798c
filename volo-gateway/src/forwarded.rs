//! `x-forwarded-host` and `x-forwarded-for` metadata.
//!
//! The backend is not another HTTP hop, but it still learns about the client the way a
//! proxied HTTP service would.

use crate::{metadata::Metadata, request::RequestHead};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SplitHostPortError {
    #[error("missing port in address")]
    MissingPort,
    #[error("too many colons in address")]
    TooManyColons,
    #[error("missing ']' in address")]
    MissingBracket,
    #[error("unexpected '[' or ']' in address")]
    UnexpectedBracket,
}

/// Splits `host:port`, `[host]:port` or `[host%zone]:port` into host and port.
///
/// ```rust
/// use volo_gateway::forwarded::split_host_port;
///
/// assert_eq!(split_host_port("192.0.2.200:12345"), Ok(("192.0.2.200", "12345")));
/// assert_eq!(split_host_port("[2001:db8::1]:80"), Ok(("2001:db8::1", "80")));
/// ```
pub fn split_host_port(addr: &str) -> Result<(&str, &str), SplitHostPortError> {
    let Some(colon) = addr.rfind(':') else {
        return Err(SplitHostPortError::MissingPort);
    };
    let port = &addr[colon + 1..];

    let host = if let Some(rest) = addr.strip_prefix('[') {
        let Some(end) = rest.find(']') else {
            return Err(SplitHostPortError::MissingBracket);
        };
        // `]` must be directly followed by the last colon
        match (end + 1).cmp(&(colon - 1)) {
            std::cmp::Ordering::Equal => {}
            std::cmp::Ordering::Greater => return Err(SplitHostPortError::MissingPort),
            std::cmp::Ordering::Less => {
                return Err(if rest.as_bytes()[end + 1] == b':' {
                    SplitHostPortError::TooManyColons
                } else {
                    SplitHostPortError::MissingPort
                });
            }
        }
        &rest[..end]
    } else {
        let host = &addr[..colon];
        if host.contains(':') {
            return Err(SplitHostPortError::TooManyColons);
        }
        host
    };

    if host.contains(['[', ']']) || port.contains(['[', ']']) {
        return Err(SplitHostPortError::UnexpectedBracket);
    }
    Ok((host, port))
}

/// Inputs of the forwarded chain, taken from the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedChain<'a> {
    /// The host the request was addressed to.
    pub host: Option<&'a str>,
    /// Value of an existing `X-Forwarded-Host` header.
    pub forwarded_host: Option<&'a str>,
    /// Value of an existing `X-Forwarded-For` header.
    pub forwarded_for: Option<&'a str>,
    /// The peer address, `host:port`.
    pub remote_addr: Option<&'a str>,
}

impl<'a> ForwardedChain<'a> {
    pub fn from_request(req: &RequestHead<'a>) -> Self {
        Self {
            host: req.host(),
            forwarded_host: req.header(X_FORWARDED_HOST),
            forwarded_for: req.header(X_FORWARDED_FOR),
            remote_addr: req.remote_addr(),
        }
    }

    /// The `x-forwarded-host` value: an existing `X-Forwarded-Host` wins over the request
    /// host.
    pub fn forwarded_host_value(&self) -> Option<&'a str> {
        self.forwarded_host
            .filter(|host| !host.is_empty())
            .or(self.host.filter(|host| !host.is_empty()))
    }

    /// The `x-forwarded-for` value: the peer ip appended to the right of an existing chain,
    /// so the original client stays leftmost.
    ///
    /// `None` when there is no peer address or it can not be split.
    pub fn forwarded_for_value(&self) -> Option<String> {
        let addr = self.remote_addr.filter(|addr| !addr.is_empty())?;
        let remote_ip = match split_host_port(addr) {
            Ok((ip, _)) => ip,
            Err(e) => {
                tracing::debug!("[VOLO] invalid remote addr: {addr}, error: {e}");
                return None;
            }
        };
        Some(match self.forwarded_for.filter(|fwd| !fwd.is_empty()) {
            Some(fwd) => format!("{fwd}, {remote_ip}"),
            None => remote_ip.to_owned(),
        })
    }

    /// Appends `x-forwarded-host` and `x-forwarded-for` to `md` when they have a value.
    pub fn append_to(&self, md: &mut Metadata) {
        if let Some(host) = self.forwarded_host_value() {
            md.append(X_FORWARDED_HOST, host);
        }
        if let Some(chain) = self.forwarded_for_value() {
            md.append(X_FORWARDED_FOR, chain);
        }
    }
}
