//! Decoding of the `grpc-timeout` header.

use std::{num::ParseIntError, time::Duration};

const SECONDS_HOUR: u64 = 60 * 60;
const SECONDS_MINUTE: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("timeout string is too short: {0:?}")]
    TooShort(String),
    #[error("timeout unit is not recognized: {0:?}")]
    UnknownUnit(String),
    #[error("invalid timeout value {value:?}: {source}")]
    InvalidValue {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// A decoded `grpc-timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcTimeout {
    /// A negative count: the deadline has already passed.
    Expired,
    /// A non-negative count. Zero means the call has no deadline.
    After(Duration),
}

/// Decodes a `grpc-timeout` value such as `"100m"`.
///
/// The value is a signed decimal count followed by one unit character: `H` hours, `M`
/// minutes, `S` seconds, `m` milliseconds, `u` microseconds or `n` nanoseconds.
///
/// Counts too large for a [`Duration`] saturate.
///
/// ```rust
/// use std::time::Duration;
///
/// use volo_gateway::timeout::{decode_timeout, GrpcTimeout};
///
/// assert_eq!(
///     decode_timeout("1009m").unwrap(),
///     GrpcTimeout::After(Duration::from_millis(1009))
/// );
/// assert_eq!(decode_timeout("-1S").unwrap(), GrpcTimeout::Expired);
/// assert!(decode_timeout("5").is_err());
/// ```
pub fn decode_timeout(s: &str) -> Result<GrpcTimeout, TimeoutError> {
    let size = s.len();
    if size < 2 {
        return Err(TimeoutError::TooShort(s.to_owned()));
    }

    // the unit is a single ascii byte, so `size - 1` is a char boundary once it matched
    let to_duration: fn(u64) -> Duration = match s.as_bytes()[size - 1] {
        b'H' => |t| Duration::from_secs(t.saturating_mul(SECONDS_HOUR)),
        b'M' => |t| Duration::from_secs(t.saturating_mul(SECONDS_MINUTE)),
        b'S' => Duration::from_secs,
        b'm' => Duration::from_millis,
        b'u' => Duration::from_micros,
        b'n' => Duration::from_nanos,
        _ => return Err(TimeoutError::UnknownUnit(s.to_owned())),
    };

    let count = s[..size - 1]
        .parse::<i64>()
        .map_err(|source| TimeoutError::InvalidValue {
            value: s.to_owned(),
            source,
        })?;

    Ok(match u64::try_from(count) {
        Ok(count) => GrpcTimeout::After(to_duration(count)),
        Err(_) => GrpcTimeout::Expired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units() {
        for (timeout, want) in [
            ("17H", Duration::from_secs(17 * 60 * 60)),
            ("19M", Duration::from_secs(19 * 60)),
            ("23S", Duration::from_secs(23)),
            ("1009m", Duration::from_millis(1009)),
            ("1000003u", Duration::from_micros(1000003)),
            ("100000007n", Duration::from_nanos(100000007)),
        ] {
            assert_eq!(
                decode_timeout(timeout).unwrap(),
                GrpcTimeout::After(want),
                "timeout = {timeout:?}"
            );
        }
    }

    #[test]
    fn explicit_sign() {
        assert_eq!(
            decode_timeout("+3S").unwrap(),
            GrpcTimeout::After(Duration::from_secs(3))
        );
        assert_eq!(decode_timeout("-3S").unwrap(), GrpcTimeout::Expired);
        assert_eq!(decode_timeout("-0S").unwrap(), GrpcTimeout::After(Duration::ZERO));
    }

    #[test]
    fn zero_is_not_expired() {
        for timeout in ["0S", "0m", "0n", "00H"] {
            assert_eq!(
                decode_timeout(timeout).unwrap(),
                GrpcTimeout::After(Duration::ZERO),
                "timeout = {timeout:?}"
            );
        }
    }

    #[test]
    fn too_short() {
        assert_eq!(decode_timeout(""), Err(TimeoutError::TooShort(String::new())));
        assert_eq!(decode_timeout("S"), Err(TimeoutError::TooShort("S".to_owned())));
    }

    #[test]
    fn unknown_unit() {
        assert_eq!(
            decode_timeout("82f"),
            Err(TimeoutError::UnknownUnit("82f".to_owned()))
        );
        assert!(matches!(
            decode_timeout("1µ"),
            Err(TimeoutError::UnknownUnit(_))
        ));
    }

    #[test]
    fn invalid_digits() {
        assert!(matches!(
            decode_timeout("abcH"),
            Err(TimeoutError::InvalidValue { .. })
        ));
        assert!(matches!(
            decode_timeout("1.5S"),
            Err(TimeoutError::InvalidValue { .. })
        ));
        assert!(matches!(
            decode_timeout("99999999999999999999n"),
            Err(TimeoutError::InvalidValue { .. })
        ));
    }

    #[test]
    fn saturates() {
        assert_eq!(
            decode_timeout(&format!("{}H", i64::MAX)).unwrap(),
            GrpcTimeout::After(Duration::from_secs(u64::MAX))
        );
    }
}
