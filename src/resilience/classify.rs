//! Error classification (§4.4.4): a pure function from an observed failure
//! to one of the eleven `ErrorKind`s, independent of any specific HTTP
//! client's error type so it can be unit tested without a live network.

use crate::errors::ErrorKind;

/// Non-HTTP-status signals a fetcher can observe. HTTP status codes are
/// classified directly; everything else funnels through this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    Timeout,
    ConnectionRefused,
    ProxyFailure,
    ParseFailure,
    Unknown,
}

/// Classifies a failure into one of the eleven kinds in §4.4.4. `status`
/// takes priority when present (it is the more specific signal); `signal`
/// is consulted when there was no HTTP response at all.
pub fn classify(status: Option<u16>, signal: Option<FailureSignal>) -> ErrorKind {
    if let Some(status) = status {
        return classify_status(status);
    }
    match signal.unwrap_or(FailureSignal::Unknown) {
        FailureSignal::Timeout => ErrorKind::NetworkTimeout,
        FailureSignal::ConnectionRefused => ErrorKind::NetworkConnection,
        FailureSignal::ProxyFailure => ErrorKind::Proxy,
        FailureSignal::ParseFailure => ErrorKind::Parse,
        FailureSignal::Unknown => ErrorKind::Unknown,
    }
}

fn classify_status(status: u16) -> ErrorKind {
    match status {
        404 => ErrorKind::NotFound,
        429 => ErrorKind::HttpRateLimit,
        403 | 451 => ErrorKind::HttpBlocked,
        503 => ErrorKind::ServiceUnavailable,
        400..=499 => ErrorKind::HttpClientError,
        500..=599 => ErrorKind::HttpServerError,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_404_is_not_found() {
        assert_eq!(classify(Some(404), None), ErrorKind::NotFound);
    }

    #[test]
    fn status_429_is_rate_limit() {
        assert_eq!(classify(Some(429), None), ErrorKind::HttpRateLimit);
    }

    #[test]
    fn status_403_is_blocked() {
        assert_eq!(classify(Some(403), None), ErrorKind::HttpBlocked);
    }

    #[test]
    fn status_5xx_is_server_error_except_503() {
        assert_eq!(classify(Some(500), None), ErrorKind::HttpServerError);
        assert_eq!(classify(Some(503), None), ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn timeout_signal_without_status() {
        assert_eq!(classify(None, Some(FailureSignal::Timeout)), ErrorKind::NetworkTimeout);
    }

    #[test]
    fn no_signal_and_no_status_is_unknown() {
        assert_eq!(classify(None, None), ErrorKind::Unknown);
    }
}
