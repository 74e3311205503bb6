//! Small header extraction helpers shared by middleware and handlers.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use std::net::SocketAddr;

/// Extract the client IP: proxy headers first, then the socket peer address.
///
/// `x-forwarded-for` may carry a chain; the first (client-most) entry wins.
pub fn client_ip<B>(request: &Request<B>) -> Option<String> {
    let from_headers = client_ip_from_headers(request.headers());
    if from_headers.is_some() {
        return from_headers;
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Header-only variant for handlers that do not hold the full request.
#[must_use]
pub fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }

    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Device identifier mobile clients send with every request.
#[must_use]
pub fn device_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-device-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[must_use]
pub fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    fn request_with_headers(pairs: &[(&str, &str)]) -> Request<Body> {
        let mut request = Request::new(Body::empty());
        for (name, value) in pairs {
            request.headers_mut().insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        request
    }

    #[test]
    fn forwarded_for_first_entry_wins() {
        let request = request_with_headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.1"),
        ]);
        assert_eq!(client_ip(&request).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn real_ip_fallback() {
        let request = request_with_headers(&[("x-real-ip", "198.51.100.1")]);
        assert_eq!(client_ip(&request).as_deref(), Some("198.51.100.1"));
    }

    #[test]
    fn connect_info_fallback() {
        let mut request = request_with_headers(&[]);
        request
            .extensions_mut()
            .insert(ConnectInfo("192.0.2.4:5000".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_ip(&request).as_deref(), Some("192.0.2.4"));
    }

    #[test]
    fn no_ip_sources() {
        let request = request_with_headers(&[]);
        assert_eq!(client_ip(&request), None);
    }

    #[test]
    fn bearer_token_parsing() {
        let request = request_with_headers(&[("authorization", "Bearer abc.def.ghi")]);
        assert_eq!(bearer_token(request.headers()), Some("abc.def.ghi"));

        let request = request_with_headers(&[("authorization", "Basic dXNlcg==")]);
        assert_eq!(bearer_token(request.headers()), None);

        let request = request_with_headers(&[("authorization", "Bearer ")]);
        assert_eq!(bearer_token(request.headers()), None);
    }

    #[test]
    fn device_id_trimmed() {
        let request = request_with_headers(&[("x-device-id", "  phone-1  ")]);
        assert_eq!(device_id(request.headers()), Some("phone-1"));

        let request = request_with_headers(&[("x-device-id", "   ")]);
        assert_eq!(device_id(request.headers()), None);
    }
}
