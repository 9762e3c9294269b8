//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HeaderName, REFERER, USER_AGENT};
use http::{HeaderMap, Method, Uri, Version};

use crate::headers;

/// An incoming HTTP request with its body already collected.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(req: http::Request<Bytes>, remote_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            remote_addr,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup (first value).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every comma-separated element of a list header such as `Accept-Encoding`.
    pub fn header_values(&self, name: &HeaderName) -> Vec<String> {
        headers::list_values(&self.headers, name)
    }

    pub fn referer(&self) -> Option<&str> {
        headers::get_str(&self.headers, &REFERER)
    }

    pub fn user_agent(&self) -> Option<&str> {
        headers::get_str(&self.headers, &USER_AGENT)
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::ACCEPT_ENCODING;

    #[test]
    fn reads_parts_from_http_request() {
        let req = http::Request::post("/users?x=1")
            .header("User-Agent", "curl/8")
            .header(ACCEPT_ENCODING, "gzip, br")
            .body(Bytes::from_static(b"{}"))
            .unwrap();

        let req = Request::new(req, "127.0.0.1:9000".parse().ok());

        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.path(), "/users");
        assert_eq!(req.user_agent(), Some("curl/8"));
        assert_eq!(req.header("user-agent"), Some("curl/8"));
        assert_eq!(req.header_values(&ACCEPT_ENCODING), ["gzip", "br"]);
        assert_eq!(req.body().as_ref(), b"{}");
        assert_eq!(req.referer(), None);
        assert!(req.remote_addr().is_some());
    }
}
