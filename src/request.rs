//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::log::LogHandle;
use crate::method::Method;

/// An incoming HTTP request, parsed from the raw TCP stream.
///
/// Carries the request's [`LogHandle`] alongside the usual parts: fields a
/// handler inserts through [`Request::log`] land on the same structured line
/// the logging middleware emits when the request finishes.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) content_length: i64,
    pub(crate) log: LogHandle,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: String,
        query: Option<String>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        remote_addr: SocketAddr,
        content_length: i64,
    ) -> Self {
        Self {
            method,
            path,
            query,
            headers,
            body,
            params: HashMap::new(),
            remote_addr,
            content_length,
            log: LogHandle::new(),
        }
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// The request target as received: path plus `?query` when one was sent.
    pub fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Declared body length. `-1` when the request carries a body of unknown
    /// length (chunked transfer encoding), `0` when there is no body.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// The structured log line for this request. Cloning the handle is cheap
    /// and every clone writes to the same line.
    pub fn log(&self) -> &LogHandle {
        &self.log
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
