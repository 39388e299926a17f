//! Incoming HTTP request type.

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::BodyExt;
use url::form_urlencoded;

use crate::method::Method;

/// An incoming HTTP request with its body fully read.
///
/// Cheap to move; actions receive it by value.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) peer: Option<SocketAddr>,
}

impl Request {
    /// Builds a request with no headers and an empty body, for calling
    /// handlers and actions directly. A `?` in `target` starts the query.
    ///
    /// ```rust
    /// use baton::{Method, Request};
    ///
    /// let req = Request::new(Method::Get, "/public/index?terrain=ocean");
    /// assert_eq!(req.path(), "/public/index");
    /// assert_eq!(req.query("terrain").as_deref(), Some("ocean"));
    /// ```
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_owned(),
            query,
            headers: Vec::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            peer: None,
        }
    }

    /// Reads the whole body of a hyper request. Fails if the client goes away
    /// mid-body; the caller answers with `400`.
    pub(crate) async fn from_hyper(
        req: hyper::Request<hyper::body::Incoming>,
        method: Method,
        peer: SocketAddr,
    ) -> Result<Self, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();

        let headers = parts.headers.iter()
            .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
            .collect();

        Ok(Self {
            method,
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().map(str::to_owned),
            headers,
            body,
            params: HashMap::new(),
            peer: Some(peer),
        })
    }

    pub(crate) fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn peer(&self) -> Option<SocketAddr> { self.peer }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a named path parameter.
    ///
    /// For the route `/{controller}/{action}`, `req.param("controller")` on
    /// `/public/index` returns `Some("public")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// First value of a query-string key, form-decoded: `+` is a space and
    /// `%XX` escapes are resolved in both keys and values.
    pub fn query(&self, key: &str) -> Option<Cow<'_, str>> {
        form_urlencoded::parse(self.query.as_deref()?.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}
