//! Engine-facing request model.
//!
//! Wraps the transport request parts with the cached [`Body`], the peer
//! address and the resolved client IP. The engine resolves the client IP
//! once per request; `override_client_ip` bypasses the resolution ladder.

use std::{cell::Cell, net::IpAddr};

use bytes::Bytes;
use cookie::Cookie;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};

use super::body::{Body, BodyError};
use crate::{listener::AcceptedAddr, AnyResult};

pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Body,
    peer_addr: Option<AcceptedAddr>,
    client_ip: Cell<Option<IpAddr>>,
    ip_overridden: Cell<bool>,
}

impl Request {
    pub fn new(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        body: Body,
        peer_addr: Option<AcceptedAddr>,
    ) -> Self {
        Request {
            method,
            uri,
            version,
            headers,
            body,
            peer_addr,
            client_ip: Cell::new(None),
            ip_overridden: Cell::new(false),
        }
    }

    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First header value as text; non-UTF8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header(header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        self.body.bytes().await
    }

    pub fn body_consumed(&self) -> bool {
        self.body.consumed()
    }

    /// All cookies from every `Cookie` header, in header order.
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        let mut cookies = Vec::new();
        for value in self.headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for piece in raw.split(';') {
                if let Ok(cookie) = Cookie::parse(piece.trim().to_string()) {
                    cookies.push(cookie);
                }
            }
        }
        cookies
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie<'static>> {
        self.cookies().into_iter().find(|c| c.name() == name)
    }

    pub fn peer_addr(&self) -> Option<&AcceptedAddr> {
        self.peer_addr.as_ref()
    }

    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer_addr.as_ref().and_then(AcceptedAddr::ip)
    }

    /// The resolved client IP. Before the engine ran the resolution ladder
    /// this falls back to the transport peer.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip.get().or_else(|| self.peer_ip())
    }

    /// Set by the engine after the trusted-proxy ladder; keeps an explicit
    /// override untouched.
    pub fn set_client_ip(&self, ip: IpAddr) {
        if !self.ip_overridden.get() {
            self.client_ip.set(Some(ip));
        }
    }

    /// Pin the client IP, bypassing resolution entirely.
    pub fn override_client_ip(&self, ip: IpAddr) {
        self.client_ip.set(Some(ip));
        self.ip_overridden.set(true);
    }

    pub fn client_ip_overridden(&self) -> bool {
        self.ip_overridden.get()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Builder used by the transport adapter, tests and tools.
#[derive(Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    version: Option<Version>,
    headers: Vec<(String, String)>,
    body: Option<Body>,
    peer_addr: Option<AcceptedAddr>,
}

impl RequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn body_bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.body(Body::fixed(bytes.into()))
    }

    pub fn peer(mut self, addr: std::net::SocketAddr) -> Self {
        self.peer_addr = Some(AcceptedAddr::from(addr));
        self
    }

    pub fn build(self) -> AnyResult<Request> {
        let uri: Uri = self.uri.unwrap_or_else(|| "/".to_string()).parse()?;
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }
        Ok(Request::new(
            self.method.unwrap_or(Method::GET),
            uri,
            self.version.unwrap_or(Version::HTTP_11),
            headers,
            self.body.unwrap_or_default(),
            self.peer_addr,
        ))
    }
}
