//! Engine-facing response model.
//!
//! Writes are buffered until the response is converted for the transport;
//! body filters transform the buffered bytes at that point. File payloads
//! (`download`) honor `Range` and `If-Modified-Since` on conversion.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use cookie::Cookie;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use monoio_http::common::body::{FixedBody, HttpBody};

use super::range;

/// Transforms the buffered body right before emission.
pub trait BodyFilter {
    fn filter(&self, body: Bytes) -> Bytes;
}

impl<F> BodyFilter for F
where
    F: Fn(Bytes) -> Bytes,
{
    fn filter(&self, body: Bytes) -> Bytes {
        self(body)
    }
}

enum ResponsePayload {
    Buffered,
    File { path: PathBuf },
}

pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<Cookie<'static>>,
    buffer: BytesMut,
    filters: Vec<Box<dyn BodyFilter>>,
    payload: ResponsePayload,
    range_request: Option<String>,
    if_modified_since: Option<String>,
    head_only: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Response {
            status,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            buffer: BytesMut::new(),
            filters: Vec::new(),
            payload: ResponsePayload::Buffered,
            range_request: None,
            if_modified_since: None,
            head_only: false,
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn text(body: impl AsRef<[u8]>) -> Self {
        let mut resp = Self::ok().header("content-type", "text/plain; charset=utf-8");
        resp.write(body);
        resp
    }

    pub fn html(body: impl AsRef<[u8]>) -> Self {
        let mut resp = Self::ok().header("content-type", "text/html; charset=utf-8");
        resp.write(body);
        resp
    }

    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let mut resp = Self::ok().header("content-type", "application/json");
                resp.write(body);
                resp
            }
            Err(e) => {
                tracing::error!("response serialization failed: {e}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Set `Location` and the redirect status; 302 when unspecified.
    pub fn redirect(location: &str, status: Option<StatusCode>) -> Self {
        Self::new(status.unwrap_or(StatusCode::FOUND)).header("location", location)
    }

    /// Stream a file as an attachment. `Range`/`If-Modified-Since` handling
    /// is armed via [`honor_range`](Self::honor_range) and
    /// [`conditional`](Self::conditional).
    pub fn download(path: impl Into<PathBuf>, name: Option<&str>) -> Self {
        let path = path.into();
        let filename = name
            .map(str::to_string)
            .or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "download".to_string());
        let mut resp = Self::ok().header(
            "content-disposition",
            format!("attachment; filename=\"{filename}\""),
        );
        resp.payload = ResponsePayload::File { path };
        resp
    }

    pub fn honor_range(mut self, range_header: Option<&str>) -> Self {
        self.range_request = range_header.map(str::to_string);
        self
    }

    pub fn conditional(mut self, if_modified_since: Option<&str>) -> Self {
        self.if_modified_since = if_modified_since.map(str::to_string);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Chainable header insert; `name` must be a valid lowercase static name.
    pub fn header(mut self, name: &'static str, value: impl AsRef<str>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &'static str, value: impl AsRef<str>) {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => tracing::warn!("dropping invalid header value for {name}"),
        }
    }

    /// Buffer body bytes; nothing reaches the transport until conversion.
    pub fn write(&mut self, data: impl AsRef<[u8]>) {
        self.buffer.extend_from_slice(data.as_ref());
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.payload, ResponsePayload::Buffered)
    }

    /// Queue a cookie. Re-setting the same name replaces the pending write:
    /// the last write wins.
    pub fn set_cookie(&mut self, cookie: Cookie<'static>) {
        if let Some(existing) = self
            .cookies
            .iter_mut()
            .find(|c| c.name() == cookie.name())
        {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    pub fn add_body_filter(&mut self, filter: Box<dyn BodyFilter>) {
        self.filters.push(filter);
    }

    /// Serve headers only (HEAD fallback); `Content-Length` still reflects
    /// the body that a GET would have produced.
    pub fn strip_body(&mut self) {
        self.head_only = true;
    }

    /// Finalize into the transport representation. File payloads are read
    /// here; a vanished file degrades to a plain 404.
    pub async fn into_transport(mut self) -> http::Response<HttpBody> {
        for cookie in &self.cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                self.headers.append(header::SET_COOKIE, value);
            }
        }

        let (status, body) = match self.payload {
            ResponsePayload::Buffered => {
                let mut body = self.buffer.freeze();
                for filter in &self.filters {
                    body = filter.filter(body);
                }
                (self.status, body)
            }
            ResponsePayload::File { path } => {
                match file_payload(
                    &path,
                    self.range_request.as_deref(),
                    self.if_modified_since.as_deref(),
                    &mut self.headers,
                )
                .await
                {
                    Ok((status, body)) => (status, body),
                    Err(e) => {
                        tracing::warn!("file payload {} unavailable: {e}", path.display());
                        self.headers.remove(header::CONTENT_DISPOSITION);
                        (StatusCode::NOT_FOUND, Bytes::new())
                    }
                }
            }
        };

        let mut builder = http::Response::builder().status(status);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers;
            if status != StatusCode::NOT_MODIFIED {
                headers.insert(header::CONTENT_LENGTH, content_length_value(body.len()));
            }
        }
        let body = if self.head_only || status == StatusCode::NOT_MODIFIED {
            HttpBody::fixed_body(None)
        } else {
            HttpBody::fixed_body(Some(body))
        };
        builder
            .body(body)
            .unwrap_or_else(|_| generate_response(StatusCode::INTERNAL_SERVER_ERROR, false))
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

fn content_length_value(len: usize) -> HeaderValue {
    HeaderValue::from_str(&len.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("0"))
}

async fn file_payload(
    path: &Path,
    range_request: Option<&str>,
    if_modified_since: Option<&str>,
    headers: &mut HeaderMap,
) -> std::io::Result<(StatusCode, Bytes)> {
    let meta = std::fs::metadata(path)?;
    let total = meta.len();

    if let (Some(header_value), Ok(mtime)) = (if_modified_since, meta.modified()) {
        if range::not_modified_since(mtime, header_value) {
            return Ok((StatusCode::NOT_MODIFIED, Bytes::new()));
        }
    }

    match range_request.and_then(|h| range::parse(h, total)) {
        None => {
            let body = read_file_range(path, 0, total).await?;
            Ok((StatusCode::OK, body))
        }
        Some(Err(range::Unsatisfiable)) => {
            if let Ok(value) = HeaderValue::from_str(&range::unsatisfied_range(total)) {
                headers.insert(header::CONTENT_RANGE, value);
            }
            Ok((StatusCode::RANGE_NOT_SATISFIABLE, Bytes::new()))
        }
        Some(Ok(byte_range)) => {
            if let Ok(value) = HeaderValue::from_str(&byte_range.content_range(total)) {
                headers.insert(header::CONTENT_RANGE, value);
            }
            let body = read_file_range(path, byte_range.start, byte_range.len()).await?;
            Ok((StatusCode::PARTIAL_CONTENT, body))
        }
    }
}

async fn read_file_range(path: &Path, start: u64, len: u64) -> std::io::Result<Bytes> {
    let file = monoio::fs::File::open(path).await?;
    let mut data = BytesMut::with_capacity(len.min(64 * 1024) as usize);
    let mut offset = start;
    let mut remaining = len as usize;

    while remaining > 0 {
        let buffer = BytesMut::with_capacity(remaining.min(64 * 1024));
        let (res, buffer) = file.read_at(buffer, offset).await;
        let n = res?;
        if n == 0 {
            break;
        }
        let take = n.min(remaining);
        data.extend_from_slice(&buffer[..take]);
        remaining -= take;
        offset += take as u64;
    }
    Ok(data.freeze())
}

/// Minimal transport-level response used by the connection service when a
/// request never reaches the engine (decode failures, handler panics).
pub fn generate_response<B: FixedBody>(status: StatusCode, close: bool) -> http::Response<B> {
    let mut resp = http::Response::new(B::fixed_body(None));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    if close {
        resp.headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_last_write_wins() {
        let mut resp = Response::ok();
        resp.set_cookie(Cookie::new("session", "first"));
        resp.set_cookie(Cookie::new("theme", "dark"));
        resp.set_cookie(Cookie::new("session", "second"));
        assert_eq!(resp.cookies.len(), 2);
        assert_eq!(resp.cookies[0].value(), "second");
    }

    #[test]
    fn test_redirect_sets_location() {
        let resp = Response::redirect("/users", Some(StatusCode::MOVED_PERMANENTLY));
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            resp.headers().get("location").unwrap().to_str().unwrap(),
            "/users"
        );
    }

    #[test]
    fn test_body_filter_applies_on_finalize() {
        let mut resp = Response::text("hello");
        resp.add_body_filter(Box::new(|body: Bytes| {
            let mut upper = body.to_vec();
            upper.make_ascii_uppercase();
            Bytes::from(upper)
        }));
        // the buffer itself stays untouched until conversion
        assert_eq!(resp.body_bytes(), b"hello");
    }
}
