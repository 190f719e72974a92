//! Response handling module: the buffered outgoing side of an exchange.
//!
//! The whole body is accumulated in memory before anything is sent, so middleware that
//! runs after the handler (compression, error pages) can inspect and replace it.
//! [`Response::end`] applies the finalization rules and pushes status, headers and body
//! through the response [`Sink`].

use crate::cookie::Cookie;
use crate::error::BoxError;
use crate::sink::Sink;
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, SET_COOKIE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::Serialize;
use std::error::Error;
use std::io;
use std::io::Write;
use std::mem;
use tracing::{debug, warn};

const TEXT_PLAIN_UTF_8: &str = "text/plain; charset=utf-8";
const TEXT_HTML_UTF_8: &str = "text/html; charset=utf-8";
const APPLICATION_JSON_UTF_8: &str = "application/json; charset=utf-8";

#[derive(Debug, Default)]
pub struct Response {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    error: Option<BoxError>,
    sink: Option<Box<dyn Sink>>,
}

impl Response {
    /// A response that writes through `sink`.
    pub fn with_sink(sink: Box<dyn Sink>) -> Self {
        Self { sink: Some(sink), ..Self::default() }
    }

    /// The explicitly set status; `None` lets [`Response::end`] pick one.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// Replaces the buffered body.
    pub fn set_body(&mut self, body: impl AsRef<[u8]>) {
        self.body.clear();
        self.body.extend_from_slice(body.as_ref());
    }

    pub fn error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.error.as_deref()
    }

    /// Records a terminal error; it becomes the body when the response is sent.
    pub fn set_error(&mut self, status: StatusCode, error: impl Into<BoxError>) {
        self.status = Some(status);
        self.error = Some(error.into());
    }

    /// Takes the terminal error so that it is not reported a second time.
    pub fn clear_error(&mut self) -> Option<BoxError> {
        self.error.take()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn install_sink(&mut self, sink: Box<dyn Sink>) {
        if let Some(stale) = self.sink.replace(sink) {
            release(stale);
        }
    }

    /// Replaces the sink with a decorator built around it. Returns false if there is no sink.
    pub fn wrap_sink<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(Box<dyn Sink>) -> Box<dyn Sink>,
    {
        match self.sink.take() {
            Some(sink) => {
                self.sink = Some(f(sink));
                true
            }
            None => false,
        }
    }

    pub fn set_cookie(&mut self, cookie: &Cookie) {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                self.headers.append(SET_COOKIE, value);
            }
            Err(e) => warn!(cookie = cookie.name(), cause = %e, "drop invalid cookie"),
        }
    }

    // ---------------------------------------------------------------------------------------
    // body helpers

    pub fn plain(&mut self, text: impl AsRef<str>) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF_8));
        self.set_body(text.as_ref());
    }

    pub fn html(&mut self, body: impl AsRef<[u8]>) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_HTML_UTF_8));
        self.set_body(body);
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.jsonp("", value)
    }

    /// Pretty printed json, wrapped as `padding(json);` when `padding` is not empty.
    pub fn jsonp<T: Serialize + ?Sized>(&mut self, padding: &str, value: &T) -> Result<(), serde_json::Error> {
        let json = serde_json::to_string_pretty(value)?;
        if padding.is_empty() {
            self.set_body(json);
        } else {
            self.set_body(format!("{padding}({json});"));
        }
        self.headers.remove(CONTENT_LENGTH);
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON_UTF_8));
        Ok(())
    }

    /// Redirects with 302 to `to`, resolved against the current path `from`.
    pub fn redirect(&mut self, from: &str, to: &str) {
        let location = resolve_location(from, to);
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                self.status = Some(StatusCode::FOUND);
                self.headers.insert(LOCATION, value);
                self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF_8));
                self.set_body(format!("Redirecting to {location}."));
            }
            Err(e) => {
                warn!(location, cause = %e, "invalid redirect location");
                self.set_error(StatusCode::INTERNAL_SERVER_ERROR, format!("invalid redirect location: {e}"));
            }
        }
    }

    // ---------------------------------------------------------------------------------------
    // lifecycle

    /// Finalizes the response and writes it through the sink.
    ///
    /// With an error set only the error is written. Otherwise an unset status defaults by
    /// method, an empty body becomes a 204 without content headers, and a missing content
    /// type is sniffed from the body. The sink is finished exactly once, whatever happens.
    pub(crate) fn end(&mut self, method: &Method) -> io::Result<http::Response<Bytes>> {
        let mut sink = self.sink.take().ok_or_else(|| io::Error::other("response has no sink"))?;

        let mut no_content = false;
        let status = match self.error.take() {
            Some(error) => {
                let status = self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                self.headers.remove(CONTENT_LENGTH);
                self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF_8));
                self.headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
                self.set_body(format!("{error}\n"));
                status
            }
            None => {
                let mut status = self.status.unwrap_or_else(|| default_status(method));
                if self.body.is_empty() {
                    status = StatusCode::NO_CONTENT;
                    no_content = true;
                    self.headers.remove(CONTENT_TYPE);
                    self.headers.remove(CONTENT_LENGTH);
                    self.headers.remove(CONTENT_ENCODING);
                } else if !self.headers.contains_key(CONTENT_TYPE) {
                    self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(detect_content_type(&self.body)));
                }
                status
            }
        };

        sink.write_all(&self.body)?;
        let bytes = sink.finish()?;
        // a wrapped sink may still emit framing for an empty body
        let bytes = if no_content { Bytes::new() } else { bytes };

        let mut response = http::Response::new(bytes);
        *response.status_mut() = status;
        *response.headers_mut() = mem::take(&mut self.headers);
        self.status = Some(status);
        Ok(response)
    }

    /// Clears every per-request field, closing a sink that was never finished.
    pub(crate) fn reset(&mut self) {
        self.status = None;
        self.headers.clear();
        self.body.clear();
        self.error = None;
        if let Some(sink) = self.sink.take() {
            debug!("sink still open at reset");
            release(sink);
        }
    }

    pub(crate) fn is_pristine(&self) -> bool {
        self.status.is_none() && self.headers.is_empty() && self.body.is_empty() && self.error.is_none() && self.sink.is_none()
    }
}

fn release(sink: Box<dyn Sink>) {
    if let Err(e) = sink.finish() {
        warn!(cause = %e, "failed to finish response sink");
    }
}

fn default_status(method: &Method) -> StatusCode {
    match *method {
        Method::POST | Method::PUT => StatusCode::CREATED,
        Method::DELETE => StatusCode::NO_CONTENT,
        _ => StatusCode::OK,
    }
}

// ---------------------------------------------------------------------------------------
// redirect

fn resolve_location(from: &str, to: &str) -> String {
    if has_scheme(to) {
        return to.to_string();
    }

    let from = if from.is_empty() { "/" } else { from };
    let mut target = if to.starts_with('/') {
        to.to_string()
    } else {
        // make relative path absolute
        let dir = from.rfind('/').map_or("", |i| &from[..=i]);
        format!("{dir}{to}")
    };

    let query = match target.find('?') {
        Some(i) => target.split_off(i),
        None => String::new(),
    };

    // clean up but preserve trailing slash
    let trailing = target.ends_with('/');
    let mut cleaned = clean_path(&target);
    if trailing && !cleaned.ends_with('/') {
        cleaned.push('/');
    }
    cleaned.push_str(&query);
    cleaned
}

/// True for `scheme:...` per RFC 3986.
fn has_scheme(url: &str) -> bool {
    let Some(colon) = url.find(':') else {
        return false;
    };
    let scheme = &url[..colon];
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Lexically normalizes a slash separated path: removes `.` and empty segments and resolves
/// `..` against the preceding segment.
pub(crate) fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." => {
                    segments.pop();
                }
                _ if rooted => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

// ---------------------------------------------------------------------------------------
// content sniffing

const SNIFF_LEN: usize = 512;

const HTML_PREFIXES: [&[u8]; 17] = [
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

const MAGIC: [(&[u8], &str); 8] = [
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"\xEF\xBB\xBF", TEXT_PLAIN_UTF_8),
];

/// Guesses a content type from the first bytes of a body.
pub(crate) fn detect_content_type(body: &[u8]) -> &'static str {
    let data = &body[..body.len().min(SNIFF_LEN)];
    let trimmed = match data.iter().position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')) {
        Some(start) => &data[start..],
        None => &[],
    };

    for prefix in HTML_PREFIXES {
        if starts_with_tag(trimmed, prefix) {
            return TEXT_HTML_UTF_8;
        }
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }
    for (magic, content_type) in MAGIC {
        if data.starts_with(magic) {
            return content_type;
        }
    }

    let binary = data.iter().any(|b| matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F));
    if binary { "application/octet-stream" } else { TEXT_PLAIN_UTF_8 }
}

/// Case insensitive tag match that must be followed by a space or `>`.
fn starts_with_tag(data: &[u8], tag: &[u8]) -> bool {
    data.len() > tag.len()
        && data[..tag.len()].eq_ignore_ascii_case(tag)
        && matches!(data[tag.len()], b' ' | b'>')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{EncodedSink, Encoding};
    use crate::sink::BufferSink;

    fn response() -> Response {
        Response::with_sink(Box::new(BufferSink::new()))
    }

    #[test]
    fn default_status_by_method() {
        for (method, status) in [
            (Method::GET, StatusCode::OK),
            (Method::POST, StatusCode::CREATED),
            (Method::PUT, StatusCode::CREATED),
            (Method::PATCH, StatusCode::OK),
        ] {
            let mut res = response();
            res.plain("ok");
            assert_eq!(res.end(&method).unwrap().status(), status);
        }
    }

    #[test]
    fn empty_body_is_no_content() {
        let mut res = response();
        res.set_status(StatusCode::OK);
        res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        res.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let sent = res.end(&Method::GET).unwrap();
        assert_eq!(sent.status(), StatusCode::NO_CONTENT);
        assert!(sent.headers().get(CONTENT_TYPE).is_none());
        assert!(sent.headers().get(CONTENT_ENCODING).is_none());
        assert!(sent.body().is_empty());
    }

    #[test]
    fn emptied_compressed_body_sends_no_framing() {
        let mut res = response();
        res.plain("x".repeat(500));
        assert!(res.wrap_sink(|inner| Box::new(EncodedSink::new(Encoding::Gzip, inner).unwrap())));
        res.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        res.set_body("");

        let sent = res.end(&Method::GET).unwrap();
        assert_eq!(sent.status(), StatusCode::NO_CONTENT);
        assert!(sent.headers().get(CONTENT_ENCODING).is_none());
        assert!(sent.body().is_empty());
        assert!(!res.has_sink());
    }

    #[test]
    fn error_replaces_everything() {
        let mut res = response();
        res.html("<p>never sent</p>");
        res.set_error(StatusCode::FORBIDDEN, "csrf: token mismatch");

        let sent = res.end(&Method::POST).unwrap();
        assert_eq!(sent.status(), StatusCode::FORBIDDEN);
        assert_eq!(sent.body(), &Bytes::from_static(b"csrf: token mismatch\n"));
        assert_eq!(sent.headers()[CONTENT_TYPE], TEXT_PLAIN_UTF_8);
        assert_eq!(sent.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[test]
    fn content_type_is_sniffed() {
        let mut res = response();
        res.set_body("  <!doctype html><html></html>");
        let sent = res.end(&Method::GET).unwrap();
        assert_eq!(sent.headers()[CONTENT_TYPE], TEXT_HTML_UTF_8);

        assert_eq!(detect_content_type(b"hello"), TEXT_PLAIN_UTF_8);
        assert_eq!(detect_content_type(b"<?xml version=\"1.0\"?>"), "text/xml; charset=utf-8");
        assert_eq!(detect_content_type(b"\x89PNG\x0D\x0A\x1A\x0A...."), "image/png");
        assert_eq!(detect_content_type(b"\x00\x01\x02"), "application/octet-stream");
        assert_eq!(detect_content_type(b"<bogus>"), TEXT_PLAIN_UTF_8);
    }

    #[test]
    fn json_and_jsonp() {
        let mut res = response();
        res.jsonp("cb", &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(res.body(), b"cb({\n  \"a\": 1\n});");
        assert_eq!(res.headers()[CONTENT_TYPE], APPLICATION_JSON_UTF_8);

        res.json(&vec![1, 2]).unwrap();
        assert_eq!(res.body(), b"[\n  1,\n  2\n]");
    }

    #[test]
    fn redirect_normalizes_targets() {
        assert_eq!(resolve_location("/a/b/c", "d"), "/a/b/d");
        assert_eq!(resolve_location("/a/b/c", "../d/"), "/a/d/");
        assert_eq!(resolve_location("/a/b/c", "/x/./y/../z?q=1/../2"), "/x/z?q=1/../2");
        assert_eq!(resolve_location("", "login"), "/login");
        assert_eq!(resolve_location("/a/", "/../../etc/passwd"), "/etc/passwd");
        assert_eq!(resolve_location("/a", "https://example.com/x/../y"), "https://example.com/x/../y");

        let mut res = response();
        res.redirect("/users/1", "edit");
        assert_eq!(res.status(), Some(StatusCode::FOUND));
        assert_eq!(res.headers()[LOCATION], "/users/edit");
        assert_eq!(res.body(), b"Redirecting to /users/edit.");
    }

    #[test]
    fn clean_path_cases() {
        assert_eq!(clean_path(""), ".");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("a/../.."), "..");
        assert_eq!(clean_path("//a//b/./c/.."), "/a/b");
    }

    #[test]
    fn cookies_are_appended() {
        let mut res = response();
        res.set_cookie(&Cookie::new("a", "1"));
        res.set_cookie(&Cookie::new("b", "2"));
        assert_eq!(res.headers().get_all(SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn reset_clears_all() {
        let mut res = response();
        res.plain("x");
        res.set_error(StatusCode::BAD_REQUEST, "bad");
        assert!(!res.is_pristine());

        res.reset();
        assert!(res.is_pristine());
        assert!(res.end(&Method::GET).is_err());
    }
}
