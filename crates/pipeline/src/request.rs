//! Request handling module that gives middleware access to the inbound request.
//!
//! [`Request`] normalizes an inbound `http::Request<Bytes>`:
//! - the client ip, taken from proxy headers
//! - form data, parsed from the query string and urlencoded bodies
//! - path parameters, filled in by whatever routes the request
//!
//! It lives inside a pooled [`Context`](crate::Context), so it is cleared in place rather
//! than rebuilt between requests.

use crate::cookie;
use crate::error::FormError;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    ip: String,
    form: Vec<(String, String)>,
    params: HashMap<String, String>,
    pjax: bool,
}

impl Request {
    /// Takes over an inbound request, reusing this wrapper's allocations.
    pub(crate) fn install(&mut self, request: http::Request<Bytes>) {
        let (parts, body) = request.into_parts();
        self.method = parts.method;
        self.uri = parts.uri;
        self.version = parts.version;
        self.headers = parts.headers;
        self.body = body;

        self.ip.clear();
        self.ip.push_str(read_ip(&self.headers));

        self.form.clear();
        parse_form(&self.headers, &self.body, self.uri.query(), &mut self.form);
    }

    /// Clears every per-request field.
    pub(crate) fn clear(&mut self) {
        self.method = Method::GET;
        self.uri = Uri::default();
        self.version = Version::default();
        self.headers.clear();
        self.body = Bytes::new();
        self.ip.clear();
        self.form.clear();
        self.params.clear();
        self.pjax = false;
    }

    pub(crate) fn is_pristine(&self) -> bool {
        self.method == Method::GET
            && self.uri == Uri::default()
            && self.headers.is_empty()
            && self.body.is_empty()
            && self.ip.is_empty()
            && self.form.is_empty()
            && self.params.is_empty()
            && !self.pjax
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the URI of the request
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the HTTP version of the request
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the HTTP headers of the request
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as text; missing or non visible-ascii values read as `None`.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The client ip as reported by a fronting proxy, empty when unknown.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        cookie::find(&self.headers, name)
    }

    pub fn is_pjax(&self) -> bool {
        self.pjax
    }

    pub fn set_pjax(&mut self, pjax: bool) {
        self.pjax = pjax;
    }

    // ---------------------------------------------------------------------------------------
    // url

    /// Full url for `path` on the host this request was sent to.
    pub fn url_for(&self, path: &str) -> String {
        let scheme = match self.header("x-forwarded-proto") {
            Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
            _ => match self.uri.scheme_str() {
                Some("https") => "https",
                _ => "http",
            },
        };
        let host = self
            .header(http::header::HOST)
            .or_else(|| self.uri.authority().map(http::uri::Authority::as_str))
            .unwrap_or_default();
        format!("{scheme}://{host}{path}")
    }

    /// Full url of this request.
    pub fn current_url(&self) -> String {
        let path_and_query = self.uri.path_and_query().map_or("/", http::uri::PathAndQuery::as_str);
        self.url_for(path_and_query)
    }

    // ---------------------------------------------------------------------------------------
    // path params

    /// Path parameters, set by the component that routed this request.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// A path parameter as i64; missing or unparsable values read as 0.
    pub fn param_i64(&self, key: &str) -> i64 {
        match self.param(key).map(str::parse::<i64>) {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                debug!(key, cause = %e, "path param is not an i64");
                0
            }
            None => 0,
        }
    }

    // ---------------------------------------------------------------------------------------
    // form

    /// First value of the form field `key`; body values come before query values.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn form_values(&self, key: &str) -> Vec<&str> {
        self.form.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
    }

    /// A form field whose length must lie in `[min, max]`; a missing field has length 0.
    pub fn form_str(&self, key: &str, min: usize, max: usize) -> Result<&str, FormError> {
        let value = self.form_value(key).unwrap_or_default();
        if value.len() < min || value.len() > max {
            return Err(FormError::length(key, min, max));
        }
        Ok(value)
    }

    pub fn form_i64(&self, key: &str) -> Result<i64, FormError> {
        self.form_number(key)
    }

    pub fn form_u64(&self, key: &str) -> Result<u64, FormError> {
        self.form_number(key)
    }

    pub fn form_i32(&self, key: &str) -> Result<i32, FormError> {
        self.form_number(key)
    }

    pub fn form_f64(&self, key: &str) -> Result<f64, FormError> {
        self.form_number(key)
    }

    /// Every value of `key` as i64; an absent field is an empty list.
    pub fn form_i64_values(&self, key: &str) -> Result<Vec<i64>, FormError> {
        self.form_values(key)
            .into_iter()
            .map(|value| value.parse::<i64>().map_err(|e| FormError::invalid_number(key, e)))
            .collect()
    }

    fn form_number<T>(&self, key: &str) -> Result<T, FormError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        match self.form_value(key) {
            None | Some("") => Err(FormError::empty(key)),
            Some(value) => value.parse::<T>().map_err(|e| FormError::invalid_number(key, e)),
        }
    }
}

/// Prefers `X-Forwarded-For` (first hop), then `X-Real-IP`.
fn read_ip(headers: &HeaderMap) -> &str {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok()).filter(|v| !v.is_empty());

    if let Some(forwarded) = header("x-forwarded-for") {
        return forwarded.split(", ").next().unwrap_or(forwarded);
    }
    header("x-real-ip").unwrap_or_default()
}

fn parse_form(headers: &HeaderMap, body: &Bytes, query: Option<&str>, form: &mut Vec<(String, String)>) {
    let is_urlencoded = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(mime::APPLICATION_WWW_FORM_URLENCODED.as_ref()));

    if is_urlencoded && !body.is_empty() {
        match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            Ok(pairs) => form.extend(pairs),
            Err(e) => debug!(cause = %e, "ignore malformed form body"),
        }
    }

    if let Some(query) = query {
        match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
            Ok(pairs) => form.extend(pairs),
            Err(e) => debug!(cause = %e, "ignore malformed query string"),
        }
    }
}
