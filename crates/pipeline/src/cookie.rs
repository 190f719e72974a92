//! Minimal cookie support: rendering `Set-Cookie` values and reading the `Cookie` header.

use http::HeaderMap;
use std::fmt;
use std::fmt::Write as _;

/// A cookie to be sent with `Set-Cookie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<u64>,
    http_only: bool,
    secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            http_only: false,
            secure: false,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// An empty domain is ignored.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        self.domain = if domain.is_empty() { None } else { Some(domain) };
        self
    }

    /// A zero max age is not rendered.
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = if seconds > 0 { Some(seconds) } else { None };
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            let _ = write!(out, "; Path={path}");
        }
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={domain}");
        }
        if let Some(max_age) = self.max_age {
            let _ = write!(out, "; Max-Age={max_age}");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        f.write_str(&out)
    }
}

/// Finds the first cookie named `name` across all `Cookie` headers.
pub(crate) fn find<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn render_session_cookie() {
        let cookie = Cookie::new("_sid", "abc").path("/").domain("").http_only(true).max_age(3600);
        assert_eq!(cookie.to_string(), "_sid=abc; Path=/; Max-Age=3600; HttpOnly");
    }

    #[test]
    fn render_zero_max_age_is_omitted() {
        let cookie = Cookie::new("XSRF-TOKEN", "t").path("/").max_age(0);
        assert_eq!(cookie.to_string(), "XSRF-TOKEN=t; Path=/");
    }

    #[test]
    fn find_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(http::header::COOKIE, HeaderValue::from_static("a=1; b=2"));
        headers.append(http::header::COOKIE, HeaderValue::from_static("_sid=\"xyz==\""));

        assert_eq!(find(&headers, "a"), Some("1"));
        assert_eq!(find(&headers, "b"), Some("2"));
        assert_eq!(find(&headers, "_sid"), Some("xyz=="));
        assert_eq!(find(&headers, "missing"), None);
    }
}
