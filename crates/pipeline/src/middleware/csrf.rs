//! Double-submit anti-forgery protection.
//!
//! Each session carries a server-side secret and a token derived from it:
//! `salt-base64(sha256(salt-secret))`. The token is handed to the client in a
//! script-readable cookie and must be echoed back on every state-changing request, either
//! as the `_csrf` form field or in one of the [`CSRF_HEADERS`].

use crate::context::Context;
use crate::cookie::Cookie;
use crate::error::{BuildError, CsrfError};
use crate::middleware::{Middleware, Next, Outcome};
use crate::random;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::{Method, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, error};

/// Form field carrying the presented token.
pub const CSRF_FIELD: &str = "_csrf";

/// Headers carrying the presented token, in lookup order after [`CSRF_FIELD`].
pub const CSRF_HEADERS: [&str; 2] = ["X-CSRF-ReqToken", "X-XSRF-ReqToken"];

const SECRET_KEY: &str = "_csrf_secret";
const TOKEN_KEY: &str = "_csrf_token";

/// Shortest accepted secret, in random bytes.
pub const MIN_SECRET_LEN: usize = 18;
/// Shortest accepted salt, in random bytes.
pub const MIN_SALT_LEN: usize = 8;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub cookie_name: String,
    /// 0 makes the token cookie a browser-session cookie.
    pub cookie_max_age_secs: u64,
    /// Random bytes in the per-session secret, at least [`MIN_SECRET_LEN`].
    pub secret_len: usize,
    /// Random bytes in each token salt, at least [`MIN_SALT_LEN`].
    pub salt_len: usize,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self { cookie_name: "XSRF-TOKEN".to_string(), cookie_max_age_secs: 0, secret_len: MIN_SECRET_LEN, salt_len: MIN_SALT_LEN }
    }
}

type Except = Box<dyn Fn(&Context) -> bool + Send + Sync>;

/// Issues a token for every session and verifies it on state-changing requests.
///
/// Must run after the session middleware.
pub struct CsrfMiddleware {
    config: CsrfConfig,
    except: Option<Except>,
}

impl CsrfMiddleware {
    /// Fails when the secret or salt length is below its minimum.
    pub fn new(config: CsrfConfig) -> Result<Self, BuildError> {
        if config.secret_len < MIN_SECRET_LEN {
            return Err(BuildError::WeakCsrfConfig { field: "secret_len", len: config.secret_len, min: MIN_SECRET_LEN });
        }
        if config.salt_len < MIN_SALT_LEN {
            return Err(BuildError::WeakCsrfConfig { field: "salt_len", len: config.salt_len, min: MIN_SALT_LEN });
        }
        Ok(Self { config, except: None })
    }

    /// Requests for which `except` returns true are neither issued a token nor checked.
    pub fn except<F>(mut self, except: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.except = Some(Box::new(except));
        self
    }

    /// Makes sure the session holds a secret and token, returning the secret.
    fn issue(&self, ctx: &mut Context) -> Result<String, CsrfError> {
        let debug_mode = ctx.config().debug;
        let session = ctx.session.as_mut().ok_or(CsrfError::NoSession)?;
        if let (Some(secret), Some(token)) = (session.get(SECRET_KEY), session.get(TOKEN_KEY))
            && !secret.is_empty()
            && !token.is_empty()
        {
            return Ok(secret.to_string());
        }

        let secret = random::base64_string(self.config.secret_len).map_err(|e| CsrfError::Randomness(e.to_string()))?;
        let salt = random::base64_string(self.config.salt_len).map_err(|e| CsrfError::Randomness(e.to_string()))?;
        let token = gen_token(&salt, &secret);
        session.set(SECRET_KEY, secret.as_str());
        session.set(TOKEN_KEY, token.as_str());
        if debug_mode {
            debug!(token = %token, "csrf: new token");
        }

        let cookie = Cookie::new(&self.config.cookie_name, token).path("/").max_age(self.config.cookie_max_age_secs);
        ctx.res.set_cookie(&cookie);
        Ok(secret)
    }

    fn check(&self, ctx: &mut Context) -> Result<(), CsrfError> {
        if let Some(except) = &self.except
            && except(&*ctx)
        {
            return Ok(());
        }

        // issue before the method check so the first GET already gets a token
        let secret = self.issue(ctx)?;

        if matches!(*ctx.req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
            return Ok(());
        }

        let presented = presented_token(ctx).ok_or(CsrfError::Missing)?;
        let verified = verify(&secret, presented);
        if let Err(e) = &verified
            && ctx.config().debug
        {
            debug!(cause = %e, "csrf: verify failed");
        }
        verified
    }
}

impl Default for CsrfMiddleware {
    fn default() -> Self {
        Self { config: CsrfConfig::default(), except: None }
    }
}

impl fmt::Debug for CsrfMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfMiddleware").field("config", &self.config).field("except", &self.except.is_some()).finish()
    }
}

#[async_trait]
impl Middleware for CsrfMiddleware {
    fn name(&self) -> &str {
        "csrf"
    }

    async fn execute(&self, ctx: &mut Context, _next: Next<'_>) -> Outcome {
        match self.check(ctx) {
            Ok(()) => Outcome::Continue,
            Err(e) => {
                let status = e.status();
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(cause = %e, "csrf check failed");
                }
                ctx.res.set_error(status, e);
                Outcome::Break
            }
        }
    }
}

/// The token of the current session, for embedding into rendered forms.
pub fn csrf_token(ctx: &Context) -> Option<&str> {
    ctx.session.as_ref().and_then(|session| session.get(TOKEN_KEY))
}

fn presented_token(ctx: &Context) -> Option<&str> {
    let from_form = ctx.req.form_value(CSRF_FIELD).filter(|token| !token.is_empty());
    from_form.or_else(|| CSRF_HEADERS.iter().find_map(|name| ctx.req.header(*name).filter(|token| !token.is_empty())))
}

pub(crate) fn gen_token(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"-");
    hasher.update(secret.as_bytes());
    format!("{salt}-{}", STANDARD.encode(hasher.finalize()))
}

pub(crate) fn verify(secret: &str, token: &str) -> Result<(), CsrfError> {
    let (salt, _) = token.split_once('-').ok_or(CsrfError::Malformed)?;
    if salt.is_empty() {
        return Err(CsrfError::EmptySalt);
    }
    let expected = gen_token(salt, secret);
    if constant_time_eq(token.as_bytes(), expected.as_bytes()) { Ok(()) } else { Err(CsrfError::Mismatch) }
}

/// Compares without an early exit on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
