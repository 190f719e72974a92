use crate::context::Context;
use crate::cookie::Cookie;
use crate::error::SessionError;
use crate::middleware::{Middleware, Next, Outcome};
use crate::session::Session;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of the stored session data, 0 means no expiry.
    pub ttl_secs: u64,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_max_age_secs: u64,
    /// Namespace of session entries in the shared cache.
    pub key_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 3600,
            cookie_name: "_sid".to_string(),
            cookie_domain: None,
            cookie_max_age_secs: 365 * 24 * 3600,
            key_prefix: "session/".to_string(),
        }
    }
}

/// Restores the session named by the id cookie before the rest of the chain runs, and
/// writes it back afterwards if it was modified.
///
/// Needs a cache on the context, see [`CacheMiddleware`](crate::middleware::CacheMiddleware).
#[derive(Debug, Default)]
pub struct SessionMiddleware {
    config: SessionConfig,
}

impl SessionMiddleware {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Session entries expire after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(SessionConfig { ttl_secs: ttl.as_secs(), ..SessionConfig::default() })
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.config.key_prefix, id)
    }

    fn cookie(&self, session: &Session) -> Cookie {
        let cookie =
            Cookie::new(&self.config.cookie_name, session.id()).path("/").http_only(true).max_age(self.config.cookie_max_age_secs);
        match &self.config.cookie_domain {
            Some(domain) => cookie.domain(domain),
            None => cookie,
        }
    }

    async fn load(&self, ctx: &mut Context) -> Result<Session, SessionError> {
        let Some(id) = ctx.req.cookie(&self.config.cookie_name).filter(|id| !id.is_empty()) else {
            let session = Session::generate()?;
            ctx.res.set_cookie(&self.cookie(&session));
            debug!("new session");
            return Ok(session);
        };

        let mut session = Session::with_id(id);
        let cache = ctx.cache.as_ref().ok_or(SessionError::NoCache)?;
        match cache.get(&self.key(session.id())).await {
            Ok(blob) => session.decode(&blob)?,
            Err(e) if e.is_miss() => debug!("session not in cache, starting empty"),
            Err(e) => return Err(e.into()),
        }
        Ok(session)
    }

    async fn save(&self, ctx: &mut Context) -> Result<(), SessionError> {
        let Some(session) = ctx.session.as_mut().filter(|session| session.is_dirty()) else {
            return Ok(());
        };
        let cache = ctx.cache.as_ref().ok_or(SessionError::NoCache)?;

        let blob = Bytes::from(session.encode()?);
        cache.set(&self.key(session.id()), blob, Duration::from_secs(self.config.ttl_secs)).await?;
        session.mark_clean();
        Ok(())
    }
}

#[async_trait]
impl Middleware for SessionMiddleware {
    fn name(&self) -> &str {
        "session"
    }

    async fn execute(&self, ctx: &mut Context, next: Next<'_>) -> Outcome {
        match self.load(ctx).await {
            Ok(session) => ctx.session = Some(session),
            Err(e) => {
                error!(cause = %e, "failed to restore session");
                ctx.res.set_error(StatusCode::INTERNAL_SERVER_ERROR, e);
                return Outcome::Break;
            }
        }

        let outcome = next.run(ctx).await;

        if let Err(e) = self.save(ctx).await {
            error!(cause = %e, "failed to save session");
            if outcome == Outcome::Abort {
                warn!("response already handled, session changes are lost");
                return outcome;
            }
            ctx.res.set_error(StatusCode::INTERNAL_SERVER_ERROR, e);
            return Outcome::Break;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryCache, MockCache};
    use crate::error::CacheError;
    use crate::middleware::{self, from_fn};
    use http::header::{COOKIE, SET_COOKIE};
    use std::sync::Arc;

    fn chain(handler: fn(&mut Context) -> Outcome) -> Vec<Box<dyn Middleware>> {
        vec![Box::new(SessionMiddleware::default()), Box::new(from_fn("handler", handler))]
    }

    fn context_with(cache: Arc<dyn Cache>, cookie: Option<&str>) -> Context {
        let mut ctx = Context::detached();
        let mut builder = http::Request::get("/");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        ctx.req.install(builder.body(Bytes::new()).unwrap());
        ctx.cache = Some(cache);
        ctx
    }

    #[tokio::test]
    async fn new_session_sets_cookie() {
        let mut ctx = context_with(Arc::new(MemoryCache::new()), None);
        let outcome = middleware::dispatch(&chain(|_| Outcome::Continue), &mut ctx).await;

        assert_eq!(outcome, Outcome::Continue);
        let cookie = ctx.res.headers()[SET_COOKIE].to_str().unwrap().to_string();
        let session = ctx.session.as_ref().unwrap();
        assert!(cookie.starts_with(&format!("_sid={}; Path=/", session.id())));
        assert!(cookie.contains("HttpOnly"));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn dirty_session_is_saved_and_restored() {
        let cache = Arc::new(MemoryCache::new());
        let mut ctx = context_with(cache.clone(), Some("_sid=abc"));
        middleware::dispatch(
            &chain(|ctx| {
                ctx.session.as_mut().unwrap().set("user", "7");
                Outcome::Continue
            }),
            &mut ctx,
        )
        .await;
        assert!(ctx.res.headers().get(SET_COOKIE).is_none());
        assert_eq!(cache.get("session/abc").await.unwrap(), Bytes::from_static(br#"{"user":"7"}"#));

        let mut ctx = context_with(cache, Some("_sid=abc"));
        middleware::dispatch(&chain(|_| Outcome::Continue), &mut ctx).await;
        assert_eq!(ctx.session.as_ref().unwrap().get("user"), Some("7"));
    }

    #[tokio::test]
    async fn clean_session_is_not_written() {
        let mut cache = MockCache::new();
        cache.expect_get().returning(|_| Err(CacheError::Miss));
        cache.expect_set().never();

        let mut ctx = context_with(Arc::new(cache), Some("_sid=abc"));
        let outcome = middleware::dispatch(&chain(|_| Outcome::Continue), &mut ctx).await;

        assert_eq!(outcome, Outcome::Continue);
        assert!(ctx.res.error().is_none());
    }

    #[tokio::test]
    async fn cache_failure_is_a_server_error() {
        let mut cache = MockCache::new();
        cache.expect_get().returning(|_| Err(CacheError::unavailable("connection refused")));

        let mut ctx = context_with(Arc::new(cache), Some("_sid=abc"));
        let outcome = middleware::dispatch(&chain(|_| panic!("handler must not run")), &mut ctx).await;

        assert_eq!(outcome, Outcome::Break);
        assert_eq!(ctx.res.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(ctx.res.error().unwrap().to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn save_failure_is_a_server_error() {
        let mut cache = MockCache::new();
        cache.expect_get().returning(|_| Ok(Bytes::new()));
        cache.expect_set().times(1).returning(|_, _, _| Err(CacheError::unavailable("full")));

        let mut ctx = context_with(Arc::new(cache), Some("_sid=abc"));
        let outcome = middleware::dispatch(
            &chain(|ctx| {
                ctx.session.as_mut().unwrap().set("k", "v");
                Outcome::Continue
            }),
            &mut ctx,
        )
        .await;

        assert_eq!(outcome, Outcome::Break);
        assert_eq!(ctx.res.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn missing_cache_is_a_server_error() {
        let mut ctx = Context::detached();
        ctx.req.install(http::Request::get("/").header(COOKIE, "_sid=abc").body(Bytes::new()).unwrap());

        let outcome = middleware::dispatch(&chain(|_| Outcome::Continue), &mut ctx).await;
        assert_eq!(outcome, Outcome::Break);
        assert_eq!(ctx.res.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn inner_abort_is_preserved() {
        let mut ctx = context_with(Arc::new(MemoryCache::new()), None);
        let outcome = middleware::dispatch(&chain(|_| Outcome::Abort), &mut ctx).await;
        assert_eq!(outcome, Outcome::Abort);
    }
}
