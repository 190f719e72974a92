//! The pipeline engine: an immutable middleware chain plus a pool of request contexts.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use micro_pipeline::middleware::{self, CompressMiddleware, Outcome};
//! use micro_pipeline::{App, Context};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let app = App::builder()
//!     .wrap(CompressMiddleware::default())
//!     .wrap(middleware::from_fn("hello", |ctx: &mut Context| {
//!         ctx.res.plain("hello world");
//!         Outcome::Continue
//!     }))
//!     .build()?;
//!
//! let request = http::Request::get("/").body(Bytes::new())?;
//! let response = app.handle(request).await;
//! # Ok(())
//! # }
//! ```

use crate::context::{Context, ContextPool, Shared};
use crate::error::BuildError;
use crate::helpers::Helpers;
use crate::middleware::{self, Middleware, Outcome};
use crate::random;
use crate::sink::BufferSink;
use bytes::Bytes;
use http::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Enables verbose logging of security sensitive values.
    pub debug: bool,
    pub max_middleware: usize,
    /// Most idle contexts kept for reuse.
    pub pool_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { debug: false, max_middleware: 32, pool_capacity: 1024 }
    }
}

pub struct AppBuilder {
    config: AppConfig,
    helpers: Helpers,
    chain: Vec<Box<dyn Middleware>>,
}

impl AppBuilder {
    fn new() -> Self {
        Self { config: AppConfig::default(), helpers: Helpers::default(), chain: vec![] }
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn helpers(mut self, helpers: Helpers) -> Self {
        self.helpers = helpers;
        self
    }

    /// Appends `middleware` to the chain; the first wrapped runs first.
    pub fn wrap<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.chain.push(Box::new(middleware));
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        if self.chain.len() > self.config.max_middleware {
            return Err(BuildError::TooManyMiddlewares { count: self.chain.len(), max: self.config.max_middleware });
        }
        random::probe()?;

        let names: Vec<&str> = self.chain.iter().map(|m| m.name()).collect();
        info!(middlewares = ?names, debug = self.config.debug, "app built");

        let capacity = self.config.pool_capacity;
        let shared = Arc::new(Shared { config: self.config, helpers: self.helpers });
        Ok(App { chain: self.chain, pool: ContextPool::new(shared, capacity) })
    }
}

pub struct App {
    chain: Vec<Box<dyn Middleware>>,
    pool: ContextPool,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("chain", &self.chain).field("config", self.config()).finish_non_exhaustive()
    }
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder").field("config", &self.config).field("chain", &self.chain).finish_non_exhaustive()
    }
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn config(&self) -> &AppConfig {
        &self.pool.shared().config
    }

    pub fn helpers(&self) -> &Helpers {
        &self.pool.shared().helpers
    }

    /// Runs `request` through the chain and returns the finished response, or `None` when a
    /// middleware aborted because it handled the exchange itself.
    pub async fn handle(&self, request: http::Request<Bytes>) -> Option<http::Response<Bytes>> {
        let mut pooled = self.pool.acquire();
        let ctx: &mut Context = &mut pooled;
        ctx.req.install(request);
        ctx.res.install_sink(Box::new(BufferSink::new()));

        let outcome = middleware::dispatch(&self.chain, ctx).await;
        if outcome == Outcome::Abort {
            debug!(path = ctx.req.path(), "request aborted, nothing to send");
            return None;
        }

        match ctx.res.end(ctx.req.method()) {
            Ok(response) => Some(response),
            Err(e) => {
                error!(path = ctx.req.path(), cause = %e, "failed to send response");
                let mut response = http::Response::new(Bytes::new());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                Some(response)
            }
        }
    }

    /// Idle contexts ready for the next request.
    pub fn pooled_contexts(&self) -> usize {
        self.pool.idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;

    fn get(path: &str) -> http::Request<Bytes> {
        http::Request::get(path).body(Bytes::new()).unwrap()
    }

    #[test]
    fn too_many_middlewares() {
        let mut builder = App::builder().config(AppConfig { max_middleware: 2, ..AppConfig::default() });
        for _ in 0..3 {
            builder = builder.wrap(from_fn("noop", |_: &mut Context| Outcome::Continue));
        }
        match builder.build() {
            Err(BuildError::TooManyMiddlewares { count: 3, max: 2 }) => {}
            other => panic!("unexpected build result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn abort_sends_nothing() {
        let app = App::builder().wrap(from_fn("upgrade", |_: &mut Context| Outcome::Abort)).build().unwrap();
        assert!(app.handle(get("/ws")).await.is_none());
        assert_eq!(app.pooled_contexts(), 1);
    }

    #[tokio::test]
    async fn break_still_sends() {
        let app = App::builder()
            .wrap(from_fn("redirect", |ctx: &mut Context| {
                let path = ctx.req.path().to_string();
                ctx.res.redirect(&path, "login");
                Outcome::Break
            }))
            .wrap(from_fn("unreachable", |_: &mut Context| panic!("chain did not stop")))
            .build()
            .unwrap();

        let res = app.handle(get("/account/settings")).await.unwrap();
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[http::header::LOCATION], "/account/login");
    }

    #[tokio::test]
    async fn empty_chain_is_no_content() {
        let app = App::builder().build().unwrap();
        let res = app.handle(get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn config_from_json() {
        let config: AppConfig = serde_json::from_str(r#"{"debug": true}"#).unwrap();
        assert!(config.debug);
        assert_eq!(config.max_middleware, 32);
        assert_eq!(config.pool_capacity, 1024);
    }
}
