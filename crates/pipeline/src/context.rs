//! The per-request exchange context and the pool that recycles it.
//!
//! A [`Context`] is owned by exactly one in-flight request. When the request is done the
//! [`PooledContext`] guard clears every per-request field and hands the context back to the
//! [`ContextPool`], so nothing from one request can be observed by the next.

use crate::app::AppConfig;
use crate::cache::Cache;
use crate::helpers::Helpers;
use crate::request::Request;
use crate::response::Response;
use crate::session::Session;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Startup state every context can read: configuration and helpers.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) config: AppConfig,
    pub(crate) helpers: Helpers,
}

pub struct Context {
    pub req: Request,
    pub res: Response,
    /// Set by the session middleware.
    pub session: Option<Session>,
    /// Set by the cache middleware.
    pub cache: Option<Arc<dyn Cache>>,
    shared: Arc<Shared>,
}

impl Context {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { req: Request::default(), res: Response::default(), session: None, cache: None, shared }
    }

    pub fn config(&self) -> &AppConfig {
        &self.shared.config
    }

    pub fn helpers(&self) -> &Helpers {
        &self.shared.helpers
    }

    /// Clears every per-request field, closing a response sink that is still open.
    pub(crate) fn reset(&mut self) {
        self.req.clear();
        self.res.reset();
        self.session = None;
        self.cache = None;
    }

    pub(crate) fn is_pristine(&self) -> bool {
        self.req.is_pristine() && self.res.is_pristine() && self.session.is_none() && self.cache.is_none()
    }

    /// A context outside any pool, with default configuration.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let mut ctx = Self::new(Arc::default());
        ctx.res.install_sink(Box::new(crate::sink::BufferSink::new()));
        ctx
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("req", &self.req)
            .field("res", &self.res)
            .field("session", &self.session)
            .field("has_cache", &self.cache.is_some())
            .finish()
    }
}

/// Idle contexts waiting for the next request.
///
/// The mutex is held only to push or pop, never across a request.
pub(crate) struct ContextPool {
    idle: Mutex<Vec<Box<Context>>>,
    capacity: usize,
    shared: Arc<Shared>,
}

impl ContextPool {
    pub(crate) fn new(shared: Arc<Shared>, capacity: usize) -> Self {
        Self { idle: Mutex::new(Vec::new()), capacity, shared }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn acquire(&self) -> PooledContext<'_> {
        let reused = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let ctx = reused.unwrap_or_else(|| {
            trace!("context pool empty, allocating");
            Box::new(Context::new(self.shared.clone()))
        });
        PooledContext { pool: self, ctx: Some(ctx) }
    }

    fn release(&self, mut ctx: Box<Context>) {
        ctx.reset();
        debug_assert!(ctx.is_pristine(), "context leaked request state through reset");

        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.capacity {
            idle.push(ctx);
        }
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive access to a pooled context; resets and returns it when dropped.
///
/// Dropping happens on every path out of a request, including a cancelled request future.
pub(crate) struct PooledContext<'p> {
    pool: &'p ContextPool,
    ctx: Option<Box<Context>>,
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        // only `drop` takes the context out
        self.ctx.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}
