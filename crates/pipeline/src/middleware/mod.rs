//! The middleware capability and the continuation that drives the chain.
//!
//! A middleware receives the request [`Context`] and a [`Next`] continuation. It may:
//! - do its work and return [`Outcome::Continue`] without touching `next`, in which case the
//!   engine moves on to the following middleware (a plain filter)
//! - call [`Next::run`] to execute the rest of the chain, then post-process the response
//!   once control comes back (an onion layer)
//! - return [`Outcome::Break`] or [`Outcome::Abort`] to stop the chain
//!
//! The chain itself is an immutable slice shared by every request; all per-request state
//! lives in the context.

mod access_log;
mod cache;
mod compress;
mod csrf;
mod error_page;
mod pjax;
mod session;

pub use access_log::AccessLogMiddleware;
pub use cache::CacheMiddleware;
pub use compress::{CompressConfig, CompressMiddleware};
pub use csrf::{CSRF_FIELD, CSRF_HEADERS, CsrfConfig, CsrfMiddleware, MIN_SALT_LEN, MIN_SECRET_LEN, csrf_token};
pub use error_page::{ErrorPageMiddleware, ErrorRenderer, SimpleErrorRenderer};
pub use pjax::PjaxMiddleware;
pub use session::{SessionConfig, SessionMiddleware};

use crate::context::Context;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the chain should do after a middleware returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Run the following middleware; at the end of the chain the response is sent.
    Continue,
    /// Stop the chain, the response is ready to send.
    Break,
    /// Stop the chain and send nothing; the response was handled elsewhere.
    Abort,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut Context, next: Next<'_>) -> Outcome;
}

impl fmt::Debug for dyn Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&self.name()).finish()
    }
}

/// The remainder of the chain after the current middleware.
pub struct Next<'a> {
    rest: &'a [Box<dyn Middleware>],
    invoked: &'a AtomicBool,
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("rest", &self.rest).finish_non_exhaustive()
    }
}

impl Next<'_> {
    /// Runs every remaining middleware and returns the outcome that stopped the chain.
    pub async fn run(self, ctx: &mut Context) -> Outcome {
        self.invoked.store(true, Ordering::Release);
        dispatch(self.rest, ctx).await
    }

    /// Number of middleware left after the current one.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

pub(crate) async fn dispatch(chain: &[Box<dyn Middleware>], ctx: &mut Context) -> Outcome {
    let mut rest = chain;
    while let Some((current, tail)) = rest.split_first() {
        let invoked = AtomicBool::new(false);
        let outcome = current.execute(ctx, Next { rest: tail, invoked: &invoked }).await;

        // the remainder already ran inside `current`
        if outcome != Outcome::Continue || invoked.load(Ordering::Acquire) {
            return outcome;
        }
        rest = tail;
    }
    Outcome::Continue
}

/// A middleware built from a synchronous closure, typically the terminal handler.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware").field("name", &self.name).finish_non_exhaustive()
    }
}

pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(&mut Context) -> Outcome + Send + Sync,
{
    FnMiddleware { name: name.into(), f }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Context) -> Outcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut Context, _next: Next<'_>) -> Outcome {
        (self.f)(ctx)
    }
}
