use crate::cache::Cache;
use crate::context::Context;
use crate::middleware::{Middleware, Next, Outcome};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Makes a shared cache handle available to later middleware through `Context::cache`.
pub struct CacheMiddleware {
    cache: Arc<dyn Cache>,
}

impl CacheMiddleware {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }
}

impl fmt::Debug for CacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMiddleware").finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    async fn execute(&self, ctx: &mut Context, _next: Next<'_>) -> Outcome {
        ctx.cache = Some(self.cache.clone());
        Outcome::Continue
    }
}
