use crate::context::Context;
use crate::middleware::{Middleware, Next, Outcome};
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

/// Logs one line per request once the rest of the chain has produced the response.
#[derive(Debug, Default)]
pub struct AccessLogMiddleware;

impl AccessLogMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for AccessLogMiddleware {
    fn name(&self) -> &str {
        "access_log"
    }

    async fn execute(&self, ctx: &mut Context, next: Next<'_>) -> Outcome {
        let start = Instant::now();
        let outcome = next.run(ctx).await;

        // unset status is decided when the response is sent
        let status = ctx.res.status().map_or(0, |status| status.as_u16());
        info!(
            method = %ctx.req.method(),
            path = ctx.req.path(),
            status,
            ip = ctx.req.ip(),
            elapsed = ?start.elapsed(),
            ?outcome,
            "request"
        );
        outcome
    }
}
