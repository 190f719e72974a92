use crate::context::Context;
use crate::middleware::{Middleware, Next, Outcome};
use async_trait::async_trait;
use http::Method;

/// Flags GET requests issued by pjax, via the `_pjax=true` form field or `X-PJAX: true`.
#[derive(Debug, Default)]
pub struct PjaxMiddleware;

impl PjaxMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for PjaxMiddleware {
    fn name(&self) -> &str {
        "pjax"
    }

    async fn execute(&self, ctx: &mut Context, _next: Next<'_>) -> Outcome {
        if *ctx.req.method() != Method::GET {
            return Outcome::Continue;
        }
        let pjax = ctx.req.form_value("_pjax") == Some("true") || ctx.req.header("x-pjax") == Some("true");
        ctx.req.set_pjax(pjax);
        Outcome::Continue
    }
}
