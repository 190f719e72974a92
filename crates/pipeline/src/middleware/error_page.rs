use crate::context::Context;
use crate::middleware::{Middleware, Next, Outcome};
use async_trait::async_trait;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;

/// Renders the body of an error page; usually backed by the view layer.
pub trait ErrorRenderer: Send + Sync {
    /// `data` holds the page data plus, under `"error"`, the message of the response error.
    fn render(&self, status: StatusCode, data: &HashMap<String, String>) -> String;
}

/// A bare html page with the status line and the error message.
#[derive(Debug, Default)]
pub struct SimpleErrorRenderer;

impl ErrorRenderer for SimpleErrorRenderer {
    fn render(&self, status: StatusCode, data: &HashMap<String, String>) -> String {
        let title = format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or("Error"));
        let mut page = format!("<!DOCTYPE html>\n<html><head><title>{title}</title></head><body><h1>{title}</h1>");
        if let Some(error) = data.get("error") {
            let _ = write!(page, "<p>{}</p>", escape(error));
        }
        page.push_str("</body></html>\n");
        page
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Replaces the body of failed GET responses (status >= 400) with a rendered page.
///
/// The response error is moved into the page data and cleared, so it is reported once.
pub struct ErrorPageMiddleware {
    data: HashMap<String, String>,
    renderer: Box<dyn ErrorRenderer>,
}

impl ErrorPageMiddleware {
    pub fn new(renderer: impl ErrorRenderer + 'static) -> Self {
        Self { data: HashMap::new(), renderer: Box::new(renderer) }
    }

    /// Adds a value every rendered page receives.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl Default for ErrorPageMiddleware {
    fn default() -> Self {
        Self::new(SimpleErrorRenderer)
    }
}

impl fmt::Debug for ErrorPageMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorPageMiddleware").field("data", &self.data).finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for ErrorPageMiddleware {
    fn name(&self) -> &str {
        "error_page"
    }

    async fn execute(&self, ctx: &mut Context, next: Next<'_>) -> Outcome {
        if *ctx.req.method() != Method::GET {
            return Outcome::Continue;
        }

        let outcome = next.run(ctx).await;
        if outcome == Outcome::Abort {
            return outcome;
        }

        let Some(status) = ctx.res.status().filter(|status| status.as_u16() >= 400) else {
            return outcome;
        };
        let mut data = self.data.clone();
        if let Some(error) = ctx.res.clear_error() {
            data.insert("error".to_string(), error.to_string());
        }
        let page = self.renderer.render(status, &data);
        ctx.res.html(page);
        outcome
    }
}
