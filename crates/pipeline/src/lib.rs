//! An async middleware pipeline for a single HTTP exchange.
//!
//! An [`App`] owns an ordered, immutable chain of [`Middleware`](middleware::Middleware)
//! and a pool of reusable [`Context`]s. Each request is installed into a pooled context,
//! driven through the chain, finalized into an `http::Response<Bytes>` and the context is
//! reset before it is reused.
//!
//! Bundled middleware covers cache-backed sessions, double-submit csrf protection,
//! response compression, error pages, pjax detection and access logging.

mod app;
mod context;
mod cookie;
mod helpers;
mod random;
mod request;
mod response;
mod session;

pub mod cache;
pub mod encoding;
pub mod error;
pub mod middleware;
pub mod sink;

pub use app::App;
pub use app::AppBuilder;
pub use app::AppConfig;
pub use cookie::Cookie;
pub use context::Context;
pub use helpers::HelperFn;
pub use helpers::Helpers;
pub use helpers::HelpersBuilder;
pub use request::Request;
pub use response::Response;
pub use session::SESSION_ID_LEN;
pub use session::Session;
