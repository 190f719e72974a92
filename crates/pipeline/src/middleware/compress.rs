use crate::context::Context;
use crate::encoding::{EncodedSink, Encoding};
use crate::middleware::{Middleware, Next, Outcome};
use crate::response::Response;
use async_trait::async_trait;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, SEC_WEBSOCKET_KEY, UPGRADE, VARY};
use http::{HeaderValue, Method, StatusCode};
use serde::Deserialize;
use tracing::{trace, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    /// Bodies shorter than this many bytes are sent as is.
    pub threshold: usize,
    /// Codings to offer, most preferred first. Clients advertising none of them are bypassed.
    pub encodings: Vec<Encoding>,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self { threshold: 150, encodings: vec![Encoding::Gzip] }
    }
}

/// Compresses the finished response body, with gzip unless other codings are configured.
///
/// The rest of the chain runs first; the decision is made on the buffered response and, if
/// it goes ahead, the response sink is wrapped in an [`EncodedSink`] that is finished when
/// the response is sent.
#[derive(Debug, Default)]
pub struct CompressMiddleware {
    config: CompressConfig,
}

impl CompressMiddleware {
    pub fn new(config: CompressConfig) -> Self {
        Self { config }
    }

    /// The coding to use, or `None` when the request must not be compressed.
    fn negotiate(&self, ctx: &Context) -> Option<Encoding> {
        let req = &ctx.req;
        if matches!(*req.method(), Method::HEAD | Method::OPTIONS) {
            return None;
        }
        // upgraded connections stream their own frames
        if req.headers().contains_key(SEC_WEBSOCKET_KEY) || req.headers().contains_key(UPGRADE) {
            return None;
        }
        req.header(ACCEPT_ENCODING).and_then(|accept| Encoding::select(accept, &self.config.encodings))
    }

    fn skip_reason(&self, res: &Response) -> Option<&'static str> {
        if res.error().is_some() {
            return Some("error set");
        }
        if res.body().is_empty() || res.body().len() < self.config.threshold {
            return Some("body below threshold");
        }
        if matches!(res.status(), Some(StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT | StatusCode::NOT_MODIFIED)) {
            return Some("status without body");
        }
        if res.headers().contains_key(CONTENT_ENCODING) {
            return Some("already encoded");
        }
        None
    }
}

#[async_trait]
impl Middleware for CompressMiddleware {
    fn name(&self) -> &str {
        "compress"
    }

    async fn execute(&self, ctx: &mut Context, next: Next<'_>) -> Outcome {
        let Some(encoding) = self.negotiate(ctx) else {
            return Outcome::Continue;
        };

        let outcome = next.run(ctx).await;
        if outcome == Outcome::Abort {
            return outcome;
        }
        if let Some(reason) = self.skip_reason(&ctx.res) {
            trace!(reason, "skip compression");
            return outcome;
        }

        let prepared = match EncodedSink::prepare(encoding) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(%encoding, cause = %e, "failed to create encoder, sending uncompressed");
                return outcome;
            }
        };
        if !ctx.res.wrap_sink(|inner| Box::new(prepared.wrap(inner))) {
            warn!("response has no sink to compress into");
            return outcome;
        }

        let headers = ctx.res.headers_mut();
        headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.name()));
        headers.remove(CONTENT_LENGTH);
        trace!(%encoding, "compressing response");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::App;
    use crate::middleware::from_fn;
    use crate::sink::Sink;
    use bytes::Bytes;
    use flate2::read::GzDecoder;
    use std::io::{self, Read, Write};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts `finish` calls of the sink it wraps.
    struct Counting {
        inner: Box<dyn Sink>,
        finished: Arc<AtomicUsize>,
    }

    impl Write for Counting {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Sink for Counting {
        fn finish(self: Box<Self>) -> io::Result<Bytes> {
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.inner.finish()
        }
    }

    fn counting(finished: Arc<AtomicUsize>) -> impl Middleware {
        from_fn("count", move |ctx: &mut Context| {
            let finished = finished.clone();
            ctx.res.wrap_sink(|inner| Box::new(Counting { inner, finished }));
            Outcome::Continue
        })
    }

    fn body(len: usize) -> impl Middleware {
        from_fn("body", move |ctx: &mut Context| {
            ctx.res.plain("x".repeat(len));
            Outcome::Continue
        })
    }

    fn app(body_len: usize, finished: Arc<AtomicUsize>) -> App {
        App::builder()
            .wrap(counting(finished))
            .wrap(CompressMiddleware::default())
            .wrap(body(body_len))
            .build()
            .unwrap()
    }

    /// Runs the rest of the chain, then never returns.
    struct Stall {
        compressed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Middleware for Stall {
        fn name(&self) -> &str {
            "stall"
        }

        async fn execute(&self, ctx: &mut Context, next: Next<'_>) -> Outcome {
            next.run(ctx).await;
            self.compressed.store(ctx.res.headers().contains_key(CONTENT_ENCODING), Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn get(accept: &str) -> http::Request<Bytes> {
        http::Request::get("/").header(ACCEPT_ENCODING, accept).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn large_body_is_gzipped_and_closed_once() {
        let finished = Arc::new(AtomicUsize::new(0));
        let res = app(1000, finished.clone()).handle(get("gzip")).await.unwrap();

        assert_eq!(res.headers()[CONTENT_ENCODING], "gzip");
        assert_eq!(res.headers()[VARY], "Accept-Encoding");
        assert!(res.headers().get(CONTENT_LENGTH).is_none());
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        let mut decoded = String::new();
        GzDecoder::new(&res.body()[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "x".repeat(1000));
    }

    #[tokio::test]
    async fn browsers_get_gzip() {
        let app = app(1000, Arc::default());
        for accept in ["gzip, deflate, br", "gzip, deflate, br, zstd", "br;q=1.0, gzip;q=0.5"] {
            let res = app.handle(get(accept)).await.unwrap();
            assert_eq!(res.headers()[CONTENT_ENCODING], "gzip", "{accept}");
        }
    }

    #[tokio::test]
    async fn clients_without_gzip_are_bypassed() {
        let finished = Arc::new(AtomicUsize::new(0));
        let app = app(1000, finished.clone());
        for accept in ["deflate", "br, zstd"] {
            let res = app.handle(get(accept)).await.unwrap();
            assert!(res.headers().get(CONTENT_ENCODING).is_none(), "{accept}");
            assert_eq!(res.body().len(), 1000);
        }
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_codings_are_opt_in() {
        let config = CompressConfig { encodings: vec![Encoding::Br, Encoding::Gzip], ..CompressConfig::default() };
        let app = App::builder().wrap(CompressMiddleware::new(config)).wrap(body(1000)).build().unwrap();

        let res = app.handle(get("gzip, deflate, br")).await.unwrap();
        assert_eq!(res.headers()[CONTENT_ENCODING], "br");
        let res = app.handle(get("gzip, deflate")).await.unwrap();
        assert_eq!(res.headers()[CONTENT_ENCODING], "gzip");
        let res = app.handle(get("deflate")).await.unwrap();
        assert!(res.headers().get(CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn dropped_request_still_closes_the_encoder() {
        let finished = Arc::new(AtomicUsize::new(0));
        let compressed = Arc::new(AtomicBool::new(false));
        let app = App::builder()
            .wrap(counting(finished.clone()))
            .wrap(Stall { compressed: compressed.clone() })
            .wrap(CompressMiddleware::default())
            .wrap(body(1000))
            .build()
            .unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), app.handle(get("gzip"))).await;

        assert!(result.is_err());
        assert!(compressed.load(Ordering::SeqCst));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(app.pooled_contexts(), 1);
    }

    #[tokio::test]
    async fn small_body_is_left_alone() {
        let finished = Arc::new(AtomicUsize::new(0));
        let res = app(149, finished.clone()).handle(get("gzip")).await.unwrap();

        assert!(res.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(res.body().len(), 149);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bypassed_requests() {
        let app = app(1000, Arc::default());

        let res = app.handle(get("identity")).await.unwrap();
        assert!(res.headers().get(CONTENT_ENCODING).is_none());

        let head = http::Request::head("/").header(ACCEPT_ENCODING, "gzip").body(Bytes::new()).unwrap();
        let res = app.handle(head).await.unwrap();
        assert!(res.headers().get(CONTENT_ENCODING).is_none());

        let ws = http::Request::get("/")
            .header(ACCEPT_ENCODING, "gzip")
            .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Bytes::new())
            .unwrap();
        let res = app.handle(ws).await.unwrap();
        assert!(res.headers().get(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn skip_rules() {
        let middleware = CompressMiddleware::default();
        let mut res = Response::default();
        res.plain("y".repeat(200));
        assert_eq!(middleware.skip_reason(&res), None);

        res.set_status(StatusCode::NOT_MODIFIED);
        assert_eq!(middleware.skip_reason(&res), Some("status without body"));

        res.set_status(StatusCode::OK);
        res.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        assert_eq!(middleware.skip_reason(&res), Some("already encoded"));

        res.set_error(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(middleware.skip_reason(&res), Some("error set"));
    }

    #[test]
    fn config_defaults_from_json() {
        let config: CompressConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.threshold, 150);
        assert_eq!(config.encodings, vec![Encoding::Gzip]);

        let config: CompressConfig = serde_json::from_str(r#"{"encodings": ["zstd", "br", "gzip"]}"#).unwrap();
        assert_eq!(config.encodings, vec![Encoding::Zstd, Encoding::Br, Encoding::Gzip]);
    }
}
