use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, COOKIE, SET_COOKIE};
use micro_pipeline::cache::{MemoryCache, TimeoutCache};
use micro_pipeline::error::BoxError;
use micro_pipeline::middleware::{
    self, AccessLogMiddleware, CacheMiddleware, CompressMiddleware, CsrfMiddleware, ErrorPageMiddleware, Outcome,
    PjaxMiddleware, SessionMiddleware,
};
use micro_pipeline::{App, AppConfig, Context, Helpers};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn shout(args: &[Value]) -> Result<Value, BoxError> {
    let text = args.first().and_then(Value::as_str).ok_or("shout: expects a string")?;
    Ok(Value::String(text.to_uppercase()))
}

fn routes(ctx: &mut Context) -> Outcome {
    match ctx.req.path() {
        "/" => {
            let mut visits = 1;
            if let Some(session) = ctx.session.as_mut() {
                visits += session.get("visits").and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
                session.set("visits", visits.to_string());
            }
            let greeting = match ctx.helpers().call("shout", &[Value::from("hello")]) {
                Some(Ok(Value::String(text))) => text,
                _ => "hello".to_string(),
            };
            let token = middleware::csrf_token(ctx).unwrap_or_default().to_string();
            ctx.res.html(format!(
                "<h1>{greeting}</h1><p>visit #{visits}</p><p>pjax: {}</p><input name=\"_csrf\" value=\"{token}\">{}",
                ctx.req.is_pjax(),
                "<!-- padding -->".repeat(20)
            ));
        }
        "/old" => {
            let path = ctx.req.path().to_string();
            ctx.res.redirect(&path, "./");
            return Outcome::Break;
        }
        _ => ctx.res.set_error(http::StatusCode::NOT_FOUND, "no such page"),
    }
    Outcome::Continue
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config: AppConfig = serde_json::from_str(r#"{ "debug": true, "pool_capacity": 64 }"#)?;
    let cache = TimeoutCache::new(MemoryCache::new(), Duration::from_millis(50));

    let app = App::builder()
        .config(config)
        .helpers(Helpers::builder().register("shout", shout)?.build())
        .wrap(AccessLogMiddleware::new())
        .wrap(CompressMiddleware::default())
        .wrap(ErrorPageMiddleware::default())
        .wrap(PjaxMiddleware::new())
        .wrap(CacheMiddleware::new(Arc::new(cache)))
        .wrap(SessionMiddleware::with_ttl(Duration::from_secs(600)))
        .wrap(CsrfMiddleware::default())
        .wrap(middleware::from_fn("routes", routes))
        .build()?;

    let first = app.handle(http::Request::get("/").body(Bytes::new())?).await.ok_or("aborted")?;
    println!("{} {:?}", first.status(), first.headers().get_all(SET_COOKIE).iter().collect::<Vec<_>>());

    let sid = first
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| cookie.strip_prefix("_sid="))
        .and_then(|rest| rest.split(';').next())
        .ok_or("no session cookie")?
        .to_string();

    let second = http::Request::get("/?_pjax=true")
        .header(COOKIE, format!("_sid={sid}"))
        .header(ACCEPT_ENCODING, "gzip, br")
        .body(Bytes::new())?;
    let second = app.handle(second).await.ok_or("aborted")?;
    println!("{} {:?} {} bytes", second.status(), second.headers(), second.body().len());

    for path in ["/old", "/missing"] {
        let res = app.handle(http::Request::get(path).body(Bytes::new())?).await.ok_or("aborted")?;
        println!("{path}: {} {}", res.status(), String::from_utf8_lossy(res.body()));
    }
    Ok(())
}
