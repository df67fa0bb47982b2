//! A caching front end for a deliberately slow synthetic upstream.
//!
//! Run with:
//!
//! ```text
//! RUST_LOG=ringcache=debug cargo run --example coalescing_proxy -- [config.json]
//! ```
//!
//! Fire several requests at once to watch them coalesce:
//!
//! ```text
//! for i in 1 2 3; do curl -si localhost:8080/api/report & done; wait
//! ```

use std::time::Duration;

use ringcache::cache::{CacheConfig, CacheLayer};
use ringcache::http::{Request, Response, StatusCode};
use ringcache::server::Server;
use tokio::task::LocalSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = r#"{
    "follower_timeout_ms": 5000,
    "pools": [
        { "name": "api", "slots": 128, "match": { "path_prefixes": ["/api/"] } },
        { "name": "assets", "slots": 32, "match": { "path_prefixes": ["/static/", "/img/"] } }
    ]
}"#;

const UPSTREAM_DELAY: Duration = Duration::from_millis(750);

async fn slow_upstream(req: Request) -> Response {
    tokio::time::sleep(UPSTREAM_DELAY).await;
    info!(path = %req.path(), "upstream fetch finished");
    Response::new(StatusCode::Ok)
        .header("Content-Type", "application/json")
        .body(format!(
            "{{\"path\":\"{}\",\"host\":\"{}\"}}",
            req.path(),
            req.host()
        ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ringcache=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::from_json_str(DEFAULT_CONFIG)?,
    };
    let layer = CacheLayer::from_config(&config);

    let server = Server::bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", server.local_addr());

    LocalSet::new()
        .run_until(server.run(move |req: Request| {
            let layer = layer.clone();
            async move { layer.handle(req, slow_upstream).await }
        }))
        .await?;

    Ok(())
}
