//! # ringcache
//!
//! A pool-partitioned ring-buffer HTTP response cache with in-flight request
//! coalescing, hosted on a small async HTTP/1.1 server.
//!
//! Each worker owns an `Rc<PoolSet>` and runs its connections on a
//! [`tokio::task::LocalSet`]; nothing in the cache is shared across threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ringcache::cache::{CacheConfig, CacheLayer};
//! use ringcache::http::{Request, Response, StatusCode};
//! use ringcache::server::Server;
//! use tokio::task::LocalSet;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::from_json_str(
//!         r#"{ "pools": [{ "name": "api", "slots": 256, "match": { "path_prefixes": ["/api/"] } }] }"#,
//!     )?;
//!     let layer = CacheLayer::from_config(&config);
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     LocalSet::new()
//!         .run_until(server.run(move |req: Request| {
//!             let layer = layer.clone();
//!             async move {
//!                 layer
//!                     .handle(req, |_req| async {
//!                         Response::new(StatusCode::Ok).body("Hello, World!")
//!                     })
//!                     .await
//!             }
//!         }))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod http;
pub mod server;

pub use cache::{CacheConfig, CacheLayer, CacheStatus, PoolSet, RingCacheFilter};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
