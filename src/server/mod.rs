//! Single-worker async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function. Connections are spawned with [`tokio::task::spawn_local`], so the
//! handler may hold `Rc` state such as a [`CacheLayer`](crate::cache::CacheLayer)
//! and [`Server::run`] must be polled inside a [`tokio::task::LocalSet`].
//! Persistent connections (keep-alive) are supported.

use std::future::Future;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The worker's HTTP front end.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use ringcache::server::Server;
/// use ringcache::http::{Response, StatusCode};
/// use tokio::task::LocalSet;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     LocalSet::new()
///         .run_until(server.run(|_req| async {
///             Response::new(StatusCode::Ok).body("Hello!")
///         }))
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives a [`Request`] and must return a [`Future`] that
    /// resolves to a [`Response`]. The handler is wrapped in an [`Rc`] and
    /// shared by every connection task on this worker; neither it nor its
    /// futures need to be `Send`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`tokio::task::LocalSet`].
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + 'static,
        F: Future<Output = Response> + 'static,
    {
        let handler = Rc::new(handler);
        info!(address = %self.local_addr, "ringcache listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Rc::clone(&handler);

            tokio::task::spawn_local(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Rc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F,
    F: Future<Output = Response>,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large; sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        // Attempt to parse the buffered data as an HTTP request.
        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request; sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await;
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "connection: close; shutting down");
            break;
        }
    }

    Ok(())
}
