//! # Request Server
//!
//! Single-flight TCP front end. Each accepted connection is read once, answered once and
//! closed before the next connection is accepted, so at most one transform runs at a time.
//! The CPU-bound pipeline runs on tokio's blocking pool and is awaited in place; a panic
//! inside it becomes an `ERROR:` reply instead of taking the server down.
//!
//! ## Failure Policy
//!
//! - Per-request errors are turned into an `ERROR: <description>` reply.
//! - A peer that disappears mid-exchange is logged at debug level and forgotten.
//! - Accept failures are logged and the loop keeps listening.
//! - Only binding the listener can fail the server as a whole.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::protocol::{self, Command, MAX_REQUEST_BYTES, PONG};
use crate::error::{classify, ServiceError, ServiceResult};
use crate::processing::UpscalePipeline;

pub struct RequestServer {
    listener: TcpListener,
    pipeline: Arc<UpscalePipeline>,
}

impl RequestServer {
    /// Bind the listening socket. Failure here is a startup error.
    pub async fn bind(addr: &str, pipeline: Arc<UpscalePipeline>) -> ServiceResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::startup(format!("could not listen on {}: {}", addr, e)))?;
        Ok(Self { listener, pipeline })
    }

    pub fn local_addr(&self) -> ServiceResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ServiceError::io("local_addr", e))
    }

    /// Serve until `shutdown` resolves. A request already being processed finishes first.
    pub async fn run_until<F>(self, shutdown: F) -> ServiceResult<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(
            "Upscale service listening on {} (engine {}, ratio {})",
            addr,
            self.pipeline.session().name(),
            self.pipeline.session().ratio()
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = self.serve_connection(stream, peer).await {
                            if classify::is_connection_reset(&e) {
                                debug!("Connection from {} dropped: {}", peer, e);
                            } else {
                                warn!("Connection from {} failed: {}", peer, e);
                            }
                        }
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }

        info!("Upscale service stopped");
        Ok(())
    }

    async fn serve_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> ServiceResult<()> {
        let mut buf = vec![0u8; MAX_REQUEST_BYTES];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| peer_error(e, peer, "read_request"))?;

        let text = String::from_utf8_lossy(&buf[..n]);
        let line = text.trim();
        if line.is_empty() {
            debug!("Empty request from {}", peer);
            return Ok(());
        }

        debug!("Request from {}: {}", peer, line);
        let reply = self.handle(line).await;

        stream
            .write_all(reply.as_bytes())
            .await
            .map_err(|e| peer_error(e, peer, "write_reply"))?;
        stream
            .shutdown()
            .await
            .map_err(|e| peer_error(e, peer, "close"))?;
        Ok(())
    }

    async fn handle(&self, line: &str) -> String {
        let request = match protocol::parse_request(line) {
            Ok(Command::Ping) => return PONG.to_string(),
            Ok(Command::Upscale(request)) => request,
            Err(e) => {
                warn!("Rejected request {:?}: {}", line, e);
                return protocol::error_reply(&e);
            }
        };

        let pipeline = Arc::clone(&self.pipeline);
        let result = tokio::task::spawn_blocking(move || pipeline.process(&request))
            .await
            .unwrap_or_else(|join| {
                Err(ServiceError::engine(
                    self.pipeline.session().name(),
                    format!("processing task aborted: {}", join),
                ))
            });

        match &result {
            Ok(outcome) => info!("Request done: {:?}", outcome),
            Err(e) => error!(category = e.category(), "Request failed: {}", e),
        }
        protocol::reply_for(&result)
    }
}

fn peer_error(error: std::io::Error, peer: SocketAddr, operation: &str) -> ServiceError {
    if classify::is_peer_gone(&error) {
        ServiceError::connection_reset(Some(peer.to_string())).with_operation(operation)
    } else {
        ServiceError::io(operation, error).with_metadata("peer", peer.to_string())
    }
}

/// Minimal client: send one request line and return the reply text.
pub async fn send_request(addr: &str, line: &str) -> ServiceResult<String> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ServiceError::io("connect", e).with_metadata("addr", addr))?;
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ServiceError::io("send_request", e))?;
    stream
        .shutdown()
        .await
        .map_err(|e| ServiceError::io("send_request", e))?;

    let mut reply = Vec::new();
    stream
        .read_to_end(&mut reply)
        .await
        .map_err(|e| ServiceError::io("read_reply", e))?;
    Ok(String::from_utf8_lossy(&reply).into_owned())
}
