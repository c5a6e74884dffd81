// src/protocols/mod.rs
pub mod registry;
pub mod source;
pub mod ut3;

use async_trait::async_trait;
use log::debug;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};

use crate::models::server::QueryResult;

pub use registry::ProtocolRegistry;
pub use source::SourceQuery;
pub use ut3::Ut3Query;

/// Largest datagram any supported protocol answers with.
pub const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    Timeout,
    MalformedResponse(String),
    UnknownProtocol(String),
    Network(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timed out waiting for a response"),
            Self::MalformedResponse(reason) => write!(f, "Malformed response: {}", reason),
            Self::UnknownProtocol(id) => write!(f, "Unknown protocol: {}", id),
            Self::Network(reason) => write!(f, "Network error: {}", reason),
        }
    }
}

impl std::error::Error for QueryError {}

/// One wire protocol capable of fetching live server status.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Identifier used in the server list `type` field.
    fn name(&self) -> &'static str;

    async fn query(&self, addr: &str, port: u16, timeout: Duration) -> Result<QueryResult, QueryError>;
}

/// Resolves `addr` and opens a datagram socket connected to that single peer.
/// Dropping the returned socket releases it.
pub(crate) async fn connect_udp(addr: &str, port: u16) -> Result<UdpSocket, QueryError> {
    let peer = resolve(addr, port).await?;

    let bind = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind)
        .await
        .map_err(|e| QueryError::Network(format!("Could not bind udp socket: {}", e)))?;
    socket
        .connect(peer)
        .await
        .map_err(|e| QueryError::Network(format!("Could not connect to {}: {}", peer, e)))?;

    debug!("Opened query socket to {}", peer);
    Ok(socket)
}

async fn resolve(addr: &str, port: u16) -> Result<SocketAddr, QueryError> {
    let all: Vec<SocketAddr> = lookup_host((addr, port))
        .await
        .map_err(|e| QueryError::Network(format!("Could not resolve {}: {}", addr, e)))?
        .collect();
    // Game servers rarely listen on v6.
    all.iter()
        .find(|a| a.is_ipv4())
        .or_else(|| all.first())
        .copied()
        .ok_or_else(|| QueryError::Network(format!("No address found for {}", addr)))
}

pub(crate) async fn send(socket: &UdpSocket, packet: &[u8]) -> Result<(), QueryError> {
    socket
        .send(packet)
        .await
        .map(|_| ())
        .map_err(|e| QueryError::Network(format!("Failed to send request: {}", e)))
}

/// Waits for one datagram, bounded by `timeout`.
pub(crate) async fn recv(socket: &UdpSocket, timeout: Duration) -> Result<Vec<u8>, QueryError> {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    match tokio::time::timeout(timeout, socket.recv(&mut buffer)).await {
        Ok(Ok(len)) => {
            buffer.truncate(len);
            Ok(buffer)
        }
        Ok(Err(e)) => Err(QueryError::Network(format!("Failed to receive response: {}", e))),
        Err(_) => Err(QueryError::Timeout),
    }
}
