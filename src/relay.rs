//! Raw TCP relay between an accepted gate connection and its backend

use crate::error::GateError;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Copy direction of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// How a relay ended
#[derive(Debug, Clone, Copy)]
pub struct RelaySummary {
    /// The direction whose copy finished first and tore the relay down
    pub finished: Direction,
    /// Bytes moved in that direction
    pub bytes: u64,
}

/// Dial `backend_addr` and shuttle bytes between it and `client`.
///
/// Both directions are copied concurrently. The first one to hit EOF or an
/// error ends the relay and both sockets are closed when they drop. A failed
/// dial closes `client` without sending anything.
pub async fn relay(
    mut client: TcpStream,
    backend_addr: &str,
    dial_timeout: Duration,
) -> Result<RelaySummary, GateError> {
    let mut backend = match tokio::time::timeout(dial_timeout, TcpStream::connect(backend_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(GateError::Dial {
                backend: backend_addr.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(GateError::DialTimeout {
                backend: backend_addr.to_string(),
            })
        }
    };

    let _ = client.set_nodelay(true);
    let _ = backend.set_nodelay(true);

    debug!(
        client = ?client.peer_addr().ok(),
        backend = %backend_addr,
        local = ?backend.local_addr().ok(),
        "Backend connected"
    );

    let (mut client_read, mut client_write) = client.split();
    let (mut backend_read, mut backend_write) = backend.split();

    let (finished, result) = tokio::select! {
        r = tokio::io::copy(&mut client_read, &mut backend_write) => (Direction::ClientToBackend, r),
        r = tokio::io::copy(&mut backend_read, &mut client_write) => (Direction::BackendToClient, r),
    };

    result
        .map(|bytes| RelaySummary { finished, bytes })
        .map_err(GateError::Relay)
}
