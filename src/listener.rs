//! Per-client ephemeral listeners
//!
//! A knock from a client IP opens (or reuses) exactly one TCP listener for that
//! IP on an OS-assigned port. Each listener runs its own accept loop:
//!
//! - connections from any other source IP are dropped on the spot and the
//!   listener keeps waiting
//! - a connection from the knocking IP is relayed to the backend of the route
//!   that opened the gate
//! - when no connection arrives within the accept timeout, the listener closes
//!   unless one of its relays is still running, in which case it re-arms
//!
//! Relay counting uses an RAII guard so every exit path of a relay task
//! releases its slot.

use crate::config::GatePolicy;
use crate::error::GateError;
use crate::relay;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timing and reuse settings shared by every listener
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Accept deadline, re-armed after every accepted connection
    pub accept_timeout: Duration,
    /// Backend dial timeout for each relay
    pub dial_timeout: Duration,
    pub policy: GatePolicy,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_secs(2),
            dial_timeout: Duration::from_secs(10),
            policy: GatePolicy::MultiUse,
        }
    }
}

/// Bookkeeping for one open gate
struct ListenerRecord {
    /// Distinguishes this listener from a later one for the same IP
    id: u64,
    port: u16,
    backend: Arc<str>,
    active: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

/// Why an accept loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Idle,
    SingleUse,
    AcceptError,
}

/// Holds one slot of a listener's active relay count until dropped
struct ActiveRelay {
    counter: Arc<AtomicUsize>,
}

impl ActiveRelay {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for ActiveRelay {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns every open gate, keyed by client IP.
///
/// Like the other shared managers in this crate it is constructed behind an
/// `Arc`; [`acquire`](ListenerManager::acquire) needs `&Arc<Self>` because the
/// spawned accept loop keeps the manager alive to remove its own entry.
pub struct ListenerManager {
    listeners: Mutex<HashMap<IpAddr, ListenerRecord>>,
    settings: ListenerSettings,
    next_id: AtomicU64,
}

impl ListenerManager {
    pub fn new(settings: ListenerSettings) -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            settings,
            next_id: AtomicU64::new(1),
        })
    }

    /// Return the port of the gate for `client_ip`, opening one if needed.
    ///
    /// The lookup, bind and insert all happen under the table lock, so two
    /// concurrent knocks from one IP can never open two listeners. The lock
    /// is not held while anything awaits.
    pub fn acquire(self: &Arc<Self>, client_ip: IpAddr, backend: &str) -> Result<u16, GateError> {
        let client_ip = client_ip.to_canonical();
        let mut listeners = self.listeners.lock();

        if let Some(record) = listeners.get(&client_ip) {
            if &*record.backend != backend {
                debug!(
                    client_ip = %client_ip,
                    port = record.port,
                    open_backend = %record.backend,
                    requested_backend = %backend,
                    "Gate already open for a different backend"
                );
            }
            debug!(client_ip = %client_ip, port = record.port, "Reusing open gate");
            return Ok(record.port);
        }

        let listener = bind_ephemeral(client_ip)?;
        let port = listener.local_addr().map_err(GateError::Bind)?.port();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let backend: Arc<str> = Arc::from(backend);
        let active = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn(Arc::clone(self).accept_loop(
            client_ip,
            id,
            listener,
            Arc::clone(&backend),
            Arc::clone(&active),
        ));

        info!(client_ip = %client_ip, port, backend = %backend, "Listener opened");

        listeners.insert(
            client_ip,
            ListenerRecord {
                id,
                port,
                backend,
                active,
                task,
            },
        );

        Ok(port)
    }

    /// Port of the open gate for `client_ip`, if any
    pub fn port_for(&self, client_ip: IpAddr) -> Option<u16> {
        self.listeners
            .lock()
            .get(&client_ip.to_canonical())
            .map(|r| r.port)
    }

    /// Number of running relays accepted through `client_ip`'s gate
    pub fn active_relays(&self, client_ip: IpAddr) -> usize {
        self.listeners
            .lock()
            .get(&client_ip.to_canonical())
            .map(|r| r.active.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of open gates
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Stop every accept loop and close every listener.
    ///
    /// Relays already running are left alone; they end with their sockets.
    pub fn close_all(&self) {
        let drained: Vec<(IpAddr, ListenerRecord)> = self.listeners.lock().drain().collect();
        for (client_ip, record) in drained {
            record.task.abort();
            info!(client_ip = %client_ip, port = record.port, "Listener closed on shutdown");
        }
    }

    /// Remove `client_ip`'s entry, but only if it still belongs to listener `id`
    fn remove(&self, client_ip: IpAddr, id: u64) {
        let mut listeners = self.listeners.lock();
        if listeners.get(&client_ip).map(|r| r.id) == Some(id) {
            listeners.remove(&client_ip);
        }
    }

    async fn accept_loop(
        self: Arc<Self>,
        client_ip: IpAddr,
        id: u64,
        listener: TcpListener,
        backend: Arc<str>,
        active: Arc<AtomicUsize>,
    ) {
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
        let timeout = self.settings.accept_timeout;

        let reason = loop {
            let (stream, peer) = match tokio::time::timeout(timeout, listener.accept()).await {
                Err(_) => {
                    let relays = active.load(Ordering::SeqCst);
                    if relays > 0 {
                        debug!(client_ip = %client_ip, port, relays, "Accept deadline passed with active relays, re-arming");
                        continue;
                    }
                    break CloseReason::Idle;
                }
                Ok(Err(e)) => {
                    error!(client_ip = %client_ip, port, error = %GateError::Accept(e), "Listener failed");
                    break CloseReason::AcceptError;
                }
                Ok(Ok(accepted)) => accepted,
            };

            if peer.ip().to_canonical() != client_ip {
                warn!(
                    client_ip = %client_ip,
                    peer = %peer,
                    port,
                    "IP mismatch, connection rejected"
                );
                drop(stream);
                continue;
            }

            info!(client_ip = %client_ip, peer = %peer, port, backend = %backend, "Connection accepted");

            let guard = ActiveRelay::new(&active);
            tokio::spawn(run_relay(
                stream,
                peer,
                Arc::clone(&backend),
                self.settings.dial_timeout,
                guard,
            ));

            if self.settings.policy == GatePolicy::SingleUse {
                break CloseReason::SingleUse;
            }
        };

        // Unregister before closing so a knock never gets a dead port
        self.remove(client_ip, id);
        drop(listener);
        info!(client_ip = %client_ip, port, reason = ?reason, "Listener closed");
    }
}

/// Bind a listener on the wildcard address of the client's family, OS-assigned port
fn bind_ephemeral(client_ip: IpAddr) -> Result<TcpListener, GateError> {
    let wildcard: IpAddr = match client_ip {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };

    let std_listener =
        std::net::TcpListener::bind(SocketAddr::new(wildcard, 0)).map_err(GateError::Bind)?;
    std_listener.set_nonblocking(true).map_err(GateError::Bind)?;
    TcpListener::from_std(std_listener).map_err(GateError::Bind)
}

async fn run_relay(
    stream: TcpStream,
    peer: SocketAddr,
    backend: Arc<str>,
    dial_timeout: Duration,
    _slot: ActiveRelay,
) {
    match relay::relay(stream, &backend, dial_timeout).await {
        Ok(summary) => {
            info!(
                peer = %peer,
                backend = %backend,
                finished = %summary.finished,
                bytes = summary.bytes,
                "Relay closed"
            );
        }
        Err(e @ (GateError::Dial { .. } | GateError::DialTimeout { .. })) => {
            warn!(peer = %peer, backend = %backend, error = %e, "Backend dial failed");
        }
        Err(e) => {
            debug!(peer = %peer, backend = %backend, error = %e, "Relay closed with error");
        }
    }
}
