use crate::endpoints::{EndpointTable, ROBOTS_PATH};
use crate::listener::ListenerManager;
use crate::tarpit::tarpit_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, USER_AGENT};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Body served at `/robots.txt`
pub const ROBOTS_BODY: &str = "User-agent: *\nDisallow: /";

const NOT_FOUND_BODY: &str = "404 page not found\n";

/// Per-request state shared by every connection
struct GatewayState {
    endpoints: Arc<EndpointTable>,
    listeners: Arc<ListenerManager>,
    /// Drip interval when the tarpit is enabled
    tarpit: Option<Duration>,
}

/// The HTTP front door: answers knocks with a port number
pub struct GatewayServer {
    state: Arc<GatewayState>,
    shutdown_rx: watch::Receiver<bool>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl GatewayServer {
    pub fn new(
        endpoints: Arc<EndpointTable>,
        listeners: Arc<ListenerManager>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state: Arc::new(GatewayState {
                endpoints,
                listeners,
                tarpit: None,
            }),
            shutdown_rx,
            tls_acceptor: None,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    /// Feed unmatched routes into the tarpit, dripping once per `interval`
    pub fn with_tarpit(mut self, interval: Duration) -> Self {
        let state = GatewayState {
            endpoints: Arc::clone(&self.state.endpoints),
            listeners: Arc::clone(&self.state.listeners),
            tarpit: Some(interval),
        };
        self.state = Arc::new(state);
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }

    pub fn tarpit_enabled(&self) -> bool {
        self.state.tarpit.is_some()
    }

    /// Serve on a bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        let protocol = if self.tls_enabled() { "HTTPS" } else { "HTTP" };
        info!(
            addr = %local_addr,
            protocol,
            tarpit = self.tarpit_enabled(),
            gates = self.state.endpoints.len(),
            "Gateway listening"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        let tls_acceptor = self.tls_acceptor.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            let tls_acceptor = tls_acceptor.clone();

                            tokio::spawn(async move {
                                if let Some(acceptor) = tls_acceptor {
                                    match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            if let Err(e) = handle_connection(tls_stream, addr, state).await {
                                                debug!(addr = %addr, error = %e, "TLS connection error");
                                            }
                                        }
                                        Err(e) => {
                                            debug!(addr = %addr, error = %e, "TLS handshake failed");
                                        }
                                    }
                                } else if let Err(e) = handle_connection(stream, addr, state).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    state: Arc<GatewayState>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { handle_request(req, state, addr).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Access-logging wrapper around [`respond`]
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<GatewayState>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    info!(
        %request_id,
        remote_addr = %client_addr,
        agent,
        method = %req.method(),
        url = %req.uri(),
        "HTTP request"
    );

    let response = respond(&req, &state, client_addr);

    info!(
        %request_id,
        status = response.status().as_u16(),
        duration = ?started.elapsed(),
        "HTTP response"
    );

    Ok(response)
}

/// Route a request: robots, gate, then tarpit or plain 404
fn respond<B>(
    req: &Request<B>,
    state: &GatewayState,
    client_addr: SocketAddr,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let path = req.uri().path();

    if path == ROBOTS_PATH {
        return text_response(StatusCode::OK, ROBOTS_BODY);
    }

    if matches!(*req.method(), Method::GET | Method::HEAD) {
        if let Some(backend) = state.endpoints.resolve(path) {
            return knock(state, client_addr, path, backend);
        }
    }

    match state.tarpit {
        Some(interval) => tarpit_response(interval, client_addr),
        None => text_response(StatusCode::NOT_FOUND, NOT_FOUND_BODY),
    }
}

/// Open (or reuse) the caller's gate and answer with its port.
///
/// Bind failures are logged and answered with an empty body; the caller
/// learns nothing about why.
fn knock(
    state: &GatewayState,
    client_addr: SocketAddr,
    route: &str,
    backend: &str,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    match state.listeners.acquire(client_addr.ip(), backend) {
        Ok(port) => {
            debug!(remote_addr = %client_addr, route, port, "Gate open");
            text_response(StatusCode::OK, port.to_string())
        }
        Err(e) => {
            error!(remote_addr = %client_addr, route, error = %e, "Failed to open gate");
            text_response(StatusCode::OK, Bytes::new())
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(body.into()).map_err(|never| match never {}).boxed())
        .expect("valid response with StatusCode enum and static header")
}
