//! Listener lifecycle: bind, serve, drain.
//!
//! Each accepted connection holds a [`ConnectionGuard`] for as long as it is
//! being served. On shutdown the listener is dropped so no new connections are
//! accepted, and [`Server::run`] returns only once every guard is gone.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use super::tls;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// Terminal status of the serve loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Shut down on request after draining.
    Success,
    /// The listener failed for good; open connections were drained before
    /// returning.
    Failure,
}

impl ExitStatus {
    /// Process exit code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}

/// Counts open connections.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    open: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    #[must_use]
    pub fn new() -> Self {
        let (open, _) = watch::channel(0);
        Self { open: Arc::new(open) }
    }

    /// Register a connection; it counts as open until the guard drops.
    #[must_use]
    pub fn track(&self) -> ConnectionGuard {
        self.open.send_modify(|n| *n += 1);
        ConnectionGuard { open: Arc::clone(&self.open) }
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn open(&self) -> usize {
        *self.open.borrow()
    }

    /// Resolve once no connection is open.
    pub async fn wait_idle(&self) {
        let mut open = self.open.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = open.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one connection counted as open.
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// A bound listener, optionally terminating TLS.
pub struct Listener {
    tcp: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    /// Bind the configured address.
    ///
    /// TLS material is loaded before binding, so a bad certificate or key
    /// never leaves a socket open.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let tls = if config.tls.enabled { Some(tls::acceptor(&config.tls)?) } else { None };
        let tcp = TcpListener::bind(&config.address).await?;
        Ok(Self { tcp, tls })
    }

    /// Wrap an already bound socket without TLS.
    #[must_use]
    pub const fn from_tcp(tcp: TcpListener) -> Self {
        Self { tcp, tls: None }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.tcp.local_addr().ok())
            .field("tls", &self.is_tls())
            .finish()
    }
}

/// Serves a router on a listener until told to stop.
#[derive(Debug)]
pub struct Server {
    listener: Listener,
    router: Router,
    connections: ConnectionTracker,
}

impl Server {
    #[must_use]
    pub fn new(listener: Listener, router: Router) -> Self {
        Self { listener, router, connections: ConnectionTracker::new() }
    }

    /// Tracker for this server's connections.
    #[must_use]
    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves or accepting fails, then
    /// stop listening and wait for open connections to finish.
    pub async fn run<F>(self, shutdown: F) -> ExitStatus
    where
        F: Future<Output = ()> + Send,
    {
        let Self { listener: Listener { tcp, tls }, router, connections } = self;
        tokio::pin!(shutdown);

        let mut backoff = AcceptBackoff::default();
        let status = loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested, closing listener");
                    break ExitStatus::Success;
                }
                accepted = tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        backoff.reset();
                        let guard = connections.track();
                        tokio::spawn(serve_connection(stream, peer, tls.clone(), router.clone(), guard));
                    }
                    Err(e) => match AcceptError::classify(&e) {
                        AcceptError::Connection => {
                            tracing::debug!(error = %e, "Connection dropped before accept");
                        }
                        AcceptError::Temporary => {
                            let delay = backoff.next_delay();
                            tracing::warn!(error = %e, retry_in = ?delay, "Accept failed, retrying");
                            tokio::select! {
                                () = &mut shutdown => {
                                    tracing::info!("Shutdown requested, closing listener");
                                    break ExitStatus::Success;
                                }
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        AcceptError::Fatal => {
                            tracing::error!(error = %e, "Accept failed, shutting down");
                            break ExitStatus::Failure;
                        }
                    },
                },
            }
        };

        drop(tcp);
        tracing::info!(open_connections = connections.open(), "Draining connections");
        connections.wait_idle().await;
        tracing::info!(status = status.code(), "Server stopped");
        status
    }
}

/// Unix `ENFILE` and `EMFILE`; the same numbers on Linux, macOS and the BSDs.
const FILE_TABLE_FULL: [i32; 2] = [23, 24];

/// How the accept loop reacts to a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptError {
    /// The peer went away before the connection was accepted; skip it.
    Connection,
    /// Resource exhaustion or a timeout; retry after a delay.
    Temporary,
    /// The listener is unusable.
    Fatal,
}

impl AcceptError {
    fn classify(e: &io::Error) -> Self {
        if cfg!(unix) && e.raw_os_error().is_some_and(|code| FILE_TABLE_FULL.contains(&code)) {
            return Self::Temporary;
        }
        match e.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock => Self::Connection,
            io::ErrorKind::TimedOut | io::ErrorKind::OutOfMemory => Self::Temporary,
            _ => Self::Fatal,
        }
    }
}

/// Delay between retries of a temporarily failing accept: starts at 5 ms and
/// doubles up to 1 s. Reset after a successful accept.
#[derive(Debug, Default)]
struct AcceptBackoff {
    delay: Option<Duration>,
}

impl AcceptBackoff {
    const INITIAL: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    fn next_delay(&mut self) -> Duration {
        let delay = self.delay.map_or(Self::INITIAL, |d| (d * 2).min(Self::MAX));
        self.delay = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.delay = None;
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    router: Router,
    _guard: ConnectionGuard,
) {
    tracing::trace!(%peer, "Accepted connection");
    let served = match tls {
        None => serve_http(stream, router).await,
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => serve_http(stream, router).await,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "TLS handshake failed");
                return;
            }
        },
    };
    if let Err(e) = served {
        tracing::debug!(%peer, error = %e, "Connection closed with error");
    }
}

/// One request per connection: keep-alive is off.
async fn serve_http<S>(stream: S, router: Router) -> Result<(), hyper::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(router))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure.code(), 1);
    }

    #[test]
    fn test_tracker_counts_guards() {
        let tracker = ConnectionTracker::new();
        let a = tracker.track();
        let b = tracker.track();
        assert_eq!(tracker.open(), 2);
        drop(a);
        assert_eq!(tracker.open(), 1);
        drop(b);
        assert_eq!(tracker.open(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_after_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.wait_idle().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle_immediate_when_empty() {
        let tracker = ConnectionTracker::default();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait_idle()).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::new(Listener::from_tcp(tcp), Router::new());
        let status = server.run(async {}).await;
        assert_eq!(status, ExitStatus::Success);
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_exhaustion_is_retried() {
        for code in FILE_TABLE_FULL {
            let e = io::Error::from_raw_os_error(code);
            assert_eq!(AcceptError::classify(&e), AcceptError::Temporary, "{e}");
        }
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(AcceptError::classify(&timed_out), AcceptError::Temporary);
    }

    #[test]
    fn test_dropped_peer_is_skipped() {
        for kind in [io::ErrorKind::ConnectionAborted, io::ErrorKind::ConnectionReset] {
            assert_eq!(AcceptError::classify(&io::Error::from(kind)), AcceptError::Connection);
        }
    }

    #[test]
    fn test_unusable_listener_is_fatal() {
        let e = io::Error::from(io::ErrorKind::InvalidInput);
        assert_eq!(AcceptError::classify(&e), AcceptError::Fatal);
        let e = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(AcceptError::classify(&e), AcceptError::Fatal);
    }

    #[test]
    fn test_backoff_doubles_to_cap_and_resets() {
        let mut backoff = AcceptBackoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_bind_validates_tls_first() {
        let config = ServerConfig {
            address: "127.0.0.1:0".into(),
            tls: crate::config::TlsConfig { enabled: true, certificate_file: None, key_file: None },
        };
        assert!(matches!(
            Listener::bind(&config).await,
            Err(ServerError::MissingTlsMaterial { .. })
        ));
    }
}
