//! TLS chat server: listening socket, accept loop and shutdown sequencing.
//!
//! The server moves through `Starting → Listening → ShuttingDown → Stopped`.
//! Only the operator console (or the binary's Ctrl+C handler, via
//! [`Server::shutdown_token`]) can trigger the move to `ShuttingDown`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::console::ConsoleSink;
use crate::dispatch::{Dispatcher, DEFAULT_GREETING};
use crate::filter::WordFilter;
use crate::operator::OperatorConsole;
use crate::session::{Session, SessionRegistry};
use crate::style::Colour;
use crate::tls::{load_tls_config, TlsError};

pub const SHUTDOWN_NOTICE: &str = "Server shutdown, you have been disconnected.";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Listening,
    ShuttingDown,
    Stopped,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("credential error: {0}")]
    Credential(#[from] TlsError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    dispatcher: Arc<Dispatcher>,
    greeting: String,
    shutdown: CancellationToken,
    state: watch::Sender<ServerState>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.listener.local_addr().ok())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Load credentials and bind the listening socket.
    ///
    /// Any failure here is fatal: the server never reaches `Listening`.
    pub async fn bind(config: &ServerConfig, console: ConsoleSink) -> Result<Self, ServerError> {
        let (state, _) = watch::channel(ServerState::Starting);
        console.emit("Starting IRC Server", Some(Colour::Green), false);

        let acceptor = load_tls_config(&config.cert, &config.key)?;
        let filter = match &config.filter {
            Some(entries) => Some(WordFilter::new(entries.as_slice())?),
            None => None,
        }
        .filter(|filter| !filter.is_empty());

        let addr = SocketAddr::new(config.bind, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let dispatcher = Arc::new(Dispatcher::new(
            SessionRegistry::new(),
            config.style,
            filter,
            console,
        ));

        Ok(Self {
            listener,
            acceptor,
            dispatcher,
            greeting: config.banner.clone().unwrap_or_else(|| DEFAULT_GREETING.to_string()),
            shutdown: CancellationToken::new(),
            state,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SessionRegistry {
        self.dispatcher.registry().clone()
    }

    /// Cancelling this token starts the shutdown sequence.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Run until shutdown, reading operator commands from `operator_lines`.
    pub async fn run(self, operator_lines: mpsc::Receiver<String>) -> Result<(), ServerError> {
        let Server {
            listener,
            acceptor,
            dispatcher,
            greeting,
            shutdown,
            state,
        } = self;
        let console = dispatcher.console().clone();
        let style = dispatcher.style();
        let workers = TaskTracker::new();

        state.send_replace(ServerState::Listening);
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "chat server listening");
        }

        let operator = OperatorConsole::new(dispatcher.clone(), shutdown.clone());
        let console_task = tokio::spawn(operator.run(operator_lines));
        console.emit("Console Started.", Some(Colour::Green), true);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Connection {
                acceptor,
                dispatcher: dispatcher.clone(),
                greeting: Arc::from(style.paint(Colour::Green, &greeting)),
                shutdown: shutdown.clone(),
            },
            workers.clone(),
        ));
        console.emit("Server Started, awaiting clients.", Some(Colour::Green), true);

        shutdown.cancelled().await;

        state.send_replace(ServerState::ShuttingDown);
        tracing::info!("shutting down");
        let notice = style.paint(Colour::Green, SHUTDOWN_NOTICE);
        close_all(dispatcher.registry(), &notice).await;

        let listener = accept_task.await?;
        // A connection registered while the first sweep ran.
        close_all(dispatcher.registry(), &notice).await;
        console.emit("All clients disconnected", Some(Colour::Green), true);

        console_task.await?;
        workers.close();
        workers.wait().await;

        drop(listener);
        console.emit("IRC Server shutdown", Some(Colour::Green), true);
        state.send_replace(ServerState::Stopped);
        console.close();
        Ok(())
    }
}

async fn close_all(registry: &SessionRegistry, notice: &str) {
    for session in registry.active() {
        session.close_with_notice(notice).await;
    }
}

/// Everything a connection worker needs.
#[derive(Clone)]
struct Connection {
    acceptor: TlsAcceptor,
    dispatcher: Arc<Dispatcher>,
    greeting: Arc<str>,
    shutdown: CancellationToken,
}

/// Accept connections until shutdown, then hand the listener back so the
/// controller can close it last.
async fn accept_loop(listener: TcpListener, conn: Connection, workers: TaskTracker) -> TcpListener {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = conn.shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(?e, "failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            }
        };

        conn.dispatcher
            .console()
            .emit(&format!("Client accepted: {}", peer), Some(Colour::Green), true);
        workers.spawn(handle_connection(stream, peer, conn.clone()));

        let registry = conn.dispatcher.registry();
        let pruned = registry.prune();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = registry.len(), "removed inactive sessions");
        }
    }
    tracing::debug!("accept loop stopped");
    listener
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, conn: Connection) {
    let tls = match tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            tracing::warn!(%peer, ?e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            tracing::warn!(%peer, "TLS handshake timed out");
            return;
        }
    };

    let (reader, writer) = tokio::io::split(tls);
    let dispatcher = conn.dispatcher;
    let session = Session::new(Box::new(writer), Some(peer), dispatcher.style());
    let notice = dispatcher.style().paint(Colour::Green, SHUTDOWN_NOTICE);

    if conn.shutdown.is_cancelled() {
        tracing::debug!(%peer, "connection arrived during shutdown");
        session.close_with_notice(&notice).await;
        return;
    }

    session.send(&conn.greeting, false).await;
    dispatcher.registry().insert(session.clone());

    // Shutdown may have swept the registry between the check above and the
    // insert.
    if conn.shutdown.is_cancelled() {
        session.close_with_notice(&notice).await;
        return;
    }

    dispatcher.serve_session(session, reader).await;
}
