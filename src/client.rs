//! Chat client: one TLS connection driven by a read worker and a write worker.
//!
//! The read worker prints every inbound frame. The write worker classifies
//! each local input line the same way the server would and either frames it
//! or answers it locally. Either worker stopping stops the other.

use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::command::{self, Command};
use crate::console::ConsoleSink;
use crate::dispatch::{MISSING_MESSAGE, UNKNOWN_COMMAND};
use crate::protocol::{read_frame, write_frame, FrameError};
use crate::style::{strip_colour, Colour};
use crate::tls::{server_name, TlsError};

pub const INVALID_NAME: &str = "Unable to understand name, refer to naming guide.";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the read worker may keep printing after a local logout, waiting
/// for the server's farewell and end of stream.
const LOGOUT_GRACE: Duration = Duration::from_secs(2);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("credential error: {0}")]
    Credential(#[from] TlsError),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    Handshake(io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub struct Client {
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Open a TLS connection to `host:port`, verifying the server against
    /// the connector's trusted roots.
    pub async fn connect(host: &str, port: u16, connector: TlsConnector) -> Result<Self, ClientError> {
        let domain = server_name(host)?;
        let addr = format!("{}:{}", host, port);
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let tls = tokio::time::timeout(HANDSHAKE_TIMEOUT, connector.connect(domain, tcp))
            .await
            .map_err(|_| {
                ClientError::Handshake(io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"))
            })?
            .map_err(ClientError::Handshake)?;

        tracing::info!(%addr, "connected");
        Ok(Self::from_stream(tls))
    }

    /// Wrap an already-established channel.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Announce `name`, then relay `input` lines to the server and print
    /// everything it sends until logout or disconnect.
    pub async fn run(
        self,
        name: &str,
        input: mpsc::Receiver<String>,
        sink: ConsoleSink,
    ) -> Result<(), ClientError> {
        let Client { reader, mut writer } = self;
        write_frame(&mut writer, &format!("##{}", name)).await?;

        let stop = CancellationToken::new();
        let mut read_task = tokio::spawn(read_worker(reader, sink.clone(), stop.clone()));
        let write_task = tokio::spawn(write_worker(writer, input, sink.clone(), stop.clone()));

        let written = write_task.await?;
        match tokio::time::timeout(LOGOUT_GRACE, &mut read_task).await {
            Ok(joined) => joined?,
            Err(_) => {
                stop.cancel();
                read_task.await?;
            }
        }

        sink.emit("Logging out of IRC server.", Some(Colour::Green), true);
        written.map_err(ClientError::from)
    }
}

async fn read_worker(mut reader: BoxedReader, sink: ConsoleSink, stop: CancellationToken) {
    loop {
        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = read_frame(&mut reader) => result,
        };
        match result {
            // Frames arrive already coloured by the server.
            Ok(text) if !sink.style().colour => sink.emit(&strip_colour(&text), None, false),
            Ok(text) => sink.emit(&text, None, false),
            Err(e) => {
                tracing::debug!(?e, "server channel closed");
                break;
            }
        }
    }
    stop.cancel();
}

/// Relay input until logout, end of input or disconnect. The channel is shut
/// down on the way out.
async fn write_worker(
    mut writer: BoxedWriter,
    mut input: mpsc::Receiver<String>,
    sink: ConsoleSink,
    stop: CancellationToken,
) -> Result<(), FrameError> {
    let result = relay(&mut writer, &mut input, &sink, &stop).await;
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(?e, "error shutting down client channel");
    }
    match result {
        // The server going away is a normal way for a session to end.
        Err(e) if e.is_disconnect() => {
            stop.cancel();
            Ok(())
        }
        other => other,
    }
}

async fn relay(
    writer: &mut BoxedWriter,
    input: &mut mpsc::Receiver<String>,
    sink: &ConsoleSink,
    stop: &CancellationToken,
) -> Result<(), FrameError> {
    loop {
        let line = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            line = input.recv() => line,
        };
        let Some(line) = line else {
            tracing::debug!("input closed, logging out");
            return write_frame(writer, "/logout").await;
        };

        match command::parse(&line) {
            Command::Empty => {}
            Command::Logout => return write_frame(writer, "/logout").await,
            Command::Help => write_frame(writer, "/help").await?,
            Command::Users => write_frame(writer, "/users").await?,
            Command::Msg { to, body } => write_frame(writer, &format!("/msg {} {}", to, body)).await?,
            Command::Nick { name } => write_frame(writer, &format!("##{}", name)).await?,
            Command::MsgMissingBody { .. } => sink.emit(MISSING_MESSAGE, Some(Colour::Error), true),
            Command::NickInvalid => sink.emit(INVALID_NAME, Some(Colour::Error), true),
            Command::Kick { .. } | Command::Shutdown | Command::Unknown => {
                sink.emit(UNKNOWN_COMMAND, Some(Colour::Error), true)
            }
            Command::Join { .. } | Command::Chat { .. } => match write_frame(writer, &line).await {
                Err(FrameError::PayloadTooLarge { len }) => {
                    tracing::warn!(len, "message too long, not sent");
                }
                other => other?,
            },
        }
    }
}
