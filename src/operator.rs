//! Privileged command loop for the person running the server.
//!
//! Lines come from the server's own terminal (see [`spawn_line_reader`]) and
//! act on the same registry the sessions use: private messages, user list,
//! kicks, server-wide announcements and shutdown.

use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::command::{self, Command};
use crate::dispatch::{users_line, Dispatcher, Flow, MISSING_MESSAGE, UNKNOWN_COMMAND};
use crate::style::Colour;

pub const OPERATOR_HELP: &str = concat!(
    " - - - Help - - - \n",
    "/shutdown /s (To shutdown the server)\n",
    "/msg /m <name> <message> (To send a private message)\n",
    "/users /u (Get a list of active users)\n",
    "/kick /k <name> <message> (To kick a user)\n",
    " - - - - - - - - - ",
);

/// Read lines from stdin on a dedicated OS thread.
///
/// A plain thread rather than `spawn_blocking`: a terminal read can block
/// forever and must not keep the runtime alive at exit.
pub fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!(?e, "failed to spawn stdin reader thread");
    }
    rx
}

#[derive(Debug)]
pub struct OperatorConsole {
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

impl OperatorConsole {
    pub fn new(dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Self {
        Self {
            dispatcher,
            shutdown,
        }
    }

    /// Process operator lines until shutdown is requested (here or
    /// elsewhere) or the input closes.
    pub async fn run(self, mut lines: mpsc::Receiver<String>) {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                line = lines.recv() => line,
            };
            match line {
                Some(line) => {
                    if self.execute(&line).await == Flow::Stop {
                        break;
                    }
                }
                None => {
                    tracing::info!("operator input closed, console disabled");
                    break;
                }
            }
        }
        tracing::debug!("operator console stopped");
    }

    /// Execute one operator line.
    pub async fn execute(&self, line: &str) -> Flow {
        let registry = self.dispatcher.registry();
        let console = self.dispatcher.console();
        let style = self.dispatcher.style();

        match command::parse(line) {
            Command::Empty => {}
            Command::Shutdown => {
                console.emit("Shutting down IRC Server", Some(Colour::Green), true);
                self.shutdown.cancel();
                return Flow::Stop;
            }
            Command::Help => console.emit(OPERATOR_HELP, None, false),
            Command::Msg { to, body } => {
                let text = style.paint(
                    Colour::Magenta,
                    &format!("Private message from SERVER: {}", body),
                );
                if registry.send_to_named(&to, &text, true).await == 0 {
                    console.emit(
                        &format!("{} does not exist, check /users.", to),
                        Some(Colour::Error),
                        true,
                    );
                }
            }
            Command::MsgMissingBody { .. } => {
                console.emit(MISSING_MESSAGE, Some(Colour::Error), true);
            }
            Command::Users => console.emit(&users_line(registry), Some(Colour::Cyan), true),
            Command::Kick { who, reason } => {
                let targets = registry.named(&who);
                if targets.is_empty() {
                    console.emit(
                        &format!("{} does not exist, check /users.", who),
                        Some(Colour::Error),
                        true,
                    );
                }
                for session in targets {
                    self.dispatcher.kick(&session, &reason).await;
                }
            }
            // Anything not starting with `/` is an announcement, including
            // lines that look like a name frame.
            Command::Chat { .. } | Command::Join { .. } => {
                registry.broadcast(&format!("SERVER: {}", line), true).await;
            }
            Command::Logout
            | Command::Nick { .. }
            | Command::NickInvalid
            | Command::Unknown => {
                console.emit(UNKNOWN_COMMAND, Some(Colour::Error), true);
            }
        }
        Flow::Continue
    }
}
