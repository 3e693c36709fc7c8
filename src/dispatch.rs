//! Server-side protocol state machine.
//!
//! Each inbound frame from a session is parsed with [`command::parse`] and
//! executed against that session and the shared [`SessionRegistry`]. The
//! only state the dispatcher mutates is the session's own name and liveness.

use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::command::{self, Command};
use crate::console::ConsoleSink;
use crate::filter::WordFilter;
use crate::protocol::read_frame;
use crate::session::{Session, SessionRegistry};
use crate::style::{Colour, Style};

pub const CLIENT_HELP: &str = concat!(
    " - - - Help - - - \n",
    "/logout /l (To logout)\n",
    "/nick /n <name> (To change name)\n",
    "/msg /m <name> <message> (To send a private message)\n",
    "/users /u (Get a list of active users)\n",
    " - - - - - - - - - ",
);

pub const DEFAULT_GREETING: &str = "IRC Initialised | use /logout to exit or /help.";

pub const UNKNOWN_COMMAND: &str = "Unable to understand this command, refer /help /h.";

pub const MISSING_MESSAGE: &str = "msg is missing its message.";

/// Whether a worker keeps reading after handling a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Dispatcher {
    registry: SessionRegistry,
    style: Style,
    filter: Option<WordFilter>,
    console: ConsoleSink,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("style", &self.style)
            .field("filter", &self.filter.as_ref().map(|f| f.len()))
            .finish_non_exhaustive()
    }
}

/// Name used in messages for a session that has not announced one yet.
pub fn display_name(session: &Session) -> String {
    if session.is_named() {
        session.name()
    } else {
        "anonymous".to_string()
    }
}

/// `Clients: a, b.` for the current set of active sessions.
pub fn users_line(registry: &SessionRegistry) -> String {
    let names: Vec<String> = registry
        .list_active_names()
        .into_iter()
        .map(|name| if name.is_empty() { "anonymous".to_string() } else { name })
        .collect();
    if names.is_empty() {
        "Clients: none.".to_string()
    } else {
        format!("Clients: {}.", names.join(", "))
    }
}

impl Dispatcher {
    pub fn new(
        registry: SessionRegistry,
        style: Style,
        filter: Option<WordFilter>,
        console: ConsoleSink,
    ) -> Self {
        Self {
            registry,
            style,
            filter,
            console,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn console(&self) -> &ConsoleSink {
        &self.console
    }

    fn paint(&self, colour: Colour, text: &str) -> String {
        self.style.paint(colour, text)
    }

    /// Read frames from `reader` and dispatch them until the session stops,
    /// is closed from elsewhere, or the connection fails.
    pub async fn serve_session<R: AsyncRead + Unpin>(&self, session: Arc<Session>, mut reader: R) {
        loop {
            let result = tokio::select! {
                biased;
                _ = session.cancelled.cancelled() => {
                    // A failed send cancels the session from whichever task
                    // was writing; the session's own worker reports it.
                    if session.send_failed() {
                        self.fail_session(&session, &"write to peer failed").await;
                    }
                    break;
                }
                result = read_frame(&mut reader) => result,
            };

            match result {
                Ok(line) => {
                    if self.handle_frame(&session, &line).await == Flow::Stop {
                        break;
                    }
                }
                Err(e) => {
                    if session.is_active() || session.send_failed() {
                        self.fail_session(&session, &e).await;
                    }
                    break;
                }
            }
        }
        session.close().await;
        tracing::debug!(peer = %session.peer(), name = %session.name(), "session worker finished");
    }

    /// Execute one inbound frame.
    pub async fn handle_frame(&self, session: &Session, line: &str) -> Flow {
        tracing::debug!(peer = %session.peer(), name = %session.name(), %line, "frame received");

        match command::parse(line) {
            Command::Join { name } => self.join(session, &name).await,
            Command::Logout => {
                self.logout(session).await;
                return Flow::Stop;
            }
            Command::Help => session.send(CLIENT_HELP, false).await,
            Command::Msg { to, body } => {
                let text = self.paint(
                    Colour::Magenta,
                    &format!("Private message from {}: {}", display_name(session), body),
                );
                let delivered = self.registry.send_to_named(&to, &text, true).await;
                if delivered == 0 {
                    let err = format!("{} does not exist, check /users.", to);
                    session.send(&self.paint(Colour::Error, &err), true).await;
                }
            }
            Command::MsgMissingBody { .. } => {
                session.send(&self.paint(Colour::Error, MISSING_MESSAGE), true).await;
            }
            Command::Users => {
                let line = users_line(&self.registry);
                session.send(&self.paint(Colour::Cyan, &line), true).await;
            }
            Command::Chat { body } => self.chat(session, &body).await,
            Command::Empty => self.chat(session, "").await,
            Command::Kick { .. }
            | Command::Nick { .. }
            | Command::NickInvalid
            | Command::Shutdown
            | Command::Unknown => {
                session.send(&self.paint(Colour::Error, UNKNOWN_COMMAND), true).await;
            }
        }
        Flow::Continue
    }

    async fn join(&self, session: &Session, name: &str) {
        let first = !session.is_named();
        let old = session.set_name(name);
        self.console.emit(
            &format!("Client named: {} | {}", session.peer(), name),
            Some(Colour::Cyan),
            true,
        );

        if first {
            let text = self.paint(Colour::Green, &format!("{} has connected.", name));
            self.registry.broadcast_except(session, &text, true).await;
        } else {
            let notice = self.paint(Colour::Cyan, &format!("Name updated to {}", name));
            session.send(&notice, true).await;
            let text = self.paint(Colour::Cyan, &format!("{} has changed name to {}.", old, name));
            self.registry.broadcast_except(session, &text, true).await;
        }
    }

    async fn chat(&self, session: &Session, body: &str) {
        let name = display_name(session);
        self.console.emit(&format!("{} >> {}", name, body), None, true);

        let filtered = match &self.filter {
            Some(filter) => filter.apply(body),
            None => body.to_string(),
        };
        self.registry
            .broadcast_except(session, &format!("{}: {}", name, filtered), true)
            .await;
    }

    /// Acknowledge a logout, tell everyone else, and close the session.
    pub async fn logout(&self, session: &Session) {
        let name = display_name(session);
        session
            .send(&self.paint(Colour::Green, "Server: you have been logged out."), true)
            .await;
        let text = self.paint(Colour::Green, &format!("{} has disconnected.", name));
        self.registry.broadcast_except(session, &text, true).await;
        self.console.emit(
            &format!("Client Disconnect: {} | {}", session.peer(), name),
            Some(Colour::Error),
            true,
        );
        session.close().await;
    }

    /// Remove a session on the operator's behalf.
    pub async fn kick(&self, session: &Session, reason: &str) {
        let name = display_name(session);
        let notice = format!("Kicked by SERVER reason: {} | please logout with /logout", reason);
        session.send(&self.paint(Colour::Green, &notice), true).await;
        let text = self.paint(Colour::Green, &format!("{} has been kicked.", name));
        self.registry.broadcast_except(session, &text, true).await;
        self.console.emit(
            &format!("Client Kicked: {} | {}", session.peer(), name),
            Some(Colour::Error),
            true,
        );
        session.close().await;
    }

    async fn fail_session(&self, session: &Session, err: &(dyn std::fmt::Display + Sync)) {
        tracing::warn!(peer = %session.peer(), name = %session.name(), %err, "session failed");
        self.console.emit(
            &format!("Session error: {} | {}", session.peer(), display_name(session)),
            Some(Colour::Error),
            true,
        );
        self.logout(session).await;
    }
}
