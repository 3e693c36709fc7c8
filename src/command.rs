//! Line tokenizer shared by the server dispatcher, the operator console and
//! the client input loop.
//!
//! Every inbound frame and every typed console line is parsed into a
//! [`Command`]. Each surface decides which variants it honours; anything it
//! does not accept is answered with its "unable to understand" reply.

/// A parsed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `##<name>`: name announcement (join or rename).
    Join { name: String },
    /// `/logout` or `/l`.
    Logout,
    /// `/help` or `/h`.
    Help,
    /// `/msg <name> <text>` or `/m <name> <text>`.
    Msg { to: String, body: String },
    /// `/msg <name>` with no text.
    MsgMissingBody { to: String },
    /// `/users` or `/u`.
    Users,
    /// `/kick <name> [reason]` or `/k <name> [reason]`.
    Kick { who: String, reason: String },
    /// `/nick <name>` or `/n <name>`.
    Nick { name: String },
    /// `/nick` or `/n` without a usable name.
    NickInvalid,
    /// `/shutdown` or `/s`.
    Shutdown,
    /// Any other line starting with `/`.
    Unknown,
    /// Plain chat text.
    Chat { body: String },
    /// Empty line.
    Empty,
}

/// Names are one or more ASCII letters or digits.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Parse one line into a [`Command`].
pub fn parse(line: &str) -> Command {
    if line.is_empty() {
        return Command::Empty;
    }

    if let Some(name) = line.strip_prefix("##") {
        if is_valid_name(name) {
            return Command::Join { name: name.to_string() };
        }
        return Command::Chat { body: line.to_string() };
    }

    if !line.starts_with('/') {
        return Command::Chat { body: line.to_string() };
    }

    let (verb, rest) = match line.split_once(' ') {
        Some((verb, rest)) => (verb, Some(rest)),
        None => (line, None),
    };

    match (verb, rest) {
        ("/logout" | "/l", None) => Command::Logout,
        ("/help" | "/h", None) => Command::Help,
        ("/users" | "/u", None) => Command::Users,
        ("/shutdown" | "/s", None) => Command::Shutdown,
        ("/msg" | "/m", Some(rest)) => parse_msg(rest),
        ("/kick" | "/k", Some(rest)) => parse_kick(rest),
        ("/nick" | "/n", Some(name)) if is_valid_name(name) => Command::Nick { name: name.to_string() },
        ("/nick" | "/n", _) => Command::NickInvalid,
        _ => Command::Unknown,
    }
}

fn parse_msg(rest: &str) -> Command {
    let (to, body) = match rest.split_once(' ') {
        Some((to, body)) => (to, body),
        None => (rest, ""),
    };
    if !is_valid_name(to) {
        return Command::Unknown;
    }
    if body.is_empty() {
        Command::MsgMissingBody { to: to.to_string() }
    } else {
        Command::Msg {
            to: to.to_string(),
            body: body.to_string(),
        }
    }
}

fn parse_kick(rest: &str) -> Command {
    let (who, reason) = match rest.split_once(' ') {
        Some((who, reason)) => (who, reason),
        None => (rest, ""),
    };
    if !is_valid_name(who) {
        return Command::Unknown;
    }
    Command::Kick {
        who: who.to_string(),
        reason: reason.to_string(),
    }
}
