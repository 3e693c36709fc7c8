//! Text styling: ANSI colours and the short timestamp prefix.
//!
//! A [`Style`] is a small `Copy` value handed to every component that
//! produces user-visible text, so colour and timestamps can be switched off
//! (for logs, pipes or tests) without touching the message logic.

use chrono::Local;

/// ANSI colours used by the chat protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colour {
    Reset,
    Error,
    Green,
    Cyan,
    Magenta,
}

impl Colour {
    pub fn code(self) -> &'static str {
        match self {
            Self::Reset => "\x1b[0m",
            Self::Error => "\x1b[31m",
            Self::Green => "\x1b[32m",
            Self::Cyan => "\x1b[36m",
            Self::Magenta => "\x1b[35m",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    pub colour: bool,
    pub timestamps: bool,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            colour: true,
            timestamps: true,
        }
    }
}

impl Style {
    /// No colour codes and no timestamps.
    pub fn plain() -> Self {
        Self {
            colour: false,
            timestamps: false,
        }
    }

    /// Wrap `text` in `colour`, followed by a reset.
    pub fn paint(&self, colour: Colour, text: &str) -> String {
        if self.colour {
            format!("{}{}{}", colour.code(), text, Colour::Reset.code())
        } else {
            text.to_string()
        }
    }

    /// Prefix for a message: `"[HH:MM] "` in local time when `timestamped`
    /// is requested and timestamps are enabled, otherwise empty.
    pub fn stamp(&self, timestamped: bool) -> String {
        if timestamped && self.timestamps {
            timestamp()
        } else {
            String::new()
        }
    }
}

/// Current local time as `"[HH:MM] "`.
pub fn timestamp() -> String {
    format!("[{}] ", Local::now().format("%H:%M"))
}

/// Strip ANSI colour sequences from a string.
pub fn strip_colour(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
