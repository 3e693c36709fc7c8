//! Operator-facing console output with an optional append-only log file.
//!
//! This is the human-readable transcript of the server (joins, kicks, chat
//! echo, errors). Internal diagnostics go through `tracing` instead.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::style::{Colour, Style};

#[derive(Clone)]
enum Target {
    Stdout,
    Buffer(Arc<Mutex<Vec<String>>>),
}

/// Sink for console lines. Cheap to clone; clones share the log file.
#[derive(Clone)]
pub struct ConsoleSink {
    style: Style,
    target: Target,
    log_file: Option<Arc<Mutex<BufWriter<File>>>>,
}

impl std::fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleSink")
            .field("style", &self.style)
            .field("logging", &self.log_file.is_some())
            .finish_non_exhaustive()
    }
}

impl ConsoleSink {
    /// Print to stdout.
    pub fn stdout(style: Style) -> Self {
        Self {
            style,
            target: Target::Stdout,
            log_file: None,
        }
    }

    /// Record lines in memory instead of printing them. Returns the sink and
    /// a handle to the recorded lines (uncoloured).
    pub fn buffered() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Self {
            style: Style::plain(),
            target: Target::Buffer(lines.clone()),
            log_file: None,
        };
        (sink, lines)
    }

    /// Also append every line to `path`, creating it if needed.
    pub fn with_log_file(mut self, path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.log_file = Some(Arc::new(Mutex::new(BufWriter::new(file))));
        Ok(self)
    }

    pub fn style(&self) -> Style {
        self.style
    }

    /// Emit one console line.
    pub fn emit(&self, text: &str, colour: Option<Colour>, timestamp: bool) {
        let line = format!("{}{}", self.style.stamp(timestamp), text);

        if let Some(file) = &self.log_file {
            let mut file = file.lock();
            if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                tracing::warn!(?e, "failed to write console log file");
            }
        }

        match &self.target {
            Target::Stdout => {
                let rendered = match colour {
                    Some(colour) => self.style.paint(colour, &line),
                    None => line,
                };
                println!("{}", rendered);
            }
            Target::Buffer(lines) => lines.lock().push(line),
        }
    }

    /// Append a spacer to the log file and flush it.
    pub fn close(&self) {
        if let Some(file) = &self.log_file {
            let mut file = file.lock();
            let _ = writeln!(file, "\n \n \n ");
            let _ = file.flush();
        }
    }
}
