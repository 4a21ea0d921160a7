//! Grading-audit emission.
//!
//! The protocol requires a fixed set of audit lines at defined state
//! transitions: transmission start, end-to-end entry, and the success or
//! failure verdict on each peer. [`AuditEvent`]'s `Display` impl is the
//! single source of truth for the exact wording; everything else routes
//! through an [`AuditLog`].
//!
//! The wording is load-bearing, since external graders match on these
//! strings, so variants render byte-for-byte what the table in the project
//! documentation promises, including the stray space before the first comma
//! in the transmission-start line.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One grading event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditEvent<'a> {
    /// Client is about to send INIT (once per INIT transmission).
    BeginTransmission {
        /// File basename.
        name: &'a str,
        /// INIT attempt counter, starting at zero.
        attempt: u32,
    },
    /// Client finished the data phase and entered end-to-end confirmation.
    TransmissionComplete {
        /// File basename.
        name: &'a str,
        /// Attempt counter carried over from the INIT phase.
        attempt: u32,
    },
    /// Client observed CHK_SUCC.
    ClientCheckSucceeded {
        /// File basename.
        name: &'a str,
        /// Attempt counter carried over from the INIT phase.
        attempt: u32,
    },
    /// Client observed CHK_FAIL.
    ClientCheckFailed {
        /// File basename.
        name: &'a str,
        /// Attempt counter carried over from the INIT phase.
        attempt: u32,
    },
    /// Server accepted an INIT and opened a session.
    StartingToReceive {
        /// File basename.
        name: &'a str,
    },
    /// Server committed every packet and sent ALL_DONE.
    ReceivedBeginningCheck {
        /// File basename.
        name: &'a str,
    },
    /// Server accepted ACK_SUCC and promoted the staging file.
    ServerCheckSucceeded {
        /// File basename.
        name: &'a str,
    },
    /// Server accepted ACK_FAIL and left the staging file in place.
    ServerCheckFailed {
        /// File basename.
        name: &'a str,
    },
}

impl fmt::Display for AuditEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeginTransmission { name, attempt } => {
                write!(f, "File: {name} , beginning transmission, attempt {attempt}")
            }
            Self::TransmissionComplete { name, attempt } => write!(
                f,
                "File: {name} transmission complete, waiting for end-to-end check, attempt {attempt}"
            ),
            Self::ClientCheckSucceeded { name, attempt } => write!(
                f,
                "File: {name} end-to-end check succeeded, attempt {attempt}"
            ),
            Self::ClientCheckFailed { name, attempt } => {
                write!(f, "File: {name} end-to-end check failed, attempt {attempt}")
            }
            Self::StartingToReceive { name } => {
                write!(f, "File: {name} starting to receive file")
            }
            Self::ReceivedBeginningCheck { name } => {
                write!(f, "File: {name} received, beginning end-to-end check")
            }
            Self::ServerCheckSucceeded { name } => {
                write!(f, "File: {name} end-to-end check succeeded")
            }
            Self::ServerCheckFailed { name } => {
                write!(f, "File: {name} end-to-end check failed")
            }
        }
    }
}

enum Sink {
    Discard,
    Writer(Box<dyn Write + Send>),
    Memory(Vec<String>),
}

/// Destination for grading events. Cheap to clone; clones share the sink.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<Mutex<Sink>>,
}

impl AuditLog {
    /// A log that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::from_sink(Sink::Discard)
    }

    /// A log that appends one line per event to the file at `path`.
    pub fn to_file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_sink(Sink::Writer(Box::new(file))))
    }

    /// A log that appends to an arbitrary writer.
    #[must_use]
    pub fn to_writer(writer: Box<dyn Write + Send>) -> Self {
        Self::from_sink(Sink::Writer(writer))
    }

    /// A log that records lines in memory for tests; read with
    /// [`AuditLog::recorded`].
    #[must_use]
    pub fn capture() -> Self {
        Self::from_sink(Sink::Memory(Vec::new()))
    }

    fn from_sink(sink: Sink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Emits one event. Sink failures are swallowed; audit must never take
    /// a transfer down.
    pub fn emit(&self, event: &AuditEvent<'_>) {
        if let Ok(mut sink) = self.sink.lock() {
            match &mut *sink {
                Sink::Discard => {}
                Sink::Writer(writer) => {
                    let _ = writeln!(writer, "{event}");
                }
                Sink::Memory(lines) => lines.push(event.to_string()),
            }
        }
    }

    /// Lines recorded so far by a [`AuditLog::capture`] log; `None` for
    /// other sinks.
    #[must_use]
    pub fn recorded(&self) -> Option<Vec<String>> {
        match self.sink.lock() {
            Ok(sink) => match &*sink {
                Sink::Memory(lines) => Some(lines.clone()),
                _ => None,
            },
            Err(_) => None,
        }
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuditLog")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wording_is_exact() {
        let cases = [
            (
                AuditEvent::BeginTransmission {
                    name: "a.txt",
                    attempt: 0,
                },
                "File: a.txt , beginning transmission, attempt 0",
            ),
            (
                AuditEvent::TransmissionComplete {
                    name: "a.txt",
                    attempt: 2,
                },
                "File: a.txt transmission complete, waiting for end-to-end check, attempt 2",
            ),
            (
                AuditEvent::ClientCheckSucceeded {
                    name: "a.txt",
                    attempt: 0,
                },
                "File: a.txt end-to-end check succeeded, attempt 0",
            ),
            (
                AuditEvent::ClientCheckFailed {
                    name: "a.txt",
                    attempt: 1,
                },
                "File: a.txt end-to-end check failed, attempt 1",
            ),
            (
                AuditEvent::StartingToReceive { name: "a.txt" },
                "File: a.txt starting to receive file",
            ),
            (
                AuditEvent::ReceivedBeginningCheck { name: "a.txt" },
                "File: a.txt received, beginning end-to-end check",
            ),
            (
                AuditEvent::ServerCheckSucceeded { name: "a.txt" },
                "File: a.txt end-to-end check succeeded",
            ),
            (
                AuditEvent::ServerCheckFailed { name: "a.txt" },
                "File: a.txt end-to-end check failed",
            ),
        ];
        for (event, expected) in cases {
            assert_eq!(event.to_string(), expected);
        }
    }

    #[test]
    fn capture_log_records_lines_in_order() {
        let log = AuditLog::capture();
        log.emit(&AuditEvent::StartingToReceive { name: "f" });
        log.emit(&AuditEvent::ServerCheckSucceeded { name: "f" });
        assert_eq!(
            log.recorded().unwrap(),
            vec![
                "File: f starting to receive file".to_owned(),
                "File: f end-to-end check succeeded".to_owned(),
            ]
        );
    }

    #[test]
    fn disabled_log_records_nothing() {
        let log = AuditLog::disabled();
        log.emit(&AuditEvent::StartingToReceive { name: "f" });
        assert_eq!(log.recorded(), None);
    }

    #[test]
    fn clones_share_one_sink() {
        let log = AuditLog::capture();
        let clone = log.clone();
        clone.emit(&AuditEvent::ServerCheckFailed { name: "g" });
        assert_eq!(log.recorded().unwrap().len(), 1);
    }

    #[test]
    fn file_log_appends_one_line_per_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grading.log");

        let log = AuditLog::to_file(&path).expect("open log");
        log.emit(&AuditEvent::StartingToReceive { name: "h" });
        log.emit(&AuditEvent::ServerCheckSucceeded { name: "h" });
        drop(log);

        let reopened = AuditLog::to_file(&path).expect("reopen log");
        reopened.emit(&AuditEvent::ServerCheckFailed { name: "i" });
        drop(reopened);

        let written = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                "File: h starting to receive file",
                "File: h end-to-end check succeeded",
                "File: i end-to-end check failed",
            ]
        );
    }
}
