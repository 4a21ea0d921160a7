//! Engine error taxonomy.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a transfer session (or, for transport errors, the
/// whole process).
///
/// Timeouts, malformed frames, and wrong-session frames never appear here;
/// those are absorbed inside the state machines and drive retransmission
/// instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A retry budget ran out with the peer silent. The file is abandoned
    /// and the caller moves on to the next one.
    #[error("transfer of {name} stalled during {phase} after {attempts} unanswered retries")]
    SessionStalled {
        /// Basename of the abandoned file.
        name: String,
        /// Phase that stopped making progress.
        phase: &'static str,
        /// Retries spent before giving up.
        attempts: u32,
    },

    /// The verified-write (or stable-read) loop hit its attempt cap without
    /// ever observing a clean copy. The staging file is left in place.
    #[error("persistent corruption on {path} after {attempts} attempts")]
    PersistentCorruption {
        /// File that would not verify.
        path: PathBuf,
        /// Attempts spent before giving up.
        attempts: u32,
    },

    /// Local file I/O failed outright (distinct from silent corruption).
    #[error("file I/O on {path} failed")]
    File {
        /// File being accessed.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The datagram endpoint itself failed; retrying is pointless.
    #[error("datagram transport failed")]
    Transport(#[from] io::Error),
}

impl EngineError {
    /// Whether this error should end the process rather than the file.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
