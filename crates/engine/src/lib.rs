#![deny(unsafe_code)]

//! # Overview
//!
//! `engine` holds the heart of fcp: the two state machines that move one
//! file at a time across an unreliable datagram link into an unreliable
//! filesystem, and the primitives they stand on.
//!
//! - [`Sender`] runs the client side of a transfer session: handshake,
//!   data burst, selective retransmission, and the end-to-end digest
//!   confirmation.
//! - [`Receiver`] runs the server side: it accepts one session at a time,
//!   commits packets with [`verified_write`], reconciles gaps with MISSING
//!   requests, and promotes the staging file only after the client confirms
//!   the end-to-end check.
//! - [`verified_write`] and [`stable_read`] defeat silent filesystem
//!   corruption by re-reading until digests agree.
//!
//! # Design
//!
//! Both machines are single-threaded loops over one datagram endpoint;
//! timeouts are what drive progress when datagrams go missing. Neither peer
//! buffers out-of-order packets in memory: the staging file, written at
//! each packet's own offset, is the reorder buffer. The sender keeps every
//! encoded DATA frame for the active file so any packet can be retransmitted
//! without touching the source file again.
//!
//! Timeouts, pacing, and retry budgets are configuration
//! ([`SenderConfig`], [`ReceiverConfig`]) threaded through the
//! constructors, so tests can run the same machines at millisecond scale.
//!
//! # Invariants
//!
//! - Each peer has at most one active session.
//! - A packet is marked received only after its verified write confirmed
//!   the staged bytes.
//! - The staging file is renamed to the final basename only after ACK_SUCC.
//! - Frames whose session hash does not match the active session are
//!   dropped without side effects.

mod bitset;
mod error;
mod receiver;
mod sender;
mod verify;
mod wire;

pub use bitset::ReceivedSet;
pub use error::EngineError;
pub use receiver::{Receiver, ReceiverConfig};
pub use sender::{Sender, SenderConfig, TransferOutcome};
pub use verify::{stable_read, verified_write};
