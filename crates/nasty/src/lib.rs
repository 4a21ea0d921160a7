#![deny(unsafe_code)]

//! # Overview
//!
//! `nasty` provides the adversarial I/O layer the protocol is designed to
//! survive: a datagram socket that drops, duplicates, and corrupts what it
//! sends, and a filesystem handle whose reads and writes silently flip bits.
//! Both take a numeric [`Nastiness`] level; level zero is a clean
//! passthrough, which is how the binaries behave in production-like runs.
//!
//! # Design
//!
//! Faults are driven by a seeded PRNG so a failing run can be replayed
//! bit-for-bit. The transfer engine never talks to `std::net` or `std::fs`
//! directly: the sender and receiver are generic over [`DatagramEndpoint`],
//! and all staging-file access goes through [`NastyFs`]. That keeps the
//! fault model in one crate and lets the test harness substitute an
//! in-memory endpoint with its own injector.
//!
//! # Invariants
//!
//! - Level zero injects no faults of any kind.
//! - Fault injection happens on the sending side only, so a link between
//!   two nasty sockets perturbs each direction exactly once.
//! - File corruption flips a single bit per affected operation; it never
//!   changes lengths or offsets.

mod file;
mod socket;

pub use file::NastyFs;
pub use socket::NastyDgmSocket;

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Highest accepted nastiness level.
pub const MAX_NASTINESS: u32 = 5;

/// A level was outside `0..=`[`MAX_NASTINESS`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("nastiness level {0} is out of range (0..={MAX_NASTINESS})")]
pub struct NastinessError(pub u32);

/// How aggressively an I/O wrapper misbehaves. Zero is a clean passthrough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nastiness(u8);

impl Nastiness {
    /// A clean passthrough.
    pub const NONE: Self = Self(0);

    /// Validates and wraps a level.
    pub fn new(level: u32) -> Result<Self, NastinessError> {
        if level > MAX_NASTINESS {
            return Err(NastinessError(level));
        }
        Ok(Self(level as u8))
    }

    /// The numeric level.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }

    /// Probability that a sent datagram is silently discarded.
    #[must_use]
    pub fn drop_probability(self) -> f64 {
        [0.0, 0.05, 0.10, 0.20, 0.30, 0.40][self.0 as usize]
    }

    /// Probability that a sent datagram goes out twice.
    #[must_use]
    pub fn duplicate_probability(self) -> f64 {
        [0.0, 0.02, 0.05, 0.10, 0.15, 0.20][self.0 as usize]
    }

    /// Probability that a sent datagram has one bit flipped.
    #[must_use]
    pub fn corrupt_probability(self) -> f64 {
        [0.0, 0.02, 0.05, 0.10, 0.15, 0.20][self.0 as usize]
    }

    /// Probability that a file read or write flips one bit.
    #[must_use]
    pub fn file_corrupt_probability(self) -> f64 {
        [0.0, 0.02, 0.05, 0.10, 0.20, 0.30][self.0 as usize]
    }
}

/// One unreliable datagram endpoint.
///
/// The transfer engine's sender and receiver are generic over this trait;
/// [`NastyDgmSocket`] implements it over UDP, and the test harness provides
/// an in-memory loopback implementation.
pub trait DatagramEndpoint {
    /// Sends one datagram to the connected (or last-seen) peer.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Waits up to `timeout` for one datagram.
    ///
    /// Returns `Ok(None)` when the timeout elapses with nothing to read, and
    /// `Ok(Some(len))` with the datagram copied into `buf` otherwise.
    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_zero_is_fault_free() {
        let clean = Nastiness::NONE;
        assert_eq!(clean.drop_probability(), 0.0);
        assert_eq!(clean.duplicate_probability(), 0.0);
        assert_eq!(clean.corrupt_probability(), 0.0);
        assert_eq!(clean.file_corrupt_probability(), 0.0);
    }

    #[test]
    fn levels_are_monotonic() {
        let mut previous = 0.0;
        for level in 0..=MAX_NASTINESS {
            let nastiness = Nastiness::new(level).expect("valid level");
            assert!(nastiness.drop_probability() >= previous);
            previous = nastiness.drop_probability();
        }
    }

    #[test]
    fn out_of_range_level_is_rejected() {
        assert_eq!(Nastiness::new(6), Err(NastinessError(6)));
        assert_eq!(Nastiness::new(u32::MAX), Err(NastinessError(u32::MAX)));
    }
}
