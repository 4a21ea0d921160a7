#![deny(unsafe_code)]

//! # Overview
//!
//! `test-support` provides the deterministic transport harness the
//! end-to-end scenarios run against: an in-memory datagram link whose two
//! [`LoopbackEndpoint`] halves implement [`nasty::DatagramEndpoint`], with a
//! per-direction [`FaultPlan`] injecting drops, duplicates, bit flips, and
//! delivery reordering from a seeded PRNG. The same transfer engine that
//! rides UDP in production rides this link in tests, replayable
//! bit-for-bit.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use nasty::DatagramEndpoint;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// In what order queued datagrams are handed to the reader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryOrder {
    /// Arrival order.
    #[default]
    Fifo,
    /// Newest first, so a burst is delivered in reverse.
    Lifo,
}

/// Fault profile for one direction of the link.
#[derive(Clone, Copy, Debug)]
pub struct FaultPlan {
    /// Probability a datagram is silently discarded.
    pub drop_rate: f64,
    /// Probability a datagram is enqueued twice.
    pub duplicate_rate: f64,
    /// Probability one bit of a datagram is flipped.
    pub corrupt_rate: f64,
    /// Datagrams shorter than this are never corrupted. Lets a scenario
    /// flip payload bits without also garbling the short control frames.
    pub corrupt_min_len: usize,
    /// Delivery order on the receiving side.
    pub order: DeliveryOrder,
    /// PRNG seed; equal seeds replay equal fault sequences.
    pub seed: u64,
}

impl FaultPlan {
    /// A fault-free FIFO link.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            drop_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            corrupt_min_len: 0,
            order: DeliveryOrder::Fifo,
            seed: 0,
        }
    }

    /// A clean link that drops the given fraction of datagrams.
    #[must_use]
    pub fn dropping(rate: f64, seed: u64) -> Self {
        Self {
            drop_rate: rate,
            ..Self::clean()
        }
        .seeded(seed)
    }

    /// A clean link that flips one bit in the given fraction of datagrams.
    #[must_use]
    pub fn corrupting(rate: f64, seed: u64) -> Self {
        Self {
            corrupt_rate: rate,
            ..Self::clean()
        }
        .seeded(seed)
    }

    /// The same plan with a different seed.
    #[must_use]
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The same plan with a different delivery order.
    #[must_use]
    pub fn ordered(mut self, order: DeliveryOrder) -> Self {
        self.order = order;
        self
    }

    /// The same plan corrupting only datagrams of at least `len` bytes.
    #[must_use]
    pub fn corrupting_only_at_least(mut self, len: usize) -> Self {
        self.corrupt_min_len = len;
        self
    }
}

#[derive(Default)]
struct Channel {
    queue: Mutex<VecDeque<Vec<u8>>>,
    signal: Condvar,
}

impl Channel {
    fn push(&self, datagram: Vec<u8>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(datagram);
            self.signal.notify_one();
        }
    }

    fn pop(&self, timeout: Duration, order: DeliveryOrder) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock().ok()?;
        loop {
            if !queue.is_empty() {
                return match order {
                    DeliveryOrder::Fifo => queue.pop_front(),
                    DeliveryOrder::Lifo => queue.pop_back(),
                };
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self.signal.wait_timeout(queue, remaining).ok()?;
            queue = guard;
        }
    }
}

/// One half of an in-memory datagram link.
pub struct LoopbackEndpoint {
    outgoing: Arc<Channel>,
    incoming: Arc<Channel>,
    plan: FaultPlan,
    rng: StdRng,
}

impl LoopbackEndpoint {
    /// Builds a link applying `plan` to both directions (with decorrelated
    /// seeds). Returns the two halves.
    #[must_use]
    pub fn pair(plan: FaultPlan) -> (Self, Self) {
        Self::pair_with(plan, FaultPlan { seed: plan.seed.wrapping_add(1), ..plan })
    }

    /// Builds a link with independent fault plans per direction:
    /// `a_to_b` governs what the first half sends, `b_to_a` the second.
    #[must_use]
    pub fn pair_with(a_to_b: FaultPlan, b_to_a: FaultPlan) -> (Self, Self) {
        let ab = Arc::new(Channel::default());
        let ba = Arc::new(Channel::default());
        let a = Self {
            outgoing: Arc::clone(&ab),
            incoming: Arc::clone(&ba),
            plan: a_to_b,
            rng: StdRng::seed_from_u64(a_to_b.seed),
        };
        let b = Self {
            outgoing: ba,
            incoming: ab,
            plan: b_to_a,
            rng: StdRng::seed_from_u64(b_to_a.seed),
        };
        (a, b)
    }

    /// Datagrams currently queued toward this endpoint.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.incoming.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl DatagramEndpoint for LoopbackEndpoint {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.plan.drop_rate > 0.0 && self.rng.gen_bool(self.plan.drop_rate) {
            return Ok(());
        }
        let mut copy = datagram.to_vec();
        if copy.len() >= self.plan.corrupt_min_len.max(1)
            && self.plan.corrupt_rate > 0.0
            && self.rng.gen_bool(self.plan.corrupt_rate)
        {
            let bit = self.rng.gen_range(0..copy.len() * 8);
            copy[bit / 8] ^= 1 << (bit % 8);
        }
        let duplicate =
            self.plan.duplicate_rate > 0.0 && self.rng.gen_bool(self.plan.duplicate_rate);
        self.outgoing.push(copy.clone());
        if duplicate {
            self.outgoing.push(copy);
        }
        Ok(())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        match self.incoming.pop(timeout, self.plan.order) {
            None => Ok(None),
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(Some(len))
            }
        }
    }
}

/// Writes `contents` to `dir/name` and returns the full path.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write test file");
    path
}

/// A fresh scratch directory, cleaned up when dropped.
#[must_use]
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create scratch dir")
}

/// `len` bytes of seed-determined noise.
#[must_use]
pub fn patterned_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_link_delivers_in_order() {
        let (mut a, mut b) = LoopbackEndpoint::pair(FaultPlan::clean());
        a.send(b"first").expect("send");
        a.send(b"second").expect("send");

        let mut buf = [0u8; 16];
        let len = b
            .recv_timeout(&mut buf, Duration::from_millis(50))
            .expect("recv")
            .expect("first datagram");
        assert_eq!(&buf[..len], b"first");
        let len = b
            .recv_timeout(&mut buf, Duration::from_millis(50))
            .expect("recv")
            .expect("second datagram");
        assert_eq!(&buf[..len], b"second");
    }

    #[test]
    fn lifo_link_reverses_a_burst() {
        let plan = FaultPlan::clean().ordered(DeliveryOrder::Lifo);
        let (mut a, mut b) = LoopbackEndpoint::pair_with(plan, FaultPlan::clean());
        a.send(b"1").expect("send");
        a.send(b"2").expect("send");
        a.send(b"3").expect("send");

        let mut buf = [0u8; 4];
        let mut seen = Vec::new();
        while let Some(len) = b
            .recv_timeout(&mut buf, Duration::from_millis(20))
            .expect("recv")
        {
            seen.push(buf[..len].to_vec());
        }
        assert_eq!(seen, vec![b"3".to_vec(), b"2".to_vec(), b"1".to_vec()]);
    }

    #[test]
    fn recv_times_out_on_an_idle_link() {
        let (_a, mut b) = LoopbackEndpoint::pair(FaultPlan::clean());
        let mut buf = [0u8; 4];
        let started = Instant::now();
        let got = b
            .recv_timeout(&mut buf, Duration::from_millis(30))
            .expect("recv");
        assert_eq!(got, None);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn full_drop_rate_delivers_nothing() {
        let (mut a, mut b) = LoopbackEndpoint::pair_with(
            FaultPlan::dropping(1.0, 9),
            FaultPlan::clean(),
        );
        a.send(b"void").expect("send");
        let mut buf = [0u8; 8];
        assert_eq!(
            b.recv_timeout(&mut buf, Duration::from_millis(20)).expect("recv"),
            None
        );
    }

    #[test]
    fn corrupting_link_flips_exactly_one_bit() {
        let (mut a, mut b) = LoopbackEndpoint::pair_with(
            FaultPlan::corrupting(1.0, 4),
            FaultPlan::clean(),
        );
        let original = patterned_bytes(64, 1);
        a.send(&original).expect("send");

        let mut buf = [0u8; 128];
        let len = b
            .recv_timeout(&mut buf, Duration::from_millis(20))
            .expect("recv")
            .expect("datagram");
        assert_eq!(len, original.len());
        let differing_bits: u32 = buf[..len]
            .iter()
            .zip(&original)
            .map(|(got, want)| (got ^ want).count_ones())
            .sum();
        assert_eq!(differing_bits, 1);
    }

    #[test]
    fn patterned_bytes_are_reproducible() {
        assert_eq!(patterned_bytes(256, 5), patterned_bytes(256, 5));
        assert_ne!(patterned_bytes(256, 5), patterned_bytes(256, 6));
    }
}
