#![deny(unsafe_code)]

//! # Overview
//!
//! `protocol` defines the wire format spoken between the fcp client and the
//! fcp server: eleven datagram frames, each introduced by a single ASCII tag
//! byte and laid out as a flat byte sequence with fixed-offset fields.
//! Integer fields travel as zero-padded ASCII decimal, digests as forty
//! lowercase hex characters, so a captured datagram is readable in a hex
//! dump without tooling.
//!
//! # Design
//!
//! [`Frame`] is the owned, decoded form; [`Frame::encode`] and
//! [`Frame::decode`] convert to and from raw datagrams. Decoding is strict:
//! anything short, non-numeric where digits are required, or carrying an
//! unknown tag fails with [`FrameError`], and the caller drops the datagram.
//! A corrupted datagram must never take a session down.
//!
//! The field newtypes [`FileHash`], [`PacketIndex`], and [`PacketCount`]
//! carry their own wire rendering so the fixed widths live in exactly one
//! place.
//!
//! # Invariants
//!
//! - `Frame::decode(&f.encode())` returns a frame equal to `f` for every
//!   well-formed frame.
//! - Decoding never panics on arbitrary input.

mod fields;
mod frame;

pub use fields::{FieldError, FileHash, MAX_PACKET_COUNT, PacketCount, PacketIndex};
pub use frame::{Frame, FrameError, Tag};

/// The digest carried by a DATA frame: SHA-1 over the session hash, the
/// index field in wire form, and the payload.
///
/// Covering the addressing fields and not just the payload means a bit flip
/// anywhere in a DATA frame fails verification; a flipped index would
/// otherwise commit a healthy payload at the wrong offset.
#[must_use]
pub fn data_packet_digest(fh: &FileHash, index: PacketIndex, payload: &[u8]) -> String {
    let mut hasher = checksums::Sha1::new();
    hasher.update(fh.as_bytes());
    hasher.update(&index.to_wire());
    hasher.update(payload);
    checksums::to_hex(&hasher.finalize())
}

/// File bytes carried by every DATA frame except possibly the last.
pub const PAYLOAD_SIZE: usize = 400;

/// Wire width of the zero-padded decimal index and count fields.
pub const INDEX_WIDTH: usize = 16;

/// Wire width of a hex-rendered SHA-1 digest field.
pub const DIGEST_WIDTH: usize = checksums::HEX_DIGEST_LEN;

/// Longest basename accepted on the wire, in bytes.
pub const MAX_BASENAME: usize = 255;

/// Largest possible encoded frame: a DATA frame with a full payload.
pub const MAX_FRAME_SIZE: usize = 1 + DIGEST_WIDTH + DIGEST_WIDTH + INDEX_WIDTH + PAYLOAD_SIZE;

/// UDP port the server listens on unless overridden.
pub const DEFAULT_PORT: u16 = 41500;
