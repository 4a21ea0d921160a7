//! Fixed-width wire field types: session hashes and packet ordinals.

use std::fmt;
use std::str;

use thiserror::Error;

use crate::{DIGEST_WIDTH, INDEX_WIDTH};

/// Rejected wire field contents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    /// A digest field held something other than forty lowercase hex chars.
    #[error("digest field is not 40 lowercase hex characters")]
    BadDigest,
    /// An index or count field held a non-digit byte.
    #[error("numeric field contains non-digit bytes")]
    NotNumeric,
    /// An index or count field decoded to a value outside its domain.
    #[error("numeric field value {0} out of range")]
    OutOfRange(u64),
}

/// SHA-1 of a file's basename, rendered as forty lowercase hex characters.
///
/// This is the in-flight session identifier: every DATA frame carries it, and
/// the receiver drops any frame whose hash does not match the active session.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHash {
    hex: [u8; DIGEST_WIDTH],
}

impl FileHash {
    /// Derives the session hash for a basename.
    #[must_use]
    pub fn of_basename(name: &str) -> Self {
        let hex = checksums::sha1_hex(name.as_bytes());
        let mut out = [0u8; DIGEST_WIDTH];
        out.copy_from_slice(hex.as_bytes());
        Self { hex: out }
    }

    /// Reconstructs a hash from its wire rendering.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, FieldError> {
        if bytes.len() != DIGEST_WIDTH || !is_lower_hex(bytes) {
            return Err(FieldError::BadDigest);
        }
        let mut out = [0u8; DIGEST_WIDTH];
        out.copy_from_slice(bytes);
        Ok(Self { hex: out })
    }

    /// The forty-byte wire rendering.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_WIDTH] {
        &self.hex
    }

    /// The hash as a `str` of hex characters.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Constructors only admit ASCII hex.
        str::from_utf8(&self.hex).unwrap_or_default()
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({})", self.as_str())
    }
}

/// Validates a hex digest field without constructing a [`FileHash`].
pub fn check_hex_digest(bytes: &[u8]) -> Result<(), FieldError> {
    if bytes.len() == DIGEST_WIDTH && is_lower_hex(bytes) {
        Ok(())
    } else {
        Err(FieldError::BadDigest)
    }
}

fn is_lower_hex(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

/// 1-based ordinal of a DATA packet within its file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketIndex(pub u32);

impl PacketIndex {
    /// Parses the sixteen-digit wire field.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, FieldError> {
        Ok(Self(parse_padded(bytes)?))
    }

    /// Renders the index as sixteen zero-padded decimal digits.
    #[must_use]
    pub fn to_wire(self) -> [u8; INDEX_WIDTH] {
        render_padded(self.0)
    }

    /// The zero-based position of this packet's payload within the file.
    #[must_use]
    pub fn byte_offset(self, payload_size: usize) -> u64 {
        u64::from(self.0 - 1) * payload_size as u64
    }
}

impl fmt::Display for PacketIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of DATA packets a file occupies; declared in the INIT frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PacketCount(pub u32);

/// Largest packet count accepted from the wire. Bounds the receiver's
/// bitset allocation against forged INIT frames.
pub const MAX_PACKET_COUNT: u32 = 16_777_216;

impl PacketCount {
    /// Packets needed for `len` bytes of file data: at least one, so an
    /// empty file still occupies a single zero-length packet.
    #[must_use]
    pub fn for_file_len(len: u64, payload_size: usize) -> Self {
        let chunks = len.div_ceil(payload_size as u64).max(1);
        Self(u32::try_from(chunks).unwrap_or(u32::MAX))
    }

    /// Parses the sixteen-digit wire field.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, FieldError> {
        let value = parse_padded(bytes)?;
        if value == 0 || value > MAX_PACKET_COUNT {
            return Err(FieldError::OutOfRange(u64::from(value)));
        }
        Ok(Self(value))
    }

    /// Renders the count as sixteen zero-padded decimal digits.
    #[must_use]
    pub fn to_wire(self) -> [u8; INDEX_WIDTH] {
        render_padded(self.0)
    }

    /// Whether `index` names a packet of a file this size.
    #[must_use]
    pub fn contains(self, index: PacketIndex) -> bool {
        index.0 >= 1 && index.0 <= self.0
    }
}

impl fmt::Display for PacketCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_padded(bytes: &[u8]) -> Result<u32, FieldError> {
    if bytes.len() != INDEX_WIDTH || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(FieldError::NotNumeric);
    }
    let mut value: u64 = 0;
    for b in bytes {
        value = value * 10 + u64::from(b - b'0');
        if value > u64::from(u32::MAX) {
            return Err(FieldError::OutOfRange(value));
        }
    }
    Ok(value as u32)
}

fn render_padded(value: u32) -> [u8; INDEX_WIDTH] {
    let mut out = [b'0'; INDEX_WIDTH];
    let digits = value.to_string();
    out[INDEX_WIDTH - digits.len()..].copy_from_slice(digits.as_bytes());
    out
}
