#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `checksums` provides the SHA-1 digest primitives used throughout the fcp
//! workspace. SHA-1 is the protocol's integrity check: it names in-flight
//! sessions (the hash of a file's basename), guards individual data packets,
//! and backs the end-to-end confirmation handshake. It is used strictly for
//! integrity, never as a signature.
//!
//! # Design
//!
//! The crate wraps the RustCrypto `sha1` implementation behind a small
//! streaming [`Sha1`] type plus one-shot helpers that render digests in the
//! wire format the protocol expects: exactly forty lowercase hexadecimal
//! characters.
//!
//! # Invariants
//!
//! - [`sha1_hex`] always returns [`HEX_DIGEST_LEN`] lowercase hex characters.
//! - Streaming and one-shot digests of the same bytes are identical.

use digest::Digest;

/// Length in bytes of a raw SHA-1 digest.
pub const DIGEST_LEN: usize = 20;

/// Length in characters of a hex-rendered SHA-1 digest as carried on the wire.
pub const HEX_DIGEST_LEN: usize = 40;

/// Streaming SHA-1 hasher.
#[derive(Clone, Debug)]
pub struct Sha1 {
    inner: sha1::Sha1,
}

impl Default for Sha1 {
    fn default() -> Self {
        Self::new()
    }
}

impl Sha1 {
    /// Creates a hasher with an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: sha1::Sha1::new(),
        }
    }

    /// Feeds additional bytes into the digest state.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalises the digest and returns the 160-bit SHA-1 output.
    #[must_use]
    pub fn finalize(self) -> [u8; DIGEST_LEN] {
        self.inner.finalize().into()
    }

    /// Computes the SHA-1 digest of `data` in one shot.
    #[must_use]
    pub fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}

/// Renders a raw digest as lowercase hex.
#[must_use]
pub fn to_hex(digest: &[u8; DIGEST_LEN]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(HEX_DIGEST_LEN);
    for byte in digest {
        write!(&mut out, "{byte:02x}").expect("write! to String cannot fail");
    }
    out
}

/// Computes the SHA-1 of `data` rendered as forty lowercase hex characters.
///
/// This is the form every digest takes on the wire: session identifiers,
/// per-packet payload digests, and the end-to-end file digest.
#[must_use]
pub fn sha1_hex(data: &[u8]) -> String {
    to_hex(&Sha1::digest(data))
}
