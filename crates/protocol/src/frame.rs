//! Frame encoding and decoding.
//!
//! Every datagram is one frame: a tag byte followed by fixed-offset fields.
//! The layouts are documented on [`Frame`]; the widths come from the crate
//! constants so sender and receiver can never disagree about where a field
//! starts.

use std::fmt;

use thiserror::Error;

use crate::fields::check_hex_digest;
use crate::{
    DIGEST_WIDTH, FieldError, FileHash, INDEX_WIDTH, MAX_BASENAME, PAYLOAD_SIZE, PacketCount,
    PacketIndex,
};

/// One-byte frame discriminators.
///
/// The values are printable ASCII so a captured datagram identifies itself in
/// a hex dump.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Client opens a session: packet count and basename.
    Init = b'8',
    /// Server accepts a session.
    InitAck = b'$',
    /// One payload chunk.
    Data = b'9',
    /// Server has committed every packet.
    AllDone = b'!',
    /// Server requests retransmission of one packet.
    Missing = b'@',
    /// Client asks for the end-to-end digest comparison.
    ReqChk = b'0',
    /// Server's staged digest matched the client's claim.
    ChkSucc = b'2',
    /// Server's staged digest did not match.
    ChkFail = b'3',
    /// Client confirms success; server may promote the staging file.
    AckSucc = b'5',
    /// Client reports failure; staging file is left in place.
    AckFail = b'6',
    /// Server closes the session.
    FinAck = b'7',
}

impl Tag {
    /// Maps a wire byte to its tag.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'8' => Some(Self::Init),
            b'$' => Some(Self::InitAck),
            b'9' => Some(Self::Data),
            b'!' => Some(Self::AllDone),
            b'@' => Some(Self::Missing),
            b'0' => Some(Self::ReqChk),
            b'2' => Some(Self::ChkSucc),
            b'3' => Some(Self::ChkFail),
            b'5' => Some(Self::AckSucc),
            b'6' => Some(Self::AckFail),
            b'7' => Some(Self::FinAck),
            _ => None,
        }
    }

    /// The wire byte for this tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a datagram failed to decode. Malformed frames are dropped, never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Zero-length datagram.
    #[error("empty datagram")]
    Empty,
    /// The tag byte names no known frame.
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    /// The datagram ends before the tag's fixed fields do.
    #[error("{tag} frame of {len} bytes is shorter than the minimum {min}")]
    TooShort {
        /// Frame type being decoded.
        tag: Tag,
        /// Observed datagram length.
        len: usize,
        /// Minimum length for this tag.
        min: usize,
    },
    /// A digest, index, or count field failed validation.
    #[error(transparent)]
    Field(#[from] FieldError),
    /// A DATA payload longer than the protocol chunk size.
    #[error("payload of {0} bytes exceeds the {PAYLOAD_SIZE}-byte chunk size")]
    PayloadOversize(usize),
    /// The basename field was empty, overlong, not UTF-8, or contained a
    /// path separator or NUL.
    #[error("unacceptable basename field")]
    BadBasename,
}

/// A decoded protocol frame.
///
/// Field order in each variant mirrors the wire layout after the tag byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// `8` ‖ count[16] ‖ basename: client opens a session.
    Init {
        /// Number of DATA packets the file occupies.
        count: PacketCount,
        /// Basename of the file being transferred.
        name: String,
    },
    /// `$` ‖ basename: server accepts the session.
    InitAck {
        /// Basename echoed back to the client.
        name: String,
    },
    /// `9` ‖ packet-sha1[40] ‖ fh[40] ‖ index[16] ‖ payload.
    Data {
        /// [`crate::data_packet_digest`] over `fh`, `index`, and `payload`;
        /// checked on receive so a flipped bit anywhere in the frame fails
        /// verification.
        packet_sha1: String,
        /// Session identifier binding the packet to its file.
        fh: FileHash,
        /// 1-based packet ordinal.
        index: PacketIndex,
        /// File bytes; `PAYLOAD_SIZE` except possibly the last packet.
        payload: Vec<u8>,
    },
    /// `!` ‖ fh[40]: every packet is committed; move to end-to-end.
    AllDone {
        /// Session identifier.
        fh: FileHash,
    },
    /// `@` ‖ index[16] ‖ fh[40]: retransmission request.
    Missing {
        /// Packet the receiver has not committed.
        index: PacketIndex,
        /// Session identifier.
        fh: FileHash,
    },
    /// `0` ‖ file-sha1[40] ‖ basename: end-to-end digest claim.
    ReqChk {
        /// Client's digest of the source file.
        file_sha1: String,
        /// Basename the claim is about.
        name: String,
    },
    /// `2` ‖ basename: staged digest matched.
    ChkSucc {
        /// Basename the verdict is about.
        name: String,
    },
    /// `3` ‖ basename: staged digest mismatched.
    ChkFail {
        /// Basename the verdict is about.
        name: String,
    },
    /// `5` ‖ basename: client confirms; promote the staging file.
    AckSucc {
        /// Basename being confirmed.
        name: String,
    },
    /// `6` ‖ basename: client reports failure; staging file stays.
    AckFail {
        /// Basename being reported.
        name: String,
    },
    /// `7` ‖ basename: server closes the session.
    FinAck {
        /// Basename of the closed session.
        name: String,
    },
}

impl Frame {
    /// The tag byte this frame encodes under.
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Self::Init { .. } => Tag::Init,
            Self::InitAck { .. } => Tag::InitAck,
            Self::Data { .. } => Tag::Data,
            Self::AllDone { .. } => Tag::AllDone,
            Self::Missing { .. } => Tag::Missing,
            Self::ReqChk { .. } => Tag::ReqChk,
            Self::ChkSucc { .. } => Tag::ChkSucc,
            Self::ChkFail { .. } => Tag::ChkFail,
            Self::AckSucc { .. } => Tag::AckSucc,
            Self::AckFail { .. } => Tag::AckFail,
            Self::FinAck { .. } => Tag::FinAck,
        }
    }

    /// Encodes the frame as a datagram.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(crate::MAX_FRAME_SIZE);
        out.push(self.tag().as_byte());
        match self {
            Self::Init { count, name } => {
                out.extend_from_slice(&count.to_wire());
                out.extend_from_slice(name.as_bytes());
            }
            Self::Data {
                packet_sha1,
                fh,
                index,
                payload,
            } => {
                out.extend_from_slice(packet_sha1.as_bytes());
                out.extend_from_slice(fh.as_bytes());
                out.extend_from_slice(&index.to_wire());
                out.extend_from_slice(payload);
            }
            Self::AllDone { fh } => {
                out.extend_from_slice(fh.as_bytes());
            }
            Self::Missing { index, fh } => {
                out.extend_from_slice(&index.to_wire());
                out.extend_from_slice(fh.as_bytes());
            }
            Self::ReqChk { file_sha1, name } => {
                out.extend_from_slice(file_sha1.as_bytes());
                out.extend_from_slice(name.as_bytes());
            }
            Self::InitAck { name }
            | Self::ChkSucc { name }
            | Self::ChkFail { name }
            | Self::AckSucc { name }
            | Self::AckFail { name }
            | Self::FinAck { name } => {
                out.extend_from_slice(name.as_bytes());
            }
        }
        out
    }

    /// Decodes a datagram.
    ///
    /// Rejects short frames, non-digit numeric fields, non-hex digest
    /// fields, oversize payloads, unacceptable basenames, and unknown tags.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let (&tag_byte, body) = buf.split_first().ok_or(FrameError::Empty)?;
        let tag = Tag::from_byte(tag_byte).ok_or(FrameError::UnknownTag(tag_byte))?;
        match tag {
            Tag::Init => {
                let body = require(tag, body, INDEX_WIDTH + 1, buf.len())?;
                let count = PacketCount::from_wire(&body[..INDEX_WIDTH])?;
                let name = decode_basename(&body[INDEX_WIDTH..])?;
                Ok(Self::Init { count, name })
            }
            Tag::Data => {
                let body = require(tag, body, 2 * DIGEST_WIDTH + INDEX_WIDTH, buf.len())?;
                let packet_sha1 = decode_digest(&body[..DIGEST_WIDTH])?;
                let fh = FileHash::from_wire(&body[DIGEST_WIDTH..2 * DIGEST_WIDTH])?;
                let index =
                    PacketIndex::from_wire(&body[2 * DIGEST_WIDTH..2 * DIGEST_WIDTH + INDEX_WIDTH])?;
                let payload = body[2 * DIGEST_WIDTH + INDEX_WIDTH..].to_vec();
                if payload.len() > PAYLOAD_SIZE {
                    return Err(FrameError::PayloadOversize(payload.len()));
                }
                Ok(Self::Data {
                    packet_sha1,
                    fh,
                    index,
                    payload,
                })
            }
            Tag::AllDone => {
                let body = require(tag, body, DIGEST_WIDTH, buf.len())?;
                let fh = FileHash::from_wire(&body[..DIGEST_WIDTH])?;
                Ok(Self::AllDone { fh })
            }
            Tag::Missing => {
                let body = require(tag, body, INDEX_WIDTH + DIGEST_WIDTH, buf.len())?;
                let index = PacketIndex::from_wire(&body[..INDEX_WIDTH])?;
                let fh = FileHash::from_wire(&body[INDEX_WIDTH..INDEX_WIDTH + DIGEST_WIDTH])?;
                Ok(Self::Missing { index, fh })
            }
            Tag::ReqChk => {
                let body = require(tag, body, DIGEST_WIDTH + 1, buf.len())?;
                let file_sha1 = decode_digest(&body[..DIGEST_WIDTH])?;
                let name = decode_basename(&body[DIGEST_WIDTH..])?;
                Ok(Self::ReqChk { file_sha1, name })
            }
            Tag::InitAck | Tag::ChkSucc | Tag::ChkFail | Tag::AckSucc | Tag::AckFail
            | Tag::FinAck => {
                let name = decode_basename(body)?;
                Ok(match tag {
                    Tag::InitAck => Self::InitAck { name },
                    Tag::ChkSucc => Self::ChkSucc { name },
                    Tag::ChkFail => Self::ChkFail { name },
                    Tag::AckSucc => Self::AckSucc { name },
                    Tag::AckFail => Self::AckFail { name },
                    _ => Self::FinAck { name },
                })
            }
        }
    }
}

fn require(tag: Tag, body: &[u8], min: usize, datagram_len: usize) -> Result<&[u8], FrameError> {
    if body.len() < min {
        Err(FrameError::TooShort {
            tag,
            len: datagram_len,
            min: min + 1,
        })
    } else {
        Ok(body)
    }
}

fn decode_digest(bytes: &[u8]) -> Result<String, FrameError> {
    check_hex_digest(bytes)?;
    // check_hex_digest admits only ASCII hex.
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn decode_basename(bytes: &[u8]) -> Result<String, FrameError> {
    if bytes.is_empty() || bytes.len() > MAX_BASENAME {
        return Err(FrameError::BadBasename);
    }
    let name = std::str::from_utf8(bytes).map_err(|_| FrameError::BadBasename)?;
    if name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(FrameError::BadBasename);
    }
    Ok(name.to_owned())
}
