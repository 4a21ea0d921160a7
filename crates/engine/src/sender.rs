//! The client-side transfer state machine.
//!
//! One [`Sender::send_file`] call is one session, run in four phases:
//!
//! 1. handshake: INIT until the server answers INIT_ACK;
//! 2. data burst: every DATA frame back to back, pausing briefly every
//!    hundred packets so the receiver can drain;
//! 3. selective retransmission: answer each MISSING with that one packet
//!    until the server declares ALL_DONE;
//! 4. end-to-end: claim the file digest with REQ_CHK, acknowledge the
//!    verdict, and wait for FIN_ACK.
//!
//! Every phase reads with a timeout and resends on silence; retry budgets
//! turn a permanently silent peer into [`EngineError::SessionStalled`]
//! instead of an infinite loop.

use std::path::Path;
use std::time::Duration;

use logging::audit::{AuditEvent, AuditLog};
use logging::debug_log;
use nasty::{DatagramEndpoint, NastyFs};
use protocol::{FileHash, Frame, PAYLOAD_SIZE, PacketCount, PacketIndex};

use crate::wire::{recv_frame, send_frame};
use crate::{EngineError, stable_read};

/// Tunable parameters of the sender state machine.
#[derive(Clone, Copy, Debug)]
pub struct SenderConfig {
    /// Wait for INIT_ACK before resending INIT.
    pub init_timeout: Duration,
    /// Wait for MISSING / ALL_DONE / check verdicts before nudging.
    pub data_timeout: Duration,
    /// Pause after this many DATA frames during the burst.
    pub burst_every: usize,
    /// Length of the inter-burst pause.
    pub burst_pause: Duration,
    /// INIT transmissions before the handshake is abandoned.
    pub init_retry_budget: u32,
    /// Unanswered nudges or REQ_CHK resends before the session is abandoned.
    pub stall_retry_budget: u32,
    /// Attempt cap for the stable read of the source file.
    pub read_attempt_cap: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(2),
            data_timeout: Duration::from_secs(2),
            burst_every: 100,
            burst_pause: Duration::from_millis(350),
            init_retry_budget: 10,
            stall_retry_budget: 10,
            read_attempt_cap: 64,
        }
    }
}

/// How a completed session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The server confirmed the digest and promoted the file.
    Delivered,
    /// The server's staged digest mismatched; the failure is recorded and
    /// the staging file stays unpromoted.
    Rejected,
}

/// The client-side state machine. One instance serves a whole run; each
/// [`Sender::send_file`] call is an independent session.
pub struct Sender<'a, E: DatagramEndpoint> {
    endpoint: &'a mut E,
    fs: &'a NastyFs,
    audit: &'a AuditLog,
    config: SenderConfig,
}

impl<'a, E: DatagramEndpoint> Sender<'a, E> {
    /// Builds a sender over an endpoint and a nasty filesystem handle.
    pub fn new(
        endpoint: &'a mut E,
        fs: &'a NastyFs,
        audit: &'a AuditLog,
        config: SenderConfig,
    ) -> Self {
        Self {
            endpoint,
            fs,
            audit,
            config,
        }
    }

    /// Transfers one file and runs its end-to-end confirmation.
    pub fn send_file(&mut self, path: &Path, name: &str) -> Result<TransferOutcome, EngineError> {
        let bytes = stable_read(self.fs, path, self.config.read_attempt_cap)?;
        let file_sha1 = checksums::sha1_hex(&bytes);
        let fh = FileHash::of_basename(name);
        let count = PacketCount::for_file_len(bytes.len() as u64, PAYLOAD_SIZE);
        let frames = build_data_frames(&bytes, fh);
        debug_log!(
            Session,
            1,
            "{name}: {} bytes in {count} packets, digest {file_sha1}",
            bytes.len()
        );

        let attempt = self.handshake(name, count)?;
        self.burst(&frames)?;
        self.retransmit_until_all_done(name, fh, count, &frames)?;
        self.end_to_end(name, &file_sha1, attempt)
    }

    /// Phase I: INIT until a matching INIT_ACK arrives.
    fn handshake(&mut self, name: &str, count: PacketCount) -> Result<u32, EngineError> {
        let init = Frame::Init {
            count,
            name: name.to_owned(),
        };
        for attempt in 0..self.config.init_retry_budget {
            self.audit
                .emit(&AuditEvent::BeginTransmission { name, attempt });
            send_frame(self.endpoint, &init)?;
            while let Some(frame) = recv_frame(self.endpoint, self.config.init_timeout)? {
                match frame {
                    Frame::InitAck { name: acked } if acked == name => return Ok(attempt),
                    other => {
                        debug_log!(Send, 2, "{name}: ignoring {:?} during handshake", other.tag());
                    }
                }
            }
        }
        Err(EngineError::SessionStalled {
            name: name.to_owned(),
            phase: "handshake",
            attempts: self.config.init_retry_budget,
        })
    }

    /// Phase II: every DATA frame back to back with periodic pauses.
    fn burst(&mut self, frames: &[Frame]) -> Result<(), EngineError> {
        for (sent, frame) in frames.iter().enumerate() {
            if sent != 0 && sent % self.config.burst_every == 0 {
                std::thread::sleep(self.config.burst_pause);
            }
            send_frame(self.endpoint, frame)?;
        }
        Ok(())
    }

    /// Phase III: answer MISSING requests until ALL_DONE.
    fn retransmit_until_all_done(
        &mut self,
        name: &str,
        fh: FileHash,
        count: PacketCount,
        frames: &[Frame],
    ) -> Result<(), EngineError> {
        let mut stalls = 0u32;
        loop {
            match recv_frame(self.endpoint, self.config.data_timeout)? {
                Some(Frame::AllDone { fh: done }) if done == fh => return Ok(()),
                Some(Frame::Missing { index, fh: wanted }) if wanted == fh => {
                    if count.contains(index) {
                        stalls = 0;
                        debug_log!(Send, 1, "{name}: retransmitting packet {index}");
                        send_frame(self.endpoint, &frames[(index.0 - 1) as usize])?;
                    } else {
                        debug_log!(Send, 1, "{name}: MISSING {index} is out of range");
                    }
                }
                Some(other) => {
                    debug_log!(Send, 2, "{name}: ignoring {:?} during data phase", other.tag());
                }
                None => {
                    stalls += 1;
                    if stalls > self.config.stall_retry_budget {
                        return Err(EngineError::SessionStalled {
                            name: name.to_owned(),
                            phase: "data",
                            attempts: stalls,
                        });
                    }
                    // Nudge: re-offer the last packet so a receiver whose
                    // reconciliation datagrams all vanished speaks again.
                    if let Some(last) = frames.last() {
                        debug_log!(Send, 1, "{name}: silence, nudging with final packet");
                        send_frame(self.endpoint, last)?;
                    }
                }
            }
        }
    }

    /// Phase IV: digest claim, verdict, and session close.
    fn end_to_end(
        &mut self,
        name: &str,
        file_sha1: &str,
        attempt: u32,
    ) -> Result<TransferOutcome, EngineError> {
        self.audit
            .emit(&AuditEvent::TransmissionComplete { name, attempt });

        let request = Frame::ReqChk {
            file_sha1: file_sha1.to_owned(),
            name: name.to_owned(),
        };
        let mut resends = 0u32;
        let outcome = 'verdict: loop {
            send_frame(self.endpoint, &request)?;
            while let Some(frame) = recv_frame(self.endpoint, self.config.data_timeout)? {
                match frame {
                    Frame::ChkSucc { name: checked } if checked == name => {
                        self.audit
                            .emit(&AuditEvent::ClientCheckSucceeded { name, attempt });
                        break 'verdict TransferOutcome::Delivered;
                    }
                    Frame::ChkFail { name: checked } if checked == name => {
                        self.audit
                            .emit(&AuditEvent::ClientCheckFailed { name, attempt });
                        break 'verdict TransferOutcome::Rejected;
                    }
                    other => {
                        debug_log!(Send, 2, "{name}: ignoring {:?} awaiting verdict", other.tag());
                    }
                }
            }
            resends += 1;
            if resends > self.config.stall_retry_budget {
                return Err(EngineError::SessionStalled {
                    name: name.to_owned(),
                    phase: "confirm",
                    attempts: resends,
                });
            }
        };

        let ack = match outcome {
            TransferOutcome::Delivered => Frame::AckSucc {
                name: name.to_owned(),
            },
            TransferOutcome::Rejected => Frame::AckFail {
                name: name.to_owned(),
            },
        };
        let mut resends = 0u32;
        loop {
            send_frame(self.endpoint, &ack)?;
            while let Some(frame) = recv_frame(self.endpoint, self.config.data_timeout)? {
                match frame {
                    Frame::FinAck { name: closed } if closed == name => return Ok(outcome),
                    other => {
                        debug_log!(Send, 2, "{name}: ignoring {:?} awaiting FIN_ACK", other.tag());
                    }
                }
            }
            resends += 1;
            if resends > self.config.stall_retry_budget {
                // The verdict is already in; a lost FIN_ACK must not undo
                // it. Close the session locally and move on.
                debug_log!(Send, 1, "{name}: giving up on FIN_ACK after {resends} resends");
                return Ok(outcome);
            }
        }
    }
}

/// Pre-encodes every DATA frame for a file. An empty file still yields one
/// zero-length packet so all phases run.
fn build_data_frames(bytes: &[u8], fh: FileHash) -> Vec<Frame> {
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&[]]
    } else {
        bytes.chunks(PAYLOAD_SIZE).collect()
    };
    chunks
        .into_iter()
        .enumerate()
        .map(|(zero_based, payload)| {
            let index = PacketIndex(zero_based as u32 + 1);
            Frame::Data {
                packet_sha1: protocol::data_packet_digest(&fh, index, payload),
                fh,
                index,
                payload: payload.to_vec(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_builds_one_zero_length_frame() {
        let fh = FileHash::of_basename("empty");
        let frames = build_data_frames(b"", fh);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Data { index, payload, .. } => {
                assert_eq!(*index, PacketIndex(1));
                assert!(payload.is_empty());
            }
            other => panic!("expected DATA, got {other:?}"),
        }
    }

    #[test]
    fn exact_multiple_of_payload_size_has_full_last_frame() {
        let fh = FileHash::of_basename("aligned");
        let bytes = vec![7u8; PAYLOAD_SIZE * 3];
        let frames = build_data_frames(&bytes, fh);
        assert_eq!(frames.len(), 3);
        match &frames[2] {
            Frame::Data { payload, .. } => assert_eq!(payload.len(), PAYLOAD_SIZE),
            other => panic!("expected DATA, got {other:?}"),
        }
    }

    #[test]
    fn trailing_partial_chunk_is_short() {
        let fh = FileHash::of_basename("ragged");
        let bytes = vec![7u8; PAYLOAD_SIZE + 5];
        let frames = build_data_frames(&bytes, fh);
        assert_eq!(frames.len(), 2);
        match &frames[1] {
            Frame::Data { index, payload, packet_sha1, fh } => {
                assert_eq!(*index, PacketIndex(2));
                assert_eq!(payload.len(), 5);
                assert_eq!(*packet_sha1, protocol::data_packet_digest(fh, *index, payload));
            }
            other => panic!("expected DATA, got {other:?}"),
        }
    }
}
