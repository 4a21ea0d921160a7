//! The server-side receive state machine and session dispatcher.
//!
//! The receiver is a single loop over one datagram endpoint. It holds at
//! most one active session; INIT frames are accepted only between sessions,
//! and everything else is routed by tag into the active session or dropped.
//! Within a session:
//!
//! - DATA packets bound to the session hash are committed to the staging
//!   file with a verified write at their own offset (the staging file is
//!   the reorder buffer, so arrival order is irrelevant);
//! - a read timeout (or a complete bitset) triggers reconciliation: one
//!   MISSING per gap, or a settle pause followed by ALL_DONE when none
//!   remain;
//! - the end-to-end phase recomputes the staged digest per REQ_CHK and
//!   promotes `<name>.tmp` to `<name>` only on ACK_SUCC.
//!
//! A short ring of recently finished sessions keeps the receiver answering
//! duplicated REQ_CHK and ACK frames idempotently after it has gone idle.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use logging::audit::{AuditEvent, AuditLog};
use logging::debug_log;
use nasty::{DatagramEndpoint, NastyFs};
use protocol::{FileHash, Frame, PAYLOAD_SIZE, PacketCount, PacketIndex};

use crate::wire::{recv_frame, send_frame};
use crate::{EngineError, ReceivedSet, stable_read, verified_write};

/// Tunable parameters of the receive state machine.
#[derive(Clone, Copy, Debug)]
pub struct ReceiverConfig {
    /// Socket read timeout; its expiry triggers reconciliation.
    pub recv_timeout: Duration,
    /// Pause before ALL_DONE so straggling duplicates can drain.
    pub settle_delay: Duration,
    /// Attempt cap for each verified write.
    pub write_attempt_cap: u32,
    /// How many finished sessions keep answering duplicate frames.
    pub finished_memory: usize,
    /// A session silent for this long is abandoned so the receiver can
    /// accept a new one. Must exceed the client's total retry patience.
    pub session_expiry: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_secs(1),
            write_attempt_cap: 64,
            finished_memory: 8,
            session_expiry: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Receiving,
    E2ePending,
}

struct Session {
    name: String,
    fh: FileHash,
    count: PacketCount,
    received: ReceivedSet,
    staging: PathBuf,
    phase: Phase,
    last_heard: Instant,
}

struct FinishedSession {
    name: String,
    delivered: bool,
}

/// The server-side state machine. Owns the endpoint and serves sessions
/// until the process ends.
pub struct Receiver<E: DatagramEndpoint> {
    endpoint: E,
    fs: NastyFs,
    target: PathBuf,
    audit: AuditLog,
    config: ReceiverConfig,
    active: Option<Session>,
    finished: VecDeque<FinishedSession>,
}

impl<E: DatagramEndpoint> Receiver<E> {
    /// Builds a receiver writing into `target`.
    pub fn new(
        endpoint: E,
        fs: NastyFs,
        target: PathBuf,
        audit: AuditLog,
        config: ReceiverConfig,
    ) -> Self {
        Self {
            endpoint,
            fs,
            target,
            audit,
            config,
            active: None,
            finished: VecDeque::new(),
        }
    }

    /// Serves forever. Returns only on a fatal transport error.
    pub fn run(&mut self) -> Result<(), EngineError> {
        loop {
            self.step()?;
        }
    }

    /// One scheduling quantum: wait for a frame (or the reconciliation
    /// timeout) and advance the state machine.
    ///
    /// Exposed so a test harness can drive the receiver on its own thread
    /// and stop it between quanta.
    pub fn step(&mut self) -> Result<(), EngineError> {
        match recv_frame(&mut self.endpoint, self.config.recv_timeout)? {
            Some(frame) => self.dispatch(frame),
            None => self.on_timeout(),
        }
    }

    /// Whether a session is currently open.
    #[must_use]
    pub fn has_active_session(&self) -> bool {
        self.active.is_some()
    }

    fn dispatch(&mut self, frame: Frame) -> Result<(), EngineError> {
        match frame {
            Frame::Init { count, name } => self.on_init(count, name),
            Frame::Data {
                packet_sha1,
                fh,
                index,
                payload,
            } => self.on_data(&packet_sha1, fh, index, &payload),
            Frame::ReqChk { file_sha1, name } => self.on_req_chk(&file_sha1, &name),
            Frame::AckSucc { name } => self.on_ack(&name, true),
            Frame::AckFail { name } => self.on_ack(&name, false),
            other => {
                debug_log!(Recv, 2, "dropping out-of-state {:?}", other.tag());
                Ok(())
            }
        }
    }

    fn on_init(&mut self, count: PacketCount, name: String) -> Result<(), EngineError> {
        if let Some(session) = &mut self.active {
            if session.name == name && session.count == count {
                // Our INIT_ACK was lost; answer again, touch nothing else.
                session.last_heard = Instant::now();
                return send_frame(&mut self.endpoint, &Frame::InitAck { name });
            }
            // A session no packet has ever been committed to may be the
            // residue of a corrupted INIT; a non-matching INIT replaces it.
            // One committed packet pins the session until it closes or
            // expires.
            let untouched =
                session.phase == Phase::Receiving && session.received.committed() == 0;
            if !untouched {
                debug_log!(
                    Recv,
                    1,
                    "rejecting INIT for {name} while {} is active",
                    session.name
                );
                return Ok(());
            }
            debug_log!(
                Session,
                1,
                "replacing untouched session {} on INIT for {name}",
                session.name
            );
            self.active = None;
        }

        let staging = self.target.join(format!("{name}.tmp"));
        if let Err(err) = self.fs.create_empty(&staging) {
            debug_log!(Recv, 1, "cannot open staging file {}: {err}", staging.display());
            return Ok(());
        }
        self.audit.emit(&AuditEvent::StartingToReceive { name: &name });
        debug_log!(Session, 1, "session open: {name}, {count} packets");
        send_frame(&mut self.endpoint, &Frame::InitAck { name: name.clone() })?;
        self.active = Some(Session {
            fh: FileHash::of_basename(&name),
            name,
            count,
            received: ReceivedSet::new(count),
            staging,
            phase: Phase::Receiving,
            last_heard: Instant::now(),
        });
        Ok(())
    }

    fn on_data(
        &mut self,
        packet_sha1: &str,
        fh: FileHash,
        index: PacketIndex,
        payload: &[u8],
    ) -> Result<(), EngineError> {
        let Some(session) = &mut self.active else {
            debug_log!(Recv, 2, "dropping DATA with no session open");
            return Ok(());
        };
        if session.fh != fh {
            debug_log!(Recv, 2, "dropping DATA bound to another session");
            return Ok(());
        }
        session.last_heard = Instant::now();
        if session.phase == Phase::E2ePending {
            // The client never saw our ALL_DONE and is still nudging.
            return send_frame(&mut self.endpoint, &Frame::AllDone { fh });
        }
        if !session.count.contains(index) {
            debug_log!(Recv, 1, "dropping DATA with out-of-range index {index}");
            return Ok(());
        }
        if protocol::data_packet_digest(&fh, index, payload) != packet_sha1 {
            debug_log!(Recv, 1, "dropping corrupt DATA {index}");
            return Ok(());
        }
        if session.received.contains(index) {
            debug_log!(Recv, 2, "dropping duplicate DATA {index}");
            return Ok(());
        }

        let offset = index.byte_offset(PAYLOAD_SIZE);
        match verified_write(
            &self.fs,
            &session.staging,
            offset,
            payload,
            self.config.write_attempt_cap,
        ) {
            Ok(_) => {
                session.received.insert(index);
                debug_log!(
                    Recv,
                    2,
                    "committed packet {index} ({}/{})",
                    session.received.committed(),
                    session.count
                );
                if session.received.is_complete() {
                    return self.reconcile();
                }
                Ok(())
            }
            Err(err @ EngineError::PersistentCorruption { .. }) => {
                // Abandon the session, leave the staging file for autopsy.
                debug_log!(Recv, 1, "abandoning {}: {err}", session.name);
                self.active = None;
                Ok(())
            }
            Err(err @ EngineError::File { .. }) => {
                debug_log!(Recv, 1, "abandoning {}: {err}", session.name);
                self.active = None;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn on_timeout(&mut self) -> Result<(), EngineError> {
        let Some(session) = &self.active else {
            return Ok(());
        };
        if session.last_heard.elapsed() >= self.config.session_expiry {
            // The client went away. Free the slot; the staging file stays.
            debug_log!(Session, 1, "expiring silent session {}", session.name);
            self.active = None;
            return Ok(());
        }
        if session.phase == Phase::Receiving {
            return self.reconcile();
        }
        Ok(())
    }

    /// Scans the bitset: one MISSING per gap, or ALL_DONE when none remain.
    fn reconcile(&mut self) -> Result<(), EngineError> {
        let Some(session) = &mut self.active else {
            return Ok(());
        };
        let gaps = session.received.missing();
        if gaps.is_empty() {
            // Let straggling duplicates overtake before we change phase.
            std::thread::sleep(self.config.settle_delay);
            session.phase = Phase::E2ePending;
            let fh = session.fh;
            let name = session.name.clone();
            send_frame(&mut self.endpoint, &Frame::AllDone { fh })?;
            self.audit
                .emit(&AuditEvent::ReceivedBeginningCheck { name: &name });
            debug_log!(Session, 1, "{name}: complete, awaiting end-to-end check");
            return Ok(());
        }
        debug_log!(
            Recv,
            1,
            "{}: requesting {} missing packets",
            session.name,
            gaps.len()
        );
        let fh = session.fh;
        for index in gaps {
            send_frame(&mut self.endpoint, &Frame::Missing { index, fh })?;
        }
        Ok(())
    }

    fn on_req_chk(&mut self, claimed_sha1: &str, name: &str) -> Result<(), EngineError> {
        if let Some(session) = &mut self.active {
            if session.name != name || session.phase != Phase::E2ePending {
                debug_log!(Recv, 2, "dropping out-of-state REQ_CHK for {name}");
                return Ok(());
            }
            session.last_heard = Instant::now();
            // Recomputed per request with a stabilized read: a single nasty
            // read could flip a bit and turn a correct transfer into a
            // terminal CHK_FAIL.
            let staged = match stable_read(
                &self.fs,
                &session.staging,
                self.config.write_attempt_cap,
            ) {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug_log!(Recv, 1, "cannot digest {}: {err}", session.staging.display());
                    return Ok(());
                }
            };
            let verdict = checksums::sha1_hex(&staged) == claimed_sha1;
            debug_log!(
                Recv,
                1,
                "{name}: end-to-end digest {}",
                if verdict { "matches" } else { "MISMATCHES" }
            );
            let reply = if verdict {
                Frame::ChkSucc {
                    name: name.to_owned(),
                }
            } else {
                Frame::ChkFail {
                    name: name.to_owned(),
                }
            };
            return send_frame(&mut self.endpoint, &reply);
        }

        // Session already closed: replay the recorded verdict so a client
        // that lost our CHK datagram can still converge.
        if let Some(done) = self.finished.iter().find(|f| f.name == name) {
            let reply = if done.delivered {
                Frame::ChkSucc {
                    name: name.to_owned(),
                }
            } else {
                Frame::ChkFail {
                    name: name.to_owned(),
                }
            };
            return send_frame(&mut self.endpoint, &reply);
        }
        debug_log!(Recv, 2, "dropping REQ_CHK for unknown file {name}");
        Ok(())
    }

    fn on_ack(&mut self, name: &str, delivered: bool) -> Result<(), EngineError> {
        let matches_active = self
            .active
            .as_ref()
            .is_some_and(|s| s.name == name && s.phase == Phase::E2ePending);
        if matches_active {
            let Some(session) = self.active.take() else {
                return Ok(());
            };
            if delivered {
                let final_path = self.target.join(&session.name);
                if let Err(err) = self.fs.rename(&session.staging, &final_path) {
                    debug_log!(Recv, 1, "cannot promote {}: {err}", session.staging.display());
                }
                self.audit
                    .emit(&AuditEvent::ServerCheckSucceeded { name: &session.name });
            } else {
                // The staging file stays put; it is never deleted here.
                self.audit
                    .emit(&AuditEvent::ServerCheckFailed { name: &session.name });
            }
            debug_log!(Session, 1, "session closed: {name}, delivered={delivered}");
            self.remember_finished(session.name, delivered);
            return send_frame(
                &mut self.endpoint,
                &Frame::FinAck {
                    name: name.to_owned(),
                },
            );
        }

        if self.finished.iter().any(|f| f.name == name) {
            // Duplicate ACK after close; FIN_ACK again until the client
            // goes quiet.
            return send_frame(
                &mut self.endpoint,
                &Frame::FinAck {
                    name: name.to_owned(),
                },
            );
        }
        debug_log!(Recv, 2, "dropping ACK for unknown file {name}");
        Ok(())
    }

    fn remember_finished(&mut self, name: String, delivered: bool) {
        self.finished.retain(|f| f.name != name);
        self.finished.push_back(FinishedSession { name, delivered });
        while self.finished.len() > self.config.finished_memory {
            self.finished.pop_front();
        }
    }
}
