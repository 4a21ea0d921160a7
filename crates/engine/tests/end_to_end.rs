//! End-to-end transfer scenarios over the deterministic loopback link.
//!
//! Each test wires a real [`Sender`] to a real [`Receiver`] through
//! `test-support`'s fault-injecting endpoint and asserts the invariant that
//! matters: the promoted file is byte-equal to the source, or the failure
//! is recorded and nothing is promoted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use engine::{EngineError, Receiver, ReceiverConfig, Sender, SenderConfig, TransferOutcome};
use logging::audit::AuditLog;
use nasty::{DatagramEndpoint, Nastiness, NastyFs};
use protocol::{FileHash, Frame, PAYLOAD_SIZE, PacketCount, PacketIndex};
use tempfile::tempdir;
use test_support::{DeliveryOrder, FaultPlan, LoopbackEndpoint, patterned_bytes, write_file};

fn fast_sender_config() -> SenderConfig {
    SenderConfig {
        init_timeout: Duration::from_millis(200),
        data_timeout: Duration::from_millis(200),
        burst_every: 100,
        burst_pause: Duration::from_millis(5),
        init_retry_budget: 25,
        stall_retry_budget: 25,
        read_attempt_cap: 64,
    }
}

fn fast_receiver_config() -> ReceiverConfig {
    ReceiverConfig {
        recv_timeout: Duration::from_millis(100),
        settle_delay: Duration::from_millis(20),
        write_attempt_cap: 64,
        finished_memory: 8,
        session_expiry: Duration::from_secs(30),
    }
}

struct ServerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    audit: AuditLog,
    target: PathBuf,
}

impl ServerHandle {
    fn shutdown(self) -> (AuditLog, PathBuf) {
        self.stop.store(true, Ordering::Relaxed);
        self.thread.join().expect("receiver thread");
        (self.audit, self.target)
    }
}

fn spawn_receiver(
    endpoint: LoopbackEndpoint,
    target: &Path,
    file_nastiness: Nastiness,
    seed: u64,
) -> ServerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let audit = AuditLog::capture();
    let target = target.to_path_buf();

    let thread = {
        let stop = Arc::clone(&stop);
        let audit = audit.clone();
        let target = target.clone();
        std::thread::spawn(move || {
            let fs = NastyFs::with_seed(file_nastiness, seed);
            let mut receiver =
                Receiver::new(endpoint, fs, target, audit, fast_receiver_config());
            while !stop.load(Ordering::Relaxed) {
                if receiver.step().is_err() {
                    break;
                }
            }
        })
    };

    ServerHandle {
        stop,
        thread,
        audit,
        target,
    }
}

fn run_transfer(
    client_end: &mut LoopbackEndpoint,
    source: &Path,
    name: &str,
) -> (Result<TransferOutcome, EngineError>, AuditLog) {
    let fs = NastyFs::with_seed(Nastiness::NONE, 0);
    let audit = AuditLog::capture();
    let mut sender = Sender::new(client_end, &fs, &audit, fast_sender_config());
    let outcome = sender.send_file(source, name);
    (outcome, audit)
}

// ============================================================================
// Scenario 1: clean channel, one file
// ============================================================================

#[test]
fn clean_channel_delivers_one_file() {
    let src = tempdir().expect("src dir");
    let dst = tempdir().expect("dst dir");
    let contents = vec![0x41u8; 1024];
    let source = write_file(src.path(), "block.bin", &contents);

    let (mut client_end, server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let server = spawn_receiver(server_end, dst.path(), Nastiness::NONE, 1);

    let (outcome, client_audit) = run_transfer(&mut client_end, &source, "block.bin");
    assert_eq!(outcome.expect("transfer"), TransferOutcome::Delivered);

    let (server_audit, target) = server.shutdown();
    assert_eq!(
        std::fs::read(target.join("block.bin")).expect("promoted file"),
        contents
    );
    assert!(
        !target.join("block.bin.tmp").exists(),
        "staging file should have been renamed away"
    );

    let client_lines = client_audit.recorded().expect("client audit");
    assert!(client_lines.iter().any(|l| l.contains("beginning transmission")));
    assert!(
        client_lines
            .iter()
            .any(|l| l == "File: block.bin end-to-end check succeeded, attempt 0")
    );
    let server_lines = server_audit.recorded().expect("server audit");
    assert!(server_lines.contains(&"File: block.bin starting to receive file".to_owned()));
    assert!(server_lines.contains(&"File: block.bin end-to-end check succeeded".to_owned()));
}

// ============================================================================
// Scenario 2: heavy packet loss
// ============================================================================

#[test]
fn fifty_percent_drop_still_converges() {
    let src = tempdir().expect("src dir");
    let dst = tempdir().expect("dst dir");
    let contents = patterned_bytes(10 * PAYLOAD_SIZE, 2);
    let source = write_file(src.path(), "lossy.bin", &contents);

    let (mut client_end, server_end) = LoopbackEndpoint::pair(FaultPlan::dropping(0.5, 22));
    let server = spawn_receiver(server_end, dst.path(), Nastiness::NONE, 2);

    let (outcome, _) = run_transfer(&mut client_end, &source, "lossy.bin");
    assert_eq!(outcome.expect("transfer"), TransferOutcome::Delivered);

    let (_, target) = server.shutdown();
    assert_eq!(
        std::fs::read(target.join("lossy.bin")).expect("promoted file"),
        contents
    );
}

// ============================================================================
// Scenario 3: payload bit flips
// ============================================================================

#[test]
fn corrupted_datagrams_are_repaired_by_retransmission() {
    let src = tempdir().expect("src dir");
    let dst = tempdir().expect("dst dir");
    let contents = patterned_bytes(8 * PAYLOAD_SIZE + 37, 3);
    let source = write_file(src.path(), "flip.bin", &contents);

    // Flip bits only in DATA-sized datagrams: the payload digest rejects
    // them and reconciliation repairs the gaps. (The short control frames
    // carry no per-frame digest, so corrupting them tests only luck.)
    let plan = FaultPlan::corrupting(0.2, 33).corrupting_only_at_least(200);
    let (mut client_end, server_end) = LoopbackEndpoint::pair(plan);
    let server = spawn_receiver(server_end, dst.path(), Nastiness::NONE, 3);

    let (outcome, _) = run_transfer(&mut client_end, &source, "flip.bin");
    assert_eq!(outcome.expect("transfer"), TransferOutcome::Delivered);

    let (_, target) = server.shutdown();
    assert_eq!(
        std::fs::read(target.join("flip.bin")).expect("promoted file"),
        contents
    );
}

// ============================================================================
// Scenario 4: reordered delivery
// ============================================================================

#[test]
fn reverse_order_delivery_needs_no_reorder_buffer() {
    let src = tempdir().expect("src dir");
    let dst = tempdir().expect("dst dir");
    let contents = patterned_bytes(10 * PAYLOAD_SIZE, 4);
    let source = write_file(src.path(), "reversed.bin", &contents);

    let to_server = FaultPlan::clean().ordered(DeliveryOrder::Lifo);
    let (mut client_end, server_end) =
        LoopbackEndpoint::pair_with(to_server, FaultPlan::clean());
    let server = spawn_receiver(server_end, dst.path(), Nastiness::NONE, 4);

    let (outcome, _) = run_transfer(&mut client_end, &source, "reversed.bin");
    assert_eq!(outcome.expect("transfer"), TransferOutcome::Delivered);

    let (_, target) = server.shutdown();
    assert_eq!(
        std::fs::read(target.join("reversed.bin")).expect("promoted file"),
        contents
    );
}

// ============================================================================
// Scenario 5: nasty staging filesystem
// ============================================================================

#[test]
fn nasty_file_writes_are_defeated_by_verification() {
    let src = tempdir().expect("src dir");
    let dst = tempdir().expect("dst dir");
    let contents = patterned_bytes(6 * PAYLOAD_SIZE + 211, 5);
    let source = write_file(src.path(), "verified.bin", &contents);

    let (mut client_end, server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let server = spawn_receiver(
        server_end,
        dst.path(),
        Nastiness::new(4).expect("level"),
        5,
    );

    let (outcome, _) = run_transfer(&mut client_end, &source, "verified.bin");
    assert_eq!(outcome.expect("transfer"), TransferOutcome::Delivered);

    let (server_audit, target) = server.shutdown();
    assert_eq!(
        std::fs::read(target.join("verified.bin")).expect("promoted file"),
        contents
    );
    let lines = server_audit.recorded().expect("server audit");
    assert!(lines.contains(&"File: verified.bin end-to-end check succeeded".to_owned()));
}

// ============================================================================
// Scenario 6: client lies about the digest
// ============================================================================

#[test]
fn lying_digest_claim_is_rejected_and_nothing_is_promoted() {
    let dst = tempdir().expect("dst dir");
    let audit = AuditLog::capture();
    let (mut client, server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let mut receiver = Receiver::new(
        server_end,
        NastyFs::with_seed(Nastiness::NONE, 6),
        dst.path().to_path_buf(),
        audit.clone(),
        fast_receiver_config(),
    );

    let name = "liar.txt";
    let fh = FileHash::of_basename(name);
    let payload = b"these are the real bytes".to_vec();

    // Hand-rolled client: INIT, one DATA packet, then a digest claim that
    // does not match what was sent.
    client
        .send(&Frame::Init { count: PacketCount(1), name: name.to_owned() }.encode())
        .expect("send INIT");
    receiver.step().expect("accept INIT");
    assert!(matches!(recv(&mut client), Some(Frame::InitAck { .. })));

    client
        .send(
            &Frame::Data {
                packet_sha1: protocol::data_packet_digest(&fh, PacketIndex(1), &payload),
                fh,
                index: PacketIndex(1),
                payload: payload.clone(),
            }
            .encode(),
        )
        .expect("send DATA");
    receiver.step().expect("commit DATA");
    assert!(matches!(recv(&mut client), Some(Frame::AllDone { .. })));

    client
        .send(
            &Frame::ReqChk {
                file_sha1: checksums::sha1_hex(b"something else entirely"),
                name: name.to_owned(),
            }
            .encode(),
        )
        .expect("send REQ_CHK");
    receiver.step().expect("judge claim");
    assert!(matches!(recv(&mut client), Some(Frame::ChkFail { .. })));

    client
        .send(&Frame::AckFail { name: name.to_owned() }.encode())
        .expect("send ACK_FAIL");
    receiver.step().expect("close session");
    assert!(matches!(recv(&mut client), Some(Frame::FinAck { .. })));

    assert!(!dst.path().join(name).exists(), "file must not be promoted");
    assert_eq!(
        std::fs::read(dst.path().join(format!("{name}.tmp"))).expect("staging file remains"),
        payload
    );
    let lines = audit.recorded().expect("audit");
    assert!(lines.contains(&"File: liar.txt end-to-end check failed".to_owned()));
}

// ============================================================================
// Boundary cases
// ============================================================================

#[test]
fn empty_file_transfers_as_one_zero_length_packet() {
    let src = tempdir().expect("src dir");
    let dst = tempdir().expect("dst dir");
    let source = write_file(src.path(), "empty", b"");

    let (mut client_end, server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let server = spawn_receiver(server_end, dst.path(), Nastiness::NONE, 7);

    let (outcome, _) = run_transfer(&mut client_end, &source, "empty");
    assert_eq!(outcome.expect("transfer"), TransferOutcome::Delivered);

    let (_, target) = server.shutdown();
    let promoted = std::fs::read(target.join("empty")).expect("promoted file");
    assert!(promoted.is_empty());
}

#[test]
fn exact_payload_multiple_has_a_full_final_packet() {
    let src = tempdir().expect("src dir");
    let dst = tempdir().expect("dst dir");
    let contents = patterned_bytes(3 * PAYLOAD_SIZE, 8);
    let source = write_file(src.path(), "aligned.bin", &contents);

    let (mut client_end, server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let server = spawn_receiver(server_end, dst.path(), Nastiness::NONE, 8);

    let (outcome, _) = run_transfer(&mut client_end, &source, "aligned.bin");
    assert_eq!(outcome.expect("transfer"), TransferOutcome::Delivered);

    let (_, target) = server.shutdown();
    assert_eq!(
        std::fs::read(target.join("aligned.bin")).expect("promoted file"),
        contents
    );
}

#[test]
fn consecutive_files_reuse_one_receiver() {
    let src = tempdir().expect("src dir");
    let dst = tempdir().expect("dst dir");
    let first = patterned_bytes(2 * PAYLOAD_SIZE + 11, 9);
    let second = patterned_bytes(PAYLOAD_SIZE - 3, 10);
    let first_path = write_file(src.path(), "first.bin", &first);
    let second_path = write_file(src.path(), "second.bin", &second);

    let (mut client_end, server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let server = spawn_receiver(server_end, dst.path(), Nastiness::NONE, 11);

    let fs = NastyFs::with_seed(Nastiness::NONE, 0);
    let audit = AuditLog::capture();
    let mut sender = Sender::new(&mut client_end, &fs, &audit, fast_sender_config());
    assert_eq!(
        sender.send_file(&first_path, "first.bin").expect("first"),
        TransferOutcome::Delivered
    );
    assert_eq!(
        sender.send_file(&second_path, "second.bin").expect("second"),
        TransferOutcome::Delivered
    );

    let (_, target) = server.shutdown();
    assert_eq!(std::fs::read(target.join("first.bin")).expect("first"), first);
    assert_eq!(std::fs::read(target.join("second.bin")).expect("second"), second);
}

#[test]
fn silent_peer_stalls_the_handshake() {
    let src = tempdir().expect("src dir");
    let source = write_file(src.path(), "nowhere.bin", b"unsendable");

    // The other half of the link is dropped: every INIT vanishes into an
    // unserved queue.
    let (mut client_end, _server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let fs = NastyFs::with_seed(Nastiness::NONE, 0);
    let audit = AuditLog::capture();
    let mut config = fast_sender_config();
    config.init_retry_budget = 3;
    config.init_timeout = Duration::from_millis(30);
    let mut sender = Sender::new(&mut client_end, &fs, &audit, config);

    match sender.send_file(&source, "nowhere.bin") {
        Err(EngineError::SessionStalled { phase, .. }) => assert_eq!(phase, "handshake"),
        other => panic!("expected a stalled handshake, got {other:?}"),
    }
}

// ============================================================================
// Idempotence of duplicated handshake frames
// ============================================================================

#[test]
fn duplicate_handshake_frames_do_not_disturb_state() {
    let dst = tempdir().expect("dst dir");
    let audit = AuditLog::capture();
    let (mut client, server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let mut receiver = Receiver::new(
        server_end,
        NastyFs::with_seed(Nastiness::NONE, 12),
        dst.path().to_path_buf(),
        audit,
        fast_receiver_config(),
    );

    let name = "dup.txt";
    let fh = FileHash::of_basename(name);
    let payload = b"payload".to_vec();
    let init = Frame::Init { count: PacketCount(1), name: name.to_owned() }.encode();
    let data = Frame::Data {
        packet_sha1: protocol::data_packet_digest(&fh, PacketIndex(1), &payload),
        fh,
        index: PacketIndex(1),
        payload: payload.clone(),
    }
    .encode();

    // Duplicate INIT: both answered, session opened once.
    client.send(&init).expect("INIT");
    client.send(&init).expect("INIT again");
    receiver.step().expect("first INIT");
    receiver.step().expect("second INIT");
    assert!(matches!(recv(&mut client), Some(Frame::InitAck { .. })));
    assert!(matches!(recv(&mut client), Some(Frame::InitAck { .. })));

    // Duplicate DATA: committed once, second copy dropped.
    client.send(&data).expect("DATA");
    client.send(&data).expect("DATA again");
    receiver.step().expect("first DATA");
    assert!(matches!(recv(&mut client), Some(Frame::AllDone { .. })));
    // The duplicate arrives after the phase change and is answered with a
    // second ALL_DONE rather than a second write.
    receiver.step().expect("duplicate DATA");
    assert!(matches!(recv(&mut client), Some(Frame::AllDone { .. })));

    // End-to-end with the true digest, acknowledged twice.
    client
        .send(
            &Frame::ReqChk {
                file_sha1: checksums::sha1_hex(&payload),
                name: name.to_owned(),
            }
            .encode(),
        )
        .expect("REQ_CHK");
    receiver.step().expect("verdict");
    assert!(matches!(recv(&mut client), Some(Frame::ChkSucc { .. })));

    let ack = Frame::AckSucc { name: name.to_owned() }.encode();
    client.send(&ack).expect("ACK_SUCC");
    receiver.step().expect("close");
    assert!(matches!(recv(&mut client), Some(Frame::FinAck { .. })));

    // The session is closed, yet a duplicated ACK still earns FIN_ACK.
    client.send(&ack).expect("ACK_SUCC again");
    receiver.step().expect("replay FIN_ACK");
    assert!(matches!(recv(&mut client), Some(Frame::FinAck { .. })));

    // A duplicated REQ_CHK after close replays the recorded verdict.
    client
        .send(
            &Frame::ReqChk {
                file_sha1: checksums::sha1_hex(&payload),
                name: name.to_owned(),
            }
            .encode(),
        )
        .expect("REQ_CHK again");
    receiver.step().expect("replay verdict");
    assert!(matches!(recv(&mut client), Some(Frame::ChkSucc { .. })));

    assert_eq!(
        std::fs::read(dst.path().join(name)).expect("promoted file"),
        payload
    );
}

// ============================================================================
// Session isolation
// ============================================================================

#[test]
fn foreign_session_data_cannot_touch_the_active_staging_file() {
    let dst = tempdir().expect("dst dir");
    let (mut client, server_end) = LoopbackEndpoint::pair(FaultPlan::clean());
    let mut receiver = Receiver::new(
        server_end,
        NastyFs::with_seed(Nastiness::NONE, 13),
        dst.path().to_path_buf(),
        AuditLog::capture(),
        fast_receiver_config(),
    );

    let name = "mine.txt";
    let payload = b"genuine".to_vec();
    client
        .send(&Frame::Init { count: PacketCount(1), name: name.to_owned() }.encode())
        .expect("INIT");
    receiver.step().expect("INIT");
    assert!(matches!(recv(&mut client), Some(Frame::InitAck { .. })));

    // A DATA frame bound to a different session hash must be ignored.
    let intruder = b"intruder".to_vec();
    client
        .send(
            &Frame::Data {
                packet_sha1: protocol::data_packet_digest(
                    &FileHash::of_basename("other.txt"),
                    PacketIndex(1),
                    &intruder,
                ),
                fh: FileHash::of_basename("other.txt"),
                index: PacketIndex(1),
                payload: intruder,
            }
            .encode(),
        )
        .expect("foreign DATA");
    receiver.step().expect("drop foreign DATA");
    assert!(receiver.has_active_session());

    client
        .send(
            &Frame::Data {
                packet_sha1: protocol::data_packet_digest(
                    &FileHash::of_basename(name),
                    PacketIndex(1),
                    &payload,
                ),
                fh: FileHash::of_basename(name),
                index: PacketIndex(1),
                payload: payload.clone(),
            }
            .encode(),
        )
        .expect("genuine DATA");
    receiver.step().expect("commit DATA");
    assert!(matches!(recv(&mut client), Some(Frame::AllDone { .. })));

    let staged = std::fs::read(dst.path().join(format!("{name}.tmp"))).expect("staging");
    assert_eq!(staged, payload);
}

fn recv(endpoint: &mut LoopbackEndpoint) -> Option<Frame> {
    let mut buf = [0u8; 600];
    match endpoint
        .recv_timeout(&mut buf, Duration::from_millis(500))
        .expect("recv")
    {
        Some(len) => Frame::decode(&buf[..len]).ok(),
        None => None,
    }
}
