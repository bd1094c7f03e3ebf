//! End-to-end pipeline exercises: two pipelines joined by an in-memory
//! transport, messages pumped until the wire goes quiet.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use protocol::{Capabilities, FrameHeader, MessageType};
use storage::Database;
use sync::{PipelineConfig, PipelineEvent, SyncPipeline, Transport, TransferState};
use versioning::{VersionStore, VersioningConfig};

/// Transport that parks frames in an outbox for the test to pump.
#[derive(Default)]
struct QueueTransport {
    outbox: Mutex<Vec<(String, Vec<u8>)>>,
}

impl QueueTransport {
    fn drain(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut self.outbox.lock().expect("outbox poisoned"))
    }
}

impl Transport for QueueTransport {
    fn send(&self, peer_id: &str, frame: &[u8]) -> std::io::Result<()> {
        self.outbox
            .lock()
            .expect("outbox poisoned")
            .push((peer_id.to_owned(), frame.to_vec()));
        Ok(())
    }
}

struct Node {
    pipeline: Arc<SyncPipeline>,
    transport: Arc<QueueTransport>,
    _tmp: tempfile::TempDir,
}

fn node(peer_id: &str, capabilities: Capabilities, session_key: &[u8]) -> Node {
    let tmp = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(QueueTransport::default());
    let db = Arc::new(Database::open_in_memory().expect("db"));
    let versions =
        Arc::new(VersionStore::new(tmp.path(), VersioningConfig::default()).expect("versions"));

    let mut config = PipelineConfig::new(peer_id, tmp.path(), session_key);
    config.capabilities = capabilities;

    let wire: Arc<dyn Transport> = transport.clone();
    Node {
        pipeline: Arc::new(SyncPipeline::new(config, wire, db, versions)),
        transport,
        _tmp: tmp,
    }
}

/// Shuttles frames between the two nodes until neither produces more.
fn pump(a: &Node, a_id: &str, b: &Node, b_id: &str) {
    for _ in 0..64 {
        let from_a = a.transport.drain();
        let from_b = b.transport.drain();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for (target, frame) in from_a {
            assert_eq!(target, b_id);
            let _ = b.pipeline.handle_frame(a_id, &frame);
        }
        for (target, frame) in from_b {
            assert_eq!(target, a_id);
            let _ = a.pipeline.handle_frame(b_id, &frame);
        }
    }
    panic!("message pump did not quiesce");
}

fn handshake(a: &Node, a_id: &str, b: &Node, b_id: &str) {
    a.pipeline.initiate_handshake(b_id).expect("initiate");
    pump(a, a_id, b, b_id);
    assert!(a.pipeline.is_peer_authenticated(b_id));
    assert!(b.pipeline.is_peer_authenticated(a_id));
}

fn delta_caps() -> Capabilities {
    Capabilities::DELTA_SYNC | Capabilities::STREAMING
}

#[test]
fn handshake_negotiates_capability_intersection() {
    let a = node(
        "alpha",
        Capabilities::DELTA_SYNC | Capabilities::ENCRYPTION_AES_GCM | Capabilities::STREAMING,
        b"SECRET",
    );
    let b = node(
        "beta",
        Capabilities::DELTA_SYNC | Capabilities::COMPRESSION_ZSTD,
        b"SECRET",
    );

    handshake(&a, "alpha", &b, "beta");

    assert_eq!(
        a.pipeline.peer_capabilities("beta"),
        Some(Capabilities::DELTA_SYNC)
    );
    assert_eq!(
        b.pipeline.peer_capabilities("alpha"),
        Some(Capabilities::DELTA_SYNC)
    );

    let authenticated: Vec<PipelineEvent> = b.pipeline.events().try_iter().collect();
    assert!(authenticated.iter().any(|event| matches!(
        event,
        PipelineEvent::PeerAuthenticated { peer_id, capabilities }
            if peer_id == "alpha" && *capabilities == Capabilities::DELTA_SYNC
    )));
}

#[test]
fn mismatched_session_keys_never_authenticate_the_responder() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"DIFFERENT");

    a.pipeline.initiate_handshake("beta").expect("initiate");
    pump(&a, "alpha", &b, "beta");

    // The responder rejects the proof; the initiator cannot know better.
    assert!(!b.pipeline.is_peer_authenticated("alpha"));
}

#[test]
fn unauthenticated_frames_are_dropped() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let file = a._tmp.path().join("f.txt");
    fs::write(&file, b"data").expect("write");

    assert!(a.pipeline.sync_file_to_peer("beta", &file).is_err());

    // A non-handshake frame from an unknown peer is swallowed whole.
    let frame = protocol::build_frame(MessageType::BlockAck, 1, &[]);
    a.pipeline.handle_frame("stranger", &frame).expect("dropped, not an error");
}

#[test]
fn file_sync_transfers_content_end_to_end() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"SECRET");
    handshake(&a, "alpha", &b, "beta");

    let source = a._tmp.path().join("notes/todo.txt");
    fs::create_dir_all(source.parent().expect("parent")).expect("mkdir");
    let contents = vec![b'x'; 150 * 1024];
    fs::write(&source, &contents).expect("write source");

    let transfer_id = a.pipeline.sync_file_to_peer("beta", &source).expect("sync");
    pump(&a, "alpha", &b, "beta");

    let ctx = a.pipeline.transfer(&transfer_id).expect("transfer");
    assert_eq!(ctx.state, TransferState::Complete);

    let replica = b._tmp.path().join("notes/todo.txt");
    assert_eq!(fs::read(&replica).expect("read replica"), contents);

    let events: Vec<PipelineEvent> = a.pipeline.events().try_iter().collect();
    assert!(events.iter().any(|event| matches!(
        event,
        PipelineEvent::TransferFinished { transfer_id: id, success: true, .. } if *id == transfer_id
    )));
}

#[test]
fn delta_path_reuses_receiver_blocks() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"SECRET");
    handshake(&a, "alpha", &b, "beta");

    // Receiver already has an older copy sharing most blocks.
    let old: Vec<u8> = (0..200 * 1024u32).map(|i| (i % 251) as u8).collect();
    fs::write(b._tmp.path().join("big.bin"), &old).expect("write old");

    let mut new = old.clone();
    new.splice(64 * 1024..64 * 1024, b"wedge".iter().copied());
    let source = a._tmp.path().join("big.bin");
    fs::write(&source, &new).expect("write new");

    let transfer_id = a.pipeline.sync_file_to_peer("beta", &source).expect("sync");
    pump(&a, "alpha", &b, "beta");

    let ctx = a.pipeline.transfer(&transfer_id).expect("transfer");
    assert_eq!(ctx.state, TransferState::Complete);
    assert!(ctx.use_delta);
    assert!(ctx.saved_bytes > 0, "delta should reuse receiver blocks");

    assert_eq!(fs::read(b._tmp.path().join("big.bin")).expect("read"), new);
}

#[test]
fn second_sync_for_same_path_reuses_the_transfer() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"SECRET");
    handshake(&a, "alpha", &b, "beta");

    let source = a._tmp.path().join("f.txt");
    fs::write(&source, b"contents").expect("write");

    // Queue the first sync but do not pump: it stays active.
    let first = a.pipeline.sync_file_to_peer("beta", &source).expect("first");
    let second = a.pipeline.sync_file_to_peer("beta", &source).expect("second");
    assert_eq!(first, second);
}

#[test]
fn replayed_sequence_numbers_are_rejected() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"SECRET");
    handshake(&a, "alpha", &b, "beta");

    let source = a._tmp.path().join("f.txt");
    fs::write(&source, b"payload").expect("write");
    a.pipeline.sync_file_to_peer("beta", &source).expect("sync");

    // Capture the FILE_META frame and deliver it twice.
    let frames = a.transport.drain();
    let (_, meta_frame) = frames
        .iter()
        .find(|(_, frame)| {
            FrameHeader::decode(frame)
                .is_ok_and(|(header, _)| header.message_type == MessageType::FileMeta)
        })
        .expect("meta frame")
        .clone();

    b.pipeline.handle_frame("alpha", &meta_frame).expect("first delivery");
    let first_replies = b.transport.drain().len();
    assert!(first_replies > 0);

    b.pipeline.handle_frame("alpha", &meta_frame).expect("replay swallowed");
    assert_eq!(b.transport.drain().len(), 0, "replay must not be processed");
}

#[test]
fn duplicate_chunks_do_not_corrupt_reassembly() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"SECRET");
    handshake(&a, "alpha", &b, "beta");

    // Large enough to split across several chunks.
    let source = a._tmp.path().join("multi.bin");
    let contents: Vec<u8> = (0..300 * 1024u32).map(|i| (i % 241) as u8).collect();
    fs::write(&source, &contents).expect("write");

    a.pipeline.sync_file_to_peer("beta", &source).expect("sync");

    // Pump manually, duplicating every frame from alpha.
    for _ in 0..64 {
        let from_a = a.transport.drain();
        let from_b = b.transport.drain();
        if from_a.is_empty() && from_b.is_empty() {
            break;
        }
        for (_, frame) in from_a {
            let _ = b.pipeline.handle_frame("alpha", &frame);
            let _ = b.pipeline.handle_frame("alpha", &frame);
        }
        for (_, frame) in from_b {
            let _ = a.pipeline.handle_frame("beta", &frame);
        }
    }

    assert_eq!(fs::read(b._tmp.path().join("multi.bin")).expect("read"), contents);
}

#[test]
fn redelivered_chunk_with_fresh_sequence_is_idempotent() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"SECRET");
    handshake(&a, "alpha", &b, "beta");
    a.transport.drain();
    b.transport.drain();

    // Hand-build a two-chunk delta stream for a brand-new file.
    let delta = engine::Delta {
        block_size: 4096,
        instructions: vec![engine::DeltaInstruction::Literal {
            bytes: b"idempotent reassembly payload".to_vec(),
        }],
    };
    let encoded = protocol::codec::encode_delta(&delta);
    let split_at = encoded.len() / 2;
    let chunk0 = protocol::chunk::Chunk {
        relative_path: "re.bin".to_owned(),
        chunk_id: 0,
        total_chunks: 2,
        data: encoded[..split_at].to_vec(),
    };
    let chunk1 = protocol::chunk::Chunk {
        relative_path: "re.bin".to_owned(),
        chunk_id: 1,
        total_chunks: 2,
        data: encoded[split_at..].to_vec(),
    };

    // Same chunk twice under different sequence numbers: the slot keeps
    // its first write; only chunk 1 completes the payload.
    for (sequence, chunk) in [(100u32, &chunk0), (101, &chunk0), (102, &chunk1)] {
        let frame = protocol::build_frame(MessageType::DeltaResponse, sequence, &chunk.encode());
        b.pipeline.handle_frame("alpha", &frame).expect("deliver");
    }

    assert_eq!(
        fs::read(b._tmp.path().join("re.bin")).expect("read"),
        b"idempotent reassembly payload"
    );
}

#[test]
fn abort_notifies_the_peer_and_fails_locally() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"SECRET");
    handshake(&a, "alpha", &b, "beta");

    let source = a._tmp.path().join("f.txt");
    fs::write(&source, b"payload").expect("write");
    let transfer_id = a.pipeline.sync_file_to_peer("beta", &source).expect("sync");

    a.pipeline.abort_transfer(&transfer_id, "operator cancelled").expect("abort");
    let ctx = a.pipeline.transfer(&transfer_id).expect("transfer");
    assert_eq!(ctx.state, TransferState::Failed);

    let events: Vec<PipelineEvent> = a.pipeline.events().try_iter().collect();
    assert!(events.iter().any(|event| matches!(
        event,
        PipelineEvent::TransferFinished { success: false, .. }
    )));
}

#[test]
fn receiving_node_marks_file_synced_in_storage() {
    let a = node("alpha", delta_caps(), b"SECRET");
    let b = node("beta", delta_caps(), b"SECRET");
    handshake(&a, "alpha", &b, "beta");

    let source = a._tmp.path().join("tracked.txt");
    fs::write(&source, b"tracked contents").expect("write");
    a.pipeline.sync_file_to_peer("beta", &source).expect("sync");
    pump(&a, "alpha", &b, "beta");

    let replica = Path::new(b._tmp.path()).join("tracked.txt");
    assert!(replica.exists());
}
