//! Legacy text-protocol flow: UPDATE_AVAILABLE → REQUEST_DELTA →
//! DELTA_DATA, routed through the event router's magic-byte split.

use std::fs;
use std::sync::{Arc, Mutex};

use storage::Database;
use sync::{Event, EventRouter, PipelineConfig, SyncPipeline, Transport};
use versioning::{VersionStore, VersioningConfig};

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
    _pipeline: Arc<SyncPipeline>,
    router: Arc<EventRouter>,
    transport: Arc<QueueTransport>,
    _tmp: tempfile::TempDir,
}

fn node(peer_id: &str) -> Node {
    let tmp = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(QueueTransport::default());
    let db = Arc::new(Database::open_in_memory().expect("db"));
    let versions =
        Arc::new(VersionStore::new(tmp.path(), VersioningConfig::default()).expect("versions"));

    let wire: Arc<dyn Transport> = transport.clone();
    let pipeline = Arc::new(SyncPipeline::new(
        PipelineConfig::new(peer_id, tmp.path(), b"SECRET"),
        wire,
        db,
        versions,
    ));

    let router = Arc::new(EventRouter::new());
    let for_binary = Arc::clone(&pipeline);
    router.set_binary_handler(move |peer, frame| {
        if let Err(err) = for_binary.handle_frame(peer, frame) {
            tracing::warn!(peer, %err, "frame dropped");
        }
    });
    let for_legacy = Arc::clone(&pipeline);
    router.set_legacy_handler(move |peer, message| {
        if let Err(err) = for_legacy.handle_legacy(peer, message) {
            tracing::warn!(peer, %err, "legacy message dropped");
        }
    });
    let for_patched = Arc::clone(&router);
    pipeline.set_patched_callback(move |filename| {
        for_patched.mark_patched(filename);
    });

    Node {
        _pipeline: pipeline,
        router,
        transport,
        _tmp: tmp,
    }
}

fn pump(a: &Node, a_id: &str, b: &Node, b_id: &str) {
    for _ in 0..32 {
        let from_a = a.transport.drain();
        let from_b = b.transport.drain();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for (target, data) in from_a {
            assert_eq!(target, b_id);
            b.router.dispatch(&Event::DataReceived {
                peer_id: a_id.to_owned(),
                data,
            });
        }
        for (target, data) in from_b {
            assert_eq!(target, a_id);
            a.router.dispatch(&Event::DataReceived {
                peer_id: b_id.to_owned(),
                data,
            });
        }
    }
    panic!("message pump did not quiesce");
}

#[test]
fn update_available_pulls_a_delta_for_an_existing_copy() {
    let a = node("alpha");
    let b = node("beta");

    // Both sides start from a shared ancestor; alpha edits its copy.
    let ancestor: Vec<u8> = (0..96 * 1024u32).map(|i| (i % 253) as u8).collect();
    fs::write(b._tmp.path().join("shared.bin"), &ancestor).expect("write beta copy");

    let mut edited = ancestor.clone();
    edited.splice(10 * 1024..10 * 1024, b"legacy-edit".iter().copied());
    let source = a._tmp.path().join("shared.bin");
    fs::write(&source, &edited).expect("write alpha copy");

    // Alpha announces over the legacy protocol; beta pulls the delta.
    let announce = protocol::legacy::LegacyMessage::UpdateAvailable {
        relative_path: "shared.bin".to_owned(),
        hash: checksums::strong::to_hex(&checksums::strong::digest_file(&source).expect("hash")),
        size: edited.len() as u64,
    };
    a.transport
        .send("beta", &announce.encode())
        .expect("announce");
    pump(&a, "alpha", &b, "beta");

    assert_eq!(
        fs::read(b._tmp.path().join("shared.bin")).expect("read"),
        edited
    );
}

#[test]
fn update_available_for_missing_file_requests_the_whole_file() {
    let a = node("alpha");
    let b = node("beta");

    let source = a._tmp.path().join("fresh.txt");
    fs::write(&source, b"brand new on alpha").expect("write");

    let announce = protocol::legacy::LegacyMessage::UpdateAvailable {
        relative_path: "fresh.txt".to_owned(),
        hash: String::new(),
        size: 18,
    };
    a.transport
        .send("beta", &announce.encode())
        .expect("announce");
    pump(&a, "alpha", &b, "beta");

    assert_eq!(
        fs::read(b._tmp.path().join("fresh.txt")).expect("read"),
        b"brand new on alpha"
    );
}

#[test]
fn matching_hash_short_circuits_the_exchange() {
    let a = node("alpha");
    let b = node("beta");

    let contents = b"identical either side";
    fs::write(a._tmp.path().join("same.txt"), contents).expect("write alpha");
    fs::write(b._tmp.path().join("same.txt"), contents).expect("write beta");

    let announce = protocol::legacy::LegacyMessage::UpdateAvailable {
        relative_path: "same.txt".to_owned(),
        hash: checksums::strong::digest_hex(contents),
        size: contents.len() as u64,
    };
    a.transport
        .send("beta", &announce.encode())
        .expect("announce");

    // Beta recognizes its copy is current and stays quiet.
    let from_a = a.transport.drain();
    for (_, data) in from_a {
        b.router.dispatch(&Event::DataReceived {
            peer_id: "alpha".to_owned(),
            data,
        });
    }
    assert!(b.transport.drain().is_empty());
}

#[test]
fn delete_file_removes_the_copy_and_suppresses_the_echo() {
    let b = node("beta");

    let victim = b._tmp.path().join("doomed.txt");
    fs::write(&victim, b"short lived").expect("write");

    let delete = protocol::legacy::LegacyMessage::DeleteFile {
        relative_path: "doomed.txt".to_owned(),
    };
    b.router.dispatch(&Event::DataReceived {
        peer_id: "alpha".to_owned(),
        data: delete.encode(),
    });

    assert!(!victim.exists());
    // The watcher echo of the deletion-adjacent change is suppressed.
    use sync::FileEventDisposition;
    assert_eq!(
        b.router.dispatch(&Event::FileModified(victim.clone())),
        FileEventDisposition::Suppressed
    );
}
