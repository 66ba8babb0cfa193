use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::Notify;

use sfs::bus::{EventBus, Stream};
use sfs::config::{BusConfig, UploadConfig};
use sfs::context::RequestContext;
use sfs::object_store::{LocalStore, ObjectStore, ObjectStoreError};
use sfs::state_machine::FileState;
use sfs::storage::Database;
use sfs::upload::{IncomingFile, UploadError, UploadService};

/// Blob store whose writes always fail
struct BrokenStore;

#[async_trait]
impl ObjectStore for BrokenStore {
    async fn put(&self, _key: &str, _data: Bytes) -> Result<(), ObjectStoreError> {
        Err(ObjectStoreError::Io(std::io::Error::other("disk on fire")))
    }

    fn path(&self, key: &str) -> PathBuf {
        PathBuf::from(key)
    }
}

/// Blob store whose writes wait until released
struct GatedStore {
    inner: LocalStore,
    gate: Arc<Notify>,
}

#[async_trait]
impl ObjectStore for GatedStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        self.gate.notified().await;
        self.inner.put(key, data).await
    }

    fn path(&self, key: &str) -> PathBuf {
        self.inner.path(key)
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    bus: EventBus,
    uploads: UploadService,
}

fn harness_with(
    store: impl FnOnce(&Path) -> Arc<dyn ObjectStore>,
    config: UploadConfig,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("cache")).unwrap();
    let blob_dir = dir.path().join("data");
    let blobs = store(blob_dir.as_path());
    let (bus, _hub) = EventBus::start(BusConfig::default());
    let uploads = UploadService::new(db, blobs, bus.clone(), &config);
    Harness {
        _dir: dir,
        bus,
        uploads,
    }
}

fn harness() -> Harness {
    harness_with(
        |path| Arc::new(LocalStore::new(path).unwrap()),
        UploadConfig::default(),
    )
}

fn ctx(owner: &str) -> RequestContext {
    RequestContext::new(owner, uuid::Uuid::new_v4().to_string())
}

fn file(name: &str, data: &'static [u8]) -> IncomingFile {
    IncomingFile {
        name: name.to_string(),
        content_type: "text/plain".to_string(),
        data: Bytes::from_static(data),
    }
}

async fn next_event(stream: &mut Stream) -> serde_json::Value {
    let message = tokio::time::timeout(Duration::from_secs(2), stream.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("stream closed");
    message.decode().unwrap()
}

#[tokio::test]
async fn test_upload_is_saved_and_announced() {
    let h = harness();
    let mut events = h.bus.subscribe("user.u1").await.unwrap();

    let id = h
        .uploads
        .add_file(&ctx("u1"), file("ten.bin", b"0123456789"))
        .unwrap();
    assert_eq!(id, "0000001");

    assert_eq!(
        next_event(&mut events).await,
        json!({"FileID": "0000001", "State": "saved"})
    );

    let (record, path) = h.uploads.file("u1", &id).unwrap();
    assert_eq!(record.state, FileState::Saved);
    assert_eq!(record.size, 10);
    assert!(record.checksum.is_some());
    assert_eq!(std::fs::read(path).unwrap(), b"0123456789");

    // Exactly one event for this upload
    h.bus.stats().await.unwrap();
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_transitions_reach_file_topic() {
    let h = harness();
    let mut all = h.bus.subscribe("file").await.unwrap();

    h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();
    h.uploads.add_file(&ctx("u2"), file("b", b"b")).unwrap();

    let mut seen = vec![
        next_event(&mut all).await["FileID"].as_str().unwrap().to_string(),
        next_event(&mut all).await["FileID"].as_str().unwrap().to_string(),
    ];
    seen.sort();
    assert_eq!(seen, vec!["0000001", "0000002"]);
}

#[tokio::test]
async fn test_concurrent_uploads_get_distinct_ids() {
    let h = harness();
    let mut handles = Vec::new();
    for n in 0..16 {
        let uploads = h.uploads.clone();
        handles.push(tokio::spawn(async move {
            uploads.add_file(&ctx("u1"), file(&format!("f{n}"), b"x"))
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);
    assert_eq!(ids.first().map(String::as_str), Some("0000001"));
    assert_eq!(ids.last().map(String::as_str), Some("0000016"));

    let listed: Vec<String> = h
        .uploads
        .file_list("u1")
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn test_file_state_change_publishes_file_then_user() {
    let h = harness_with(
        |path| {
            Arc::new(GatedStore {
                inner: LocalStore::new(path).unwrap(),
                gate: Arc::new(Notify::new()),
            })
        },
        UploadConfig::default(),
    );
    let mut all = h.bus.subscribe("file").await.unwrap();
    let mut mine = h.bus.subscribe("user.u1").await.unwrap();

    // The blob write never finishes, so the record stays received
    let id = h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();

    let record = h.uploads.file_state_change(&id, FileState::Failed).unwrap();
    assert_eq!(record.state, FileState::Failed);

    let expected = json!({"FileID": id, "State": "failed"});
    assert_eq!(next_event(&mut all).await, expected);
    assert_eq!(next_event(&mut mine).await, expected);

    let err = h
        .uploads
        .file_state_change(&id, FileState::Saved)
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::InvalidTransition {
            from: FileState::Failed,
            to: FileState::Saved
        }
    ));

    assert!(matches!(
        h.uploads.file_state_change("0000099", FileState::Saved),
        Err(UploadError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_file_of_another_owner_is_hidden() {
    let h = harness();
    let id = h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();

    assert!(h.uploads.file("u1", &id).is_ok());
    assert!(matches!(
        h.uploads.file("u2", &id),
        Err(UploadError::OwnerMismatch(_))
    ));
    assert!(matches!(
        h.uploads.file("u1", "0000042"),
        Err(UploadError::NotFound(_))
    ));
    assert!(h.uploads.file_list("u2").unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_write_reports_error_and_keeps_record() {
    let h = harness_with(|_| Arc::new(BrokenStore), UploadConfig::default());
    let mut all = h.bus.subscribe("file").await.unwrap();
    let mut mine = h.bus.subscribe("user.u1").await.unwrap();

    let id = h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();

    assert_eq!(
        next_event(&mut mine).await,
        json!({"FileID": id, "State": "error"})
    );
    let (record, _) = h.uploads.file("u1", &id).unwrap();
    assert_eq!(record.state, FileState::Received);

    // Error notifications are only for the owner
    h.bus.stats().await.unwrap();
    assert!(all.try_recv().is_none());
}

#[tokio::test]
async fn test_failed_write_can_be_persisted() {
    let h = harness_with(
        |_| Arc::new(BrokenStore),
        UploadConfig {
            persist_failures: true,
            ..Default::default()
        },
    );
    let mut all = h.bus.subscribe("file").await.unwrap();
    let mut mine = h.bus.subscribe("user.u1").await.unwrap();

    let id = h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();

    let expected = json!({"FileID": id, "State": "failed"});
    assert_eq!(next_event(&mut all).await, expected);
    assert_eq!(next_event(&mut mine).await, expected);
    let (record, _) = h.uploads.file("u1", &id).unwrap();
    assert_eq!(record.state, FileState::Failed);
}

#[tokio::test]
async fn test_saturated_pipeline_rejects_without_allocating() {
    let gate = Arc::new(Notify::new());
    let store_gate = Arc::clone(&gate);
    let h = harness_with(
        move |path| {
            Arc::new(GatedStore {
                inner: LocalStore::new(path).unwrap(),
                gate: store_gate,
            })
        },
        UploadConfig {
            max_in_flight: 1,
            ..Default::default()
        },
    );
    let mut mine = h.bus.subscribe("user.u1").await.unwrap();

    let first = h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();
    assert!(matches!(
        h.uploads.add_file(&ctx("u1"), file("b", b"b")),
        Err(UploadError::Saturated)
    ));
    assert_eq!(h.uploads.file_list("u1").unwrap().len(), 1);

    gate.notify_one();
    assert_eq!(
        next_event(&mut mine).await,
        json!({"FileID": first, "State": "saved"})
    );

    // The permit is released once the task finishes
    let mut second = None;
    for _ in 0..100 {
        match h.uploads.add_file(&ctx("u1"), file("c", b"c")) {
            Ok(id) => {
                second = Some(id);
                break;
            }
            Err(UploadError::Saturated) => tokio::time::sleep(Duration::from_millis(10)).await,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(second.as_deref(), Some("0000002"));
}

#[tokio::test]
async fn test_shutdown_drains_and_refuses_new_uploads() {
    let h = harness();
    let id = h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();

    h.uploads.shutdown(Duration::from_secs(5)).await;

    assert_eq!(h.uploads.in_flight(), 0);
    let (record, _) = h.uploads.file("u1", &id).unwrap();
    assert_eq!(record.state, FileState::Saved);
    assert!(matches!(
        h.uploads.add_file(&ctx("u1"), file("b", b"b")),
        Err(UploadError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_shutdown_gives_up_after_grace() {
    let h = harness_with(
        |path| {
            Arc::new(GatedStore {
                inner: LocalStore::new(path).unwrap(),
                gate: Arc::new(Notify::new()),
            })
        },
        UploadConfig::default(),
    );
    let id = h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();

    h.uploads.shutdown(Duration::from_millis(50)).await;

    assert_eq!(h.uploads.in_flight(), 1);
    let (record, _) = h.uploads.file("u1", &id).unwrap();
    assert_eq!(record.state, FileState::Received);
}

#[tokio::test]
async fn test_file_state_change_to_saved_shows_in_listing() {
    let h = harness_with(
        |path| {
            Arc::new(GatedStore {
                inner: LocalStore::new(path).unwrap(),
                gate: Arc::new(Notify::new()),
            })
        },
        UploadConfig::default(),
    );
    let mut all = h.bus.subscribe("file").await.unwrap();
    let mut mine = h.bus.subscribe("user.u1").await.unwrap();

    let id = h.uploads.add_file(&ctx("u1"), file("a", b"a")).unwrap();
    h.uploads.file_state_change(&id, FileState::Saved).unwrap();

    let listed = h.uploads.file_list("u1").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state, FileState::Saved);

    let expected = json!({"FileID": id, "State": "saved"});
    assert_eq!(next_event(&mut all).await, expected);
    assert_eq!(next_event(&mut mine).await, expected);
    h.bus.stats().await.unwrap();
    assert!(all.try_recv().is_none());
    assert!(mine.try_recv().is_none());
}
