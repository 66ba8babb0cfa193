//! Upload pipeline.
//!
//! `add_file` allocates an id and commits the metadata synchronously, then
//! hands the bytes to a bounded pool of background writers. Writers move the
//! record forward through the state machine and announce every transition on
//! the `file` topic and the owner's topic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::bus::{user_topic, BusError, EventBus, FILE_TOPIC};
use crate::config::UploadConfig;
use crate::context::RequestContext;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::state_machine::FileState;
use crate::storage::models::{format_file_id, EventState, FileEvent, FileRecord};
use crate::storage::{Database, DatabaseError, TransitionOutcome, FILE_ID_SEQUENCE};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Storage error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Blob storage error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Owner not matched for file {0}")]
    OwnerMismatch(String),
    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: FileState, to: FileState },
    #[error("Too many uploads in flight")]
    Saturated,
    #[error("Upload service is shutting down")]
    ShuttingDown,
}

/// A file taken from the request, fully buffered
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Clone)]
pub struct UploadService {
    db: Database,
    blobs: Arc<dyn ObjectStore>,
    bus: EventBus,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    persist_failures: bool,
}

impl UploadService {
    pub fn new(
        db: Database,
        blobs: Arc<dyn ObjectStore>,
        bus: EventBus,
        config: &UploadConfig,
    ) -> Self {
        Self {
            db,
            blobs,
            bus,
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            tasks: TaskTracker::new(),
            persist_failures: config.persist_failures,
        }
    }

    /// Accept a file: allocate its id, record it as `received` and start the
    /// blob write in the background. Returns without waiting for the write.
    pub fn add_file(&self, ctx: &RequestContext, file: IncomingFile) -> Result<String, UploadError> {
        // Admission comes first so a rejected upload leaves no trace
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => UploadError::Saturated,
                TryAcquireError::Closed => UploadError::ShuttingDown,
            })?;

        let id = format_file_id(self.db.next_sequence(FILE_ID_SEQUENCE)?);
        debug!(
            file_id = %id,
            name = %file.name,
            size = file.data.len(),
            content_type = %file.content_type,
            request_id = %ctx.request_id,
            "Store file"
        );

        let record = FileRecord::received(
            id.clone(),
            file.name,
            file.data.len() as u64,
            file.content_type,
            ctx.owner.clone(),
        );
        self.db.create_file(&record)?;

        let service = self.clone();
        let owner = ctx.owner.clone();
        let file_id = id.clone();
        let data = file.data;
        self.tasks.spawn(async move {
            let _permit = permit;
            service.write_blob(&file_id, &owner, data).await;
        });

        Ok(id)
    }

    /// Move a file to `state` and announce it on `file` and the owner's topic.
    pub fn file_state_change(&self, id: &str, state: FileState) -> Result<FileRecord, UploadError> {
        self.transition(id, state, None)
    }

    /// Files of one owner, in upload order
    pub fn file_list(&self, owner: &str) -> Result<Vec<FileRecord>, UploadError> {
        let files = self.db.list_owner_files(owner)?;
        debug!(file_count = files.len(), "FileList");
        Ok(files)
    }

    /// A file's record and blob location, if `owner` owns it
    pub fn file(&self, owner: &str, id: &str) -> Result<(FileRecord, PathBuf), UploadError> {
        let file = self
            .db
            .get_file(id)?
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        if file.owner != owner {
            return Err(UploadError::OwnerMismatch(id.to_string()));
        }

        let path = self.blobs.path(id);
        Ok((file, path))
    }

    /// Number of blob writes currently running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Stop accepting uploads and give running writes `grace` to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.permits.close();
        self.tasks.close();

        let running = self.tasks.len();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!(
                abandoned = self.tasks.len(),
                "Blob writes still running at shutdown"
            );
        } else if running > 0 {
            info!(completed = running, "Blob writes drained");
        }
    }

    async fn write_blob(&self, id: &str, owner: &str, data: Bytes) {
        let checksum = sha256_hex(&data);

        let result = match self.blobs.put(id, data).await {
            Ok(()) => self.transition(id, FileState::Saved, Some(&checksum)),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(_) => debug!(file_id = %id, "File saved"),
            // The transition was committed; only its announcement got lost
            Err(UploadError::Bus(e)) => {
                error!(token = %owner, file_id = %id, error = %e, "File state publish error");
            }
            Err(e) => {
                error!(token = %owner, file_id = %id, error = %e, "File save error");
                self.report_failure(id, owner);
            }
        }
    }

    fn report_failure(&self, id: &str, owner: &str) {
        if self.persist_failures {
            if let Err(e) = self.file_state_change(id, FileState::Failed) {
                error!(token = %owner, file_id = %id, error = %e, "Failed to record failed upload");
            }
            return;
        }

        let event = FileEvent {
            file_id: id.to_string(),
            state: EventState::Error,
        };
        if let Err(e) = self.bus.publish(&user_topic(owner), &event) {
            error!(token = %owner, file_id = %id, error = %e, "File save publish error");
        }
    }

    fn transition(
        &self,
        id: &str,
        state: FileState,
        checksum: Option<&str>,
    ) -> Result<FileRecord, UploadError> {
        let file = match self.db.transition_file(id, state, checksum)? {
            TransitionOutcome::Applied(file) => file,
            TransitionOutcome::Rejected { from } => {
                return Err(UploadError::InvalidTransition { from, to: state })
            }
            TransitionOutcome::NotFound => return Err(UploadError::NotFound(id.to_string())),
        };

        let event = FileEvent {
            file_id: file.id.clone(),
            state: file.state.into(),
        };
        self.bus.publish(FILE_TOPIC, &event)?;
        self.bus.publish(&user_topic(&file.owner), &event)?;

        Ok(file)
    }
}

/// Log every transition seen on the `file` topic until the bus closes.
pub async fn log_file_events(bus: EventBus) {
    let mut stream = match bus.subscribe(FILE_TOPIC).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to subscribe");
            return;
        }
    };

    debug!("Subscribed on file");
    while let Some(message) = stream.recv().await {
        match message.decode::<FileEvent>() {
            Ok(event) => debug!(file_id = %event.file_id, state = ?event.state, "File event"),
            Err(e) => warn!(error = %e, "Malformed file event"),
        }
    }
    debug!("Subscription closed");
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, data);
    digest.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}
