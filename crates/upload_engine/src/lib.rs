//! Multi-file upload engine: picks up locally selected files, validates
//! them client-side, and transfers them to the upload endpoint while
//! emitting a typed event stream consumers can mirror into their own view
//! model. Per-file events carry the engine-assigned [`UploadId`]; no
//! ordering is guaranteed across different files.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use shared::{
    domain::UploadId,
    protocol::{UPLOAD_FIELD_CHUNK, UPLOAD_FIELD_CHUNKS, UPLOAD_FIELD_FILE, UPLOAD_FIELD_NAME},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
const ENGINE_EVENT_CAPACITY: usize = 1024;

/// Where the bytes of a picked file come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl FileSource {
    async fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            FileSource::Path(path) => tokio::fs::read(path).await,
            FileSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// A file the user selected in the picker, not yet accepted by the engine.
#[derive(Debug, Clone)]
pub struct PickedFile {
    pub name: String,
    pub size_bytes: u64,
    pub source: FileSource,
}

impl PickedFile {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size_bytes: bytes.len() as u64,
            source: FileSource::Bytes(bytes),
        }
    }

    pub fn from_path(name: impl Into<String>, size_bytes: u64, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            source: FileSource::Path(path),
        }
    }
}

/// A file the engine accepted and queued for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFile {
    pub id: UploadId,
    pub name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    /// Rejected before transfer: disallowed file extension. No upload slot
    /// was consumed.
    FileExtension,
    /// Rejected before transfer: file exceeds the size limit. No upload
    /// slot was consumed.
    FileSize,
    /// Transfer failed at the HTTP layer. The slot was reserved and must be
    /// released by the consumer.
    Http,
    /// Any other engine failure (e.g. the local file could not be read).
    /// Same slot semantics as `Http`.
    Generic,
}

impl EngineErrorCode {
    pub fn label(&self) -> &'static str {
        match self {
            EngineErrorCode::FileExtension => "file-extension",
            EngineErrorCode::FileSize => "file-size",
            EngineErrorCode::Http => "http",
            EngineErrorCode::Generic => "generic",
        }
    }

    /// Whether the failure consumed an upload slot that was reserved when
    /// the file was queued.
    pub fn consumed_slot(&self) -> bool {
        matches!(self, EngineErrorCode::Http | EngineErrorCode::Generic)
    }
}

#[derive(Debug, Clone)]
pub struct EngineError {
    /// Present when the failing file had already been queued.
    pub file: Option<UploadId>,
    pub file_name: Option<String>,
    pub code: EngineErrorCode,
    pub message: String,
}

/// The typed event union every engine implementation emits.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Init,
    FilesAdded(Vec<QueuedFile>),
    Progress { file: UploadId, percent: u8 },
    FileUploaded { file: UploadId, response: String },
    Error(EngineError),
}

/// Transfer strategies, tried in configured preference order; the first
/// usable one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// Split the file into fixed-size chunks, one multipart POST each.
    Chunked,
    /// A single multipart POST with the whole file.
    Whole,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub upload_url: String,
    pub allowed_extensions: Vec<String>,
    pub max_file_size: u64,
    pub chunk_size: usize,
    pub strategies: Vec<UploadStrategy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            allowed_extensions: vec!["jpg".into(), "gif".into(), "png".into()],
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            strategies: vec![UploadStrategy::Chunked, UploadStrategy::Whole],
        }
    }
}

impl EngineConfig {
    /// The first strategy whose preconditions hold. `Chunked` needs a
    /// positive chunk size; `Whole` is always usable.
    pub fn resolve_strategy(&self) -> UploadStrategy {
        for strategy in &self.strategies {
            match strategy {
                UploadStrategy::Chunked if self.chunk_size > 0 => return UploadStrategy::Chunked,
                UploadStrategy::Whole => return UploadStrategy::Whole,
                _ => {}
            }
        }
        UploadStrategy::Whole
    }
}

#[async_trait]
pub trait UploadEngine: Send + Sync {
    /// Signal readiness; consumers clear any stale upload list on `Init`.
    async fn init(&self) -> Result<()>;

    /// Validate and queue files. Accepted files are announced with
    /// `FilesAdded`; rejected ones emit an `Error` without consuming a
    /// slot. Transfer does not begin until `start`.
    async fn add_files(&self, files: Vec<PickedFile>) -> Result<()>;

    /// Transfer every queued file sequentially. Per-file failures are
    /// reported as events, not as an `Err` of this call.
    async fn start(&self) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

/// Placeholder engine for coordinators constructed without one.
pub struct MissingUploadEngine;

#[async_trait]
impl UploadEngine for MissingUploadEngine {
    async fn init(&self) -> Result<()> {
        Err(anyhow!("upload engine is unavailable"))
    }

    async fn add_files(&self, _files: Vec<PickedFile>) -> Result<()> {
        Err(anyhow!("upload engine is unavailable"))
    }

    async fn start(&self) -> Result<()> {
        Err(anyhow!("upload engine is unavailable"))
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        let (_tx, rx) = broadcast::channel(1);
        rx
    }
}

struct QueuedUpload {
    file: QueuedFile,
    source: FileSource,
}

/// HTTP upload engine posting multipart form data to the configured
/// endpoint. The response body of the final (or only) chunk is the
/// server-rendered fragment for the new gallery item and is propagated
/// verbatim in `FileUploaded`.
pub struct MultipartUploadEngine {
    config: EngineConfig,
    strategy: UploadStrategy,
    http: Client,
    events: broadcast::Sender<EngineEvent>,
    queue: Mutex<Vec<QueuedUpload>>,
}

impl MultipartUploadEngine {
    pub fn new(config: EngineConfig) -> Self {
        let strategy = config.resolve_strategy();
        let (events, _) = broadcast::channel(ENGINE_EVENT_CAPACITY);
        Self {
            config,
            strategy,
            http: Client::new(),
            events,
            queue: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn extension_allowed(&self, name: &str) -> bool {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return false;
        };
        self.config
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }

    fn validate(&self, file: &PickedFile) -> Option<EngineError> {
        if !self.extension_allowed(&file.name) {
            return Some(EngineError {
                file: None,
                file_name: Some(file.name.clone()),
                code: EngineErrorCode::FileExtension,
                message: format!(
                    "File must end in: {}",
                    self.config.allowed_extensions.join(",")
                ),
            });
        }
        if file.size_bytes > self.config.max_file_size {
            return Some(EngineError {
                file: None,
                file_name: Some(file.name.clone()),
                code: EngineErrorCode::FileSize,
                message: format!(
                    "File exceeds the maximum size of {} bytes",
                    self.config.max_file_size
                ),
            });
        }
        None
    }

    async fn transfer(&self, upload: QueuedUpload) {
        let QueuedUpload { file, source } = upload;
        let bytes = match source.read().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(file = %file.id, name = %file.name, error = %err, "failed to read picked file");
                self.emit(EngineEvent::Error(EngineError {
                    file: Some(file.id.clone()),
                    file_name: Some(file.name.clone()),
                    code: EngineErrorCode::Generic,
                    message: format!("failed to read {}: {err}", file.name),
                }));
                return;
            }
        };

        let result = match self.strategy {
            UploadStrategy::Chunked => self.send_chunked(&file, &bytes).await,
            UploadStrategy::Whole => self.send_whole(&file, bytes).await,
        };

        match result {
            Ok(response) => {
                info!(file = %file.id, name = %file.name, "upload finished");
                self.emit(EngineEvent::FileUploaded {
                    file: file.id,
                    response,
                });
            }
            Err(err) => {
                warn!(file = %file.id, name = %file.name, error = %err, "upload failed");
                self.emit(EngineEvent::Error(EngineError {
                    file: Some(file.id.clone()),
                    file_name: Some(file.name.clone()),
                    code: EngineErrorCode::Http,
                    message: err.to_string(),
                }));
            }
        }
    }

    async fn send_chunked(&self, file: &QueuedFile, bytes: &[u8]) -> Result<String> {
        let chunk_size = self.config.chunk_size.max(1);
        let chunks = bytes.chunks(chunk_size).count().max(1);
        let mut response_body = String::new();

        for (index, chunk) in bytes.chunks(chunk_size).enumerate() {
            let part = Part::bytes(chunk.to_vec()).file_name(file.name.clone());
            let form = Form::new()
                .text(UPLOAD_FIELD_NAME, file.name.clone())
                .text(UPLOAD_FIELD_CHUNK, index.to_string())
                .text(UPLOAD_FIELD_CHUNKS, chunks.to_string())
                .part(UPLOAD_FIELD_FILE, part);

            let response = self
                .http
                .post(&self.config.upload_url)
                .multipart(form)
                .send()
                .await?
                .error_for_status()?;

            let percent = (((index + 1) * 100) / chunks) as u8;
            self.emit(EngineEvent::Progress {
                file: file.id.clone(),
                percent,
            });

            if index + 1 == chunks {
                response_body = response.text().await?;
            }
        }

        Ok(response_body)
    }

    async fn send_whole(&self, file: &QueuedFile, bytes: Vec<u8>) -> Result<String> {
        let part = Part::bytes(bytes).file_name(file.name.clone());
        let form = Form::new()
            .text(UPLOAD_FIELD_NAME, file.name.clone())
            .part(UPLOAD_FIELD_FILE, part);

        let response = self
            .http
            .post(&self.config.upload_url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        self.emit(EngineEvent::Progress {
            file: file.id.clone(),
            percent: 100,
        });

        Ok(response.text().await?)
    }
}

#[async_trait]
impl UploadEngine for MultipartUploadEngine {
    async fn init(&self) -> Result<()> {
        self.emit(EngineEvent::Init);
        Ok(())
    }

    async fn add_files(&self, files: Vec<PickedFile>) -> Result<()> {
        let mut accepted = Vec::new();
        for file in files {
            if let Some(error) = self.validate(&file) {
                info!(name = %file.name, code = error.code.label(), "rejected picked file");
                self.emit(EngineEvent::Error(error));
                continue;
            }
            let queued = QueuedFile {
                id: UploadId::new(Uuid::new_v4().to_string()),
                name: file.name.clone(),
                size_bytes: file.size_bytes,
            };
            accepted.push(queued.clone());
            self.queue.lock().await.push(QueuedUpload {
                file: queued,
                source: file.source,
            });
        }

        if !accepted.is_empty() {
            info!(files = accepted.len(), "queued upload batch");
            self.emit(EngineEvent::FilesAdded(accepted));
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let batch: Vec<QueuedUpload> = {
            let mut queue = self.queue.lock().await;
            queue.drain(..).collect()
        };
        for upload in batch {
            self.transfer(upload).await;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
