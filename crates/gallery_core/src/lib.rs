//! Client-side gallery coordinator for an entry form: assembles uploaded
//! images into a bounded, captioned, reorderable gallery and gates form
//! submission on the result.
//!
//! The coordinator reconciles the independently-timed upload engine
//! events, drag gestures, and caption edits into one consistent view
//! model. All state lives behind a single async mutex; every handler locks
//! once, mutates, and releases, so any interleaving of events observes a
//! consistent model. Per-file state is keyed by the engine-assigned upload
//! id, never by arrival order.

use std::sync::Arc;

use shared::domain::{ImageId, UploadId};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use upload_engine::{
    EngineError, EngineErrorCode, EngineEvent, MissingUploadEngine, PickedFile, QueuedFile,
    UploadEngine,
};

pub mod captions;
pub mod config;
pub mod error;
pub mod fragment;
pub mod ordering;
pub mod session;
pub mod transport;

pub use captions::{
    CaptionField, CaptionRegistry, PlainCaptionField, StructuredCaptionField, StructuredTextField,
    ValidationReport,
};
pub use config::{GalleryConfig, StartPolicy};
pub use error::GalleryError;
pub use fragment::{image_id_from_src, CaptionSpec, Fragment, ItemSummary, NodeId};
pub use ordering::{image_handle_resolver, GalleryItem, HandleResolver, OrderController};
pub use session::{ProgressRow, RowStatus, RowTransition, UploadSession};
pub use transport::{HttpTransport, MissingTransport, Transport};

const GALLERY_EVENT_CAPACITY: usize = 1024;

/// Coordinator lifecycle, derived from the outstanding-upload counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryPhase {
    Idle,
    Uploading(usize),
}

/// View-model notifications for an embedding UI.
#[derive(Debug, Clone)]
pub enum GalleryEvent {
    RowsCleared,
    RowsAdded { files: Vec<UploadId> },
    RowUpdated { file: UploadId, status: RowStatus },
    NoticeAppended { message: String },
    UploadControlsVisible(bool),
    ItemInserted { image: ImageId, markup: String },
    ItemRemoved { image: ImageId },
    OrderSurfaceRebuilt,
    OrderChanged { order: Vec<ImageId> },
    CaptionBannerVisible(bool),
    SubmitGateChanged { enabled: bool, item_count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Allowed,
    Blocked(SubmitBlock),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitBlock {
    ItemCount { count: usize, min: usize, max: usize },
    UploadsInFlight { outstanding: usize },
    /// At least one required caption is empty; `first` is the top-most
    /// offending item, already focused.
    MissingCaptions { first: ImageId },
}

/// Materializes caption fields for newly admitted items. The default
/// provider builds plain in-memory fields; embedders with a rich editor
/// supply their own.
pub trait CaptionFieldProvider: Send + Sync {
    fn create_field(&self, image: &ImageId, spec: &CaptionSpec) -> Arc<dyn CaptionField>;
}

pub struct PlainFieldProvider;

impl CaptionFieldProvider for PlainFieldProvider {
    fn create_field(&self, _image: &ImageId, spec: &CaptionSpec) -> Arc<dyn CaptionField> {
        Arc::new(PlainCaptionField::new(spec.name.clone(), spec.initial.clone()))
    }
}

struct CoordinatorState {
    session: UploadSession,
    order: OrderController,
    captions: CaptionRegistry,
    submit_enabled: bool,
    caption_banner_visible: bool,
    upload_controls_visible: bool,
}

pub struct GalleryCoordinator {
    config: GalleryConfig,
    engine: Arc<dyn UploadEngine>,
    transport: Arc<dyn Transport>,
    fields: Arc<dyn CaptionFieldProvider>,
    inner: Mutex<CoordinatorState>,
    events: broadcast::Sender<GalleryEvent>,
}

impl GalleryCoordinator {
    pub fn new(config: GalleryConfig) -> Arc<Self> {
        Self::new_with_dependencies(
            config,
            Arc::new(MissingUploadEngine),
            Arc::new(MissingTransport),
            Arc::new(PlainFieldProvider),
        )
    }

    pub fn new_with_dependencies(
        config: GalleryConfig,
        engine: Arc<dyn UploadEngine>,
        transport: Arc<dyn Transport>,
        fields: Arc<dyn CaptionFieldProvider>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(GALLERY_EVENT_CAPACITY);
        let order = OrderController::new(image_handle_resolver(&config.item_container_class));
        Arc::new(Self {
            config,
            engine,
            transport,
            fields,
            inner: Mutex::new(CoordinatorState {
                session: UploadSession::new(),
                order,
                captions: CaptionRegistry::new(),
                submit_enabled: false,
                caption_banner_visible: false,
                upload_controls_visible: false,
            }),
            events,
        })
    }

    pub fn config(&self) -> &GalleryConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GalleryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: GalleryEvent) {
        let _ = self.events.send(event);
    }

    /// Forward engine events into the dispatch function until the engine's
    /// stream closes.
    pub fn spawn_event_pump(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.engine.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.handle_engine_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "engine event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Admit the images the page was initially rendered with, then bind
    /// the drag surface and compute the submit gate. Fragments here come
    /// from the server's own render and are trusted; a malformed one is an
    /// error to the embedder rather than a tolerated row failure.
    pub async fn bootstrap(&self, fragments: Vec<String>) -> Result<usize, GalleryError> {
        let mut state = self.inner.lock().await;
        let mut admitted = 0usize;
        for markup in fragments {
            self.admit_fragment(&mut state, &markup)?;
            admitted += 1;
        }
        state.order.initialize();
        self.emit(GalleryEvent::OrderSurfaceRebuilt);
        if !state.order.is_empty() {
            state.caption_banner_visible = true;
            self.emit(GalleryEvent::CaptionBannerVisible(true));
        }
        self.refresh_submit_gate(&mut state);
        info!(items = admitted, "gallery bootstrapped");
        Ok(admitted)
    }

    /// Hand picked files to the engine. Validation results and row
    /// bookkeeping come back through the event stream.
    pub async fn add_files(&self, files: Vec<PickedFile>) -> Result<(), GalleryError> {
        self.engine
            .add_files(files)
            .await
            .map_err(|err| GalleryError::Engine(err.to_string()))
    }

    /// Explicit user confirmation to begin transferring. Hides the upload
    /// controls and starts the engine without blocking on the transfers.
    pub async fn start_upload(&self) {
        {
            let mut state = self.inner.lock().await;
            if state.upload_controls_visible {
                state.upload_controls_visible = false;
                self.emit(GalleryEvent::UploadControlsVisible(false));
            }
        }
        self.start_engine();
    }

    fn start_engine(&self) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(err) = engine.start().await {
                warn!(error = %err, "upload engine start failed");
            }
        });
    }

    /// The single dispatch point for the engine's typed event union.
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Init => {
                let mut state = self.inner.lock().await;
                state.session.clear();
                self.emit(GalleryEvent::RowsCleared);
            }
            EngineEvent::FilesAdded(files) => self.on_files_added(files).await,
            EngineEvent::Progress { file, percent } => self.on_progress(file, percent).await,
            EngineEvent::FileUploaded { file, response } => {
                self.on_file_uploaded(file, response).await
            }
            EngineEvent::Error(error) => self.on_engine_error(error).await,
        }
    }

    async fn on_files_added(&self, files: Vec<QueuedFile>) {
        let start_now = {
            let mut state = self.inner.lock().await;
            let ids = state.session.register_files(&files);
            info!(
                files = ids.len(),
                outstanding = state.session.outstanding(),
                "upload batch registered"
            );
            self.emit(GalleryEvent::RowsAdded { files: ids });
            if self.config.start_policy == StartPolicy::Confirm
                && !state.upload_controls_visible
            {
                state.upload_controls_visible = true;
                self.emit(GalleryEvent::UploadControlsVisible(true));
            }
            self.refresh_submit_gate(&mut state);
            self.config.start_policy == StartPolicy::Immediate
        };
        if start_now {
            self.start_engine();
        }
    }

    async fn on_progress(&self, file: UploadId, percent: u8) {
        let mut state = self.inner.lock().await;
        if state.session.update_progress(&file, percent) {
            self.emit(GalleryEvent::RowUpdated {
                file,
                status: RowStatus::Uploading(percent.min(100)),
            });
        }
        // A row can be gone by the time its progress arrives; that race is
        // tolerated, not a fault.
    }

    async fn on_file_uploaded(&self, file: UploadId, response: String) {
        let mut state = self.inner.lock().await;

        let transition = match self.admit_fragment(&mut state, &response) {
            Ok(image) => {
                info!(file = %file, image = %image, "gallery item inserted");
                state.session.complete(&file)
            }
            Err(GalleryError::DuplicateItem(image)) => {
                // The server echoed an item we already hold; keep the
                // existing entry but the slot is spent either way.
                warn!(file = %file, image = %image, "duplicate gallery item from server; insert skipped");
                state.session.complete(&file)
            }
            Err(err) => {
                warn!(file = %file, error = %err, "uploaded item fragment rejected");
                state.session.fail(&file, "Error uploading file.")
            }
        };

        self.report_row(&state, &file, transition);
        if let RowTransition::Applied { settled: true } = transition {
            self.settle(&mut state);
        }
    }

    async fn on_engine_error(&self, error: EngineError) {
        let mut state = self.inner.lock().await;
        let EngineError {
            file,
            file_name,
            code,
            message,
        } = error;

        if !code.consumed_slot() {
            // Rejected before transfer: no slot was reserved, so only a
            // notice is appended.
            let name = file_name.unwrap_or_else(|| "file".to_string());
            let notice = format!("Not adding: {name}. {message}");
            state.session.push_notice(notice.clone());
            self.emit(GalleryEvent::NoticeAppended { message: notice });
            return;
        }

        let row_message = match code {
            EngineErrorCode::Http => "Error uploading file.".to_string(),
            _ => format!("Error: {} - {message}", code.label()),
        };

        let transition = match &file {
            Some(id) => state.session.fail(id, row_message.clone()),
            None => {
                state.session.push_notice(row_message.clone());
                self.emit(GalleryEvent::NoticeAppended {
                    message: row_message,
                });
                state.session.release_slot()
            }
        };

        if let Some(id) = &file {
            self.report_row(&state, id, transition);
        }
        if let RowTransition::Applied { settled: true } = transition {
            self.settle(&mut state);
        }
    }

    /// Parse a served fragment and admit its item into the ordered
    /// sequence and, when the fragment carries a caption field, into the
    /// caption registry.
    fn admit_fragment(
        &self,
        state: &mut CoordinatorState,
        markup: &str,
    ) -> Result<ImageId, GalleryError> {
        let fragment = Fragment::parse(markup)?;
        let summary = fragment.item_summary()?;
        let image = summary.image.clone();
        state
            .order
            .insert(GalleryItem::new(image.clone(), fragment, markup.to_string()))?;
        if let Some(spec) = &summary.caption {
            let field = self.fields.create_field(&image, spec);
            state.captions.register(image.clone(), field);
        }
        self.emit(GalleryEvent::ItemInserted {
            image: image.clone(),
            markup: markup.to_string(),
        });
        Ok(image)
    }

    fn report_row(&self, state: &CoordinatorState, file: &UploadId, transition: RowTransition) {
        match transition {
            RowTransition::Applied { .. } => {
                if let Some(row) = state.session.row(file) {
                    self.emit(GalleryEvent::RowUpdated {
                        file: file.clone(),
                        status: row.status.clone(),
                    });
                }
            }
            RowTransition::Ignored => {
                warn!(file = %file, "terminal event for unknown or finished upload row ignored");
            }
        }
    }

    /// The settle step, run when the outstanding counter returns to zero:
    /// rebind the drag surface over the new membership, reveal the caption
    /// banner once items exist, recompute the submit gate.
    fn settle(&self, state: &mut CoordinatorState) {
        state.order.initialize();
        self.emit(GalleryEvent::OrderSurfaceRebuilt);
        if !state.order.is_empty() && !state.caption_banner_visible {
            state.caption_banner_visible = true;
            self.emit(GalleryEvent::CaptionBannerVisible(true));
        }
        self.refresh_submit_gate(state);
        info!(items = state.order.len(), "upload session settled");
    }

    /// Count bounds and the uploads-in-flight rule decide the visible
    /// submit control; caption completeness is deliberately left to
    /// `try_submit` so the user is not flooded with errors mid-typing.
    fn refresh_submit_gate(&self, state: &mut CoordinatorState) {
        let count = state.order.len();
        let uploading = state.session.outstanding() > 0;
        let enabled = self.config.image_bounds().contains(&count)
            && !(self.config.block_submit_during_upload && uploading);
        if enabled != state.submit_enabled {
            state.submit_enabled = enabled;
            self.emit(GalleryEvent::SubmitGateChanged {
                enabled,
                item_count: count,
            });
        }
    }

    /// Handle a click inside the gallery list. Acts only when the clicked
    /// node is a delete affordance: the enclosing item container is found
    /// by ancestor search (the affordance may be nested in decorative
    /// wrappers), the image id comes from the contained image's src, and
    /// the item is removed optimistically: sequence and caption
    /// requirement first, then the delete request is fired without being
    /// awaited.
    ///
    /// Returns whether a delete was performed.
    pub async fn handle_item_click(
        &self,
        item_index: usize,
        node: NodeId,
    ) -> Result<bool, GalleryError> {
        let mut state = self.inner.lock().await;

        let image = {
            let Some(item) = state.order.item_at(item_index) else {
                return Ok(false);
            };
            if !item.fragment.has_class(node, &self.config.delete_class) {
                return Ok(false);
            }
            let resolved = item
                .fragment
                .closest_with_class(node, &self.config.item_container_class)
                .and_then(|container| item.fragment.first_element_child(container))
                .and_then(|img| item.fragment.attr(img, "src"))
                .and_then(image_id_from_src);
            match resolved {
                Some(image) => image,
                None => return Ok(false),
            }
        };

        state.order.remove(&image)?;
        state.captions.unregister(&image);
        info!(image = %image, "gallery item removed");
        self.emit(GalleryEvent::ItemRemoved {
            image: image.clone(),
        });

        // Membership changed; the surface snapshot is rebuilt immediately
        // so the removal is visible to the next gesture.
        state.order.initialize();
        self.emit(GalleryEvent::OrderSurfaceRebuilt);

        if state.order.is_empty() && state.caption_banner_visible {
            state.caption_banner_visible = false;
            self.emit(GalleryEvent::CaptionBannerVisible(false));
        }
        self.refresh_submit_gate(&mut state);
        drop(state);

        // Fire-and-forget by design: the UI never waits for the delete
        // response; a failure only logs and the views diverge until the
        // next page load.
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(err) = transport.delete_image(&image).await {
                warn!(image = %image, error = %err, "image delete request dropped");
            }
        });
        Ok(true)
    }

    /// Rebind the drag surface explicitly (embedders call this if they
    /// manage surface lifecycle outside the settle step).
    pub async fn initialize_order_surface(&self) {
        let mut state = self.inner.lock().await;
        state.order.initialize();
        self.emit(GalleryEvent::OrderSurfaceRebuilt);
    }

    pub async fn begin_drag(&self, image: &ImageId) -> Result<(), GalleryError> {
        self.inner.lock().await.order.begin_drag(image)
    }

    pub async fn cancel_drag(&self) {
        self.inner.lock().await.order.cancel_drag();
    }

    pub async fn drop_on(&self, target: usize) -> Result<Vec<ImageId>, GalleryError> {
        let order = self.inner.lock().await.order.drop_on(target)?;
        self.push_order(order.clone());
        Ok(order)
    }

    pub async fn drop_after_last(&self) -> Result<Vec<ImageId>, GalleryError> {
        let order = self.inner.lock().await.order.drop_after_last()?;
        self.push_order(order.clone());
        Ok(order)
    }

    fn push_order(&self, order: Vec<ImageId>) {
        self.emit(GalleryEvent::OrderChanged {
            order: order.clone(),
        });
        // Fire-and-forget: ordering is authoritative only in the client's
        // own view until the next page load.
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(err) = transport.push_order(&order).await {
                warn!(error = %err, "reorder push dropped");
            }
        });
    }

    /// Submit-time gate: count bounds, then the in-flight rule, then the
    /// lazy caption validation. The first offending caption field is
    /// focused before the block is reported.
    pub async fn try_submit(&self) -> SubmitOutcome {
        let state = self.inner.lock().await;

        let count = state.order.len();
        let bounds = self.config.image_bounds();
        if !bounds.contains(&count) {
            return SubmitOutcome::Blocked(SubmitBlock::ItemCount {
                count,
                min: *bounds.start(),
                max: *bounds.end(),
            });
        }

        let outstanding = state.session.outstanding();
        if self.config.block_submit_during_upload && outstanding > 0 {
            return SubmitOutcome::Blocked(SubmitBlock::UploadsInFlight { outstanding });
        }

        let report = state
            .captions
            .validate_all(&state.order.order(), &self.config.caption_required_text);
        if let Some(first) = report.first_invalid {
            if let Some(field) = state.captions.field(&first) {
                field.focus();
            }
            info!(image = %first, "submission blocked on missing caption");
            return SubmitOutcome::Blocked(SubmitBlock::MissingCaptions { first });
        }

        SubmitOutcome::Allowed
    }

    pub async fn phase(&self) -> GalleryPhase {
        match self.inner.lock().await.session.outstanding() {
            0 => GalleryPhase::Idle,
            n => GalleryPhase::Uploading(n),
        }
    }

    pub async fn gallery_order(&self) -> Vec<ImageId> {
        self.inner.lock().await.order.order()
    }

    pub async fn item_count(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    /// Snapshot of the item at a visual position, fragment included, for
    /// embedders resolving click targets against the served markup.
    pub async fn item_at(&self, index: usize) -> Option<GalleryItem> {
        self.inner.lock().await.order.item_at(index).cloned()
    }

    pub async fn rows(&self) -> Vec<ProgressRow> {
        self.inner.lock().await.session.rows().to_vec()
    }

    pub async fn notices(&self) -> Vec<String> {
        self.inner.lock().await.session.notices().to_vec()
    }

    pub async fn outstanding_uploads(&self) -> usize {
        self.inner.lock().await.session.outstanding()
    }

    pub async fn submit_enabled(&self) -> bool {
        self.inner.lock().await.submit_enabled
    }

    pub async fn caption_banner_visible(&self) -> bool {
        self.inner.lock().await.caption_banner_visible
    }

    pub async fn upload_controls_visible(&self) -> bool {
        self.inner.lock().await.upload_controls_visible
    }

    /// The caption field registered for an item, for embedders wiring up
    /// real inputs.
    pub async fn caption_field(&self, image: &ImageId) -> Option<Arc<dyn CaptionField>> {
        self.inner.lock().await.captions.field(image)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
