use shared::domain::ImageId;
use thiserror::Error;

/// Failures of gallery operations. None of these are fatal to the
/// embedding page; the worst case is a client/server view divergence that
/// self-corrects on the next page load. No operation is retried.
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("malformed gallery item fragment: {0}")]
    Fragment(String),

    #[error("gallery item {0} is not in the gallery")]
    UnknownItem(ImageId),

    #[error("gallery already contains item {0}")]
    DuplicateItem(ImageId),

    #[error("drag surface is not bound; initialize it first")]
    DragSurfaceUnbound,

    #[error("drag surface snapshot is stale; reinitialize before dragging")]
    StaleDragBinding,

    #[error("no drag handle resolved for item {0}")]
    HandleUnresolved(ImageId),

    #[error("no drag gesture in progress")]
    DragNotActive,

    #[error("drop target {target} is outside the gallery of {len} items")]
    DropOutOfRange { target: usize, len: usize },

    #[error("upload engine call failed: {0}")]
    Engine(String),

    #[error("transport request failed: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
