//! Wire helpers shared by the upload engine and the gallery client.

use serde::Serialize;

use crate::domain::ImageId;

/// Multipart field names for chunked uploads. The server reassembles the
/// file from `chunk`/`chunks` bookkeeping keyed by `name`.
pub const UPLOAD_FIELD_NAME: &str = "name";
pub const UPLOAD_FIELD_CHUNK: &str = "chunk";
pub const UPLOAD_FIELD_CHUNKS: &str = "chunks";
pub const UPLOAD_FIELD_FILE: &str = "file";

/// Path of the fire-and-forget image delete endpoint.
pub fn delete_image_path(image: &ImageId) -> String {
    format!("/image/{}/delete", image.0)
}

/// Path of the fire-and-forget reorder endpoint.
pub const REORDER_PATH: &str = "/reorder-images";

/// Form body for the reorder endpoint: `order=<comma-separated ids>`, the
/// ids in current visual order.
#[derive(Debug, Clone, Serialize)]
pub struct ReorderRequest {
    pub order: String,
}

impl ReorderRequest {
    pub fn new(order: &[ImageId]) -> Self {
        let ids: Vec<&str> = order.iter().map(|id| id.as_str()).collect();
        Self {
            order: ids.join(","),
        }
    }
}
