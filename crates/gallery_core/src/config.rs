use std::ops::RangeInclusive;

use serde::Deserialize;
use upload_engine::EngineConfig;

use crate::error::GalleryError;

/// When queued files begin transferring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Transfer starts as soon as a batch is queued.
    Immediate,
    /// Transfer waits for an explicit confirmation (`start_upload`).
    Confirm,
}

/// All knobs of the gallery component in one explicit struct handed to the
/// coordinator at construction; nothing is read from globals. Historical
/// deployments disagreed on the image-count bound and on whether submission
/// is blocked mid-upload, so both are configuration rather than behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// Base URL for the delete/reorder transport.
    pub base_url: String,
    /// Endpoint the upload engine posts files to.
    pub upload_url: String,
    pub min_images: usize,
    pub max_images: usize,
    pub block_submit_during_upload: bool,
    pub start_policy: StartPolicy,
    pub allowed_extensions: Vec<String>,
    pub max_file_size: u64,
    pub chunk_size: usize,
    /// Inline message attached to an empty required caption.
    pub caption_required_text: String,
    /// Class hook marking a delete affordance inside an item fragment.
    pub delete_class: String,
    /// Class hook marking the image container inside an item fragment.
    pub item_container_class: String,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            upload_url: String::new(),
            min_images: 15,
            max_images: 20,
            block_submit_during_upload: true,
            start_policy: StartPolicy::Confirm,
            allowed_extensions: vec!["jpg".into(), "gif".into(), "png".into()],
            max_file_size: 10 * 1024 * 1024,
            chunk_size: 1024 * 1024,
            caption_required_text: "Caption required".into(),
            delete_class: "image-delete".into(),
            item_container_class: "image-container".into(),
        }
    }
}

impl GalleryConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, GalleryError> {
        toml::from_str(raw).map_err(|err| GalleryError::Config(err.to_string()))
    }

    /// Inclusive bound the gallery item count must satisfy for submission.
    pub fn image_bounds(&self) -> RangeInclusive<usize> {
        self.min_images..=self.max_images
    }

    pub fn extensions_label(&self) -> String {
        self.allowed_extensions.join(",")
    }

    /// Engine options derived from the gallery's own settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            upload_url: self.upload_url.clone(),
            allowed_extensions: self.allowed_extensions.clone(),
            max_file_size: self.max_file_size,
            chunk_size: self.chunk_size,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_strictest_deployment() {
        let config = GalleryConfig::default();
        assert_eq!(config.image_bounds(), 15..=20);
        assert!(config.block_submit_during_upload);
        assert_eq!(config.start_policy, StartPolicy::Confirm);
        assert_eq!(config.extensions_label(), "jpg,gif,png");
        assert_eq!(config.caption_required_text, "Caption required");
    }

    #[test]
    fn toml_overrides_policy_and_bounds() {
        let config = GalleryConfig::from_toml_str(
            r#"
            base_url = "https://example.test"
            upload_url = "https://example.test/upload"
            min_images = 1
            max_images = 3
            block_submit_during_upload = false
            start_policy = "immediate"
            "#,
        )
        .expect("parse config");

        assert_eq!(config.image_bounds(), 1..=3);
        assert!(!config.block_submit_during_upload);
        assert_eq!(config.start_policy, StartPolicy::Immediate);
        // Unspecified keys keep their defaults.
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = GalleryConfig::from_toml_str("min_images = \"many\"").unwrap_err();
        assert!(matches!(err, GalleryError::Config(_)));
    }

    #[test]
    fn engine_config_inherits_upload_settings() {
        let config = GalleryConfig {
            upload_url: "https://example.test/upload".into(),
            allowed_extensions: vec!["jpg".into()],
            ..GalleryConfig::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.upload_url, "https://example.test/upload");
        assert_eq!(engine.allowed_extensions, vec!["jpg".to_string()]);
        assert_eq!(engine.chunk_size, config.chunk_size);
    }
}
