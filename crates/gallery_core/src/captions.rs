//! Caption requirements and submit-time validation. Field values are read
//! live at validation time rather than cached, so direct edits can never
//! go stale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::domain::ImageId;
use tokio::sync::watch;

/// One caption input, plain or rich. Implementations own their inline
/// error presentation; the registry only decides when to show or clear it.
pub trait CaptionField: Send + Sync {
    /// The live field value.
    fn value(&self) -> String;
    fn set_inline_error(&self, message: &str);
    fn clear_inline_error(&self);
    fn inline_error(&self) -> Option<String>;
    fn focus(&self);
}

/// The rich-text editor collaborator, reduced to the surface this
/// component consumes. Captions are agnostic to whether they are backed by
/// a plain textarea or one of these.
pub trait StructuredTextField: Send + Sync {
    /// The field contents with editor-internal markup cleaned out.
    fn clean_contents(&self) -> String;
    fn set_editable_content(&self, content: &str);
    /// Bumped on every (debounced) edit.
    fn changes(&self) -> watch::Receiver<u64>;
}

#[derive(Debug, Default)]
struct FieldState {
    value: String,
    inline_error: Option<String>,
    focused: bool,
}

/// In-memory caption field for plain textareas and tests.
pub struct PlainCaptionField {
    name: String,
    state: Mutex<FieldState>,
}

impl PlainCaptionField {
    pub fn new(name: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FieldState {
                value: initial.into(),
                ..FieldState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FieldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_value(&self, value: impl Into<String>) {
        self.lock().value = value.into();
    }

    pub fn is_focused(&self) -> bool {
        self.lock().focused
    }
}

impl CaptionField for PlainCaptionField {
    fn value(&self) -> String {
        self.lock().value.clone()
    }

    fn set_inline_error(&self, message: &str) {
        self.lock().inline_error = Some(message.to_string());
    }

    fn clear_inline_error(&self) {
        self.lock().inline_error = None;
    }

    fn inline_error(&self) -> Option<String> {
        self.lock().inline_error.clone()
    }

    fn focus(&self) {
        self.lock().focused = true;
    }
}

#[derive(Debug, Default)]
struct AdapterState {
    inline_error: Option<String>,
    focused: bool,
}

/// Backs a caption with a rich editor field. The inline error and focus
/// bookkeeping live here; the value always comes from the editor.
pub struct StructuredCaptionField<T: StructuredTextField> {
    field: T,
    state: Mutex<AdapterState>,
}

impl<T: StructuredTextField> StructuredCaptionField<T> {
    pub fn new(field: T) -> Self {
        Self {
            field,
            state: Mutex::new(AdapterState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: StructuredTextField> CaptionField for StructuredCaptionField<T> {
    fn value(&self) -> String {
        self.field.clean_contents()
    }

    fn set_inline_error(&self, message: &str) {
        self.lock().inline_error = Some(message.to_string());
    }

    fn clear_inline_error(&self) {
        self.lock().inline_error = None;
    }

    fn inline_error(&self) -> Option<String> {
        self.lock().inline_error.clone()
    }

    fn focus(&self) {
        self.lock().focused = true;
    }
}

/// Outcome of a submit-time validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    /// First offending item in display order, for focus placement.
    pub first_invalid: Option<ImageId>,
}

/// Maps gallery items to their caption fields. Holds back-references only;
/// item ownership stays with the ordered sequence.
#[derive(Default)]
pub struct CaptionRegistry {
    fields: HashMap<ImageId, Arc<dyn CaptionField>>,
}

impl CaptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, image: ImageId, field: Arc<dyn CaptionField>) {
        self.fields.insert(image, field);
    }

    pub fn unregister(&mut self, image: &ImageId) -> Option<Arc<dyn CaptionField>> {
        self.fields.remove(image)
    }

    pub fn field(&self, image: &ImageId) -> Option<Arc<dyn CaptionField>> {
        self.fields.get(image).cloned()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate every registered caption, walking `order` so the first
    /// failure is the top-most one on screen. A field's previous inline
    /// error is always cleared before a new one is attached, so at most
    /// one message is showing per field at any time.
    pub fn validate_all(&self, order: &[ImageId], required_text: &str) -> ValidationReport {
        let mut first_invalid = None;
        for image in order {
            let Some(field) = self.fields.get(image) else {
                continue;
            };
            field.clear_inline_error();
            if field.value().trim().is_empty() {
                field.set_inline_error(required_text);
                if first_invalid.is_none() {
                    first_invalid = Some(image.clone());
                }
            }
        }
        ValidationReport {
            ok: first_invalid.is_none(),
            first_invalid,
        }
    }
}
