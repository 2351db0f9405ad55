//! Upload session: the progress-row view model and the outstanding-upload
//! counter.
//!
//! Slot accounting is the load-bearing part. A slot is reserved per file
//! when a batch is registered and released by exactly one terminal
//! transition (done or failed) for that file, no matter how per-file event
//! streams interleave. Client-side validation rejections happen before a
//! file is ever registered, so they never touch the counter, only the
//! notice list.

use shared::domain::UploadId;
use upload_engine::QueuedFile;

/// Display state of one upload's progress row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStatus {
    Queued,
    Uploading(u8),
    Done,
    Failed(String),
}

impl RowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RowStatus::Done | RowStatus::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct ProgressRow {
    pub file: UploadId,
    pub name: String,
    pub status: RowStatus,
}

/// What a terminal event did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTransition {
    Applied { settled: bool },
    /// The event referenced an unknown or already-finished row; nothing
    /// changed. Stale events are tolerated, not treated as faults.
    Ignored,
}

#[derive(Debug, Default)]
pub struct UploadSession {
    rows: Vec<ProgressRow>,
    notices: Vec<String>,
    outstanding: usize,
}

impl UploadSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding == 0
    }

    pub fn rows(&self) -> &[ProgressRow] {
        &self.rows
    }

    pub fn row(&self, file: &UploadId) -> Option<&ProgressRow> {
        self.rows.iter().find(|row| &row.file == file)
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    /// Empty the upload list (engine init).
    pub fn clear(&mut self) {
        self.rows.clear();
        self.notices.clear();
    }

    /// Add one row per accepted file and reserve a slot for each.
    pub fn register_files(&mut self, files: &[QueuedFile]) -> Vec<UploadId> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            self.rows.push(ProgressRow {
                file: file.id.clone(),
                name: file.name.clone(),
                status: RowStatus::Queued,
            });
            ids.push(file.id.clone());
        }
        self.outstanding += files.len();
        ids
    }

    fn row_mut(&mut self, file: &UploadId) -> Option<&mut ProgressRow> {
        self.rows.iter_mut().find(|row| &row.file == file)
    }

    /// Update a row's percentage. Returns false when the row is gone or
    /// already finished; the event is silently dropped and the counter is
    /// untouched.
    pub fn update_progress(&mut self, file: &UploadId, percent: u8) -> bool {
        match self.row_mut(file) {
            Some(row) if !row.status.is_terminal() => {
                row.status = RowStatus::Uploading(percent.min(100));
                true
            }
            _ => false,
        }
    }

    pub fn complete(&mut self, file: &UploadId) -> RowTransition {
        match self.row_mut(file) {
            Some(row) if !row.status.is_terminal() => {
                row.status = RowStatus::Done;
                self.release()
            }
            _ => RowTransition::Ignored,
        }
    }

    pub fn fail(&mut self, file: &UploadId, message: impl Into<String>) -> RowTransition {
        match self.row_mut(file) {
            Some(row) if !row.status.is_terminal() => {
                row.status = RowStatus::Failed(message.into());
                self.release()
            }
            _ => RowTransition::Ignored,
        }
    }

    /// Release a reserved slot that has no attributable row (an engine
    /// failure without a file reference). Without this the counter would
    /// never reach zero and the session could not settle.
    pub fn release_slot(&mut self) -> RowTransition {
        if self.outstanding == 0 {
            return RowTransition::Ignored;
        }
        self.release()
    }

    /// Append a plain-text notice. Never touches the counter.
    pub fn push_notice(&mut self, message: impl Into<String>) {
        self.notices.push(message.into());
    }

    fn release(&mut self) -> RowTransition {
        self.outstanding = self.outstanding.saturating_sub(1);
        RowTransition::Applied {
            settled: self.outstanding == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(id: &str, name: &str) -> QueuedFile {
        QueuedFile {
            id: UploadId::from(id),
            name: name.to_string(),
            size_bytes: 1,
        }
    }

    #[test]
    fn counter_converges_regardless_of_event_order() {
        let mut session = UploadSession::new();
        session.register_files(&[
            queued("a", "a.jpg"),
            queued("b", "b.jpg"),
            queued("c", "c.jpg"),
        ]);
        assert_eq!(session.outstanding(), 3);

        // Terminal events arrive out of registration order, interleaved
        // with progress for other files.
        assert!(session.update_progress(&UploadId::from("c"), 40));
        assert_eq!(
            session.fail(&UploadId::from("b"), "transport"),
            RowTransition::Applied { settled: false }
        );
        assert!(session.update_progress(&UploadId::from("a"), 90));
        assert_eq!(
            session.complete(&UploadId::from("c")),
            RowTransition::Applied { settled: false }
        );
        assert_eq!(
            session.complete(&UploadId::from("a")),
            RowTransition::Applied { settled: true }
        );
        assert!(session.is_idle());
    }

    #[test]
    fn second_terminal_event_for_a_file_is_ignored() {
        let mut session = UploadSession::new();
        session.register_files(&[queued("a", "a.jpg")]);

        assert_eq!(
            session.complete(&UploadId::from("a")),
            RowTransition::Applied { settled: true }
        );
        assert_eq!(
            session.fail(&UploadId::from("a"), "late error"),
            RowTransition::Ignored
        );
        assert_eq!(session.outstanding(), 0);
        assert_eq!(
            session.row(&UploadId::from("a")).map(|r| r.status.clone()),
            Some(RowStatus::Done)
        );
    }

    #[test]
    fn stale_progress_is_a_noop() {
        let mut session = UploadSession::new();
        session.register_files(&[queued("a", "a.jpg")]);
        session.complete(&UploadId::from("a"));

        assert!(!session.update_progress(&UploadId::from("a"), 50));
        assert!(!session.update_progress(&UploadId::from("ghost"), 50));
        assert_eq!(session.outstanding(), 0);
    }

    #[test]
    fn notices_never_touch_the_counter() {
        let mut session = UploadSession::new();
        session.push_notice("Not adding: notes.txt. File must end in: jpg,gif,png");
        assert_eq!(session.outstanding(), 0);
        assert_eq!(session.notices().len(), 1);
    }

    #[test]
    fn release_slot_without_row_still_settles() {
        let mut session = UploadSession::new();
        session.register_files(&[queued("a", "a.jpg")]);
        assert_eq!(
            session.release_slot(),
            RowTransition::Applied { settled: true }
        );
        // Nothing left to release.
        assert_eq!(session.release_slot(), RowTransition::Ignored);
    }

    #[test]
    fn clear_empties_rows_and_notices() {
        let mut session = UploadSession::new();
        session.register_files(&[queued("a", "a.jpg")]);
        session.complete(&UploadId::from("a"));
        session.push_notice("notice");
        session.clear();
        assert!(session.rows().is_empty());
        assert!(session.notices().is_empty());
        assert!(session.is_idle());
    }

    #[test]
    fn progress_caps_at_one_hundred() {
        let mut session = UploadSession::new();
        session.register_files(&[queued("a", "a.jpg")]);
        session.update_progress(&UploadId::from("a"), 250);
        assert_eq!(
            session.row(&UploadId::from("a")).map(|r| r.status.clone()),
            Some(RowStatus::Uploading(100))
        );
    }
}
