//! Progress bars for export runs.

use std::path::Path;
use std::sync::Mutex;

use exporter_core::{Document, ExportError, ExportObserver, Workspace};
use exporter_core::export::SkipReason;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::warn;

/// Draws one bar per workspace and one for the image pass.
pub(crate) struct ProgressObserver {
    multi: MultiProgress,
    documents: Mutex<Option<ProgressBar>>,
    images: Mutex<Option<ProgressBar>>,
}

impl ProgressObserver {
    pub(crate) fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            documents: Mutex::new(None),
            images: Mutex::new(None),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:.bold} [{bar:30}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }

    fn with_documents(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.documents.lock()
            && let Some(bar) = guard.as_ref()
        {
            f(bar);
        }
    }

    /// Clears any bars still on screen.
    pub(crate) fn finish(&self) {
        for slot in [&self.documents, &self.images] {
            if let Ok(mut guard) = slot.lock()
                && let Some(bar) = guard.take()
            {
                bar.finish_and_clear();
            }
        }
    }
}

impl ExportObserver for ProgressObserver {
    fn workspace_started(&self, workspace: &Workspace, documents: usize) {
        let bar = self
            .multi
            .add(ProgressBar::new(u64::try_from(documents).unwrap_or(u64::MAX)));
        bar.set_style(Self::bar_style());
        bar.set_prefix(workspace.name.clone());

        if let Ok(mut guard) = self.documents.lock()
            && let Some(previous) = guard.replace(bar)
        {
            previous.finish();
        }
    }

    fn document_started(&self, document: &Document) {
        self.with_documents(|bar| bar.set_message(document.title.clone()));
    }

    fn document_finished(&self, _document: &Document, _path: &Path) {
        self.with_documents(|bar| bar.inc(1));
    }

    fn document_skipped(&self, _document: &Document, _reason: SkipReason) {
        self.with_documents(|bar| bar.inc(1));
    }

    fn document_failed(&self, document: &Document, error: &ExportError) {
        self.with_documents(|bar| {
            bar.suspend(|| warn!(doc = %document.title, %error, "document failed"));
            bar.inc(1);
        });
    }

    fn image_progress(&self, downloaded: usize, total: usize) {
        let Ok(mut guard) = self.images.lock() else {
            return;
        };
        let bar = guard.get_or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(Self::bar_style());
            bar.set_prefix("images");
            bar
        });
        bar.set_length(u64::try_from(total).unwrap_or(u64::MAX));
        bar.set_position(u64::try_from(downloaded).unwrap_or(u64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exporter_core::OwnerType;

    fn workspace() -> Workspace {
        Workspace {
            id: "1".to_string(),
            name: "Notes".to_string(),
            namespace: "alice/notes".to_string(),
            owner_type: OwnerType::Owner,
            document_count: 2,
            ..Workspace::default()
        }
    }

    #[test]
    fn test_progress_observer_tracks_documents_without_a_terminal() {
        let observer = ProgressObserver::new();
        observer.workspace_started(&workspace(), 2);
        let doc = Document::default();
        observer.document_finished(&doc, Path::new("out/a.md"));
        observer.document_skipped(&doc, SkipReason::AlreadyExists);

        let position = observer
            .documents
            .lock()
            .unwrap()
            .as_ref()
            .map(ProgressBar::position);
        assert_eq!(position, Some(2));
        observer.finish();
        assert!(observer.documents.lock().unwrap().is_none());
    }

    #[test]
    fn test_image_progress_creates_bar_lazily() {
        let observer = ProgressObserver::new();
        assert!(observer.images.lock().unwrap().is_none());
        observer.image_progress(1, 3);
        let bar = observer.images.lock().unwrap().clone().unwrap();
        assert_eq!(bar.length(), Some(3));
        assert_eq!(bar.position(), 1);
    }
}
