//! Client-side state machine over section identifiers: selection, edit-mode,
//! streaming/preview overlays, collapse state, and short-lived busy flags for
//! the synchronous toolbar operations.
//!
//! No ambient globals: all shared state lives on the controller and handlers
//! take `&mut self`. Persistence for streamed edits happens exactly once, in
//! the orchestrator's Finalizing; the controller applies the settled report
//! carried by `complete`.

use crate::orchestrator::GenerationScope;
use crate::store::{MoveDirection, ReportStore, StoreError};
use crate::types::{Report, Section, StreamEvent, TokenUsage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Busy flags expire on their own so a silent failure can never leave the
/// toolbar permanently disabled.
pub const DEFAULT_BUSY_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("cancel the pending edit before selecting another section")]
    EditPending,
    #[error("an edit is already in progress")]
    EditInProgress,
    #[error("section '{0}' is busy")]
    SectionBusy(String),
    #[error("no report loaded")]
    NoReport,
    #[error("generation failed: {0}")]
    Generation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the pending streamed operation will do on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditingContext {
    Edit { section_id: String },
    Add { position: usize },
}

impl EditingContext {
    /// Key for the preview/streaming overlay maps. Edits key on the section;
    /// adds key on a synthetic pending id since no section exists yet.
    fn overlay_key(&self) -> String {
        match self {
            EditingContext::Edit { section_id } => section_id.clone(),
            EditingContext::Add { position } => format!("pending_add_{position}"),
        }
    }
}

/// A scoped generation handed to the caller to drive through the
/// orchestrator. The token is the cancel path for `cancel_edit`.
#[derive(Debug, Clone)]
pub struct ScopedGeneration {
    pub scope: GenerationScope,
    pub cancel: CancellationToken,
}

pub struct SectionController {
    store: Arc<dyn ReportStore>,
    report: Option<Report>,
    selected: Option<String>,
    editing: Option<EditingContext>,
    collapsed: HashSet<String>,
    preview: HashMap<String, String>,
    streaming: HashSet<String>,
    busy: HashMap<String, Instant>,
    busy_ttl: Duration,
    cancel: Option<CancellationToken>,
    /// Locally estimated figure shown while streaming; discarded, never
    /// merged, once the authoritative snapshot arrives with the report.
    live_usage: Option<TokenUsage>,
}

impl SectionController {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self::with_busy_ttl(store, DEFAULT_BUSY_TTL)
    }

    pub fn with_busy_ttl(store: Arc<dyn ReportStore>, busy_ttl: Duration) -> Self {
        Self {
            store,
            report: None,
            selected: None,
            editing: None,
            collapsed: HashSet::new(),
            preview: HashMap::new(),
            streaming: HashSet::new(),
            busy: HashMap::new(),
            busy_ttl,
            cancel: None,
            live_usage: None,
        }
    }

    pub fn load_report(&mut self, report: Report) {
        self.report = Some(report);
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn editing(&self) -> Option<&EditingContext> {
        self.editing.as_ref()
    }

    pub fn live_usage(&self) -> Option<TokenUsage> {
        self.live_usage
    }

    pub fn preview_for(&self, id: &str) -> Option<&str> {
        self.preview.get(id).map(String::as_str)
    }

    pub fn is_streaming(&self, id: &str) -> bool {
        self.streaming.contains(id)
    }

    pub fn is_collapsed(&self, id: &str) -> bool {
        self.collapsed.contains(id)
    }

    pub fn is_busy(&self, id: &str) -> bool {
        match self.busy.get(id) {
            Some(stamp) => stamp.elapsed() < self.busy_ttl,
            None => false,
        }
    }

    /// Selecting a different section while an edit is pending is rejected:
    /// two concurrent edit intents would race on one orchestrator channel.
    pub fn select(&mut self, id: &str) -> Result<(), ControllerError> {
        if let Some(EditingContext::Edit { section_id }) = &self.editing {
            if section_id != id {
                return Err(ControllerError::EditPending);
            }
        }
        if matches!(self.editing, Some(EditingContext::Add { .. })) {
            return Err(ControllerError::EditPending);
        }
        self.selected = Some(id.to_string());
        Ok(())
    }

    pub fn toggle_collapse(&mut self, id: &str) {
        if !self.collapsed.remove(id) {
            self.collapsed.insert(id.to_string());
        }
    }

    /// Start a streamed regeneration scoped to one section. The returned
    /// scope carries that section's content alone as model context.
    pub fn begin_edit(&mut self, section_id: &str) -> Result<ScopedGeneration, ControllerError> {
        if self.editing.is_some() {
            return Err(ControllerError::EditInProgress);
        }
        let report = self.report.as_ref().ok_or(ControllerError::NoReport)?;
        let section = report
            .section(section_id)
            .ok_or_else(|| StoreError::SectionNotFound(section_id.to_string()))?;

        let scope = GenerationScope::EditSection {
            report_id: report.id.clone(),
            section_id: section.id.clone(),
            current_html: section.html_content.clone(),
        };
        let context = EditingContext::Edit {
            section_id: section_id.to_string(),
        };
        self.streaming.insert(context.overlay_key());
        self.editing = Some(context);

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        Ok(ScopedGeneration { scope, cancel })
    }

    /// Start a streamed add-section flow targeting `position`.
    pub fn begin_add(&mut self, position: usize) -> Result<ScopedGeneration, ControllerError> {
        if self.editing.is_some() {
            return Err(ControllerError::EditInProgress);
        }
        let report = self.report.as_ref().ok_or(ControllerError::NoReport)?;

        let scope = GenerationScope::AddSection {
            report_id: report.id.clone(),
            position,
        };
        let context = EditingContext::Add { position };
        self.streaming.insert(context.overlay_key());
        self.editing = Some(context);

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        Ok(ScopedGeneration { scope, cancel })
    }

    /// Abort the in-flight stream (if any) and clear the overlay with no
    /// persistence.
    pub fn cancel_edit(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.clear_overlay();
    }

    /// Apply one incoming wire event to the local view.
    pub fn apply_event(&mut self, event: StreamEvent) -> Result<(), ControllerError> {
        match event {
            StreamEvent::Content { content } => {
                if let Some(context) = &self.editing {
                    self.preview
                        .entry(context.overlay_key())
                        .or_default()
                        .push_str(&content);
                }
                Ok(())
            }
            StreamEvent::Usage { usage } => {
                self.live_usage = Some(usage);
                Ok(())
            }
            StreamEvent::Metadata { .. } => Ok(()),
            StreamEvent::Complete { report } => {
                self.report = Some(*report);
                self.clear_overlay();
                Ok(())
            }
            StreamEvent::Error { error } => {
                // Prior report state stays untouched; only the overlay clears
                // so the toolbar cannot wedge.
                self.clear_overlay();
                Err(ControllerError::Generation(error))
            }
        }
    }

    pub async fn duplicate(&mut self, section_id: &str) -> Result<(), ControllerError> {
        let report_id = self.report_id()?;
        self.synchronous_op(section_id, |store| async move {
            store.duplicate_section(&report_id, section_id).await
        })
        .await
    }

    pub async fn delete(&mut self, section_id: &str) -> Result<(), ControllerError> {
        let report_id = self.report_id()?;
        let result = self
            .synchronous_op(section_id, |store| async move {
                store.delete_section(&report_id, section_id).await
            })
            .await;
        if result.is_ok() {
            if self.selected.as_deref() == Some(section_id) {
                self.selected = None;
            }
            self.collapsed.remove(section_id);
        }
        result
    }

    pub async fn move_up(&mut self, section_id: &str) -> Result<(), ControllerError> {
        self.move_section(section_id, MoveDirection::Up).await
    }

    pub async fn move_down(&mut self, section_id: &str) -> Result<(), ControllerError> {
        self.move_section(section_id, MoveDirection::Down).await
    }

    async fn move_section(
        &mut self,
        section_id: &str,
        direction: MoveDirection,
    ) -> Result<(), ControllerError> {
        let report_id = self.report_id()?;
        self.synchronous_op(section_id, |store| async move {
            store.move_section(&report_id, section_id, direction).await
        })
        .await
    }

    pub fn sections_in_order(&self) -> Vec<&Section> {
        match &self.report {
            Some(report) => {
                let mut sections: Vec<&Section> = report.sections.iter().collect();
                sections.sort_by_key(|section| section.order);
                sections
            }
            None => Vec::new(),
        }
    }

    fn report_id(&self) -> Result<String, ControllerError> {
        self.report
            .as_ref()
            .map(|report| report.id.clone())
            .ok_or(ControllerError::NoReport)
    }

    /// Run one store-backed toolbar operation behind a busy flag. Optimistic
    /// local state commits only after the store call succeeds; on failure the
    /// prior view is left untouched.
    async fn synchronous_op<'a, F, Fut>(
        &'a mut self,
        section_id: &str,
        op: F,
    ) -> Result<(), ControllerError>
    where
        F: FnOnce(Arc<dyn ReportStore>) -> Fut,
        Fut: std::future::Future<Output = Result<Report, StoreError>>,
    {
        if self.is_busy(section_id) {
            return Err(ControllerError::SectionBusy(section_id.to_string()));
        }
        self.busy.insert(section_id.to_string(), Instant::now());

        let result = op(Arc::clone(&self.store)).await;
        self.busy.remove(section_id);

        match result {
            Ok(report) => {
                self.report = Some(report);
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    fn clear_overlay(&mut self) {
        if let Some(context) = self.editing.take() {
            let key = context.overlay_key();
            self.preview.remove(&key);
            self.streaming.remove(&key);
        }
        self.cancel = None;
        self.live_usage = None;
    }
}
