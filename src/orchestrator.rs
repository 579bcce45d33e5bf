//! Server-side state machine driving one model call from request to
//! persisted report: `Idle → Streaming → {Finalizing → Settled} | Aborted |
//! Failed`.
//!
//! At most one generation is in flight per lane (thread lane for full
//! generations, report lane for scoped ones); a second request is rejected
//! synchronously before any stream opens. Cancellation during Streaming
//! tears down the upstream call and leaves no trace in the store; once
//! Finalizing begins the commit runs to completion or failure.

use crate::api::{ChatMessage, ModelClient, ModelRequest, StreamDecoder};
use crate::extract::{clean_model_html, extract_insights, extract_sections, UNTITLED_SECTION};
use crate::store::{NewReport, NewSection, ReportStore, StoreError};
use crate::types::{
    OperationKind, Report, ReportMetadata, SectionKind, StreamEvent, StreamMode, TokenUsage,
};
use crate::usage::UsageMeter;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("a generation is already in flight for '{0}'")]
    AlreadyGenerating(String),
    #[error("model stream failed: {0}")]
    Stream(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What this generation targets, and therefore what Finalizing persists.
#[derive(Debug, Clone)]
pub enum GenerationScope {
    /// A fresh report for the thread.
    FullReport,
    /// Regenerate one section's content in place.
    EditSection {
        report_id: String,
        section_id: String,
        current_html: String,
    },
    /// Generate a brand-new section at `position`.
    AddSection { report_id: String, position: usize },
    /// Advisory text only; persists no content change.
    Suggest { report_id: String },
}

impl GenerationScope {
    pub fn operation_kind(&self) -> OperationKind {
        match self {
            GenerationScope::FullReport => OperationKind::Generation,
            GenerationScope::EditSection { .. } => OperationKind::Edit,
            GenerationScope::AddSection { .. } => OperationKind::SectionAdd,
            GenerationScope::Suggest { .. } => OperationKind::Suggestion,
        }
    }

    fn report_id(&self) -> Option<&str> {
        match self {
            GenerationScope::FullReport => None,
            GenerationScope::EditSection { report_id, .. }
            | GenerationScope::AddSection { report_id, .. }
            | GenerationScope::Suggest { report_id } => Some(report_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub thread_id: String,
    pub prompt: String,
    pub model: String,
    pub provider: String,
    pub scope: GenerationScope,
    pub mode: StreamMode,
}

impl GenerationRequest {
    /// Single-flight lane key. Scoped flows key on the report aggregate they
    /// write; full generations key on the thread (no report exists yet).
    fn lane(&self) -> String {
        match self.scope.report_id() {
            Some(report_id) => format!("report:{report_id}"),
            None => format!("thread:{}", self.thread_id),
        }
    }
}

/// How a generation left the state machine (`Failed` travels as `Err`).
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Settled(Box<Report>),
    Aborted,
}

pub struct Orchestrator {
    client: ModelClient,
    store: Arc<dyn ReportStore>,
    meter: Arc<UsageMeter>,
    lanes: Arc<Mutex<HashSet<String>>>,
}

/// A claimed lane plus the request it was claimed for. Dropping the guard
/// releases the lane on every exit path, including panics.
pub struct ActiveGeneration {
    request: GenerationRequest,
    _lane: LaneGuard,
}

struct LaneGuard {
    lanes: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        self.lanes.lock().remove(&self.key);
    }
}

impl Orchestrator {
    pub fn new(client: ModelClient, store: Arc<dyn ReportStore>, meter: Arc<UsageMeter>) -> Self {
        Self {
            client,
            store,
            meter,
            lanes: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    pub fn meter(&self) -> &Arc<UsageMeter> {
        &self.meter
    }

    /// Claim the request's lane, or reject synchronously before any stream
    /// opens. This is the concurrency-conflict policy rejection, not a
    /// stream failure.
    pub fn begin(&self, request: GenerationRequest) -> Result<ActiveGeneration, OrchestratorError> {
        let key = request.lane();
        let claimed = self.lanes.lock().insert(key.clone());
        if !claimed {
            return Err(OrchestratorError::AlreadyGenerating(key));
        }
        Ok(ActiveGeneration {
            request,
            _lane: LaneGuard {
                lanes: Arc::clone(&self.lanes),
                key,
            },
        })
    }

    /// Drive a claimed generation to a terminal state, sending wire events
    /// to `events`. On failure one `error` event is emitted and nothing is
    /// persisted; on cancellation nothing is emitted or persisted.
    pub async fn run(
        &self,
        generation: ActiveGeneration,
        events: mpsc::UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let request = generation.request;
        let started = Instant::now();
        tracing::info!(
            thread_id = %request.thread_id,
            lane = %request.lane(),
            mode = ?request.mode,
            "generation streaming"
        );

        match self.drive(&request, &events, &cancel, started).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let _ = events.send(StreamEvent::Error {
                    error: error.to_string(),
                });
                tracing::warn!(thread_id = %request.thread_id, %error, "generation failed");
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        request: &GenerationRequest,
        events: &mpsc::UnboundedSender<StreamEvent>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let model_request = build_model_request(request);
        let mut stream = self
            .client
            .create_stream(&model_request)
            .await
            .map_err(|error| OrchestratorError::Stream(error.to_string()))?;

        let mut decoder = StreamDecoder::new();
        let mut accumulator = String::new();
        let mut usage = TokenUsage::default();

        // Streaming: accumulate, relay per mode, merge usage.
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(thread_id = %request.thread_id, "generation aborted");
                    return Ok(GenerationOutcome::Aborted);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|error| OrchestratorError::Stream(error.to_string()))?;

            for event in decoder.process(&chunk) {
                match event {
                    StreamEvent::Content { content } => {
                        accumulator.push_str(&content);
                        if request.mode == StreamMode::Preview {
                            let _ = events.send(StreamEvent::Content { content });
                        }
                    }
                    StreamEvent::Usage { usage: reported } => {
                        usage.merge_max(reported);
                    }
                    StreamEvent::Metadata { metadata } => {
                        let _ = events.send(StreamEvent::Metadata { metadata });
                    }
                    StreamEvent::Error { error } => {
                        return Err(OrchestratorError::Stream(error));
                    }
                    // A provider never emits `complete`; ignore if one does.
                    StreamEvent::Complete { .. } => {}
                }
            }
            if decoder.is_done() {
                break;
            }
        }

        // Finalizing: from here the commit runs to completion or failure;
        // cancellation is no longer consulted.
        let report = self.finalize(request, accumulator, usage, started).await?;

        let _ = events.send(StreamEvent::Usage { usage });
        let _ = events.send(StreamEvent::Complete {
            report: Box::new(report.clone()),
        });
        tracing::info!(
            thread_id = %request.thread_id,
            report_id = %report.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation settled"
        );
        Ok(GenerationOutcome::Settled(Box::new(report)))
    }

    /// Clean → extract → persist → meter, all-or-nothing with respect to the
    /// client's view: the client only observes settled state via `complete`.
    async fn finalize(
        &self,
        request: &GenerationRequest,
        accumulated: String,
        usage: TokenUsage,
        started: Instant,
    ) -> Result<Report, OrchestratorError> {
        let cleaned = clean_model_html(&accumulated);

        let report_id = match &request.scope {
            GenerationScope::FullReport => {
                let extraction = extract_sections(&cleaned);
                if extraction.dropped_fragments > 0 {
                    tracing::debug!(
                        dropped = extraction.dropped_fragments,
                        "extraction dropped malformed fragments"
                    );
                }
                let insights = extract_insights(&cleaned);
                // Zero fragments degrades to whole-document content.
                let html_content = extraction
                    .sections
                    .is_empty()
                    .then(|| cleaned.clone());
                let report = self
                    .store
                    .create_report(NewReport {
                        thread_id: request.thread_id.clone(),
                        html_content,
                        sections: extraction.sections,
                        insights,
                        metadata: ReportMetadata {
                            generated_by: Some("ai".to_string()),
                            model: Some(request.model.clone()),
                            provider: Some(request.provider.clone()),
                            prompt: Some(request.prompt.clone()),
                            generation_time_ms: Some(started.elapsed().as_millis() as u64),
                        },
                        created_by: "ai".to_string(),
                        prompt: Some(request.prompt.clone()),
                    })
                    .await?;
                report.id
            }
            GenerationScope::EditSection {
                report_id,
                section_id,
                ..
            } => {
                let new_html = scoped_fragment_html(&cleaned);
                self.store
                    .patch_section(
                        report_id,
                        section_id,
                        new_html,
                        "ai",
                        Some(request.prompt.clone()),
                    )
                    .await?;
                report_id.clone()
            }
            GenerationScope::AddSection {
                report_id,
                position,
            } => {
                let section = scoped_new_section(&cleaned, request);
                self.store
                    .insert_section(report_id, *position, section)
                    .await?;
                report_id.clone()
            }
            GenerationScope::Suggest { report_id } => report_id.clone(),
        };

        let operation = self.meter.priced_operation(
            request.scope.operation_kind(),
            &request.model,
            &request.provider,
            usage,
        );
        let report = self.store.append_operation(&report_id, operation.clone()).await?;
        self.meter.publish(&report_id, &operation);
        Ok(report)
    }
}

fn build_model_request(request: &GenerationRequest) -> ModelRequest {
    let current_document = match &request.scope {
        GenerationScope::EditSection { current_html, .. } => Some(current_html.clone()),
        _ => None,
    };
    ModelRequest {
        messages: vec![ChatMessage::user(request.prompt.clone())],
        current_document,
        model: Some(request.model.clone()),
    }
}

/// For a scoped section edit the model returns the revised fragment; reuse
/// the extracted fragment when one parses, otherwise fall back to the raw
/// cleaned text.
fn scoped_fragment_html(cleaned: &str) -> String {
    let extraction = extract_sections(cleaned);
    match extraction.sections.into_iter().next() {
        Some(section) => section.html_content,
        None => cleaned.to_string(),
    }
}

fn scoped_new_section(cleaned: &str, request: &GenerationRequest) -> NewSection {
    let extraction = extract_sections(cleaned);
    match extraction.sections.into_iter().next() {
        Some(section) => NewSection {
            kind: section.kind,
            title: section.title,
            html_content: section.html_content,
            created_by: "ai".to_string(),
            prompt: Some(request.prompt.clone()),
            model: Some(request.model.clone()),
        },
        None => NewSection {
            kind: SectionKind::Text,
            title: UNTITLED_SECTION.to_string(),
            html_content: cleaned.to_string(),
            created_by: "ai".to_string(),
            prompt: Some(request.prompt.clone()),
            model: Some(request.model.clone()),
        },
    }
}
