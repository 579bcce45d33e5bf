//! Report aggregate persistence.
//!
//! [`ReportStore`] is the contract a storage collaborator must support;
//! [`MemoryReportStore`] implements it under one `RwLock` so every operation
//! is atomic with respect to readers (a reader never observes a bumped
//! version without its matching history entry, or a non-dense order).

use crate::extract::ExtractedSection;
use crate::types::{
    Insight, Report, ReportMetadata, Section, SectionKind, UsageOperation,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("report '{0}' not found")]
    ReportNotFound(String),
    #[error("section '{0}' not found")]
    SectionNotFound(String),
    #[error("no report exists for thread '{0}'")]
    ThreadNotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

/// Everything needed to create a report aggregate at stream completion.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub thread_id: String,
    /// Whole-document fallback; only set when `sections` is empty.
    pub html_content: Option<String>,
    pub sections: Vec<ExtractedSection>,
    pub insights: Vec<Insight>,
    pub metadata: ReportMetadata,
    pub created_by: String,
    pub prompt: Option<String>,
}

/// A section created through the explicit add-section flow.
#[derive(Debug, Clone)]
pub struct NewSection {
    pub kind: SectionKind,
    pub title: String,
    pub html_content: String,
    pub created_by: String,
    pub prompt: Option<String>,
    pub model: Option<String>,
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create_report(&self, new_report: NewReport) -> StoreResult<Report>;

    async fn get_report(&self, report_id: &str) -> StoreResult<Report>;

    async fn latest_report_for_thread(&self, thread_id: &str) -> StoreResult<Report>;

    /// Bump the section's version and append a history entry, atomically.
    async fn patch_section(
        &self,
        report_id: &str,
        section_id: &str,
        new_html_content: String,
        edited_by: &str,
        prompt: Option<String>,
    ) -> StoreResult<Section>;

    /// Insert at `position` (clamped to the section count), shifting the
    /// order of every section at or after it by +1.
    async fn insert_section(
        &self,
        report_id: &str,
        position: usize,
        section: NewSection,
    ) -> StoreResult<Report>;

    /// Remove the section and compact sibling order back to 0..n-1.
    async fn delete_section(&self, report_id: &str, section_id: &str) -> StoreResult<Report>;

    /// Swap order with the adjacent sibling. A boundary move (first up,
    /// last down) is a reported no-op, not an error.
    async fn move_section(
        &self,
        report_id: &str,
        section_id: &str,
        direction: MoveDirection,
    ) -> StoreResult<Report>;

    /// Insert a copy immediately after the source with a fresh id, version
    /// reset to 1, and history reseeded.
    async fn duplicate_section(&self, report_id: &str, section_id: &str) -> StoreResult<Report>;

    /// Append one usage operation to the report's append-only operation list.
    async fn append_operation(
        &self,
        report_id: &str,
        operation: UsageOperation,
    ) -> StoreResult<Report>;
}

/// In-process store: the reference semantics for any real driver.
#[derive(Default)]
pub struct MemoryReportStore {
    reports: RwLock<HashMap<String, Report>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn create_report(&self, new_report: NewReport) -> StoreResult<Report> {
        let report_id = format!("report_{}", Uuid::new_v4());
        let now = Utc::now();

        let sections = new_report
            .sections
            .into_iter()
            .map(|extracted| {
                Section::seeded(
                    extracted.id,
                    report_id.clone(),
                    extracted.kind,
                    extracted.title,
                    extracted.html_content,
                    extracted.order,
                    &new_report.created_by,
                    new_report.prompt.clone(),
                    new_report.metadata.model.clone(),
                )
            })
            .collect();

        let report = Report {
            id: report_id.clone(),
            thread_id: new_report.thread_id,
            html_content: new_report.html_content,
            sections,
            insights: new_report.insights,
            metadata: new_report.metadata,
            operations: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.reports.write().insert(report_id, report.clone());
        Ok(report)
    }

    async fn get_report(&self, report_id: &str) -> StoreResult<Report> {
        self.reports
            .read()
            .get(report_id)
            .cloned()
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))
    }

    async fn latest_report_for_thread(&self, thread_id: &str) -> StoreResult<Report> {
        self.reports
            .read()
            .values()
            .filter(|report| report.thread_id == thread_id)
            .max_by_key(|report| report.created_at)
            .cloned()
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.to_string()))
    }

    async fn patch_section(
        &self,
        report_id: &str,
        section_id: &str,
        new_html_content: String,
        edited_by: &str,
        prompt: Option<String>,
    ) -> StoreResult<Section> {
        let mut reports = self.reports.write();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;
        let section = report
            .sections
            .iter_mut()
            .find(|section| section.id == section_id)
            .ok_or_else(|| StoreError::SectionNotFound(section_id.to_string()))?;

        section.version += 1;
        section.html_content = new_html_content.clone();
        section.edit_history.push(crate::types::SectionRevision {
            version: section.version,
            html_content: new_html_content,
            prompt,
            edited_by: edited_by.to_string(),
            edited_at: Utc::now(),
        });
        section.metadata.last_modified_by = Some(edited_by.to_string());

        let patched = section.clone();
        // Section-level editing supersedes the whole-document fallback.
        report.html_content = None;
        report.updated_at = Utc::now();
        Ok(patched)
    }

    async fn insert_section(
        &self,
        report_id: &str,
        position: usize,
        section: NewSection,
    ) -> StoreResult<Report> {
        let mut reports = self.reports.write();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;

        let position = position.min(report.sections.len());
        for existing in &mut report.sections {
            if existing.order >= position {
                existing.order += 1;
            }
        }

        let seeded = Section::seeded(
            format!("section_{}", Uuid::new_v4()),
            report_id.to_string(),
            section.kind,
            section.title,
            section.html_content,
            position,
            &section.created_by,
            section.prompt,
            section.model,
        );
        report.sections.push(seeded);
        report.sections.sort_by_key(|section| section.order);
        report.updated_at = Utc::now();
        Ok(report.clone())
    }

    async fn delete_section(&self, report_id: &str, section_id: &str) -> StoreResult<Report> {
        let mut reports = self.reports.write();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;

        let index = report
            .sections
            .iter()
            .position(|section| section.id == section_id)
            .ok_or_else(|| StoreError::SectionNotFound(section_id.to_string()))?;
        report.sections.remove(index);

        for (order, section) in report.sections.iter_mut().enumerate() {
            section.order = order;
        }
        report.updated_at = Utc::now();
        Ok(report.clone())
    }

    async fn move_section(
        &self,
        report_id: &str,
        section_id: &str,
        direction: MoveDirection,
    ) -> StoreResult<Report> {
        let mut reports = self.reports.write();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;

        let index = report
            .sections
            .iter()
            .position(|section| section.id == section_id)
            .ok_or_else(|| StoreError::SectionNotFound(section_id.to_string()))?;

        let neighbor = match direction {
            MoveDirection::Up => index.checked_sub(1),
            MoveDirection::Down => {
                let next = index + 1;
                (next < report.sections.len()).then_some(next)
            }
        };
        // Boundary move: reported no-op.
        let Some(neighbor) = neighbor else {
            return Ok(report.clone());
        };

        report.sections.swap(index, neighbor);
        for (order, section) in report.sections.iter_mut().enumerate() {
            section.order = order;
        }
        report.updated_at = Utc::now();
        Ok(report.clone())
    }

    async fn duplicate_section(&self, report_id: &str, section_id: &str) -> StoreResult<Report> {
        let mut reports = self.reports.write();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;

        let source = report
            .sections
            .iter()
            .find(|section| section.id == section_id)
            .cloned()
            .ok_or_else(|| StoreError::SectionNotFound(section_id.to_string()))?;

        let copy_order = source.order + 1;
        for existing in &mut report.sections {
            if existing.order >= copy_order {
                existing.order += 1;
            }
        }

        let created_by = source
            .metadata
            .originally_generated_by
            .clone()
            .unwrap_or_else(|| "user".to_string());
        let copy = Section::seeded(
            format!("section_{}", Uuid::new_v4()),
            report_id.to_string(),
            source.kind,
            source.title.clone(),
            source.html_content.clone(),
            copy_order,
            &created_by,
            source.metadata.original_prompt.clone(),
            source.metadata.model.clone(),
        );
        report.sections.push(copy);
        report.sections.sort_by_key(|section| section.order);
        report.updated_at = Utc::now();
        Ok(report.clone())
    }

    async fn append_operation(
        &self,
        report_id: &str,
        operation: UsageOperation,
    ) -> StoreResult<Report> {
        let mut reports = self.reports.write();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;
        report.operations.push(operation);
        report.updated_at = Utc::now();
        Ok(report.clone())
    }
}
