use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts reported by the model provider for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Field-wise maximum merge. Providers report input once up front and a
    /// growing output count across delta frames; max is monotonic and
    /// idempotent under replayed frames.
    pub fn merge_max(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Metric,
    Chart,
    Table,
    Text,
    Insight,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSeverity {
    Info,
    Warning,
    Critical,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub text: String,
    pub severity: InsightSeverity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Generation,
    Edit,
    SectionAdd,
    Suggestion,
}

/// One billable unit of model consumption attributed to a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageOperation {
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost in nanodollars (1e-9 USD). Integer arithmetic keeps the
    /// usage-sum invariant exact.
    pub cost_nanos: i64,
}

impl UsageOperation {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_nanos as f64 / 1e9
    }
}

/// One append-only revision of a section's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRevision {
    pub version: u32,
    pub html_content: String,
    pub prompt: Option<String>,
    pub edited_by: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMetadata {
    pub originally_generated_by: Option<String>,
    pub last_modified_by: Option<String>,
    pub model: Option<String>,
    pub original_prompt: Option<String>,
}

/// One independently addressable, versioned HTML fragment within a report.
///
/// Invariants (enforced by the store, checked by tests):
/// - `edit_history.len() == version as usize`; creation seeds revision 1.
/// - the newest revision's `html_content` equals the current `html_content`.
/// - `order` values within one report are dense, unique, 0-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub report_id: String,
    pub kind: SectionKind,
    pub title: String,
    pub html_content: String,
    pub order: usize,
    pub version: u32,
    pub edit_history: Vec<SectionRevision>,
    pub metadata: SectionMetadata,
}

impl Section {
    /// Seed a brand-new section at version 1 with its single initial revision.
    pub fn seeded(
        id: String,
        report_id: String,
        kind: SectionKind,
        title: String,
        html_content: String,
        order: usize,
        created_by: &str,
        prompt: Option<String>,
        model: Option<String>,
    ) -> Self {
        let initial = SectionRevision {
            version: 1,
            html_content: html_content.clone(),
            prompt: prompt.clone(),
            edited_by: created_by.to_string(),
            edited_at: Utc::now(),
        };
        Self {
            id,
            report_id,
            kind,
            title,
            html_content,
            order,
            version: 1,
            edit_history: vec![initial],
            metadata: SectionMetadata {
                originally_generated_by: Some(created_by.to_string()),
                last_modified_by: None,
                model,
                original_prompt: prompt,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub generated_by: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub prompt: Option<String>,
    pub generation_time_ms: Option<u64>,
}

/// The ordered collection of sections (plus insights/metadata/operations)
/// representing one generated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub thread_id: String,
    /// Legacy whole-document fallback; present only when extraction produced
    /// zero sections or section-level editing never occurred.
    pub html_content: Option<String>,
    pub sections: Vec<Section>,
    pub insights: Vec<Insight>,
    pub metadata: ReportMetadata,
    /// Append-only; totals are always recomputed from this list, never stored.
    pub operations: Vec<UsageOperation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    pub fn total_tokens(&self) -> u64 {
        self.operations.iter().map(UsageOperation::total_tokens).sum()
    }

    pub fn total_cost_nanos(&self) -> i64 {
        self.operations.iter().map(|op| op.cost_nanos).sum()
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_nanos() as f64 / 1e9
    }

    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }
}
