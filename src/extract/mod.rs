//! Section and insight extraction over cleaned model HTML.
//!
//! The scanner is a hand-rolled tokenizer that tracks open/close depth for a
//! fragment's outer tag, so sections containing nested same-name tags (a
//! `<div>` inside a `<div data-section-id=...>`) are captured correctly.
//! Quoted attribute values may contain `>`; comments, self-closing syntax and
//! void elements are recognized and never change depth.

mod scanner;

use crate::types::{Insight, InsightSeverity, SectionKind};
use scanner::{attribute_value, fragment_end, strip_markup, Token, Tokenizer};
use serde::Serialize;
use std::collections::HashMap;

pub const SECTION_MARKER_ATTR: &str = "data-section-id";
pub const UNTITLED_SECTION: &str = "Untitled Section";

/// One fragment as produced by extraction, before the store attaches it to a
/// report and seeds version/history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSection {
    pub id: String,
    pub kind: SectionKind,
    pub title: String,
    pub html_content: String,
    pub order: usize,
}

/// Extraction output plus the non-fatal diagnostic counter for fragments
/// whose closing tag could not be matched (dropped, never emitted).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionExtraction {
    pub sections: Vec<ExtractedSection>,
    pub dropped_fragments: usize,
}

/// Strip code-fence markers and leading/trailing non-tag prose from raw model
/// output. Returns the slice from the first `<` through the last `>`; if the
/// text holds no tags at all, the trimmed text itself comes back so the
/// caller can fall back to whole-document content.
pub fn clean_model_html(raw: &str) -> String {
    let without_fences: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    let first_tag = without_fences.find('<');
    let last_close = without_fences.rfind('>');
    match (first_tag, last_close) {
        (Some(start), Some(end)) if start < end => without_fences[start..=end].to_string(),
        _ => without_fences.trim().to_string(),
    }
}

/// Scan for top-level fragments carrying the section-identity marker.
///
/// - `id` reuses the marker value (deterministic, so extraction is
///   idempotent); duplicated marker values get `_2`, `_3`, ... suffixes.
/// - `title` is the first `<h2>`/`<h3>`/`<h4>` text inside the fragment.
/// - `kind` is the first match of `chart, table, metric, insight` against the
///   marker value, else text.
/// - A fragment whose close cannot be matched is dropped and counted.
///
/// Zero fragments is a valid result meaning "fall back to whole-document
/// html_content".
pub fn extract_sections(html: &str) -> SectionExtraction {
    let mut extraction = SectionExtraction::default();
    let mut id_counts: HashMap<String, usize> = HashMap::new();
    let mut tokenizer = Tokenizer::new(html);

    while let Some(token) = tokenizer.next_token() {
        let Token::Open(tag) = token else { continue };
        let Some(marker) = attribute_value(html, &tag, SECTION_MARKER_ATTR) else {
            continue;
        };

        let Some(end) = fragment_end(html, &tag) else {
            tracing::debug!(marker, "dropping section fragment with unmatched close tag");
            extraction.dropped_fragments += 1;
            tokenizer.seek(tag.end);
            continue;
        };

        let fragment = &html[tag.start..end];
        let order = extraction.sections.len();
        extraction.sections.push(ExtractedSection {
            id: dedupe_id(&marker, &mut id_counts),
            kind: kind_from_marker(&marker),
            title: fragment_title(fragment),
            html_content: fragment.to_string(),
            order,
        });

        // Skip the whole captured fragment so nested markers are not emitted
        // as their own top-level sections.
        tokenizer.seek(end);
    }

    extraction
}

/// Independent scan for fragments whose `class` attribute contains `insight`.
/// Severity precedence: critical|danger, warning, success|positive, info.
pub fn extract_insights(html: &str) -> Vec<Insight> {
    let mut insights = Vec::new();
    let mut tokenizer = Tokenizer::new(html);

    while let Some(token) = tokenizer.next_token() {
        let Token::Open(tag) = token else { continue };
        let Some(class) = attribute_value(html, &tag, "class") else {
            continue;
        };
        if !class.to_ascii_lowercase().contains("insight") {
            continue;
        }

        let Some(end) = fragment_end(html, &tag) else {
            tokenizer.seek(tag.end);
            continue;
        };

        let text = strip_markup(&html[tag.end..end]);
        let text = text.trim().to_string();
        if !text.is_empty() {
            insights.push(Insight {
                id: format!("insight_{}", insights.len() + 1),
                text,
                severity: severity_from_class(&class),
            });
        }
        tokenizer.seek(end);
    }

    insights
}

fn kind_from_marker(marker: &str) -> SectionKind {
    let normalized = marker.to_ascii_lowercase();
    for (keyword, kind) in [
        ("chart", SectionKind::Chart),
        ("table", SectionKind::Table),
        ("metric", SectionKind::Metric),
        ("insight", SectionKind::Insight),
    ] {
        if normalized.contains(keyword) {
            return kind;
        }
    }
    SectionKind::Text
}

fn severity_from_class(class: &str) -> InsightSeverity {
    let normalized = class.to_ascii_lowercase();
    if normalized.contains("critical") || normalized.contains("danger") {
        InsightSeverity::Critical
    } else if normalized.contains("warning") {
        InsightSeverity::Warning
    } else if normalized.contains("success") || normalized.contains("positive") {
        InsightSeverity::Success
    } else {
        InsightSeverity::Info
    }
}

fn fragment_title(fragment: &str) -> String {
    let mut tokenizer = Tokenizer::new(fragment);
    while let Some(token) = tokenizer.next_token() {
        let Token::Open(tag) = token else { continue };
        if !matches!(tag.name.as_str(), "h2" | "h3" | "h4") {
            continue;
        }
        let Some(end) = fragment_end(fragment, &tag) else {
            continue;
        };
        let title = strip_markup(&fragment[tag.end..end]);
        let title = title.trim();
        if !title.is_empty() {
            return title.to_string();
        }
    }
    UNTITLED_SECTION.to_string()
}

fn dedupe_id(marker: &str, id_counts: &mut HashMap<String, usize>) -> String {
    let count = id_counts.entry(marker.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        marker.to_string()
    } else {
        format!("{marker}_{count}")
    }
}
