use reportforge::extract::{
    clean_model_html, extract_insights, extract_sections, UNTITLED_SECTION,
};
use reportforge::types::{InsightSeverity, SectionKind};

#[test]
fn test_marked_fragments_become_ordered_sections() {
    let html = concat!(
        "<div data-section-id=\"section_metric_1\"><h3>Revenue</h3>",
        "<p>$4.2M</p></div>",
        "<div data-section-id=\"section_chart_1\"><h3>Trend</h3>",
        "<svg></svg></div>",
    );
    let extraction = extract_sections(html);

    assert_eq!(extraction.sections.len(), 2);
    assert_eq!(extraction.dropped_fragments, 0);

    let metric = &extraction.sections[0];
    assert_eq!(metric.id, "section_metric_1");
    assert_eq!(metric.kind, SectionKind::Metric);
    assert_eq!(metric.title, "Revenue");
    assert_eq!(metric.order, 0);
    assert!(metric.html_content.starts_with("<div data-section-id"));
    assert!(metric.html_content.ends_with("</div>"));

    let chart = &extraction.sections[1];
    assert_eq!(chart.id, "section_chart_1");
    assert_eq!(chart.kind, SectionKind::Chart);
    assert_eq!(chart.title, "Trend");
    assert_eq!(chart.order, 1);

    // The concatenation of fragments reproduces the marked-up document.
    let joined: String = extraction
        .sections
        .iter()
        .map(|section| section.html_content.as_str())
        .collect();
    assert_eq!(joined, html);

    assert!(extract_insights(html).is_empty());
}

#[test]
fn test_nested_same_name_tags_stay_inside_their_fragment() {
    let html = concat!(
        "<div data-section-id=\"section_table_1\"><h2>Breakdown</h2>",
        "<div class=\"inner\"><div>cell</div></div>",
        "</div>",
        "<div data-section-id=\"section_text_1\"><h2>Notes</h2>ok</div>",
    );
    let extraction = extract_sections(html);

    assert_eq!(extraction.sections.len(), 2);
    assert!(extraction.sections[0]
        .html_content
        .contains("<div>cell</div>"));
    assert!(extraction.sections[0].html_content.ends_with("</div>"));
    assert_eq!(extraction.sections[1].title, "Notes");
}

#[test]
fn test_unclosed_fragment_is_dropped_and_counted() {
    let html = concat!(
        "<div data-section-id=\"section_metric_1\"><h3>Good</h3>ok</div>",
        "<div data-section-id=\"section_broken_1\"><h3>Bad</h3>no close",
    );
    let extraction = extract_sections(html);

    assert_eq!(extraction.sections.len(), 1);
    assert_eq!(extraction.sections[0].id, "section_metric_1");
    assert_eq!(extraction.dropped_fragments, 1);
}

#[test]
fn test_zero_markers_means_zero_sections() {
    let extraction = extract_sections("<h1>Report</h1><p>No markers anywhere.</p>");
    assert!(extraction.sections.is_empty());
    assert_eq!(extraction.dropped_fragments, 0);
}

#[test]
fn test_duplicate_marker_values_get_suffixed_ids() {
    let html = concat!(
        "<div data-section-id=\"section_metric_1\">a</div>",
        "<div data-section-id=\"section_metric_1\">b</div>",
        "<div data-section-id=\"section_metric_1\">c</div>",
    );
    let extraction = extract_sections(html);
    let ids: Vec<&str> = extraction
        .sections
        .iter()
        .map(|section| section.id.as_str())
        .collect();
    assert_eq!(
        ids,
        vec!["section_metric_1", "section_metric_1_2", "section_metric_1_3"]
    );
}

#[test]
fn test_extraction_is_idempotent_including_ids() {
    let html = concat!(
        "<div data-section-id=\"section_metric_1\"><h3>Revenue</h3>$4.2M</div>",
        "<div data-section-id=\"section_metric_1\"><h3>Costs</h3>$1.1M</div>",
    );
    let first = extract_sections(html);
    let second = extract_sections(html);
    assert_eq!(first, second);
}

#[test]
fn test_nested_marker_is_not_a_top_level_section() {
    let html = concat!(
        "<div data-section-id=\"section_text_1\"><h2>Outer</h2>",
        "<div data-section-id=\"section_metric_1\">inner</div>",
        "</div>",
    );
    let extraction = extract_sections(html);
    assert_eq!(extraction.sections.len(), 1);
    assert_eq!(extraction.sections[0].id, "section_text_1");
}

#[test]
fn test_kind_falls_back_to_text_and_title_to_default() {
    let extraction =
        extract_sections("<div data-section-id=\"section_overview\"><p>no heading</p></div>");
    assert_eq!(extraction.sections.len(), 1);
    assert_eq!(extraction.sections[0].kind, SectionKind::Text);
    assert_eq!(extraction.sections[0].title, UNTITLED_SECTION);
}

#[test]
fn test_marker_keyword_drives_kind_classification() {
    let html = concat!(
        "<div data-section-id=\"q3_chart_revenue\">a</div>",
        "<div data-section-id=\"cost_table\">b</div>",
        "<div data-section-id=\"headline_metric\">c</div>",
        "<div data-section-id=\"key_insight_block\">d</div>",
    );
    let kinds: Vec<SectionKind> = extract_sections(html)
        .sections
        .iter()
        .map(|section| section.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            SectionKind::Chart,
            SectionKind::Table,
            SectionKind::Metric,
            SectionKind::Insight,
        ]
    );
}

#[test]
fn test_quoted_gt_inside_attribute_does_not_truncate_fragment() {
    let html = concat!(
        "<div data-section-id=\"section_chart_1\" data-config='{\"axis\": \">\"}'>",
        "<h3>Q3</h3><svg viewBox=\"0 0 10 10\"></svg></div>",
    );
    let extraction = extract_sections(html);
    assert_eq!(extraction.sections.len(), 1);
    assert!(extraction.sections[0].html_content.ends_with("</svg></div>"));
}

#[test]
fn test_clean_model_html_strips_fences_and_surrounding_prose() {
    let raw = concat!(
        "Here is the report you asked for:\n",
        "```html\n",
        "<div data-section-id=\"section_metric_1\"><h3>Revenue</h3>$4.2M</div>\n",
        "```\n",
        "Let me know if you would like any changes.",
    );
    let cleaned = clean_model_html(raw);
    assert!(cleaned.starts_with("<div data-section-id"));
    assert!(cleaned.ends_with("</div>"));
    assert!(!cleaned.contains("```"));
    assert!(!cleaned.contains("Let me know"));
}

#[test]
fn test_clean_model_html_without_tags_returns_trimmed_text() {
    assert_eq!(clean_model_html("  just plain advice  "), "just plain advice");
}

#[test]
fn test_insights_are_collected_with_severity_precedence() {
    let html = concat!(
        "<div class=\"insight\"><p>Steady quarter.</p></div>",
        "<div class=\"insight warning\"><p>Margins tightening.</p></div>",
        "<div class=\"insight critical warning\"><p>Cash runway under 6 months.</p></div>",
        "<div class=\"insight success\"><p>Churn at record low.</p></div>",
    );
    let insights = extract_insights(html);

    assert_eq!(insights.len(), 4);
    assert_eq!(insights[0].severity, InsightSeverity::Info);
    assert_eq!(insights[0].text, "Steady quarter.");
    assert_eq!(insights[1].severity, InsightSeverity::Warning);
    // critical outranks warning when both keywords appear
    assert_eq!(insights[2].severity, InsightSeverity::Critical);
    assert_eq!(insights[3].severity, InsightSeverity::Success);
    assert_eq!(insights[0].id, "insight_1");
    assert_eq!(insights[3].id, "insight_4");
}

#[test]
fn test_empty_insight_bodies_are_skipped() {
    let insights = extract_insights("<div class=\"insight\"><span></span></div>");
    assert!(insights.is_empty());
}
