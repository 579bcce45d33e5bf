use chrono::Utc;
use proptest::prelude::*;
use reportforge::extract::ExtractedSection;
use reportforge::store::{
    MemoryReportStore, MoveDirection, NewReport, NewSection, ReportStore, StoreError,
};
use reportforge::types::{OperationKind, Report, ReportMetadata, SectionKind, UsageOperation};
use std::sync::Arc;

fn extracted(id: &str, kind: SectionKind, order: usize) -> ExtractedSection {
    ExtractedSection {
        id: id.to_string(),
        kind,
        title: format!("Section {order}"),
        html_content: format!("<div data-section-id=\"{id}\"><h3>Section {order}</h3></div>"),
        order,
    }
}

fn new_report(section_count: usize) -> NewReport {
    let sections = (0..section_count)
        .map(|order| extracted(&format!("section_text_{order}"), SectionKind::Text, order))
        .collect();
    NewReport {
        thread_id: "thread_1".to_string(),
        html_content: None,
        sections,
        insights: Vec::new(),
        metadata: ReportMetadata {
            generated_by: Some("ai".to_string()),
            model: Some("claude-sonnet-4-5-20250929".to_string()),
            provider: Some("anthropic".to_string()),
            prompt: Some("quarterly report".to_string()),
            generation_time_ms: Some(1200),
        },
        created_by: "ai".to_string(),
        prompt: Some("quarterly report".to_string()),
    }
}

fn operation(input: u64, output: u64, cost_nanos: i64) -> UsageOperation {
    UsageOperation {
        kind: OperationKind::Generation,
        timestamp: Utc::now(),
        model: "claude-sonnet-4-5-20250929".to_string(),
        provider: "anthropic".to_string(),
        input_tokens: input,
        output_tokens: output,
        cost_nanos,
    }
}

fn assert_invariants(report: &Report) {
    // Orders are dense, unique, 0-based after any mutation.
    let mut orders: Vec<usize> = report.sections.iter().map(|s| s.order).collect();
    orders.sort_unstable();
    assert_eq!(orders, (0..report.sections.len()).collect::<Vec<_>>());

    for section in &report.sections {
        assert_eq!(section.edit_history.len(), section.version as usize);
        assert_eq!(
            section.edit_history.last().map(|rev| rev.html_content.as_str()),
            Some(section.html_content.as_str())
        );
    }
}

#[tokio::test]
async fn test_create_seeds_versioned_sections() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(3)).await.expect("create");

    assert!(report.id.starts_with("report_"));
    assert_eq!(report.sections.len(), 3);
    for section in &report.sections {
        assert_eq!(section.version, 1);
        assert_eq!(section.edit_history.len(), 1);
        assert_eq!(section.report_id, report.id);
        assert_eq!(
            section.metadata.originally_generated_by.as_deref(),
            Some("ai")
        );
    }
    assert_invariants(&report);
    assert!(report.operations.is_empty());
}

#[tokio::test]
async fn test_patch_bumps_version_and_appends_history() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(2)).await.expect("create");

    let section = store
        .patch_section(
            &report.id,
            "section_text_0",
            "<div data-section-id=\"section_text_0\"><h3>Edited</h3></div>".to_string(),
            "user",
            Some("make it sharper".to_string()),
        )
        .await
        .expect("patch");

    assert_eq!(section.version, 2);
    assert_eq!(section.edit_history.len(), 2);
    assert_eq!(section.edit_history[1].version, 2);
    assert_eq!(section.edit_history[1].edited_by, "user");
    assert_eq!(
        section.edit_history[1].prompt.as_deref(),
        Some("make it sharper")
    );
    assert_eq!(section.metadata.last_modified_by.as_deref(), Some("user"));
    // The first revision is untouched: history is append-only.
    assert_eq!(section.edit_history[0].version, 1);

    let after = store.get_report(&report.id).await.expect("reload");
    assert_invariants(&after);
    assert!(after.updated_at >= report.updated_at);
}

#[tokio::test]
async fn test_patch_supersedes_whole_document_fallback() {
    let store = MemoryReportStore::new();
    let mut seed = new_report(1);
    seed.html_content = Some("<p>legacy whole document</p>".to_string());
    let report = store.create_report(seed).await.expect("create");

    store
        .patch_section(
            &report.id,
            "section_text_0",
            "<div>new</div>".to_string(),
            "user",
            None,
        )
        .await
        .expect("patch");

    let after = store.get_report(&report.id).await.expect("reload");
    assert_eq!(after.html_content, None);
}

#[tokio::test]
async fn test_insert_shifts_following_orders_and_clamps_position() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(2)).await.expect("create");

    let new_section = NewSection {
        kind: SectionKind::Table,
        title: "Breakdown".to_string(),
        html_content: "<div><h3>Breakdown</h3><table></table></div>".to_string(),
        created_by: "ai".to_string(),
        prompt: Some("add a breakdown".to_string()),
        model: Some("claude-sonnet-4-5-20250929".to_string()),
    };
    let after = store
        .insert_section(&report.id, 1, new_section.clone())
        .await
        .expect("insert");

    assert_eq!(after.sections.len(), 3);
    assert_eq!(after.sections[1].title, "Breakdown");
    assert_eq!(after.sections[1].version, 1);
    assert_eq!(after.sections[0].id, "section_text_0");
    assert_eq!(after.sections[2].id, "section_text_1");
    assert_invariants(&after);

    // Past-the-end positions clamp to an append.
    let after = store
        .insert_section(&report.id, 99, new_section)
        .await
        .expect("clamped insert");
    assert_eq!(after.sections.len(), 4);
    assert_eq!(after.sections[3].title, "Breakdown");
    assert_invariants(&after);
}

#[tokio::test]
async fn test_delete_compacts_sibling_orders() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(3)).await.expect("create");

    let after = store
        .delete_section(&report.id, "section_text_1")
        .await
        .expect("delete");

    assert_eq!(after.sections.len(), 2);
    assert_eq!(after.sections[0].id, "section_text_0");
    assert_eq!(after.sections[1].id, "section_text_2");
    assert_invariants(&after);
}

#[tokio::test]
async fn test_move_swaps_with_adjacent_sibling() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(3)).await.expect("create");

    let after = store
        .move_section(&report.id, "section_text_2", MoveDirection::Up)
        .await
        .expect("move up");
    let ids: Vec<&str> = after.sections.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["section_text_0", "section_text_2", "section_text_1"]);
    assert_invariants(&after);
}

#[tokio::test]
async fn test_boundary_moves_are_reported_no_ops() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(3)).await.expect("create");

    // First section up: no-op, not an error.
    let after = store
        .move_section(&report.id, "section_text_0", MoveDirection::Up)
        .await
        .expect("no-op up");
    assert_eq!(after.sections[0].id, "section_text_0");

    // Last section down: same.
    let after = store
        .move_section(&report.id, "section_text_2", MoveDirection::Down)
        .await
        .expect("no-op down");
    let ids: Vec<&str> = after.sections.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["section_text_0", "section_text_1", "section_text_2"]);
    assert_invariants(&after);
}

#[tokio::test]
async fn test_duplicate_resets_identity_and_history() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(2)).await.expect("create");

    // Build up some history on the source first.
    store
        .patch_section(
            &report.id,
            "section_text_0",
            "<div>v2</div>".to_string(),
            "user",
            None,
        )
        .await
        .expect("patch");

    let after = store
        .duplicate_section(&report.id, "section_text_0")
        .await
        .expect("duplicate");

    assert_eq!(after.sections.len(), 3);
    let copy = &after.sections[1];
    assert_ne!(copy.id, "section_text_0");
    assert!(copy.id.starts_with("section_"));
    assert_eq!(copy.html_content, "<div>v2</div>");
    // Fresh lineage: version and history restart at 1.
    assert_eq!(copy.version, 1);
    assert_eq!(copy.edit_history.len(), 1);
    assert_invariants(&after);
}

#[tokio::test]
async fn test_latest_report_for_thread_picks_newest() {
    let store = MemoryReportStore::new();
    let first = store.create_report(new_report(1)).await.expect("first");
    // created_at has nanosecond resolution; force distinct stamps.
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = store.create_report(new_report(1)).await.expect("second");
    assert_ne!(first.id, second.id);

    let latest = store
        .latest_report_for_thread("thread_1")
        .await
        .expect("latest");
    assert_eq!(latest.id, second.id);
}

#[tokio::test]
async fn test_usage_totals_are_recomputed_from_operations() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(1)).await.expect("create");

    store
        .append_operation(&report.id, operation(100, 50, 1_050_000))
        .await
        .expect("first op");
    let after = store
        .append_operation(&report.id, operation(20, 10, 210_000))
        .await
        .expect("second op");

    assert_eq!(after.operations.len(), 2);
    assert_eq!(after.total_tokens(), 180);
    assert_eq!(after.total_cost_nanos(), 1_260_000);
    assert!((after.total_cost_usd() - 0.00126).abs() < 1e-12);
}

#[tokio::test]
async fn test_missing_aggregates_are_reported_not_panicked() {
    let store = MemoryReportStore::new();
    let report = store.create_report(new_report(1)).await.expect("create");

    assert_eq!(
        store.get_report("report_ghost").await,
        Err(StoreError::ReportNotFound("report_ghost".to_string()))
    );
    assert_eq!(
        store.latest_report_for_thread("thread_ghost").await,
        Err(StoreError::ThreadNotFound("thread_ghost".to_string()))
    );
    assert_eq!(
        store
            .delete_section(&report.id, "section_ghost")
            .await,
        Err(StoreError::SectionNotFound("section_ghost".to_string()))
    );
    assert_eq!(
        store
            .patch_section(&report.id, "section_ghost", "<div/>".to_string(), "user", None)
            .await,
        Err(StoreError::SectionNotFound("section_ghost".to_string()))
    );
}

// ---- property: invariants hold under arbitrary operation sequences ----

#[derive(Debug, Clone)]
enum Op {
    Insert(usize),
    Delete(usize),
    MoveUp(usize),
    MoveDown(usize),
    Duplicate(usize),
    Patch(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..8).prop_map(Op::Insert),
        (0usize..8).prop_map(Op::Delete),
        (0usize..8).prop_map(Op::MoveUp),
        (0usize..8).prop_map(Op::MoveDown),
        (0usize..8).prop_map(Op::Duplicate),
        (0usize..8).prop_map(Op::Patch),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_order_and_version_invariants_survive_any_sequence(
        ops in proptest::collection::vec(op_strategy(), 1..24)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let store: Arc<dyn ReportStore> = Arc::new(MemoryReportStore::new());
            let report = store.create_report(new_report(3)).await.expect("create");

            for op in ops {
                let current = store.get_report(&report.id).await.expect("reload");
                let nth_id = |index: usize| -> Option<String> {
                    current
                        .sections
                        .get(index % current.sections.len().max(1))
                        .map(|section| section.id.clone())
                };
                let result = match op {
                    Op::Insert(position) => {
                        store
                            .insert_section(
                                &report.id,
                                position,
                                NewSection {
                                    kind: SectionKind::Text,
                                    title: "Inserted".to_string(),
                                    html_content: "<div>inserted</div>".to_string(),
                                    created_by: "ai".to_string(),
                                    prompt: None,
                                    model: None,
                                },
                            )
                            .await
                            .map(|_| ())
                    }
                    Op::Delete(index) => match nth_id(index) {
                        Some(id) => store.delete_section(&report.id, &id).await.map(|_| ()),
                        None => Ok(()),
                    },
                    Op::MoveUp(index) => match nth_id(index) {
                        Some(id) => store
                            .move_section(&report.id, &id, MoveDirection::Up)
                            .await
                            .map(|_| ()),
                        None => Ok(()),
                    },
                    Op::MoveDown(index) => match nth_id(index) {
                        Some(id) => store
                            .move_section(&report.id, &id, MoveDirection::Down)
                            .await
                            .map(|_| ()),
                        None => Ok(()),
                    },
                    Op::Duplicate(index) => match nth_id(index) {
                        Some(id) => store.duplicate_section(&report.id, &id).await.map(|_| ()),
                        None => Ok(()),
                    },
                    Op::Patch(index) => match nth_id(index) {
                        Some(id) => store
                            .patch_section(
                                &report.id,
                                &id,
                                "<div>patched</div>".to_string(),
                                "user",
                                None,
                            )
                            .await
                            .map(|_| ()),
                        None => Ok(()),
                    },
                };
                result.expect("store op");

                let after = store.get_report(&report.id).await.expect("reload");
                assert_invariants(&after);
            }
        });
    }
}
