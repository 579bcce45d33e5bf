mod report;
mod wire;

pub use report::{
    Insight, InsightSeverity, OperationKind, Report, ReportMetadata, Section, SectionKind,
    SectionMetadata, SectionRevision, TokenUsage, UsageOperation,
};
pub use wire::{GenerateRequest, StreamEvent, StreamMode, DONE_FRAME, DONE_SENTINEL};
