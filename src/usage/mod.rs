//! Usage metering: per-model rate table, priced operations, and the push
//! feed consumers subscribe to instead of polling.
//!
//! Costs are in nanodollars (1e-9 USD) per token; integer arithmetic keeps
//! the usage-sum invariant exact.

use crate::types::{OperationKind, Report, TokenUsage, UsageOperation};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::broadcast;

/// Per-token rates for one `(provider, model)` pair.
#[derive(Debug, Clone, Copy)]
pub struct ModelRate {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelRate {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn cost_nanos(&self, usage: TokenUsage) -> i64 {
        (usage.input_tokens as i64) * self.input_nanos_per_token
            + (usage.output_tokens as i64) * self.output_nanos_per_token
    }
}

// Claude Sonnet: $3.00/1M input, $15.00/1M output
const CLAUDE_SONNET: ModelRate = ModelRate::new(3_000, 15_000);
// Claude Haiku: $0.80/1M input, $4.00/1M output
const CLAUDE_HAIKU: ModelRate = ModelRate::new(800, 4_000);
// Claude Opus: $5.00/1M input, $25.00/1M output
const CLAUDE_OPUS: ModelRate = ModelRate::new(5_000, 25_000);
// GPT-4o: $2.50/1M input, $10.00/1M output
const GPT_4O: ModelRate = ModelRate::new(2_500, 10_000);
// GPT-4o-mini: $0.15/1M input, $0.60/1M output
const GPT_4O_MINI: ModelRate = ModelRate::new(150, 600);

/// Unknown models price at a mid-range rate; an unrecognized model is never
/// an error.
pub const DEFAULT_RATE: ModelRate = CLAUDE_SONNET;

static RATE_MAP: OnceLock<HashMap<(&'static str, &'static str), ModelRate>> = OnceLock::new();

fn init_rates() -> HashMap<(&'static str, &'static str), ModelRate> {
    let mut map = HashMap::new();
    map.insert(("anthropic", "claude-sonnet-4-5-20250929"), CLAUDE_SONNET);
    map.insert(("anthropic", "claude-3-5-sonnet-20241022"), CLAUDE_SONNET);
    map.insert(("anthropic", "claude-3-5-haiku-20241022"), CLAUDE_HAIKU);
    map.insert(("anthropic", "claude-opus-4-5-20251101"), CLAUDE_OPUS);
    map.insert(("openai", "gpt-4o"), GPT_4O);
    map.insert(("openai", "gpt-4o-2024-08-06"), GPT_4O);
    map.insert(("openai", "gpt-4o-mini"), GPT_4O_MINI);
    map
}

/// Look up the rate for `(provider, model)`, falling back to [`DEFAULT_RATE`].
pub fn rate_for(provider: &str, model: &str) -> ModelRate {
    let map = RATE_MAP.get_or_init(init_rates);
    map.get(&(provider, model)).copied().unwrap_or(DEFAULT_RATE)
}

/// One operation pushed on the subscription feed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageUpdate {
    pub report_id: String,
    pub operation: UsageOperation,
}

/// Read-only totals snapshot; always recomputed as sums, never cached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub total_tokens: u64,
    pub total_cost_nanos: i64,
    pub total_cost_usd: f64,
    pub operations: Vec<UsageOperation>,
}

/// Prices operations and owns the broadcast feed. Passive: totals live in
/// the report aggregate and only the orchestrator appends to them.
pub struct UsageMeter {
    feed: broadcast::Sender<UsageUpdate>,
}

impl Default for UsageMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageMeter {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self { feed }
    }

    /// Build a priced operation. Zero-token usage prices to zero but is still
    /// a full operation, preserving one-operation-per-request auditability.
    pub fn priced_operation(
        &self,
        kind: OperationKind,
        model: &str,
        provider: &str,
        usage: TokenUsage,
    ) -> UsageOperation {
        let rate = rate_for(provider, model);
        UsageOperation {
            kind,
            timestamp: Utc::now(),
            model: model.to_string(),
            provider: provider.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_nanos: rate.cost_nanos(usage),
        }
    }

    /// Push an operation onto the feed. A send error just means nobody is
    /// subscribed right now.
    pub fn publish(&self, report_id: &str, operation: &UsageOperation) {
        let _ = self.feed.send(UsageUpdate {
            report_id: report_id.to_string(),
            operation: operation.clone(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsageUpdate> {
        self.feed.subscribe()
    }
}

/// Recompute the totals for a report from its operation list.
pub fn usage_snapshot(report: &Report) -> UsageSnapshot {
    UsageSnapshot {
        total_tokens: report.total_tokens(),
        total_cost_nanos: report.total_cost_nanos(),
        total_cost_usd: report.total_cost_usd(),
        operations: report.operations.clone(),
    }
}
