//! Token usage and cost accounting.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::messages::Message;

/// Token usage statistics reported by the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens read from cache (if caching enabled).
    #[serde(skip_serializing_if = "is_zero")]
    pub cache_read_input_tokens: u64,
    /// Tokens written to cache (if caching enabled).
    #[serde(skip_serializing_if = "is_zero")]
    pub cache_creation_input_tokens: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Usage {
    /// Total input tokens including cache operations.
    pub fn total_input_tokens(&self) -> u64 {
        self.input_tokens + self.cache_read_input_tokens + self.cache_creation_input_tokens
    }

    /// Total tokens (input + output).
    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens() + self.output_tokens
    }

    /// Accumulate usage from another Usage instance.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        self.accumulate(&other);
    }
}

/// Running usage for one query.
///
/// Assistant steps are counted once per message id, since the peer may split
/// one step across several records that repeat the same usage. Once a result
/// message arrives, its usage and cost replace the running estimate.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    seen_steps: HashSet<String>,
    steps: Usage,
    reported: Option<Usage>,
    cost_usd: Option<f64>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one message into the running totals.
    pub fn observe(&mut self, message: &Message) {
        match message {
            Message::Assistant(assistant) => {
                let Some(usage) = &assistant.message.usage else {
                    return;
                };
                let id = &assistant.message.id;
                if id.is_empty() || self.seen_steps.insert(id.clone()) {
                    self.steps.accumulate(usage);
                }
            }
            Message::Result(result) => {
                if let Some(usage) = &result.usage {
                    self.reported = Some(usage.clone());
                }
                if result.total_cost_usd.is_some() {
                    self.cost_usd = result.total_cost_usd;
                }
            }
            _ => {}
        }
    }

    /// Usage so far; authoritative once a result has been seen.
    pub fn usage(&self) -> Usage {
        self.reported.clone().unwrap_or_else(|| self.steps.clone())
    }

    /// Total cost reported by the last result message.
    pub fn total_cost_usd(&self) -> Option<f64> {
        self.cost_usd
    }
}
