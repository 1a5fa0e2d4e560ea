//! Error and result types for the budget engine.

use bonsai_core::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while fitting a conversation into the budget.
///
/// Both conditions are fail-fast: no messages are selected once either
/// reservation phase fails, and the engine never retries internally.
#[derive(Debug, Error)]
pub enum BudgetError {
    /// Combined tool definitions exceed the resolved budget
    #[error("Tool definitions ({tool_tokens} tokens) exceed the token budget ({budget} tokens)")]
    ToolsTooLarge { tool_tokens: u32, budget: u32 },

    /// System messages exceed the budget remaining after tool definitions
    #[error("System messages ({system_tokens} tokens) exceed the budget remaining after tool definitions ({available} tokens)")]
    InsufficientSystemBudget { system_tokens: u32, available: u32 },
}

/// Result of fitting a conversation into the token window.
#[derive(Debug, Clone)]
pub struct WindowedContext {
    /// Messages that fit, in their original relative order
    pub messages: Vec<Message>,
    /// Token usage breakdown
    pub token_usage: TokenUsageBreakdown,
    /// Whether any message was dropped
    pub truncation_occurred: bool,
    /// Number of messages dropped
    pub messages_dropped: usize,
}

/// Detailed token usage breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageBreakdown {
    /// Tokens reserved for the combined tool definitions
    pub tool_tokens: u32,
    /// Tokens reserved for system messages
    pub system_tokens: u32,
    /// Tokens used by the retained conversation window
    pub window_tokens: u32,
    /// Total tokens in the prepared request
    pub total_tokens: u32,
    /// The resolved budget the request was fitted into
    pub budget_limit: u32,
}

impl TokenUsageBreakdown {
    /// Percentage of the budget consumed by the prepared request.
    pub fn usage_percentage(&self) -> f64 {
        if self.budget_limit == 0 {
            return 0.0;
        }
        (self.total_tokens as f64 / self.budget_limit as f64) * 100.0
    }
}
