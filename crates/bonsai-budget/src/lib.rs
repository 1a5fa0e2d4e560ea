//! Token budget management for chat-completion requests.
//!
//! Fits a conversation history plus tool definitions into a model's context
//! window before the request goes out. Tool definitions and system messages
//! get their budget reserved up front; the remaining window is filled with
//! the most recent conversation turns.
//!
//! # Key Components
//!
//! - [`tokenizer`]: exact token counting via tiktoken model encodings
//! - [`limits`]: model context window limits with user overrides
//! - [`window`]: the window-fitting algorithm
//! - [`types`]: error and result types

pub mod limits;
pub mod tokenizer;
pub mod types;
pub mod window;

pub use limits::{
    max_tokens_for_model, ModelLimit, ModelLimitsRegistry, DEFAULT_MODEL_LIMIT, KNOWN_MODEL_LIMITS,
};
pub use tokenizer::Tokenizer;
pub use types::{BudgetError, TokenUsageBreakdown, WindowedContext};
pub use window::{limit_messages_to_token_count, limit_messages_with_usage, BudgetAllocator};
