//! Window fitting: trims a conversation to a model's token budget.
//!
//! Reservation happens in two phases before any conversation turn is
//! considered: first the combined tool definitions, then every system
//! message wherever it appears in the history. The remaining budget is
//! filled newest-first; the first turn that does not fit sets a hard cutoff
//! and nothing older is reconsidered, so the retained turns are always a
//! contiguous suffix of the conversation.

use bonsai_core::{Message, Role, ToolSchema};
use once_cell::sync::Lazy;

use crate::limits::{max_tokens_for_model, ModelLimitsRegistry};
use crate::tokenizer::Tokenizer;
use crate::types::{BudgetError, TokenUsageBreakdown, WindowedContext};

/// Process-wide tokenizer backing the free-function entry points.
static SHARED_TOKENIZER: Lazy<Tokenizer> = Lazy::new(Tokenizer::new);

/// Fit `messages` plus `tools` into the model's context window.
///
/// `max_tokens` overrides the model's registered window when provided.
/// Returns the retained messages in their original relative order: every
/// system message, plus the most recent conversation turns that fit.
///
/// # Errors
///
/// * [`BudgetError::ToolsTooLarge`] if the combined tool definitions alone
///   exceed the budget
/// * [`BudgetError::InsufficientSystemBudget`] if the system messages exceed
///   what is left after the tool reservation
pub fn limit_messages_to_token_count(
    messages: &[Message],
    tools: &[ToolSchema],
    model: &str,
    max_tokens: Option<u32>,
) -> Result<Vec<Message>, BudgetError> {
    fit_window(&SHARED_TOKENIZER, None, messages, tools, model, max_tokens)
        .map(|windowed| windowed.messages)
}

/// Like [`limit_messages_to_token_count`], returning the trimmed messages
/// together with the token usage breakdown.
pub fn limit_messages_with_usage(
    messages: &[Message],
    tools: &[ToolSchema],
    model: &str,
    max_tokens: Option<u32>,
) -> Result<WindowedContext, BudgetError> {
    fit_window(&SHARED_TOKENIZER, None, messages, tools, model, max_tokens)
}

/// Window-fitting engine owning its tokenizer and optional limit overrides.
///
/// The free functions cover the common case; an allocator value is for
/// callers that manage their own encoder cache or carry user limit
/// overrides.
#[derive(Default)]
pub struct BudgetAllocator {
    tokenizer: Tokenizer,
    limits: Option<ModelLimitsRegistry>,
}

impl BudgetAllocator {
    pub fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            limits: None,
        }
    }

    /// Use `registry` for model limit resolution instead of the built-in
    /// table alone.
    pub fn with_limits(mut self, registry: ModelLimitsRegistry) -> Self {
        self.limits = Some(registry);
        self
    }

    pub fn limit(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: &str,
        max_tokens: Option<u32>,
    ) -> Result<Vec<Message>, BudgetError> {
        self.limit_with_usage(messages, tools, model, max_tokens)
            .map(|windowed| windowed.messages)
    }

    pub fn limit_with_usage(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: &str,
        max_tokens: Option<u32>,
    ) -> Result<WindowedContext, BudgetError> {
        fit_window(
            &self.tokenizer,
            self.limits.as_ref(),
            messages,
            tools,
            model,
            max_tokens,
        )
    }
}

fn fit_window(
    tokenizer: &Tokenizer,
    limits: Option<&ModelLimitsRegistry>,
    messages: &[Message],
    tools: &[ToolSchema],
    model: &str,
    max_tokens: Option<u32>,
) -> Result<WindowedContext, BudgetError> {
    let resolved_budget = max_tokens.unwrap_or_else(|| match limits {
        Some(registry) => registry.max_tokens(model),
        None => max_tokens_for_model(model),
    });
    tracing::debug!(
        "fitting {count} messages into a {budget}-token window for {model}",
        count = messages.len(),
        budget = resolved_budget
    );

    // The tool collection is serialized once and costed as a single blob, so
    // shared JSON structure is paid for once rather than per tool. An empty
    // collection never reaches the wire and costs nothing.
    let tool_tokens = if tools.is_empty() {
        0
    } else {
        let blob = serde_json::to_string(tools).unwrap_or_default();
        tokenizer.count_text(model, &blob)
    };
    if tool_tokens > resolved_budget {
        return Err(BudgetError::ToolsTooLarge {
            tool_tokens,
            budget: resolved_budget,
        });
    }
    let after_tools = resolved_budget - tool_tokens;
    let mut budget = after_tools;

    // Reserve for every system message up front, wherever it sits in the
    // history. Underflow here is the failure signal, never clamped away.
    let mut system_tokens: u32 = 0;
    for message in messages.iter().filter(|m| m.role == Role::System) {
        let cost = tokenizer.count_message(model, message);
        system_tokens = system_tokens.saturating_add(cost);
        budget = match budget.checked_sub(cost) {
            Some(remaining) => remaining,
            None => {
                return Err(BudgetError::InsufficientSystemBudget {
                    system_tokens,
                    available: after_tools,
                })
            }
        };
    }

    // Newest-first selection. The first turn that does not fit sets the
    // cutoff; everything older is dropped without being counted.
    let mut kept_reversed: Vec<&Message> = Vec::with_capacity(messages.len());
    let mut window_tokens: u32 = 0;
    let mut dropped = 0usize;
    let mut cutoff = false;

    for message in messages.iter().rev() {
        if message.role == Role::System {
            kept_reversed.push(message);
            continue;
        }
        if cutoff {
            dropped += 1;
            continue;
        }

        let cost = tokenizer.count_message(model, message);
        if cost > budget {
            cutoff = true;
            dropped += 1;
            continue;
        }

        budget -= cost;
        window_tokens = window_tokens.saturating_add(cost);
        kept_reversed.push(message);
    }

    if dropped > 0 {
        tracing::warn!(
            "dropped {dropped} of {total} messages to fit the {budget}-token window for {model}",
            total = messages.len(),
            budget = resolved_budget
        );
    }

    kept_reversed.reverse();
    let kept: Vec<Message> = kept_reversed.into_iter().cloned().collect();

    let total_tokens = tool_tokens
        .saturating_add(system_tokens)
        .saturating_add(window_tokens);

    Ok(WindowedContext {
        messages: kept,
        token_usage: TokenUsageBreakdown {
            tool_tokens,
            system_tokens,
            window_tokens,
            total_tokens,
            budget_limit: resolved_budget,
        },
        truncation_occurred: dropped > 0,
        messages_dropped: dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ModelLimit;
    use serde_json::json;

    const MODEL: &str = "gpt-4";

    fn tokenizer() -> Tokenizer {
        Tokenizer::new()
    }

    fn cost(message: &Message) -> u32 {
        tokenizer().count_message(MODEL, message)
    }

    fn search_tool() -> ToolSchema {
        ToolSchema::function(
            "search",
            "Search the workspace",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        )
    }

    #[test]
    fn ample_budget_returns_input_unchanged() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi there", None),
            Message::user("How are you?"),
        ];

        let limited =
            limit_messages_to_token_count(&messages, &[], MODEL, Some(100)).unwrap();
        assert_eq!(limited, messages);
    }

    #[test]
    fn truncation_keeps_system_and_recent_suffix() {
        let system = Message::system("Answer briefly");
        let oldest = Message::user("First question about the project layout");
        let middle = Message::assistant("A long explanation of the project layout", None);
        let newest = Message::user("Thanks");

        // Room for system + newest, but one token short of also fitting the
        // middle turn: cutoff lands on the middle, oldest is never counted.
        let budget = cost(&system) + cost(&newest) + cost(&middle) - 1;
        let messages = vec![system.clone(), oldest, middle, newest.clone()];

        let limited =
            limit_messages_to_token_count(&messages, &[], MODEL, Some(budget)).unwrap();
        assert_eq!(limited, vec![system, newest]);
    }

    #[test]
    fn cutoff_is_never_reconsidered() {
        let system = Message::system("Answer briefly");
        let tiny = Message::user("Hi");
        let large = Message::assistant(
            "An oversized reply that repeats itself and repeats itself and repeats itself",
            None,
        );
        let newest = Message::user("Latest question about the build");

        // The tiny oldest turn would fit the leftover budget, but it sits
        // behind the cutoff and must stay dropped.
        let budget = cost(&system) + cost(&newest) + cost(&tiny);
        assert!(cost(&large) > cost(&newest) + cost(&tiny));
        let messages = vec![system.clone(), tiny, large, newest.clone()];

        let limited =
            limit_messages_to_token_count(&messages, &[], MODEL, Some(budget)).unwrap();
        assert_eq!(limited, vec![system, newest]);
    }

    #[test]
    fn system_messages_keep_their_original_positions() {
        let first = Message::system("First rule");
        let user = Message::user("Question");
        let second = Message::system("Second rule");
        let reply = Message::assistant("Answer", None);
        let messages = vec![first.clone(), user, second.clone(), reply];

        let limited =
            limit_messages_to_token_count(&messages, &[], MODEL, Some(1_000)).unwrap();
        assert_eq!(limited[0], first);
        assert_eq!(limited[2], second);
    }

    #[test]
    fn tools_too_large_fails_before_messages() {
        let messages = vec![Message::user("Hello")];
        let result = limit_messages_to_token_count(&messages, &[search_tool()], MODEL, Some(5));
        assert!(matches!(result, Err(BudgetError::ToolsTooLarge { .. })));
    }

    #[test]
    fn system_reservation_failure_is_fail_fast() {
        let s1 = Message::system("A system rule that consumes a fair number of tokens");
        let s2 = Message::system("Another system rule that consumes a fair number of tokens");
        let budget = cost(&s1) + cost(&s2) - 1;
        let messages = vec![s1, Message::user("Hello"), s2];

        let result = limit_messages_to_token_count(&messages, &[], MODEL, Some(budget));
        assert!(matches!(
            result,
            Err(BudgetError::InsufficientSystemBudget { .. })
        ));
    }

    #[test]
    fn tool_cost_is_one_combined_blob() {
        let tools = vec![search_tool(), search_tool(), search_tool()];
        let blob = serde_json::to_string(&tools).unwrap();
        let lump = tokenizer().count_text(MODEL, &blob);
        let user = Message::user("Hello");

        // Exactly the combined-serialization cost plus the lone message fits.
        let limited =
            limit_messages_to_token_count(&[user.clone()], &tools, MODEL, Some(lump + cost(&user)))
                .unwrap();
        assert_eq!(limited, vec![user.clone()]);

        // One token short of the lump alone fails before any message is seen.
        let result = limit_messages_to_token_count(&[user], &tools, MODEL, Some(lump - 1));
        assert!(matches!(
            result,
            Err(BudgetError::ToolsTooLarge { tool_tokens, budget })
                if tool_tokens == lump && budget == lump - 1
        ));
    }

    #[test]
    fn empty_tool_collection_costs_nothing() {
        let user = Message::user("Hello");
        let budget = cost(&user);
        let messages = vec![user.clone()];

        let limited =
            limit_messages_to_token_count(&messages, &[], MODEL, Some(budget)).unwrap();
        assert_eq!(limited, vec![user]);
    }

    #[test]
    fn empty_history_stays_empty() {
        let limited = limit_messages_to_token_count(&[], &[], MODEL, Some(100)).unwrap();
        assert!(limited.is_empty());
    }

    #[test]
    fn default_budget_comes_from_model_table() {
        // gpt-4's 8192-token window is ample for a short exchange.
        let messages = vec![Message::system("Rules"), Message::user("Hello")];
        let limited = limit_messages_to_token_count(&messages, &[], MODEL, None).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn usage_breakdown_sums_consistently() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi there", None),
        ];

        let windowed =
            limit_messages_with_usage(&messages, &[search_tool()], MODEL, Some(2_000)).unwrap();

        let usage = &windowed.token_usage;
        assert_eq!(
            usage.total_tokens,
            usage.tool_tokens + usage.system_tokens + usage.window_tokens
        );
        assert!(usage.total_tokens <= usage.budget_limit);
        assert!(!windowed.truncation_occurred);
        assert_eq!(windowed.messages_dropped, 0);
    }

    #[test]
    fn usage_reports_dropped_messages() {
        let system = Message::system("Answer briefly");
        let old = Message::user("A long opening question with plenty of words in it");
        let newest = Message::user("Short");
        let budget = cost(&system) + cost(&newest);
        let messages = vec![system, old, newest];

        let windowed = limit_messages_with_usage(&messages, &[], MODEL, Some(budget)).unwrap();
        assert!(windowed.truncation_occurred);
        assert_eq!(windowed.messages_dropped, 1);
        assert_eq!(windowed.messages.len(), 2);
    }

    #[test]
    fn allocator_uses_registry_overrides() {
        let mut registry = ModelLimitsRegistry::new();
        // Clamp gpt-4 to a window that cannot hold both turns below.
        let system = Message::system("Answer briefly");
        let old = Message::user("A long opening question with plenty of words in it");
        let newest = Message::user("Short");
        let clamp = cost(&system) + cost(&newest);
        registry.add_limit(ModelLimit::new(MODEL, clamp));

        let allocator = BudgetAllocator::new().with_limits(registry);
        let messages = vec![system.clone(), old, newest.clone()];

        let limited = allocator.limit(&messages, &[], MODEL, None).unwrap();
        assert_eq!(limited, vec![system, newest]);
    }
}
