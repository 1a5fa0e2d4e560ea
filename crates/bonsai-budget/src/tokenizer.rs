//! Token counting backed by tiktoken model encodings.
//!
//! Each model identifier resolves to its registered BPE encoding; identifiers
//! tiktoken does not recognize fall back silently to `cl100k_base`, so counts
//! for such models are an approximation rather than an error.

use std::sync::Arc;

use bonsai_core::Message;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};

/// Fallback encoding for unrecognized model identifiers.
///
/// Loads the vocabulary compiled into tiktoken-rs; that load cannot fail at
/// runtime short of a corrupted build.
static FALLBACK_ENCODING: Lazy<Arc<CoreBPE>> =
    Lazy::new(|| Arc::new(cl100k_base().expect("embedded cl100k_base vocabulary")));

/// Model-aware token counter with a per-model encoder cache.
///
/// Encoder construction is idempotent, so concurrent first use for the same
/// model may race to build; the cache keeps exactly one winner per model and
/// readers only ever observe fully constructed encoders.
pub struct Tokenizer {
    encoders: DashMap<String, Arc<CoreBPE>>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            encoders: DashMap::new(),
        }
    }

    fn encoding_for(&self, model: &str) -> Arc<CoreBPE> {
        if let Some(cached) = self.encoders.get(model) {
            return cached.value().clone();
        }

        // Built outside the map entry so the cache is never locked while
        // loading a vocabulary.
        let encoder = match get_bpe_from_model(model) {
            Ok(bpe) => Arc::new(bpe),
            Err(_) => {
                tracing::debug!(
                    "no encoding registered for model {model}, falling back to cl100k_base"
                );
                FALLBACK_ENCODING.clone()
            }
        };

        self.encoders
            .entry(model.to_string())
            .or_insert(encoder)
            .value()
            .clone()
    }

    /// Count the tokens `text` encodes to under `model`'s encoding.
    ///
    /// Empty text is zero tokens.
    pub fn count_text(&self, model: &str, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        self.encoding_for(model).encode_with_special_tokens(text).len() as u32
    }

    /// Count the tokens a message contributes to a request.
    ///
    /// Accounts for text content plus the tool-call payload fields (id, name,
    /// arguments) and the tool_call_id on tool-result turns.
    pub fn count_message(&self, model: &str, message: &Message) -> u32 {
        let content_tokens = self.count_text(model, message.text());

        let tool_call_tokens = message
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| {
                        self.count_text(model, &call.id)
                            .saturating_add(self.count_text(model, &call.function.name))
                            .saturating_add(self.count_text(model, &call.function.arguments))
                    })
                    .fold(0u32, |acc, n| acc.saturating_add(n))
            })
            .unwrap_or(0);

        let tool_call_id_tokens = message
            .tool_call_id
            .as_deref()
            .map(|id| self.count_text(model, id))
            .unwrap_or(0);

        content_tokens
            .saturating_add(tool_call_tokens)
            .saturating_add(tool_call_id_tokens)
    }

    /// Count the tokens a slice of messages contributes to a request.
    pub fn count_messages(&self, model: &str, messages: &[Message]) -> u32 {
        messages
            .iter()
            .fold(0u32, |acc, m| acc.saturating_add(self.count_message(model, m)))
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}
