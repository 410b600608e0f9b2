//! Model pricing registry.
//!
//! Centralized pricing data for the reader, responder, and embedding models.
//! Costs are in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Provider name.
    pub provider: &'static str,
    /// Cost per input token in nanodollars.
    pub input_nanos_per_token: i64,
    /// Cost per output token in nanodollars.
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(provider: &'static str, input: i64, output: i64) -> Self {
        Self {
            provider,
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    /// Calculate cost for a request.
    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// =============================================================================
// PRICING DATA
// =============================================================================

// OpenAI Embeddings
// text-embedding-3-small: $0.02/1M tokens = 20 nanodollars/token
// text-embedding-3-large: $0.13/1M tokens = 130 nanodollars/token

const OPENAI_EMBED_3_SMALL: ModelPricing = ModelPricing::new("openai", 20, 0);
const OPENAI_EMBED_3_LARGE: ModelPricing = ModelPricing::new("openai", 130, 0);

// Chat models (verify periodically against provider pricing pages)
// GPT-3.5 Turbo 0125: $0.50/1M input, $1.50/1M output
// Claude 3 Haiku: $0.25/1M input, $1.25/1M output
// Command R: $0.50/1M input, $1.50/1M output

const GPT_35_TURBO: ModelPricing = ModelPricing::new("openrouter", 500, 1_500);
const CLAUDE_3_HAIKU: ModelPricing = ModelPricing::new("openrouter", 250, 1_250);
const COMMAND_R: ModelPricing = ModelPricing::new("openrouter", 500, 1_500);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();

    // OpenAI Embeddings
    map.insert("text-embedding-3-small", OPENAI_EMBED_3_SMALL);
    map.insert("text-embedding-3-large", OPENAI_EMBED_3_LARGE);

    // Chat models
    map.insert("openai/gpt-3.5-turbo", GPT_35_TURBO);
    map.insert("openai/gpt-3.5-turbo-0125", GPT_35_TURBO);
    map.insert("anthropic/claude-3-haiku", CLAUDE_3_HAIKU);
    map.insert("anthropic/claude-3-haiku-20240307", CLAUDE_3_HAIKU);
    map.insert("cohere/command-r", COMMAND_R);
    map.insert("cohere/command-r-03-2024", COMMAND_R);

    map
}

/// Get pricing for a model.
pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    let map = PRICING_MAP.get_or_init(init_pricing);
    map.get(model_id).copied()
}

/// Calculate embedding cost.
pub fn embedding_cost(model: &str, tokens: u32) -> i64 {
    let pricing = get_pricing(model).unwrap_or(OPENAI_EMBED_3_SMALL);
    pricing.calculate_cost(tokens, 0)
}

/// Calculate chat cost.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    // Default to a mid-range model if unknown
    let default = ModelPricing::new("unknown", 500, 1_500);
    let pricing = get_pricing(model).unwrap_or(default);
    pricing.calculate_cost(input_tokens, output_tokens)
}

/// Convert nanodollars to USD for display.
pub fn nanos_to_usd(nanodollars: i64) -> f64 {
    nanodollars as f64 / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_cost() {
        // 1M tokens at $0.02/1M = $0.02 = 20,000,000 nanodollars
        let cost = embedding_cost("text-embedding-3-small", 1_000_000);
        assert_eq!(cost, 20_000_000);
    }

    #[test]
    fn test_chat_cost() {
        // 1K input + 1K output for Claude 3 Haiku
        // Input: 1000 * 250 = 250,000 nanos
        // Output: 1000 * 1250 = 1,250,000 nanos
        // Total: 1,500,000 nanos = $0.0015
        let cost = chat_cost("anthropic/claude-3-haiku", 1_000, 1_000);
        assert_eq!(cost, 1_500_000);
    }

    #[test]
    fn test_chat_cost_unknown_model_uses_default() {
        let cost = chat_cost("unknown/model", 1_000, 0);
        assert_eq!(cost, 500_000);
    }

    #[test]
    fn test_nanos_to_usd() {
        assert!((nanos_to_usd(1_500_000) - 0.0015).abs() < 1e-12);
    }
}
