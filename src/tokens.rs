//! Token counting for budget estimation.
//!
//! The context assembler and the cost fallback both measure text with the
//! same `cl100k_base` BPE, so a budget validated here holds when the
//! assembled prompt is retokenized.

use std::sync::OnceLock;

use tiktoken_rs::{cl100k_base, CoreBPE};

static BPE: OnceLock<CoreBPE> = OnceLock::new();

fn bpe() -> &'static CoreBPE {
    // Loading the merge table is infallible for the vendored encoding.
    BPE.get_or_init(|| cl100k_base().expect("failed to load cl100k_base tokenizer"))
}

/// Counts tokens for arbitrary text spans.
///
/// Injected wherever budget arithmetic happens so tests can substitute a
/// fixed-cost estimator.
pub trait TokenEstimator: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `cl100k_base` token counter backed by a process-wide BPE table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cl100kCounter;

impl Cl100kCounter {
    pub fn new() -> Self {
        // Force the table load up front so the first query doesn't pay it.
        let _ = bpe();
        Self
    }
}

impl TokenEstimator for Cl100kCounter {
    fn count(&self, text: &str) -> usize {
        bpe().encode_with_special_tokens(text).len()
    }
}
