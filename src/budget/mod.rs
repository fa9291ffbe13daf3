//! Token budget — zones, estimation, and context compression.
//!
//! Components:
//! - `BudgetZone` — ordered usage classification driving context size
//! - `estimate_tokens` / `estimate_task_cost` — crude char-count heuristic
//! - `optimize_context` / `compress_summary` — zone-driven truncation
//! - `governor` — per-worker zone tracking and escalation alerts

pub mod governor;

pub use governor::Governor;

use serde::{Deserialize, Serialize};

/// Current token usage level, ordered from least to most constrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BudgetZone {
    /// Full context.
    #[default]
    Green,
    /// Compress optional long-form sections.
    Yellow,
    /// Drop optional sections entirely.
    Orange,
    /// Minimum context only.
    Red,
}

impl std::fmt::Display for BudgetZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Orange => "ORANGE",
            Self::Red => "RED",
        };
        f.write_str(s)
    }
}

/// Token cost projection for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Estimate the token count of a text string using the ~4 chars/token
/// rule of thumb. Kept exactly for compatibility with recorded usage.
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as i64 + 3) / 4
}

/// Estimate the token cost of a task given context and prompt. Output is
/// estimated at ~60% of the total input tokens.
pub fn estimate_task_cost(context: &str, prompt: &str) -> TokenEstimate {
    let input = estimate_tokens(context) + estimate_tokens(prompt);
    let output = (input as f64 * 0.6) as i64;
    TokenEstimate {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
    }
}

/// Compress a context section according to the current budget zone.
/// GREEN returns the text unchanged.
pub fn optimize_context(text: &str, zone: BudgetZone) -> String {
    match zone {
        BudgetZone::Green => text.to_string(),
        BudgetZone::Yellow => compress_summary(text, 2000),
        BudgetZone::Orange => compress_summary(text, 800),
        BudgetZone::Red => compress_summary(text, 300),
    }
}

/// Truncate text to approximately `max_tokens`, preserving the beginning
/// and trimming back to the last sentence boundary so the cut never lands
/// mid-sentence.
pub fn compress_summary(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    if text.len() <= max_chars {
        return text.to_string();
    }

    let cut = floor_char_boundary(text, max_chars);
    let mut truncated = &text[..cut];
    if let Some(idx) = truncated.rfind(['.', '!', '?', '\n']) {
        if idx > max_chars / 2 {
            truncated = &truncated[..=idx];
        }
    }
    format!("{truncated}\n\n[... context compressed for token budget ...]")
}

/// Largest byte index <= `i` that is a valid char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
