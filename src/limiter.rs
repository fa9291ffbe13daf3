//! Rate-limit detection in streamed CLI output.
//!
//! Deliberately simple: a case-insensitive substring containment test
//! against a fixed keyword list per adapter type. Unknown types fall back
//! to the claude list.

/// Keyword lists per adapter type, all lowercase.
static CLAUDE_KEYWORDS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "429",
    "overloaded",
];

static GEMINI_KEYWORDS: &[&str] = &[
    "quota exceeded",
    "rate limit",
    "429",
    "resource exhausted",
];

/// Keyword list for a CLI type. Unknown types get the claude defaults.
pub fn keywords_for(cli_type: &str) -> &'static [&'static str] {
    match cli_type {
        "claude" => CLAUDE_KEYWORDS,
        "gemini" => GEMINI_KEYWORDS,
        _ => CLAUDE_KEYWORDS,
    }
}

/// Stateless matcher over one adapter's keyword list.
pub struct LimitDetector {
    keywords: Vec<String>,
}

impl LimitDetector {
    /// Build a detector from a CLI type tag.
    pub fn new(cli_type: &str) -> Self {
        Self::from_keywords(keywords_for(cli_type).iter().map(|k| k.to_string()))
    }

    /// Build a detector from an explicit keyword list (custom adapters).
    /// Keywords are lowered; an empty list falls back to the defaults.
    pub fn from_keywords<I: IntoIterator<Item = String>>(keywords: I) -> Self {
        let mut keywords: Vec<String> =
            keywords.into_iter().map(|k| k.to_lowercase()).collect();
        if keywords.is_empty() {
            keywords = CLAUDE_KEYWORDS.iter().map(|k| k.to_string()).collect();
        }
        Self { keywords }
    }

    /// True if the line contains any rate-limit keyword.
    pub fn detect(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.keywords.iter().any(|kw| lower.contains(kw.as_str()))
    }
}
