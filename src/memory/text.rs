//! Text heuristics shared by the long-term store and the dreaming cycle:
//! keyword extraction, category detection and compression.

use serde::Deserialize;

/// Marker appended to any text cut short.
pub const ELLIPSIS: &str = " …";

/// Compressed long-term text is capped at this many characters (before the marker).
pub const COMPRESSED_MAX_CHARS: usize = 300;

/// Category assigned when no trigger word scores.
pub const DEFAULT_CATEGORY: &str = "general";

const KEYWORD_COUNT: usize = 3;

const STOPWORDS: &[&str] = &[
    // de
    "ich", "du", "der", "die", "das", "ein", "eine", "und", "oder", "aber", "mit", "für", "auf",
    "in", "am", "von", "zu", "ist", "war", "sind", "sein", "habe", "hat", "haben", "dass", "ohne",
    // en
    "the", "a", "an", "and", "or", "but", "with", "for", "on", "of", "to", "is", "was", "are",
    "be", "have", "has", "that", "this", "it", "i", "you", "my", "me",
];

/// Lower-case alphanumeric tokens. Hyphens stay inside a token so
/// compound triggers such as `maat-ki` survive.
pub fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|t| t.trim_matches('-'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// The three longest non-stopword words (letters only), longest first,
/// keeping first-seen order among equal lengths. `["none"]` when nothing
/// qualifies.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut words: Vec<&str> = lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .collect();
    words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));

    let picked: Vec<String> = words
        .into_iter()
        .take(KEYWORD_COUNT)
        .map(str::to_string)
        .collect();
    if picked.is_empty() {
        vec!["none".to_string()]
    } else {
        picked
    }
}

/// Order-preserving, case-insensitive de-duplication of whitespace words,
/// then a hard cut at [`COMPRESSED_MAX_CHARS`].
pub fn compress_text(text: &str) -> String {
    let mut seen = std::collections::HashSet::new();
    let kept: Vec<&str> = text
        .split_whitespace()
        .filter(|w| seen.insert(w.to_lowercase()))
        .collect();
    let joined = kept.join(" ");

    if joined.chars().count() > COMPRESSED_MAX_CHARS {
        let mut cut = truncate_chars(&joined, COMPRESSED_MAX_CHARS).to_string();
        cut.push_str(ELLIPSIS);
        cut
    } else {
        joined
    }
}

/// Join trimmed non-empty texts with a space; when longer than `max_chars`,
/// cut so the result including [`ELLIPSIS`] is exactly `max_chars` long.
pub fn compress_block<'a>(texts: impl IntoIterator<Item = &'a str>, max_chars: usize) -> String {
    let joined = texts
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if joined.chars().count() <= max_chars {
        return joined;
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.chars().count());
    let mut cut = truncate_chars(&joined, keep).to_string();
    cut.push_str(ELLIPSIS);
    cut
}

/// Borrow at most `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Shorten for display, appending `…` when anything was dropped.
pub fn snippet(text: &str, max: usize) -> String {
    let cut = truncate_chars(text, max);
    if cut.len() < text.len() {
        format!("{cut}…")
    } else {
        cut.to_string()
    }
}

/// A named bucket and the words that vote for it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Category {
    pub name: String,
    pub triggers: Vec<String>,
}

/// Ordered category taxonomy. Declaration order breaks ties.
#[derive(Debug, Clone, PartialEq)]
pub struct Taxonomy {
    categories: Vec<Category>,
}

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "beziehung",
        &[
            "freund", "familie", "beziehung", "partner", "liebe", "vertrauen", "nähe", "friend",
            "family", "love", "trust",
        ],
    ),
    (
        "technik",
        &[
            "ki", "ai", "modell", "programm", "algorithmus", "python", "llama", "gpu", "mac",
            "linux", "loader", "model", "code", "rust",
        ],
    ),
    (
        "emotion",
        &[
            "glücklich", "traurig", "angst", "wut", "freude", "hoffnung", "energie", "happy", "sad",
            "fear", "joy", "hope",
        ],
    ),
    (
        "meta",
        &[
            "bewusstsein", "philosophie", "maat", "harmonie", "balance", "kosmos", "universum",
            "consciousness", "philosophy", "harmony", "universe",
        ],
    ),
    (
        "projekt",
        &[
            "maat-ki", "projekt", "github", "whitepaper", "buch", "mftoe", "string", "theorie",
            "project", "book", "theory",
        ],
    ),
];

impl Default for Taxonomy {
    fn default() -> Self {
        Self::new(
            BUILTIN
                .iter()
                .map(|(name, triggers)| Category {
                    name: (*name).to_string(),
                    triggers: triggers.iter().map(|t| (*t).to_string()).collect(),
                })
                .collect(),
        )
    }
}

impl Taxonomy {
    pub fn new(categories: Vec<Category>) -> Self {
        let categories = categories
            .into_iter()
            .map(|c| Category {
                name: c.name,
                triggers: c.triggers.into_iter().map(|t| t.to_lowercase()).collect(),
            })
            .collect();
        Self { categories }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Each category scores one point per distinct trigger present as a
    /// token. Highest score wins; earlier categories win ties.
    pub fn detect(&self, text: &str) -> &str {
        let toks = tokens(text);
        let mut best: Option<(&str, usize)> = None;

        for category in &self.categories {
            let score = category
                .triggers
                .iter()
                .filter(|t| toks.iter().any(|tok| tok == *t))
                .count();
            if score > 0 && best.is_none_or(|(_, s)| score > s) {
                best = Some((&category.name, score));
            }
        }

        best.map(|(name, _)| name).unwrap_or(DEFAULT_CATEGORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_prefer_longest_non_stopwords() {
        let kws = extract_keywords("Ich arbeite an meinem Projekt mit Python und Rust");
        assert_eq!(kws, vec!["arbeite", "projekt", "meinem"]);
    }

    #[test]
    fn keywords_fall_back_to_none() {
        assert_eq!(extract_keywords("und oder 42"), vec!["none"]);
    }

    #[test]
    fn compress_dedups_case_insensitively() {
        assert_eq!(compress_text("Hello hello world World again"), "Hello world again");
    }

    #[test]
    fn compress_truncates_long_text() {
        let text = (0..200).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let out = compress_text(&text);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(out.chars().count(), COMPRESSED_MAX_CHARS + ELLIPSIS.chars().count());
    }

    #[test]
    fn compress_block_caps_total_length() {
        let long = "ä".repeat(500);
        let out = compress_block([long.as_str(), "tail"], 400);
        assert_eq!(out.chars().count(), 400);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn compress_block_skips_blank_texts() {
        assert_eq!(compress_block(["  one ", "", "   ", "two"], 400), "one two");
    }

    #[test]
    fn category_detection_uses_tokens_and_declaration_order() {
        let tax = Taxonomy::default();
        assert_eq!(tax.detect("I wrote some Python on Linux"), "technik");
        assert_eq!(tax.detect("nothing to see here"), DEFAULT_CATEGORY);
        // one trigger each for beziehung and technik: earlier one wins
        assert_eq!(tax.detect("my friend likes python"), "beziehung");
        // "ai" inside "again" is not a token match
        assert_eq!(tax.detect("again and again"), DEFAULT_CATEGORY);
        assert_eq!(tax.detect("Das MAAT-KI Whitepaper"), "projekt");
    }

    #[test]
    fn snippet_marks_truncation() {
        assert_eq!(snippet("short", 10), "short");
        assert_eq!(snippet("abcdefghij", 4), "abcd…");
    }
}
