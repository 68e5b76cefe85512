//! Heading text → URL fragment identifiers.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

/// Anything that is not a letter, number, whitespace, or hyphen. Combining
/// marks (`\p{M}`) fall outside `\p{L}` and are dropped too.
static DISALLOWED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s-]").expect("BUG: invalid DISALLOWED_RE regex literal"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("BUG: invalid WHITESPACE_RE regex literal"));

static HYPHENS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-+").expect("BUG: invalid HYPHENS_RE regex literal"));

/// Convert heading text to a URL-fragment-safe slug.
///
/// Lower-cases and trims the text, drops every character that is not a
/// letter, digit, whitespace, or hyphen, then turns each whitespace run into
/// `-` and collapses hyphen runs. Empty or symbol-only input yields an empty
/// string; callers treat that as "no usable heading".
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let kept = DISALLOWED_RE.replace_all(lowered.trim(), "");
    let hyphenated = WHITESPACE_RE.replace_all(&kept, "-");
    HYPHENS_RE.replace_all(&hyphenated, "-").into_owned()
}

/// Identifiers in use on a single page.
///
/// Pre-existing `id` attributes are reserved first so generated slugs never
/// shadow them. A generated slug that collides gets a numeric suffix: the
/// first occurrence is bare (`setup`), later ones become `setup-1`,
/// `setup-2`, and so on.
#[derive(Debug, Default)]
pub struct SlugRegistry {
    used: HashSet<String>,
    // base slug → next suffix to try
    counters: HashMap<String, usize>,
}

impl SlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an existing identifier as taken.
    pub fn reserve(&mut self, id: &str) {
        self.used.insert(id.to_owned());
    }

    /// Generate a unique identifier for `text`, or `None` if it slugs to empty.
    pub fn claim(&mut self, text: &str) -> Option<String> {
        let base = slugify(text);
        if base.is_empty() {
            return None;
        }
        if self.used.insert(base.clone()) {
            return Some(base);
        }
        let counter = self.counters.entry(base.clone()).or_insert(1);
        loop {
            let candidate = format!("{base}-{counter}");
            *counter += 1;
            if self.used.insert(candidate.clone()) {
                return Some(candidate);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_and_digits() {
        assert_eq!(slugify("Hello, World! 123"), "hello-world-123");
    }

    #[test]
    fn unicode_letters_are_kept() {
        assert_eq!(slugify("Привет, Мир"), "привет-мир");
        assert_eq!(slugify("Größe über alles"), "größe-über-alles");
    }

    #[test]
    fn combining_marks_are_dropped() {
        // Devanagari vowel signs and virama are marks, not letters.
        assert_eq!(slugify("नमस्ते"), "नमसत");
        assert_eq!(slugify("नमस्ते दुनिया"), "नमसत-दनय");
        // Decomposed "é" keeps its base letter only.
        assert_eq!(slugify("Cafe\u{301} Noir"), "cafe-noir");
    }

    #[test]
    fn whitespace_and_hyphen_runs_collapse() {
        assert_eq!(slugify("  a  -  b\t\nc  "), "a-b-c");
        assert_eq!(slugify("foo---bar"), "foo-bar");
    }

    #[test]
    fn removed_characters_do_not_split_words() {
        assert_eq!(slugify("don't"), "dont");
        assert_eq!(slugify("a ! b"), "a-b");
    }

    #[test]
    fn trailing_separator_after_removed_symbol_is_kept() {
        // Trimming happens before symbols are dropped.
        assert_eq!(slugify("Hello !"), "hello-");
    }

    #[test]
    fn empty_and_symbol_only_inputs() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("   "), "");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn slugify_is_idempotent() {
        for input in [
            "Hello, World! 123",
            "  Leading and trailing  ",
            "Привет — мир",
            "İstanbul Ünïcödé",
            "a -- b __ c",
            "Hello !",
            "Ⅻ chapters",
        ] {
            let once = slugify(input);
            assert_eq!(slugify(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn output_alphabet_is_lowercase_alnum_and_single_hyphens() {
        for input in ["Mixed CASE -- words!!", "tabs\tand\nnewlines", "ÀÉÎ õü"] {
            let slug = slugify(input);
            assert!(!slug.contains("--"), "{slug:?}");
            assert!(
                slug.chars().all(|c| c == '-' || (c.is_alphanumeric() && !c.is_uppercase())),
                "{slug:?}"
            );
        }
    }

    #[test]
    fn registry_suffixes_duplicates() {
        let mut reg = SlugRegistry::new();
        assert_eq!(reg.claim("Foo").as_deref(), Some("foo"));
        assert_eq!(reg.claim("Foo").as_deref(), Some("foo-1"));
        assert_eq!(reg.claim("foo!").as_deref(), Some("foo-2"));
    }

    #[test]
    fn registry_skips_reserved_identifiers() {
        let mut reg = SlugRegistry::new();
        reg.reserve("intro");
        reg.reserve("intro-1");
        assert_eq!(reg.claim("Intro").as_deref(), Some("intro-2"));
    }

    #[test]
    fn registry_avoids_collision_with_literal_suffixed_heading() {
        let mut reg = SlugRegistry::new();
        assert_eq!(reg.claim("Foo 1").as_deref(), Some("foo-1"));
        assert_eq!(reg.claim("Foo").as_deref(), Some("foo"));
        assert_eq!(reg.claim("Foo").as_deref(), Some("foo-2"));
    }

    #[test]
    fn registry_rejects_empty_slug() {
        let mut reg = SlugRegistry::new();
        assert_eq!(reg.claim("???"), None);
    }
}
