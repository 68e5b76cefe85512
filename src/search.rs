//! In-page text search with highlight markers.
//!
//! Each query first restores every text node split by the previous query,
//! then walks the visible text under the content root and wraps each
//! case-insensitive, non-overlapping match in `<mark class="__find">`.

use std::ops::Range;

use crate::dom::{Document, NodeId};

/// Class carried by every highlight marker.
pub const MARK_CLASS: &str = "__find";

/// Text below these elements is never searched.
const EXCLUDED_ANCESTORS: [&str; 4] = ["script", "style", "code", "pre"];

/// A text node replaced by plain and marked segments.
#[derive(Debug, Clone)]
struct Split {
    original: NodeId,
    segments: Vec<NodeId>,
}

/// Result of applying one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Number of markers now present.
    pub marks: usize,
    /// First marker in document order; the host scrolls it to the viewport
    /// center with smooth animation.
    pub scroll_to: Option<NodeId>,
}

/// Owns the markers of the currently applied query.
#[derive(Debug, Default)]
pub struct SearchHighlighter {
    splits: Vec<Split>,
    marks: Vec<NodeId>,
}

impl SearchHighlighter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers created by the current query, in document order.
    pub fn marks(&self) -> &[NodeId] {
        &self.marks
    }

    /// Remove all markers and put the original text nodes back in place.
    pub fn clear(&mut self, doc: &mut Document) {
        for split in self.splits.drain(..).rev() {
            let Some(parent) = split.segments.first().and_then(|&first| doc.parent(first)) else {
                continue;
            };
            doc.insert_before(parent, split.original, split.segments.first().copied());
            for &segment in &split.segments {
                doc.detach(segment);
            }
        }
        self.marks.clear();
    }

    /// Clear previous markers, then highlight every occurrence of `query`
    /// below `root`. An empty query only clears.
    pub fn apply_query(&mut self, doc: &mut Document, root: NodeId, query: &str) -> SearchOutcome {
        self.clear(doc);
        if query.is_empty() {
            return SearchOutcome {
                marks: 0,
                scroll_to: None,
            };
        }

        for node in searchable_text_nodes(doc, root) {
            let text = doc.text(node).unwrap_or_default().to_owned();
            let matches = find_matches(&text, query);
            if matches.is_empty() {
                continue;
            }

            let mut segments = Vec::with_capacity(matches.len() * 2 + 1);
            let mut start = 0;
            for range in matches {
                segments.push(doc.create_text(&text[start..range.start]));
                let mark = doc.create_element_with("mark", &[("class", MARK_CLASS)]);
                doc.append_text(mark, &text[range.clone()]);
                segments.push(mark);
                self.marks.push(mark);
                start = range.end;
            }
            segments.push(doc.create_text(&text[start..]));

            doc.replace_with_many(node, &segments);
            self.splits.push(Split {
                original: node,
                segments,
            });
        }

        log::debug!("[search] query={query:?} marks={}", self.marks.len());
        SearchOutcome {
            marks: self.marks.len(),
            scroll_to: self.marks.first().copied(),
        }
    }
}

/// Non-empty text nodes below `root` that are not inside script, style,
/// code, or preformatted blocks.
fn searchable_text_nodes(doc: &Document, root: NodeId) -> Vec<NodeId> {
    doc.descendants(root)
        .into_iter()
        .filter(|&node| {
            let Some(text) = doc.text(node) else {
                return false;
            };
            let Some(parent) = doc.parent(node) else {
                return false;
            };
            !text.is_empty() && doc.closest(parent, &EXCLUDED_ANCESTORS).is_none()
        })
        .collect()
}

/// Byte ranges of case-insensitive, non-overlapping occurrences of `query`
/// in `text`, scanned left to right.
///
/// Comparison folds each character to lower case, so a match may differ in
/// byte length from the query; ranges always fall on character boundaries of
/// `text`.
pub fn find_matches(text: &str, query: &str) -> Vec<Range<usize>> {
    let needle: Vec<char> = query.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return Vec::new();
    }
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match match_len(&chars[i..], &needle) {
            Some(len) => {
                let start = chars[i].0;
                let end = chars.get(i + len).map_or(text.len(), |&(b, _)| b);
                out.push(start..end);
                i += len;
            }
            None => i += 1,
        }
    }
    out
}

/// Number of leading characters of `chars` whose folded form equals `needle`.
fn match_len(chars: &[(usize, char)], needle: &[char]) -> Option<usize> {
    let mut k = 0;
    let mut consumed = 0;
    while k < needle.len() {
        let &(_, c) = chars.get(consumed)?;
        for folded in c.to_lowercase() {
            if needle.get(k) != Some(&folded) {
                return None;
            }
            k += 1;
        }
        consumed += 1;
    }
    Some(consumed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
