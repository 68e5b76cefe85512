//! Page chrome controllers: theme persistence, scroll progress with the
//! back-to-top control, reading statistics, and the search hotkey.

use serde::Deserialize;

use crate::dom::{Document, NodeId};
use crate::storage::PreferenceStore;

// ---------------------------------------------------------------------------
// Theme
// ---------------------------------------------------------------------------

/// Reads and writes the theme preference and mirrors it onto the root
/// element's `data-theme` attribute. Theme names are not validated.
#[derive(Debug, Clone)]
pub struct ThemeController {
    key: String,
}

impl ThemeController {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_owned(),
        }
    }

    /// Stored theme, or `None` when nothing is stored or the store fails.
    pub fn stored_theme(&self, store: &dyn PreferenceStore) -> Option<String> {
        match store.get(&self.key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[theme] read failed key={} error={e}", self.key);
                None
            }
        }
    }

    /// Persist `name` and apply it to the document root.
    pub fn set_theme(&self, doc: &mut Document, store: &mut dyn PreferenceStore, name: &str) {
        let root = doc.root();
        doc.set_attr(root, "data-theme", name);
        if let Err(e) = store.set(&self.key, name) {
            log::warn!("[theme] write failed key={} error={e}", self.key);
        }
    }

    /// Apply the stored theme, if any, without writing the store back.
    /// Returns what was applied.
    pub fn restore(&self, doc: &mut Document, store: &dyn PreferenceStore) -> Option<String> {
        let theme = self.stored_theme(store)?;
        let root = doc.root();
        doc.set_attr(root, "data-theme", &theme);
        Some(theme)
    }

    /// Flip between `dark` and `light`; anything but `dark` becomes `dark`.
    pub fn toggle(&self, doc: &mut Document, store: &mut dyn PreferenceStore) -> String {
        let next = next_theme(doc.attr(doc.root(), "data-theme"));
        self.set_theme(doc, store, next);
        next.to_owned()
    }
}

/// Theme that the toggle control switches to from `current`.
pub fn next_theme(current: Option<&str>) -> &'static str {
    if current == Some("dark") {
        "light"
    } else {
        "dark"
    }
}

// ---------------------------------------------------------------------------
// Scroll progress + back to top
// ---------------------------------------------------------------------------

/// Scroll position of the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Fraction of the scrollable height already scrolled; 0 when the page
    /// does not scroll.
    pub fn progress(&self) -> f64 {
        let height = self.scroll_height - self.client_height;
        if height > 0.0 {
            self.scroll_top / height
        } else {
            0.0
        }
    }
}

/// Drives the progress bar scale and back-to-top visibility.
#[derive(Debug, Clone)]
pub struct ScrollProgress {
    bar: Option<NodeId>,
    back_to_top: Option<NodeId>,
    threshold: f64,
}

impl ScrollProgress {
    pub fn new(bar: Option<NodeId>, back_to_top: Option<NodeId>, threshold: f64) -> Self {
        Self {
            bar,
            back_to_top,
            threshold,
        }
    }

    /// Apply `metrics` to the controlled elements; returns the progress fraction.
    pub fn update(&self, doc: &mut Document, metrics: ScrollMetrics) -> f64 {
        let fraction = metrics.progress();
        if let Some(bar) = self.bar {
            doc.set_attr(bar, "style", &format!("transform: scaleX({fraction})"));
        }
        if let Some(button) = self.back_to_top {
            let style = if metrics.scroll_top > self.threshold {
                "opacity: 1; pointer-events: auto"
            } else {
                "opacity: 0; pointer-events: none"
            };
            doc.set_attr(button, "style", style);
        }
        fraction
    }
}

// ---------------------------------------------------------------------------
// Reading time + word count
// ---------------------------------------------------------------------------

/// Word count and estimated reading time of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingStats {
    pub words: usize,
    pub minutes: usize,
}

impl ReadingStats {
    /// Count whitespace-separated words; minutes are `max(1, round(words / wpm))`.
    pub fn from_text(text: &str, words_per_minute: usize) -> Self {
        let words = text.split_whitespace().count();
        let minutes = (words as f64 / words_per_minute.max(1) as f64).round() as usize;
        Self {
            words,
            minutes: minutes.max(1),
        }
    }

    /// e.g. `"1 234 слов"`, grouped with non-breaking spaces.
    pub fn word_count_label(&self) -> String {
        format!("{} слов", group_digits(self.words))
    }

    /// e.g. `"2 мин чтения"`.
    pub fn reading_time_label(&self) -> String {
        format!("{} мин чтения", self.minutes)
    }

    /// Write both labels into whichever display elements exist.
    pub fn render(&self, doc: &mut Document, word_count: Option<NodeId>, reading_time: Option<NodeId>) {
        if let Some(el) = word_count {
            doc.clear_children(el);
            doc.append_text(el, &self.word_count_label());
        }
        if let Some(el) = reading_time {
            doc.clear_children(el);
            doc.append_text(el, &self.reading_time_label());
        }
    }
}

/// Group digits in threes with U+00A0, as the ru-RU locale does.
fn group_digits(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 * 2);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('\u{a0}');
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Search hotkey
// ---------------------------------------------------------------------------

/// Host platform family, for the search hotkey modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Apple,
    Other,
}

impl Platform {
    /// Apple when the platform string contains `MAC` (case-insensitive).
    pub fn detect(platform: &str) -> Self {
        if platform.to_uppercase().contains("MAC") {
            Platform::Apple
        } else {
            Platform::Other
        }
    }
}

/// A key-down event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct KeyPress {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
}

#[cfg(test)]
impl KeyPress {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

/// Cmd+K on Apple platforms, Ctrl+K elsewhere.
pub fn is_search_hotkey(platform: Platform, key: &KeyPress) -> bool {
    let modifier = match platform {
        Platform::Apple => key.meta,
        Platform::Other => key.ctrl,
    };
    modifier && key.key.to_lowercase() == "k"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
