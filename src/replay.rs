//! Scripted page sessions.
//!
//! A script is a JSON array of steps replayed against an initialized
//! [`Page`]. Each step produces one report line describing what changed, so
//! scroll, layout, click, key, and search behaviour can be checked from the
//! command line without a browser.
//!
//! ```json
//! [
//!   {"layout": {"viewport": {"scroll_top": 0, "height": 900},
//!               "headings": [{"id": "intro", "rect": {"top": 120, "height": 32}}]}},
//!   {"scroll": {"scroll_top": 700, "scroll_height": 4000, "client_height": 900}},
//!   {"click": "toggleTheme"},
//!   {"key": {"key": "k", "ctrl": true}},
//!   {"search": "rust"},
//!   "teardown"
//! ]
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::chrome::{KeyPress, ScrollMetrics};
use crate::dom::{Document, NodeId};
use crate::error::{PaperError, Result};
use crate::events::{Effect, PageEvent};
use crate::page::Page;
use crate::toc::{HeadingLayout, HeadingLevel, Viewport};

/// One scripted interaction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Scroll(ScrollMetrics),
    Layout {
        viewport: Viewport,
        headings: Vec<HeadingLayout>,
    },
    /// Click the element with this `id`.
    Click(String),
    Key(KeyPress),
    /// Type into the search input.
    Search(String),
    Teardown,
}

pub fn load_script(path: &Path) -> Result<Vec<Step>> {
    let text = fs::read_to_string(path).map_err(|source| PaperError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| PaperError::Script {
        path: path.to_path_buf(),
        source,
    })
}

/// Summary lines for a freshly initialized page: listener counts and the
/// TOC outline, sub sections indented.
pub fn outline(page: &Page) -> Vec<String> {
    let subs = page.subscriptions();
    let passive = subs.iter().filter(|s| s.passive).count();
    let mut lines = vec![format!("listeners={} passive={passive}", subs.len())];
    if let Some(toc) = page.toc() {
        lines.push(format!("toc entries={} skipped={}", toc.len(), toc.skipped()));
        for entry in toc.entries() {
            let indent = match entry.level {
                HeadingLevel::Top => "  ",
                HeadingLevel::Sub => "    ",
            };
            lines.push(format!("{indent}#{} {}", entry.id, entry.text));
        }
    }
    lines
}

/// Apply `step` to `page` and describe the outcome.
pub fn run_step(page: &mut Page, step: &Step) -> String {
    match step {
        Step::Scroll(metrics) => {
            let effects = page.dispatch(&PageEvent::Scroll(*metrics));
            format!(
                "scroll top={} progress={:.3}{}",
                metrics.scroll_top,
                metrics.progress(),
                effect_list(page.document(), &effects)
            )
        }
        Step::Layout { viewport, headings } => {
            let effects = page.layout(headings, *viewport);
            let active = page
                .toc()
                .and_then(|toc| toc.active(page.document()))
                .unwrap_or("-");
            format!(
                "layout top={} active={active}{}",
                viewport.scroll_top,
                effect_list(page.document(), &effects)
            )
        }
        Step::Click(id) => {
            let Some(target) = page.document().element_by_id(id) else {
                return format!("click #{id} missing");
            };
            let effects = page.dispatch(&PageEvent::Click { target });
            let doc = page.document();
            let theme = doc.attr(doc.root(), "data-theme").unwrap_or("-");
            format!("click #{id} theme={theme}{}", effect_list(doc, &effects))
        }
        Step::Key(key) => {
            let effects = page.dispatch(&PageEvent::KeyDown(key.clone()));
            format!("key {}{}", key_label(key), effect_list(page.document(), &effects))
        }
        Step::Search(query) => {
            let effects = page.type_search(query);
            let doc = page.document();
            let first = page
                .marks()
                .first()
                .map(|&mark| format!(" first={}", doc.inner_html(mark)))
                .unwrap_or_default();
            format!(
                "search {query:?} marks={}{first}{}",
                page.marks().len(),
                effect_list(doc, &effects)
            )
        }
        Step::Teardown => {
            let before = page.subscriptions().len();
            page.teardown();
            format!("teardown removed={before} listeners={}", page.subscriptions().len())
        }
    }
}

fn key_label(key: &KeyPress) -> String {
    let mut label = String::new();
    if key.ctrl {
        label.push_str("ctrl+");
    }
    if key.meta {
        label.push_str("meta+");
    }
    label.push_str(&key.key);
    label
}

/// `#id` when the node carries one, else its tag.
fn node_label(doc: &Document, node: NodeId) -> String {
    match doc.attr(node, "id") {
        Some(id) => format!("#{id}"),
        None => doc.tag(node).unwrap_or("?").to_owned(),
    }
}

fn describe(doc: &Document, effect: &Effect) -> String {
    match effect {
        Effect::PreventDefault => "prevent-default".to_owned(),
        Effect::FocusAndSelect(node) => format!("focus({})", node_label(doc, *node)),
        Effect::ScrollIntoView { node, smooth, center } => format!(
            "scroll-into-view({} smooth={smooth} center={center})",
            node_label(doc, *node)
        ),
        Effect::ScrollTo { top, smooth } => format!("scroll-to({top} smooth={smooth})"),
    }
}

fn effect_list(doc: &Document, effects: &[Effect]) -> String {
    if effects.is_empty() {
        return String::new();
    }
    let items: Vec<String> = effects.iter().map(|e| describe(doc, e)).collect();
    format!(" effects=[{}]", items.join(", "))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
