//! Page initialization context and event dispatch.
//!
//! A [`Page`] owns the document tree, explicit references to the elements
//! its controllers drive, and the subscriptions wiring events to those
//! controllers. Every element reference is optional; a missing element only
//! means the matching behaviour is never subscribed.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chrome::{is_search_hotkey, Platform, ReadingStats, ScrollMetrics, ScrollProgress, ThemeController};
use crate::dom::{Document, NodeId};
use crate::error::{PaperError, Result};
use crate::events::{Effect, EventKind, Listener, PageEvent, SubscriptionId, Subscriptions};
use crate::search::{SearchHighlighter, SearchOutcome};
use crate::storage::PreferenceStore;
use crate::toc::{build_toc, collect_headings, HeadingLayout, HeadingTags, SectionObserver, Toc, Viewport};

// ---------------------------------------------------------------------------
// Settings and context
// ---------------------------------------------------------------------------

/// Tunables for the page controllers. Missing fields in a settings file fall
/// back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Tag of top-level section headings.
    pub top_heading: String,
    /// Tag of nested section headings.
    pub sub_heading: String,
    pub words_per_minute: usize,
    /// Scroll offset above which the back-to-top control shows.
    pub back_to_top_threshold: f64,
    /// Fraction of the viewport, from the top, in which a heading becomes active.
    pub active_band: f64,
    /// Fraction of a heading's height that must lie inside the band.
    pub intersection_threshold: f64,
    /// Preference key of the stored theme.
    pub theme_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            top_heading: "h2".to_owned(),
            sub_heading: "h3".to_owned(),
            words_per_minute: 200,
            back_to_top_threshold: 600.0,
            active_band: 0.30,
            intersection_threshold: 0.1,
            theme_key: "docs-theme".to_owned(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PaperError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| PaperError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn heading_tags(&self) -> HeadingTags {
        HeadingTags {
            top: self.top_heading.clone(),
            sub: self.sub_heading.clone(),
        }
    }
}

/// Everything a page needs from its environment.
pub struct PageContext {
    pub settings: Settings,
    pub store: Box<dyn PreferenceStore + Send>,
    pub platform: Platform,
}

/// Explicit references to the elements the controllers act on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageElements {
    /// Article root holding the headings and searchable text.
    pub content: Option<NodeId>,
    pub toc_nav: Option<NodeId>,
    pub search_input: Option<NodeId>,
    pub progress_bar: Option<NodeId>,
    pub back_to_top: Option<NodeId>,
    pub word_count: Option<NodeId>,
    pub reading_time: Option<NodeId>,
    pub theme_toggle: Option<NodeId>,
}

impl PageElements {
    /// Look up the controlled elements by their well-known ids. The content
    /// root is the first element carrying `content_class`.
    pub fn locate(doc: &Document, content_class: &str) -> Self {
        Self {
            content: doc.elements_by_class(doc.root(), content_class).first().copied(),
            toc_nav: doc.element_by_id("tocNav"),
            search_input: doc.element_by_id("searchInput"),
            progress_bar: doc.element_by_id("progressBar"),
            back_to_top: doc.element_by_id("backToTop"),
            word_count: doc.element_by_id("wordCount"),
            reading_time: doc.element_by_id("readingTime"),
            theme_toggle: doc.element_by_id("toggleTheme"),
        }
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

pub struct Page {
    doc: Document,
    elements: PageElements,
    ctx: PageContext,
    theme: ThemeController,
    progress: ScrollProgress,
    highlighter: SearchHighlighter,
    observer: SectionObserver,
    toc: Option<Toc>,
    stats: Option<ReadingStats>,
    subscriptions: Subscriptions,
}

impl Page {
    pub fn new(doc: Document, elements: PageElements, ctx: PageContext) -> Self {
        let s = &ctx.settings;
        Self {
            theme: ThemeController::new(&s.theme_key),
            progress: ScrollProgress::new(
                elements.progress_bar,
                elements.back_to_top,
                s.back_to_top_threshold,
            ),
            observer: SectionObserver::new(s.active_band, s.intersection_threshold),
            highlighter: SearchHighlighter::new(),
            toc: None,
            stats: None,
            subscriptions: Subscriptions::new(),
            doc,
            elements,
            ctx,
        }
    }

    /// Run the load-time work and subscribe listeners.
    ///
    /// Restores the stored theme, builds the TOC, renders reading stats, and
    /// applies the initial scroll progress.
    pub fn init(&mut self) -> Vec<Effect> {
        self.theme.restore(&mut self.doc, &*self.ctx.store);

        if let (Some(content), Some(nav)) = (self.elements.content, self.elements.toc_nav) {
            let tags = self.ctx.settings.heading_tags();
            let headings = collect_headings(&self.doc, content, &tags);
            self.toc = Some(build_toc(&mut self.doc, &headings, nav, &tags));
        }

        if let Some(content) = self.elements.content {
            let stats = ReadingStats::from_text(
                &self.doc.text_content(content),
                self.ctx.settings.words_per_minute,
            );
            stats.render(&mut self.doc, self.elements.word_count, self.elements.reading_time);
            self.stats = Some(stats);
        }

        self.subscribe_all();
        self.dispatch(&PageEvent::Load)
    }

    fn subscribe_all(&mut self) {
        let el = self.elements;
        let subs = &mut self.subscriptions;
        subs.clear();
        subs.subscribe(EventKind::Load, Listener::ScrollProgress, None, true);
        subs.subscribe(EventKind::Scroll, Listener::ScrollProgress, None, true);
        if let Some(button) = el.back_to_top {
            subs.subscribe(EventKind::Click, Listener::BackToTop, Some(button), false);
        }
        if let Some(button) = el.theme_toggle {
            subs.subscribe(EventKind::Click, Listener::ThemeToggle, Some(button), false);
        }
        if let Some(input) = el.search_input {
            subs.subscribe(EventKind::KeyDown, Listener::SearchHotkey, None, false);
            if el.content.is_some() {
                subs.subscribe(EventKind::Input, Listener::SearchInput, Some(input), false);
            }
        }
        if self.toc.is_some() {
            subs.subscribe(EventKind::Intersection, Listener::ActiveSection, None, true);
        }
        log::debug!("[page] subscriptions={}", subs.len());
    }

    /// Route `event` to its live subscriptions and collect host effects.
    ///
    /// A passive subscription never yields [`Effect::PreventDefault`].
    pub fn dispatch(&mut self, event: &PageEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        for sub in self.subscriptions.matching(event) {
            let mut produced = Vec::new();
            match (sub.listener, event) {
                (Listener::ScrollProgress, PageEvent::Load) => {
                    self.progress.update(&mut self.doc, ScrollMetrics::default());
                }
                (Listener::ScrollProgress, PageEvent::Scroll(metrics)) => {
                    self.progress.update(&mut self.doc, *metrics);
                }
                (Listener::BackToTop, PageEvent::Click { .. }) => {
                    produced.push(Effect::ScrollTo {
                        top: 0.0,
                        smooth: true,
                    });
                }
                (Listener::ThemeToggle, PageEvent::Click { .. }) => {
                    let theme = self.theme.toggle(&mut self.doc, self.ctx.store.as_mut());
                    log::debug!("[theme] toggled to {theme}");
                }
                (Listener::SearchInput, PageEvent::Input { value, .. }) => {
                    let outcome = self.apply_query(value.trim());
                    log::debug!("[search] query={:?} marks={}", value.trim(), outcome.marks);
                    if let Some(node) = outcome.scroll_to {
                        produced.push(Effect::ScrollIntoView {
                            node,
                            smooth: true,
                            center: true,
                        });
                    }
                }
                (Listener::SearchHotkey, PageEvent::KeyDown(key)) => {
                    if is_search_hotkey(self.ctx.platform, key) {
                        produced.push(Effect::PreventDefault);
                        if let Some(input) = self.elements.search_input {
                            produced.push(Effect::FocusAndSelect(input));
                        }
                    }
                }
                (Listener::ActiveSection, PageEvent::Intersection(entries)) => {
                    if let Some(toc) = &self.toc {
                        toc.apply_intersections(&mut self.doc, entries);
                    }
                }
                _ => {}
            }
            if sub.passive {
                produced.retain(|e| *e != Effect::PreventDefault);
            }
            effects.extend(produced);
        }
        effects
    }

    /// Feed heading geometry to the section observer and dispatch any
    /// resulting intersection entries.
    pub fn layout(&mut self, layout: &[HeadingLayout], viewport: Viewport) -> Vec<Effect> {
        let entries = self.observer.observe(layout, viewport);
        if entries.is_empty() {
            return Vec::new();
        }
        self.dispatch(&PageEvent::Intersection(entries))
    }

    /// Highlight `query` in the content root. Absent content yields no marks.
    pub fn apply_query(&mut self, query: &str) -> SearchOutcome {
        match self.elements.content {
            Some(content) => self.highlighter.apply_query(&mut self.doc, content, query),
            None => SearchOutcome {
                marks: 0,
                scroll_to: None,
            },
        }
    }

    /// Type `value` into the search input, as a user would.
    pub fn type_search(&mut self, value: &str) -> Vec<Effect> {
        let Some(input) = self.elements.search_input else {
            return Vec::new();
        };
        if value.is_empty() {
            self.doc.remove_attr(input, "value");
        } else {
            self.doc.set_attr(input, "value", value);
        }
        self.dispatch(&PageEvent::Input {
            target: input,
            value: value.to_owned(),
        })
    }

    /// Drop every subscription and stop observing headings.
    pub fn teardown(&mut self) {
        let ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|s| s.id).collect();
        for id in ids {
            self.subscriptions.unsubscribe(id);
        }
        debug_assert!(self.subscriptions.is_empty());
        self.observer.disconnect();
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    #[cfg(test)]
    pub fn elements(&self) -> &PageElements {
        &self.elements
    }

    pub fn toc(&self) -> Option<&Toc> {
        self.toc.as_ref()
    }

    pub fn stats(&self) -> Option<ReadingStats> {
        self.stats
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Markers of the currently applied query, in document order.
    pub fn marks(&self) -> &[NodeId] {
        self.highlighter.marks()
    }

    pub fn to_html(&self) -> String {
        self.doc.to_html()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chrome::KeyPress;
    use crate::storage::MemoryStore;
    use crate::toc::Rect;

    fn context(store: MemoryStore, platform: Platform) -> PageContext {
        PageContext {
            settings: Settings::default(),
            store: Box::new(store),
            platform,
        }
    }

    /// Full page: every optional element present.
    fn full_page(store: MemoryStore, platform: Platform) -> Page {
        let mut doc = Document::new("html");
        let root = doc.root();
        let mut el = PageElements::default();
        for (slot, tag) in [
            (&mut el.progress_bar, "div"),
            (&mut el.search_input, "input"),
            (&mut el.word_count, "span"),
            (&mut el.reading_time, "span"),
            (&mut el.theme_toggle, "button"),
            (&mut el.toc_nav, "nav"),
            (&mut el.back_to_top, "button"),
        ] {
            let node = doc.create_element(tag);
            doc.append_child(root, node);
            *slot = Some(node);
        }
        let article = doc.create_element("article");
        doc.append_child(root, article);
        for (tag, text) in [
            ("h2", "Rust basics"),
            ("p", "Rust is fast. RUST is safe."),
            ("h3", "Ownership"),
            ("p", "Every value has an owner."),
            ("h2", "Next steps"),
        ] {
            let node = doc.create_element(tag);
            doc.append_text(node, text);
            doc.append_child(article, node);
            doc.append_text(article, "\n");
        }
        el.content = Some(article);
        Page::new(doc, el, context(store, platform))
    }

    #[test]
    fn init_builds_toc_and_stats() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        let effects = page.init();
        assert!(effects.is_empty());
        let toc = page.toc().unwrap();
        let ids: Vec<_> = toc.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["rust-basics", "ownership", "next-steps"]);
        let stats = page.stats().unwrap();
        assert_eq!(stats.minutes, 1);
        let wc = page.elements().word_count.unwrap();
        assert_eq!(page.document().text_content(wc), format!("{} слов", stats.words));
        let bar = page.elements().progress_bar.unwrap();
        assert_eq!(page.document().attr(bar, "style"), Some("transform: scaleX(0)"));
    }

    #[test]
    fn init_restores_stored_theme() {
        let mut store = MemoryStore::new();
        store.set("docs-theme", "dark").unwrap();
        let mut page = full_page(store, Platform::Other);
        page.init();
        let doc = page.document();
        assert_eq!(doc.attr(doc.root(), "data-theme"), Some("dark"));
    }

    #[test]
    fn theme_toggle_click_flips_theme() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        page.init();
        let toggle = page.elements().theme_toggle.unwrap();
        page.dispatch(&PageEvent::Click { target: toggle });
        let root = page.document().root();
        assert_eq!(page.document().attr(root, "data-theme"), Some("dark"));
        page.dispatch(&PageEvent::Click { target: toggle });
        assert_eq!(page.document().attr(root, "data-theme"), Some("light"));
    }

    #[test]
    fn back_to_top_click_requests_smooth_scroll() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        page.init();
        let button = page.elements().back_to_top.unwrap();
        assert_eq!(
            page.dispatch(&PageEvent::Click { target: button }),
            vec![Effect::ScrollTo { top: 0.0, smooth: true }]
        );
    }

    #[test]
    fn scroll_event_updates_progress() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        page.init();
        page.dispatch(&PageEvent::Scroll(ScrollMetrics {
            scroll_top: 1000.0,
            scroll_height: 3000.0,
            client_height: 1000.0,
        }));
        let doc = page.document();
        let bar = page.elements().progress_bar.unwrap();
        let top = page.elements().back_to_top.unwrap();
        assert_eq!(doc.attr(bar, "style"), Some("transform: scaleX(0.5)"));
        assert_eq!(doc.attr(top, "style"), Some("opacity: 1; pointer-events: auto"));
    }

    #[test]
    fn search_input_highlights_and_scrolls_to_first_mark() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        page.init();
        let effects = page.type_search("  rust ");
        assert_eq!(page.marks().len(), 3, "heading text counts too");
        let first = page.marks()[0];
        assert_eq!(
            effects,
            vec![Effect::ScrollIntoView { node: first, smooth: true, center: true }]
        );
        let input = page.elements().search_input.unwrap();
        assert_eq!(page.document().attr(input, "value"), Some("  rust "));
        assert!(page.type_search("").is_empty());
        assert!(page.marks().is_empty());
        assert_eq!(page.document().attr(input, "value"), None);
    }

    #[test]
    fn locate_finds_elements_by_id_and_content_class() {
        let mut doc = Document::new("html");
        let root = doc.root();
        let nav = doc.create_element_with("nav", &[("id", "tocNav")]);
        doc.append_child(root, nav);
        let input = doc.create_element_with("input", &[("id", "searchInput")]);
        doc.append_child(root, input);
        let article = doc.create_element_with("article", &[("class", "paper wide")]);
        doc.append_child(root, article);

        let el = PageElements::locate(&doc, "paper");
        assert_eq!(el.toc_nav, Some(nav));
        assert_eq!(el.search_input, Some(input));
        assert_eq!(el.content, Some(article));
        assert_eq!(el.progress_bar, None);
        assert_eq!(el.theme_toggle, None);
    }

    #[test]
    fn hotkey_focuses_search_on_apple_with_meta() {
        let mut page = full_page(MemoryStore::new(), Platform::Apple);
        page.init();
        let input = page.elements().search_input.unwrap();
        assert_eq!(
            page.dispatch(&PageEvent::KeyDown(KeyPress::new("k").with_meta())),
            vec![Effect::PreventDefault, Effect::FocusAndSelect(input)]
        );
        assert!(page
            .dispatch(&PageEvent::KeyDown(KeyPress::new("k").with_ctrl()))
            .is_empty());
    }

    #[test]
    fn layout_moves_active_link() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        page.init();
        let layout = vec![
            HeadingLayout { id: "rust-basics".into(), rect: Rect { top: 50.0, height: 30.0 } },
            HeadingLayout { id: "ownership".into(), rect: Rect { top: 700.0, height: 30.0 } },
            HeadingLayout { id: "next-steps".into(), rect: Rect { top: 1500.0, height: 30.0 } },
        ];
        page.layout(&layout, Viewport { scroll_top: 0.0, height: 1000.0 });
        assert_eq!(page.toc().unwrap().active(page.document()), Some("rust-basics"));
        page.layout(&layout, Viewport { scroll_top: 650.0, height: 1000.0 });
        assert_eq!(page.toc().unwrap().active(page.document()), Some("ownership"));
        // Scrolling back slightly keeps the last activated section.
        page.layout(&layout, Viewport { scroll_top: 400.0, height: 1000.0 });
        assert_eq!(page.toc().unwrap().active(page.document()), Some("ownership"));
    }

    #[test]
    fn teardown_unsubscribes_everything() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        page.init();
        assert!(!page.subscriptions().is_empty());
        page.teardown();
        assert!(page.subscriptions().is_empty());
        let toggle = page.elements().theme_toggle.unwrap();
        page.dispatch(&PageEvent::Click { target: toggle });
        let doc = page.document();
        assert_eq!(doc.attr(doc.root(), "data-theme"), None);
    }

    #[test]
    fn init_twice_keeps_one_set_of_listeners() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        page.init();
        page.init();
        assert_eq!(page.subscriptions().len(), 7);
        let passive: Vec<_> = page
            .subscriptions()
            .iter()
            .filter(|s| s.passive)
            .map(|s| s.kind)
            .collect();
        assert_eq!(passive, [EventKind::Load, EventKind::Scroll, EventKind::Intersection]);
    }

    #[test]
    fn passive_listener_cannot_prevent_default() {
        let mut page = full_page(MemoryStore::new(), Platform::Other);
        page.init();
        let input = page.elements().search_input.unwrap();
        page.subscriptions.clear();
        page.subscriptions
            .subscribe(EventKind::KeyDown, Listener::SearchHotkey, None, true);
        let effects = page.dispatch(&PageEvent::KeyDown(KeyPress::new("k").with_ctrl()));
        assert_eq!(effects, [Effect::FocusAndSelect(input)]);
    }

    #[test]
    fn missing_elements_degrade_silently() {
        let doc = Document::new("html");
        let mut page = Page::new(doc, PageElements::default(), context(MemoryStore::new(), Platform::Other));
        assert!(page.init().is_empty());
        assert!(page.toc().is_none());
        assert!(page.stats().is_none());
        assert_eq!(page.apply_query("anything").marks, 0);
        assert!(page.type_search("x").is_empty());
        let kinds: Vec<_> = page.subscriptions().iter().map(|s| s.listener).collect();
        assert_eq!(kinds, [Listener::ScrollProgress, Listener::ScrollProgress]);
    }

    #[test]
    fn settings_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "words_per_minute": 250, "sub_heading": "h4" }"#).unwrap();
        let s = Settings::load(&path).unwrap();
        assert_eq!(s.words_per_minute, 250);
        assert_eq!(s.sub_heading, "h4");
        assert_eq!(s.top_heading, "h2");
        assert_eq!(s.theme_key, "docs-theme");
    }

    #[test]
    fn settings_file_with_bad_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "words_per_minute = 250").unwrap();
        assert!(matches!(Settings::load(&path), Err(PaperError::Settings { .. })));
    }
}
