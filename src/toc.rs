//! Table of contents: heading identifiers, anchor affordances, navigation
//! links, and active-section tracking.
//!
//! [`build_toc`] runs once per page. Afterwards a [`SectionObserver`] turns
//! heading geometry into intersection entries and [`Toc::apply_intersections`]
//! moves the single `is-active` flag between navigation links.

use serde::Deserialize;

use crate::dom::{Document, NodeId};
use crate::slug::SlugRegistry;

/// Class toggled on the navigation link of the current section.
pub const ACTIVE_CLASS: &str = "is-active";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Nesting of a heading within the article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingLevel {
    Top,
    Sub,
}

/// A heading recorded for the TOC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingEntry {
    /// Anchor identifier, unique within the page.
    pub id: String,
    /// Trimmed heading text, captured before the anchor affordance is added.
    pub text: String,
    pub level: HeadingLevel,
}

/// Tags that mark top-level and nested sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingTags {
    pub top: String,
    pub sub: String,
}

impl Default for HeadingTags {
    fn default() -> Self {
        Self {
            top: "h2".to_owned(),
            sub: "h3".to_owned(),
        }
    }
}

/// The generated table of contents for one page.
#[derive(Debug, Clone, Default)]
pub struct Toc {
    entries: Vec<HeadingEntry>,
    // Navigation links, parallel to `entries`.
    links: Vec<NodeId>,
    skipped: usize,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Heading elements under `content_root`, in document order.
pub fn collect_headings(doc: &Document, content_root: NodeId, tags: &HeadingTags) -> Vec<NodeId> {
    doc.elements_by_tag(content_root, &[tags.top.as_str(), tags.sub.as_str()])
}

/// Assign identifiers, add anchors, and render navigation links into `nav`.
///
/// Headings with empty text, or whose text slugs to nothing and which carry
/// no identifier of their own, are skipped entirely. Existing identifiers are
/// kept as-is. The previous contents of `nav` are replaced.
pub fn build_toc(doc: &mut Document, headings: &[NodeId], nav: NodeId, tags: &HeadingTags) -> Toc {
    let mut registry = SlugRegistry::new();
    for id in doc.ids() {
        registry.reserve(&id);
    }

    let mut toc = Toc::default();
    for &heading in headings {
        let text = doc.text_content(heading).trim().to_owned();
        if text.is_empty() {
            toc.skipped += 1;
            continue;
        }

        let id = match doc.attr(heading, "id").filter(|id| !id.is_empty()) {
            Some(existing) => existing.to_owned(),
            None => match registry.claim(&text) {
                Some(generated) => {
                    doc.set_attr(heading, "id", &generated);
                    generated
                }
                None => {
                    toc.skipped += 1;
                    continue;
                }
            },
        };

        let anchor = doc.create_element_with(
            "a",
            &[
                ("class", "anchor"),
                ("href", &format!("#{id}")),
                ("aria-label", "Ссылка на раздел"),
            ],
        );
        doc.append_text(anchor, "§");
        doc.append_child(heading, anchor);

        let level = if doc.tag(heading) == Some(tags.sub.as_str()) {
            HeadingLevel::Sub
        } else {
            HeadingLevel::Top
        };
        toc.entries.push(HeadingEntry { id, text, level });
    }

    doc.clear_children(nav);
    for entry in &toc.entries {
        let class = match entry.level {
            HeadingLevel::Top => "toc__item",
            HeadingLevel::Sub => "toc__item toc__item--sub",
        };
        let link = doc.create_element_with(
            "a",
            &[("class", class), ("href", &format!("#{}", entry.id))],
        );
        doc.append_text(link, &entry.text);
        doc.append_child(nav, link);
        toc.links.push(link);
    }

    log::info!(
        "[toc] entries={} skipped={}",
        toc.entries.len(),
        toc.skipped
    );
    toc
}

impl Toc {
    pub fn entries(&self) -> &[HeadingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of headings that were passed in but left out of the TOC.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Make the link for `id` the only active one.
    ///
    /// All links lose the flag first; when `id` matches no entry the TOC ends
    /// up with nothing active. Returns whether a link was activated.
    pub fn set_active(&self, doc: &mut Document, id: &str) -> bool {
        for &link in &self.links {
            doc.remove_class(link, ACTIVE_CLASS);
        }
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                doc.add_class(self.links[pos], ACTIVE_CLASS);
                true
            }
            None => false,
        }
    }

    /// Identifier of the currently active link, if any.
    pub fn active(&self, doc: &Document) -> Option<&str> {
        self.links
            .iter()
            .position(|&link| doc.has_class(link, ACTIVE_CLASS))
            .map(|pos| self.entries[pos].id.as_str())
    }

    /// Apply a batch of intersection entries in order.
    ///
    /// Every entry whose heading is intersecting re-targets the active flag,
    /// so the last qualifying entry of the batch wins.
    pub fn apply_intersections(&self, doc: &mut Document, entries: &[IntersectionEntry]) {
        for entry in entries.iter().filter(|e| e.is_intersecting) {
            self.set_active(doc, &entry.target);
        }
    }
}

// ---------------------------------------------------------------------------
// Active-section tracking
// ---------------------------------------------------------------------------

/// Vertical extent of an element in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub height: f64,
}

/// Visible window onto the document.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Viewport {
    pub scroll_top: f64,
    pub height: f64,
}

/// Geometry of one observed heading.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeadingLayout {
    pub id: String,
    pub rect: Rect,
}

/// Notification that a heading entered or left the observation band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntersectionEntry {
    pub target: String,
    pub is_intersecting: bool,
}

/// Intersection model for heading visibility.
///
/// The observation band is the top `band_fraction` of the viewport. A
/// heading intersects once at least `threshold` of its own height lies inside
/// the band. Like a browser observer, the first observation reports every
/// heading and later ones report only state changes.
#[derive(Debug, Clone)]
pub struct SectionObserver {
    band_fraction: f64,
    threshold: f64,
    states: Vec<(String, bool)>,
}

impl SectionObserver {
    pub fn new(band_fraction: f64, threshold: f64) -> Self {
        Self {
            band_fraction,
            threshold,
            states: Vec::new(),
        }
    }

    /// Whether `rect` counts as visible inside the band of `viewport`.
    pub fn intersects(&self, rect: Rect, viewport: Viewport) -> bool {
        let band_top = viewport.scroll_top;
        let band_bottom = viewport.scroll_top + viewport.height * self.band_fraction;
        if rect.height <= 0.0 {
            return rect.top >= band_top && rect.top <= band_bottom;
        }
        let overlap = (rect.top + rect.height).min(band_bottom) - rect.top.max(band_top);
        overlap > 0.0 && overlap / rect.height >= self.threshold
    }

    /// Observe `layout` at `viewport` and return entries for changed headings,
    /// in the order given.
    pub fn observe(&mut self, layout: &[HeadingLayout], viewport: Viewport) -> Vec<IntersectionEntry> {
        let mut changed = Vec::new();
        for heading in layout {
            let now = self.intersects(heading.rect, viewport);
            let previous = self
                .states
                .iter_mut()
                .find(|(id, _)| *id == heading.id);
            let report = match previous {
                Some((_, state)) if *state == now => false,
                Some((_, state)) => {
                    *state = now;
                    true
                }
                None => {
                    self.states.push((heading.id.clone(), now));
                    true
                }
            };
            if report {
                changed.push(IntersectionEntry {
                    target: heading.id.clone(),
                    is_intersecting: now,
                });
            }
        }
        changed
    }

    /// Forget all recorded states.
    pub fn disconnect(&mut self) {
        self.states.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        doc: Document,
        article: NodeId,
        nav: NodeId,
    }

    fn fixture(headings: &[(&str, &str)]) -> Fixture {
        let mut doc = Document::new("body");
        let article = doc.create_element("article");
        let nav = doc.create_element_with("nav", &[("id", "tocNav")]);
        doc.append_child(doc.root(), nav);
        doc.append_child(doc.root(), article);
        for (tag, text) in headings {
            let h = doc.create_element(tag);
            doc.append_text(h, text);
            doc.append_child(article, h);
            let p = doc.create_element("p");
            doc.append_text(p, "body text");
            doc.append_child(article, p);
        }
        Fixture { doc, article, nav }
    }

    fn build(f: &mut Fixture) -> Toc {
        let tags = HeadingTags::default();
        let headings = collect_headings(&f.doc, f.article, &tags);
        build_toc(&mut f.doc, &headings, f.nav, &tags)
    }

    #[test]
    fn entries_follow_document_order_with_levels() {
        let mut f = fixture(&[("h2", "Intro"), ("h3", "Details"), ("h2", "Outro")]);
        let toc = build(&mut f);
        let ids: Vec<_> = toc.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["intro", "details", "outro"]);
        assert_eq!(toc.entries()[1].level, HeadingLevel::Sub);
        assert_eq!(toc.entries()[0].level, HeadingLevel::Top);
        assert_eq!(f.doc.children(f.nav).len(), toc.len());
    }

    #[test]
    fn nav_links_render_with_sub_class() {
        let mut f = fixture(&[("h2", "Intro"), ("h3", "Details")]);
        build(&mut f);
        assert_eq!(
            f.doc.inner_html(f.nav),
            "<a class=\"toc__item\" href=\"#intro\">Intro</a>\
<a class=\"toc__item toc__item--sub\" href=\"#details\">Details</a>"
        );
    }

    #[test]
    fn headings_receive_ids_and_anchor_affordance() {
        let mut f = fixture(&[("h2", "Hello, World! 123")]);
        let toc = build(&mut f);
        let h = collect_headings(&f.doc, f.article, &HeadingTags::default())[0];
        assert_eq!(f.doc.attr(h, "id"), Some("hello-world-123"));
        assert!(f.doc.outer_html(h).ends_with(
            "<a class=\"anchor\" href=\"#hello-world-123\" aria-label=\"Ссылка на раздел\">§</a></h2>"
        ));
        // Entry text is captured before the anchor is appended.
        assert_eq!(toc.entries()[0].text, "Hello, World! 123");
    }

    #[test]
    fn empty_headings_are_skipped() {
        let mut f = fixture(&[("h2", "   "), ("h2", "Real"), ("h3", "")]);
        let toc = build(&mut f);
        assert_eq!(toc.len(), 1);
        assert_eq!(toc.skipped(), 2);
        let blank = collect_headings(&f.doc, f.article, &HeadingTags::default())[0];
        assert_eq!(f.doc.attr(blank, "id"), None);
        assert!(f.doc.children(blank).len() == 1, "no anchor on skipped heading");
    }

    #[test]
    fn symbol_only_heading_without_id_is_skipped() {
        let mut f = fixture(&[("h2", "???"), ("h2", "Next")]);
        let toc = build(&mut f);
        assert_eq!(toc.len(), 1);
        assert_eq!(toc.entries()[0].id, "next");
    }

    #[test]
    fn existing_identifier_is_preserved() {
        let mut f = fixture(&[("h2", "Intro"), ("h2", "Intro")]);
        let first = collect_headings(&f.doc, f.article, &HeadingTags::default())[0];
        f.doc.set_attr(first, "id", "custom");
        let toc = build(&mut f);
        assert_eq!(toc.entries()[0].id, "custom");
        assert_eq!(toc.entries()[1].id, "intro");
    }

    #[test]
    fn duplicate_texts_get_suffixed_identifiers() {
        let mut f = fixture(&[("h2", "Setup"), ("h3", "Setup"), ("h2", "Setup")]);
        let toc = build(&mut f);
        let ids: Vec<_> = toc.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["setup", "setup-1", "setup-2"]);
    }

    #[test]
    fn generated_id_does_not_shadow_existing_page_id() {
        let mut f = fixture(&[("h2", "tocNav")]);
        let toc = build(&mut f);
        assert_eq!(toc.entries()[0].id, "tocnav");
        let mut g = fixture(&[("h2", "toc nav")]);
        g.doc.set_attr(g.nav, "id", "toc-nav");
        let toc = build(&mut g);
        assert_eq!(toc.entries()[0].id, "toc-nav-1");
    }

    #[test]
    fn rebuilding_replaces_previous_links() {
        let mut f = fixture(&[("h2", "One")]);
        let stale = f.doc.create_element("span");
        f.doc.append_child(f.nav, stale);
        build(&mut f);
        assert_eq!(f.doc.children(f.nav).len(), 1);
    }

    #[test]
    fn only_one_link_is_active() {
        let mut f = fixture(&[("h2", "A"), ("h2", "B"), ("h2", "C")]);
        let toc = build(&mut f);
        assert!(toc.set_active(&mut f.doc, "b"));
        assert!(toc.set_active(&mut f.doc, "c"));
        let active: Vec<_> = f
            .doc
            .children(f.nav)
            .iter()
            .filter(|&&l| f.doc.has_class(l, ACTIVE_CLASS))
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(toc.active(&f.doc), Some("c"));
    }

    #[test]
    fn last_intersecting_entry_wins() {
        let mut f = fixture(&[("h2", "A"), ("h2", "B"), ("h2", "C")]);
        let toc = build(&mut f);
        let entries = vec![
            IntersectionEntry { target: "c".into(), is_intersecting: true },
            IntersectionEntry { target: "a".into(), is_intersecting: true },
            IntersectionEntry { target: "b".into(), is_intersecting: false },
        ];
        toc.apply_intersections(&mut f.doc, &entries);
        assert_eq!(toc.active(&f.doc), Some("a"));
    }

    #[test]
    fn leaving_entries_do_not_clear_active() {
        let mut f = fixture(&[("h2", "A"), ("h2", "B")]);
        let toc = build(&mut f);
        toc.set_active(&mut f.doc, "a");
        toc.apply_intersections(
            &mut f.doc,
            &[IntersectionEntry { target: "a".into(), is_intersecting: false }],
        );
        assert_eq!(toc.active(&f.doc), Some("a"));
    }

    fn layout() -> Vec<HeadingLayout> {
        vec![
            HeadingLayout { id: "a".into(), rect: Rect { top: 100.0, height: 40.0 } },
            HeadingLayout { id: "b".into(), rect: Rect { top: 900.0, height: 40.0 } },
            HeadingLayout { id: "c".into(), rect: Rect { top: 1800.0, height: 40.0 } },
        ]
    }

    #[test]
    fn band_covers_top_thirty_percent_of_viewport() {
        let obs = SectionObserver::new(0.30, 0.1);
        let vp = Viewport { scroll_top: 0.0, height: 1000.0 };
        assert!(obs.intersects(Rect { top: 100.0, height: 40.0 }, vp));
        assert!(obs.intersects(Rect { top: 290.0, height: 40.0 }, vp));
        // Only 3 of 40 units inside the band: below the 10% threshold.
        assert!(!obs.intersects(Rect { top: 297.0, height: 40.0 }, vp));
        assert!(!obs.intersects(Rect { top: 500.0, height: 40.0 }, vp));
    }

    #[test]
    fn first_observation_reports_every_heading() {
        let mut obs = SectionObserver::new(0.30, 0.1);
        let entries = obs.observe(&layout(), Viewport { scroll_top: 0.0, height: 1000.0 });
        assert_eq!(
            entries,
            vec![
                IntersectionEntry { target: "a".into(), is_intersecting: true },
                IntersectionEntry { target: "b".into(), is_intersecting: false },
                IntersectionEntry { target: "c".into(), is_intersecting: false },
            ]
        );
    }

    #[test]
    fn later_observations_report_only_changes() {
        let mut obs = SectionObserver::new(0.30, 0.1);
        obs.observe(&layout(), Viewport { scroll_top: 0.0, height: 1000.0 });
        assert!(obs
            .observe(&layout(), Viewport { scroll_top: 10.0, height: 1000.0 })
            .is_empty());
        let entries = obs.observe(&layout(), Viewport { scroll_top: 800.0, height: 1000.0 });
        assert_eq!(
            entries,
            vec![
                IntersectionEntry { target: "a".into(), is_intersecting: false },
                IntersectionEntry { target: "b".into(), is_intersecting: true },
            ]
        );
        obs.disconnect();
        assert_eq!(
            obs.observe(&layout(), Viewport { scroll_top: 800.0, height: 1000.0 }).len(),
            3
        );
    }
}
