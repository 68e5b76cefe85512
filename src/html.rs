//! Markdown → page document.
//!
//! Parses markdown with comrak (GFM extensions), converts the AST directly
//! into a [`Document`] tree, and wraps it in the page shell: progress bar,
//! top bar with search and reading stats, TOC sidebar, and article. The
//! resulting [`PageElements`] are handed to [`Page`] so the controllers never
//! look elements up by selector.

use std::path::{Path, PathBuf};

use comrak::{
    nodes::{AstNode, ListType, NodeValue, TableAlignment},
    parse_document, Arena, Options,
};

use crate::chrome::Platform;
use crate::dom::{Document, NodeId};
use crate::page::{Page, PageContext, PageElements};
use crate::web_assets;

/// Class of the article element holding the rendered markdown.
pub const CONTENT_CLASS: &str = "paper";

/// Tags after which a line break is emitted, mirroring comrak's own HTML
/// output so that text content keeps block boundaries as whitespace.
const BLOCK_TAGS: [&str; 18] = [
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "blockquote", "pre", "hr",
    "table", "thead", "tbody", "tr", "div",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Markdown converted to a detached document fragment.
pub struct RenderedMarkdown {
    pub doc: Document,
    /// `<article class="paper">` holding the converted blocks.
    pub content: NodeId,
    /// Text of the first level-1 heading, if any.
    pub title: Option<String>,
}

/// Paths used to resolve and rewrite local links.
pub struct SourceLocation<'a> {
    /// Absolute path of the markdown file.
    pub file_path: &'a Path,
    /// Root of the served tree; local links become root-relative to it.
    pub serve_root: &'a Path,
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Build comrak parse options with GFM extensions.
///
/// Raw HTML in the source is never passed through: the converter turns
/// `HtmlBlock`/`HtmlInline` nodes into `<!-- raw HTML omitted -->` comments.
fn make_options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.extension.front_matter_delimiter = Some("---".to_owned());
    options
}

/// Returns true when a fenced code block info string denotes Mermaid.
///
/// Matching is case-insensitive on the first whitespace-delimited token.
fn is_mermaid_info(info: &str) -> bool {
    info.split_whitespace()
        .next()
        .map(|lang| lang.eq_ignore_ascii_case("mermaid"))
        .unwrap_or(false)
}

/// Split a URL into its base path and trailing suffix (query string and/or fragment).
fn split_url_suffix(url: &str) -> (&str, &str) {
    match url.find(['?', '#']) {
        Some(pos) => (&url[..pos], &url[pos..]),
        None => (url, ""),
    }
}

/// Resolve a relative URL path against `file_dir`.
///
/// `""` and `"."` components are ignored and `".."` pops (clamped at the
/// filesystem root).
fn resolve_relative_path(file_dir: &Path, rel: &str) -> PathBuf {
    let mut resolved = file_dir.to_path_buf();
    for component in rel.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            part => resolved.push(part),
        }
    }
    resolved
}

/// Rewrite a local relative link to a root-relative href.
///
/// Returns `None` for external, absolute, and fragment-only URLs, and for
/// paths that resolve outside `serve_root`; those are left untouched.
fn rewrite_url(url: &str, file_dir: &Path, serve_root: &Path) -> Option<String> {
    if url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("//")
        || url.starts_with("mailto:")
        || url.starts_with('#')
        || url.starts_with('/')
    {
        return None;
    }
    let (base, suffix) = split_url_suffix(url);
    if base.is_empty() {
        return None;
    }
    let resolved = resolve_relative_path(file_dir, base);
    let rel = resolved.strip_prefix(serve_root).ok()?;
    Some(format!("/{}{}", rel.to_string_lossy(), suffix))
}

/// Plain text of an AST subtree (used for image alt text and the title).
fn collect_text<'a>(node: &'a AstNode<'a>) -> String {
    let mut text = String::new();
    for child in node.children() {
        match &child.data.borrow().value {
            NodeValue::Text(s) => text.push_str(s),
            NodeValue::Code(c) => text.push_str(&c.literal),
            NodeValue::SoftBreak | NodeValue::LineBreak => text.push(' '),
            _ => text.push_str(&collect_text(child)),
        }
    }
    text
}

fn alignment_attr(alignment: Option<&TableAlignment>) -> Option<&'static str> {
    match alignment {
        Some(TableAlignment::Left) => Some("left"),
        Some(TableAlignment::Center) => Some("center"),
        Some(TableAlignment::Right) => Some("right"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// AST conversion
// ---------------------------------------------------------------------------

/// Walks a comrak AST and appends equivalent nodes to a [`Document`].
struct Converter<'p> {
    file_dir: &'p Path,
    serve_root: &'p Path,
    links_rewritten: usize,
    links_skipped: usize,
    mermaid_blocks: usize,
}

impl<'p> Converter<'p> {
    fn new(location: &SourceLocation<'p>) -> Self {
        Self {
            file_dir: location.file_path.parent().unwrap_or(Path::new("")),
            serve_root: location.serve_root,
            links_rewritten: 0,
            links_skipped: 0,
            mermaid_blocks: 0,
        }
    }

    fn convert_children<'a>(&mut self, doc: &mut Document, parent: NodeId, node: &'a AstNode<'a>) {
        for child in node.children() {
            self.convert(doc, parent, child);
        }
    }

    /// Append `tag` to `parent`, convert `node`'s children into it, and add
    /// the trailing line break for block elements.
    fn element<'a>(&mut self, doc: &mut Document, parent: NodeId, tag: &str, node: &'a AstNode<'a>) -> NodeId {
        let el = doc.create_element(tag);
        doc.append_child(parent, el);
        self.convert_children(doc, el, node);
        if BLOCK_TAGS.contains(&tag) {
            doc.append_text(parent, "\n");
        }
        el
    }

    fn link_target(&mut self, url: &str) -> String {
        match rewrite_url(url, self.file_dir, self.serve_root) {
            Some(rewritten) => {
                self.links_rewritten += 1;
                rewritten
            }
            None => {
                self.links_skipped += 1;
                url.to_owned()
            }
        }
    }

    fn convert<'a>(&mut self, doc: &mut Document, parent: NodeId, node: &'a AstNode<'a>) {
        let value = node.data.borrow().value.clone();
        match value {
            NodeValue::Document => self.convert_children(doc, parent, node),
            NodeValue::FrontMatter(_) => {}
            NodeValue::Paragraph => {
                if in_tight_list(node) {
                    self.convert_children(doc, parent, node);
                    // keep the item's text apart from a nested list
                    if node.next_sibling().is_some() {
                        doc.append_text(parent, "\n");
                    }
                } else {
                    self.element(doc, parent, "p", node);
                }
            }
            NodeValue::Heading(h) => {
                self.element(doc, parent, &format!("h{}", h.level), node);
            }
            NodeValue::Text(text) => {
                doc.append_text(parent, &text);
            }
            NodeValue::SoftBreak => {
                doc.append_text(parent, "\n");
            }
            NodeValue::LineBreak => {
                let br = doc.create_element("br");
                doc.append_child(parent, br);
                doc.append_text(parent, "\n");
            }
            NodeValue::Code(code) => {
                let el = doc.create_element("code");
                doc.append_child(parent, el);
                doc.append_text(el, &code.literal);
            }
            NodeValue::CodeBlock(block) => {
                if block.fenced && is_mermaid_info(&block.info) {
                    let pre = doc.create_element_with("pre", &[("class", "mermaid")]);
                    doc.append_child(parent, pre);
                    doc.append_text(pre, &block.literal);
                    self.mermaid_blocks += 1;
                } else {
                    let pre = doc.create_element("pre");
                    doc.append_child(parent, pre);
                    let code = doc.create_element("code");
                    if let Some(lang) = block.info.split_whitespace().next() {
                        doc.set_attr(code, "class", &format!("language-{lang}"));
                    }
                    doc.append_child(pre, code);
                    doc.append_text(code, &block.literal);
                }
                doc.append_text(parent, "\n");
            }
            NodeValue::HtmlBlock(_) | NodeValue::HtmlInline(_) => {
                let comment = doc.create_comment(" raw HTML omitted ");
                doc.append_child(parent, comment);
            }
            NodeValue::Emph => {
                self.element(doc, parent, "em", node);
            }
            NodeValue::Strong => {
                self.element(doc, parent, "strong", node);
            }
            NodeValue::Strikethrough => {
                self.element(doc, parent, "del", node);
            }
            NodeValue::Superscript => {
                self.element(doc, parent, "sup", node);
            }
            NodeValue::BlockQuote => {
                self.element(doc, parent, "blockquote", node);
            }
            NodeValue::ThematicBreak => {
                let hr = doc.create_element("hr");
                doc.append_child(parent, hr);
                doc.append_text(parent, "\n");
            }
            NodeValue::List(list) => {
                let tag = match list.list_type {
                    ListType::Bullet => "ul",
                    ListType::Ordered => "ol",
                };
                let el = self.element(doc, parent, tag, node);
                if list.list_type == ListType::Ordered && list.start != 1 {
                    doc.set_attr(el, "start", &list.start.to_string());
                }
            }
            NodeValue::Item(_) => {
                self.element(doc, parent, "li", node);
            }
            NodeValue::TaskItem(symbol) => {
                let li = doc.create_element("li");
                doc.append_child(parent, li);
                let checkbox = doc.create_element_with("input", &[("type", "checkbox"), ("disabled", "")]);
                if symbol.is_some() {
                    doc.set_attr(checkbox, "checked", "");
                }
                doc.append_child(li, checkbox);
                doc.append_text(li, " ");
                self.convert_children(doc, li, node);
                doc.append_text(parent, "\n");
            }
            NodeValue::Link(link) => {
                let href = self.link_target(&link.url);
                let a = doc.create_element_with("a", &[("href", href.as_str())]);
                if !link.title.is_empty() {
                    doc.set_attr(a, "title", &link.title);
                }
                doc.append_child(parent, a);
                self.convert_children(doc, a, node);
            }
            NodeValue::Image(link) => {
                let src = self.link_target(&link.url);
                let alt = collect_text(node);
                let img = doc.create_element_with("img", &[("src", src.as_str()), ("alt", alt.as_str())]);
                if !link.title.is_empty() {
                    doc.set_attr(img, "title", &link.title);
                }
                doc.append_child(parent, img);
            }
            NodeValue::Table(table) => self.table(doc, parent, node, &table.alignments),
            // Rows and cells are emitted by `table`; anything else is
            // flattened into its parent.
            _ => self.convert_children(doc, parent, node),
        }
    }

    fn table<'a>(&mut self, doc: &mut Document, parent: NodeId, node: &'a AstNode<'a>, alignments: &[TableAlignment]) {
        let table = doc.create_element("table");
        doc.append_child(parent, table);
        doc.append_text(parent, "\n");
        let mut body: Option<NodeId> = None;

        for row in node.children() {
            let header = match row.data.borrow().value {
                NodeValue::TableRow(header) => header,
                _ => continue,
            };
            let section = if header {
                let thead = doc.create_element("thead");
                doc.append_child(table, thead);
                thead
            } else {
                *body.get_or_insert_with(|| {
                    let tbody = doc.create_element("tbody");
                    doc.append_child(table, tbody);
                    tbody
                })
            };
            let tr = doc.create_element("tr");
            doc.append_child(section, tr);
            for (i, cell) in row.children().enumerate() {
                let cell_el = doc.create_element(if header { "th" } else { "td" });
                if let Some(align) = alignment_attr(alignments.get(i)) {
                    doc.set_attr(cell_el, "align", align);
                }
                doc.append_child(tr, cell_el);
                self.convert_children(doc, cell_el, cell);
                doc.append_text(tr, "\n");
            }
            doc.append_text(section, "\n");
        }
    }
}

/// Whether `paragraph` sits directly in an item of a tight list.
fn in_tight_list<'a>(paragraph: &'a AstNode<'a>) -> bool {
    let Some(item) = paragraph.parent() else {
        return false;
    };
    let is_item = matches!(
        item.data.borrow().value,
        NodeValue::Item(_) | NodeValue::TaskItem(_)
    );
    if !is_item {
        return false;
    }
    item.parent()
        .map(|list| matches!(&list.data.borrow().value, NodeValue::List(l) if l.tight))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Convert markdown into an `<article class="paper">` tree.
///
/// Local relative links are rewritten to root-relative hrefs, mermaid fences
/// become `<pre class="mermaid">` placeholders, and raw HTML is dropped.
///
/// Logs `[render] path=<file> headings=<n>` and link rewrite counts at debug.
pub fn render_markdown(input: &str, location: &SourceLocation) -> RenderedMarkdown {
    let arena = Arena::new();
    let options = make_options();
    let root = parse_document(&arena, input, &options);

    let title = root.descendants().find_map(|node| match node.data.borrow().value {
        NodeValue::Heading(ref h) if h.level == 1 => Some(collect_text(node).trim().to_owned()),
        _ => None,
    });

    let mut doc = Document::new("article");
    let content = doc.root();
    doc.set_attr(content, "class", CONTENT_CLASS);

    let mut converter = Converter::new(location);
    converter.convert(&mut doc, content, root);

    log::debug!(
        "[rewrite] file={} rewritten={} skipped={}",
        location.file_path.display(),
        converter.links_rewritten,
        converter.links_skipped
    );
    log::debug!(
        "[mermaid] file={} rewritten={}",
        location.file_path.display(),
        converter.mermaid_blocks
    );
    let headings = doc
        .elements_by_tag(content, &["h1", "h2", "h3", "h4", "h5", "h6"])
        .len();
    log::info!("[render] path={} headings={headings}", location.file_path.display());

    RenderedMarkdown {
        doc,
        content,
        title,
    }
}

// ---------------------------------------------------------------------------
// Page shell
// ---------------------------------------------------------------------------

/// Pinned Mermaid build loaded for `<pre class="mermaid">` placeholders.
const MERMAID_CDN_URL: &str = "https://cdn.jsdelivr.net/npm/mermaid@10.9.3/dist/mermaid.min.js";

/// Applies the stored theme before first paint.
const THEME_INIT_SCRIPT: &str = "\
<script>(function(){\
var s=localStorage.getItem('docs-theme');\
if(s)document.documentElement.setAttribute('data-theme',s);\
}());</script>";

const ICON_MOON: &str = r#"<svg class="icon-moon" xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round" aria-hidden="true"><path d="M21 12.79A9 9 0 1 1 11.21 3 7 7 0 0 0 21 12.79z"/></svg>"#;
const ICON_SUN: &str = r#"<svg class="icon-sun" xmlns="http://www.w3.org/2000/svg" width="16" height="16" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round" aria-hidden="true"><circle cx="12" cy="12" r="5"/><line x1="12" y1="1" x2="12" y2="3"/><line x1="12" y1="21" x2="12" y2="23"/><line x1="4.22" y1="4.22" x2="5.64" y2="5.64"/><line x1="18.36" y1="18.36" x2="19.78" y2="19.78"/><line x1="1" y1="12" x2="3" y2="12"/><line x1="21" y1="12" x2="23" y2="12"/><line x1="4.22" y1="19.78" x2="5.64" y2="18.36"/><line x1="18.36" y1="5.64" x2="19.78" y2="4.22"/></svg>"#;

/// Wrap rendered markdown in the full page shell.
///
/// The page title is the first H1 text, then the file stem, then a fixed
/// default. Returns the document and references to every controlled element.
pub fn build_page_shell(rendered: RenderedMarkdown, file_path: &Path) -> (Document, PageElements) {
    let RenderedMarkdown {
        doc: article_doc,
        content,
        title,
    } = rendered;
    let title = title
        .filter(|t| !t.is_empty())
        .or_else(|| file_path.file_stem().and_then(|s| s.to_str()).map(str::to_owned))
        .unwrap_or_else(|| "Документ".to_owned());

    let mut doc = Document::new("html");
    let html = doc.root();
    doc.set_attr(html, "lang", "ru");

    let head = doc.create_element("head");
    doc.append_child(html, head);
    let head_markup = format!(
        "\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{}</title>\n\
{THEME_INIT_SCRIPT}\n\
<link rel=\"stylesheet\" href=\"{}\">\n",
        crate::dom::html_escape(&title),
        web_assets::CSS_PATH
    );
    let head_raw = doc.create_raw(&head_markup);
    doc.append_child(head, head_raw);

    let body = doc.create_element("body");
    doc.append_child(html, body);
    doc.append_text(body, "\n");

    let progress_bar = doc.create_element_with("div", &[("id", "progressBar"), ("class", "progress")]);
    doc.append_child(body, progress_bar);
    doc.append_text(body, "\n");

    let header = doc.create_element_with("header", &[("class", "topbar")]);
    doc.append_child(body, header);
    doc.append_text(body, "\n");
    let title_el = doc.create_element_with("span", &[("class", "topbar__title")]);
    doc.append_child(header, title_el);
    doc.append_text(title_el, &title);
    let search_input = doc.create_element_with(
        "input",
        &[
            ("id", "searchInput"),
            ("class", "search"),
            ("type", "search"),
            ("placeholder", "Поиск (Ctrl/⌘ + K)"),
            ("autocomplete", "off"),
        ],
    );
    doc.append_child(header, search_input);
    let word_count = doc.create_element_with("span", &[("id", "wordCount"), ("class", "stat")]);
    doc.append_child(header, word_count);
    let reading_time = doc.create_element_with("span", &[("id", "readingTime"), ("class", "stat")]);
    doc.append_child(header, reading_time);
    let theme_toggle = doc.create_element_with(
        "button",
        &[
            ("id", "toggleTheme"),
            ("class", "theme-toggle"),
            ("type", "button"),
            ("aria-label", "Переключить тему"),
        ],
    );
    doc.append_child(header, theme_toggle);
    let icons = doc.create_raw(&format!("{ICON_MOON}{ICON_SUN}"));
    doc.append_child(theme_toggle, icons);

    let layout = doc.create_element_with("div", &[("class", "layout")]);
    doc.append_child(body, layout);
    doc.append_text(body, "\n");
    let aside = doc.create_element_with("aside", &[("class", "toc")]);
    doc.append_child(layout, aside);
    let toc_nav = doc.create_element_with("nav", &[("id", "tocNav"), ("class", "toc__nav")]);
    doc.append_child(aside, toc_nav);

    graft(&mut doc, layout, &article_doc, content);

    let back_to_top = doc.create_element_with(
        "button",
        &[
            ("id", "backToTop"),
            ("class", "back-to-top"),
            ("type", "button"),
            ("aria-label", "Наверх"),
        ],
    );
    doc.append_child(body, back_to_top);
    doc.append_text(back_to_top, "↑");
    doc.append_text(body, "\n");

    let scripts = doc.create_raw(&format!(
        "<script src=\"{MERMAID_CDN_URL}\"></script>\n<script src=\"{}\"></script>\n",
        web_assets::JS_PATH
    ));
    doc.append_child(body, scripts);

    let elements = PageElements::locate(&doc, CONTENT_CLASS);
    (doc, elements)
}

/// Deep-copy `node` from `src` into `dst` under `parent`.
fn graft(dst: &mut Document, parent: NodeId, src: &Document, node: NodeId) -> NodeId {
    use crate::dom::NodeKind;
    let copy = match src.kind(node) {
        NodeKind::Element(el) => {
            let id = dst.create_element(&el.tag);
            for (name, value) in &el.attrs {
                dst.set_attr(id, name, value);
            }
            id
        }
        NodeKind::Text(t) => dst.create_text(t),
        NodeKind::Comment(c) => dst.create_comment(c),
        NodeKind::Raw(r) => dst.create_raw(r),
    };
    dst.append_child(parent, copy);
    for &child in src.children(node) {
        graft(dst, copy, src, child);
    }
    copy
}

/// Options for producing a finished page.
pub struct RenderRequest<'a> {
    pub location: SourceLocation<'a>,
    /// Search query to pre-apply, as if typed into the search box.
    pub query: Option<&'a str>,
}

/// Render markdown into an initialized [`Page`]: theme restored, TOC built,
/// stats shown, and the optional query highlighted.
pub fn render_page(input: &str, request: &RenderRequest, ctx: PageContext) -> Page {
    let rendered = render_markdown(input, &request.location);
    let (doc, elements) = build_page_shell(rendered, request.location.file_path);
    let mut page = Page::new(doc, elements, ctx);
    page.init();
    if let Some(query) = request.query.filter(|q| !q.trim().is_empty()) {
        page.type_search(query);
    }
    page
}

/// Platform string reported by the host, used for the hotkey modifier.
pub fn host_platform() -> Platform {
    Platform::detect(std::env::consts::OS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
