//! Arena-backed document tree.
//!
//! Rendered articles are held as a small DOM so the TOC builder, search
//! highlighter, and page chrome controllers can mutate the page before it is
//! serialized. Nodes are addressed by [`NodeId`]; a detached node stays in the
//! arena but is no longer reachable from the root and is never serialized.

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Handle to a node stored in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Tag name and ordered attributes of an element node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
}

/// Payload of a single tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element(ElementData),
    Text(String),
    Comment(String),
    /// Trusted markup (inline scripts, SVG icons) emitted verbatim.
    ///
    /// Raw nodes carry no text content: they are skipped by
    /// [`Document::text_content`] and by the search highlighter.
    Raw(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// An HTML document tree rooted at a single element.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: [&str; 6] = ["br", "hr", "img", "input", "meta", "link"];

// ---------------------------------------------------------------------------
// Construction and mutation
// ---------------------------------------------------------------------------

impl Document {
    /// Create a document whose root is an empty `root_tag` element.
    pub fn new(root_tag: &str) -> Self {
        let mut doc = Document {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        doc.root = doc.create_element(root_tag);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            kind,
        });
        id
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element(ElementData {
            tag: tag.to_owned(),
            attrs: Vec::new(),
        }))
    }

    /// Create an element with the given attributes already set.
    pub fn create_element_with(&mut self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.create_element(tag);
        for (name, value) in attrs {
            self.set_attr(id, name, value);
        }
        id
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_owned()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Comment(text.to_owned()))
    }

    pub fn create_raw(&mut self, markup: &str) -> NodeId {
        self.push(NodeKind::Raw(markup.to_owned()))
    }

    /// Detach `node` from its parent. Returns `false` when it had no parent.
    pub fn detach(&mut self, node: NodeId) -> bool {
        let Some(parent) = self.nodes[node.0].parent.take() else {
            return false;
        };
        self.nodes[parent.0].children.retain(|&c| c != node);
        true
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Insert `node` into `parent` before `reference`, or at the end when
    /// `reference` is `None` or not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) {
        self.detach(node);
        self.nodes[node.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        match reference.and_then(|r| children.iter().position(|&c| c == r)) {
            Some(pos) => children.insert(pos, node),
            None => children.push(node),
        }
    }

    /// Append a text node holding `text` to `parent`.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let node = self.create_text(text);
        self.append_child(parent, node);
        node
    }

    /// Replace `old` in its parent's child list with `replacements`, in order.
    ///
    /// `old` is left detached. Returns `false` (and changes nothing) when
    /// `old` has no parent.
    pub fn replace_with_many(&mut self, old: NodeId, replacements: &[NodeId]) -> bool {
        let Some(parent) = self.nodes[old.0].parent else {
            return false;
        };
        for &node in replacements {
            self.detach(node);
        }
        let Some(pos) = self.nodes[parent.0].children.iter().position(|&c| c == old) else {
            return false;
        };
        self.nodes[old.0].parent = None;
        for &node in replacements {
            self.nodes[node.0].parent = Some(parent);
        }
        self.nodes[parent.0]
            .children
            .splice(pos..=pos, replacements.iter().copied());
        true
    }

    /// Detach every child of `parent`.
    pub fn clear_children(&mut self, parent: NodeId) {
        let children = std::mem::take(&mut self.nodes[parent.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn kind(&self, node: NodeId) -> &NodeKind {
        &self.nodes[node.0].kind
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// Tag name for element nodes, `None` otherwise.
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Element(el) => Some(el.tag.as_str()),
            _ => None,
        }
    }

    /// Value of a text node, `None` for any other kind.
    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    /// Whether `node` is reachable from the document root.
    #[cfg(test)]
    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(p) => current = p,
                None => return false,
            }
        }
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Element(el) => el
                .attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Set (or overwrite) an attribute. No-op on non-element nodes.
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let NodeKind::Element(el) = &mut self.nodes[node.0].kind {
            match el.attrs.iter_mut().find(|(n, _)| n == name) {
                Some((_, v)) => *v = value.to_owned(),
                None => el.attrs.push((name.to_owned(), value.to_owned())),
            }
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        if let NodeKind::Element(el) = &mut self.nodes[node.0].kind {
            el.attrs.retain(|(n, _)| n != name);
        }
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attr(node, "class")
            .map(|c| c.split_whitespace().any(|name| name == class))
            .unwrap_or(false)
    }

    pub fn add_class(&mut self, node: NodeId, class: &str) {
        if self.tag(node).is_none() || self.has_class(node, class) {
            return;
        }
        let value = match self.attr(node, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {class}", existing.trim()),
            _ => class.to_owned(),
        };
        self.set_attr(node, "class", &value);
    }

    pub fn remove_class(&mut self, node: NodeId, class: &str) {
        if !self.has_class(node, class) {
            return;
        }
        let value = self
            .attr(node, "class")
            .unwrap_or("")
            .split_whitespace()
            .filter(|name| *name != class)
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attr(node, "class", &value);
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// All descendants of `node` in document (pre-)order, excluding `node`.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[node.0].children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.nodes[current.0].children.iter().rev().copied());
        }
        out
    }

    /// Concatenated value of all descendant text nodes.
    pub fn text_content(&self, node: NodeId) -> String {
        if let NodeKind::Text(t) = &self.nodes[node.0].kind {
            return t.clone();
        }
        let mut text = String::new();
        for d in self.descendants(node) {
            if let NodeKind::Text(t) = &self.nodes[d.0].kind {
                text.push_str(t);
            }
        }
        text
    }

    /// Nearest element, starting at `node` itself, whose tag is in `tags`.
    pub fn closest(&self, node: NodeId, tags: &[&str]) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(tag) = self.tag(id) {
                if tags.contains(&tag) {
                    return Some(id);
                }
            }
            current = self.nodes[id.0].parent;
        }
        None
    }

    /// Descendant elements of `scope` whose tag is in `tags`, in document order.
    pub fn elements_by_tag(&self, scope: NodeId, tags: &[&str]) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|&id| self.tag(id).is_some_and(|t| tags.contains(&t)))
            .collect()
    }

    /// Descendant elements of `scope` carrying `class`, in document order.
    pub fn elements_by_class(&self, scope: NodeId, class: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|&id| self.has_class(id, class))
            .collect()
    }

    /// First attached element whose `id` equals `id`.
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .find(|&node| self.attr(node, "id") == Some(id))
    }

    /// Every `id` attribute value present in the attached tree.
    pub fn ids(&self) -> Vec<String> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .filter_map(|id| self.attr(id, "id").map(str::to_owned))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Serialize the children of `node`.
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in &self.nodes[node.0].children {
            self.write_node(child, &mut out);
        }
        out
    }

    /// Serialize `node` and its subtree.
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    /// Serialize the whole document, prefixed with the HTML5 doctype.
    pub fn to_html(&self) -> String {
        format!("<!DOCTYPE html>\n{}\n", self.outer_html(self.root))
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Text(t) => out.push_str(&html_escape(t)),
            NodeKind::Comment(c) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
            NodeKind::Raw(markup) => out.push_str(markup),
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&html_escape(value));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&el.tag.as_str()) {
                    return;
                }
                for &child in &self.nodes[node.0].children {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

/// Minimal HTML entity escaping for text content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new("article");
        let p = doc.create_element("p");
        doc.append_child(doc.root(), p);
        let text = doc.append_text(p, "Hello ");
        let em = doc.create_element("em");
        doc.append_child(p, em);
        doc.append_text(em, "world");
        (doc, p, text)
    }

    #[test]
    fn serializes_nested_elements() {
        let (doc, _, _) = sample();
        assert_eq!(
            doc.outer_html(doc.root()),
            "<article><p>Hello <em>world</em></p></article>"
        );
    }

    #[test]
    fn text_and_attributes_are_escaped() {
        let mut doc = Document::new("div");
        let a = doc.create_element_with("a", &[("href", "/x?a=1&b=\"2\"")]);
        doc.append_child(doc.root(), a);
        doc.append_text(a, "<b> & 'c'");
        assert_eq!(
            doc.inner_html(doc.root()),
            "<a href=\"/x?a=1&amp;b=&quot;2&quot;\">&lt;b&gt; &amp; &#39;c&#39;</a>"
        );
    }

    #[test]
    fn void_elements_have_no_closing_tag() {
        let mut doc = Document::new("p");
        let br = doc.create_element("br");
        doc.append_child(doc.root(), br);
        let input = doc.create_element_with("input", &[("type", "checkbox")]);
        doc.append_child(doc.root(), input);
        assert_eq!(doc.outer_html(doc.root()), "<p><br><input type=\"checkbox\"></p>");
    }

    #[test]
    fn raw_and_comment_nodes_serialize_verbatim_without_text() {
        let mut doc = Document::new("div");
        let raw = doc.create_raw("<svg><circle/></svg>");
        doc.append_child(doc.root(), raw);
        let comment = doc.create_comment(" raw HTML omitted ");
        doc.append_child(doc.root(), comment);
        assert_eq!(
            doc.inner_html(doc.root()),
            "<svg><circle/></svg><!-- raw HTML omitted -->"
        );
        assert_eq!(doc.text_content(doc.root()), "");
    }

    #[test]
    fn text_content_concatenates_in_document_order() {
        let (doc, p, _) = sample();
        assert_eq!(doc.text_content(p), "Hello world");
    }

    #[test]
    fn replace_with_many_splices_in_place() {
        let (mut doc, p, text) = sample();
        let a = doc.create_text("He");
        let mark = doc.create_element("mark");
        doc.append_text(mark, "llo");
        let b = doc.create_text(" ");
        assert!(doc.replace_with_many(text, &[a, mark, b]));
        assert_eq!(doc.inner_html(p), "He<mark>llo</mark> <em>world</em>");
        assert_eq!(doc.parent(text), None);
        assert!(!doc.is_attached(text));
        assert_eq!(doc.parent(mark), Some(p));
    }

    #[test]
    fn replace_with_many_on_detached_node_is_noop() {
        let mut doc = Document::new("div");
        let orphan = doc.create_text("x");
        let other = doc.create_text("y");
        assert!(!doc.replace_with_many(orphan, &[other]));
        assert_eq!(doc.parent(other), None);
    }

    #[test]
    fn append_child_moves_node_between_parents() {
        let mut doc = Document::new("div");
        let a = doc.create_element("section");
        let b = doc.create_element("section");
        doc.append_child(doc.root(), a);
        doc.append_child(doc.root(), b);
        let t = doc.append_text(a, "moved");
        doc.append_child(b, t);
        assert!(doc.children(a).is_empty());
        assert_eq!(doc.children(b), &[t]);
    }

    #[test]
    fn class_list_operations() {
        let mut doc = Document::new("a");
        let root = doc.root();
        doc.add_class(root, "toc__item");
        doc.add_class(root, "is-active");
        doc.add_class(root, "is-active");
        assert_eq!(doc.attr(root, "class"), Some("toc__item is-active"));
        assert!(doc.has_class(root, "is-active"));
        doc.remove_class(root, "is-active");
        assert_eq!(doc.attr(root, "class"), Some("toc__item"));
        assert!(!doc.has_class(root, "is-active"));
    }

    #[test]
    fn closest_includes_self_and_walks_up() {
        let mut doc = Document::new("article");
        let pre = doc.create_element("pre");
        doc.append_child(doc.root(), pre);
        let code = doc.create_element("code");
        doc.append_child(pre, code);
        let text = doc.append_text(code, "fn main() {}");
        assert_eq!(doc.closest(text, &["pre"]), Some(pre));
        assert_eq!(doc.closest(code, &["code", "pre"]), Some(code));
        assert_eq!(doc.closest(text, &["script"]), None);
    }

    #[test]
    fn elements_by_tag_in_document_order() {
        let mut doc = Document::new("article");
        let root = doc.root();
        let h2 = doc.create_element("h2");
        let section = doc.create_element("section");
        let h3 = doc.create_element("h3");
        let h2b = doc.create_element("h2");
        doc.append_child(root, h2);
        doc.append_child(root, section);
        doc.append_child(section, h3);
        doc.append_child(root, h2b);
        assert_eq!(doc.elements_by_tag(root, &["h2", "h3"]), vec![h2, h3, h2b]);
    }

    #[test]
    fn ids_lists_attached_identifiers() {
        let mut doc = Document::new("html");
        let root = doc.root();
        let nav = doc.create_element_with("nav", &[("id", "tocNav")]);
        doc.append_child(root, nav);
        let loose = doc.create_element_with("div", &[("id", "detached")]);
        assert_eq!(doc.ids(), vec!["tocNav".to_owned()]);
        doc.append_child(nav, loose);
        assert_eq!(doc.ids(), vec!["tocNav".to_owned(), "detached".to_owned()]);
    }

    #[test]
    fn html_escape_handles_special_chars() {
        assert_eq!(html_escape("<>&\"'"), "&lt;&gt;&amp;&quot;&#39;");
    }

    #[test]
    fn insert_before_places_node_ahead_of_reference() {
        let (mut doc, p, text) = sample();
        let strong = doc.create_element("strong");
        doc.insert_before(p, strong, Some(text));
        assert_eq!(doc.children(p)[0], strong);
        assert_eq!(doc.parent(strong), Some(p));

        let tail = doc.create_text("!");
        doc.insert_before(p, tail, None);
        assert_eq!(doc.children(p).last(), Some(&tail));
        assert_eq!(doc.inner_html(p), "<strong></strong>Hello <em>world</em>!");
    }

    #[test]
    fn remove_attr_and_lookup_by_id() {
        let mut doc = Document::new("body");
        let nav = doc.create_element_with("nav", &[("id", "tocNav"), ("class", "toc")]);
        doc.append_child(doc.root(), nav);
        assert_eq!(doc.element_by_id("tocNav"), Some(nav));
        assert_eq!(doc.element_by_id("missing"), None);

        doc.remove_attr(nav, "id");
        assert_eq!(doc.attr(nav, "id"), None);
        assert_eq!(doc.element_by_id("tocNav"), None);
        assert_eq!(doc.outer_html(nav), "<nav class=\"toc\"></nav>");
    }

    #[test]
    fn detached_elements_are_not_found_by_id() {
        let mut doc = Document::new("body");
        let orphan = doc.create_element_with("div", &[("id", "x")]);
        assert_eq!(doc.element_by_id("x"), None);
        doc.append_child(doc.root(), orphan);
        assert_eq!(doc.element_by_id("x"), Some(orphan));
        doc.detach(orphan);
        assert_eq!(doc.element_by_id("x"), None);
    }
}
