use scraper::ElementRef;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Doctype(String),
    Comment(String),
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attrs
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => self.attrs.push((name.to_owned(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self
            .attrs
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(index).1)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// Concatenated text of direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                Node::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    pub fn find_descendant(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|child| match child {
            Node::Element(el) if el.is(name) => Some(el),
            Node::Element(el) => el.find_descendant(name),
            _ => None,
        })
    }

    fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        f(self);
        for child in &mut self.children {
            if let Node::Element(el) = child {
                el.walk_mut(f);
            }
        }
    }

    fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Element)) {
        f(self);
        for child in &self.children {
            if let Node::Element(el) = child {
                el.walk(f);
            }
        }
    }
}

impl Document {
    pub fn parse(html: &str) -> Self {
        let parsed = scraper::Html::parse_document(html);
        let mut children = Vec::new();
        for child in parsed.tree.root().children() {
            if let Some(el) = ElementRef::wrap(child) {
                children.push(Node::Element(convert_element(el)));
            } else if let Some(node) = convert_leaf(child.value()) {
                children.push(node);
            }
        }
        Self { children }
    }

    /// Visits every element in document order.
    pub fn for_each_element_mut(&mut self, mut f: impl FnMut(&mut Element)) {
        for child in &mut self.children {
            if let Node::Element(el) = child {
                el.walk_mut(&mut f);
            }
        }
    }

    pub fn for_each_element<'a>(&'a self, mut f: impl FnMut(&'a Element)) {
        for child in &self.children {
            if let Node::Element(el) = child {
                el.walk(&mut f);
            }
        }
    }

    pub fn elements_named(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        self.for_each_element(|el| {
            if el.is(name) {
                found.push(el);
            }
        });
        found
    }

    pub fn find_first(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|child| match child {
            Node::Element(el) if el.is(name) => Some(el),
            Node::Element(el) => el.find_descendant(name),
            _ => None,
        })
    }

    /// Returns the `<head>` element, creating it (and a root `<html>`) when missing.
    pub fn head_mut(&mut self) -> &mut Element {
        let html_index = match self.root_html_index() {
            Some(index) => index,
            None => {
                let (doctypes, rest): (Vec<Node>, Vec<Node>) = std::mem::take(&mut self.children)
                    .into_iter()
                    .partition(|node| matches!(node, Node::Doctype(_)));
                let mut html = Element::new("html");
                html.children = rest;
                self.children = doctypes;
                self.children.push(Node::Element(html));
                self.children.len() - 1
            }
        };
        let Node::Element(html) = &mut self.children[html_index] else {
            unreachable!("root html index points at an element");
        };

        let head_index = match html
            .children
            .iter()
            .position(|child| matches!(child, Node::Element(el) if el.is("head")))
        {
            Some(index) => index,
            None => {
                html.children.insert(0, Node::Element(Element::new("head")));
                0
            }
        };
        let Node::Element(head) = &mut html.children[head_index] else {
            unreachable!("head index points at an element");
        };
        head
    }

    fn root_html_index(&self) -> Option<usize> {
        self.children
            .iter()
            .position(|child| matches!(child, Node::Element(el) if el.is("html")))
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            serialize_node(child, false, &mut out);
        }
        out
    }
}

fn convert_element(el: ElementRef<'_>) -> Element {
    let value = el.value();
    let mut element = Element::new(value.name());
    element.attrs = value
        .attrs()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect();
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            element.children.push(Node::Element(convert_element(child_el)));
        } else if let Some(node) = convert_leaf(child.value()) {
            element.children.push(node);
        }
    }
    element
}

fn convert_leaf(node: &scraper::Node) -> Option<Node> {
    match node {
        scraper::Node::Text(text) => {
            let text: &str = text;
            Some(Node::Text(text.to_owned()))
        }
        scraper::Node::Comment(comment) => {
            let comment: &str = comment;
            Some(Node::Comment(comment.to_owned()))
        }
        scraper::Node::Doctype(doctype) => Some(Node::Doctype(doctype.name().to_owned())),
        _ => None,
    }
}

fn serialize_node(node: &Node, raw_text: bool, out: &mut String) {
    match node {
        Node::Doctype(name) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(if name.is_empty() { "html" } else { name });
            out.push('>');
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Text(text) if raw_text => out.push_str(text),
        Node::Text(text) => escape_text(text, out),
        Node::Element(el) => serialize_element(el, out),
    }
}

fn serialize_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.name);
    for (name, value) in &el.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');

    let name = el.name.to_ascii_lowercase();
    if VOID_ELEMENTS.contains(&name.as_str()) {
        return;
    }

    let raw_text = RAW_TEXT_ELEMENTS.contains(&name.as_str());
    for child in &el.children {
        serialize_node(child, raw_text, out);
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}
