//! Lenient HTML-subset parser producing a node tree.
//!
//! Unknown tags are kept as plain elements, stray closing tags are
//! dropped, and unclosed elements are closed at end of input. Nothing
//! here ever fails.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    fn new(tag: &str, attrs: Vec<(String, String)>) -> Self {
        Self {
            tag: tag.to_string(),
            attrs,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn classes(&self) -> BTreeSet<String> {
        self.attr("class")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// True when the element has no text content at any depth.
    pub fn is_blank(&self) -> bool {
        self.children.iter().all(|child| match child {
            Node::Text(text) => text.trim().is_empty(),
            Node::Element(el) => el.is_blank(),
        })
    }
}

const VOID_TAGS: &[&str] = &[
    "br", "hr", "img", "meta", "link", "input", "col", "area", "base", "wbr",
];
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

enum Token {
    Open {
        tag: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close(String),
    Text(String),
}

pub fn parse(html: &str) -> Vec<Node> {
    let mut builder = TreeBuilder::default();
    for token in tokenize(html) {
        match token {
            Token::Open {
                tag,
                attrs,
                self_closing,
            } => builder.open(&tag, attrs, self_closing),
            Token::Close(tag) => builder.close(&tag),
            Token::Text(text) => builder.text(text),
        }
    }
    builder.finish()
}

#[derive(Default)]
struct TreeBuilder {
    roots: Vec<Node>,
    stack: Vec<Element>,
}

impl TreeBuilder {
    fn open(&mut self, tag: &str, attrs: Vec<(String, String)>, self_closing: bool) {
        match tag {
            "li" => self.close_open_sibling(&["li"], &["ul", "ol", "table"]),
            "tr" => self.close_injected_row(),
            "td" | "th" => self.close_open_sibling(&["td", "th"], &["tr", "table"]),
            "p" => {
                if self.stack.last().is_some_and(|el| el.tag == "p") {
                    self.pop();
                }
            }
            _ => {}
        }

        let element = Element::new(tag, attrs);
        if self_closing || VOID_TAGS.contains(&tag) {
            self.attach(Node::Element(element));
        } else {
            self.stack.push(element);
        }
    }

    /// Close `tag` and everything opened after it. Table parts never
    /// close across a table boundary, list items never across a list.
    fn close(&mut self, tag: &str) {
        let boundary: &[&str] = match tag {
            "td" | "th" | "tr" | "thead" | "tbody" | "tfoot" => &["table"],
            "li" => &["ul", "ol"],
            _ => &[],
        };
        let mut found = None;
        for index in (0..self.stack.len()).rev() {
            let open = self.stack[index].tag.as_str();
            if open == tag {
                found = Some(index);
                break;
            }
            if boundary.contains(&open) {
                break;
            }
        }
        let Some(position) = found else {
            return;
        };
        while self.stack.len() > position {
            self.pop();
        }
    }

    fn text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.attach(Node::Text(text));
    }

    fn finish(mut self) -> Vec<Node> {
        while !self.stack.is_empty() {
            self.pop();
        }
        self.roots
    }

    fn attach(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn pop(&mut self) {
        if let Some(element) = self.stack.pop() {
            self.attach(Node::Element(element));
        }
    }

    /// Close the nearest open `siblings` element unless a `boundary`
    /// element sits above it.
    fn close_open_sibling(&mut self, siblings: &[&str], boundaries: &[&str]) {
        for index in (0..self.stack.len()).rev() {
            let tag = self.stack[index].tag.as_str();
            if boundaries.contains(&tag) {
                return;
            }
            if siblings.contains(&tag) {
                while self.stack.len() > index {
                    self.pop();
                }
                return;
            }
        }
    }

    /// A `<tr>` opened while a row is still open closes that row. Rows
    /// substituted into a placeholder cell (`<td>${rows}</td>`, possibly
    /// wrapped as in `<td><p>${rows}</p></td>`) replace the placeholder row
    /// when it holds nothing else.
    fn close_injected_row(&mut self) {
        let Some(row_index) = self.innermost_open_row() else {
            return;
        };
        let placeholder = self.stack[row_index..].iter().all(Element::is_blank);
        if placeholder {
            self.stack.truncate(row_index);
        } else {
            while self.stack.len() > row_index {
                self.pop();
            }
        }
    }

    fn innermost_open_row(&self) -> Option<usize> {
        for index in (0..self.stack.len()).rev() {
            match self.stack[index].tag.as_str() {
                "tr" => return Some(index),
                "table" => return None,
                _ => {}
            }
        }
        None
    }
}

fn tokenize(html: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        text.push_str(&rest[..lt]);
        let tail = &rest[lt..];

        if let Some(comment) = tail.strip_prefix("<!--") {
            rest = match comment.find("-->") {
                Some(end) => &comment[end + 3..],
                None => "",
            };
            continue;
        }
        if tail.starts_with("<!") || tail.starts_with("<?") {
            rest = match tail.find('>') {
                Some(end) => &tail[end + 1..],
                None => "",
            };
            continue;
        }

        let after = &tail[1..];
        let is_close = after.starts_with('/');
        let name_start = if is_close { &after[1..] } else { after };
        if !name_start.starts_with(|c: char| c.is_ascii_alphabetic()) {
            text.push('<');
            rest = after;
            continue;
        }
        let Some(end) = find_tag_end(tail) else {
            text.push('<');
            rest = after;
            continue;
        };

        flush_text(&mut text, &mut tokens);
        let inner = &tail[1..end];
        rest = &tail[end + 1..];

        if is_close {
            let name = tag_name(&inner[1..]);
            tokens.push(Token::Close(name));
            continue;
        }

        let name = tag_name(inner);
        let self_closing = inner.trim_end().ends_with('/');
        let attrs = parse_attributes(&inner[name.len()..]);
        let raw_text = RAW_TEXT_TAGS.contains(&name.as_str());
        tokens.push(Token::Open {
            tag: name.clone(),
            attrs,
            self_closing,
        });

        if raw_text && !self_closing {
            let closing = format!("</{name}");
            let lower = rest.to_ascii_lowercase();
            let body_end = lower.find(&closing).unwrap_or(rest.len());
            rest = &rest[body_end..];
        }
    }
    text.push_str(rest);
    flush_text(&mut text, &mut tokens);
    tokens
}

fn flush_text(text: &mut String, tokens: &mut Vec<Token>) {
    if !text.is_empty() {
        tokens.push(Token::Text(decode_entities(text)));
        text.clear();
    }
}

/// Index of the `>` closing a tag that starts at `tail[0]`, skipping
/// quoted attribute values.
fn find_tag_end(tail: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (index, ch) in tail.char_indices().skip(1) {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '>' => return Some(index),
                _ => {}
            },
        }
    }
    None
}

fn tag_name(inner: &str) -> String {
    inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

fn parse_attributes(raw: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut chars = raw.trim_end_matches('/').chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == '/').is_some() {}
        let mut name = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != '=' && *c != '/') {
            name.push(c);
        }
        if name.is_empty() {
            break;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let mut value = String::new();
        if chars.next_if_eq(&'=').is_some() {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            match chars.peek().copied() {
                Some(q @ ('"' | '\'')) => {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == q {
                            break;
                        }
                        value.push(c);
                    }
                }
                _ => {
                    while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                        value.push(c);
                    }
                }
            }
        }
        attrs.push((name.to_ascii_lowercase(), decode_entities(&value)));
    }
    attrs
}

pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|semi| *semi <= 10)
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{00A0}',
        "laquo" => '«',
        "raquo" => '»',
        "mdash" => '—',
        "ndash" => '–',
        "hellip" => '…',
        "nbhy" | "shy" => '\u{00AD}',
        _ => return None,
    };
    Some(ch)
}

/// Escape text for inclusion in generated HTML.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}
