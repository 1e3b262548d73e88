use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::node::{new_element, new_text, NodeRef};
use std::rc::Rc;

/// Tags that never take children and close themselves.
const SELF_CLOSING_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Tags that belong in `<head>`; anything else forces the head closed.
const HEAD_TAGS: [&str; 9] = [
    "base", "basefont", "bgsound", "noscript", "link", "meta", "title", "style", "script",
];

/// Formatting elements re-opened after a mis-nested close.
const FORMATTING_TAGS: [&str; 2] = ["b", "i"];

lazy_static! {
    static ref ENTITIES: HashMap<&'static str, &'static str> = HashMap::from([
        ("&nbsp;", " "),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&amp;", "&"),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&cent;", "¢"),
        ("&pound;", "£"),
        ("&yen;", "¥"),
        ("&euro;", "€"),
        ("&copy;", "©"),
        ("&reg;", "®"),
        ("&ndash;", "–"),
        ("&mdash;", "—"),
        ("&shy;", "\u{00AD}"),
        ("&rsquo;", "’"),
        ("&#39;", "'"),
    ]);
}

fn is_self_closing(tag: &str) -> bool {
    SELF_CLOSING_TAGS.contains(&tag)
}

fn attach(parent: &NodeRef, node: &NodeRef) {
    node.borrow_mut().parent = Rc::downgrade(parent);
    parent.borrow_mut().children.push(node.clone());
}

/// Character-driven HTML parser: tokenizes and builds the tree in one walk,
/// recovering from missing and mis-nested tags instead of failing.
pub struct HtmlParser {
    unfinished: Vec<NodeRef>,
    in_script: bool,
}

impl HtmlParser {
    pub fn new() -> Self {
        HtmlParser { unfinished: Vec::new(), in_script: false }
    }

    pub fn parse(body: &str) -> NodeRef {
        let mut parser = HtmlParser::new();
        let chars: Vec<char> = body.chars().collect();
        let mut text = String::new();
        let mut i = 0;

        while i < chars.len() {
            if parser.in_script {
                // Raw text until the literal close tag; nothing inside a
                // script body is markup.
                if starts_with_at(&chars, i, "</script>") {
                    if !text.is_empty() {
                        parser.add_text(&text);
                        text.clear();
                    }
                    parser.add_tag("/script");
                    i += "</script>".len();
                } else {
                    text.push(chars[i]);
                    i += 1;
                }
                continue;
            }

            match chars[i] {
                '&' => {
                    // Entity: bounded scan for the terminating semicolon;
                    // unknown or unterminated entities stay literal.
                    let mut end = None;
                    for j in i + 1..chars.len().min(i + 12) {
                        if chars[j] == ';' {
                            end = Some(j);
                            break;
                        }
                    }
                    match end {
                        Some(j) => {
                            let entity: String = chars[i..=j].iter().collect();
                            match ENTITIES.get(entity.as_str()) {
                                Some(replacement) => text.push_str(replacement),
                                None => text.push_str(&entity),
                            }
                            i = j + 1;
                        }
                        None => {
                            text.push('&');
                            i += 1;
                        }
                    }
                }
                '<' => {
                    if !text.is_empty() {
                        parser.add_text(&text);
                        text.clear();
                    }
                    if starts_with_at(&chars, i, "<!--") {
                        // Comment: discard through "-->"; a '>' inside does
                        // not close it.
                        let mut j = i + 2;
                        let mut close = None;
                        while j + 2 < chars.len() {
                            if chars[j] == '-' && chars[j + 1] == '-' && chars[j + 2] == '>' {
                                close = Some(j + 3);
                                break;
                            }
                            j += 1;
                        }
                        i = close.unwrap_or(chars.len());
                        continue;
                    }
                    let mut j = i + 1;
                    let mut quote: Option<char> = None;
                    let mut tagtext = String::new();
                    while j < chars.len() {
                        let c = chars[j];
                        match quote {
                            Some(q) if c == q => {
                                quote = None;
                                tagtext.push(c);
                            }
                            Some(_) => tagtext.push(c),
                            None if c == '"' || c == '\'' => {
                                quote = Some(c);
                                tagtext.push(c);
                            }
                            None if c == '>' => break,
                            None => tagtext.push(c),
                        }
                        j += 1;
                    }
                    if j < chars.len() {
                        parser.add_tag(&tagtext);
                    }
                    i = j + 1;
                }
                c => {
                    text.push(c);
                    i += 1;
                }
            }
        }
        if !parser.in_script && !text.is_empty() {
            parser.add_text(&text);
        }
        parser.finish()
    }

    fn add_text(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.implicit_tags(None);
        let node = new_text(text);
        if let Some(parent) = self.unfinished.last() {
            attach(parent, &node);
        }
    }

    fn add_tag(&mut self, tagtext: &str) {
        // Doctypes and other bang tags carry no tree content.
        if tagtext.starts_with('!') {
            return;
        }
        let (tag, attributes, self_closed) = get_attributes(tagtext);
        if tag.is_empty() {
            return;
        }
        if let Some(name) = tag.strip_prefix('/') {
            self.implicit_tags(Some(&tag));
            if name == "ul" || name == "ol" {
                self.maybe_close_open("li");
            }
            if name == "script" {
                self.in_script = false;
            }
            self.close_tag(name);
        } else {
            self.implicit_tags(Some(&tag));
            if matches!(tag.as_str(), "p" | "li" | "button") && self.is_open(&tag) {
                self.close_tag(&tag);
            }
            let node = new_element(&tag, attributes);
            if is_self_closing(&tag) || self_closed {
                match self.unfinished.last() {
                    Some(parent) => attach(parent, &node),
                    None => self.unfinished.push(node),
                }
            } else {
                self.unfinished.push(node);
                if tag == "script" {
                    self.in_script = true;
                }
            }
        }
    }

    fn is_open(&self, tag: &str) -> bool {
        self.unfinished
            .iter()
            .any(|n| n.borrow().tag() == Some(tag))
    }

    fn maybe_close_open(&mut self, tag: &str) {
        if self.is_open(tag) {
            self.close_tag(tag);
        }
    }

    /// Closes the innermost open `name`. Anything above it on the stack is
    /// popped and attached where it stands; popped formatting elements
    /// ({b, i}) are re-opened afterwards so `<b>x<i>y</b>z</i>` yields a
    /// fresh sibling `<i>` for `z`.
    fn close_tag(&mut self, name: &str) {
        if self.unfinished.len() <= 1 {
            return;
        }
        let target = self
            .unfinished
            .iter()
            .rposition(|n| n.borrow().tag() == Some(name));
        let Some(target) = target else { return };
        if target == 0 {
            return;
        }
        let mut reopen: Vec<String> = Vec::new();
        while self.unfinished.len() > target {
            let node = self.unfinished.pop().expect("stack underflow");
            let is_target = self.unfinished.len() == target;
            if !is_target {
                let tag = node.borrow().tag().map(str::to_string);
                if let Some(tag) = tag {
                    if FORMATTING_TAGS.contains(&tag.as_str()) {
                        reopen.push(tag);
                    }
                }
            }
            if let Some(parent) = self.unfinished.last() {
                attach(parent, &node);
            }
        }
        // Outermost formatting element first, restoring the original order.
        for tag in reopen.iter().rev() {
            self.unfinished.push(new_element(tag, HashMap::new()));
        }
    }

    /// Inserts the html/head/body skeleton the document left implicit.
    /// `tag` is the incoming tag (with a leading `/` for close tags), or
    /// `None` for text.
    fn implicit_tags(&mut self, tag: Option<&str>) {
        loop {
            let open: Vec<String> = self
                .unfinished
                .iter()
                .map(|n| n.borrow().tag().unwrap_or("").to_string())
                .collect();
            if open.is_empty() && tag != Some("html") {
                self.add_tag("html");
            } else if open == ["html"] && !matches!(tag, Some("head") | Some("body") | Some("/html")) {
                if tag.is_some_and(|t| HEAD_TAGS.contains(&t)) {
                    self.add_tag("head");
                } else {
                    self.add_tag("body");
                }
            } else if open == ["html", "head"]
                && !(tag == Some("/head") || tag.is_some_and(|t| HEAD_TAGS.contains(&t)))
            {
                self.add_tag("/head");
            } else {
                break;
            }
        }
    }

    fn finish(mut self) -> NodeRef {
        if self.unfinished.is_empty() {
            self.add_tag("html");
        }
        while self.unfinished.len() > 1 {
            let node = self.unfinished.pop().expect("stack underflow");
            let parent = self.unfinished.last().expect("root missing").clone();
            attach(&parent, &node);
        }
        self.unfinished.pop().expect("root missing")
    }
}

fn starts_with_at(chars: &[char], at: usize, needle: &str) -> bool {
    let mut i = at;
    for c in needle.chars() {
        if chars.get(i) != Some(&c) {
            return false;
        }
        i += 1;
    }
    true
}

/// Splits a tag body into (name, attributes, self-closed). Attribute keys
/// are lowercased; values may be unquoted, `'…'` or `"…"`; bare attributes
/// map to the empty string.
fn get_attributes(tagtext: &str) -> (String, HashMap<String, String>, bool) {
    let mut trimmed = tagtext.trim();
    let mut self_closed = false;
    if !trimmed.starts_with('/') {
        if let Some(rest) = trimmed.strip_suffix('/') {
            trimmed = rest.trim_end();
            self_closed = true;
        }
    }
    let chars: Vec<char> = trimmed.chars().collect();
    let mut i = 0;

    let mut tag = String::new();
    while i < chars.len() && !chars[i].is_whitespace() {
        tag.push(chars[i]);
        i += 1;
    }
    let tag = tag.to_lowercase();

    let mut attributes = HashMap::new();
    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        let mut key = String::new();
        while i < chars.len() && chars[i] != '=' && !chars[i].is_whitespace() {
            key.push(chars[i]);
            i += 1;
        }
        let mut value = String::new();
        if i < chars.len() && chars[i] == '=' {
            i += 1;
            if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
                let quote = chars[i];
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    value.push(chars[i]);
                    i += 1;
                }
                i += 1;
            } else {
                while i < chars.len() && !chars[i].is_whitespace() {
                    value.push(chars[i]);
                    i += 1;
                }
            }
        }
        if !key.is_empty() {
            attributes.insert(key.to_lowercase(), value);
        }
    }
    (tag, attributes, self_closed)
}

/// Source-view parser: the same bytes rendered as markup inside a `<pre>`,
/// with `<b>` around tags and `<i>` around `<!…>` fragments. Text between
/// tags is preserved verbatim.
pub fn parse_source(body: &str) -> NodeRef {
    let html = new_element("html", HashMap::new());
    let body_el = new_element("body", HashMap::new());
    attach(&html, &body_el);
    let pre = new_element("pre", HashMap::new());
    attach(&body_el, &pre);

    let chars: Vec<char> = body.chars().collect();
    let mut text = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '<' {
            if !text.is_empty() {
                attach(&pre, &new_text(&text));
                text.clear();
            }
            let mut j = i + 1;
            let mut quote: Option<char> = None;
            while j < chars.len() {
                let c = chars[j];
                match quote {
                    Some(q) if c == q => quote = None,
                    Some(_) => {}
                    None if c == '"' || c == '\'' => quote = Some(c),
                    None if c == '>' => break,
                    None => {}
                }
                j += 1;
            }
            if j >= chars.len() {
                // Unterminated tag at end of input stays visible as text.
                text.extend(&chars[i..]);
                break;
            }
            let markup: String = chars[i..=j].iter().collect();
            let wrapper = if markup.starts_with("<!") { "i" } else { "b" };
            let el = new_element(wrapper, HashMap::new());
            attach(&el, &new_text(&markup));
            attach(&pre, &el);
            i = j + 1;
        } else {
            text.push(chars[i]);
            i += 1;
        }
    }
    if !text.is_empty() {
        attach(&pre, &new_text(&text));
    }
    html
}
