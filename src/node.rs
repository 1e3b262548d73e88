use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

pub type NodeRef = Rc<RefCell<HtmlNode>>;
pub type WeakNode = Weak<RefCell<HtmlNode>>;

/// One DOM node. The document owns the tree through `children`; `parent`
/// is a weak back-reference so a node never has two owners.
pub struct HtmlNode {
    pub data: NodeData,
    pub parent: WeakNode,
    pub children: Vec<NodeRef>,
    /// Resolved style, filled in by the cascade before layout.
    pub style: HashMap<String, String>,
}

pub enum NodeData {
    Text {
        text: String,
    },
    Element {
        tag: String,
        attributes: HashMap<String, String>,
        is_focused: bool,
        caret: usize,
        visited: bool,
        is_checked: bool,
    },
}

impl HtmlNode {
    pub fn tag(&self) -> Option<&str> {
        match &self.data {
            NodeData::Element { tag, .. } => Some(tag),
            NodeData::Text { .. } => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.data {
            NodeData::Text { text } => Some(text),
            NodeData::Element { .. } => None,
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        match &self.data {
            NodeData::Element { attributes, .. } => attributes.get(name).cloned(),
            NodeData::Text { .. } => None,
        }
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        if let NodeData::Element { attributes, .. } = &mut self.data {
            attributes.insert(name.to_string(), value.to_string());
        }
    }

    pub fn is_focused(&self) -> bool {
        matches!(self.data, NodeData::Element { is_focused: true, .. })
    }

    pub fn set_focused(&mut self, focused: bool) {
        if let NodeData::Element { is_focused, .. } = &mut self.data {
            *is_focused = focused;
        }
    }

    pub fn is_checked(&self) -> bool {
        matches!(self.data, NodeData::Element { is_checked: true, .. })
    }

    pub fn set_checked(&mut self, checked: bool) {
        if let NodeData::Element { is_checked, .. } = &mut self.data {
            *is_checked = checked;
        }
    }

    pub fn is_visited(&self) -> bool {
        matches!(self.data, NodeData::Element { visited: true, .. })
    }

    pub fn set_visited(&mut self, v: bool) {
        if let NodeData::Element { visited, .. } = &mut self.data {
            *visited = v;
        }
    }

    pub fn caret(&self) -> usize {
        match self.data {
            NodeData::Element { caret, .. } => caret,
            NodeData::Text { .. } => 0,
        }
    }

    pub fn set_caret(&mut self, at: usize) {
        if let NodeData::Element { caret, .. } = &mut self.data {
            *caret = at;
        }
    }
}

pub fn new_element(tag: &str, attributes: HashMap<String, String>) -> NodeRef {
    Rc::new(RefCell::new(HtmlNode {
        data: NodeData::Element {
            tag: tag.to_string(),
            attributes,
            is_focused: false,
            caret: 0,
            visited: false,
            is_checked: false,
        },
        parent: Weak::new(),
        children: Vec::new(),
        style: HashMap::new(),
    }))
}

pub fn new_text(text: &str) -> NodeRef {
    Rc::new(RefCell::new(HtmlNode {
        data: NodeData::Text { text: text.to_string() },
        parent: Weak::new(),
        children: Vec::new(),
        style: HashMap::new(),
    }))
}

/// Detaches `child` from its current parent, if any.
pub fn detach(child: &NodeRef) {
    let parent = child.borrow().parent.upgrade();
    if let Some(parent) = parent {
        parent
            .borrow_mut()
            .children
            .retain(|c| !Rc::ptr_eq(c, child));
    }
    child.borrow_mut().parent = Weak::new();
}

pub fn append_child(parent: &NodeRef, child: &NodeRef) {
    detach(child);
    child.borrow_mut().parent = Rc::downgrade(parent);
    parent.borrow_mut().children.push(child.clone());
}

/// Inserts `child` before `reference`, or appends when `reference` is
/// absent or not found.
pub fn insert_before(parent: &NodeRef, child: &NodeRef, reference: Option<&NodeRef>) {
    detach(child);
    child.borrow_mut().parent = Rc::downgrade(parent);
    let mut parent_mut = parent.borrow_mut();
    let at = reference
        .and_then(|r| parent_mut.children.iter().position(|c| Rc::ptr_eq(c, r)));
    match at {
        Some(i) => parent_mut.children.insert(i, child.clone()),
        None => parent_mut.children.push(child.clone()),
    }
}

pub fn remove_child(parent: &NodeRef, child: &NodeRef) -> bool {
    let mut parent_mut = parent.borrow_mut();
    let before = parent_mut.children.len();
    parent_mut.children.retain(|c| !Rc::ptr_eq(c, child));
    let removed = parent_mut.children.len() != before;
    if removed {
        child.borrow_mut().parent = Weak::new();
    }
    removed
}

/// Pre-order traversal into `out`.
pub fn tree_to_vec(node: &NodeRef, out: &mut Vec<NodeRef>) {
    out.push(node.clone());
    let children = node.borrow().children.clone();
    for child in children {
        tree_to_vec(&child, out);
    }
}

pub fn find_element_by_id(root: &NodeRef, id: &str) -> Option<NodeRef> {
    let mut all = Vec::new();
    tree_to_vec(root, &mut all);
    all.into_iter()
        .find(|n| n.borrow().get_attribute("id").as_deref() == Some(id))
}

/// Concatenated text content of the subtree.
pub fn tree_text(node: &NodeRef) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &NodeRef, out: &mut String) {
    {
        let n = node.borrow();
        if let Some(text) = n.text() {
            if !out.is_empty() && !out.ends_with(' ') {
                out.push(' ');
            }
            out.push_str(text);
        }
    }
    let children = node.borrow().children.clone();
    for child in children {
        collect_text(&child, out);
    }
}

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Serializes the subtree back to HTML (innerHTML/outerHTML).
pub fn to_html(node: &NodeRef) -> String {
    let n = node.borrow();
    match &n.data {
        NodeData::Text { text } => escape_text(text),
        NodeData::Element { tag, attributes, .. } => {
            let mut out = format!("<{tag}");
            let mut keys: Vec<&String> = attributes.keys().collect();
            keys.sort();
            for key in keys {
                let value = &attributes[key];
                if value.is_empty() {
                    out.push_str(&format!(" {key}"));
                } else {
                    out.push_str(&format!(" {key}=\"{}\"", value.replace('"', "&quot;")));
                }
            }
            out.push('>');
            if VOID_TAGS.contains(&tag.as_str()) {
                return out;
            }
            for child in &n.children {
                out.push_str(&to_html(child));
            }
            out.push_str(&format!("</{tag}>"));
            out
        }
    }
}

/// Serializes only the children (innerHTML).
pub fn inner_html(node: &NodeRef) -> String {
    node.borrow().children.iter().map(to_html).collect()
}

/// Compact tree representation used by parser tests:
/// elements as `tag[child,…]`, text as `'text'`.
pub fn debug_string(node: &NodeRef) -> String {
    let n = node.borrow();
    match &n.data {
        NodeData::Text { text } => format!("'{text}'"),
        NodeData::Element { tag, .. } => {
            let children: Vec<String> = n.children.iter().map(debug_string).collect();
            if children.is_empty() {
                tag.clone()
            } else {
                format!("{}[{}]", tag, children.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_reparents() {
        let a = new_element("div", HashMap::new());
        let b = new_element("p", HashMap::new());
        let child = new_text("x");
        append_child(&a, &child);
        append_child(&b, &child);
        assert!(a.borrow().children.is_empty());
        assert_eq!(b.borrow().children.len(), 1);
        assert!(Rc::ptr_eq(&child.borrow().parent.upgrade().unwrap(), &b));
    }

    #[test]
    fn insert_before_positions() {
        let parent = new_element("div", HashMap::new());
        let first = new_text("a");
        let second = new_text("b");
        append_child(&parent, &second);
        insert_before(&parent, &first, Some(&second));
        assert_eq!(debug_string(&parent), "div['a','b']");
    }

    #[test]
    fn remove_detaches() {
        let parent = new_element("div", HashMap::new());
        let child = new_text("a");
        append_child(&parent, &child);
        assert!(remove_child(&parent, &child));
        assert!(parent.borrow().children.is_empty());
        assert!(child.borrow().parent.upgrade().is_none());
        assert!(!remove_child(&parent, &child));
    }

    #[test]
    fn finds_by_id() {
        let root = new_element("html", HashMap::new());
        let mut attrs = HashMap::new();
        attrs.insert("id".to_string(), "target".to_string());
        let inner = new_element("div", attrs);
        append_child(&root, &inner);
        assert!(find_element_by_id(&root, "target").is_some());
        assert!(find_element_by_id(&root, "other").is_none());
    }
}
