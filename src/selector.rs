use crate::node::NodeRef;

/// A parsed CSS selector. Dynamic dispatch is avoided on purpose: matching
/// and priority both pattern-match the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Tag(String),
    Class(String),
    /// Concatenated simple selectors, e.g. `a.red`.
    Sequence(Vec<Selector>),
    /// Whitespace combinator; `descendant` is the subject.
    Descendant {
        ancestor: Box<Selector>,
        descendant: Box<Selector>,
    },
    /// Comma group.
    Or(Vec<Selector>),
    /// `base:has(inner)` — matches when `base` matches and at least one
    /// direct child matches `inner`.
    Has {
        base: Box<Selector>,
        inner: Box<Selector>,
    },
    /// `base:visited`.
    Visited(Box<Selector>),
    /// Wrapper produced by `!important` declarations.
    Important(Box<Selector>),
}

impl Selector {
    /// Cascade priority. Rules are applied in ascending order, so a higher
    /// priority wins.
    pub fn priority(&self) -> i32 {
        match self {
            Selector::Tag(_) => 1,
            Selector::Class(_) => 1,
            Selector::Sequence(parts) => parts.iter().map(Selector::priority).sum(),
            Selector::Descendant { ancestor, descendant } => {
                ancestor.priority() + descendant.priority()
            }
            Selector::Or(branches) => branches.iter().map(Selector::priority).max().unwrap_or(0),
            Selector::Has { base, inner } => base.priority() + inner.priority(),
            Selector::Visited(base) => base.priority() + 1,
            Selector::Important(inner) => inner.priority() + 10_000,
        }
    }

    pub fn matches(&self, node: &NodeRef) -> bool {
        match self {
            Selector::Tag(tag) => node.borrow().tag() == Some(tag.as_str()),
            Selector::Class(name) => node
                .borrow()
                .get_attribute("class")
                .is_some_and(|classes| classes.split_whitespace().any(|c| c == name)),
            Selector::Sequence(parts) => parts.iter().all(|p| p.matches(node)),
            Selector::Descendant { ancestor, descendant } => {
                if !descendant.matches(node) {
                    return false;
                }
                let mut current = node.borrow().parent.upgrade();
                while let Some(p) = current {
                    if ancestor.matches(&p) {
                        return true;
                    }
                    current = p.borrow().parent.upgrade();
                }
                false
            }
            Selector::Or(branches) => branches.iter().any(|b| b.matches(node)),
            Selector::Has { base, inner } => {
                if !base.matches(node) {
                    return false;
                }
                let children = node.borrow().children.clone();
                children.iter().any(|c| inner.matches(c))
            }
            Selector::Visited(base) => base.matches(node) && node.borrow().is_visited(),
            Selector::Important(inner) => inner.matches(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{append_child, new_element};
    use std::collections::HashMap;

    fn el(tag: &str, class: Option<&str>) -> NodeRef {
        let mut attrs = HashMap::new();
        if let Some(c) = class {
            attrs.insert("class".to_string(), c.to_string());
        }
        new_element(tag, attrs)
    }

    #[test]
    fn tag_and_class_matching() {
        let a = el("a", Some("red bold"));
        assert!(Selector::Tag("a".into()).matches(&a));
        assert!(!Selector::Tag("p".into()).matches(&a));
        assert!(Selector::Class("red".into()).matches(&a));
        assert!(!Selector::Class("blue".into()).matches(&a));
    }

    #[test]
    fn descendant_matching() {
        let nav = el("nav", None);
        let div = el("div", None);
        let a = el("a", None);
        append_child(&nav, &div);
        append_child(&div, &a);
        let sel = Selector::Descendant {
            ancestor: Box::new(Selector::Tag("nav".into())),
            descendant: Box::new(Selector::Tag("a".into())),
        };
        assert!(sel.matches(&a));
        assert!(!sel.matches(&div));
    }

    #[test]
    fn has_matching() {
        let ul = el("ul", None);
        let li = el("li", None);
        append_child(&ul, &li);
        let sel = Selector::Has {
            base: Box::new(Selector::Tag("ul".into())),
            inner: Box::new(Selector::Tag("li".into())),
        };
        assert!(sel.matches(&ul));
        let empty = el("ul", None);
        assert!(!sel.matches(&empty));
    }

    #[test]
    fn visited_matching() {
        let a = el("a", None);
        let sel = Selector::Visited(Box::new(Selector::Tag("a".into())));
        assert!(!sel.matches(&a));
        a.borrow_mut().set_visited(true);
        assert!(sel.matches(&a));
        assert_eq!(sel.priority(), 2);
    }

    #[test]
    fn priorities() {
        let seq = Selector::Sequence(vec![
            Selector::Tag("a".into()),
            Selector::Class("red".into()),
        ]);
        assert_eq!(seq.priority(), 2);
        let desc = Selector::Descendant {
            ancestor: Box::new(Selector::Tag("nav".into())),
            descendant: Box::new(seq.clone()),
        };
        assert_eq!(desc.priority(), 3);
        let or = Selector::Or(vec![Selector::Tag("h1".into()), desc.clone()]);
        assert_eq!(or.priority(), 3);
        assert_eq!(Selector::Important(Box::new(or)).priority(), 10_003);
    }
}
