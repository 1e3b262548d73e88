use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::css_parser::{CssParser, Rule};
use crate::node::NodeRef;

lazy_static! {
    /// Properties that flow from parent to child, with their root defaults.
    static ref INHERITED_PROPERTIES: Vec<(&'static str, &'static str)> = vec![
        ("font-size", "16px"),
        ("font-style", "normal"),
        ("font-weight", "normal"),
        ("font-family", ""),
        ("color", "black"),
        ("white-space", "normal"),
        ("text-align", "left"),
    ];
}

/// Sorts rules into cascade order. The sort is stable, so rules with equal
/// priority keep their sheet order.
pub fn sort_rules(rules: &mut [Rule]) {
    rules.sort_by_key(Rule::priority);
}

/// Resolves style for `node` and its subtree. `rules` must already be in
/// ascending priority order; the inline `style` attribute is applied last.
/// Percent font sizes are resolved against the parent and stored back in
/// absolute pixels.
pub fn style(node: &NodeRef, rules: &[Rule]) {
    let parent = node.borrow().parent.upgrade();
    let mut resolved: HashMap<String, String> = HashMap::new();

    for (prop, default) in INHERITED_PROPERTIES.iter() {
        let value = match &parent {
            Some(p) => p
                .borrow()
                .style
                .get(*prop)
                .cloned()
                .unwrap_or_else(|| default.to_string()),
            None => default.to_string(),
        };
        resolved.insert(prop.to_string(), value);
    }

    for rule in rules {
        if rule.selector.matches(node) {
            for (prop, value) in &rule.declarations {
                resolved.insert(prop.clone(), value.clone());
            }
        }
    }

    if let Some(inline) = node.borrow().get_attribute("style") {
        for (prop, value) in CssParser::parse_inline(&inline) {
            resolved.insert(prop, value);
        }
    }

    if let Some(size) = resolved.get("font-size").cloned() {
        if let Some(pct) = size.strip_suffix('%') {
            let parent_px = match &parent {
                Some(p) => p
                    .borrow()
                    .style
                    .get("font-size")
                    .map(|s| length_px(s))
                    .unwrap_or(16.0),
                None => 16.0,
            };
            let pct: f32 = pct.trim().parse().unwrap_or(100.0);
            resolved.insert("font-size".into(), format!("{}px", parent_px * pct / 100.0));
        }
    }

    node.borrow_mut().style = resolved;

    let children = node.borrow().children.clone();
    for child in children {
        style(&child, rules);
    }
}

/// Resolves a CSS length to pixels: `px` as-is, `em`/`rem` as 16× the
/// number, `%` as 16 × n/100. Anything unparseable falls back to 16.
pub fn length_px(value: &str) -> f32 {
    let value = value.trim();
    if let Some(n) = value.strip_suffix("px") {
        return n.trim().parse().unwrap_or(16.0);
    }
    if let Some(n) = value.strip_suffix("rem").or_else(|| value.strip_suffix("em")) {
        return n.trim().parse::<f32>().map(|n| 16.0 * n).unwrap_or(16.0);
    }
    if let Some(n) = value.strip_suffix('%') {
        return n.trim().parse::<f32>().map(|n| 16.0 * n / 100.0).unwrap_or(16.0);
    }
    value.parse().unwrap_or(16.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css_parser::CssParser;
    use crate::html_parser::HtmlParser;
    use crate::node::{find_element_by_id, tree_to_vec};

    fn styled(html: &str, sheet: &str) -> NodeRef {
        let root = HtmlParser::parse(html);
        let mut rules = CssParser::new(sheet).parse();
        sort_rules(&mut rules);
        style(&root, &rules);
        root
    }

    fn style_of(root: &NodeRef, tag: &str) -> HashMap<String, String> {
        let mut all = Vec::new();
        tree_to_vec(root, &mut all);
        all.iter()
            .find(|n| n.borrow().tag() == Some(tag))
            .map(|n| n.borrow().style.clone())
            .unwrap()
    }

    #[test]
    fn higher_priority_wins() {
        let root = styled(
            "<p class=hot>x</p>",
            "p { color: blue; } p.hot { color: red; }",
        );
        assert_eq!(style_of(&root, "p").get("color").unwrap(), "red");
    }

    #[test]
    fn important_beats_later_normal_rules() {
        let root = styled(
            "<p class=hot>x</p>",
            "p { color: blue !important; } p.hot { color: red; }",
        );
        assert_eq!(style_of(&root, "p").get("color").unwrap(), "blue");
    }

    #[test]
    fn inline_style_wins() {
        let root = styled(
            "<p style=\"color: green\">x</p>",
            "p { color: blue !important; }",
        );
        assert_eq!(style_of(&root, "p").get("color").unwrap(), "green");
    }

    #[test]
    fn color_inherits() {
        let root = styled("<div><p>x</p></div>", "div { color: red; }");
        assert_eq!(style_of(&root, "p").get("color").unwrap(), "red");
    }

    #[test]
    fn percent_font_size_resolves_against_parent() {
        let root = styled(
            "<div id=outer><p id=inner>x</p></div>",
            "div { font-size: 20px; } p { font-size: 50%; }",
        );
        let inner = find_element_by_id(&root, "inner").unwrap();
        assert_eq!(inner.borrow().style.get("font-size").unwrap(), "10px");
    }

    #[test]
    fn every_node_has_absolute_font_size() {
        let root = styled("<h1>big</h1><p>small</p>", "h1 { font-size: 150% }");
        let mut all = Vec::new();
        tree_to_vec(&root, &mut all);
        for node in all {
            let style = node.borrow().style.clone();
            let size = style.get("font-size").unwrap();
            assert!(!size.ends_with('%'), "unresolved size {size}");
        }
    }

    #[test]
    fn lengths() {
        assert_eq!(length_px("12px"), 12.0);
        assert_eq!(length_px("2em"), 32.0);
        assert_eq!(length_px("1rem"), 16.0);
        assert_eq!(length_px("50%"), 8.0);
        assert_eq!(length_px("banana"), 16.0);
    }
}
