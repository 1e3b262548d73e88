use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use egui::{Color32, FontFamily, FontId, Galley};

use crate::display::{parse_color, DrawCommand, Rect};
use crate::node::{append_child, new_element, new_text, NodeRef};
use crate::style::length_px;

pub const HSTEP: f32 = 13.0;
pub const VSTEP: f32 = 18.0;

const INPUT_WIDTH: f32 = 200.0;
const CHECKBOX_SIZE: f32 = 16.0;
const SOFT_HYPHEN: char = '\u{00AD}';

const BLOCK_ELEMENTS: [&str; 37] = [
    "html", "body", "article", "section", "nav", "aside", "h1", "h2", "h3", "h4", "h5", "h6",
    "hgroup", "header", "footer", "address", "p", "hr", "pre", "blockquote", "ol", "ul", "menu",
    "li", "dl", "dt", "dd", "figure", "figcaption", "main", "div", "table", "form", "fieldset",
    "legend", "details", "summary",
];

pub type LayoutRef = Rc<RefCell<LayoutNode>>;

/// One object in the layout tree. Rebuilt from scratch on every render
/// pass; boxes are in page coordinates.
pub struct LayoutNode {
    pub kind: LayoutKind,
    /// The DOM nodes this object lays out. Exactly one for ordinary
    /// blocks; several for anonymous blocks wrapping a run of inline
    /// children.
    pub nodes: Vec<NodeRef>,
    pub parent: Weak<RefCell<LayoutNode>>,
    pub previous: Option<LayoutRef>,
    pub children: Vec<LayoutRef>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

pub enum LayoutKind {
    Document,
    Block,
    Line,
    Text(TextPiece),
    Input(InputPiece),
}

/// A measured word on a line.
pub struct TextPiece {
    pub word: String,
    pub galley: Arc<Galley>,
    pub color: Color32,
    pub ascent: f32,
    pub descent: f32,
    pub top_aligned: bool,
}

/// A form field or button box; paint data is precomputed at layout time so
/// painting needs no toolkit context.
pub struct InputPiece {
    pub galley: Option<Arc<Galley>>,
    pub text_color: Color32,
    pub background: Option<Color32>,
    pub outline: Option<(Color32, f32)>,
    pub padding: f32,
    pub border: f32,
    /// Caret x relative to the box, present when the element is focused.
    pub caret_x: Option<f32>,
    pub checkbox: bool,
    pub checked: bool,
    pub ascent: f32,
    pub descent: f32,
}

impl LayoutNode {
    fn new(kind: LayoutKind, nodes: Vec<NodeRef>) -> LayoutRef {
        Rc::new(RefCell::new(LayoutNode {
            kind,
            nodes,
            parent: Weak::new(),
            previous: None,
            children: Vec::new(),
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        }))
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

/// Lays out the whole document: the viewport margins come from the page
/// steps, a single block child carries the tree.
pub fn layout_document(
    ctx: &egui::Context,
    root: &NodeRef,
    viewport_width: f32,
    rtl: bool,
) -> LayoutRef {
    let doc = LayoutNode::new(LayoutKind::Document, vec![root.clone()]);
    {
        let mut d = doc.borrow_mut();
        d.x = HSTEP;
        d.y = VSTEP;
        d.width = (viewport_width - 2.0 * HSTEP).max(0.0);
    }
    let child = LayoutNode::new(LayoutKind::Block, vec![root.clone()]);
    child.borrow_mut().parent = Rc::downgrade(&doc);
    doc.borrow_mut().children.push(child.clone());
    layout_block(&child, ctx, rtl);
    let height = child.borrow().height;
    doc.borrow_mut().height = height;
    doc
}

fn display_of(node: &NodeRef) -> Option<String> {
    node.borrow().style.get("display").cloned()
}

fn is_block_node(node: &NodeRef) -> bool {
    let b = node.borrow();
    if !b.is_element() {
        return false;
    }
    match b.style.get("display").map(String::as_str) {
        Some("block") => true,
        Some(_) => false,
        None => BLOCK_ELEMENTS.contains(&b.tag().unwrap_or("")),
    }
}

fn single_element(this: &LayoutRef) -> Option<NodeRef> {
    let b = this.borrow();
    if b.nodes.len() == 1 && b.nodes[0].borrow().is_element() {
        Some(b.nodes[0].clone())
    } else {
        None
    }
}

fn layout_block(this: &LayoutRef, ctx: &egui::Context, rtl: bool) {
    {
        let parent = this.borrow().parent.upgrade();
        let previous = this.borrow().previous.clone();
        let (px, py, pw) = match &parent {
            Some(p) => {
                let p = p.borrow();
                (p.x, p.y, p.width)
            }
            None => (HSTEP, VSTEP, 0.0),
        };
        let y = match &previous {
            Some(prev) => {
                let prev = prev.borrow();
                prev.y + prev.height
            }
            None => py,
        };
        let mut b = this.borrow_mut();
        b.x = px;
        b.width = pw;
        b.y = y;
    }

    let single = single_element(this);

    if let Some(node) = &single {
        if display_of(node).as_deref() == Some("none") {
            let mut b = this.borrow_mut();
            b.width = 0.0;
            b.height = 0.0;
            return;
        }
    }

    // Vertical steps: a gap before p/h1/h2 content and after p content.
    let tag = single.as_ref().and_then(|n| n.borrow().tag().map(str::to_string));
    let lead = if matches!(tag.as_deref(), Some("p" | "h1" | "h2")) { VSTEP } else { 0.0 };
    let trail = if tag.as_deref() == Some("p") { VSTEP } else { 0.0 };

    let block_children = single
        .as_ref()
        .map(|n| n.borrow().children.iter().any(is_block_node))
        .unwrap_or(false);

    if block_children {
        layout_block_children(this, ctx, rtl);
    } else {
        layout_inline(this, ctx, rtl, lead, trail);
    }
}

/// Groups the element's children into block boxes: consecutive inline
/// children become one anonymous block, block children stand alone, `h6`
/// run-ins join the next block, `display: none` children are skipped, and
/// a `<nav id=toc>` gets a synthesized heading block.
fn layout_block_children(this: &LayoutRef, ctx: &egui::Context, rtl: bool) {
    let node = single_element(this).expect("block grouping requires an element");
    let dom_children = node.borrow().children.clone();

    let mut groups: Vec<Vec<NodeRef>> = Vec::new();
    let mut run: Vec<NodeRef> = Vec::new();
    let mut runin: Vec<NodeRef> = Vec::new();

    for child in dom_children {
        if display_of(&child).as_deref() == Some("none") {
            continue;
        }
        let tag = child.borrow().tag().map(str::to_string);
        if tag.as_deref() == Some("h6") {
            if !run.is_empty() {
                groups.push(std::mem::take(&mut run));
            }
            runin.push(child);
            continue;
        }
        if is_block_node(&child) {
            if !run.is_empty() {
                groups.push(std::mem::take(&mut run));
            }
            if tag.as_deref() == Some("nav")
                && child.borrow().get_attribute("id").as_deref() == Some("toc")
            {
                groups.push(vec![toc_heading()]);
            }
            let mut group = std::mem::take(&mut runin);
            group.push(child);
            groups.push(group);
        } else {
            // Inline content after a pending run-in folds it back into the
            // flow.
            if !runin.is_empty() {
                run.append(&mut runin);
            }
            run.push(child);
        }
    }
    if !runin.is_empty() {
        run.append(&mut runin);
    }
    if !run.is_empty() {
        groups.push(run);
    }

    let mut previous: Option<LayoutRef> = None;
    for group in groups {
        let child = LayoutNode::new(LayoutKind::Block, group);
        child.borrow_mut().parent = Rc::downgrade(this);
        child.borrow_mut().previous = previous.clone();
        this.borrow_mut().children.push(child.clone());
        layout_block(&child, ctx, rtl);
        previous = Some(child);
    }

    let height: f32 = this
        .borrow()
        .children
        .iter()
        .map(|c| c.borrow().height)
        .sum();
    this.borrow_mut().height = height;
}

fn toc_heading() -> NodeRef {
    let pre = new_element("pre", Default::default());
    append_child(&pre, &new_text("Table of Contents"));
    pre
}

/// Transient state of the inline walk: the pieces of the line being built,
/// with x positions relative to the line start.
struct InlineState {
    items: Vec<LayoutRef>,
    cursor_x: f32,
}

/// Font/transform modifiers pushed by `<sup>` and `<abbr>`.
#[derive(Clone, Copy, Default)]
struct InlineMods {
    size: Option<f32>,
    uppercase: bool,
    top_aligned: bool,
}

fn layout_inline(this: &LayoutRef, ctx: &egui::Context, rtl: bool, lead: f32, trail: f32) {
    let mut state = InlineState { items: Vec::new(), cursor_x: 0.0 };
    let nodes = this.borrow().nodes.clone();
    for node in &nodes {
        inline_recurse(this, node, ctx, &mut state, InlineMods::default());
    }
    flush_line(this, &mut state);

    let (x, y, width) = {
        let b = this.borrow();
        (b.x, b.y, b.width)
    };
    let mut cursor_y = y + lead;
    let lines = this.borrow().children.clone();
    for line in &lines {
        {
            let mut l = line.borrow_mut();
            l.x = x;
            l.y = cursor_y;
            l.width = width;
        }
        layout_line(line, ctx, rtl);
        cursor_y += line.borrow().height;
    }
    this.borrow_mut().height = cursor_y - y + trail;
}

fn inline_recurse(
    block: &LayoutRef,
    node: &NodeRef,
    ctx: &egui::Context,
    state: &mut InlineState,
    mods: InlineMods,
) {
    enum Step {
        Text(String, bool),
        Element(String, Vec<NodeRef>),
        Skip,
    }
    let step = {
        let b = node.borrow();
        match b.text() {
            Some(text) => {
                let pre = b.style.get("white-space").map(String::as_str) == Some("pre");
                Step::Text(text.to_string(), pre)
            }
            None => {
                if b.style.get("display").map(String::as_str) == Some("none") {
                    Step::Skip
                } else {
                    Step::Element(b.tag().unwrap_or("").to_string(), b.children.clone())
                }
            }
        }
    };
    match step {
        Step::Skip => {}
        Step::Text(text, pre) => {
            if pre {
                for (i, segment) in text.split('\n').enumerate() {
                    if i > 0 {
                        flush_line(block, state);
                    }
                    if !segment.is_empty() {
                        place_word(block, node, segment, ctx, state, mods, true);
                    }
                }
            } else {
                for word in text.split_whitespace() {
                    place_word(block, node, word, ctx, state, mods, false);
                }
            }
        }
        Step::Element(tag, children) => match tag.as_str() {
            "br" => flush_line(block, state),
            "input" | "button" => place_input(block, node, ctx, state),
            "sup" => {
                let mods = InlineMods { size: Some(8.0), top_aligned: true, ..mods };
                for child in children {
                    inline_recurse(block, &child, ctx, state, mods);
                }
            }
            "abbr" => {
                let mods = InlineMods { size: Some(10.0), uppercase: true, ..mods };
                for child in children {
                    inline_recurse(block, &child, ctx, state, mods);
                }
            }
            _ => {
                for child in children {
                    inline_recurse(block, &child, ctx, state, mods);
                }
            }
        },
    }
}

fn flush_line(block: &LayoutRef, state: &mut InlineState) {
    state.cursor_x = 0.0;
    if state.items.is_empty() {
        return;
    }
    let nodes = block.borrow().nodes.clone();
    let line = LayoutNode::new(LayoutKind::Line, nodes);
    line.borrow_mut().parent = Rc::downgrade(block);
    line.borrow_mut().previous = block.borrow().children.last().cloned();
    for item in state.items.drain(..) {
        item.borrow_mut().parent = Rc::downgrade(&line);
        line.borrow_mut().children.push(item);
    }
    block.borrow_mut().children.push(line);
}

fn font_for(node: &NodeRef, mods: InlineMods) -> FontId {
    let borrowed = node.borrow();
    let style = &borrowed.style;
    let size = mods
        .size
        .unwrap_or_else(|| style.get("font-size").map(|s| length_px(s)).unwrap_or(16.0));
    let family = match style.get("font-family") {
        Some(f) if f.to_lowercase().contains("mono") => FontFamily::Monospace,
        _ => FontFamily::Proportional,
    };
    FontId::new(size.max(1.0), family)
}

fn color_for(node: &NodeRef) -> Color32 {
    node.borrow()
        .style
        .get("color")
        .and_then(|c| parse_color(c))
        .unwrap_or(Color32::BLACK)
}

fn measure(ctx: &egui::Context, text: &str, font: &FontId, color: Color32) -> Arc<Galley> {
    ctx.fonts_mut(|fonts| fonts.layout_no_wrap(text.to_string(), font.clone(), color))
}

fn galley_metrics(galley: &Arc<Galley>) -> (f32, f32) {
    if let Some(row) = galley.rows.first() {
        if let Some(glyph) = row.row.glyphs.first() {
            return (glyph.font_ascent, glyph.font_height - glyph.font_ascent);
        }
    }
    let h = galley.size().y;
    (0.8 * h, 0.2 * h)
}

fn place_word(
    block: &LayoutRef,
    node: &NodeRef,
    word: &str,
    ctx: &egui::Context,
    state: &mut InlineState,
    mods: InlineMods,
    preserve: bool,
) {
    let font = font_for(node, mods);
    let color = color_for(node);
    let top_aligned = mods.top_aligned
        || node
            .borrow()
            .parent
            .upgrade()
            .is_some_and(|p| p.borrow().style.get("vertical-align").map(String::as_str) == Some("top"));
    let width = block.borrow().width;
    let space = measure(ctx, " ", &font, color).size().x;

    let mut rest = if mods.uppercase { word.to_uppercase() } else { word.to_string() };
    loop {
        let visible = rest.replace(SOFT_HYPHEN, "");
        let galley = measure(ctx, &visible, &font, color);
        let w = galley.size().x;
        if preserve || state.cursor_x + w <= width || width <= 0.0 {
            emit_word(node, state, visible, galley, color, top_aligned, space);
            return;
        }
        if rest.contains(SOFT_HYPHEN) {
            // Greedy: the longest prefix of hyphen-separated parts that
            // still fits, rendered with a trailing dash.
            let parts: Vec<&str> = rest.split(SOFT_HYPHEN).collect();
            let mut fit = None;
            for k in (1..parts.len()).rev() {
                let candidate = format!("{}-", parts[..k].join(""));
                let galley = measure(ctx, &candidate, &font, color);
                if state.cursor_x + galley.size().x <= width {
                    fit = Some((candidate, galley, k));
                    break;
                }
            }
            if let Some((candidate, galley, k)) = fit {
                emit_word(node, state, candidate, galley, color, top_aligned, space);
                flush_line(block, state);
                rest = parts[k..].join(&SOFT_HYPHEN.to_string());
                continue;
            }
        }
        if state.cursor_x > 0.0 {
            flush_line(block, state);
            continue;
        }
        // Wider than the whole line: place it anyway.
        emit_word(node, state, visible, galley, color, top_aligned, space);
        return;
    }
}

fn emit_word(
    node: &NodeRef,
    state: &mut InlineState,
    word: String,
    galley: Arc<Galley>,
    color: Color32,
    top_aligned: bool,
    space: f32,
) {
    let (ascent, descent) = galley_metrics(&galley);
    let w = galley.size().x;
    let piece = LayoutNode::new(
        LayoutKind::Text(TextPiece { word, galley, color, ascent, descent, top_aligned }),
        vec![node.clone()],
    );
    {
        let mut p = piece.borrow_mut();
        p.x = state.cursor_x;
        p.width = w;
        p.height = ascent + descent;
    }
    state.items.push(piece);
    state.cursor_x += w + space;
}

fn place_input(block: &LayoutRef, node: &NodeRef, ctx: &egui::Context, state: &mut InlineState) {
    let (tag, input_type, style, focused, checked, caret, value_attr) = {
        let b = node.borrow();
        (
            b.tag().unwrap_or("").to_string(),
            b.get_attribute("type").unwrap_or_default(),
            b.style.clone(),
            b.is_focused(),
            b.is_checked(),
            b.caret(),
            b.get_attribute("value").unwrap_or_default(),
        )
    };
    let checkbox = tag == "input" && input_type == "checkbox";
    let hidden = input_type == "hidden";

    let box_width = if hidden {
        0.0
    } else if let Some(w) = style.get("width") {
        length_px(w)
    } else if checkbox {
        CHECKBOX_SIZE
    } else {
        INPUT_WIDTH
    };

    let border = match style.get("border-style") {
        Some(_) => style.get("border-width").map(|w| length_px(w)).unwrap_or(1.0),
        None => 0.0,
    };
    let padding = style.get("padding-top").map(|p| length_px(p)).unwrap_or(0.0);

    let font = font_for(node, InlineMods::default());
    let color = color_for(node);
    let (font_ascent, font_descent) = galley_metrics(&measure(ctx, "Ag", &font, color));

    let (ascent, descent) = if checkbox {
        (CHECKBOX_SIZE, 0.0)
    } else {
        (font_ascent + padding + border, font_descent + padding + border)
    };

    // The visible value: buttons show their single text child, password
    // fields mask every character.
    let structured_button = tag == "button"
        && node.borrow().children.iter().any(|c| c.borrow().is_element());
    let text = if checkbox || hidden {
        String::new()
    } else if tag == "button" {
        if structured_button {
            String::new()
        } else {
            node.borrow()
                .children
                .first()
                .and_then(|c| c.borrow().text().map(str::to_string))
                .unwrap_or_default()
        }
    } else if input_type == "password" {
        "*".repeat(value_attr.chars().count())
    } else {
        value_attr.clone()
    };

    // Clip to the inner box by dropping characters that do not fit.
    let inner_width = (box_width - 2.0 * (padding + border)).max(0.0);
    let mut shown = text.clone();
    let mut galley = measure(ctx, &shown, &font, color);
    while galley.size().x > inner_width && !shown.is_empty() {
        shown.pop();
        galley = measure(ctx, &shown, &font, color);
    }
    let galley = (!shown.is_empty()).then_some(galley);

    let caret_x = (focused && !checkbox).then(|| {
        let upto: String = text.chars().take(caret.min(text.chars().count())).collect();
        border + padding + measure(ctx, &upto, &font, color).size().x
    });

    let piece = InputPiece {
        galley,
        text_color: color,
        background: style.get("background-color").and_then(|c| parse_color(c)),
        outline: (border > 0.0).then(|| {
            (
                style
                    .get("border-color")
                    .and_then(|c| parse_color(c))
                    .unwrap_or(Color32::BLACK),
                border,
            )
        }),
        padding,
        border,
        caret_x,
        checkbox,
        checked,
        ascent,
        descent,
    };

    let width = block.borrow().width;
    if state.cursor_x + box_width > width && state.cursor_x > 0.0 {
        flush_line(block, state);
    }

    let space = measure(ctx, " ", &font, color).size().x;
    let item = LayoutNode::new(LayoutKind::Input(piece), vec![node.clone()]);
    {
        let mut i = item.borrow_mut();
        i.x = state.cursor_x;
        i.width = box_width;
        i.height = ascent + descent;
    }
    state.items.push(item);
    state.cursor_x += box_width + space;
}

fn layout_line(line: &LayoutRef, ctx: &egui::Context, rtl: bool) {
    let items = line.borrow().children.clone();
    if items.is_empty() {
        line.borrow_mut().height = 0.0;
        return;
    }
    let (line_x, line_y, line_width) = {
        let l = line.borrow();
        (l.x, l.y, l.width)
    };
    let mut max_ascent: f32 = 0.0;
    let mut max_descent: f32 = 0.0;
    for item in &items {
        let i = item.borrow();
        let (a, d) = match &i.kind {
            LayoutKind::Text(t) => (t.ascent, t.descent),
            LayoutKind::Input(p) => (p.ascent, p.descent),
            _ => (0.0, 0.0),
        };
        max_ascent = max_ascent.max(a);
        max_descent = max_descent.max(d);
    }
    let baseline = line_y + 1.25 * max_ascent;

    for item in &items {
        let structured = {
            let mut i = item.borrow_mut();
            i.x += line_x;
            if rtl {
                i.x = line_x + line_width - (i.x - line_x) - i.width;
            }
            match &i.kind {
                LayoutKind::Text(t) => {
                    i.y = if t.top_aligned {
                        baseline - 1.25 * max_ascent
                    } else {
                        baseline - t.ascent
                    };
                    false
                }
                LayoutKind::Input(p) => {
                    i.y = baseline - p.ascent;
                    // A button with element children carries an inner block.
                    i.nodes[0].borrow().tag() == Some("button")
                        && i.nodes[0].borrow().children.iter().any(|c| c.borrow().is_element())
                }
                _ => false,
            }
        };
        if structured {
            let inner_node = item.borrow().nodes[0].clone();
            let inner = LayoutNode::new(LayoutKind::Block, vec![inner_node]);
            inner.borrow_mut().parent = Rc::downgrade(item);
            item.borrow_mut().children.push(inner.clone());
            layout_block(&inner, ctx, rtl);
        }
    }

    line.borrow_mut().height = 1.25 * (max_ascent + max_descent);
}

/// Pre-order paint walk producing the display list.
pub fn paint_tree(layout: &LayoutRef, list: &mut Vec<DrawCommand>) {
    paint(layout, list);
    let children = layout.borrow().children.clone();
    for child in children {
        paint_tree(&child, list);
    }
}

fn paint(layout: &LayoutRef, list: &mut Vec<DrawCommand>) {
    let l = layout.borrow();
    let rect = l.rect();
    match &l.kind {
        LayoutKind::Document | LayoutKind::Line => {}
        LayoutKind::Block => {
            let Some(node) = l.nodes.first().filter(|_| l.nodes.len() == 1) else { return };
            if let Some(bg) = node
                .borrow()
                .style
                .get("background-color")
                .and_then(|c| parse_color(c))
            {
                list.push(DrawCommand::rect(rect, bg, Some(node.clone())));
            }
            if node.borrow().tag() == Some("li") {
                let marker = Rect::new(l.x - 8.0, l.y + 14.0, l.x - 4.0, l.y + 18.0);
                list.push(DrawCommand::rect(marker, Color32::BLACK, None));
            }
        }
        LayoutKind::Text(piece) => {
            list.push(DrawCommand::text(
                rect,
                piece.galley.clone(),
                piece.color,
                l.nodes.first().cloned(),
            ));
        }
        LayoutKind::Input(piece) => {
            let node = l.nodes.first().cloned();
            if let Some(bg) = piece.background {
                list.push(DrawCommand::rect(rect, bg, node.clone()));
            }
            if let Some((color, thickness)) = piece.outline {
                list.push(DrawCommand::outline(rect, color, thickness, node.clone()));
            }
            if piece.checkbox && piece.checked {
                let inset = 4.0;
                let inner = Rect::new(
                    l.x + inset,
                    l.y + inset,
                    l.x + l.width - inset,
                    l.y + l.height - inset,
                );
                list.push(DrawCommand::rect(inner, Color32::BLACK, node.clone()));
            }
            if let Some(galley) = &piece.galley {
                let text_rect = Rect::new(
                    l.x + piece.border + piece.padding,
                    l.y + piece.border + piece.padding,
                    l.x + l.width - piece.border - piece.padding,
                    l.y + l.height - piece.border - piece.padding,
                );
                list.push(DrawCommand::text(
                    text_rect,
                    galley.clone(),
                    piece.text_color,
                    node.clone(),
                ));
            }
            if let Some(caret_x) = piece.caret_x {
                let x = l.x + caret_x;
                let caret = Rect::new(x, l.y + piece.border, x, l.y + l.height - piece.border);
                list.push(DrawCommand::line(caret, Color32::BLACK, 1.0));
            }
        }
    }
}

pub fn layout_tree_to_vec(layout: &LayoutRef, out: &mut Vec<LayoutRef>) {
    out.push(layout.clone());
    let children = layout.borrow().children.clone();
    for child in children {
        layout_tree_to_vec(&child, out);
    }
}

/// The page y of the first layout object containing the element with the
/// given id (or any of its descendants); used for `#fragment` scrolling.
pub fn find_fragment_y(doc: &LayoutRef, root: &NodeRef, id: &str) -> Option<f32> {
    let target = crate::node::find_element_by_id(root, id)?;
    let mut subtree = Vec::new();
    crate::node::tree_to_vec(&target, &mut subtree);
    let subtree: Vec<*const _> = subtree.iter().map(Rc::as_ptr).collect();

    let mut all = Vec::new();
    layout_tree_to_vec(doc, &mut all);
    for layout in &all {
        let l = layout.borrow();
        if matches!(l.kind, LayoutKind::Document) {
            continue;
        }
        if l.nodes.iter().any(|n| subtree.contains(&Rc::as_ptr(n))) {
            return Some(l.y);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html_parser::HtmlParser;
    use crate::style::{sort_rules, style};
    use crate::css_parser::CssParser;

    fn test_ctx() -> egui::Context {
        let ctx = egui::Context::default();
        let _ = ctx.run(egui::RawInput::default(), |_| {});
        ctx
    }

    fn lay(html: &str, sheet: &str, width: f32) -> (LayoutRef, NodeRef) {
        let root = HtmlParser::parse(html);
        let mut rules = CssParser::new(sheet).parse();
        sort_rules(&mut rules);
        style(&root, &rules);
        let doc = layout_document(&test_ctx(), &root, width, false);
        (doc, root)
    }

    fn blocks_of(doc: &LayoutRef) -> Vec<LayoutRef> {
        let mut all = Vec::new();
        layout_tree_to_vec(doc, &mut all);
        all.into_iter()
            .filter(|l| matches!(l.borrow().kind, LayoutKind::Block))
            .collect()
    }

    #[test]
    fn blocks_stack_vertically() {
        let (doc, _) = lay("<div>one</div><div>two</div><div>three</div>", "", 800.0);
        let body = doc.borrow().children[0].clone();
        let kids = body.borrow().children.clone();
        // html > body; body is the one with the three divs.
        let body = kids[0].clone();
        let divs = body.borrow().children.clone();
        assert_eq!(divs.len(), 3);
        let mut last_y = f32::MIN;
        for d in &divs {
            assert!(d.borrow().y >= last_y);
            last_y = d.borrow().y;
        }
        let sum: f32 = divs.iter().map(|d| d.borrow().height).sum();
        assert!((body.borrow().height - sum).abs() < 0.01);
    }

    #[test]
    fn children_inside_parent_box() {
        let (doc, _) = lay("<p>some words here</p><p>more words</p>", "", 800.0);
        for block in blocks_of(&doc) {
            let parent = block.borrow().parent.upgrade();
            if let Some(parent) = parent {
                let p = parent.borrow();
                let b = block.borrow();
                assert!(b.y >= p.y - 0.01, "child above parent");
                assert!(b.y + b.height <= p.y + p.height + 0.01, "child below parent");
            }
        }
    }

    #[test]
    fn narrow_width_wraps_lines() {
        let (doc, _) = lay("<p>aaa bbb ccc ddd eee fff ggg hhh</p>", "", 120.0);
        let mut all = Vec::new();
        layout_tree_to_vec(&doc, &mut all);
        let lines: Vec<_> = all
            .iter()
            .filter(|l| matches!(l.borrow().kind, LayoutKind::Line))
            .collect();
        assert!(lines.len() > 1, "expected wrapping, got {} line(s)", lines.len());
    }

    #[test]
    fn soft_hyphen_splits_with_dash() {
        let word = format!("super{}cali{}fragilistic", SOFT_HYPHEN, SOFT_HYPHEN);
        let (doc, _) = lay(&format!("<p>{word}</p>"), "", 80.0);
        let mut all = Vec::new();
        layout_tree_to_vec(&doc, &mut all);
        let words: Vec<String> = all
            .iter()
            .filter_map(|l| match &l.borrow().kind {
                LayoutKind::Text(t) => Some(t.word.clone()),
                _ => None,
            })
            .collect();
        assert!(words.len() >= 2);
        assert!(words[0].ends_with('-'), "first piece {:?} should hyphenate", words[0]);
    }

    #[test]
    fn pre_preserves_spacing() {
        let (doc, _) = lay(
            "<pre>a  b\nsecond line</pre>",
            "pre { white-space: pre; font-family: monospace; }",
            800.0,
        );
        let mut all = Vec::new();
        layout_tree_to_vec(&doc, &mut all);
        let words: Vec<String> = all
            .iter()
            .filter_map(|l| match &l.borrow().kind {
                LayoutKind::Text(t) => Some(t.word.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(words, vec!["a  b".to_string(), "second line".to_string()]);
    }

    #[test]
    fn display_none_is_zero_sized() {
        let (doc, _) = lay(
            "<div style=\"display: none\">hidden</div><div>shown</div>",
            "",
            800.0,
        );
        let mut all = Vec::new();
        layout_tree_to_vec(&doc, &mut all);
        let words: Vec<String> = all
            .iter()
            .filter_map(|l| match &l.borrow().kind {
                LayoutKind::Text(t) => Some(t.word.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(words, vec!["shown".to_string()]);
    }

    #[test]
    fn input_box_defaults() {
        let (doc, _) = lay("<p>field <input name=q></p>", "", 800.0);
        let mut all = Vec::new();
        layout_tree_to_vec(&doc, &mut all);
        let input = all
            .iter()
            .find(|l| matches!(l.borrow().kind, LayoutKind::Input(_)))
            .expect("input layout object")
            .clone();
        assert_eq!(input.borrow().width, INPUT_WIDTH);
        let (doc, _) = lay("<p><input type=checkbox></p>", "", 800.0);
        let mut all = Vec::new();
        layout_tree_to_vec(&doc, &mut all);
        let input = all
            .iter()
            .find(|l| matches!(l.borrow().kind, LayoutKind::Input(_)))
            .unwrap()
            .clone();
        assert_eq!(input.borrow().width, CHECKBOX_SIZE);
        assert_eq!(input.borrow().height, CHECKBOX_SIZE);
    }

    #[test]
    fn toc_nav_gets_heading() {
        let (doc, _) = lay("<nav id=toc><a href=x>one</a></nav>", "", 800.0);
        let mut all = Vec::new();
        layout_tree_to_vec(&doc, &mut all);
        let words: Vec<String> = all
            .iter()
            .filter_map(|l| match &l.borrow().kind {
                LayoutKind::Text(t) => Some(t.word.clone()),
                _ => None,
            })
            .collect();
        assert!(words.contains(&"Table".to_string()));
        assert!(words.contains(&"Contents".to_string()));
    }

    #[test]
    fn paint_produces_text_commands() {
        let (doc, _) = lay("<p>hello world</p>", "", 800.0);
        let mut list = Vec::new();
        paint_tree(&doc, &mut list);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn fragment_y_found() {
        let (doc, root) = lay(
            "<p>start</p><h1 id=target>heading</h1>",
            "",
            800.0,
        );
        let y = find_fragment_y(&doc, &root, "target").expect("fragment");
        assert!(y > 0.0);
        assert!(find_fragment_y(&doc, &root, "missing").is_none());
    }
}
