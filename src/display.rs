use std::sync::Arc;

use egui::{Color32, Galley, Pos2, Stroke, StrokeKind};

use crate::node::NodeRef;

/// Engine-side rectangle; converted to the toolkit's type only at paint.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Rect {
        Rect { left, top, right, bottom }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Payload of one display-list primitive.
pub enum DrawKind {
    Text { galley: Arc<Galley>, color: Color32 },
    Rect { color: Color32 },
    Outline { color: Color32, thickness: f32 },
    /// A segment from (left, top) to (right, bottom).
    Line { color: Color32, thickness: f32 },
}

/// One display-list entry. `node` links back to the DOM for click
/// hit-testing; synthesized decoration (list markers, carets) carries none.
pub struct DrawCommand {
    pub rect: Rect,
    pub kind: DrawKind,
    pub node: Option<NodeRef>,
}

impl DrawCommand {
    pub fn text(rect: Rect, galley: Arc<Galley>, color: Color32, node: Option<NodeRef>) -> Self {
        DrawCommand { rect, kind: DrawKind::Text { galley, color }, node }
    }

    pub fn rect(rect: Rect, color: Color32, node: Option<NodeRef>) -> Self {
        DrawCommand { rect, kind: DrawKind::Rect { color }, node }
    }

    pub fn outline(rect: Rect, color: Color32, thickness: f32, node: Option<NodeRef>) -> Self {
        DrawCommand { rect, kind: DrawKind::Outline { color, thickness }, node }
    }

    pub fn line(rect: Rect, color: Color32, thickness: f32) -> Self {
        DrawCommand { rect, kind: DrawKind::Line { color, thickness }, node: None }
    }
}

/// Parses a CSS color (keyword, `#rgb`, `rgb(…)`, …).
pub fn parse_color(value: &str) -> Option<Color32> {
    let c = csscolorparser::parse(value.trim()).ok()?;
    let [r, g, b, a] = c.to_rgba8();
    Some(Color32::from_rgba_unmultiplied(r, g, b, a))
}

/// Executes the display list on the toolkit painter, offset by the content
/// origin, the vertical scroll and an optional horizontal offset. Items
/// fully outside the viewport are culled.
pub fn execute(
    painter: &egui::Painter,
    origin: Pos2,
    commands: &[DrawCommand],
    scroll: f32,
    hoffset: f32,
    viewport_height: f32,
) {
    for command in commands {
        let rect = command.rect;
        if rect.bottom - scroll < 0.0 || rect.top - scroll > viewport_height {
            continue;
        }
        let dx = origin.x - hoffset;
        let dy = origin.y - scroll;
        let erect = egui::Rect::from_min_max(
            Pos2::new(rect.left + dx, rect.top + dy),
            Pos2::new(rect.right + dx, rect.bottom + dy),
        );
        match &command.kind {
            DrawKind::Text { galley, color } => {
                painter.galley(erect.min, galley.clone(), *color);
            }
            DrawKind::Rect { color } => {
                painter.rect_filled(erect, 0, *color);
            }
            DrawKind::Outline { color, thickness } => {
                painter.rect_stroke(erect, 0, Stroke::new(*thickness, *color), StrokeKind::Middle);
            }
            DrawKind::Line { color, thickness } => {
                painter.line_segment([erect.min, erect.max], Stroke::new(*thickness, *color));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_contains() {
        let r = Rect::new(10.0, 10.0, 20.0, 20.0);
        assert!(r.contains(10.0, 10.0));
        assert!(r.contains(19.9, 19.9));
        assert!(!r.contains(20.0, 15.0));
        assert!(!r.contains(5.0, 15.0));
    }

    #[test]
    fn colors() {
        assert_eq!(parse_color("red"), Some(Color32::from_rgba_unmultiplied(255, 0, 0, 255)));
        assert_eq!(parse_color("#000"), Some(Color32::from_rgba_unmultiplied(0, 0, 0, 255)));
        assert!(parse_color("not-a-color").is_none());
    }
}
