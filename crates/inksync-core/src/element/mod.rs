//! Element model: one drawable scene object plus its version metadata.
//!
//! Elements are plain values. Every accepted mutation bumps `version` and
//! regenerates `version_nonce`; the pair defines the total order used by
//! reconciliation (see [`crate::reconcile`]).

mod style;

pub use style::{ElementStyle, FillPattern, SerializableColor, Sloppiness, StrokeStyle};

use kurbo::{Affine, Point, Rect, Vec2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for elements.
pub type ElementId = Uuid;

/// Generate a fresh tie-breaker for a mutation.
pub fn random_nonce() -> u32 {
    rand::random()
}

fn initial_version() -> u64 {
    1
}

/// Arrowhead decoration at either end of an arrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arrowhead {
    Arrow,
    Triangle,
    Bar,
    Dot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontFamily {
    #[default]
    HandDrawn,
    Normal,
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

/// Upload state of an image's binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    #[default]
    Pending,
    Saved,
    Error,
}

fn default_font_size() -> f64 {
    20.0
}

fn default_image_scale() -> [f64; 2] {
    [1.0, 1.0]
}

/// Shape-specific data, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ElementKind {
    Rectangle,
    Ellipse,
    Diamond,
    /// Polyline; points are relative to the element origin.
    Line { points: Vec<Point> },
    Arrow {
        points: Vec<Point>,
        #[serde(default)]
        start_arrowhead: Option<Arrowhead>,
        #[serde(default)]
        end_arrowhead: Option<Arrowhead>,
    },
    Freedraw {
        points: Vec<Point>,
        #[serde(default)]
        pressures: Vec<f32>,
    },
    Text {
        text: String,
        #[serde(default = "default_font_size")]
        font_size: f64,
        #[serde(default)]
        font_family: FontFamily,
        #[serde(default)]
        text_align: TextAlign,
    },
    Image {
        #[serde(default)]
        file_id: Option<String>,
        #[serde(default)]
        status: ImageStatus,
        #[serde(default = "default_image_scale")]
        scale: [f64; 2],
    },
    Frame {
        #[serde(default)]
        name: Option<String>,
    },
}

impl ElementKind {
    /// Wire name of the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementKind::Rectangle => "rectangle",
            ElementKind::Ellipse => "ellipse",
            ElementKind::Diamond => "diamond",
            ElementKind::Line { .. } => "line",
            ElementKind::Arrow { .. } => "arrow",
            ElementKind::Freedraw { .. } => "freedraw",
            ElementKind::Text { .. } => "text",
            ElementKind::Image { .. } => "image",
            ElementKind::Frame { .. } => "frame",
        }
    }

    /// Relative path points for line-like kinds.
    pub fn points(&self) -> Option<&[Point]> {
        match self {
            ElementKind::Line { points }
            | ElementKind::Arrow { points, .. }
            | ElementKind::Freedraw { points, .. } => Some(points),
            _ => None,
        }
    }

    fn points_mut(&mut self) -> Option<&mut Vec<Point>> {
        match self {
            ElementKind::Line { points }
            | ElementKind::Arrow { points, .. }
            | ElementKind::Freedraw { points, .. } => Some(points),
            _ => None,
        }
    }

    /// Wire names accepted by [`crate::consume::validate_element`].
    pub const TYPE_NAMES: [&'static str; 9] = [
        "rectangle",
        "ellipse",
        "diamond",
        "line",
        "arrow",
        "freedraw",
        "text",
        "image",
        "frame",
    ];
}

/// A drawable object on the shared scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    #[serde(flatten)]
    pub kind: ElementKind,
    /// Left edge of the unrotated box in scene coordinates.
    pub x: f64,
    /// Top edge of the unrotated box in scene coordinates.
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation in radians around the box center.
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub style: ElementStyle,
    /// Tombstone flag. Deleted elements stay in the scene so that
    /// reordered delete/restore messages remain idempotent.
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default = "initial_version")]
    pub version: u64,
    /// Missing on the wire means 0, so every node reads the same pair.
    #[serde(default)]
    pub version_nonce: u32,
    /// Epoch millis of the last mutation.
    #[serde(default)]
    pub updated: u64,
}

impl Element {
    /// Create a new element at version 1.
    pub fn new(kind: ElementKind, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            x,
            y,
            width,
            height,
            angle: 0.0,
            style: ElementStyle::default(),
            is_deleted: false,
            version: 1,
            version_nonce: random_nonce(),
            updated: 0,
        }
    }

    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(ElementKind::Rectangle, x, y, width, height)
    }

    pub fn ellipse(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(ElementKind::Ellipse, x, y, width, height)
    }

    /// Create a line from absolute points. The origin becomes the first point.
    pub fn line(points: &[Point]) -> Self {
        let (origin, relative) = relativize(points);
        let mut el = Self::new(ElementKind::Line { points: relative }, origin.x, origin.y, 0.0, 0.0);
        el.sync_size_to_points();
        el
    }

    pub fn text(x: f64, y: f64, text: impl Into<String>) -> Self {
        let text = text.into();
        let font_size = default_font_size();
        // Rough metrics; the renderer owns real text measurement.
        let width = text.chars().count() as f64 * font_size * 0.6;
        Self::new(
            ElementKind::Text {
                text,
                font_size,
                font_family: FontFamily::default(),
                text_align: TextAlign::default(),
            },
            x,
            y,
            width,
            font_size * 1.25,
        )
    }

    /// Record an accepted mutation: next version, fresh nonce.
    pub fn bump_version(&mut self, now: u64) {
        self.version += 1;
        self.version_nonce = random_nonce();
        self.updated = now;
    }

    /// Move the element; relative points travel with the origin.
    pub fn translate(&mut self, delta: Vec2) {
        self.x += delta.x;
        self.y += delta.y;
    }

    /// Axis-aligned bounding box in scene coordinates, including rotation.
    pub fn bounds(&self) -> Rect {
        let local = match self.kind.points() {
            Some(points) if !points.is_empty() => {
                let origin = Vec2::new(self.x, self.y);
                points
                    .iter()
                    .map(|p| *p + origin)
                    .fold(None, |acc: Option<Rect>, p| {
                        Some(match acc {
                            Some(r) => r.union_pt(p),
                            None => Rect::from_points(p, p),
                        })
                    })
                    .unwrap_or_default()
            }
            _ => Rect::new(self.x, self.y, self.x + self.width, self.y + self.height).abs(),
        };
        if self.angle == 0.0 {
            local
        } else {
            Affine::rotate_about(self.angle, local.center()).transform_rect_bbox(local)
        }
    }

    /// Shallow-merge the fields present in `patch`.
    pub fn apply_patch(&mut self, patch: &ElementPatch) {
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(angle) = patch.angle {
            self.angle = angle;
        }
        if let Some(color) = patch.stroke_color {
            self.style.stroke_color = color;
        }
        if let Some(fill) = patch.background_color {
            self.style.background_color = fill;
        }
        if let Some(width) = patch.stroke_width {
            self.style.stroke_width = width;
        }
        if let Some(opacity) = patch.opacity {
            self.style.opacity = opacity;
        }
        if let Some(sloppiness) = patch.sloppiness {
            self.style.sloppiness = sloppiness;
        }
        if let Some(stroke_style) = patch.stroke_style {
            self.style.stroke_style = stroke_style;
        }
        if let Some(fill_pattern) = patch.fill_pattern {
            self.style.fill_pattern = fill_pattern;
        }
        if let Some(new_points) = &patch.points {
            if let Some(points) = self.kind.points_mut() {
                points.clone_from(new_points);
                self.sync_size_to_points();
            }
        }
        if let Some(new_text) = &patch.text {
            if let ElementKind::Text { text, .. } = &mut self.kind {
                text.clone_from(new_text);
            }
        }
        if let Some(deleted) = patch.is_deleted {
            self.is_deleted = deleted;
        }
    }

    /// Recompute width/height from relative points.
    fn sync_size_to_points(&mut self) {
        if let Some(points) = self.kind.points() {
            if let Some(first) = points.first() {
                let rect = points.iter().fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p));
                self.width = rect.width();
                self.height = rect.height();
            }
        }
    }
}

fn relativize(points: &[Point]) -> (Point, Vec<Point>) {
    let origin = points.first().copied().unwrap_or(Point::ZERO);
    let relative = points.iter().map(|p| (*p - origin).to_point()).collect();
    (origin, relative)
}

/// Sparse update for an element. Only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<SerializableColor>,
    /// `Some(None)` clears the fill.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Option<SerializableColor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sloppiness: Option<Sloppiness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_style: Option<StrokeStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_pattern: Option<FillPattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

impl ElementPatch {
    /// Patch that moves an element to a new origin.
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn stroke_color(color: SerializableColor) -> Self {
        Self {
            stroke_color: Some(color),
            ..Self::default()
        }
    }
}
