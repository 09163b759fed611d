//! Style properties shared by every element kind.

use peniko::Color;
use serde::{Deserialize, Serialize};

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    pub fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Roughness level for the hand-drawn stroke effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sloppiness {
    /// Clean, precise lines (roughness = 0)
    Architect = 0,
    /// Slight hand-drawn feel (roughness = 1)
    #[default]
    Artist = 1,
    /// Very sketchy (roughness = 2)
    Cartoonist = 2,
}

/// Fill pattern for closed shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FillPattern {
    #[default]
    Solid,
    Hachure,
    CrossHatch,
    ZigZag,
    Dots,
}

/// Dash style of the outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

/// Style properties for elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementStyle {
    /// Outline color.
    pub stroke_color: SerializableColor,
    /// Fill color (None = transparent).
    #[serde(default)]
    pub background_color: Option<SerializableColor>,
    /// Outline width in scene units.
    pub stroke_width: f64,
    #[serde(default)]
    pub fill_pattern: FillPattern,
    #[serde(default)]
    pub stroke_style: StrokeStyle,
    #[serde(default)]
    pub sloppiness: Sloppiness,
    /// Seed for the stroke generator so every peer draws the same wobble.
    #[serde(default = "generate_seed")]
    pub seed: u32,
    /// Overall opacity (0.0 = fully transparent, 1.0 = fully opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_opacity() -> f64 {
    1.0
}

fn generate_seed() -> u32 {
    rand::random()
}

impl ElementStyle {
    /// Stroke color with opacity applied.
    pub fn stroke_with_opacity(&self) -> Color {
        with_opacity(self.stroke_color, self.opacity)
    }

    /// Fill color with opacity applied.
    pub fn fill_with_opacity(&self) -> Option<Color> {
        self.background_color.map(|c| with_opacity(c, self.opacity))
    }
}

fn with_opacity(color: SerializableColor, opacity: f64) -> Color {
    let alpha = (f64::from(color.a) * opacity.clamp(0.0, 1.0)) as u8;
    Color::from_rgba8(color.r, color.g, color.b, alpha)
}

impl Default for ElementStyle {
    fn default() -> Self {
        Self {
            stroke_color: SerializableColor::black(),
            background_color: None,
            stroke_width: 2.0,
            fill_pattern: FillPattern::default(),
            stroke_style: StrokeStyle::default(),
            sloppiness: Sloppiness::default(),
            seed: generate_seed(),
            opacity: 1.0,
        }
    }
}
