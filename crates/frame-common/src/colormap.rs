//! Discrete value/color palettes and their inversion.
//!
//! Every variable (or every pressure level of a level variable) ships a
//! colormap: two parallel arrays where `colors[i]` is the RGB triple that was
//! rendered for physical value `values[i]`. Reading a pixel back therefore
//! means finding the closest palette color and reporting its paired value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FrameError, FrameResult};

/// An 8-bit RGB color, serialized as `{"r": .., "g": .., "b": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Squared Euclidean distance in RGB space.
    pub fn distance_sq(&self, other: &Rgb) -> u32 {
        let dr = self.r as i32 - other.r as i32;
        let dg = self.g as i32 - other.g as i32;
        let db = self.b as i32 - other.b as i32;
        (dr * dr + dg * dg + db * db) as u32
    }

    /// CSS `rgb(r,g,b)` representation.
    pub fn to_css(&self) -> String {
        format!("rgb({},{},{})", self.r, self.g, self.b)
    }
}

/// Index of the palette entry closest to `target`.
///
/// Ties resolve to the lowest index. Returns `None` for an empty palette.
pub fn closest_color(target: &Rgb, palette: &[Rgb]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, color) in palette.iter().enumerate() {
        let dist = target.distance_sq(color);
        match best {
            Some((_, min)) if dist >= min => {}
            _ => best = Some((i, dist)),
        }
    }
    best.map(|(i, _)| i)
}

/// A single value/color palette.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Colormap {
    pub values: Vec<f64>,
    pub colors: Vec<Rgb>,
}

impl Colormap {
    pub fn new(values: Vec<f64>, colors: Vec<Rgb>) -> FrameResult<Self> {
        let cmap = Self { values, colors };
        cmap.validate()?;
        Ok(cmap)
    }

    /// Check the two arrays are parallel and non-empty.
    pub fn validate(&self) -> FrameResult<()> {
        if self.values.is_empty() {
            return Err(FrameError::MalformedMetadata(
                "colormap has no entries".to_string(),
            ));
        }
        if self.values.len() != self.colors.len() {
            return Err(FrameError::MalformedMetadata(format!(
                "colormap has {} values but {} colors",
                self.values.len(),
                self.colors.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Map an observed pixel color back to the physical value it encodes.
    pub fn invert(&self, color: &Rgb) -> Option<f64> {
        let idx = closest_color(color, &self.colors)?;
        self.values.get(idx).copied()
    }

    /// Smallest and largest value covered by the palette.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let first = *self.values.first()?;
        Some(self.values.iter().fold((first, first), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        }))
    }
}

/// Colormap entry for one variable: flat for surface variables, keyed by
/// pressure level value for level variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableColormap {
    Flat(Colormap),
    PerLevel(BTreeMap<String, Colormap>),
}

impl VariableColormap {
    /// Resolve the palette for an optional pressure level value.
    pub fn resolve(&self, level: Option<u32>) -> Option<&Colormap> {
        match (self, level) {
            (VariableColormap::Flat(cmap), _) => Some(cmap),
            (VariableColormap::PerLevel(levels), Some(level)) => levels.get(&level.to_string()),
            (VariableColormap::PerLevel(_), None) => None,
        }
    }

    pub fn validate(&self) -> FrameResult<()> {
        match self {
            VariableColormap::Flat(cmap) => cmap.validate(),
            VariableColormap::PerLevel(levels) => {
                for (level, cmap) in levels {
                    cmap.validate().map_err(|e| {
                        FrameError::MalformedMetadata(format!("level {}: {}", level, e))
                    })?;
                }
                Ok(())
            }
        }
    }
}
