//! Colorbar legend for the active series.

use serde::Serialize;

use frame_common::{Colormap, Rgb};

/// Number of color swatches in the gradient.
pub const COLOR_STEPS: usize = 100;

/// Number of intervals between tick labels; there is one more label than this.
const TICK_INTERVALS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    /// `Units: <units>`
    pub title: String,
    /// Swatches from the low end of the colormap to the high end
    pub gradient: Vec<Rgb>,
    /// Tick values, highest first
    pub ticks: Vec<f64>,
}

impl Legend {
    /// Sample `colormap` evenly into a gradient and tick values.
    pub fn build(colormap: &Colormap, units: &str) -> Self {
        let len = colormap.len();
        if len == 0 {
            return Self {
                title: format!("Units: {}", units),
                gradient: Vec::new(),
                ticks: Vec::new(),
            };
        }

        let step = (len / COLOR_STEPS).max(1);
        let at = |i: usize| i.min(len - 1);

        let gradient = (0..COLOR_STEPS)
            .map(|i| colormap.colors[at(i * step)])
            .collect();

        let tick_stride = (COLOR_STEPS / TICK_INTERVALS) * step;
        let ticks = (0..=TICK_INTERVALS)
            .rev()
            .map(|i| colormap.values[at(i * tick_stride)])
            .collect();

        Self {
            title: format!("Units: {}", units),
            gradient,
            ticks,
        }
    }

    /// Swatch colors as CSS `rgb(..)` strings, low end first.
    pub fn swatch_css(&self) -> Vec<String> {
        self.gradient.iter().map(Rgb::to_css).collect()
    }

    /// Tick values formatted with two decimals.
    pub fn tick_labels(&self) -> Vec<String> {
        self.ticks.iter().map(|v| format!("{:.2}", v)).collect()
    }
}
