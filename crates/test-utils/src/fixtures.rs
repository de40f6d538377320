//! Synthetic forecast metadata.
//!
//! Every colormap is a 256-entry ramp built by [`ramp_colormap`], so the
//! color at palette index `i` is [`ramp_color`]`(i)` and the value is
//! `start + i * step`.

use std::sync::Arc;

use frame_common::{Colormap, Metadata, Rgb};

/// Run identifier of the fixture forecast.
pub const RUN: &str = "2025-07-28T00Z_PT12H";

/// Highest time index of [`RUN`].
pub const DURATION: usize = 12;

/// Pressure levels (hPa) of the fixture forecast.
pub const LEVELS: [u32; 3] = [500, 850, 1000];

/// Native zoom ceiling of the fixture tiles.
pub const ZOOM_MAX: u8 = 2;

/// Number of palette entries in every fixture colormap.
pub const RAMP_LEN: usize = 256;

/// Palette color at index `i`. Distinct for every `i`.
pub fn ramp_color(i: u8) -> Rgb {
    Rgb::new(i, 255 - i, 128)
}

/// A [`RAMP_LEN`]-entry colormap with values `start + i * step`.
pub fn ramp_colormap(start: f64, step: f64) -> Colormap {
    Colormap {
        values: (0..RAMP_LEN).map(|i| start + i as f64 * step).collect(),
        colors: (0..RAMP_LEN).map(|i| ramp_color(i as u8)).collect(),
    }
}

/// Value ramp of each surface variable, as (start, step).
pub fn surface_ramp(variable: &str) -> (f64, f64) {
    match variable {
        "mean_sea_level_pressure" => (95_000.0, 50.0),
        _ => (220.0, 0.5),
    }
}

/// Value ramp of `temperature` at a pressure level, as (start, step).
pub fn level_ramp(level: u32) -> (f64, f64) {
    match level {
        500 => (200.0, 0.5),
        850 => (230.0, 0.5),
        _ => (250.0, 0.5),
    }
}

fn colormap_json(start: f64, step: f64) -> String {
    serde_json::to_string(&ramp_colormap(start, step)).unwrap_or_default()
}

/// `metadata.json` of the fixture forecast.
///
/// Variables are published in the order `temperature` (level),
/// `2m_temperature`, `mean_sea_level_pressure`; the last one carries no
/// units and relies on the known-units table.
pub fn metadata_json() -> String {
    let per_level = LEVELS
        .iter()
        .map(|&level| {
            let (start, step) = level_ramp(level);
            format!("\"{}\": {}", level, colormap_json(start, step))
        })
        .collect::<Vec<_>>()
        .join(", ");

    let (t2m_start, t2m_step) = surface_ramp("2m_temperature");
    let (msl_start, msl_step) = surface_ramp("mean_sea_level_pressure");

    format!(
        r#"{{
            "latest": "{run}",
            "zoom_max": {zoom_max},
            "levels": [{levels}],
            "variables": {{
                "temperature": {{"is_level": true, "units": "K"}},
                "2m_temperature": {{"is_level": false, "units": "K"}},
                "mean_sea_level_pressure": {{"is_level": false}}
            }},
            "colormaps": {{
                "temperature": {{ {per_level} }},
                "2m_temperature": {t2m},
                "mean_sea_level_pressure": {msl}
            }}
        }}"#,
        run = RUN,
        zoom_max = ZOOM_MAX,
        levels = LEVELS
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        per_level = per_level,
        t2m = colormap_json(t2m_start, t2m_step),
        msl = colormap_json(msl_start, msl_step),
    )
}

/// Parsed fixture metadata.
pub fn metadata() -> Metadata {
    Metadata::from_json(&metadata_json()).expect("fixture metadata is valid")
}

pub fn metadata_arc() -> Arc<Metadata> {
    Arc::new(metadata())
}
