//! Forecast metadata as published in `metadata.json`.
//!
//! Loaded once per session and immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::colormap::{Colormap, VariableColormap};
use crate::error::{FrameError, FrameResult};
use crate::tile::MAX_ZOOM;
use crate::time::ForecastRun;

/// Label used when no unit is known for a variable.
pub const UNKNOWN_UNITS: &str = "(Unknown units)";

/// Units of the variables the forecast model publishes, used when the
/// metadata itself does not carry one.
const KNOWN_UNITS: &[(&str, &str)] = &[
    ("10m_u_component_of_wind", "m/s"),
    ("10m_v_component_of_wind", "m/s"),
    ("v_component_of_wind", "m/s"),
    ("u_component_of_wind", "m/s"),
    ("total_precipitation", "mm/h"),
    ("mean_sea_level_pressure", "Pa"),
    ("sea_surface_temperature", "K"),
    ("temperature", "K"),
    ("2m_temperature", "K"),
    ("geopotential", "m^2 s^-2"),
    ("specific_humidity", "kg kg^-1"),
];

/// Description of one published variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    /// Whether the variable is stored per pressure level
    #[serde(default)]
    pub is_level: bool,
    /// Physical unit label
    #[serde(default)]
    pub units: Option<String>,
}

/// Root of `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Run identifier, e.g. `2025-07-28T00Z_PT48H`
    pub latest: String,
    /// Variables by name
    pub variables: HashMap<String, VariableInfo>,
    /// Variable names in publication order
    #[serde(skip)]
    variable_order: Vec<String>,
    /// Pressure levels (hPa)
    #[serde(default)]
    pub levels: Vec<u32>,
    /// Colormaps by variable name
    pub colormaps: HashMap<String, VariableColormap>,
    /// Highest zoom with native tile data
    pub zoom_max: u8,
}

impl Metadata {
    /// Parse metadata from a JSON document.
    ///
    /// The order of variables in the document is preserved so that the
    /// first published variable can be selected on startup.
    pub fn from_json(json: &str) -> FrameResult<Self> {
        let mut metadata: Metadata = serde_json::from_str(json)?;
        metadata.variable_order = variable_order(json, &metadata.variables)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check internal consistency: parsable run, colormaps for every variable.
    pub fn validate(&self) -> FrameResult<()> {
        ForecastRun::parse(&self.latest)?;

        if self.zoom_max > MAX_ZOOM {
            return Err(FrameError::MalformedMetadata(format!(
                "zoom_max {} exceeds the deepest tile zoom {}",
                self.zoom_max, MAX_ZOOM
            )));
        }

        for (name, info) in &self.variables {
            let cmap = self
                .colormaps
                .get(name)
                .ok_or_else(|| FrameError::MissingColormap(name.clone()))?;
            cmap.validate()?;

            match (info.is_level, cmap) {
                (true, VariableColormap::Flat(_)) => {
                    return Err(FrameError::MalformedMetadata(format!(
                        "level variable '{}' has a flat colormap",
                        name
                    )));
                }
                (false, VariableColormap::PerLevel(_)) => {
                    return Err(FrameError::MalformedMetadata(format!(
                        "surface variable '{}' has per-level colormaps",
                        name
                    )));
                }
                _ => {}
            }
        }

        if self.variables.values().any(|v| v.is_level) && self.levels.is_empty() {
            return Err(FrameError::MalformedMetadata(
                "level variables present but no levels listed".to_string(),
            ));
        }

        Ok(())
    }

    /// The forecast run described by `latest`.
    pub fn forecast_run(&self) -> FrameResult<ForecastRun> {
        ForecastRun::parse(&self.latest)
    }

    /// Number of forecast hours (the highest time index).
    pub fn duration(&self) -> FrameResult<usize> {
        Ok(self.forecast_run()?.last_index())
    }

    /// Variable names in publication order.
    pub fn variable_names(&self) -> Vec<&str> {
        if self.variable_order.len() == self.variables.len() {
            return self.variable_order.iter().map(String::as_str).collect();
        }
        let mut names: Vec<&str> = self.variables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn variable(&self, name: &str) -> FrameResult<&VariableInfo> {
        self.variables
            .get(name)
            .ok_or_else(|| FrameError::UnknownVariable(name.to_string()))
    }

    /// Pressure level value at `index`.
    pub fn level_value(&self, index: usize) -> FrameResult<u32> {
        self.levels
            .get(index)
            .copied()
            .ok_or(FrameError::LevelOutOfRange {
                index,
                available: self.levels.len(),
            })
    }

    /// Index of a pressure level value.
    pub fn level_index(&self, level: u32) -> FrameResult<usize> {
        self.levels
            .iter()
            .position(|&l| l == level)
            .ok_or(FrameError::UnknownLevel(level))
    }

    /// Resolve the series key for a variable and optional level index.
    ///
    /// The level index is ignored for surface variables and required for
    /// level variables.
    pub fn series(&self, variable: &str, level_index: Option<usize>) -> FrameResult<SeriesKey> {
        let info = self.variable(variable)?;
        let level_index = if info.is_level {
            let index =
                level_index.ok_or_else(|| FrameError::LevelRequired(variable.to_string()))?;
            self.level_value(index)?;
            Some(index)
        } else {
            None
        };

        Ok(SeriesKey {
            run: self.latest.clone(),
            variable: variable.to_string(),
            level_index,
        })
    }

    /// Colormap for a series.
    pub fn colormap(&self, series: &SeriesKey) -> FrameResult<&Colormap> {
        let entry = self
            .colormaps
            .get(&series.variable)
            .ok_or_else(|| FrameError::MissingColormap(series.variable.clone()))?;
        let level = series
            .level_index
            .map(|i| self.level_value(i))
            .transpose()?;
        entry
            .resolve(level)
            .ok_or_else(|| FrameError::MissingColormap(series.to_string()))
    }

    /// Unit label for a variable, falling back to the known-units table.
    pub fn units(&self, variable: &str) -> &str {
        if let Some(units) = self
            .variables
            .get(variable)
            .and_then(|v| v.units.as_deref())
            .filter(|u| !u.is_empty())
        {
            return units;
        }
        KNOWN_UNITS
            .iter()
            .find(|(name, _)| *name == variable)
            .map(|(_, units)| *units)
            .unwrap_or(UNKNOWN_UNITS)
    }
}

/// Extract top-level variable key order from the raw JSON document.
fn variable_order(
    json: &str,
    variables: &HashMap<String, VariableInfo>,
) -> FrameResult<Vec<String>> {
    #[derive(Deserialize)]
    struct Root {
        variables: OrderedKeys,
    }

    struct OrderedKeys(Vec<String>);

    impl<'de> Deserialize<'de> for OrderedKeys {
        fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            struct KeyVisitor;

            impl<'de> serde::de::Visitor<'de> for KeyVisitor {
                type Value = OrderedKeys;

                fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    f.write_str("a map of variables")
                }

                fn visit_map<A: serde::de::MapAccess<'de>>(
                    self,
                    mut map: A,
                ) -> Result<Self::Value, A::Error> {
                    let mut keys = Vec::new();
                    while let Some(key) = map.next_key::<String>()? {
                        map.next_value::<serde::de::IgnoredAny>()?;
                        keys.push(key);
                    }
                    Ok(OrderedKeys(keys))
                }
            }

            d.deserialize_map(KeyVisitor)
        }
    }

    let root: Root = serde_json::from_str(json)?;
    let mut seen = std::collections::HashSet::new();
    Ok(root
        .variables
        .0
        .into_iter()
        .filter(|k| variables.contains_key(k) && seen.insert(k.clone()))
        .collect())
}

/// Identifies one time-ordered sequence of tile sources:
/// a forecast run, a variable and (for level variables) a level index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub run: String,
    pub variable: String,
    pub level_index: Option<usize>,
}

impl SeriesKey {
    /// Path of the tile container for `time_index`, relative to the data root.
    pub fn container_path(&self, time_index: usize) -> String {
        match self.level_index {
            Some(level) => format!(
                "tiles/{}/{}/lvl{}/h{}.pmtiles",
                self.run, self.variable, level, time_index
            ),
            None => format!("tiles/{}/{}/h{}.pmtiles", self.run, self.variable, time_index),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level_index {
            Some(level) => write!(f, "{}/{}/lvl{}", self.run, self.variable, level),
            None => write!(f, "{}/{}", self.run, self.variable),
        }
    }
}
