//! Configuration for the frame viewer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default location of the published forecast data.
pub const DEFAULT_DATA_ROOT: &str = "https://data.appa-forecasts.download/";

/// A fixed reference location reported by name instead of coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Half-width of the match box, in degrees on each axis
    pub tolerance: f64,
}

impl NamedLocation {
    pub fn montefiore() -> Self {
        Self {
            name: "Montefiore Institute".to_string(),
            lat: 50.58607874775542,
            lon: 5.560189111476355,
            tolerance: 0.2,
        }
    }

    /// Whether a canonical (lat, lon) falls within tolerance on both axes.
    pub fn matches(&self, lat: f64, lon: f64) -> bool {
        (lat - self.lat).abs() < self.tolerance && (lon - self.lon).abs() < self.tolerance
    }
}

/// Configuration for the frame viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Base URL or local directory holding `metadata.json` and `tiles/`.
    pub data_root: String,

    /// Number of future frames kept pre-rendered but hidden.
    pub look_ahead: usize,

    /// Opacity of the visible frame (0-1).
    pub layer_opacity: f32,

    /// Memory budget for the shared tile byte cache in megabytes.
    pub tile_cache_size_mb: usize,

    /// Timeout for each HTTP request.
    pub http_timeout_secs: u64,

    /// Location labelled by name in point query results.
    pub named_location: NamedLocation,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            data_root: DEFAULT_DATA_ROOT.to_string(),
            look_ahead: 4,
            layer_opacity: 0.8,
            tile_cache_size_mb: 64,
            http_timeout_secs: 30,
            named_location: NamedLocation::montefiore(),
        }
    }
}

impl ViewerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATA_ROOT") {
            if !val.trim().is_empty() {
                config.data_root = val.trim().to_string();
            }
        }

        if let Ok(val) = std::env::var("LOOK_AHEAD_LAYERS") {
            if let Ok(n) = val.parse() {
                config.look_ahead = n;
            }
        }

        if let Ok(val) = std::env::var("LAYER_OPACITY") {
            if let Ok(opacity) = val.parse::<f32>() {
                config.layer_opacity = opacity.clamp(0.0, 1.0);
            }
        }

        if let Ok(val) = std::env::var("TILE_CACHE_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.tile_cache_size_mb = size;
            }
        }

        if let Ok(val) = std::env::var("HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.http_timeout_secs = secs;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.data_root.is_empty() {
            return Err("data_root must not be empty".to_string());
        }

        if !(0.0..=1.0).contains(&self.layer_opacity) {
            return Err("layer_opacity must be within [0, 1]".to_string());
        }

        if self.tile_cache_size_mb == 0 {
            return Err("tile_cache_size_mb must be > 0".to_string());
        }

        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ViewerConfig::default();
        assert_eq!(config.look_ahead, 4);
        assert!((config.layer_opacity - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.data_root, DEFAULT_DATA_ROOT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ViewerConfig::default();
        config.layer_opacity = 1.5;
        assert!(config.validate().is_err());

        let mut config = ViewerConfig::default();
        config.tile_cache_size_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_named_location_tolerance() {
        let loc = NamedLocation::montefiore();
        assert!(loc.matches(50.6, 5.5));
        assert!(loc.matches(50.78, 5.75));
        assert!(!loc.matches(50.8, 5.56));
        assert!(!loc.matches(50.59, 5.8));
    }
}
