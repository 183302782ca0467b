use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_ZOOM_MAX: f32 = 8.0;
const DEFAULT_FRAME_DELAY_MS: u32 = 100;
const DEFAULT_BRUSH_RADIUS: f32 = 12.0;
const DEFAULT_RECENT_TOOLS_LIMIT: usize = 12;
const DEFAULT_WHEEL_ZOOM_SENSITIVITY: f32 = 0.002;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
/// Persisted engine settings. Unset fields fall back to built-in defaults.
pub struct EngineConfig {
    pub zoom_max: Option<f32>,
    pub default_frame_delay_ms: Option<u32>,
    pub brush_radius: Option<f32>,
    pub recent_tools_limit: Option<usize>,
    pub wheel_zoom_sensitivity: Option<f32>,
    pub session_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Returns the user config file path, if a config directory is available.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("stratum").join("config.toml"))
    }

    /// Loads config from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        Self::from_toml(&contents)
    }

    /// Parses TOML config text; malformed input yields the defaults.
    pub fn from_toml(contents: &str) -> Self {
        toml::from_str(contents).unwrap_or_default()
    }

    /// Writes config to disk, ignoring filesystem/serialization errors.
    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(s) = toml::to_string_pretty(self) {
            let _ = std::fs::write(&path, s);
        }
    }

    /// Upper zoom bound; never below 1.0.
    pub fn zoom_max(&self) -> f32 {
        self.zoom_max
            .filter(|z| z.is_finite())
            .unwrap_or(DEFAULT_ZOOM_MAX)
            .max(1.0)
    }

    /// Delay substituted for frames that declare a zero delay.
    pub fn default_frame_delay_ms(&self) -> u32 {
        self.default_frame_delay_ms
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_FRAME_DELAY_MS)
    }

    pub fn brush_radius(&self) -> f32 {
        self.brush_radius
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(DEFAULT_BRUSH_RADIUS)
    }

    pub fn recent_tools_limit(&self) -> usize {
        self.recent_tools_limit
            .unwrap_or(DEFAULT_RECENT_TOOLS_LIMIT)
    }

    pub fn wheel_zoom_sensitivity(&self) -> f32 {
        self.wheel_zoom_sensitivity
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(DEFAULT_WHEEL_ZOOM_SENSITIVITY)
    }
}
