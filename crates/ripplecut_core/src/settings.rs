use crate::error::{CoreError, Result};
use crate::types::TimeNs;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Editor preferences consumed by the editing engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EditorSettings {
    /// Snapping deadband. Zero disables snapping.
    pub snap_distance: TimeNs,
    /// Maximum number of undoable commands.
    pub history_limit: usize,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            snap_distance: TimeNs::ZERO,
            history_limit: 100,
        }
    }
}

impl EditorSettings {
    /// Settings whose deadband is `pixels` wide at the current zoom.
    pub fn from_pixels(pixels: u32, ns_per_pixel: i64) -> Self {
        Self {
            snap_distance: TimeNs(ns_per_pixel.max(0)) * i64::from(pixels),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save settings to a file as pretty-printed JSON.
    /// Automatically appends `.json` extension if not present.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = ensure_extension(path.as_ref());
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(CoreError::Io)?;
        Self::from_json(&data)
    }
}

/// No snapping, default undo depth.
pub fn preset_precise() -> EditorSettings {
    EditorSettings::default()
}

/// Quarter-second magnetic snapping.
pub fn preset_magnetic() -> EditorSettings {
    EditorSettings {
        snap_distance: TimeNs::from_seconds(0.25),
        history_limit: 100,
    }
}

/// Light snapping with a deep undo history.
pub fn preset_long_session() -> EditorSettings {
    EditorSettings {
        snap_distance: TimeNs::from_seconds(0.1),
        history_limit: 1000,
    }
}

fn ensure_extension(path: &Path) -> std::path::PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        path.to_path_buf()
    } else {
        let mut p = path.to_path_buf();
        let mut name = p.file_name().unwrap_or_default().to_os_string();
        name.push(".json");
        p.set_file_name(name);
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let settings = preset_magnetic();
        settings.save_to_file(&path).unwrap();

        let loaded = EditorSettings::load_from_file(&path).unwrap();
        assert_eq!(settings, loaded);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings = EditorSettings::from_json(r#"{"snap_distance": 5000}"#).unwrap();
        assert_eq!(settings.snap_distance, TimeNs(5000));
        assert_eq!(settings.history_limit, 100);
    }

    #[test]
    fn load_nonexistent_file_returns_error() {
        let result = EditorSettings::load_from_file("/tmp/does_not_exist_ripplecut_settings.json");
        assert!(matches!(result, Err(CoreError::Io(_))));
    }

    #[test]
    fn malformed_json_returns_error() {
        assert!(matches!(
            EditorSettings::from_json("{ snap"),
            Err(CoreError::Json(_))
        ));
    }

    #[test]
    fn pixel_deadband_conversion() {
        // 8px at 10ms per pixel
        let settings = EditorSettings::from_pixels(8, 10_000_000);
        assert_eq!(settings.snap_distance, TimeNs::from_seconds(0.08));
    }

    #[test]
    fn preset_values_are_correct() {
        assert_eq!(preset_precise().snap_distance, TimeNs::ZERO);
        assert_eq!(preset_magnetic().snap_distance, TimeNs(250_000_000));
        assert_eq!(preset_long_session().history_limit, 1000);
    }

    #[test]
    fn extension_appended_if_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs");

        let settings = preset_long_session();
        settings.save_to_file(&path).unwrap();

        let expected_path = dir.path().join("prefs.json");
        assert!(expected_path.exists());
        assert_eq!(EditorSettings::load_from_file(&expected_path).unwrap(), settings);
    }
}
