//! Persistent macro configuration.
//!
//! Settings live in a flat JSON document next to the executable
//! (`inv_macro_config.json`) and are rewritten on every change. Every field
//! has a serde default so a file written by an older build (or with keys
//! missing) loads field-by-field; a missing or malformed file silently yields
//! the built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::grid::{Cell, Point, Region};

/// Complete macro configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MacroConfig {
    /// Top-left corner of the selected inventory region, `[x, y]`.
    #[serde(default)]
    pub start_pos: Option<(i32, i32)>,
    /// Bottom-right corner of the selected inventory region, `[x, y]`.
    #[serde(default)]
    pub end_pos: Option<(i32, i32)>,
    /// Cells the user marked to always skip, `[col, row]` pairs.
    #[serde(default)]
    pub excluded_cells: Vec<(u32, u32)>,
    /// Cell holding the appraisal scroll, `[col, row]`.
    #[serde(default)]
    pub appraisal_scroll_cell: Option<(u32, u32)>,
    /// Compare against the empty-inventory reference and click only occupied cells.
    #[serde(default = "default_detect_items")]
    pub detect_items: bool,
    /// Delay between clicks in seconds.
    #[serde(default = "default_click_delay")]
    pub click_delay: f64,
    /// Hold Ctrl while clicking (stash-transfer click in the game).
    #[serde(default = "default_use_ctrl_click")]
    pub use_ctrl_click: bool,
    /// Minimize the controlling window while a macro runs.
    #[serde(default)]
    pub minimize_window: bool,
    /// Inventory-clear macro toggle hotkey.
    #[serde(default = "default_run_hotkey")]
    pub run_hotkey: String,
    /// Inventory-clear macro stop hotkey.
    #[serde(default = "default_stop_hotkey")]
    pub stop_hotkey: String,
    /// Appraisal macro toggle hotkey.
    #[serde(default = "default_appraisal_run_hotkey")]
    pub appraisal_run_hotkey: String,
    /// Appraisal macro stop hotkey.
    #[serde(default = "default_appraisal_stop_hotkey")]
    pub appraisal_stop_hotkey: String,
    /// Region (re)selection hotkey.
    #[serde(default = "default_area_select_hotkey")]
    pub area_select_hotkey: String,
    /// Luma above this counts as a bright pixel (0-255).
    #[serde(default = "default_brightness_threshold")]
    pub brightness_threshold: u8,
    /// A cell is occupied only if its bright-pixel ratio exceeds this.
    #[serde(default = "default_occupied_ratio")]
    pub occupied_ratio: f32,
    /// ...and exceeds the reference cell's ratio by at least this much.
    #[serde(default = "default_occupied_delta")]
    pub occupied_delta: f32,
}

fn default_detect_items() -> bool {
    true
}

fn default_click_delay() -> f64 {
    0.1
}

fn default_use_ctrl_click() -> bool {
    true
}

fn default_run_hotkey() -> String {
    "f6".to_string()
}

fn default_stop_hotkey() -> String {
    "f7".to_string()
}

fn default_appraisal_run_hotkey() -> String {
    "f1".to_string()
}

fn default_appraisal_stop_hotkey() -> String {
    "f2".to_string()
}

fn default_area_select_hotkey() -> String {
    "f3".to_string()
}

// Empirically tuned detection constants; kept configurable, not derived.
fn default_brightness_threshold() -> u8 {
    50
}

fn default_occupied_ratio() -> f32 {
    0.2
}

fn default_occupied_delta() -> f32 {
    0.15
}

impl Default for MacroConfig {
    fn default() -> Self {
        // An empty document picks up every serde default.
        serde_json::from_str("{}").expect("defaults are infallible")
    }
}

impl MacroConfig {
    /// The selected region, if one has been committed and is still valid.
    pub fn region(&self) -> Option<Region> {
        let (sx, sy) = self.start_pos?;
        let (ex, ey) = self.end_pos?;
        Region::new(Point { x: sx, y: sy }, Point { x: ex, y: ey }).ok()
    }

    /// Replaces the region and drops cell markings tied to the old geometry.
    pub fn set_region(&mut self, region: Region) {
        self.start_pos = Some((region.start().x, region.start().y));
        self.end_pos = Some((region.end().x, region.end().y));
        self.excluded_cells.clear();
        self.appraisal_scroll_cell = None;
    }

    pub fn excluded(&self) -> HashSet<Cell> {
        self.excluded_cells
            .iter()
            .map(|&(col, row)| Cell::new(col, row))
            .collect()
    }

    pub fn special_cell(&self) -> Option<Cell> {
        self.appraisal_scroll_cell
            .map(|(col, row)| Cell::new(col, row))
    }

    /// Delay between clicks; negative values persisted by hand-edited files
    /// are clamped to zero.
    pub fn click_delay(&self) -> Duration {
        Duration::from_secs_f64(self.click_delay.max(0.0))
    }

    /// Loads configuration from `path` or returns defaults.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(config) => {
                        crate::log(&format!("Config loaded from {}", path.display()));
                        return config;
                    }
                    Err(e) => {
                        crate::log(&format!("Failed to parse config: {}. Using defaults.", e));
                    }
                },
                Err(e) => {
                    crate::log(&format!("Failed to read config: {}. Using defaults.", e));
                }
            }
        } else {
            crate::log("Config file not found. Using defaults.");
        }
        Self::default()
    }

    /// Writes the full document to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_original_tool() {
        let config = MacroConfig::default();
        assert_eq!(config.start_pos, None);
        assert!(config.excluded_cells.is_empty());
        assert_eq!(config.appraisal_scroll_cell, None);
        assert!(config.detect_items);
        assert!((config.click_delay - 0.1).abs() < f64::EPSILON);
        assert!(config.use_ctrl_click);
        assert!(!config.minimize_window);
        assert_eq!(config.run_hotkey, "f6");
        assert_eq!(config.stop_hotkey, "f7");
        assert_eq!(config.appraisal_run_hotkey, "f1");
        assert_eq!(config.appraisal_stop_hotkey, "f2");
        assert_eq!(config.area_select_hotkey, "f3");
        assert_eq!(config.brightness_threshold, 50);
        assert!((config.occupied_ratio - 0.2).abs() < f32::EPSILON);
        assert!((config.occupied_delta - 0.15).abs() < f32::EPSILON);
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let mut config = MacroConfig::default();
        config.start_pos = Some((120, 340));
        config.end_pos = Some((751, 617));
        config.excluded_cells = vec![(0, 0), (11, 4)];
        config.appraisal_scroll_cell = Some((11, 0));
        config.detect_items = false;
        config.click_delay = 0.25;
        config.minimize_window = true;
        config.run_hotkey = "f8".to_string();

        let json = serde_json::to_string(&config).unwrap();
        let loaded: MacroConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_keys_fall_back_per_field() {
        let loaded: MacroConfig =
            serde_json::from_str(r#"{"run_hotkey": "f9", "click_delay": 0.5}"#).unwrap();
        assert_eq!(loaded.run_hotkey, "f9");
        assert!((loaded.click_delay - 0.5).abs() < f64::EPSILON);
        // Everything else falls back individually.
        assert_eq!(loaded.stop_hotkey, "f7");
        assert!(loaded.detect_items);
        assert_eq!(loaded.brightness_threshold, 50);
    }

    #[test]
    fn test_load_malformed_file_yields_defaults() {
        let path = std::env::temp_dir().join("inv_macro_test_malformed.json");
        fs::write(&path, "not json {{{").unwrap();
        let loaded = MacroConfig::load(&path);
        assert_eq!(loaded, MacroConfig::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("inv_macro_test_does_not_exist.json");
        let _ = fs::remove_file(&path);
        assert_eq!(MacroConfig::load(&path), MacroConfig::default());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let path = std::env::temp_dir().join("inv_macro_test_roundtrip.json");
        let mut config = MacroConfig::default();
        config.start_pos = Some((10, 20));
        config.end_pos = Some((200, 120));
        config.excluded_cells = vec![(3, 2)];
        config.save(&path).unwrap();
        assert_eq!(MacroConfig::load(&path), config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_set_region_clears_stale_cell_markings() {
        let mut config = MacroConfig::default();
        config.excluded_cells = vec![(1, 1)];
        config.appraisal_scroll_cell = Some((2, 2));
        let region = Region::new(Point { x: 0, y: 0 }, Point { x: 240, y: 100 }).unwrap();
        config.set_region(region);
        assert!(config.excluded_cells.is_empty());
        assert_eq!(config.appraisal_scroll_cell, None);
        assert_eq!(config.region(), Some(region));
    }

    #[test]
    fn test_negative_click_delay_clamped() {
        let mut config = MacroConfig::default();
        config.click_delay = -1.0;
        assert_eq!(config.click_delay(), Duration::ZERO);
    }
}
