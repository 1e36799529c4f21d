//! Persistent render settings

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::util::{Error, Result};

/// Render settings that persist between sessions.
///
/// Values the render node sets (`Samples`, `Depth`, `Background`) override
/// the matching main-view fields per scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    // Main view
    pub max_samples: u32,
    pub max_depth: u32,
    pub background: [f32; 3],
    pub resolution: [u32; 2],

    // Thumbnails
    pub icon_size: u32,
    pub icon_samples: u32,
    pub icon_max_depth: u32,
    pub icon_background: [f32; 3],

    // CPU backend threads (0 = rayon default)
    pub workers: usize,

    // Fixed seed for reproducible sample sequences
    pub seed: Option<u64>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_samples: 10_000,
            max_depth: 6,
            background: [0.02; 3],
            resolution: [800, 600],
            icon_size: 128,
            icon_samples: 64,
            icon_max_depth: 2,
            icon_background: [0.1; 3],
            workers: 0,
            seed: None,
        }
    }
}

impl RenderSettings {
    /// Parse settings from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut settings: Self = serde_json::from_str(json)?;
        settings.sanitize();
        Ok(settings)
    }

    /// Load settings from file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Save settings to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn sanitize(&mut self) {
        self.max_depth = self.max_depth.max(1);
        self.icon_max_depth = self.icon_max_depth.max(1);
        self.icon_size = self.icon_size.max(1);
        self.resolution = [self.resolution[0].max(1), self.resolution[1].max(1)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = RenderSettings::default();
        assert_eq!(s.max_samples, 10_000);
        assert_eq!(s.resolution, [800, 600]);
        assert_eq!(s.icon_size, 128);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let s = RenderSettings::from_json(r#"{ "max_samples": 32, "max_depth": 0 }"#).unwrap();
        assert_eq!(s.max_samples, 32);
        assert_eq!(s.max_depth, 1);
        assert_eq!(s.icon_samples, 64);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.json");
        let s = RenderSettings { max_samples: 5, seed: Some(7), ..Default::default() };
        s.save(&path).unwrap();
        assert_eq!(RenderSettings::load(&path).unwrap(), s);
        assert!(matches!(RenderSettings::load(dir.path().join("missing.json")), Err(Error::FileNotFound(_))));
    }
}
