// SPDX-License-Identifier: GPL-3.0-only

use crate::anchors::AnchorParams;
use crate::constants::{
    DEFAULT_ANCHOR_COUNT, DEFAULT_ANCHOR_NEIGHBORS, DEFAULT_PORT, PanoramaQuality,
};
use crate::errors::{AppError, AppResult};
use crate::types::ImageSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where reconstruction kernels run
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ComputeBackend {
    /// Use the GPU when an adapter is available, CPU otherwise
    #[default]
    Auto,
    /// Always run the rayon kernels
    Cpu,
    /// Require a GPU; startup fails without one
    Gpu,
}

impl std::str::FromStr for ComputeBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ComputeBackend::Auto),
            "cpu" => Ok(ComputeBackend::Cpu),
            "gpu" => Ok(ComputeBackend::Gpu),
            other => Err(format!("unknown compute backend '{}'", other)),
        }
    }
}

/// How near-field samples repaint far-field anchors
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum AnchorPainting {
    /// Best-matching sample per anchor above the cosine threshold
    #[default]
    NearestSample,
    /// Lookup-grid painting, only when closer than the anchor's recorded depth
    DepthTested,
}

impl std::str::FromStr for AnchorPainting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "nearestsample" | "nearest" => Ok(AnchorPainting::NearestSample),
            "depthtested" | "depth" => Ok(AnchorPainting::DepthTested),
            other => Err(format!("unknown anchor painting mode '{}'", other)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address
    pub bind_address: String,
    /// Canvas and pyramid preset
    pub quality: PanoramaQuality,
    /// Number of far-field anchors
    pub anchor_count: usize,
    /// Anchors blended per canvas texel
    pub anchor_neighbors: usize,
    pub compute: ComputeBackend,
    pub anchor_painting: AnchorPainting,
    /// Environment map JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Anchor network cache directory (None disables the cache)
    pub cache_dir: Option<PathBuf>,
    /// Per-connection message recording (None disables recording)
    pub recording_dir: Option<PathBuf>,
    /// Largest accepted transport frame
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            quality: PanoramaQuality::default(),
            anchor_count: DEFAULT_ANCHOR_COUNT,
            anchor_neighbors: DEFAULT_ANCHOR_NEIGHBORS,
            compute: ComputeBackend::default(),
            anchor_painting: AnchorPainting::default(),
            jpeg_quality: 75,
            cache_dir: dirs::cache_dir().map(|d| d.join("envlight")),
            recording_dir: None,
            max_message_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("envlight").join("config.json"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is an error.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            AppError::Config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(AppError::Config(format!(
                "jpeg_quality {} must be in 1..=100",
                self.jpeg_quality
            )));
        }
        if self.max_message_bytes == 0 {
            return Err(AppError::Config(
                "max_message_bytes must be positive".to_string(),
            ));
        }
        self.anchor_params().validate()
    }

    pub fn canvas_size(&self) -> ImageSize {
        ImageSize::new(self.quality.canvas_width(), self.quality.canvas_height())
    }

    /// Shape of the anchor network this configuration needs
    pub fn anchor_params(&self) -> AnchorParams {
        AnchorParams {
            anchor_count: self.anchor_count,
            neighbors: self.anchor_neighbors,
            canvas: self.canvas_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("envlight-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.canvas_size(), ImageSize::new(512, 256));
        assert_eq!(config.anchor_params().anchor_count, 1280);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = temp_dir();
        let config = ServerConfig::load(Some(&dir.join("absent.json"))).unwrap();
        assert_eq!(config, ServerConfig::default());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = temp_dir();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{ "quality": "High", "compute": "Cpu" }"#).unwrap();
        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.quality, PanoramaQuality::High);
        assert_eq!(config.compute, ComputeBackend::Cpu);
        assert_eq!(config.jpeg_quality, 75);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_save_then_load() {
        let dir = temp_dir();
        let path = dir.join("nested").join("config.json");
        let config = ServerConfig {
            anchor_painting: AnchorPainting::DepthTested,
            jpeg_quality: 90,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ServerConfig::load(Some(&path)).unwrap(), config);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ServerConfig {
            jpeg_quality: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let config = ServerConfig {
            anchor_neighbors: 5000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("gpu".parse::<ComputeBackend>(), Ok(ComputeBackend::Gpu));
        assert_eq!(
            "depth-tested".parse::<AnchorPainting>(),
            Ok(AnchorPainting::DepthTested)
        );
        assert!("fast".parse::<ComputeBackend>().is_err());
    }
}
