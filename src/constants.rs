// SPDX-License-Identifier: GPL-3.0-only

//! Reconstruction-wide constants

use serde::{Deserialize, Serialize};

/// Distance sentinel meaning "no sample".
///
/// Strictly larger than any physically valid depth; never selected as a winning depth.
pub const CLIP_DISTANCE: f32 = 1000.0;

/// Maximum deviation (depth units) between a bilinear depth and any of its
/// four sources before the pixel is treated as straddling a silhouette edge
pub const DEPTH_EDGE_THRESHOLD: f32 = 0.015;

/// Cosine similarity an anchor's best sample must exceed to be repainted
pub const ANCHOR_MATCH_COSINE: f32 = 0.99;

/// Exponent of the far-field reconstruction kernel `max(0, n·a)^128`
pub const FAR_FIELD_EXPONENT: u32 = 128;

/// Initial per-anchor distance for depth-tested anchor painting
pub const ANCHOR_INITIAL_DEPTH: f32 = 10000.0;

/// Upper bound on near-field points (views × dense pixels) a session may allocate
pub const MAX_SESSION_POINTS: usize = 1 << 24;

/// Depth assigned to every far-field keyframe pixel (direction-only capture)
pub const FAR_FIELD_UNIT_DEPTH: f32 = 1.0;

/// Default number of far-field anchors on the unit sphere
pub const DEFAULT_ANCHOR_COUNT: usize = 1280;

/// Default number of nearest anchors blended per canvas texel
pub const DEFAULT_ANCHOR_NEIGHBORS: usize = 32;

/// Upper bound on pyramid levels (matches the GPU merge uniform layout)
pub const MAX_PYRAMID_LEVELS: usize = 4;

/// Default TCP port of the keyframe service
pub const DEFAULT_PORT: u16 = 8753;

/// Panorama quality presets
///
/// Each preset fixes the canvas resolution and the pyramid of projection
/// heights used by the multi-resolution projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PanoramaQuality {
    /// 512x256 canvas, levels [256, 128, 32]
    #[default]
    Low,
    /// 768x384 canvas, levels [384, 192]
    Medium,
    /// 1024x512 canvas, levels [512, 256, 128]
    High,
}

impl PanoramaQuality {
    pub const ALL: [PanoramaQuality; 3] = [
        PanoramaQuality::Low,
        PanoramaQuality::Medium,
        PanoramaQuality::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            PanoramaQuality::Low => "Low",
            PanoramaQuality::Medium => "Medium",
            PanoramaQuality::High => "High",
        }
    }

    /// Canvas height; the canvas is always twice as wide as it is tall
    pub fn canvas_height(&self) -> u32 {
        match self {
            PanoramaQuality::Low => 256,
            PanoramaQuality::Medium => 384,
            PanoramaQuality::High => 512,
        }
    }

    pub fn canvas_width(&self) -> u32 {
        self.canvas_height() * 2
    }

    /// Pyramid level heights, ordered as they are projected
    pub fn level_heights(&self) -> &'static [u32] {
        match self {
            PanoramaQuality::Low => &[256, 128, 32],
            PanoramaQuality::Medium => &[384, 192],
            PanoramaQuality::High => &[512, 256, 128],
        }
    }
}

impl std::fmt::Display for PanoramaQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for PanoramaQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(PanoramaQuality::Low),
            "medium" => Ok(PanoramaQuality::Medium),
            "high" => Ok(PanoramaQuality::High),
            other => Err(format!("unknown panorama quality '{}'", other)),
        }
    }
}
