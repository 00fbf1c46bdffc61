// SPDX-License-Identifier: GPL-3.0-only

//! Multi-resolution panorama projection and cross-level merge
//!
//! Within a level the farthest valid sample of a texel is kept; across levels
//! the merge keeps the nearest recorded sample. The asymmetry is deliberate
//! and both rules must stay as they are.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, warn};

use super::{Canvas, PanoramaLevels, PointCloud};
use crate::anchors::direction_to_texel;
use crate::constants::CLIP_DISTANCE;
use crate::shaders::GpuContext;
use crate::shaders::panorama::PanoramaProcessor;
use crate::types::length;

/// Distance of `p` if it may be projected, `None` if it must be clipped
#[inline]
pub(crate) fn projectable_distance(p: [f32; 3], half_extent: f32) -> Option<f32> {
    if p.iter().any(|c| !(c.abs() < half_extent)) {
        return None;
    }
    let r = length(p);
    (r > 0.0 && r < CLIP_DISTANCE).then_some(r)
}

/// CPU kernel: project every point of `xyz` into every level.
///
/// Levels are processed in parallel; each level is a sequential scan, so the
/// lowest point index wins among equally distant samples.
pub fn project_cpu(xyz: &[[f32; 3]], half_extent: f32, levels: &mut PanoramaLevels) {
    levels
        .levels_mut()
        .into_par_iter()
        .for_each(|(h, indices, depths)| {
            let w = h * 2;
            for (i, p) in xyz.iter().enumerate() {
                let Some(r) = projectable_distance(*p, half_extent) else {
                    continue;
                };
                let (u, v) = direction_to_texel(*p, r, w, h);
                let slot = v as usize * w as usize + u as usize;
                let previous = depths[slot];
                if r > previous || previous >= CLIP_DISTANCE {
                    depths[slot] = r;
                    indices[slot] = i as u32;
                }
            }
        });
}

/// CPU kernel: resolve the nearest level sample of every canvas texel.
///
/// Texels without any hit keep their current color.
pub fn merge_cpu(levels: &PanoramaLevels, rgb: &[[u8; 3]], canvas: &mut Canvas) {
    let size = canvas.size();
    let width = size.width as usize;
    let canvas_h = size.height;

    canvas
        .data
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(v, row)| {
            let v = v as u32;
            for (u, texel) in row.iter_mut().enumerate() {
                let u = u as u32;
                let mut best_depth = CLIP_DISTANCE;
                let mut best_slot = None;
                for (level, &h) in levels.heights().iter().enumerate() {
                    let scale = canvas_h / h;
                    let slot = levels.slot(level, u / scale, v / scale);
                    let depth = levels.depths[slot];
                    if depth < best_depth {
                        best_depth = depth;
                        best_slot = Some(slot);
                    }
                }
                if let Some(slot) = best_slot {
                    let index = levels.indices[slot] as usize;
                    debug_assert!(index < rgb.len());
                    *texel = rgb[index].map(f32::from);
                }
            }
        });
}

/// Projects point clouds into the pyramid and merges it onto the canvas
pub struct MultiResolutionProjector {
    half_extent: f32,
    gpu: Option<PanoramaProcessor>,
}

impl MultiResolutionProjector {
    pub fn new(half_extent: f32, gpu: Option<&Arc<GpuContext>>) -> Self {
        let gpu = gpu.and_then(|ctx| match PanoramaProcessor::new(ctx) {
            Ok(processor) => Some(processor),
            Err(e) => {
                warn!(error = %e, "GPU panorama processor unavailable, using CPU");
                None
            }
        });
        Self { half_extent, gpu }
    }

    pub fn half_extent(&self) -> f32 {
        self.half_extent
    }

    pub fn uses_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    /// Reset every level and project the whole cloud into it
    pub fn project(&mut self, cloud: &PointCloud, levels: &mut PanoramaLevels) {
        let start = Instant::now();
        levels.reset();

        if let Some(processor) = self.gpu.as_mut() {
            match pollster::block_on(processor.project(&cloud.xyz, self.half_extent, levels)) {
                Ok(()) => {
                    debug!(
                        points = cloud.len(),
                        levels = levels.level_count(),
                        elapsed_us = start.elapsed().as_micros() as u64,
                        "Projected point cloud (GPU)"
                    );
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "GPU projection failed, falling back to CPU");
                    self.gpu = None;
                    levels.reset();
                }
            }
        }

        project_cpu(&cloud.xyz, self.half_extent, levels);
        debug!(
            points = cloud.len(),
            levels = levels.level_count(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Projected point cloud (CPU)"
        );
    }

    /// Overwrite every canvas texel that received a near-field hit
    pub fn merge(&mut self, levels: &PanoramaLevels, rgb: &[[u8; 3]], canvas: &mut Canvas) {
        let start = Instant::now();

        if let Some(processor) = self.gpu.as_mut() {
            match pollster::block_on(processor.merge(levels, rgb, canvas)) {
                Ok(()) => {
                    debug!(
                        elapsed_us = start.elapsed().as_micros() as u64,
                        "Merged panorama levels (GPU)"
                    );
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "GPU merge failed, falling back to CPU");
                    self.gpu = None;
                }
            }
        }

        merge_cpu(levels, rgb, canvas);
        debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            "Merged panorama levels (CPU)"
        );
    }
}
