// SPDX-License-Identifier: GPL-3.0-only

//! Reconstruction pipeline stages
//!
//! Host buffers below are the source of truth for every stage. A stage with a
//! GPU processor uploads its inputs, dispatches, waits for completion and
//! writes the results back before returning; without one it runs the CPU
//! kernel in place. Either way a stage has fully finished before the next
//! stage reads its outputs.

mod anchor_set;
mod compositor;
mod point_cloud;
mod projector;

pub use anchor_set::{AnchorSet, sample_to_anchor};
pub use compositor::{FarFieldCompositor, composite_cpu, far_field_weight};
pub use point_cloud::{PointCloudGenerator, ViewFrame, generate_view_cpu};
pub use projector::{MultiResolutionProjector, merge_cpu, project_cpu};

use crate::constants::CLIP_DISTANCE;
use crate::types::ImageSize;

/// Colored point cloud holding every view in its own fixed slice
#[derive(Debug, Clone)]
pub struct PointCloud {
    pub xyz: Vec<[f32; 3]>,
    pub rgb: Vec<[u8; 3]>,
    views: usize,
    pixels_per_view: usize,
}

impl PointCloud {
    /// Allocate `views` slices of `pixels_per_view` points.
    ///
    /// Points start at `CLIP_DISTANCE` on every axis so views that were never
    /// generated are rejected by the projector.
    pub fn new(views: usize, pixels_per_view: usize) -> Self {
        let len = views * pixels_per_view;
        Self {
            xyz: vec![[CLIP_DISTANCE; 3]; len],
            rgb: vec![[0; 3]; len],
            views,
            pixels_per_view,
        }
    }

    pub fn views(&self) -> usize {
        self.views
    }

    pub fn pixels_per_view(&self) -> usize {
        self.pixels_per_view
    }

    pub fn len(&self) -> usize {
        self.xyz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xyz.is_empty()
    }

    /// First point index of `view`
    pub fn view_offset(&self, view: usize) -> usize {
        view * self.pixels_per_view
    }

    /// Points of one view
    pub fn view(&self, view: usize) -> (&[[f32; 3]], &[[u8; 3]]) {
        let range = self.view_offset(view)..self.view_offset(view) + self.pixels_per_view;
        (&self.xyz[range.clone()], &self.rgb[range])
    }

    pub fn view_mut(&mut self, view: usize) -> (&mut [[f32; 3]], &mut [[u8; 3]]) {
        let range = self.view_offset(view)..self.view_offset(view) + self.pixels_per_view;
        (&mut self.xyz[range.clone()], &mut self.rgb[range])
    }
}

/// Per-level projection buffers.
///
/// Level `l` with height `h` is a `h × 2h` slice of `(point index, depth)`
/// pairs; levels are stored back to back in one flat buffer.
#[derive(Debug, Clone)]
pub struct PanoramaLevels {
    heights: Vec<u32>,
    offsets: Vec<usize>,
    pub indices: Vec<u32>,
    pub depths: Vec<f32>,
}

impl PanoramaLevels {
    pub fn new(heights: &[u32]) -> Self {
        let mut offsets = Vec::with_capacity(heights.len());
        let mut total = 0usize;
        for &h in heights {
            offsets.push(total);
            total += h as usize * h as usize * 2;
        }
        Self {
            heights: heights.to_vec(),
            offsets,
            indices: vec![0; total],
            depths: vec![CLIP_DISTANCE; total],
        }
    }

    /// Restore the `(0, CLIP_DISTANCE)` "no hit" sentinel everywhere
    pub fn reset(&mut self) {
        self.indices.fill(0);
        self.depths.fill(CLIP_DISTANCE);
    }

    pub fn heights(&self) -> &[u32] {
        &self.heights
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn level_count(&self) -> usize {
        self.heights.len()
    }

    pub fn level_size(&self, level: usize) -> ImageSize {
        let h = self.heights[level];
        ImageSize::new(h * 2, h)
    }

    /// Flat slot of texel `(u, v)` in `level`
    #[inline]
    pub fn slot(&self, level: usize, u: u32, v: u32) -> usize {
        let h = self.heights[level] as usize;
        self.offsets[level] + v as usize * h * 2 + u as usize
    }

    /// Recorded `(index, depth)` of a texel
    pub fn get(&self, level: usize, u: u32, v: u32) -> (u32, f32) {
        let slot = self.slot(level, u, v);
        (self.indices[slot], self.depths[slot])
    }

    /// Split the flat buffers into per-level `(height, indices, depths)` views
    pub fn levels_mut(&mut self) -> Vec<(u32, &mut [u32], &mut [f32])> {
        let mut out = Vec::with_capacity(self.heights.len());
        let mut indices = self.indices.as_mut_slice();
        let mut depths = self.depths.as_mut_slice();
        for &h in &self.heights {
            let len = h as usize * h as usize * 2;
            let (level_indices, rest_indices) = std::mem::take(&mut indices).split_at_mut(len);
            let (level_depths, rest_depths) = std::mem::take(&mut depths).split_at_mut(len);
            out.push((h, level_indices, level_depths));
            indices = rest_indices;
            depths = rest_depths;
        }
        out
    }
}

/// Equirectangular `[H, W, 3]` float color buffer
#[derive(Debug, Clone)]
pub struct Canvas {
    size: ImageSize,
    pub data: Vec<[f32; 3]>,
}

impl Canvas {
    pub fn new(size: ImageSize) -> Self {
        Self {
            size,
            data: vec![[0.0; 3]; size.pixel_count()],
        }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn fill(&mut self, rgb: [u8; 3]) {
        self.data.fill(rgb.map(f32::from));
    }

    pub fn texel(&self, u: u32, v: u32) -> [f32; 3] {
        self.data[v as usize * self.size.width as usize + u as usize]
    }

    /// Interleaved 8-bit RGB, rounded and saturated into `[0, 255]`
    pub fn to_rgb8(&self) -> Vec<u8> {
        self.data
            .iter()
            .flat_map(|c| c.map(|v| v.round() as u8))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_cloud_views() {
        let mut cloud = PointCloud::new(3, 4);
        assert_eq!(cloud.len(), 12);
        assert_eq!(cloud.view_offset(2), 8);
        cloud.view_mut(1).0[0] = [1.0, 2.0, 3.0];
        assert_eq!(cloud.xyz[4], [1.0, 2.0, 3.0]);
        assert_eq!(cloud.view(0).0[0], [CLIP_DISTANCE; 3]);
    }

    #[test]
    fn test_levels_layout() {
        let mut levels = PanoramaLevels::new(&[4, 2]);
        assert_eq!(levels.offsets(), &[0, 32]);
        assert_eq!(levels.depths.len(), 40);
        assert_eq!(levels.slot(1, 3, 1), 32 + 4 + 3);

        {
            let split = levels.levels_mut();
            assert_eq!(split.len(), 2);
            assert_eq!(split[0].1.len(), 32);
            assert_eq!(split[1].2.len(), 8);
        }

        levels.depths[5] = 2.0;
        levels.indices[5] = 9;
        levels.reset();
        assert_eq!(levels.get(0, 1, 1), (0, CLIP_DISTANCE));
    }

    #[test]
    fn test_canvas_rgb8_saturates() {
        let mut canvas = Canvas::new(ImageSize::new(2, 1));
        canvas.data[0] = [300.0, -4.0, 127.9];
        canvas.data[1] = [1.0, 2.4, 2.6];
        assert_eq!(canvas.to_rgb8(), vec![255, 0, 128, 1, 2, 3]);
    }

    #[test]
    fn test_blended_gray_stays_on_level() {
        // Normalized far-field blends land just under the integer
        let mut canvas = Canvas::new(ImageSize::new(1, 1));
        canvas.data[0] = [127.99998, 63.99999, 0.00001];
        assert_eq!(canvas.to_rgb8(), vec![128, 64, 0]);
    }
}
