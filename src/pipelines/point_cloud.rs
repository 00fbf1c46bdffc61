// SPDX-License-Identifier: GPL-3.0-only

//! Point cloud generation from depth + 4:2:0 color
//!
//! Per dense color pixel: bilinear depth upsampling with an edge guard,
//! pinhole unprojection, camera-to-world transform and YCbCr decode.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, warn};

use super::PointCloud;
use crate::constants::{CLIP_DISTANCE, DEPTH_EDGE_THRESHOLD};
use crate::shaders::GpuContext;
use crate::shaders::point_cloud::PointCloudProcessor;
use crate::types::{CameraIntrinsics, CameraToWorld, ImageSize, ycbcr_to_rgb};

/// One captured view, borrowed from a decoded keyframe
#[derive(Debug, Clone, Copy)]
pub struct ViewFrame<'a> {
    /// Color resolution; one point is produced per color pixel
    pub color_size: ImageSize,
    /// Resolution of `depth`
    pub depth_size: ImageSize,
    /// Intrinsics at `color_size`
    pub intrinsics: CameraIntrinsics,
    pub camera_to_world: CameraToWorld,
    pub depth: &'a [f32],
    pub luma: &'a [u8],
    pub chroma: &'a [u8],
}

impl ViewFrame<'_> {
    pub fn pixel_count(&self) -> usize {
        self.color_size.pixel_count()
    }

    /// Color pixels per depth pixel along each axis
    pub fn upsample_rate(&self) -> f32 {
        self.color_size.width as f32 / self.depth_size.width as f32
    }

    /// Whether plane lengths agree with the declared sizes
    pub fn is_consistent(&self) -> bool {
        self.depth.len() == self.depth_size.pixel_count()
            && self.luma.len() == self.color_size.pixel_count()
            && self.chroma.len() == self.color_size.chroma().pixel_count() * 2
    }
}

/// Compute one point of `frame`
#[inline]
fn generate_point(frame: &ViewFrame<'_>, i: usize) -> ([f32; 3], [u8; 3]) {
    let width = frame.color_size.width as usize;
    let height = frame.color_size.height as usize;
    let depth_w = frame.depth_size.width as usize;
    let depth_h = frame.depth_size.height as usize;

    let col = i % width;
    let row = i / width;

    // Bilinear upsampling; weights use the unclamped cell, reads are clamped
    let rate = frame.upsample_rate();
    let dx = col as f32 / rate;
    let dy = row as f32 / rate;
    let x0 = dx.floor();
    let y0 = dy.floor();
    let x1 = x0 + 1.0;
    let y1 = y0 + 1.0;

    let wa = (x1 - dx) * (y1 - dy);
    let wb = (x1 - dx) * (dy - y0);
    let wc = (dx - x0) * (y1 - dy);
    let wd = (dx - x0) * (dy - y0);

    let xi0 = (x0 as usize).min(depth_w - 1);
    let xi1 = (x1 as usize).min(depth_w - 1);
    let yi0 = (y0 as usize).min(depth_h - 1);
    let yi1 = (y1 as usize).min(depth_h - 1);

    let da = frame.depth[yi0 * depth_w + xi0];
    let db = frame.depth[yi1 * depth_w + xi0];
    let dc = frame.depth[yi0 * depth_w + xi1];
    let dd = frame.depth[yi1 * depth_w + xi1];

    let mut d = wa * da + wb * db + wc * dc + wd * dd;
    if [da, db, dc, dd]
        .iter()
        .any(|s| (s - d).abs() > DEPTH_EDGE_THRESHOLD)
    {
        d = CLIP_DISTANCE;
    }

    // Unprojection measures v from the flipped origin
    let u = col as f32;
    let v = (height - row) as f32;
    let xyz = frame
        .camera_to_world
        .transform_point(frame.intrinsics.unproject(u, v, d));

    let chroma_index = ((row / 2) * (width / 2) + col / 2) * 2;
    let rgb = ycbcr_to_rgb(
        frame.luma[i],
        frame.chroma[chroma_index],
        frame.chroma[chroma_index + 1],
    );

    (xyz, rgb)
}

/// CPU kernel: fill `xyz`/`rgb` (one view slice) from `frame`
pub fn generate_view_cpu(frame: &ViewFrame<'_>, xyz: &mut [[f32; 3]], rgb: &mut [[u8; 3]]) {
    debug_assert!(frame.is_consistent());
    xyz.par_iter_mut()
        .zip(rgb.par_iter_mut())
        .enumerate()
        .for_each(|(i, (p, c))| {
            let (point, color) = generate_point(frame, i);
            *p = point;
            *c = color;
        });
}

/// Converts views into their slices of a [`PointCloud`]
pub struct PointCloudGenerator {
    gpu: Option<PointCloudProcessor>,
}

impl PointCloudGenerator {
    /// Generator running on `gpu` when given, on CPU otherwise
    pub fn new(gpu: Option<&Arc<GpuContext>>) -> Self {
        let gpu = gpu.and_then(|ctx| match PointCloudProcessor::new(ctx) {
            Ok(processor) => Some(processor),
            Err(e) => {
                warn!(error = %e, "GPU point cloud processor unavailable, using CPU");
                None
            }
        });
        Self { gpu }
    }

    pub fn uses_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    /// Write `frame` into view slice `view_index` of `cloud`
    pub fn generate(&mut self, cloud: &mut PointCloud, view_index: usize, frame: &ViewFrame<'_>) {
        let start = Instant::now();
        let (xyz, rgb) = cloud.view_mut(view_index);

        if let Some(processor) = self.gpu.as_mut() {
            match pollster::block_on(processor.generate(frame, xyz, rgb)) {
                Ok(()) => {
                    debug!(
                        view_index,
                        points = frame.pixel_count(),
                        elapsed_us = start.elapsed().as_micros() as u64,
                        "Generated point cloud view (GPU)"
                    );
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "GPU point cloud generation failed, falling back to CPU");
                    self.gpu = None;
                }
            }
        }

        generate_view_cpu(frame, xyz, rgb);
        debug!(
            view_index,
            points = frame.pixel_count(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Generated point cloud view (CPU)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame<'a>(
        depth: &'a [f32],
        luma: &'a [u8],
        chroma: &'a [u8],
        camera_to_world: CameraToWorld,
    ) -> ViewFrame<'a> {
        ViewFrame {
            color_size: ImageSize::new(8, 6),
            depth_size: ImageSize::new(4, 3),
            intrinsics: CameraIntrinsics::new(4.0, 4.0, 4.0, 3.0),
            camera_to_world,
            depth,
            luma,
            chroma,
        }
    }

    #[test]
    fn test_constant_depth_is_kept() {
        let depth = vec![2.5; 12];
        let luma = vec![128; 48];
        let chroma = vec![128; 24];
        let frame = flat_frame(&depth, &luma, &chroma, CameraToWorld::IDENTITY);

        let mut xyz = vec![[0.0; 3]; 48];
        let mut rgb = vec![[0; 3]; 48];
        generate_view_cpu(&frame, &mut xyz, &mut rgb);

        for (p, c) in xyz.iter().zip(&rgb) {
            assert!((p[2] - 2.5).abs() < 1e-5, "{:?}", p);
            assert_eq!(*c, [128, 128, 128]);
        }
    }

    #[test]
    fn test_unprojection_uses_flipped_rows() {
        let depth = vec![1.0; 12];
        let luma = vec![0; 48];
        let chroma = vec![128; 24];
        let frame = flat_frame(&depth, &luma, &chroma, CameraToWorld::IDENTITY);

        let mut xyz = vec![[0.0; 3]; 48];
        let mut rgb = vec![[0; 3]; 48];
        generate_view_cpu(&frame, &mut xyz, &mut rgb);

        // Pixel (col 4, row 0) has v = 6: x = 0, y = (6 - 3) / 4
        let p = xyz[4];
        assert!(p[0].abs() < 1e-6);
        assert!((p[1] - 0.75).abs() < 1e-6);
        assert!((p[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_depth_edge_is_clipped() {
        // Left half near, right half far
        let depth: Vec<f32> = (0..12)
            .map(|i| if i % 4 < 2 { 1.0 } else { 3.0 })
            .collect();
        let luma = vec![50; 48];
        let chroma = vec![128; 24];
        let frame = flat_frame(&depth, &luma, &chroma, CameraToWorld::IDENTITY);

        let mut xyz = vec![[0.0; 3]; 48];
        let mut rgb = vec![[0; 3]; 48];
        generate_view_cpu(&frame, &mut xyz, &mut rgb);

        // Column 3 blends depth columns 1 and 2
        assert_eq!(xyz[3][2], CLIP_DISTANCE);
        // Column 0 reads only the near side
        assert!((xyz[0][2] - 1.0).abs() < 1e-6);
        // Column 6 reads only the far side
        assert!((xyz[6][2] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_transform_applied() {
        let depth = vec![1.0; 12];
        let luma = vec![0; 48];
        let chroma = vec![128; 24];
        let shift = CameraToWorld([
            1.0, 0.0, 0.0, 10.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, -1.0,
        ]);
        let frame = flat_frame(&depth, &luma, &chroma, shift);

        let mut xyz = vec![[0.0; 3]; 48];
        let mut rgb = vec![[0; 3]; 48];
        generate_view_cpu(&frame, &mut xyz, &mut rgb);
        assert!((xyz[4][0] - 10.0).abs() < 1e-6);
        assert!(xyz[4][2].abs() < 1e-6);
    }

    #[test]
    fn test_generator_writes_view_slice() {
        let depth = vec![1.0; 12];
        let luma = vec![90; 48];
        let chroma = vec![128; 24];
        let frame = flat_frame(&depth, &luma, &chroma, CameraToWorld::IDENTITY);

        let mut cloud = PointCloud::new(2, 48);
        let mut generator = PointCloudGenerator::new(None);
        generator.generate(&mut cloud, 1, &frame);

        assert_eq!(cloud.view(0).0[0], [CLIP_DISTANCE; 3]);
        assert_eq!(cloud.view(1).1[0], [90, 90, 90]);
    }
}
