// SPDX-License-Identifier: GPL-3.0-only

//! Per-session anchor colors and anchor painting

use rayon::prelude::*;

use crate::anchors::AnchorNetwork;
use crate::constants::{ANCHOR_INITIAL_DEPTH, ANCHOR_MATCH_COSINE, CLIP_DISTANCE};
use crate::types::{dot, length, normalize};

/// Mutable anchor state owned by one session
#[derive(Debug, Clone)]
pub struct AnchorSet {
    pub rgb: Vec<[u8; 3]>,
    /// Nearest observed distance per anchor (depth-tested painting only)
    pub depth: Vec<f32>,
}

impl AnchorSet {
    pub fn new(count: usize, ambient: [u8; 3]) -> Self {
        Self {
            rgb: vec![ambient; count],
            depth: vec![ANCHOR_INITIAL_DEPTH; count],
        }
    }

    pub fn len(&self) -> usize {
        self.rgb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rgb.is_empty()
    }

    pub fn reset(&mut self, ambient: [u8; 3]) {
        self.rgb.fill(ambient);
        self.depth.fill(ANCHOR_INITIAL_DEPTH);
    }

    /// Copy `colors[a]` into every anchor `a` selected by `mask`
    pub fn paint(&mut self, mask: &[bool], colors: &[[u8; 3]]) -> usize {
        let mut painted = 0;
        for ((rgb, &selected), color) in self.rgb.iter_mut().zip(mask).zip(colors) {
            if selected {
                *rgb = *color;
                painted += 1;
            }
        }
        painted
    }

    /// Depth-tested painting through the lookup grid.
    ///
    /// Every `downsample`-th point repaints its nearest anchor if it is closer
    /// than anything seen so far. Clipped points are skipped.
    pub fn splat_samples(
        &mut self,
        network: &AnchorNetwork,
        xyz: &[[f32; 3]],
        rgb: &[[u8; 3]],
        downsample: usize,
    ) -> usize {
        let mut painted = 0;
        for (p, color) in xyz.iter().zip(rgb).step_by(downsample.max(1)) {
            let r = length(*p);
            if !(r < CLIP_DISTANCE) {
                continue;
            }
            let Some(anchor) = network.lookup_anchor(*p) else {
                continue;
            };
            if r < self.depth[anchor] {
                self.depth[anchor] = r;
                self.rgb[anchor] = *color;
                painted += 1;
            }
        }
        painted
    }
}

/// Match sampled points to anchors.
///
/// Points are taken with stride `downsample`; with `filter_surroundings` only
/// the last quarter of those samples is eligible. For every anchor the
/// sample with the largest cosine similarity is found; the anchor is selected
/// when that similarity exceeds [`ANCHOR_MATCH_COSINE`], with the sample's
/// color. Returns `(mask, colors)`, both indexed by anchor.
pub fn sample_to_anchor(
    xyz: &[[f32; 3]],
    rgb: &[[u8; 3]],
    anchor_directions: &[[f32; 3]],
    downsample: usize,
    filter_surroundings: bool,
) -> (Vec<bool>, Vec<[u8; 3]>) {
    let mut samples: Vec<([f32; 3], [u8; 3])> = xyz
        .iter()
        .zip(rgb)
        .step_by(downsample.max(1))
        .map(|(p, c)| (normalize(*p), *c))
        .collect();

    if filter_surroundings {
        let start = samples.len() * 3 / 4;
        samples.drain(..start);
    }

    anchor_directions
        .par_iter()
        .map(|anchor| {
            let mut best = f32::NEG_INFINITY;
            let mut color = [0u8; 3];
            for (dir, c) in &samples {
                let similarity = dot(*anchor, *dir);
                if similarity > best {
                    best = similarity;
                    color = *c;
                }
            }
            (best > ANCHOR_MATCH_COSINE, color)
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::AnchorParams;
    use crate::types::ImageSize;

    fn direction_at_cosine(cosine: f32) -> [f32; 3] {
        // Rotated away from +Y in the YZ plane
        let sine = (1.0 - cosine * cosine).sqrt();
        [0.0, cosine, sine]
    }

    #[test]
    fn test_match_threshold() {
        let anchors = [[0.0, 1.0, 0.0]];

        let weak = [direction_at_cosine(0.98)];
        let (mask, _) = sample_to_anchor(&weak, &[[9, 9, 9]], &anchors, 1, false);
        assert_eq!(mask, vec![false]);

        let strong = [direction_at_cosine(0.995)];
        let (mask, colors) = sample_to_anchor(&strong, &[[9, 8, 7]], &anchors, 1, false);
        assert_eq!(mask, vec![true]);
        assert_eq!(colors, vec![[9, 8, 7]]);
    }

    #[test]
    fn test_best_sample_wins_and_distance_is_ignored() {
        let anchors = [[0.0, 0.0, 1.0]];
        let xyz = [[0.1, 0.0, 5.0], [0.0, 0.0, 0.5], [0.0, 0.3, 3.0]];
        let rgb = [[1, 1, 1], [2, 2, 2], [3, 3, 3]];
        let (mask, colors) = sample_to_anchor(&xyz, &rgb, &anchors, 1, false);
        assert_eq!(mask, vec![true]);
        assert_eq!(colors, vec![[2, 2, 2]]);
    }

    #[test]
    fn test_filter_keeps_last_quarter() {
        let anchors = [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]];
        // Eight samples; only the last two survive the filter
        let mut xyz = vec![[0.0, 0.0, 1.0]; 6];
        xyz.extend([[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let rgb = vec![[5, 5, 5]; 8];

        let (mask, _) = sample_to_anchor(&xyz, &rgb, &anchors, 1, true);
        assert_eq!(mask, vec![false, true]);

        let (mask, _) = sample_to_anchor(&xyz, &rgb, &anchors, 1, false);
        assert_eq!(mask, vec![true, true]);
    }

    #[test]
    fn test_downsample_stride() {
        let anchors = [[1.0, 0.0, 0.0]];
        let xyz = [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let rgb = [[0, 0, 0]; 3];
        let (mask, _) = sample_to_anchor(&xyz, &rgb, &anchors, 2, false);
        assert_eq!(mask, vec![false]);
    }

    #[test]
    fn test_paint_applies_mask() {
        let mut set = AnchorSet::new(3, [1, 2, 3]);
        let painted = set.paint(&[false, true, false], &[[9; 3], [8; 3], [7; 3]]);
        assert_eq!(painted, 1);
        assert_eq!(set.rgb, vec![[1, 2, 3], [8, 8, 8], [1, 2, 3]]);
    }

    #[test]
    fn test_splat_is_depth_tested() {
        let network = AnchorNetwork::build(AnchorParams {
            anchor_count: 64,
            neighbors: 4,
            canvas: ImageSize::new(32, 16),
        })
        .unwrap();
        let mut set = AnchorSet::new(64, [0, 0, 0]);

        let far = [[0.0, 0.0, 4.0]];
        let near = [[0.0, 0.0, 2.0]];
        let anchor = network.lookup_anchor(far[0]).unwrap();

        assert_eq!(set.splat_samples(&network, &far, &[[10; 3]], 1), 1);
        assert_eq!(set.splat_samples(&network, &near, &[[20; 3]], 1), 1);
        // Farther sample no longer repaints
        assert_eq!(set.splat_samples(&network, &far, &[[30; 3]], 1), 0);
        assert_eq!(set.rgb[anchor], [20; 3]);
        assert_eq!(set.depth[anchor], 2.0);

        // Clipped samples are ignored
        let clipped = [[0.0, 0.0, CLIP_DISTANCE]];
        assert_eq!(set.splat_samples(&network, &clipped, &[[40; 3]], 1), 0);

        set.reset([5, 5, 5]);
        assert_eq!(set.depth[anchor], ANCHOR_INITIAL_DEPTH);
        assert_eq!(set.rgb[anchor], [5, 5, 5]);
    }
}
