// SPDX-License-Identifier: GPL-3.0-only

//! Far-field anchor network
//!
//! A fixed set of directions on the unit sphere plus two screen-space grids
//! over the panorama canvas:
//! - the acceleration grid (`[H, W, K]`): the K angularly closest anchors of
//!   every texel, consumed by the far-field compositor
//! - the lookup grid (`[H, W]`): the single closest anchor of every texel,
//!   used for depth-tested anchor painting
//!
//! The network is built once per process (or loaded from the on-disk cache)
//! and shared read-only between sessions.

mod cache;
pub mod geometry;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::types::{ImageSize, dot, length};

pub use cache::{cache_file_name, read_cache, write_cache};
pub use geometry::{canvas_normals, direction_to_texel, fibonacci_sphere, texel_to_direction};

/// Shape of an anchor network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorParams {
    pub anchor_count: usize,
    pub neighbors: usize,
    pub canvas: ImageSize,
}

impl AnchorParams {
    pub fn validate(&self) -> AppResult<()> {
        if self.anchor_count == 0 || self.anchor_count > u16::MAX as usize + 1 {
            return Err(AppError::Config(format!(
                "anchor count {} must be in 1..=65536",
                self.anchor_count
            )));
        }
        if self.neighbors == 0 || self.neighbors > self.anchor_count {
            return Err(AppError::Config(format!(
                "anchor neighbors {} must be in 1..={}",
                self.neighbors, self.anchor_count
            )));
        }
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(AppError::Config(format!(
                "canvas size {} must be non-empty",
                self.canvas
            )));
        }
        Ok(())
    }
}

/// Precomputed anchors and their canvas grids (immutable after construction)
#[derive(Debug, Clone)]
pub struct AnchorNetwork {
    params: AnchorParams,
    directions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    neighbors: Vec<u16>,
    lookup: Vec<u16>,
}

impl AnchorNetwork {
    /// Build the network from scratch.
    ///
    /// For every texel, the K largest dot products between its normal and the
    /// anchor directions are selected, ordered best first.
    pub fn build(params: AnchorParams) -> AppResult<Self> {
        params.validate()?;
        let start = Instant::now();

        let directions = fibonacci_sphere(params.anchor_count);
        let normals = canvas_normals(params.canvas);
        let k = params.neighbors;

        let mut neighbors = vec![0u16; normals.len() * k];
        neighbors
            .par_chunks_mut(k)
            .zip(normals.par_iter())
            .for_each_init(
                || Vec::with_capacity(directions.len()),
                |scratch, (out, normal)| {
                    scratch.clear();
                    scratch.extend(
                        directions
                            .iter()
                            .enumerate()
                            .map(|(i, a)| (dot(*normal, *a), i as u16)),
                    );
                    // Descending by similarity, lower index first on ties
                    let by_similarity = |a: &(f32, u16), b: &(f32, u16)| {
                        b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
                    };
                    if k < scratch.len() {
                        scratch.select_nth_unstable_by(k - 1, by_similarity);
                        scratch.truncate(k);
                    }
                    scratch.sort_unstable_by(by_similarity);
                    for (slot, (_, index)) in out.iter_mut().zip(scratch.iter()) {
                        *slot = *index;
                    }
                },
            );

        let lookup = neighbors.chunks_exact(k).map(|n| n[0]).collect();

        info!(
            anchors = params.anchor_count,
            neighbors = k,
            canvas = %params.canvas,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Built anchor network"
        );

        Ok(Self {
            params,
            directions,
            normals,
            neighbors,
            lookup,
        })
    }

    /// Assemble a network from previously computed grids
    pub(crate) fn from_parts(
        params: AnchorParams,
        directions: Vec<[f32; 3]>,
        neighbors: Vec<u16>,
        lookup: Vec<u16>,
    ) -> AppResult<Self> {
        params.validate()?;
        let texels = params.canvas.pixel_count();
        if directions.len() != params.anchor_count
            || neighbors.len() != texels * params.neighbors
            || lookup.len() != texels
        {
            return Err(AppError::Config(format!(
                "anchor network parts do not match {:?}",
                params
            )));
        }
        if neighbors
            .iter()
            .chain(lookup.iter())
            .any(|&i| i as usize >= params.anchor_count)
        {
            return Err(AppError::Config(
                "anchor network references anchors out of range".to_string(),
            ));
        }

        Ok(Self {
            params,
            directions,
            normals: canvas_normals(params.canvas),
            neighbors,
            lookup,
        })
    }

    /// Load the network from `cache_dir`, building and caching it on a miss
    pub fn load_or_build(params: AnchorParams, cache_dir: Option<&Path>) -> AppResult<Arc<Self>> {
        let Some(dir) = cache_dir else {
            return Self::build(params).map(Arc::new);
        };

        let path = dir.join(cache_file_name(&params));
        match read_cache(&path, &params) {
            Ok(Some(network)) => {
                info!(path = %path.display(), "Loaded anchor network from cache");
                return Ok(Arc::new(network));
            }
            Ok(None) => debug!(path = %path.display(), "No usable anchor cache"),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring anchor cache"),
        }

        let network = Self::build(params)?;
        if let Err(e) = std::fs::create_dir_all(dir)
            .map_err(Into::into)
            .and_then(|_| write_cache(&path, &network))
        {
            warn!(path = %path.display(), error = %e, "Failed to write anchor cache");
        }
        Ok(Arc::new(network))
    }

    pub fn params(&self) -> &AnchorParams {
        &self.params
    }

    pub fn anchor_count(&self) -> usize {
        self.params.anchor_count
    }

    pub fn neighbor_count(&self) -> usize {
        self.params.neighbors
    }

    pub fn canvas_size(&self) -> ImageSize {
        self.params.canvas
    }

    /// Unit anchor directions
    pub fn directions(&self) -> &[[f32; 3]] {
        &self.directions
    }

    /// Canvas texel normals, row-major
    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    /// Flat `[H, W, K]` acceleration grid
    pub fn acceleration_grid(&self) -> &[u16] {
        &self.neighbors
    }

    /// Flat `[H, W]` nearest-anchor grid
    pub fn lookup_grid(&self) -> &[u16] {
        &self.lookup
    }

    /// K nearest anchors of a texel, best first
    #[inline]
    pub fn neighbors_of(&self, texel: usize) -> &[u16] {
        let k = self.params.neighbors;
        &self.neighbors[texel * k..(texel + 1) * k]
    }

    /// Nearest anchor of an arbitrary direction through the lookup grid.
    ///
    /// Returns `None` for zero-length or non-finite directions.
    pub fn lookup_anchor(&self, p: [f32; 3]) -> Option<usize> {
        let r = length(p);
        if !(r > 0.0) || !r.is_finite() {
            return None;
        }
        let size = self.params.canvas;
        let (u, v) = direction_to_texel(p, r, size.width, size.height);
        let index = self.lookup[v as usize * size.width as usize + u as usize] as usize;
        debug_assert!(index < self.params.anchor_count);
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> AnchorParams {
        AnchorParams {
            anchor_count: 64,
            neighbors: 8,
            canvas: ImageSize::new(32, 16),
        }
    }

    #[test]
    fn test_build_shapes() {
        let net = AnchorNetwork::build(small_params()).unwrap();
        assert_eq!(net.directions().len(), 64);
        assert_eq!(net.acceleration_grid().len(), 32 * 16 * 8);
        assert_eq!(net.lookup_grid().len(), 32 * 16);
        assert!(net.acceleration_grid().iter().all(|&i| i < 64));
    }

    #[test]
    fn test_neighbors_are_nearest_and_ordered() {
        let net = AnchorNetwork::build(small_params()).unwrap();
        for texel in [0, 100, 255, 511] {
            let n = net.normals()[texel];
            let sims: Vec<f32> = net
                .neighbors_of(texel)
                .iter()
                .map(|&i| dot(n, net.directions()[i as usize]))
                .collect();
            assert!(sims.windows(2).all(|w| w[0] >= w[1]));

            // No anchor outside the list beats the weakest neighbor
            let weakest = sims[sims.len() - 1];
            let brute_best = net
                .directions()
                .iter()
                .map(|a| dot(n, *a))
                .fold(f32::MIN, f32::max);
            assert_eq!(sims[0], brute_best);
            let better = net
                .directions()
                .iter()
                .filter(|a| dot(n, **a) > weakest)
                .count();
            assert!(better < 8);
        }
    }

    #[test]
    fn test_lookup_matches_first_neighbor() {
        let net = AnchorNetwork::build(small_params()).unwrap();
        let dir = net.normals()[37];
        assert_eq!(
            net.lookup_anchor([dir[0] * 3.0, dir[1] * 3.0, dir[2] * 3.0]),
            Some(net.neighbors_of(37)[0] as usize)
        );
        assert_eq!(net.lookup_anchor([0.0; 3]), None);
    }

    #[test]
    fn test_invalid_params() {
        let mut params = small_params();
        params.neighbors = 65;
        assert!(AnchorNetwork::build(params).is_err());
        params.neighbors = 0;
        assert!(AnchorNetwork::build(params).is_err());
    }
}
