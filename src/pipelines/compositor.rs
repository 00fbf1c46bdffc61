// SPDX-License-Identifier: GPL-3.0-only

//! Far-field composite
//!
//! Every canvas texel becomes the `max(0, n·a)^128`-weighted mean of its K
//! nearest anchor colors. Texels whose weights all vanish keep the ambient
//! fill.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, warn};

use super::{AnchorSet, Canvas};
use crate::anchors::AnchorNetwork;
use crate::constants::FAR_FIELD_EXPONENT;
use crate::shaders::GpuContext;
use crate::shaders::far_field::FarFieldProcessor;
use crate::types::dot;

/// `max(0, cos)^128` by repeated squaring
#[inline]
pub fn far_field_weight(cosine: f32) -> f32 {
    let mut w = cosine.max(0.0);
    for _ in 0..FAR_FIELD_EXPONENT.trailing_zeros() {
        w *= w;
    }
    w
}

/// CPU kernel: fill `canvas` with ambient, then blend anchors into it
pub fn composite_cpu(
    canvas: &mut Canvas,
    network: &AnchorNetwork,
    anchors: &AnchorSet,
    ambient: [u8; 3],
) {
    debug_assert_eq!(canvas.size(), network.canvas_size());
    canvas.fill(ambient);

    let directions = network.directions();
    canvas
        .data
        .par_iter_mut()
        .zip(network.normals().par_iter())
        .enumerate()
        .for_each(|(texel, (out, normal))| {
            let mut acc = [0.0f32; 3];
            let mut weight_sum = 0.0f32;
            for &anchor in network.neighbors_of(texel) {
                let anchor = anchor as usize;
                let w = far_field_weight(dot(*normal, directions[anchor]));
                let rgb = anchors.rgb[anchor];
                acc[0] += w * rgb[0] as f32;
                acc[1] += w * rgb[1] as f32;
                acc[2] += w * rgb[2] as f32;
                weight_sum += w;
            }
            if weight_sum > 0.0 {
                *out = acc.map(|c| c / weight_sum);
            }
        });
}

/// Reconstructs far-field illumination from anchor colors
pub struct FarFieldCompositor {
    network: Arc<AnchorNetwork>,
    gpu: Option<FarFieldProcessor>,
}

impl FarFieldCompositor {
    pub fn new(network: Arc<AnchorNetwork>, gpu: Option<&Arc<GpuContext>>) -> Self {
        let gpu = gpu.and_then(|ctx| match FarFieldProcessor::new(ctx, &network) {
            Ok(processor) => Some(processor),
            Err(e) => {
                warn!(error = %e, "GPU far-field processor unavailable, using CPU");
                None
            }
        });
        Self { network, gpu }
    }

    pub fn network(&self) -> &Arc<AnchorNetwork> {
        &self.network
    }

    pub fn uses_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    /// Overwrite every canvas texel with the far-field reconstruction
    pub fn composite(&mut self, canvas: &mut Canvas, anchors: &AnchorSet, ambient: [u8; 3]) {
        let start = Instant::now();

        if let Some(processor) = self.gpu.as_mut() {
            match pollster::block_on(processor.composite(anchors, ambient, canvas)) {
                Ok(()) => {
                    debug!(
                        elapsed_us = start.elapsed().as_micros() as u64,
                        "Composited far field (GPU)"
                    );
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "GPU far-field composite failed, falling back to CPU");
                    self.gpu = None;
                }
            }
        }

        composite_cpu(canvas, &self.network, anchors, ambient);
        debug!(
            elapsed_us = start.elapsed().as_micros() as u64,
            "Composited far field (CPU)"
        );
    }
}
