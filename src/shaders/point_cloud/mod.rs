// SPDX-License-Identifier: GPL-3.0-only

//! GPU point cloud generation
//!
//! Converts one depth + YCbCr view into world-space points on the GPU.

mod processor;

pub use processor::PointCloudProcessor;

/// Point cloud generation kernel
pub const GENERATE_WGSL: &str = include_str!("generate.wgsl");
