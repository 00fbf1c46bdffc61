// SPDX-License-Identifier: GPL-3.0-only

//! envlight - real-time environment lighting reconstruction for AR clients
//!
//! Clients stream depth + color keyframes; the server fuses them into a
//! colored point cloud, projects it into an equirectangular panorama and fills
//! unobserved directions from a far-field anchor network. Every processed
//! keyframe is answered with a JPEG environment map.
//!
//! # Architecture
//!
//! - [`protocol`]: binary keyframe packages and replies
//! - [`anchors`]: precomputed anchor network and its on-disk cache
//! - [`pipelines`]: reconstruction stages (point cloud, projector, compositor)
//! - [`shaders`]: WGSL kernels and GPU processors behind the stages
//! - [`session`]: per-client reconstruction state machine
//! - [`service`]: message handling, TCP transport, recording and replay
//! - [`config`]: server configuration

pub mod anchors;
pub mod config;
pub mod constants;
pub mod errors;
pub mod export;
pub mod gpu;
pub mod pipelines;
pub mod protocol;
pub mod service;
pub mod session;
pub mod shaders;
pub mod types;

// Re-export commonly used types
pub use anchors::{AnchorNetwork, AnchorParams};
pub use config::{AnchorPainting, ComputeBackend, ServerConfig};
pub use constants::PanoramaQuality;
pub use errors::{AppError, AppResult};
pub use session::{ReconstructionSession, SessionConfig, SessionState};
