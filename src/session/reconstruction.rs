// SPDX-License-Identifier: GPL-3.0-only

//! Reconstruction session state machine

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::SessionConfig;
use crate::anchors::AnchorNetwork;
use crate::config::AnchorPainting;
use crate::constants::FAR_FIELD_UNIT_DEPTH;
use crate::errors::{AppError, AppResult, ProtocolError};
use crate::pipelines::{
    AnchorSet, Canvas, FarFieldCompositor, MultiResolutionProjector, PanoramaLevels, PointCloud,
    PointCloudGenerator, ViewFrame, sample_to_anchor,
};
use crate::protocol::{FarFieldKeyframe, NearFieldKeyframe};
use crate::shaders::GpuContext;
use crate::types::CameraToWorld;

/// Lifecycle of a [`ReconstructionSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Buffers allocated, canvas not yet composited
    Created,
    /// Canvas reflects the latest anchors and projection
    Ready,
    /// Processing a near-field keyframe
    NearFieldUpdate,
    /// Processing a far-field keyframe
    FarFieldUpdate,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Ready => "ready",
            SessionState::NearFieldUpdate => "near-field update",
            SessionState::FarFieldUpdate => "far-field update",
        };
        f.write_str(name)
    }
}

/// Owns every buffer of one capture session and sequences the stages over them
pub struct ReconstructionSession {
    config: SessionConfig,
    state: SessionState,
    network: Arc<AnchorNetwork>,
    near_cloud: PointCloud,
    far_cloud: PointCloud,
    far_depth: Vec<f32>,
    levels: PanoramaLevels,
    canvas: Canvas,
    anchors: AnchorSet,
    generator: PointCloudGenerator,
    projector: MultiResolutionProjector,
    compositor: FarFieldCompositor,
    keyframes: u64,
}

impl ReconstructionSession {
    /// Allocate session buffers and composite the initial canvas.
    ///
    /// The session is [`SessionState::Ready`] on return.
    pub fn new(
        config: SessionConfig,
        network: Arc<AnchorNetwork>,
        gpu: Option<&Arc<GpuContext>>,
    ) -> AppResult<Self> {
        if network.canvas_size() != config.canvas {
            return Err(AppError::Config(format!(
                "anchor network canvas {} does not match session canvas {}",
                network.canvas_size(),
                config.canvas
            )));
        }

        let sizes = config.sizes;
        let mut session = Self {
            near_cloud: PointCloud::new(config.num_views, sizes.dense.pixel_count()),
            far_cloud: PointCloud::new(1, sizes.sparse.pixel_count()),
            far_depth: vec![FAR_FIELD_UNIT_DEPTH; sizes.sparse.pixel_count()],
            levels: PanoramaLevels::new(&config.level_heights),
            canvas: Canvas::new(config.canvas),
            anchors: AnchorSet::new(network.anchor_count(), config.ambient),
            generator: PointCloudGenerator::new(gpu),
            projector: MultiResolutionProjector::new(config.half_extent, gpu),
            compositor: FarFieldCompositor::new(network.clone(), gpu),
            state: SessionState::Created,
            network,
            config,
            keyframes: 0,
        };

        info!(
            session_id = %session.config.id,
            views = session.config.num_views,
            dense = %sizes.dense,
            sparse = %sizes.sparse,
            depth = %sizes.depth,
            canvas = %session.config.canvas,
            gpu = session.generator.uses_gpu(),
            "Session created"
        );

        session.clean_up();
        session.project();
        session.transition(SessionState::Ready);
        Ok(session)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            session_id = %self.config.id,
            from = %self.state,
            to = %next,
            "Session state change"
        );
        self.state = next;
    }

    /// Fuse a near-field keyframe into the point cloud, anchors and canvas
    pub fn reconstruct_near_field(&mut self, keyframe: &NearFieldKeyframe) -> Result<(), ProtocolError> {
        let views = self.config.num_views;
        let view = usize::try_from(keyframe.view_index)
            .ok()
            .filter(|&v| v < views)
            .ok_or(ProtocolError::ViewIndexOutOfRange {
                index: keyframe.view_index,
                views: views as u32,
            })?;

        let start = Instant::now();
        self.transition(SessionState::NearFieldUpdate);

        let sizes = self.config.sizes;
        let frame = ViewFrame {
            color_size: sizes.dense,
            depth_size: sizes.depth,
            intrinsics: self.config.intrinsics,
            camera_to_world: keyframe.camera_to_world,
            depth: &keyframe.depth,
            luma: &keyframe.luma,
            chroma: &keyframe.chroma,
        };
        self.generator.generate(&mut self.near_cloud, view, &frame);

        let downsample = self.config.near_field_downsample();
        let (xyz, rgb) = self.near_cloud.view(view);
        let painted = match self.config.anchor_painting {
            AnchorPainting::NearestSample => {
                let (mask, colors) =
                    sample_to_anchor(xyz, rgb, self.network.directions(), downsample, true);
                self.anchors.paint(&mask, &colors)
            }
            AnchorPainting::DepthTested => {
                self.anchors
                    .splat_samples(&self.network, xyz, rgb, downsample)
            }
        };

        self.clean_up();
        self.project();
        self.keyframes += 1;
        self.transition(SessionState::Ready);

        debug!(
            session_id = %self.config.id,
            view,
            painted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Near-field keyframe reconstructed"
        );
        Ok(())
    }

    /// Paint anchors from a direction-only far-field keyframe
    pub fn reconstruct_far_field(&mut self, keyframe: &FarFieldKeyframe) -> Result<(), ProtocolError> {
        let start = Instant::now();
        self.transition(SessionState::FarFieldUpdate);

        let sparse = self.config.sizes.sparse;
        let frame = ViewFrame {
            color_size: sparse,
            depth_size: sparse,
            intrinsics: self.config.sparse_intrinsics(),
            camera_to_world: CameraToWorld::from_rotation(&keyframe.rotation),
            depth: &self.far_depth,
            luma: &keyframe.luma,
            chroma: &keyframe.chroma,
        };
        self.generator.generate(&mut self.far_cloud, 0, &frame);

        let (xyz, rgb) = self.far_cloud.view(0);
        let (mask, colors) = sample_to_anchor(xyz, rgb, self.network.directions(), 1, false);
        let painted = self.anchors.paint(&mask, &colors);

        self.clean_up();
        self.project();
        self.keyframes += 1;
        self.transition(SessionState::Ready);

        debug!(
            session_id = %self.config.id,
            painted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Far-field keyframe reconstructed"
        );
        Ok(())
    }

    /// Reset the canvas to the far-field composite of the current anchors
    pub fn clean_up(&mut self) {
        self.compositor
            .composite(&mut self.canvas, &self.anchors, self.config.ambient);
    }

    /// Project the near-field cloud and merge it over the canvas
    pub fn project(&mut self) {
        self.projector.project(&self.near_cloud, &mut self.levels);
        self.projector
            .merge(&self.levels, &self.near_cloud.rgb, &mut self.canvas);
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn network(&self) -> &Arc<AnchorNetwork> {
        &self.network
    }

    pub fn point_cloud(&self) -> &PointCloud {
        &self.near_cloud
    }

    pub fn levels(&self) -> &PanoramaLevels {
        &self.levels
    }

    /// Keyframes reconstructed so far
    pub fn keyframe_count(&self) -> u64 {
        self.keyframes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::AnchorParams;
    use crate::config::ServerConfig;
    use crate::protocol::{AmbientInfo, SessionInitPackage};
    use crate::types::{CameraIntrinsics, ImageSize};
    use std::sync::OnceLock;

    fn server() -> ServerConfig {
        ServerConfig {
            anchor_count: 256,
            anchor_neighbors: 8,
            cache_dir: None,
            ..Default::default()
        }
    }

    fn shared_network() -> Arc<AnchorNetwork> {
        static NETWORK: OnceLock<Arc<AnchorNetwork>> = OnceLock::new();
        NETWORK
            .get_or_init(|| Arc::new(AnchorNetwork::build(server().anchor_params()).unwrap()))
            .clone()
    }

    fn session(painting: AnchorPainting) -> ReconstructionSession {
        let server = ServerConfig {
            anchor_painting: painting,
            ..server()
        };
        let init = SessionInitPackage {
            num_views: 2,
            exposure_window: 1,
            near_field_size: 20,
            ambient: AmbientInfo::new(6500.0, 0.5),
            intrinsics: CameraIntrinsics::new(16.0, 16.0, 8.0, 6.0),
            depth_native_size: ImageSize::new(8, 6),
            color_dense_size: ImageSize::new(16, 12),
            color_sparse_size: ImageSize::new(8, 6),
        };
        let config = SessionConfig::from_init(&init, &server).unwrap();
        ReconstructionSession::new(config, shared_network(), None).unwrap()
    }

    fn near_keyframe(view_index: i32, gray: u8) -> NearFieldKeyframe {
        NearFieldKeyframe {
            view_index,
            camera_to_world: CameraToWorld::IDENTITY,
            luma: vec![gray; 16 * 12],
            chroma: vec![128; 8 * 6 * 2],
            depth: vec![1.0; 8 * 6],
        }
    }

    #[test]
    fn test_new_session_is_ambient() {
        let session = session(AnchorPainting::NearestSample);
        assert_eq!(session.state(), SessionState::Ready);
        let ambient = session.config().ambient.map(f32::from);
        for texel in &session.canvas().data {
            for c in 0..3 {
                assert!((texel[c] - ambient[c]).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn test_view_index_out_of_range() {
        let mut session = session(AnchorPainting::NearestSample);
        for index in [-1, 2] {
            assert_eq!(
                session.reconstruct_near_field(&near_keyframe(index, 50)),
                Err(ProtocolError::ViewIndexOutOfRange { index, views: 2 })
            );
        }
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.keyframe_count(), 0);
    }

    #[test]
    fn test_near_field_paints_front_of_canvas() {
        let mut session = session(AnchorPainting::NearestSample);
        session.reconstruct_near_field(&near_keyframe(1, 200)).unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let size = session.canvas().size();
        let front = session.canvas().texel(size.width / 2, size.height / 2);
        assert_eq!(front, [200.0, 200.0, 200.0]);

        // Only view 1 was generated
        let (xyz, _) = session.point_cloud().view(0);
        assert!(xyz.iter().all(|p| p[0] >= 1000.0));
    }

    #[test]
    fn test_depth_tested_painting_runs() {
        let mut session = session(AnchorPainting::DepthTested);
        session.reconstruct_near_field(&near_keyframe(0, 90)).unwrap();
        assert!(session.anchors().depth.iter().any(|&d| d < 10.0));
    }

    #[test]
    fn test_far_field_paints_anchors() {
        let mut session = session(AnchorPainting::NearestSample);
        let keyframe = FarFieldKeyframe {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            luma: vec![30; 8 * 6],
            chroma: vec![128; 4 * 3 * 2],
        };
        session.reconstruct_far_field(&keyframe).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.keyframe_count(), 1);
        assert!(session.anchors().rgb.iter().any(|c| *c == [30, 30, 30]));
    }

    #[test]
    fn test_network_canvas_must_match() {
        let server = server();
        let init = SessionInitPackage {
            num_views: 1,
            exposure_window: 0,
            near_field_size: 5,
            ambient: AmbientInfo::new(5000.0, 1.0),
            intrinsics: CameraIntrinsics::new(4.0, 4.0, 2.0, 2.0),
            depth_native_size: ImageSize::new(4, 4),
            color_dense_size: ImageSize::new(4, 4),
            color_sparse_size: ImageSize::new(4, 4),
        };
        let config = SessionConfig::from_init(&init, &server).unwrap();
        let network = AnchorNetwork::build(AnchorParams {
            anchor_count: 64,
            neighbors: 8,
            canvas: ImageSize::new(32, 16),
        })
        .unwrap();
        assert!(matches!(
            ReconstructionSession::new(config, Arc::new(network), None),
            Err(AppError::Config(_))
        ));
    }
}
