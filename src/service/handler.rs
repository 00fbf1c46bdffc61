// SPDX-License-Identifier: GPL-3.0-only

//! Transport-agnostic message handling for one connection

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::SessionRecorder;
use super::envmap::encode_environment_map_jpeg;
use crate::anchors::AnchorNetwork;
use crate::config::{ComputeBackend, ServerConfig};
use crate::errors::{AppError, AppResult, ProtocolError};
use crate::protocol::{Package, decode_package, encode_environment_map, encode_session_ack};
use crate::session::{ReconstructionSession, SessionConfig};
use crate::shaders::{GpuContext, shared_gpu_context};

/// One inbound transport message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Binary(Vec<u8>),
    Text(String),
}

/// Process-wide state shared by every connection
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<ServerConfig>,
    pub network: Arc<AnchorNetwork>,
    pub gpu: Option<Arc<GpuContext>>,
}

impl ServiceContext {
    /// Select the compute device and load (or build) the anchor network
    pub async fn initialize(config: ServerConfig) -> AppResult<Self> {
        config.validate()?;

        let gpu = match config.compute {
            ComputeBackend::Cpu => {
                info!("Compute backend: CPU");
                None
            }
            ComputeBackend::Auto => match shared_gpu_context().await {
                Ok(ctx) => {
                    info!(adapter = %ctx.info.adapter_name, "Compute backend: GPU");
                    Some(ctx)
                }
                Err(e) => {
                    warn!(error = %e, "No GPU available, compute backend: CPU");
                    None
                }
            },
            ComputeBackend::Gpu => {
                let ctx = shared_gpu_context().await.map_err(AppError::Gpu)?;
                info!(adapter = %ctx.info.adapter_name, "Compute backend: GPU");
                Some(ctx)
            }
        };

        let params = config.anchor_params();
        let cache_dir = config.cache_dir.clone();
        let network = tokio::task::spawn_blocking(move || {
            AnchorNetwork::load_or_build(params, cache_dir.as_deref())
        })
        .await
        .map_err(|e| AppError::Other(format!("Anchor network task failed: {}", e)))??;

        Ok(Self {
            config: Arc::new(config),
            network,
            gpu,
        })
    }

    /// Context for offline use, without GPU or on-disk cache
    pub fn cpu_only(config: ServerConfig, network: Arc<AnchorNetwork>) -> Self {
        Self {
            config: Arc::new(config),
            network,
            gpu: None,
        }
    }
}

/// Decodes messages, drives the session and builds replies
pub struct MessageHandler {
    context: ServiceContext,
    session: Option<ReconstructionSession>,
    recorder: Option<SessionRecorder>,
}

impl MessageHandler {
    /// Handler for a new connection; starts recording when configured
    pub fn new(context: ServiceContext) -> Self {
        let recorder = context.config.recording_dir.as_deref().and_then(|root| {
            SessionRecorder::create(root)
                .inspect_err(|e| warn!(error = %e, "Recording disabled"))
                .ok()
        });
        Self {
            context,
            session: None,
            recorder,
        }
    }

    /// Handler that never records (replay)
    pub fn without_recording(context: ServiceContext) -> Self {
        Self {
            context,
            session: None,
            recorder: None,
        }
    }

    pub fn session(&self) -> Option<&ReconstructionSession> {
        self.session.as_ref()
    }

    /// Handle one message; `None` means no reply is sent
    pub fn handle(&mut self, message: Message) -> Option<Vec<u8>> {
        match message {
            Message::Text(text) => {
                debug!(len = text.len(), "Ignoring text message");
                None
            }
            Message::Binary(bytes) => {
                if let Some(recorder) = self.recorder.as_mut()
                    && let Err(e) = recorder.record_message(&bytes)
                {
                    warn!(error = %e, "Failed to record message, recording stopped");
                    self.recorder = None;
                }

                match self.handle_binary(&bytes) {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        warn!(
                            error = %e,
                            len = bytes.len(),
                            identifier = bytes.first().copied(),
                            "Dropped message"
                        );
                        None
                    }
                }
            }
        }
    }

    fn handle_binary(&mut self, bytes: &[u8]) -> AppResult<Vec<u8>> {
        let sizes = self.session.as_ref().map(|s| s.config().sizes);
        let package = decode_package(bytes, sizes.as_ref())?;
        let start = Instant::now();

        match package {
            Package::SessionInit(init) => {
                let config = SessionConfig::from_init(&init, &self.context.config)?;
                if let Some(previous) = self.session.take() {
                    info!(session_id = %previous.id(), "Replacing session");
                }
                let session = ReconstructionSession::new(
                    config,
                    self.context.network.clone(),
                    self.context.gpu.as_ref(),
                )?;
                let reply = encode_session_ack(session.id());
                info!(
                    session_id = %session.id(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Session initialized"
                );
                self.session = Some(session);
                Ok(reply)
            }
            Package::NearField(keyframe) => {
                let session = self
                    .session
                    .as_mut()
                    .ok_or(ProtocolError::UninitializedSession)?;
                session.reconstruct_near_field(&keyframe)?;
                self.environment_map_reply()
            }
            Package::FarField(keyframe) => {
                let session = self
                    .session
                    .as_mut()
                    .ok_or(ProtocolError::UninitializedSession)?;
                session.reconstruct_far_field(&keyframe)?;
                self.environment_map_reply()
            }
        }
    }

    fn environment_map_reply(&mut self) -> AppResult<Vec<u8>> {
        let session = self
            .session
            .as_ref()
            .ok_or(ProtocolError::UninitializedSession)?;
        let canvas = session.canvas();

        if let Some(recorder) = self.recorder.as_ref()
            && let Err(e) = recorder.record_envmap(canvas)
        {
            warn!(error = %e, "Failed to record environment map");
        }

        let jpeg = encode_environment_map_jpeg(canvas, self.context.config.jpeg_quality)?;
        debug!(
            session_id = %session.id(),
            bytes = jpeg.len(),
            "Environment map encoded"
        );
        Ok(encode_environment_map(&jpeg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AmbientInfo, FarFieldKeyframe, SESSION_ACK_ID, SessionInitPackage};
    use crate::types::{CameraIntrinsics, ImageSize};
    use std::sync::OnceLock;

    fn context() -> ServiceContext {
        static NETWORK: OnceLock<Arc<AnchorNetwork>> = OnceLock::new();
        let config = ServerConfig {
            anchor_count: 64,
            anchor_neighbors: 8,
            cache_dir: None,
            ..Default::default()
        };
        let network = NETWORK
            .get_or_init(|| Arc::new(AnchorNetwork::build(config.anchor_params()).unwrap()))
            .clone();
        ServiceContext::cpu_only(config, network)
    }

    fn init_bytes() -> Vec<u8> {
        SessionInitPackage {
            num_views: 1,
            exposure_window: 0,
            near_field_size: 10,
            ambient: AmbientInfo::new(6500.0, 0.5),
            intrinsics: CameraIntrinsics::new(8.0, 8.0, 4.0, 4.0),
            depth_native_size: ImageSize::new(4, 4),
            color_dense_size: ImageSize::new(8, 8),
            color_sparse_size: ImageSize::new(4, 4),
        }
        .encode()
    }

    #[test]
    fn test_keyframe_before_init_gets_no_reply() {
        let mut handler = MessageHandler::new(context());
        let keyframe = FarFieldKeyframe {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            luma: vec![0; 16],
            chroma: vec![128; 8],
        };
        assert_eq!(handler.handle(Message::Binary(keyframe.encode())), None);
        assert!(handler.session().is_none());
    }

    #[test]
    fn test_init_is_acknowledged_with_session_id() {
        let mut handler = MessageHandler::new(context());
        let reply = handler.handle(Message::Binary(init_bytes())).unwrap();
        assert_eq!(reply[0], SESSION_ACK_ID);
        let id = std::str::from_utf8(&reply[1..]).unwrap();
        assert_eq!(id, handler.session().unwrap().id());
    }

    #[test]
    fn test_bad_messages_are_dropped() {
        let mut handler = MessageHandler::new(context());
        assert_eq!(handler.handle(Message::Binary(Vec::new())), None);
        assert_eq!(handler.handle(Message::Binary(vec![0x7f, 1, 2])), None);
        assert_eq!(handler.handle(Message::Text("hello".into())), None);

        let mut truncated = init_bytes();
        truncated.pop();
        assert_eq!(handler.handle(Message::Binary(truncated)), None);
        assert!(handler.session().is_none());
    }

    #[test]
    fn test_oversized_init_is_dropped() {
        let mut handler = MessageHandler::new(context());
        let huge = SessionInitPackage {
            num_views: i32::MAX,
            exposure_window: 0,
            near_field_size: 20,
            ambient: AmbientInfo::new(6500.0, 0.5),
            intrinsics: CameraIntrinsics::new(8.0, 8.0, 4.0, 4.0),
            depth_native_size: ImageSize::new(2, 2),
            color_dense_size: ImageSize::new(65534, 65534),
            color_sparse_size: ImageSize::new(2, 2),
        };
        assert_eq!(handler.handle(Message::Binary(huge.encode())), None);
        let many_views = SessionInitPackage {
            num_views: i32::MAX,
            ..SessionInitPackage::decode(&init_bytes()).unwrap()
        };
        assert_eq!(handler.handle(Message::Binary(many_views.encode())), None);
        assert!(handler.session().is_none());

        // The handler keeps serving
        assert!(handler.handle(Message::Binary(init_bytes())).is_some());
        assert!(handler.session().is_some());
    }

    #[test]
    fn test_far_field_reply_is_jpeg() {
        let mut handler = MessageHandler::new(context());
        handler.handle(Message::Binary(init_bytes())).unwrap();
        let keyframe = FarFieldKeyframe {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            luma: vec![60; 16],
            chroma: vec![128; 8],
        };
        let reply = handler.handle(Message::Binary(keyframe.encode())).unwrap();
        assert_eq!(reply[0], crate::protocol::ENVIRONMENT_MAP_ID);
        assert_eq!(&reply[1..3], &[0xff, 0xd8]);
    }
}
