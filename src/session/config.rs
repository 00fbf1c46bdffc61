// SPDX-License-Identifier: GPL-3.0-only

//! Per-session parameters derived from the init handshake

use tracing::debug;
use uuid::Uuid;

use crate::config::{AnchorPainting, ServerConfig};
use crate::constants::MAX_SESSION_POINTS;
use crate::errors::ProtocolError;
use crate::protocol::{FarFieldKeyframe, KeyframeSizes, NearFieldKeyframe, SessionInitPackage};
use crate::types::{CameraIntrinsics, ImageSize};

/// Immutable parameters of one reconstruction session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// UUID v4 returned in the init acknowledgement
    pub id: String,
    pub num_views: usize,
    /// Reported by the client, unused by reconstruction
    pub exposure_window: i32,
    /// Half-extent of the near-field projection cube (half the reported size)
    pub half_extent: f32,
    /// Ambient fill derived from the reported light estimate
    pub ambient: [u8; 3],
    /// Intrinsics at dense color resolution
    pub intrinsics: CameraIntrinsics,
    pub sizes: KeyframeSizes,
    pub canvas: ImageSize,
    pub level_heights: Vec<u32>,
    pub anchor_painting: AnchorPainting,
}

fn invalid(msg: String) -> ProtocolError {
    ProtocolError::InvalidConfig(msg)
}

fn check_plane(name: &str, size: ImageSize, even: bool) -> Result<(), ProtocolError> {
    if size.width == 0 || size.height == 0 {
        return Err(invalid(format!("{} size {} is empty", name, size)));
    }
    if even && (size.width % 2 != 0 || size.height % 2 != 0) {
        return Err(invalid(format!(
            "{} size {} must have even dimensions for 4:2:0 chroma",
            name, size
        )));
    }
    Ok(())
}

impl SessionConfig {
    /// Validate a session init against the server configuration
    pub fn from_init(
        init: &SessionInitPackage,
        server: &ServerConfig,
    ) -> Result<Self, ProtocolError> {
        if init.num_views < 1 {
            return Err(invalid(format!(
                "view count {} must be at least 1",
                init.num_views
            )));
        }
        if init.near_field_size <= 0 {
            return Err(invalid(format!(
                "near-field size {} must be positive",
                init.near_field_size
            )));
        }

        let depth = init.depth_native_size;
        let dense = init.color_dense_size;
        let sparse = init.color_sparse_size;
        check_plane("depth", depth, false)?;
        check_plane("dense color", dense, true)?;
        check_plane("sparse color", sparse, true)?;
        if dense.width % depth.width != 0 || dense.height % depth.height != 0 {
            return Err(invalid(format!(
                "dense color {} is not an integer multiple of depth {}",
                dense, depth
            )));
        }
        if sparse.width > dense.width {
            return Err(invalid(format!(
                "sparse color {} is wider than dense color {}",
                sparse, dense
            )));
        }

        let sizes = KeyframeSizes {
            depth,
            dense,
            sparse,
        };
        let max_bytes = server.max_message_bytes;
        for (kind, len) in [
            ("near-field", NearFieldKeyframe::encoded_len(&sizes)),
            ("far-field", FarFieldKeyframe::encoded_len(&sizes)),
        ] {
            if len > max_bytes {
                return Err(invalid(format!(
                    "{} keyframes of {} bytes exceed the {} byte message limit",
                    kind, len, max_bytes
                )));
            }
        }
        let points = (init.num_views as usize).checked_mul(dense.pixel_count());
        if !points.is_some_and(|n| n <= MAX_SESSION_POINTS) {
            return Err(invalid(format!(
                "{} views of {} exceed the {} point limit",
                init.num_views, dense, MAX_SESSION_POINTS
            )));
        }

        let intrinsics = init.intrinsics;
        if !(intrinsics.fx.is_finite() && intrinsics.fx != 0.0)
            || !(intrinsics.fy.is_finite() && intrinsics.fy != 0.0)
        {
            return Err(invalid(format!(
                "focal lengths ({}, {}) must be finite and non-zero",
                intrinsics.fx, intrinsics.fy
            )));
        }

        let config = Self {
            id: Uuid::new_v4().to_string(),
            num_views: init.num_views as usize,
            exposure_window: init.exposure_window,
            half_extent: init.near_field_size as f32 / 2.0,
            ambient: init.ambient_color(),
            intrinsics,
            sizes,
            canvas: server.canvas_size(),
            level_heights: server.quality.level_heights().to_vec(),
            anchor_painting: server.anchor_painting,
        };
        debug!(
            session_id = %config.id,
            exposure_window = config.exposure_window,
            ambient = ?config.ambient,
            "Session config accepted"
        );
        Ok(config)
    }

    /// Intrinsics at sparse color resolution
    pub fn sparse_intrinsics(&self) -> CameraIntrinsics {
        self.intrinsics
            .scaled(self.sizes.sparse.width as f32 / self.sizes.dense.width as f32)
    }

    /// Point stride used when painting anchors from a near-field view
    pub fn near_field_downsample(&self) -> usize {
        let ratio = (self.sizes.dense.width / self.sizes.sparse.width) as usize;
        (ratio * ratio).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AmbientInfo;

    fn init() -> SessionInitPackage {
        SessionInitPackage {
            num_views: 2,
            exposure_window: 3,
            near_field_size: 20,
            ambient: AmbientInfo::new(6500.0, 1.0),
            intrinsics: CameraIntrinsics::new(20.0, 20.0, 8.0, 6.0),
            depth_native_size: ImageSize::new(8, 6),
            color_dense_size: ImageSize::new(16, 12),
            color_sparse_size: ImageSize::new(8, 6),
        }
    }

    #[test]
    fn test_accepts_valid_init() {
        let config = SessionConfig::from_init(&init(), &ServerConfig::default()).unwrap();
        assert_eq!(config.num_views, 2);
        assert_eq!(config.half_extent, 10.0);
        assert_eq!(config.canvas, ImageSize::new(512, 256));
        assert_eq!(config.level_heights, vec![256, 128, 32]);
        assert_eq!(config.near_field_downsample(), 4);
        assert_eq!(config.sparse_intrinsics(), CameraIntrinsics::new(10.0, 10.0, 4.0, 3.0));
        assert!(Uuid::parse_str(&config.id).is_ok());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let server = ServerConfig::default();
        let a = SessionConfig::from_init(&init(), &server).unwrap();
        let b = SessionConfig::from_init(&init(), &server).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_rejects_bad_inits() {
        let server = ServerConfig::default();
        let cases = [
            SessionInitPackage {
                num_views: 0,
                ..init()
            },
            SessionInitPackage {
                near_field_size: 0,
                ..init()
            },
            SessionInitPackage {
                color_dense_size: ImageSize::new(15, 12),
                ..init()
            },
            SessionInitPackage {
                depth_native_size: ImageSize::new(5, 6),
                ..init()
            },
            SessionInitPackage {
                color_sparse_size: ImageSize::new(32, 12),
                ..init()
            },
            SessionInitPackage {
                intrinsics: CameraIntrinsics::new(0.0, 20.0, 8.0, 6.0),
                ..init()
            },
            SessionInitPackage {
                num_views: i32::MAX,
                ..init()
            },
            SessionInitPackage {
                depth_native_size: ImageSize::new(2, 2),
                color_dense_size: ImageSize::new(65534, 65534),
                color_sparse_size: ImageSize::new(2, 2),
                ..init()
            },
        ];
        for case in cases {
            assert!(
                matches!(
                    SessionConfig::from_init(&case, &server),
                    Err(ProtocolError::InvalidConfig(_))
                ),
                "{:?} should be rejected",
                case
            );
        }
    }

    #[test]
    fn test_keyframes_must_fit_message_limit() {
        let server = ServerConfig {
            max_message_bytes: 256,
            ..Default::default()
        };
        // Near-field keyframes of this init are 1 + 4 + 48 + 192 + 96 + 192 bytes
        assert!(matches!(
            SessionConfig::from_init(&init(), &server),
            Err(ProtocolError::InvalidConfig(_))
        ));
        let server = ServerConfig {
            max_message_bytes: 533,
            ..Default::default()
        };
        assert!(SessionConfig::from_init(&init(), &server).is_ok());
    }
}
