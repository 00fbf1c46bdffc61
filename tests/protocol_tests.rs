// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the keyframe protocol

use envlight::errors::{PackageKind, ProtocolError};
use envlight::protocol::{
    AmbientInfo, FarFieldKeyframe, KeyframeSizes, NearFieldKeyframe, Package, SessionInitPackage,
    decode_package,
};
use envlight::types::{CameraIntrinsics, CameraToWorld, ImageSize};

fn init() -> SessionInitPackage {
    SessionInitPackage {
        num_views: 4,
        exposure_window: 8,
        near_field_size: 3,
        ambient: AmbientInfo::new(5600.0, 0.9),
        intrinsics: CameraIntrinsics::new(480.5, 481.25, 319.5, 239.5),
        depth_native_size: ImageSize::new(256, 192),
        color_dense_size: ImageSize::new(512, 384),
        color_sparse_size: ImageSize::new(128, 96),
    }
}

fn sizes() -> KeyframeSizes {
    KeyframeSizes {
        depth: ImageSize::new(4, 2),
        dense: ImageSize::new(8, 4),
        sparse: ImageSize::new(4, 2),
    }
}

#[test]
fn test_session_init_round_trip() {
    let original = init();
    let bytes = original.encode();
    assert_eq!(bytes.len(), SessionInitPackage::ENCODED_LEN);

    let Package::SessionInit(decoded) = decode_package(&bytes, None).unwrap() else {
        panic!("expected a session init");
    };
    assert_eq!(decoded.intrinsics, original.intrinsics);
    assert_eq!(decoded.depth_native_size, original.depth_native_size);
    assert_eq!(decoded.color_dense_size, original.color_dense_size);
    assert_eq!(decoded.color_sparse_size, original.color_sparse_size);
    assert_eq!(decoded.ambient_color(), original.ambient_color());
    assert_eq!(decoded.encode(), bytes);
}

#[test]
fn test_near_field_keyframe_decodes_with_session_sizes() {
    let sizes = sizes();
    let keyframe = NearFieldKeyframe {
        view_index: 2,
        camera_to_world: CameraToWorld::IDENTITY,
        luma: (0..32).collect(),
        chroma: vec![128; 16],
        depth: vec![1.5; 8],
    };
    let bytes = keyframe.encode();
    assert_eq!(bytes.len(), NearFieldKeyframe::encoded_len(&sizes));
    assert_eq!(
        decode_package(&bytes, Some(&sizes)).unwrap(),
        Package::NearField(keyframe)
    );
}

#[test]
fn test_keyframe_length_mismatch_is_malformed() {
    let sizes = sizes();
    let keyframe = FarFieldKeyframe {
        rotation: [0.0; 9],
        luma: vec![0; 8],
        chroma: vec![128; 4],
    };
    let mut bytes = keyframe.encode();
    bytes.push(0);
    assert_eq!(
        decode_package(&bytes, Some(&sizes)),
        Err(ProtocolError::MalformedPackage {
            kind: PackageKind::FarFieldKeyframe,
            expected: bytes.len() - 1,
            actual: bytes.len(),
        })
    );
}

#[test]
fn test_identifier_mismatch() {
    let sizes = sizes();
    let far = FarFieldKeyframe {
        rotation: [0.0; 9],
        luma: vec![0; 8],
        chroma: vec![128; 4],
    }
    .encode();
    assert_eq!(
        NearFieldKeyframe::decode(&far, &sizes),
        Err(ProtocolError::IdentifierMismatch {
            expected: 0x10,
            found: 0x11
        })
    );
}

#[test]
fn test_keyframe_without_session() {
    let bytes = FarFieldKeyframe {
        rotation: [0.0; 9],
        luma: vec![0; 8],
        chroma: vec![128; 4],
    }
    .encode();
    assert_eq!(
        decode_package(&bytes, None),
        Err(ProtocolError::UninitializedSession)
    );
    assert_eq!(
        decode_package(&[0x42], None),
        Err(ProtocolError::UnknownIdentifier(0x42))
    );
}
