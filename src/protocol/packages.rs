// SPDX-License-Identifier: GPL-3.0-only

//! Binary keyframe packages
//!
//! Every message starts with one identifier byte, followed by little-endian
//! fields. Keyframe payload sizes are fixed by the sizes negotiated in the
//! session-init handshake, so a keyframe can only be decoded against a
//! [`KeyframeSizes`] table.

use super::AmbientInfo;
use crate::errors::{PackageKind, ProtocolError};
use crate::types::{CameraIntrinsics, CameraToWorld, ImageSize};

pub const SESSION_INIT_ID: u8 = 0b0000_0000;
pub const NEAR_FIELD_KEYFRAME_ID: u8 = 0b0001_0000;
pub const FAR_FIELD_KEYFRAME_ID: u8 = 0b0001_0001;

/// Sizes that determine keyframe payload lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyframeSizes {
    /// Native depth resolution
    pub depth: ImageSize,
    /// Dense color resolution of near-field keyframes
    pub dense: ImageSize,
    /// Sparse color resolution of far-field keyframes
    pub sparse: ImageSize,
}

/// Session-init handshake (`0x00`)
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInitPackage {
    pub num_views: i32,
    pub exposure_window: i32,
    pub near_field_size: i32,
    pub ambient: AmbientInfo,
    pub intrinsics: CameraIntrinsics,
    pub depth_native_size: ImageSize,
    pub color_dense_size: ImageSize,
    pub color_sparse_size: ImageSize,
}

/// Near-field keyframe (`0x10`): one depth + color view
#[derive(Debug, Clone, PartialEq)]
pub struct NearFieldKeyframe {
    pub view_index: i32,
    pub camera_to_world: CameraToWorld,
    /// Dense luma plane, row-major
    pub luma: Vec<u8>,
    /// Half-resolution interleaved CbCr plane
    pub chroma: Vec<u8>,
    /// Native-resolution depth plane, row-major
    pub depth: Vec<f32>,
}

/// Far-field keyframe (`0x11`): orientation plus sparse color, no depth
#[derive(Debug, Clone, PartialEq)]
pub struct FarFieldKeyframe {
    /// Row-major 3x3 rotation
    pub rotation: [f32; 9],
    pub luma: Vec<u8>,
    pub chroma: Vec<u8>,
}

/// Any decoded inbound package
#[derive(Debug, Clone, PartialEq)]
pub enum Package {
    SessionInit(SessionInitPackage),
    NearField(NearFieldKeyframe),
    FarField(FarFieldKeyframe),
}

impl Package {
    pub fn kind(&self) -> PackageKind {
        match self {
            Package::SessionInit(_) => PackageKind::SessionInit,
            Package::NearField(_) => PackageKind::NearFieldKeyframe,
            Package::FarField(_) => PackageKind::FarFieldKeyframe,
        }
    }
}

/// Decode one inbound message.
///
/// Keyframes need the sizes of an initialized session; without them the
/// message is rejected with [`ProtocolError::UninitializedSession`].
pub fn decode_package(
    bytes: &[u8],
    sizes: Option<&KeyframeSizes>,
) -> Result<Package, ProtocolError> {
    let identifier = *bytes.first().ok_or(ProtocolError::EmptyMessage)?;

    match identifier {
        SESSION_INIT_ID => SessionInitPackage::decode(bytes).map(Package::SessionInit),
        NEAR_FIELD_KEYFRAME_ID => {
            let sizes = sizes.ok_or(ProtocolError::UninitializedSession)?;
            NearFieldKeyframe::decode(bytes, sizes).map(Package::NearField)
        }
        FAR_FIELD_KEYFRAME_ID => {
            let sizes = sizes.ok_or(ProtocolError::UninitializedSession)?;
            FarFieldKeyframe::decode(bytes, sizes).map(Package::FarField)
        }
        other => Err(ProtocolError::UnknownIdentifier(other)),
    }
}

/// Little-endian cursor over a package body
struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        // Skip the identifier byte
        Self { bytes, offset: 1 }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        slice
    }

    fn read_i32(&mut self) -> i32 {
        let b = self.take(4);
        i32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn read_f32(&mut self) -> f32 {
        let b = self.take(4);
        f32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn read_f32_array<const N: usize>(&mut self) -> [f32; N] {
        let mut out = [0.0; N];
        for v in out.iter_mut() {
            *v = self.read_f32();
        }
        out
    }

    fn read_f32_plane(&mut self, count: usize) -> Vec<f32> {
        self.take(count * 4)
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn read_size(&mut self) -> ImageSize {
        let width = self.read_i32();
        let height = self.read_i32();
        ImageSize::new(width.max(0) as u32, height.max(0) as u32)
    }
}

fn check_header(
    bytes: &[u8],
    kind: PackageKind,
    identifier: u8,
    expected_len: usize,
) -> Result<(), ProtocolError> {
    let found = *bytes.first().ok_or(ProtocolError::EmptyMessage)?;
    if found != identifier {
        return Err(ProtocolError::IdentifierMismatch {
            expected: identifier,
            found,
        });
    }
    if bytes.len() != expected_len {
        return Err(ProtocolError::MalformedPackage {
            kind,
            expected: expected_len,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn chroma_len(size: ImageSize) -> usize {
    size.chroma().pixel_count() * 2
}

fn push_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn push_i32s(out: &mut Vec<u8>, values: &[i32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

impl SessionInitPackage {
    /// Identifier + 3 config ints + 2 ambient floats + 4 intrinsics + 6 size ints
    pub const ENCODED_LEN: usize = 1 + 3 * 4 + 2 * 4 + 4 * 4 + 6 * 4;

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        check_header(
            bytes,
            PackageKind::SessionInit,
            SESSION_INIT_ID,
            Self::ENCODED_LEN,
        )?;

        let mut reader = ByteReader::new(bytes);
        let num_views = reader.read_i32();
        let exposure_window = reader.read_i32();
        let near_field_size = reader.read_i32();
        let ambient = AmbientInfo::new(reader.read_f32(), reader.read_f32());
        let [fx, fy, cx, cy] = reader.read_f32_array::<4>();
        let depth_native_size = reader.read_size();
        let color_dense_size = reader.read_size();
        let color_sparse_size = reader.read_size();

        Ok(Self {
            num_views,
            exposure_window,
            near_field_size,
            ambient,
            intrinsics: CameraIntrinsics::new(fx, fy, cx, cy),
            depth_native_size,
            color_dense_size,
            color_sparse_size,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.push(SESSION_INIT_ID);
        push_i32s(
            &mut out,
            &[self.num_views, self.exposure_window, self.near_field_size],
        );
        push_f32s(&mut out, &[self.ambient.temperature, self.ambient.brightness]);
        push_f32s(&mut out, &self.intrinsics.to_array());
        for size in [
            self.depth_native_size,
            self.color_dense_size,
            self.color_sparse_size,
        ] {
            push_i32s(&mut out, &[size.width as i32, size.height as i32]);
        }
        out
    }

    /// Ambient color derived from the reported light estimate
    pub fn ambient_color(&self) -> [u8; 3] {
        self.ambient.to_rgb()
    }
}

impl NearFieldKeyframe {
    pub fn encoded_len(sizes: &KeyframeSizes) -> usize {
        1 + 4 + 12 * 4 + sizes.dense.pixel_count() + chroma_len(sizes.dense)
            + sizes.depth.pixel_count() * 4
    }

    pub fn decode(bytes: &[u8], sizes: &KeyframeSizes) -> Result<Self, ProtocolError> {
        check_header(
            bytes,
            PackageKind::NearFieldKeyframe,
            NEAR_FIELD_KEYFRAME_ID,
            Self::encoded_len(sizes),
        )?;

        let mut reader = ByteReader::new(bytes);
        let view_index = reader.read_i32();
        let camera_to_world = CameraToWorld(reader.read_f32_array::<12>());
        let luma = reader.take(sizes.dense.pixel_count()).to_vec();
        let chroma = reader.take(chroma_len(sizes.dense)).to_vec();
        let depth = reader.read_f32_plane(sizes.depth.pixel_count());

        Ok(Self {
            view_index,
            camera_to_world,
            luma,
            chroma,
            depth,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            1 + 4 + 48 + self.luma.len() + self.chroma.len() + self.depth.len() * 4,
        );
        out.push(NEAR_FIELD_KEYFRAME_ID);
        push_i32s(&mut out, &[self.view_index]);
        push_f32s(&mut out, &self.camera_to_world.0);
        out.extend_from_slice(&self.luma);
        out.extend_from_slice(&self.chroma);
        push_f32s(&mut out, &self.depth);
        out
    }
}

impl FarFieldKeyframe {
    pub fn encoded_len(sizes: &KeyframeSizes) -> usize {
        1 + 9 * 4 + sizes.sparse.pixel_count() + chroma_len(sizes.sparse)
    }

    pub fn decode(bytes: &[u8], sizes: &KeyframeSizes) -> Result<Self, ProtocolError> {
        check_header(
            bytes,
            PackageKind::FarFieldKeyframe,
            FAR_FIELD_KEYFRAME_ID,
            Self::encoded_len(sizes),
        )?;

        let mut reader = ByteReader::new(bytes);
        let rotation = reader.read_f32_array::<9>();
        let luma = reader.take(sizes.sparse.pixel_count()).to_vec();
        let chroma = reader.take(chroma_len(sizes.sparse)).to_vec();

        Ok(Self {
            rotation,
            luma,
            chroma,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 36 + self.luma.len() + self.chroma.len());
        out.push(FAR_FIELD_KEYFRAME_ID);
        push_f32s(&mut out, &self.rotation);
        out.extend_from_slice(&self.luma);
        out.extend_from_slice(&self.chroma);
        out
    }
}
