// SPDX-License-Identifier: GPL-3.0-only

//! Shared geometry and image types

use serde::{Deserialize, Serialize};

/// Width/height pair of an image plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of the half-resolution chroma plane of a 4:2:0 image
    pub fn chroma(&self) -> ImageSize {
        ImageSize::new(self.width / 2, self.height / 2)
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pinhole camera intrinsics in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    pub const fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Intrinsics for the same camera sampled at `ratio` times the resolution
    pub fn scaled(&self, ratio: f32) -> Self {
        Self {
            fx: self.fx * ratio,
            fy: self.fy * ratio,
            cx: self.cx * ratio,
            cy: self.cy * ratio,
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.fx, self.fy, self.cx, self.cy]
    }

    /// Unproject pixel `(u, v)` at distance `depth` into camera space
    #[inline]
    pub fn unproject(&self, u: f32, v: f32, depth: f32) -> [f32; 3] {
        [
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        ]
    }
}

/// Row-major 3x4 camera-to-world transform (rotation | translation)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraToWorld(pub [f32; 12]);

impl CameraToWorld {
    pub const IDENTITY: CameraToWorld =
        CameraToWorld([1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);

    /// Orientation-only transform from a row-major 3x3 rotation
    pub fn from_rotation(r: &[f32; 9]) -> Self {
        CameraToWorld([
            r[0], r[1], r[2], 0.0, //
            r[3], r[4], r[5], 0.0, //
            r[6], r[7], r[8], 0.0,
        ])
    }

    /// Apply the transform with an implicit homogeneous `w = 1`
    #[inline]
    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        [
            m[0] * p[0] + m[1] * p[1] + m[2] * p[2] + m[3],
            m[4] * p[0] + m[5] * p[1] + m[6] * p[2] + m[7],
            m[8] * p[0] + m[9] * p[1] + m[10] * p[2] + m[11],
        ]
    }

    /// Rows as vec4s, the layout expected by the point cloud kernel
    pub fn rows(&self) -> [[f32; 4]; 3] {
        let m = &self.0;
        [
            [m[0], m[1], m[2], m[3]],
            [m[4], m[5], m[6], m[7]],
            [m[8], m[9], m[10], m[11]],
        ]
    }
}

impl Default for CameraToWorld {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// BT.601 full-range YCbCr to RGB, each channel clamped to `[0, 255]`
#[inline]
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;

    let r = y + 1.402 * cr;
    let g = y - 0.34414 * cb - 0.71414 * cr;
    let b = y + 1.772 * cb;

    [
        r.clamp(0.0, 255.0) as u8,
        g.clamp(0.0, 255.0) as u8,
        b.clamp(0.0, 255.0) as u8,
    ]
}

/// Pack an RGB triple into the `0x00BBGGRR` layout used by GPU buffers
#[inline]
pub fn pack_rgb(rgb: [u8; 3]) -> u32 {
    rgb[0] as u32 | (rgb[1] as u32) << 8 | (rgb[2] as u32) << 16
}

#[inline]
pub fn unpack_rgb(packed: u32) -> [u8; 3] {
    [
        (packed & 0xff) as u8,
        ((packed >> 8) & 0xff) as u8,
        ((packed >> 16) & 0xff) as u8,
    ]
}

#[inline]
pub fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn length(a: [f32; 3]) -> f32 {
    dot(a, a).sqrt()
}

/// Unit vector along `a`; zero-length input stays zero
#[inline]
pub fn normalize(a: [f32; 3]) -> [f32; 3] {
    let len = length(a);
    if len > 0.0 {
        [a[0] / len, a[1] / len, a[2] / len]
    } else {
        [0.0; 3]
    }
}
