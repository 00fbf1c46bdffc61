// SPDX-License-Identifier: GPL-3.0-only

//! Sphere sampling and equirectangular mapping
//!
//! One mapping is shared by the projector, the canvas normals and the anchor
//! lookup grid:
//!
//! ```text
//! θ = acos(y / r)        v = ⌊θ / π · h⌋
//! φ = atan2(x, z)        u = ⌊(φ + π) / 2π · w⌋
//! ```

use std::f32::consts::PI;

use crate::types::ImageSize;

/// `n` roughly evenly spaced unit directions on the sphere (golden-angle spiral)
pub fn fibonacci_sphere(n: usize) -> Vec<[f32; 3]> {
    if n == 1 {
        return vec![[0.0, 1.0, 0.0]];
    }

    let golden_angle = PI * (3.0 - 5.0_f32.sqrt());
    (0..n)
        .map(|i| {
            let y = 1.0 - (i as f32 / (n - 1) as f32) * 2.0;
            let radius = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden_angle * i as f32;
            [theta.cos() * radius, y, theta.sin() * radius]
        })
        .collect()
}

/// Texel `(u, v)` hit by a direction of length `r > 0`, clamped into the image
#[inline]
pub fn direction_to_texel(p: [f32; 3], r: f32, width: u32, height: u32) -> (u32, u32) {
    let theta = (p[1] / r).clamp(-1.0, 1.0).acos();
    let phi = p[0].atan2(p[2]);

    let v = (theta / PI * height as f32) as i64;
    let u = ((phi + PI) / (2.0 * PI) * width as f32) as i64;

    (
        u.clamp(0, width as i64 - 1) as u32,
        v.clamp(0, height as i64 - 1) as u32,
    )
}

/// Unit direction through the center of texel `(u, v)`
#[inline]
pub fn texel_to_direction(u: u32, v: u32, width: u32, height: u32) -> [f32; 3] {
    let theta = (v as f32 + 0.5) / height as f32 * PI;
    let phi = (u as f32 + 0.5) / width as f32 * 2.0 * PI - PI;
    let (sin_theta, cos_theta) = theta.sin_cos();
    [sin_theta * phi.sin(), cos_theta, sin_theta * phi.cos()]
}

/// Outward normals of every canvas texel, row-major
pub fn canvas_normals(size: ImageSize) -> Vec<[f32; 3]> {
    (0..size.height)
        .flat_map(|v| (0..size.width).map(move |u| texel_to_direction(u, v, size.width, size.height)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{dot, length};

    #[test]
    fn test_fibonacci_sphere_unit_length() {
        let dirs = fibonacci_sphere(100);
        assert_eq!(dirs.len(), 100);
        for d in &dirs {
            assert!((length(*d) - 1.0).abs() < 1e-5);
        }
        assert!((dirs[0][1] - 1.0).abs() < 1e-6);
        assert!((dirs[99][1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_texel_round_trip() {
        let (w, h) = (64, 32);
        for v in 0..h {
            for u in 0..w {
                let d = texel_to_direction(u, v, w, h);
                assert_eq!(direction_to_texel(d, 1.0, w, h), (u, v));
            }
        }
    }

    #[test]
    fn test_forward_is_canvas_center() {
        // +Z maps to the horizontal center on the equator
        let (u, v) = direction_to_texel([0.0, 0.0, 2.0], 2.0, 512, 256);
        assert_eq!((u, v), (256, 128));
        // Straight up lands on the first row
        let (_, v) = direction_to_texel([0.0, 5.0, 0.0], 5.0, 512, 256);
        assert_eq!(v, 0);
        // Straight down is clamped into the last row
        let (_, v) = direction_to_texel([0.0, -1.0, 0.0], 1.0, 512, 256);
        assert_eq!(v, 255);
    }

    #[test]
    fn test_canvas_normals_are_unit() {
        let normals = canvas_normals(ImageSize::new(16, 8));
        assert_eq!(normals.len(), 128);
        for n in &normals {
            assert!((dot(*n, *n) - 1.0).abs() < 1e-5);
        }
    }
}
