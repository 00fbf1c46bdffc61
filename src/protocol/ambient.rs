// SPDX-License-Identifier: GPL-3.0-only

//! Ambient color estimation from color temperature and brightness
//!
//! The client reports the light estimate of its AR framework as a correlated
//! color temperature (Kelvin) and a brightness multiplier. The color is
//! derived with the usual curve fit of the Planckian locus, clamped per
//! channel, scaled by brightness and clamped again.

use serde::{Deserialize, Serialize};

/// Light estimate reported in the session-init handshake
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AmbientInfo {
    /// Color temperature in Kelvin
    pub temperature: f32,
    /// Linear brightness multiplier
    pub brightness: f32,
}

impl AmbientInfo {
    pub fn new(temperature: f32, brightness: f32) -> Self {
        Self {
            temperature,
            brightness,
        }
    }

    /// Ambient RGB used to seed anchors and the canvas fill
    pub fn to_rgb(&self) -> [u8; 3] {
        let rgb = blackbody_rgb(self.temperature);
        let scale = if self.brightness.is_finite() {
            self.brightness
        } else {
            0.0
        };
        rgb.map(|c| (c * scale).clamp(0.0, 255.0) as u8)
    }
}

/// Blackbody color of `kelvin` as unscaled floats in `[0, 255]`
pub fn blackbody_rgb(kelvin: f32) -> [f32; 3] {
    let t = kelvin as f64 / 100.0;

    let (r, g, b) = if t <= 66.0 {
        let r = 255.0;
        let g = -155.254_855_627_091_79 - 0.445_969_504_695_791_33 * (t - 2.0)
            + 104.492_161_993_938_88 * (t - 2.0).max(f64::MIN_POSITIVE).ln();
        let b = if t > 20.0 {
            -254.769_351_841_209_02 + 0.827_409_606_400_739_5 * (t - 10.0)
                + 115.679_944_010_661_47 * (t - 10.0).ln()
        } else {
            0.0
        };
        (r, g, b)
    } else {
        let r = 351.976_905_668_056_93 + 0.114_206_453_784_165 * (t - 55.0)
            - 40.253_663_093_321_27 * (t - 55.0).ln();
        let g = 325.449_412_571_197_4 + 0.079_434_565_366_623_42 * (t - 50.0)
            - 28.085_296_350_795_7 * (t - 50.0).ln();
        (r, g, 255.0)
    };

    let clamp = |c: f64| {
        if c.is_nan() {
            0.0
        } else {
            c.clamp(0.0, 255.0) as f32
        }
    };
    [clamp(r), clamp(g), clamp(b)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daylight_is_near_white() {
        let rgb = AmbientInfo::new(6600.0, 1.0).to_rgb();
        assert_eq!(rgb[0], 255);
        assert!(rgb[1] > 240, "{:?}", rgb);
        assert!(rgb[2] > 240, "{:?}", rgb);
    }

    #[test]
    fn test_warm_light_has_no_blue() {
        let rgb = AmbientInfo::new(1900.0, 1.0).to_rgb();
        assert_eq!(rgb[0], 255);
        assert_eq!(rgb[2], 0);
        assert!(rgb[1] < 160);
    }

    #[test]
    fn test_cool_light_is_blue() {
        let rgb = AmbientInfo::new(12000.0, 1.0).to_rgb();
        assert_eq!(rgb[2], 255);
        assert!(rgb[0] < 255);
    }

    #[test]
    fn test_brightness_scales_and_clamps() {
        let full = AmbientInfo::new(6500.0, 1.0).to_rgb();
        let half = AmbientInfo::new(6500.0, 0.5).to_rgb();
        for c in 0..3 {
            let expected = (blackbody_rgb(6500.0)[c] * 0.5) as u8;
            assert_eq!(half[c], expected);
        }
        assert_eq!(AmbientInfo::new(6500.0, 4.0).to_rgb(), [255, 255, 255]);
        assert!(full[0] >= half[0]);
        assert_eq!(AmbientInfo::new(6500.0, -1.0).to_rgb(), [0, 0, 0]);
    }
}
