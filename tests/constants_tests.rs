// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use envlight::constants::{
    ANCHOR_MATCH_COSINE, CLIP_DISTANCE, DEPTH_EDGE_THRESHOLD, MAX_PYRAMID_LEVELS, PanoramaQuality,
};

#[test]
fn test_quality_presets() {
    assert_eq!(PanoramaQuality::ALL.len(), 3);
    assert_eq!(PanoramaQuality::Low.level_heights(), &[256, 128, 32]);
    assert_eq!(PanoramaQuality::Medium.level_heights(), &[384, 192]);
    assert_eq!(PanoramaQuality::High.level_heights(), &[512, 256, 128]);
}

#[test]
fn test_quality_presets_ordered_by_resolution() {
    let mut previous = 0;
    for preset in PanoramaQuality::ALL {
        assert!(preset.canvas_height() > previous);
        assert!(preset.level_heights().len() <= MAX_PYRAMID_LEVELS);
        previous = preset.canvas_height();
    }
}

#[test]
fn test_thresholds() {
    assert_eq!(CLIP_DISTANCE, 1000.0);
    assert_eq!(DEPTH_EDGE_THRESHOLD, 0.015);
    assert_eq!(ANCHOR_MATCH_COSINE, 0.99);
}

#[test]
fn test_quality_display_names() {
    for preset in PanoramaQuality::ALL {
        assert!(!preset.display_name().is_empty());
        assert_eq!(preset.display_name().parse::<PanoramaQuality>(), Ok(preset));
    }
}
