// SPDX-License-Identifier: GPL-3.0-only

//! Debug dumps of session state
//!
//! Point clouds and anchors are written as uncompressed LAS with color;
//! environment maps as PNG.

use std::path::Path;

use las::{Builder, Color, Point, Writer};
use tracing::{debug, info};

use crate::anchors::AnchorNetwork;
use crate::constants::CLIP_DISTANCE;
use crate::errors::{AppError, AppResult};
use crate::pipelines::{AnchorSet, Canvas};
use crate::types::length;

fn storage_err(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Storage(format!("{}: {}", context, e))
}

fn write_las(path: &Path, points: &[([f64; 3], [u8; 3])]) -> AppResult<()> {
    if points.is_empty() {
        return Err(AppError::Storage("No valid points to export".to_string()));
    }

    let bounds = |axis: usize| {
        points
            .iter()
            .map(|(p, _)| p[axis])
            .fold((f64::MAX, f64::MIN), |(min, max), v| (min.min(v), max.max(v)))
    };
    let centre = |axis: usize| {
        let (min, max) = bounds(axis);
        (min + max) / 2.0
    };

    let mut builder = Builder::from((1, 4));
    builder.point_format.has_color = true;
    builder.point_format.is_compressed = false;

    // 0.1 mm precision
    let scale = 0.0001;
    builder.transforms = las::Vector {
        x: las::Transform {
            scale,
            offset: centre(0),
        },
        y: las::Transform {
            scale,
            offset: centre(1),
        },
        z: las::Transform {
            scale,
            offset: centre(2),
        },
    };

    let header = builder
        .into_header()
        .map_err(|e| storage_err("Failed to build LAS header", e))?;
    let mut writer = Writer::from_path(path, header)
        .map_err(|e| storage_err("Failed to create LAS writer", e))?;

    for (p, rgb) in points {
        let mut point = Point::default();
        point.x = p[0];
        point.y = p[1];
        point.z = p[2];
        point.color = Some(Color::new(
            rgb[0] as u16 * 256,
            rgb[1] as u16 * 256,
            rgb[2] as u16 * 256,
        ));
        writer
            .write_point(point)
            .map_err(|e| storage_err("Failed to write point", e))?;
    }

    writer
        .close()
        .map_err(|e| storage_err("Failed to close LAS file", e))?;
    Ok(())
}

/// Write every unclipped point of a cloud slice as colored LAS
pub fn write_point_cloud_las(path: &Path, xyz: &[[f32; 3]], rgb: &[[u8; 3]]) -> AppResult<usize> {
    let points: Vec<([f64; 3], [u8; 3])> = xyz
        .iter()
        .zip(rgb)
        .filter(|(p, _)| {
            let r = length(**p);
            r > 0.0 && r < CLIP_DISTANCE
        })
        .map(|(p, c)| (p.map(f64::from), *c))
        .collect();

    write_las(path, &points)?;
    info!(points = points.len(), path = %path.display(), "Exported point cloud");
    Ok(points.len())
}

/// Write anchors as points on the unit sphere colored with their current RGB
pub fn write_anchors_las(path: &Path, network: &AnchorNetwork, anchors: &AnchorSet) -> AppResult<()> {
    let points: Vec<([f64; 3], [u8; 3])> = network
        .directions()
        .iter()
        .zip(&anchors.rgb)
        .map(|(d, c)| (d.map(f64::from), *c))
        .collect();

    write_las(path, &points)?;
    info!(anchors = points.len(), path = %path.display(), "Exported anchors");
    Ok(())
}

/// Write the canvas as an 8-bit PNG
pub fn write_envmap_png(path: &Path, canvas: &Canvas) -> AppResult<()> {
    let size = canvas.size();
    let image = image::RgbImage::from_raw(size.width, size.height, canvas.to_rgb8())
        .ok_or_else(|| AppError::Encoding("Canvas buffer does not match its size".to_string()))?;
    image.save_with_format(path, image::ImageFormat::Png)?;
    debug!(path = %path.display(), "Exported environment map");
    Ok(())
}
