// SPDX-License-Identifier: GPL-3.0-only

//! Environment map encoding

use crate::errors::AppResult;
use crate::pipelines::Canvas;
use crate::types::ImageSize;

/// Shift interleaved RGB rows left by `shift` columns, wrapping around.
///
/// Output column `j` holds input column `(j + shift) % width`.
pub fn roll_columns(rgb: &[u8], size: ImageSize, shift: u32) -> Vec<u8> {
    let width = size.width as usize;
    if width == 0 {
        return rgb.to_vec();
    }
    let shift = shift as usize % width;
    let mut out = vec![0u8; rgb.len()];
    for (src_row, dst_row) in rgb.chunks_exact(width * 3).zip(out.chunks_exact_mut(width * 3)) {
        let split = (width - shift) * 3;
        dst_row[..split].copy_from_slice(&src_row[shift * 3..]);
        dst_row[split..].copy_from_slice(&src_row[..shift * 3]);
    }
    out
}

/// Canvas as 8-bit RGB rolled by a quarter of its width (client seam placement)
pub fn environment_map_rgb(canvas: &Canvas) -> Vec<u8> {
    let size = canvas.size();
    roll_columns(&canvas.to_rgb8(), size, size.width / 4)
}

/// JPEG-encode the rolled environment map
pub fn encode_environment_map_jpeg(canvas: &Canvas, quality: u8) -> AppResult<Vec<u8>> {
    let size = canvas.size();
    let rgb = environment_map_rgb(canvas);

    let mut buffer = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode(&rgb, size.width, size.height, image::ExtendedColorType::Rgb8)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_wraps_columns() {
        // One row of four pixels tagged 0..4
        let rgb: Vec<u8> = (0..4).flat_map(|i| [i, i, i]).collect();
        let rolled = roll_columns(&rgb, ImageSize::new(4, 1), 1);
        assert_eq!(rolled, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 0, 0, 0]);
        assert_eq!(roll_columns(&rgb, ImageSize::new(4, 1), 4), rgb);
    }

    #[test]
    fn test_environment_map_is_rolled_by_quarter() {
        let mut canvas = Canvas::new(ImageSize::new(8, 2));
        canvas.data[0] = [255.0, 0.0, 0.0];
        canvas.data[2] = [0.0, 255.0, 0.0];
        let rgb = environment_map_rgb(&canvas);
        // Column 0 wraps to the end, column 2 moves to the front
        assert_eq!(&rgb[6 * 3..6 * 3 + 3], &[255, 0, 0]);
        assert_eq!(&rgb[..3], &[0, 255, 0]);
        assert_eq!(&rgb[2 * 3..2 * 3 + 3], &[0, 0, 0]);
    }

    #[test]
    fn test_jpeg_decodes_to_canvas_size() {
        let mut canvas = Canvas::new(ImageSize::new(32, 16));
        canvas.fill([120, 120, 120]);
        let jpeg = encode_environment_map_jpeg(&canvas, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 16));
        let p = decoded.get_pixel(5, 5).0;
        assert!(p.iter().all(|&c| (c as i32 - 120).abs() <= 2));
    }
}
