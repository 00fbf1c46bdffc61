// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU utilities for the reconstruction processors
//!
//! Provides common functionality used by the point cloud, panorama and
//! far-field processors:
//! - Bind group layout entries
//! - Compute pipeline creation
//! - Host <-> GPU data packing

use crate::gpu::wgpu;

/// Storage buffer entry visible to compute shaders
pub fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Uniform buffer entry visible to compute shaders
pub fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Create a compute pipeline for `entry_point` of `module`
pub fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Create a storage buffer initialized with `contents`
pub fn create_storage_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    contents: &[u8],
) -> wgpu::Buffer {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: (contents.len() as u64).max(4),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    queue.write_buffer(&buffer, 0, contents);
    buffer
}

/// Pack bytes into little-endian u32 words, zero-padding the last word
pub fn pack_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut word = [0u8; 4];
            word[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Pack u16 values two per u32 word (low half first)
pub fn pack_u16_pairs(values: &[u16]) -> Vec<u32> {
    values
        .chunks(2)
        .map(|c| c[0] as u32 | (c.get(1).copied().unwrap_or(0) as u32) << 16)
        .collect()
}

/// Decode little-endian f32s from a readback buffer
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Decode little-endian u32s from a readback buffer
pub fn bytes_to_u32(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_bytes_pads() {
        assert_eq!(pack_bytes(&[1, 2, 3, 4, 5]), vec![0x0403_0201, 0x05]);
        assert!(pack_bytes(&[]).is_empty());
    }

    #[test]
    fn test_pack_u16_pairs() {
        assert_eq!(pack_u16_pairs(&[1, 2, 3]), vec![0x0002_0001, 3]);
    }

    #[test]
    fn test_readback_decoding() {
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(bytes_to_f32(&bytes), vec![1.5, -2.0]);
        assert_eq!(bytes_to_u32(&7u32.to_le_bytes()), vec![7]);
    }
}
