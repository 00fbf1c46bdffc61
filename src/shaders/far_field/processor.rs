// SPDX-License-Identifier: GPL-3.0-only

//! GPU far-field processor
//!
//! The anchor network (texel normals, anchor directions, acceleration grid)
//! is uploaded once at construction; each composite only uploads anchor
//! colors and reads the canvas back.

use std::sync::Arc;

use tracing::{debug, info};

use crate::anchors::AnchorNetwork;
use crate::constants::FAR_FIELD_EXPONENT;
use crate::gpu::wgpu;
use crate::pipelines::{AnchorSet, Canvas};
use crate::shaders::gpu_utils::{
    self, bytes_to_f32, create_storage_buffer, pack_u16_pairs, storage_entry, uniform_entry,
};
use crate::shaders::{CachedBuffer, GpuContext, compute_dispatch_size, read_buffer_async};
use crate::types::{ImageSize, pack_rgb};

/// Composite parameters (matches `CompositeParams` in composite.wgsl)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CompositeParams {
    width: u32,
    height: u32,
    neighbor_count: u32,
    squarings: u32,
    ambient: [f32; 4],
}

/// GPU far-field processor bound to one anchor network
pub struct FarFieldProcessor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    canvas_size: ImageSize,
    neighbor_count: u32,
    // Static network data
    normals_buffer: wgpu::Buffer,
    directions_buffer: wgpu::Buffer,
    neighbors_buffer: wgpu::Buffer,
    // Per-composite resources
    anchor_rgb_buffer: CachedBuffer,
    canvas_buffer: CachedBuffer,
    staging_buffer: CachedBuffer,
}

impl FarFieldProcessor {
    /// Compile the composite kernel and upload the network
    pub fn new(ctx: &GpuContext, network: &AnchorNetwork) -> Result<Self, String> {
        info!(
            anchors = network.anchor_count(),
            neighbors = network.neighbor_count(),
            "Initializing GPU far-field processor"
        );

        let device = ctx.device.clone();
        let queue = ctx.queue.clone();

        let grid_bytes = network.acceleration_grid().len() as u64 * 2;
        if grid_bytes > ctx.info.max_storage_buffer_binding_size as u64 {
            return Err(format!(
                "Acceleration grid ({} bytes) exceeds the storage binding limit",
                grid_bytes
            ));
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("far_field_composite_shader"),
            source: wgpu::ShaderSource::Wgsl(super::COMPOSITE_WGSL.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("far_field_bind_group_layout"),
            entries: &[
                // Texel normals
                storage_entry(0, true),
                // Anchor directions
                storage_entry(1, true),
                // Acceleration grid (u16 pairs)
                storage_entry(2, true),
                // Packed anchor RGB
                storage_entry(3, true),
                // Output canvas
                storage_entry(4, false),
                uniform_entry(5),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("far_field_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = gpu_utils::create_compute_pipeline(
            &device,
            "far_field_composite_pipeline",
            &pipeline_layout,
            &shader,
            "main",
        );

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("far_field_uniform_buffer"),
            size: std::mem::size_of::<CompositeParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let normals_buffer = create_storage_buffer(
            &device,
            &queue,
            "far_field_normals_buffer",
            bytemuck::cast_slice(network.normals()),
        );
        let directions_buffer = create_storage_buffer(
            &device,
            &queue,
            "far_field_directions_buffer",
            bytemuck::cast_slice(network.directions()),
        );
        let neighbors_buffer = create_storage_buffer(
            &device,
            &queue,
            "far_field_neighbors_buffer",
            bytemuck::cast_slice(&pack_u16_pairs(network.acceleration_grid())),
        );

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            canvas_size: network.canvas_size(),
            neighbor_count: network.neighbor_count() as u32,
            normals_buffer,
            directions_buffer,
            neighbors_buffer,
            anchor_rgb_buffer: CachedBuffer::default(),
            canvas_buffer: CachedBuffer::default(),
            staging_buffer: CachedBuffer::default(),
        })
    }

    /// Overwrite `canvas` with the anchor blend, ambient where no weight lands
    pub async fn composite(
        &mut self,
        anchors: &AnchorSet,
        ambient: [u8; 3],
        canvas: &mut Canvas,
    ) -> Result<(), String> {
        if canvas.size() != self.canvas_size {
            return Err(format!(
                "Canvas {} does not match anchor network canvas {}",
                canvas.size(),
                self.canvas_size
            ));
        }

        let size = self.canvas_size;
        let canvas_bytes = (size.pixel_count() * 12) as u64;
        let packed_rgb: Vec<u32> = anchors.rgb.iter().map(|c| pack_rgb(*c)).collect();

        let buffer = self.anchor_rgb_buffer.ensure(
            &self.device,
            "far_field_anchor_rgb_buffer",
            (packed_rgb.len() * 4) as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        self.queue
            .write_buffer(buffer, 0, bytemuck::cast_slice(&packed_rgb));
        self.canvas_buffer.ensure(
            &self.device,
            "far_field_canvas_buffer",
            canvas_bytes,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        self.staging_buffer.ensure(
            &self.device,
            "far_field_staging_buffer",
            canvas_bytes,
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        );

        let params = CompositeParams {
            width: size.width,
            height: size.height,
            neighbor_count: self.neighbor_count,
            squarings: FAR_FIELD_EXPONENT.trailing_zeros(),
            ambient: [ambient[0] as f32, ambient[1] as f32, ambient[2] as f32, 0.0],
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        let (Some(anchor_rgb), Some(canvas_buffer), Some(staging)) = (
            self.anchor_rgb_buffer.get(),
            self.canvas_buffer.get(),
            self.staging_buffer.get(),
        ) else {
            return Err("Far-field buffers not allocated".to_string());
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("far_field_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.normals_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.directions_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.neighbors_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: anchor_rgb.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: canvas_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("far_field_encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("far_field_composite_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                compute_dispatch_size(size.width, 16),
                compute_dispatch_size(size.height, 16),
                1,
            );
        }

        encoder.copy_buffer_to_buffer(canvas_buffer, 0, staging, 0, canvas_bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let data = read_buffer_async(&self.device, staging).await?;
        for (texel, c) in canvas
            .data
            .iter_mut()
            .zip(bytes_to_f32(&data).chunks_exact(3))
        {
            *texel = [c[0], c[1], c[2]];
        }

        debug!(canvas = %size, "GPU far-field composite complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::AnchorParams;
    use crate::pipelines::composite_cpu;
    use crate::shaders::with_test_gpu;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<CompositeParams>(), 32);
    }

    #[test]
    fn test_gpu_composite_matches_cpu() {
        with_test_gpu(|ctx| {
            let params = AnchorParams {
                anchor_count: 64,
                neighbors: 8,
                canvas: ImageSize::new(32, 16),
            };
            let network = match AnchorNetwork::build(params) {
                Ok(n) => n,
                Err(e) => panic!("network build failed: {}", e),
            };
            let mut processor = match FarFieldProcessor::new(&ctx, &network) {
                Ok(p) => p,
                Err(e) => {
                    println!("Skipping test (processor unavailable): {}", e);
                    return;
                }
            };

            let mut anchors = AnchorSet::new(64, [20, 30, 40]);
            for (i, rgb) in anchors.rgb.iter_mut().enumerate() {
                *rgb = [(i * 4) as u8, 255 - (i * 2) as u8, 100];
            }

            let mut cpu = Canvas::new(params.canvas);
            composite_cpu(&mut cpu, &network, &anchors, [20, 30, 40]);
            let mut gpu = Canvas::new(params.canvas);
            pollster::block_on(processor.composite(&anchors, [20, 30, 40], &mut gpu)).unwrap();

            for (c, g) in cpu.data.iter().zip(&gpu.data) {
                for ch in 0..3 {
                    assert!((c[ch] - g[ch]).abs() < 0.5, "{:?} vs {:?}", c, g);
                }
            }
        });
    }
}
