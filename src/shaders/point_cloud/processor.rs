// SPDX-License-Identifier: GPL-3.0-only

//! GPU point cloud processor

use std::sync::Arc;

use tracing::{debug, info};

use crate::constants::{CLIP_DISTANCE, DEPTH_EDGE_THRESHOLD};
use crate::gpu::wgpu;
use crate::pipelines::ViewFrame;
use crate::shaders::gpu_utils::{
    self, bytes_to_f32, bytes_to_u32, pack_bytes, storage_entry, uniform_entry,
};
use crate::shaders::{CachedBuffer, GpuContext, checked_dispatch_size, read_buffer_async};
use crate::types::unpack_rgb;

/// Generation parameters (matches `GenerateParams` in generate.wgsl)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GenerateParams {
    dense_width: u32,
    dense_height: u32,
    depth_width: u32,
    depth_height: u32,
    upsample_rate: f32,
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
    clip: f32,
    edge_threshold: f32,
    _pad: u32,
    transform: [[f32; 4]; 3],
}

/// GPU point cloud processor
pub struct PointCloudProcessor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    // Cached resources, sized per frame layout
    luma_buffer: CachedBuffer,
    chroma_buffer: CachedBuffer,
    depth_buffer: CachedBuffer,
    xyz_buffer: CachedBuffer,
    rgb_buffer: CachedBuffer,
    staging_buffer: CachedBuffer,
}

impl PointCloudProcessor {
    /// Compile the generation kernel on the shared device
    pub fn new(ctx: &GpuContext) -> Result<Self, String> {
        info!("Initializing GPU point cloud processor");

        let device = ctx.device.clone();
        let queue = ctx.queue.clone();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("point_cloud_generate_shader"),
            source: wgpu::ShaderSource::Wgsl(super::GENERATE_WGSL.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("point_cloud_bind_group_layout"),
            entries: &[
                // Packed luma bytes
                storage_entry(0, true),
                // Packed interleaved CbCr bytes
                storage_entry(1, true),
                // Native depth
                storage_entry(2, true),
                // Output XYZ (3 floats per point)
                storage_entry(3, false),
                // Output packed RGB
                storage_entry(4, false),
                uniform_entry(5),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("point_cloud_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = gpu_utils::create_compute_pipeline(
            &device,
            "point_cloud_generate_pipeline",
            &pipeline_layout,
            &shader,
            "main",
        );

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("point_cloud_uniform_buffer"),
            size: std::mem::size_of::<GenerateParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            luma_buffer: CachedBuffer::default(),
            chroma_buffer: CachedBuffer::default(),
            depth_buffer: CachedBuffer::default(),
            xyz_buffer: CachedBuffer::default(),
            rgb_buffer: CachedBuffer::default(),
            staging_buffer: CachedBuffer::default(),
        })
    }

    /// Generate the points of `frame` into `xyz` / `rgb`
    pub async fn generate(
        &mut self,
        frame: &ViewFrame<'_>,
        xyz: &mut [[f32; 3]],
        rgb: &mut [[u8; 3]],
    ) -> Result<(), String> {
        if !frame.is_consistent() {
            return Err("View planes do not match their declared sizes".to_string());
        }
        let points = frame.pixel_count();
        if xyz.len() != points || rgb.len() != points {
            return Err(format!(
                "Output slice holds {} points, view has {}",
                xyz.len(),
                points
            ));
        }
        let workgroups = checked_dispatch_size(&self.device, points, 256)?;

        let luma = pack_bytes(frame.luma);
        let chroma = pack_bytes(frame.chroma);
        let xyz_size = (points * 3 * 4) as u64;
        let rgb_size = (points * 4) as u64;

        let input_usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let output_usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;

        let luma_buffer = self.luma_buffer.ensure(
            &self.device,
            "point_cloud_luma_buffer",
            (luma.len() * 4) as u64,
            input_usage,
        );
        self.queue
            .write_buffer(luma_buffer, 0, bytemuck::cast_slice(&luma));

        let chroma_buffer = self.chroma_buffer.ensure(
            &self.device,
            "point_cloud_chroma_buffer",
            (chroma.len() * 4) as u64,
            input_usage,
        );
        self.queue
            .write_buffer(chroma_buffer, 0, bytemuck::cast_slice(&chroma));

        let depth_buffer = self.depth_buffer.ensure(
            &self.device,
            "point_cloud_depth_buffer",
            (frame.depth.len() * 4) as u64,
            input_usage,
        );
        self.queue
            .write_buffer(depth_buffer, 0, bytemuck::cast_slice(frame.depth));

        self.xyz_buffer
            .ensure(&self.device, "point_cloud_xyz_buffer", xyz_size, output_usage);
        self.rgb_buffer
            .ensure(&self.device, "point_cloud_rgb_buffer", rgb_size, output_usage);
        self.staging_buffer.ensure(
            &self.device,
            "point_cloud_staging_buffer",
            xyz_size + rgb_size,
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        );

        let intrinsics = frame.intrinsics;
        let params = GenerateParams {
            dense_width: frame.color_size.width,
            dense_height: frame.color_size.height,
            depth_width: frame.depth_size.width,
            depth_height: frame.depth_size.height,
            upsample_rate: frame.upsample_rate(),
            fx: intrinsics.fx,
            fy: intrinsics.fy,
            cx: intrinsics.cx,
            cy: intrinsics.cy,
            clip: CLIP_DISTANCE,
            edge_threshold: DEPTH_EDGE_THRESHOLD,
            _pad: 0,
            transform: frame.camera_to_world.rows(),
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        let (
            Some(luma_buffer),
            Some(chroma_buffer),
            Some(depth_buffer),
            Some(xyz_buffer),
            Some(rgb_buffer),
            Some(staging_buffer),
        ) = (
            self.luma_buffer.get(),
            self.chroma_buffer.get(),
            self.depth_buffer.get(),
            self.xyz_buffer.get(),
            self.rgb_buffer.get(),
            self.staging_buffer.get(),
        )
        else {
            return Err("Point cloud buffers not allocated".to_string());
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("point_cloud_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: luma_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: chroma_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: depth_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: xyz_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: rgb_buffer.as_entire_binding(),
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
                label: Some("point_cloud_encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("point_cloud_generate_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        encoder.copy_buffer_to_buffer(xyz_buffer, 0, staging_buffer, 0, xyz_size);
        encoder.copy_buffer_to_buffer(rgb_buffer, 0, staging_buffer, xyz_size, rgb_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let data = read_buffer_async(&self.device, staging_buffer).await?;
        let (xyz_bytes, rgb_bytes) = data.split_at(xyz_size as usize);

        for (out, p) in xyz
            .iter_mut()
            .zip(bytes_to_f32(xyz_bytes).chunks_exact(3))
        {
            *out = [p[0], p[1], p[2]];
        }
        for (out, packed) in rgb.iter_mut().zip(bytes_to_u32(&rgb_bytes[..rgb_size as usize])) {
            *out = unpack_rgb(packed);
        }

        debug!(points, "GPU point cloud generation complete");
        Ok(())
    }
}
