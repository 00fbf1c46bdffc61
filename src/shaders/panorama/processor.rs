// SPDX-License-Identifier: GPL-3.0-only

//! GPU panorama processor
//!
//! Projection runs four passes in one submission (clear, depth max, index
//! min, resolve); the merge pass paints hit texels onto the uploaded canvas.

use std::sync::Arc;

use tracing::{debug, info};

use crate::constants::{CLIP_DISTANCE, MAX_PYRAMID_LEVELS};
use crate::gpu::wgpu;
use crate::pipelines::{Canvas, PanoramaLevels};
use crate::shaders::gpu_utils::{
    self, bytes_to_f32, bytes_to_u32, storage_entry, uniform_entry,
};
use crate::shaders::{
    CachedBuffer, GpuContext, checked_dispatch_size, compute_dispatch_size, read_buffer_async,
};
use crate::types::pack_rgb;

/// Projection parameters (matches `ProjectParams` in project.wgsl)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ProjectParams {
    point_count: u32,
    level_count: u32,
    total_slots: u32,
    _pad0: u32,
    half_extent: f32,
    clip: f32,
    _pad1: u32,
    _pad2: u32,
    heights: [u32; 4],
    offsets: [u32; 4],
}

/// Merge parameters (matches `MergeParams` in merge.wgsl)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct MergeParams {
    canvas_width: u32,
    canvas_height: u32,
    level_count: u32,
    _pad0: u32,
    heights: [u32; 4],
    offsets: [u32; 4],
    clip: f32,
    _pad1: [u32; 3],
}

fn level_table(levels: &PanoramaLevels) -> Result<([u32; 4], [u32; 4]), String> {
    if levels.level_count() > MAX_PYRAMID_LEVELS {
        return Err(format!(
            "{} pyramid levels exceed the GPU limit of {}",
            levels.level_count(),
            MAX_PYRAMID_LEVELS
        ));
    }
    let mut heights = [0u32; 4];
    let mut offsets = [0u32; 4];
    for (l, (&h, &o)) in levels.heights().iter().zip(levels.offsets()).enumerate() {
        heights[l] = h;
        offsets[l] = o as u32;
    }
    Ok((heights, offsets))
}

/// GPU panorama processor
pub struct PanoramaProcessor {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    clear_pipeline: wgpu::ComputePipeline,
    depth_pipeline: wgpu::ComputePipeline,
    index_pipeline: wgpu::ComputePipeline,
    resolve_pipeline: wgpu::ComputePipeline,
    merge_pipeline: wgpu::ComputePipeline,
    project_layout: wgpu::BindGroupLayout,
    merge_layout: wgpu::BindGroupLayout,
    project_uniform: wgpu::Buffer,
    merge_uniform: wgpu::Buffer,
    // Projection resources
    xyz_buffer: CachedBuffer,
    depth_bits_buffer: CachedBuffer,
    index_bits_buffer: CachedBuffer,
    out_indices_buffer: CachedBuffer,
    out_depths_buffer: CachedBuffer,
    project_staging: CachedBuffer,
    // Merge resources
    level_indices_buffer: CachedBuffer,
    level_depths_buffer: CachedBuffer,
    rgb_buffer: CachedBuffer,
    canvas_buffer: CachedBuffer,
    merge_staging: CachedBuffer,
}

impl PanoramaProcessor {
    /// Compile the projection and merge kernels on the shared device
    pub fn new(ctx: &GpuContext) -> Result<Self, String> {
        info!("Initializing GPU panorama processor");

        let device = ctx.device.clone();
        let queue = ctx.queue.clone();

        let project_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("panorama_project_shader"),
            source: wgpu::ShaderSource::Wgsl(super::PROJECT_WGSL.into()),
        });
        let merge_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("panorama_merge_shader"),
            source: wgpu::ShaderSource::Wgsl(super::MERGE_WGSL.into()),
        });

        let project_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("panorama_project_bind_group_layout"),
            entries: &[
                // Point XYZ
                storage_entry(0, true),
                // Atomic depth bits
                storage_entry(1, false),
                // Atomic point indices
                storage_entry(2, false),
                // Resolved indices
                storage_entry(3, false),
                // Resolved depths
                storage_entry(4, false),
                uniform_entry(5),
            ],
        });

        let merge_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("panorama_merge_bind_group_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                // Packed point RGB
                storage_entry(2, true),
                // Canvas (3 floats per texel)
                storage_entry(3, false),
                uniform_entry(4),
            ],
        });

        let project_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("panorama_project_pipeline_layout"),
                bind_group_layouts: &[&project_layout],
                push_constant_ranges: &[],
            });
        let merge_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("panorama_merge_pipeline_layout"),
                bind_group_layouts: &[&merge_layout],
                push_constant_ranges: &[],
            });

        let project_pipeline = |label: &str, entry: &str| {
            gpu_utils::create_compute_pipeline(
                &device,
                label,
                &project_pipeline_layout,
                &project_shader,
                entry,
            )
        };
        let clear_pipeline = project_pipeline("panorama_clear_pipeline", "clear_levels");
        let depth_pipeline = project_pipeline("panorama_depth_pipeline", "accumulate_depth");
        let index_pipeline = project_pipeline("panorama_index_pipeline", "accumulate_index");
        let resolve_pipeline = project_pipeline("panorama_resolve_pipeline", "resolve_levels");
        let merge_pipeline = gpu_utils::create_compute_pipeline(
            &device,
            "panorama_merge_pipeline",
            &merge_pipeline_layout,
            &merge_shader,
            "main",
        );

        let uniform = |label: &str, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let project_uniform = uniform(
            "panorama_project_uniform_buffer",
            std::mem::size_of::<ProjectParams>(),
        );
        let merge_uniform = uniform(
            "panorama_merge_uniform_buffer",
            std::mem::size_of::<MergeParams>(),
        );

        Ok(Self {
            device,
            queue,
            clear_pipeline,
            depth_pipeline,
            index_pipeline,
            resolve_pipeline,
            merge_pipeline,
            project_layout,
            merge_layout,
            project_uniform,
            merge_uniform,
            xyz_buffer: CachedBuffer::default(),
            depth_bits_buffer: CachedBuffer::default(),
            index_bits_buffer: CachedBuffer::default(),
            out_indices_buffer: CachedBuffer::default(),
            out_depths_buffer: CachedBuffer::default(),
            project_staging: CachedBuffer::default(),
            level_indices_buffer: CachedBuffer::default(),
            level_depths_buffer: CachedBuffer::default(),
            rgb_buffer: CachedBuffer::default(),
            canvas_buffer: CachedBuffer::default(),
            merge_staging: CachedBuffer::default(),
        })
    }

    /// Project `xyz` into every level, replacing the level contents
    pub async fn project(
        &mut self,
        xyz: &[[f32; 3]],
        half_extent: f32,
        levels: &mut PanoramaLevels,
    ) -> Result<(), String> {
        let (heights, offsets) = level_table(levels)?;
        let total_slots = levels.depths.len();
        let point_groups = checked_dispatch_size(&self.device, xyz.len(), 256)?;
        let slot_groups = checked_dispatch_size(&self.device, total_slots, 256)?;

        let slots_size = (total_slots * 4) as u64;
        let scratch = wgpu::BufferUsages::STORAGE;
        let output = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;

        let xyz_buffer = self.xyz_buffer.ensure(
            &self.device,
            "panorama_xyz_buffer",
            (xyz.len() * 12) as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        self.queue
            .write_buffer(xyz_buffer, 0, bytemuck::cast_slice(xyz));
        self.depth_bits_buffer
            .ensure(&self.device, "panorama_depth_bits_buffer", slots_size, scratch);
        self.index_bits_buffer
            .ensure(&self.device, "panorama_index_bits_buffer", slots_size, scratch);
        self.out_indices_buffer
            .ensure(&self.device, "panorama_out_indices_buffer", slots_size, output);
        self.out_depths_buffer
            .ensure(&self.device, "panorama_out_depths_buffer", slots_size, output);
        self.project_staging.ensure(
            &self.device,
            "panorama_project_staging_buffer",
            slots_size * 2,
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        );

        let params = ProjectParams {
            point_count: xyz.len() as u32,
            level_count: levels.level_count() as u32,
            total_slots: total_slots as u32,
            _pad0: 0,
            half_extent,
            clip: CLIP_DISTANCE,
            _pad1: 0,
            _pad2: 0,
            heights,
            offsets,
        };
        self.queue
            .write_buffer(&self.project_uniform, 0, bytemuck::bytes_of(&params));

        let (
            Some(xyz_buffer),
            Some(depth_bits),
            Some(index_bits),
            Some(out_indices),
            Some(out_depths),
            Some(staging),
        ) = (
            self.xyz_buffer.get(),
            self.depth_bits_buffer.get(),
            self.index_bits_buffer.get(),
            self.out_indices_buffer.get(),
            self.out_depths_buffer.get(),
            self.project_staging.get(),
        )
        else {
            return Err("Panorama projection buffers not allocated".to_string());
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("panorama_project_bind_group"),
            layout: &self.project_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: xyz_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: depth_bits.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: index_bits.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: out_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: out_depths.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.project_uniform.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("panorama_project_encoder"),
            });

        // Separate passes order the atomics between stages
        for (label, pipeline, groups) in [
            ("panorama_clear_pass", &self.clear_pipeline, slot_groups),
            ("panorama_depth_pass", &self.depth_pipeline, point_groups),
            ("panorama_index_pass", &self.index_pipeline, point_groups),
            ("panorama_resolve_pass", &self.resolve_pipeline, slot_groups),
        ] {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.max(1), 1, 1);
        }

        encoder.copy_buffer_to_buffer(out_indices, 0, staging, 0, slots_size);
        encoder.copy_buffer_to_buffer(out_depths, 0, staging, slots_size, slots_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let data = read_buffer_async(&self.device, staging).await?;
        let (index_bytes, depth_bytes) = data.split_at(slots_size as usize);
        levels.indices.copy_from_slice(&bytes_to_u32(index_bytes));
        levels
            .depths
            .copy_from_slice(&bytes_to_f32(&depth_bytes[..slots_size as usize]));

        debug!(
            points = xyz.len(),
            slots = total_slots,
            "GPU panorama projection complete"
        );
        Ok(())
    }

    /// Paint every texel with a level hit onto `canvas`
    pub async fn merge(
        &mut self,
        levels: &PanoramaLevels,
        rgb: &[[u8; 3]],
        canvas: &mut Canvas,
    ) -> Result<(), String> {
        let (heights, offsets) = level_table(levels)?;
        let size = canvas.size();
        let canvas_bytes = (canvas.data.len() * 12) as u64;
        let input = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;

        let packed_rgb: Vec<u32> = rgb.iter().map(|c| pack_rgb(*c)).collect();

        let buffer = self.level_indices_buffer.ensure(
            &self.device,
            "panorama_level_indices_buffer",
            (levels.indices.len() * 4) as u64,
            input,
        );
        self.queue
            .write_buffer(buffer, 0, bytemuck::cast_slice(&levels.indices));

        let buffer = self.level_depths_buffer.ensure(
            &self.device,
            "panorama_level_depths_buffer",
            (levels.depths.len() * 4) as u64,
            input,
        );
        self.queue
            .write_buffer(buffer, 0, bytemuck::cast_slice(&levels.depths));

        let buffer = self.rgb_buffer.ensure(
            &self.device,
            "panorama_rgb_buffer",
            (packed_rgb.len() * 4) as u64,
            input,
        );
        self.queue
            .write_buffer(buffer, 0, bytemuck::cast_slice(&packed_rgb));

        let buffer = self.canvas_buffer.ensure(
            &self.device,
            "panorama_canvas_buffer",
            canvas_bytes,
            input | wgpu::BufferUsages::COPY_SRC,
        );
        self.queue
            .write_buffer(buffer, 0, bytemuck::cast_slice(&canvas.data));

        self.merge_staging.ensure(
            &self.device,
            "panorama_merge_staging_buffer",
            canvas_bytes,
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        );

        let params = MergeParams {
            canvas_width: size.width,
            canvas_height: size.height,
            level_count: levels.level_count() as u32,
            _pad0: 0,
            heights,
            offsets,
            clip: CLIP_DISTANCE,
            _pad1: [0; 3],
        };
        self.queue
            .write_buffer(&self.merge_uniform, 0, bytemuck::bytes_of(&params));

        let (
            Some(level_indices),
            Some(level_depths),
            Some(rgb_buffer),
            Some(canvas_buffer),
            Some(staging),
        ) = (
            self.level_indices_buffer.get(),
            self.level_depths_buffer.get(),
            self.rgb_buffer.get(),
            self.canvas_buffer.get(),
            self.merge_staging.get(),
        )
        else {
            return Err("Panorama merge buffers not allocated".to_string());
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("panorama_merge_bind_group"),
            layout: &self.merge_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: level_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: level_depths.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: rgb_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: canvas_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.merge_uniform.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("panorama_merge_encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("panorama_merge_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.merge_pipeline);
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

        debug!(canvas = %size, "GPU panorama merge complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::{merge_cpu, project_cpu};
    use crate::shaders::with_test_gpu;
    use crate::types::ImageSize;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<ProjectParams>(), 64);
        assert_eq!(std::mem::size_of::<MergeParams>(), 64);
    }

    #[test]
    fn test_gpu_projection_matches_cpu() {
        with_test_gpu(|ctx| {
            let mut processor = match PanoramaProcessor::new(&ctx) {
                Ok(p) => p,
                Err(e) => {
                    println!("Skipping test (processor unavailable): {}", e);
                    return;
                }
            };

            // Points on texel centers so both sides agree on every texel
            let mut xyz = Vec::new();
            for v in 0..8 {
                for u in 0..16 {
                    let d = crate::anchors::texel_to_direction(u, v, 16, 8);
                    let r = 1.0 + ((u + v) % 3) as f32;
                    xyz.push([d[0] * r, d[1] * r, d[2] * r]);
                }
            }
            xyz.push([0.0, 0.0, 50.0]);
            let rgb: Vec<[u8; 3]> = (0..xyz.len()).map(|i| [i as u8, 0, 255]).collect();

            let mut cpu_levels = PanoramaLevels::new(&[8, 4]);
            project_cpu(&xyz, 10.0, &mut cpu_levels);
            let mut gpu_levels = PanoramaLevels::new(&[8, 4]);
            pollster::block_on(processor.project(&xyz, 10.0, &mut gpu_levels)).unwrap();
            assert_eq!(cpu_levels.indices, gpu_levels.indices);
            for (c, g) in cpu_levels.depths.iter().zip(&gpu_levels.depths) {
                assert!((c - g).abs() < 1e-4, "depth {} vs {}", c, g);
            }

            let mut cpu_canvas = Canvas::new(ImageSize::new(16, 8));
            cpu_canvas.fill([9, 9, 9]);
            let mut gpu_canvas = cpu_canvas.clone();
            merge_cpu(&cpu_levels, &rgb, &mut cpu_canvas);
            pollster::block_on(processor.merge(&gpu_levels, &rgb, &mut gpu_canvas)).unwrap();
            assert_eq!(cpu_canvas.data, gpu_canvas.data);
        });
    }
}
