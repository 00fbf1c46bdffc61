// SPDX-License-Identifier: GPL-3.0-only

//! GPU compute kernels for the reconstruction pipeline
//!
//! Every pipeline stage has a WGSL kernel and a processor that uploads the
//! stage inputs, dispatches, waits for completion and reads the results back.
//! All processors of a process share one device through [`GpuContext`].

pub mod far_field;
mod gpu_processor;
pub mod gpu_utils;
pub mod panorama;
pub mod point_cloud;

pub use gpu_processor::{
    CachedBuffer, checked_dispatch_size, compute_dispatch_size, read_buffer_async,
};

use std::sync::Arc;

use tracing::info;

use crate::gpu::{self, GpuDeviceInfo, wgpu};
use crate::gpu_processor_singleton;

/// Device and queue shared by all compute processors
#[derive(Clone, Debug)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub info: GpuDeviceInfo,
}

impl GpuContext {
    pub async fn new() -> Result<Self, String> {
        let (device, queue, info) = gpu::create_compute_device("envlight_compute").await?;
        info!(
            adapter_name = %info.adapter_name,
            adapter_backend = ?info.backend,
            "GPU device created for reconstruction"
        );
        Ok(Self {
            device,
            queue,
            info,
        })
    }
}

gpu_processor_singleton!(GpuContext, SHARED_GPU_CONTEXT, get_gpu_context);

/// Shared GPU context, created on first use
pub async fn shared_gpu_context() -> Result<Arc<GpuContext>, String> {
    let guard = get_gpu_context().await?;
    guard
        .as_ref()
        .cloned()
        .map(Arc::new)
        .ok_or_else(|| "GPU context not initialized".to_string())
}

/// Parse and validate a WGSL module with naga
#[cfg(test)]
pub(crate) fn validate_shader(name: &str, source: &str) {
    let module = match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(e) => panic!("Shader '{}' parse failed: {:?}", name, e),
    };
    if let Err(e) = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    {
        panic!("Shader '{}' validation failed: {:?}", name, e);
    }
}

/// Run `f` with a GPU context, or print and skip when no adapter exists
#[cfg(test)]
pub(crate) fn with_test_gpu(f: impl FnOnce(Arc<GpuContext>)) {
    match pollster::block_on(GpuContext::new()) {
        Ok(ctx) => f(Arc::new(ctx)),
        Err(e) => println!("Skipping test (no GPU): {}", e),
    }
}
