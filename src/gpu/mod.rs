// SPDX-License-Identifier: GPL-3.0-only

//! Headless wgpu device creation for the reconstruction kernels

use std::sync::Arc;
use tracing::{debug, info};

pub use wgpu;

/// Storage bindings the widest reconstruction kernel declares
pub const REQUIRED_STORAGE_BUFFERS: u32 = 5;

/// Adapter details kept next to the device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    pub adapter_name: String,
    /// Vulkan, Metal, DX12
    pub backend: wgpu::Backend,
    /// Largest storage buffer binding the device accepts
    pub max_storage_buffer_binding_size: u32,
}

/// Create a device and queue without a surface.
///
/// `WGPU_BACKEND` narrows the backends that are probed. Adapters that cannot
/// bind [`REQUIRED_STORAGE_BUFFERS`] storage buffers per stage are rejected so
/// callers fall back to the CPU path.
pub async fn create_compute_device(
    label: &str,
) -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>, GpuDeviceInfo), String> {
    let backends = wgpu::Backends::from_env().unwrap_or(wgpu::Backends::PRIMARY);
    info!(label, ?backends, "Creating compute device");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| format!("No compute adapter: {}", e))?;

    let adapter_info = adapter.get_info();
    let limits = adapter.limits();
    debug!(
        adapter = %adapter_info.name,
        max_storage_buffer_binding_size = limits.max_storage_buffer_binding_size,
        max_storage_buffers_per_shader_stage = limits.max_storage_buffers_per_shader_stage,
        max_compute_workgroups_per_dimension = limits.max_compute_workgroups_per_dimension,
        "Adapter limits"
    );

    if limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
        return Err(format!(
            "Adapter {} binds {} storage buffers per stage, {} required",
            adapter_info.name, limits.max_storage_buffers_per_shader_stage, REQUIRED_STORAGE_BUFFERS
        ));
    }

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| format!("Failed to create compute device: {}", e))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name,
        backend: adapter_info.backend,
        max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
    };
    info!(adapter = %info.adapter_name, backend = ?info.backend, "Compute device ready");

    Ok((Arc::new(device), Arc::new(queue), info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_compute_device() {
        match create_compute_device("test_device").await {
            Ok((_device, _queue, info)) => {
                assert!(info.max_storage_buffer_binding_size > 0);
            }
            Err(e) => println!("Skipping test (no GPU): {}", e),
        }
    }
}
