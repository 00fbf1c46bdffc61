// SPDX-License-Identifier: GPL-3.0-only

//! Buffer caching, readback and dispatch sizing shared by the processors

use crate::gpu::wgpu;

/// Lazily (re)allocated buffer - avoids reallocation when the size matches
///
/// Used by processors whose buffer sizes depend on session sizes.
#[derive(Default, Debug)]
pub struct CachedBuffer {
    buffer: Option<wgpu::Buffer>,
    size: u64,
}

impl CachedBuffer {
    /// Check if the buffer must be recreated for `size` bytes
    pub fn needs_update(&self, size: u64) -> bool {
        self.buffer.is_none() || self.size != size
    }

    /// Get the buffer, allocating it when the size changed
    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> &wgpu::Buffer {
        if self.needs_update(size) {
            self.buffer = None;
            self.size = size;
        }
        self.buffer.get_or_insert_with(|| {
            tracing::debug!(label, size, "Allocating GPU buffer");
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                // Zero-sized bindings are invalid
                size: size.max(4),
                usage,
                mapped_at_creation: false,
            })
        })
    }

    /// Get the buffer if it has been allocated
    pub fn get(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }
}

/// Map a `MAP_READ` staging buffer, wait for the device and copy it out
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, String> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| format!("Failed to poll device: {:?}", e))?;

    receiver
        .await
        .map_err(|_| "Failed to receive buffer mapping".to_string())?
        .map_err(|e| format!("Failed to map buffer: {:?}", e))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Workgroups needed to cover `dimension`
#[inline]
pub fn compute_dispatch_size(dimension: u32, workgroup_size: u32) -> u32 {
    dimension.div_ceil(workgroup_size)
}

/// Workgroups for a 1-D dispatch of `items`, or an error when the device
/// cannot launch that many
pub fn checked_dispatch_size(
    device: &wgpu::Device,
    items: usize,
    workgroup_size: u32,
) -> Result<u32, String> {
    let items = u32::try_from(items).map_err(|_| format!("{} items exceed u32", items))?;
    let groups = compute_dispatch_size(items, workgroup_size);
    let limit = device.limits().max_compute_workgroups_per_dimension;
    if groups > limit {
        return Err(format!(
            "{} workgroups exceed the device limit of {}",
            groups, limit
        ));
    }
    Ok(groups)
}

/// Declare a lazily created process-wide instance behind a tokio mutex.
///
/// A failed construction is not cached; the next call retries.
///
/// # Example
/// ```ignore
/// gpu_processor_singleton!(GpuContext, SHARED_GPU_CONTEXT, get_gpu_context);
/// ```
#[macro_export]
macro_rules! gpu_processor_singleton {
    ($processor:ty, $static_name:ident, $get_fn:ident) => {
        /// Cached GPU instance
        static $static_name: std::sync::OnceLock<tokio::sync::Mutex<Option<$processor>>> =
            std::sync::OnceLock::new();

        /// Get or create the shared GPU instance
        pub async fn $get_fn()
        -> Result<tokio::sync::MutexGuard<'static, Option<$processor>>, String> {
            let lock = $static_name.get_or_init(|| tokio::sync::Mutex::new(None));
            let mut guard = lock.lock().await;

            if guard.is_none() {
                match <$processor>::new().await {
                    Ok(processor) => {
                        *guard = Some(processor);
                    }
                    Err(e) => {
                        tracing::warn!(
                            concat!("Failed to initialize GPU ", stringify!($processor), ": {}"),
                            e
                        );
                        return Err(e);
                    }
                }
            }

            Ok(guard)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_dispatch_size() {
        assert_eq!(compute_dispatch_size(640, 16), 40);
        assert_eq!(compute_dispatch_size(641, 16), 41);
        assert_eq!(compute_dispatch_size(256, 256), 1);
        assert_eq!(compute_dispatch_size(257, 256), 2);
        assert_eq!(compute_dispatch_size(1, 16), 1);
    }

    #[test]
    fn test_cached_buffer_starts_empty() {
        let cached = CachedBuffer::default();
        assert!(cached.get().is_none());
        assert!(cached.needs_update(16));
    }
}
