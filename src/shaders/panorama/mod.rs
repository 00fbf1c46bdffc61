// SPDX-License-Identifier: GPL-3.0-only

//! GPU panorama projection and cross-level merge

mod processor;

pub use processor::PanoramaProcessor;

/// Per-level projection kernels (clear, accumulate, resolve)
pub const PROJECT_WGSL: &str = include_str!("project.wgsl");

/// Cross-level merge kernel
pub const MERGE_WGSL: &str = include_str!("merge.wgsl");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::validate_shader;

    #[test]
    fn test_project_shader_validates() {
        validate_shader("project", PROJECT_WGSL);
    }

    #[test]
    fn test_merge_shader_validates() {
        validate_shader("merge", MERGE_WGSL);
    }
}
