// SPDX-License-Identifier: GPL-3.0-only

//! GPU far-field composite

mod processor;

pub use processor::FarFieldProcessor;

/// Anchor blending kernel
pub const COMPOSITE_WGSL: &str = include_str!("composite.wgsl");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::validate_shader;

    #[test]
    fn test_composite_shader_validates() {
        validate_shader("composite", COMPOSITE_WGSL);
    }
}
