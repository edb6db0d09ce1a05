//! Separable gaussian blur
//!
//! One pass blurs along one direction; a horizontal pass followed by a
//! vertical one gives the full 2D blur at linear cost. The kernel is
//! measured in texels of the texture being sampled.

use serde::{Deserialize, Serialize};

use super::program;
use crate::pass::{PassOptions, PostProcess, UniformBlock, UniformValues};

/// Blur parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurParams {
    /// Unit blur direction, (1, 0) or (0, 1)
    pub direction: [f32; 2],
    /// Kernel width in input texels
    pub kernel: f32,
}

impl BlurParams {
    pub fn horizontal(kernel: f32) -> Self {
        Self {
            direction: [1.0, 0.0],
            kernel,
        }
    }

    pub fn vertical(kernel: f32) -> Self {
        Self {
            direction: [0.0, 1.0],
            kernel,
        }
    }
}

impl Default for BlurParams {
    fn default() -> Self {
        Self::horizontal(16.0)
    }
}

impl UniformBlock for BlurParams {
    fn uniform_names(&self) -> &'static [&'static str] {
        &["direction", "kernel"]
    }

    fn write(&self, out: &mut UniformValues) {
        out.set("direction", self.direction);
        out.set("kernel", self.kernel.max(1.0));
    }
}

pub fn blur(name: impl Into<String>, params: BlurParams, options: PassOptions) -> PostProcess {
    PostProcess::new(name, program::BLUR)
        .with_options(options)
        .with_params(params)
}

pub fn horizontal_blur(kernel: f32) -> PostProcess {
    blur("horizontal_blur", BlurParams::horizontal(kernel), PassOptions::default())
}

pub fn vertical_blur(kernel: f32) -> PostProcess {
    blur("vertical_blur", BlurParams::vertical(kernel), PassOptions::default())
}
