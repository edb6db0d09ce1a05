//! Vignette pass

use serde::{Deserialize, Serialize};

use super::program;
use crate::pass::{PostProcess, UniformBlock, UniformValues};
use crate::resource::Color;

/// Vignette parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VignetteParams {
    /// Darkening strength at the corners
    pub weight: f32,
    /// Stretch towards the corners (0 = circular falloff)
    pub stretch: f32,
    /// Color blended in at the borders
    pub color: Color,
    /// Center in uv space
    pub center: [f32; 2],
}

impl Default for VignetteParams {
    fn default() -> Self {
        Self {
            weight: 1.5,
            stretch: 0.0,
            color: Color::BLACK,
            center: [0.5, 0.5],
        }
    }
}

impl UniformBlock for VignetteParams {
    fn uniform_names(&self) -> &'static [&'static str] {
        &[
            "vignetteWeight",
            "vignetteStretch",
            "vignetteColor",
            "vignetteCenter",
        ]
    }

    fn write(&self, out: &mut UniformValues) {
        out.set("vignetteWeight", self.weight.max(0.0));
        out.set("vignetteStretch", self.stretch.max(0.0));
        out.set("vignetteColor", self.color);
        out.set("vignetteCenter", self.center);
    }
}

pub fn vignette(params: VignetteParams) -> PostProcess {
    PostProcess::new("vignette", program::VIGNETTE).with_params(params)
}
