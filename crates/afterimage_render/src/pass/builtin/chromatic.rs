//! Chromatic aberration pass

use serde::{Deserialize, Serialize};

use super::program;
use crate::pass::{PostProcess, UniformBlock, UniformValues};

/// Chromatic aberration parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromaticAberrationParams {
    /// Channel offset in pixels
    pub amount: f32,
    /// How much the offset grows towards the borders
    pub radial_intensity: f32,
    /// Fixed offset direction; zero means radial from `center`
    pub direction: [f32; 2],
    pub center: [f32; 2],
}

impl Default for ChromaticAberrationParams {
    fn default() -> Self {
        Self {
            amount: 30.0,
            radial_intensity: 0.0,
            direction: [0.0, 0.0],
            center: [0.5, 0.5],
        }
    }
}

impl UniformBlock for ChromaticAberrationParams {
    fn uniform_names(&self) -> &'static [&'static str] {
        &["aberrationAmount", "radialIntensity", "direction", "centerPosition"]
    }

    fn write(&self, out: &mut UniformValues) {
        out.set("aberrationAmount", self.amount);
        out.set("radialIntensity", self.radial_intensity);
        out.set("direction", self.direction);
        out.set("centerPosition", self.center);
    }
}

pub fn chromatic_aberration(params: ChromaticAberrationParams) -> PostProcess {
    PostProcess::new("chromatic_aberration", program::CHROMATIC_ABERRATION).with_params(params)
}
