//! Color passes: copy, grayscale, tone mapping

use serde::{Deserialize, Serialize};

use super::program;
use crate::pass::{PostProcess, UniformBlock, UniformValues};

/// Copy the input unchanged
pub fn pass_through() -> PostProcess {
    PostProcess::new("pass_through", program::PASS_THROUGH)
}

/// Full desaturation
pub fn grayscale() -> PostProcess {
    grayscale_with(GrayscaleParams::default())
}

pub fn grayscale_with(params: GrayscaleParams) -> PostProcess {
    PostProcess::new("grayscale", program::GRAYSCALE).with_params(params)
}

/// Grayscale parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayscaleParams {
    /// 0 keeps the input, 1 is fully gray
    pub degree: f32,
}

impl Default for GrayscaleParams {
    fn default() -> Self {
        Self { degree: 1.0 }
    }
}

impl UniformBlock for GrayscaleParams {
    fn uniform_names(&self) -> &'static [&'static str] {
        &["degree"]
    }

    fn write(&self, out: &mut UniformValues) {
        out.set("degree", self.degree.clamp(0.0, 1.0));
    }
}

/// Tone mapping curve
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMappingOperator {
    Reinhard,
    Hable,
    Aces,
}

impl ToneMappingOperator {
    fn code(&self) -> i32 {
        match self {
            Self::Reinhard => 0,
            Self::Hable => 1,
            Self::Aces => 2,
        }
    }
}

/// Tone mapping parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneMappingParams {
    pub operator: ToneMappingOperator,
    pub exposure: f32,
}

impl Default for ToneMappingParams {
    fn default() -> Self {
        Self {
            operator: ToneMappingOperator::Aces,
            exposure: 1.0,
        }
    }
}

impl UniformBlock for ToneMappingParams {
    fn uniform_names(&self) -> &'static [&'static str] {
        &["operator", "exposure"]
    }

    fn write(&self, out: &mut UniformValues) {
        out.set("operator", self.operator.code());
        out.set("exposure", self.exposure.max(0.0));
    }
}

pub fn tone_mapping(params: ToneMappingParams) -> PostProcess {
    PostProcess::new("tone_mapping", program::TONE_MAPPING).with_params(params)
}
