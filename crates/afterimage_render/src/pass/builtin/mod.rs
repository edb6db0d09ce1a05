//! Built-in Post-Process Passes
//!
//! Ready-made passes for common image-space effects:
//! - Pass-through: copies its input
//! - Grayscale: luminance desaturation
//! - Tone mapping: HDR to display range
//! - Vignette: darkens towards the borders
//! - Chromatic aberration: splits color channels
//! - Blur: one direction of a separable gaussian
//!
//! Each effect with parameters has a serde-derived parameter block that
//! doubles as its uniform schema.
//!
//! # Example
//!
//! ```ignore
//! use afterimage_render::pass::builtin::*;
//!
//! chain.add(grayscale());
//! chain.add(vignette(VignetteParams { weight: 2.0, ..Default::default() }));
//! chain.add(horizontal_blur(16.0));
//! chain.add(vertical_blur(16.0));
//! ```

mod blur;
mod chromatic;
mod color;
mod vignette;

pub use blur::{blur, horizontal_blur, vertical_blur, BlurParams};
pub use chromatic::{chromatic_aberration, ChromaticAberrationParams};
pub use color::{
    grayscale, grayscale_with, pass_through, tone_mapping, GrayscaleParams, ToneMappingOperator,
    ToneMappingParams,
};
pub use vignette::{vignette, VignetteParams};

/// Program keys understood by every backend
pub mod program {
    pub const PASS_THROUGH: &str = "pass_through";
    pub const GRAYSCALE: &str = "grayscale";
    pub const TONE_MAPPING: &str = "tone_mapping";
    pub const VIGNETTE: &str = "vignette";
    pub const CHROMATIC_ABERRATION: &str = "chromatic_aberration";
    pub const BLUR: &str = "blur";
    /// Per-mesh emissive extraction used by effect layers
    pub const EMISSIVE_EXTRACT: &str = "emissive_extract";
    pub const GLOW_MERGE: &str = "glow_merge";
    pub const HIGHLIGHT_MERGE: &str = "highlight_merge";

    /// Every built-in program
    pub const ALL: &[&str] = &[
        PASS_THROUGH,
        GRAYSCALE,
        TONE_MAPPING,
        VIGNETTE,
        CHROMATIC_ABERRATION,
        BLUR,
        EMISSIVE_EXTRACT,
        GLOW_MERGE,
        HIGHLIGHT_MERGE,
    ];
}
