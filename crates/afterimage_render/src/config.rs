//! Compositor and effect layer settings
//!
//! Every field has a default; JSON documents only need to name what they
//! change. The numeric defaults are tuning values for typical displays, not
//! invariants.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::{AlphaMode, Color, TextureFormat};

/// Compositor-wide settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Return consumed intermediate targets to the pool as soon as the next
    /// pass has read them. When false they persist until the frame ends.
    pub discard_intermediates: bool,
    /// Format of pooled intermediate targets
    pub target_format: TextureFormat,
    /// Destroy pooled targets idle for this many frames (0 disables)
    pub trim_idle_frames: u32,
    /// Rebuild automatically when the context generation changes
    pub auto_rebuild: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            discard_intermediates: true,
            target_format: TextureFormat::Rgba8Unorm,
            trim_idle_frames: 120,
            auto_rebuild: true,
        }
    }
}

impl CompositorConfig {
    /// Parse from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Glow layer settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlowLayerConfig {
    /// Blur kernel size, in scene texels
    pub blur_kernel_size: f32,
    /// Main (extraction) texture size relative to the camera viewport
    pub main_texture_ratio: f32,
    /// Fixed main texture size, overrides the ratio
    pub main_texture_fixed_size: Option<u32>,
    /// Merge factor
    pub intensity: f32,
    /// Clamp the merged glow to [0, 1]
    pub ldr_merge: bool,
    /// Only meshes in this rendering group contribute
    pub rendering_group: Option<u8>,
    /// Clear color of the main texture
    pub neutral_color: Color,
    pub alpha_mode: AlphaMode,
    pub texture_format: TextureFormat,
}

impl Default for GlowLayerConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: 32.0,
            main_texture_ratio: 0.5,
            main_texture_fixed_size: None,
            intensity: 1.0,
            ldr_merge: false,
            rendering_group: None,
            neutral_color: Color::TRANSPARENT,
            alpha_mode: AlphaMode::Add,
            texture_format: TextureFormat::Rgba16Float,
        }
    }
}

impl GlowLayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Highlight layer settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightLayerConfig {
    /// Horizontal blur scale
    pub blur_horizontal_size: f32,
    /// Vertical blur scale
    pub blur_vertical_size: f32,
    /// Blur texture size relative to the camera viewport
    pub blur_texture_size_ratio: f32,
    /// Main (silhouette) texture size relative to the camera viewport
    pub main_texture_ratio: f32,
    /// Glow inside highlighted meshes
    pub inner_glow: bool,
    /// Glow around highlighted meshes
    pub outer_glow: bool,
    pub intensity: f32,
    pub rendering_group: Option<u8>,
    pub neutral_color: Color,
    pub alpha_mode: AlphaMode,
    pub texture_format: TextureFormat,
}

impl Default for HighlightLayerConfig {
    fn default() -> Self {
        Self {
            blur_horizontal_size: 1.0,
            blur_vertical_size: 1.0,
            blur_texture_size_ratio: 0.5,
            main_texture_ratio: 0.5,
            inner_glow: true,
            outer_glow: true,
            intensity: 1.0,
            rendering_group: None,
            neutral_color: Color::TRANSPARENT,
            alpha_mode: AlphaMode::Combine,
            texture_format: TextureFormat::Rgba8Unorm,
        }
    }
}

impl HighlightLayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CompositorConfig::from_json_str(r#"{ "discard_intermediates": false }"#).unwrap();
        assert!(!config.discard_intermediates);
        assert_eq!(config.trim_idle_frames, CompositorConfig::default().trim_idle_frames);
    }

    #[test]
    fn test_glow_defaults() {
        let glow = GlowLayerConfig::from_json_str("{}").unwrap();
        assert_eq!(glow.blur_kernel_size, 32.0);
        assert_eq!(glow.main_texture_ratio, 0.5);
        assert_eq!(glow.intensity, 1.0);
        assert_eq!(glow.alpha_mode, AlphaMode::Add);
    }

    #[test]
    fn test_highlight_json() {
        let json = r#"{ "inner_glow": false, "blur_horizontal_size": 2.0, "alpha_mode": "combine" }"#;
        let highlight = HighlightLayerConfig::from_json_str(json).unwrap();
        assert!(!highlight.inner_glow);
        assert!(highlight.outer_glow);
        assert_eq!(highlight.blur_horizontal_size, 2.0);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = CompositorConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::PostProcessError::Config(_)));
    }
}
