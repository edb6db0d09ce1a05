//! # afterimage_render - Post-Processing Compositor
//!
//! Backend-agnostic frame post-processing with:
//! - Ping-pong render target pool sized relative to the camera viewport
//! - Image-space passes with typed parameter blocks and readiness polling
//! - Ordered pass chains driven by a per-camera compositor
//! - Effect layers (glow, highlight) with their own extract/blur/merge chains
//! - A headless software backend for tests and offline rendering
//!
//! ## Architecture
//!
//! Nothing in this crate talks to a GPU API directly. Every component
//! receives a [`GraphicsContext`] by parameter:
//!
//! 1. **Pool**: [`RenderTargetPool`] hands out off-screen color targets
//! 2. **Passes**: [`PostProcess`] binds its effect, uniforms and samplers
//! 3. **Chains**: [`PassChain`] feeds each pass's output into the next
//! 4. **Compositor**: [`Compositor`] runs layers then chains, per camera
//!
//! ## Example
//!
//! ```ignore
//! use afterimage_render::prelude::*;
//!
//! let mut gpu = HeadlessContext::new(1280, 720);
//! let mut compositor = Compositor::new(CompositorConfig::default());
//!
//! let mut scene = Scene::new();
//! let camera = scene.add_camera(Camera::new("main", 1280, 720));
//!
//! compositor.add_pass(camera, builtin::grayscale());
//! compositor.add_pass(camera, builtin::vignette(VignetteParams::default()));
//!
//! let glow = GlowLayer::new("glow", GlowLayerConfig::default(), compositor.shared_quad());
//! compositor.add_layer(Box::new(glow));
//!
//! let stats = compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, scene_color)]);
//! ```

pub mod camera;
pub mod compositor;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod effect_layer;
pub mod error;
pub mod headless;
pub mod pass;
pub mod quad;
pub mod resource;
pub mod shaders;
pub mod target_pool;

pub use camera::{Camera, CameraId, MeshId, Scene, Viewport};
pub use compositor::{
    CameraPipeline, Compositor, CompositorState, FrameContext, FrameInput, FrameStats,
};
pub use config::{CompositorConfig, GlowLayerConfig, HighlightLayerConfig};
pub use context::{EffectDesc, EffectStatus, GraphicsContext};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use effect_layer::{
    EffectLayer, EffectLayerCore, EffectMesh, GlowLayer, HighlightLayer, LayerEvent,
    LayerEventArgs, LayerId, LayerState, LayerStats,
};
pub use error::{GpuError, GpuResult, PostProcessError, Result};
pub use headless::HeadlessContext;
pub use pass::{
    builtin, BoundEffect, ChainState, ChainStats, PassChain, PassEvent, PassEventArgs, PassId,
    PassOptions, PostProcess, SamplerSource, ScaleMode, UniformBlock, UniformBuilder,
    UniformValues,
};
pub use quad::{QuadVertex, ScreenQuad, SharedQuad};
pub use resource::{
    AlphaMode, BufferHandle, Color, CompareFunction, DrawMode, EffectHandle, StencilState,
    TextureDesc, TextureFormat, TextureHandle, UniformValue,
};
pub use target_pool::{RenderTargetId, RenderTargetInfo, RenderTargetPool};

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::camera::{Camera, CameraId, MeshId, Scene, Viewport};
    pub use crate::compositor::{Compositor, FrameContext, FrameInput, FrameStats};
    pub use crate::config::{CompositorConfig, GlowLayerConfig, HighlightLayerConfig};
    pub use crate::context::GraphicsContext;
    pub use crate::diagnostics::{DiagnosticKind, Diagnostics};
    pub use crate::effect_layer::{EffectLayer, EffectMesh, GlowLayer, HighlightLayer};
    pub use crate::headless::HeadlessContext;
    pub use crate::pass::builtin::{
        self, BlurParams, ChromaticAberrationParams, GrayscaleParams, ToneMappingOperator,
        ToneMappingParams, VignetteParams,
    };
    pub use crate::pass::{PassChain, PassOptions, PostProcess, SamplerSource, ScaleMode};
    pub use crate::resource::{AlphaMode, Color, TextureFormat, TextureHandle};
    pub use crate::target_pool::RenderTargetPool;
}
