//! Graphics context capability
//!
//! The only way the compositor reaches the GPU. A backend (a real device
//! wrapper, or [`HeadlessContext`](crate::HeadlessContext) in tests)
//! implements [`GraphicsContext`] and is handed to every call that needs it.
//! There is no ambient "current engine".

use crate::error::GpuResult;
use crate::resource::{
    AlphaMode, BufferHandle, Color, DrawMode, EffectHandle, StencilState, TextureDesc,
    TextureHandle, UniformValue,
};

/// Description of an effect (shader program) to compile
#[derive(Clone, Debug, PartialEq)]
pub struct EffectDesc {
    /// Debug name, usually the owning pass name
    pub name: String,
    /// Built-in program key ("blur", "vignette", ...)
    pub program: String,
    /// WGSL source for backends that compile shaders
    pub source: Option<String>,
    /// Uniform names the effect reads
    pub uniforms: Vec<String>,
    /// Sampler names the effect reads
    pub samplers: Vec<String>,
    /// Preprocessor defines
    pub defines: Vec<String>,
}

impl EffectDesc {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            source: None,
            uniforms: Vec::new(),
            samplers: Vec::new(),
            defines: Vec::new(),
        }
    }
}

/// Compilation state reported by [`GraphicsContext::poll_effect`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EffectStatus {
    Compiling,
    Ready,
    Failed(String),
}

/// Capability interface over a graphics device
///
/// Uniform and texture setters apply to the effect last passed to
/// [`bind_effect`](Self::bind_effect). Draw calls render into the
/// framebuffer last bound, or the default framebuffer.
pub trait GraphicsContext: Send {
    /// Incremented every time the device is lost and recreated. Handles
    /// issued under an older generation are invalid.
    fn generation(&self) -> u64;

    // Effects

    /// Start compiling an effect; compilation may finish later
    fn create_effect(&mut self, desc: &EffectDesc) -> GpuResult<EffectHandle>;

    /// Non-blocking readiness poll
    fn poll_effect(&mut self, effect: EffectHandle) -> EffectStatus;

    fn release_effect(&mut self, effect: EffectHandle);

    // Buffers

    fn create_vertex_buffer(&mut self, data: &[u8]) -> GpuResult<BufferHandle>;

    fn create_index_buffer(&mut self, indices: &[u32]) -> GpuResult<BufferHandle>;

    fn release_buffer(&mut self, buffer: BufferHandle);

    // Textures

    fn create_texture(&mut self, desc: &TextureDesc) -> GpuResult<TextureHandle>;

    fn release_texture(&mut self, texture: TextureHandle);

    /// Size of a live texture, None if the handle is unknown
    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)>;

    // Binding

    /// Bind vertex and index buffers for the given effect
    fn bind_buffers(&mut self, vertex: BufferHandle, index: BufferHandle, effect: EffectHandle);

    /// Render into a texture
    fn bind_framebuffer(&mut self, texture: TextureHandle);

    /// Render into the screen again
    fn restore_default_framebuffer(&mut self);

    fn clear(&mut self, color: Color);

    fn bind_effect(&mut self, effect: EffectHandle);

    fn set_uniform(&mut self, name: &str, value: UniformValue);

    /// Bind a texture to a sampler of the current effect; None unbinds
    fn set_texture(&mut self, sampler: &str, texture: Option<TextureHandle>);

    // Drawing

    fn draw_elements_type(&mut self, mode: DrawMode, start: u32, count: u32);

    // Global state

    fn set_depth_buffer(&mut self, enabled: bool);

    fn set_depth_write(&mut self, enabled: bool);

    fn set_alpha_mode(&mut self, mode: AlphaMode);

    fn set_stencil(&mut self, state: StencilState);
}
