//! Post-Process Passes
//!
//! A [`PostProcess`] is one image-space effect drawn over the shared
//! full-screen quad:
//! - owns its effect (compiled lazily, polled for readiness every frame)
//! - declares uniforms through a typed [`UniformBlock`] plus loose values
//! - binds sampler inputs (its chain input, or fixed textures)
//! - acquires its output target from the pool when it feeds another pass
//! - announces lifecycle events to registered observers
//!
//! ```ignore
//! use afterimage_render::pass::{builtin, PassChain};
//!
//! let mut chain = PassChain::new("camera");
//! chain.add(builtin::grayscale());
//! let vignette = chain.add(builtin::vignette(VignetteParams::default()));
//!
//! chain.pass_mut(vignette).unwrap().on(PassEvent::Apply, |args| {
//!     args.uniforms.set("vignetteWeight", 2.0f32);
//! });
//! ```

pub mod builtin;
pub mod chain;
pub mod uniforms;

pub use chain::{ChainState, ChainStats, PassChain};
pub use uniforms::{UniformBlock, UniformBuilder, UniformValues};

use afterimage_core::{define_id, ObserverHandle, ObserverRegistry};
use serde::{Deserialize, Serialize};

use crate::camera::{Camera, CameraId};
use crate::compositor::FrameContext;
use crate::context::{EffectDesc, EffectStatus, GraphicsContext};
use crate::diagnostics::DiagnosticKind;
use crate::error::Result;
use crate::quad::{ScreenQuad, QUAD_INDEX_COUNT};
use crate::resource::{
    AlphaMode, Color, DrawMode, EffectHandle, StencilState, TextureDesc, TextureFormat,
    TextureHandle, UniformValue,
};
use crate::shaders;
use crate::target_pool::{RenderTargetId, RenderTargetPool};

define_id!(
    /// Identifies a pass
    PassId
);

/// Sampler every built-in effect reads its input from
pub const SOURCE_SAMPLER: &str = "textureSampler";

/// Rounding applied to ratio-derived target sizes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    Floor,
    Ceiling,
    NearestPowerOfTwo,
}

impl ScaleMode {
    pub fn apply(&self, value: f32) -> u32 {
        let v = match self {
            Self::Floor => value.floor() as u32,
            Self::Ceiling => value.ceil() as u32,
            Self::NearestPowerOfTwo => {
                let v = value.max(1.0) as u32;
                let up = v.next_power_of_two();
                let down = up >> 1;
                if down > 0 && v - down < up - v {
                    down
                } else {
                    up
                }
            }
        };
        v.max(1)
    }
}

impl Default for ScaleMode {
    fn default() -> Self {
        Self::Floor
    }
}

/// Sizing and blending options of a pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassOptions {
    /// Output size relative to the camera viewport
    pub ratio: f32,
    /// Fixed output size, overrides `ratio`
    pub fixed_size: Option<(u32, u32)>,
    pub scale_mode: ScaleMode,
    /// Output format; None takes the format of the chain the pass joins
    pub format: Option<TextureFormat>,
    pub sample_count: u32,
    pub alpha_mode: AlphaMode,
    /// Clear the output before drawing
    pub auto_clear: bool,
    pub clear_color: Color,
    /// Keep the output until the frame ends so several later passes can
    /// read it, instead of releasing it once the next pass consumed it
    pub reusable: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            fixed_size: None,
            scale_mode: ScaleMode::Floor,
            format: None,
            sample_count: 1,
            alpha_mode: AlphaMode::Disabled,
            auto_clear: true,
            clear_color: Color::TRANSPARENT,
            reusable: false,
        }
    }
}

impl PassOptions {
    pub fn with_ratio(ratio: f32) -> Self {
        Self {
            ratio,
            ..Default::default()
        }
    }

    pub fn with_fixed_size(width: u32, height: u32) -> Self {
        Self {
            fixed_size: Some((width, height)),
            ..Default::default()
        }
    }
}

/// Where a sampler reads from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerSource {
    /// The texture this pass was activated with
    Input,
    /// A fixed texture
    Texture(TextureHandle),
    /// Nothing bound
    Unbound,
}

/// Pass lifecycle events
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassEvent {
    /// Output target acquired for this frame
    Activate,
    /// Output size differs from the previous activation
    SizeChanged,
    /// Pass is ready and about to bind
    BeforeRender,
    /// Effect bound; observers may add per-frame uniforms
    Apply,
    /// Quad bound, draw call next
    BeforeDraw,
    /// Draw call issued
    AfterRender,
}

/// Payload handed to pass observers
#[derive(Clone, Debug, Default)]
pub struct PassEventArgs {
    pub pass: Option<PassId>,
    pub name: String,
    pub camera: Option<CameraId>,
    pub width: u32,
    pub height: u32,
    pub input: Option<TextureHandle>,
    pub output: Option<TextureHandle>,
    /// Uniforms set here during `Apply` are bound for this frame only
    pub uniforms: UniformValues,
}

/// Proof that a pass bound its effect this frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundEffect {
    pub pass: PassId,
    pub effect: EffectHandle,
}

/// A single image-space effect
pub struct PostProcess {
    id: PassId,
    name: String,
    program: String,
    params: Option<Box<dyn UniformBlock>>,
    uniforms: UniformValues,
    samplers: Vec<(String, SamplerSource)>,
    defines: Vec<String>,
    options: PassOptions,
    stencil: StencilState,
    enabled: bool,

    effect: Option<EffectHandle>,
    effect_generation: u64,
    effect_failed: bool,

    output_target: Option<RenderTargetId>,
    output_texture: Option<TextureHandle>,
    input_texture: Option<TextureHandle>,
    width: u32,
    height: u32,
    camera: Option<CameraId>,

    observers: ObserverRegistry<PassEvent, PassEventArgs>,
    draw_count: u64,
}

impl PostProcess {
    /// Create a pass running a built-in program, reading its chain input
    /// through [`SOURCE_SAMPLER`]
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: PassId::new(),
            name: name.into(),
            program: program.into(),
            params: None,
            uniforms: UniformValues::new(),
            samplers: vec![(SOURCE_SAMPLER.to_string(), SamplerSource::Input)],
            defines: Vec::new(),
            options: PassOptions::default(),
            stencil: StencilState::disabled(),
            enabled: true,
            effect: None,
            effect_generation: 0,
            effect_failed: false,
            output_target: None,
            output_texture: None,
            input_texture: None,
            width: 0,
            height: 0,
            camera: None,
            observers: ObserverRegistry::new(),
            draw_count: 0,
        }
    }

    /// Rename the pass
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_options(mut self, options: PassOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_params(mut self, params: impl UniformBlock + 'static) -> Self {
        self.params = Some(Box::new(params));
        self
    }

    pub fn with_uniform(mut self, name: &str, value: impl Into<UniformValue>) -> Self {
        self.uniforms.set(name, value);
        self
    }

    pub fn with_sampler(mut self, name: &str, source: SamplerSource) -> Self {
        self.set_sampler(name, source);
        self
    }

    pub fn with_alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.options.alpha_mode = mode;
        self
    }

    pub fn with_define(mut self, define: impl Into<String>) -> Self {
        self.defines.push(define.into());
        self
    }

    /// Get the pass ID
    pub fn id(&self) -> PassId {
        self.id
    }

    /// Get the pass name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the program key
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn options(&self) -> &PassOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut PassOptions {
        &mut self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_reusable(&self) -> bool {
        self.options.reusable
    }

    pub fn set_reusable(&mut self, reusable: bool) {
        self.options.reusable = reusable;
    }

    pub fn set_alpha_mode(&mut self, mode: AlphaMode) {
        self.options.alpha_mode = mode;
    }

    pub fn stencil(&self) -> StencilState {
        self.stencil
    }

    pub fn set_stencil(&mut self, stencil: StencilState) {
        self.stencil = stencil;
    }

    /// Replace the typed parameter block
    pub fn set_params(&mut self, params: impl UniformBlock + 'static) {
        self.params = Some(Box::new(params));
    }

    /// Set a loose uniform; overrides a parameter block value of the same name
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) {
        self.uniforms.set(name, value);
    }

    pub fn uniforms(&self) -> &UniformValues {
        &self.uniforms
    }

    pub fn set_sampler(&mut self, name: &str, source: SamplerSource) {
        match self.samplers.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = source,
            None => self.samplers.push((name.to_string(), source)),
        }
    }

    pub fn sampler(&self, name: &str) -> Option<SamplerSource> {
        self.samplers.iter().find(|(n, _)| n == name).map(|(_, s)| *s)
    }

    /// Texture this pass was last activated with
    pub fn input_texture(&self) -> Option<TextureHandle> {
        self.input_texture
    }

    /// Texture this pass last rendered into, if it rendered off-screen.
    /// Kept after the target returns to the pool, for inspection.
    pub fn output_texture(&self) -> Option<TextureHandle> {
        self.output_texture
    }

    /// Pooled target currently held
    pub fn output_target(&self) -> Option<RenderTargetId> {
        self.output_target
    }

    /// Output size of the last activation
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn effect(&self) -> Option<EffectHandle> {
        self.effect
    }

    /// Draw calls issued over the pass lifetime
    pub fn draw_count(&self) -> u64 {
        self.draw_count
    }

    /// Register an observer
    pub fn on<F>(&mut self, event: PassEvent, callback: F) -> ObserverHandle
    where
        F: FnMut(&mut PassEventArgs) + Send + 'static,
    {
        self.observers.add(event, callback)
    }

    pub fn remove_observer(&mut self, handle: ObserverHandle) -> bool {
        self.observers.remove(handle)
    }

    /// Effect description derived from the program, parameters and samplers
    pub fn effect_desc(&self) -> EffectDesc {
        let mut desc = EffectDesc::new(self.name.clone(), self.program.clone());
        desc.source = shaders::program_source(&self.program);
        desc.uniforms.push("texelSize".to_string());
        desc.uniforms.push("screenSize".to_string());
        if let Some(params) = &self.params {
            desc.uniforms
                .extend(params.uniform_names().iter().map(|n| n.to_string()));
        }
        desc.uniforms
            .extend(self.uniforms.names().map(|n| n.to_string()));
        desc.samplers = self.samplers.iter().map(|(n, _)| n.clone()).collect();
        desc.defines = self.defines.clone();
        desc
    }

    /// Non-blocking readiness poll. Creates the effect on first use and
    /// again after a context loss.
    pub fn is_ready(&mut self, gpu: &mut dyn GraphicsContext) -> bool {
        let generation = gpu.generation();
        if self.effect_generation != generation {
            // Handles from a dead context are gone already
            self.effect = None;
            self.effect_failed = false;
        }
        if self.effect_failed {
            return false;
        }

        let effect = match self.effect {
            Some(effect) => effect,
            None => match gpu.create_effect(&self.effect_desc()) {
                Ok(effect) => {
                    log::debug!("Compiling effect for pass '{}'", self.name);
                    self.effect = Some(effect);
                    self.effect_generation = generation;
                    effect
                }
                Err(e) => {
                    log::warn!("Pass '{}': effect creation failed: {}", self.name, e);
                    self.effect_failed = true;
                    self.effect_generation = generation;
                    return false;
                }
            },
        };

        match gpu.poll_effect(effect) {
            EffectStatus::Ready => true,
            EffectStatus::Compiling => false,
            EffectStatus::Failed(message) => {
                log::warn!("Pass '{}': effect failed to compile: {}", self.name, message);
                self.effect_failed = true;
                false
            }
        }
    }

    /// Output size for a camera
    pub fn compute_size(&self, camera: &Camera) -> (u32, u32) {
        if let Some((w, h)) = self.options.fixed_size {
            return (w.max(1), h.max(1));
        }
        let (vw, vh) = camera.viewport_pixels();
        let ratio = self.options.ratio.max(0.0);
        (
            self.options.scale_mode.apply(vw as f32 * ratio),
            self.options.scale_mode.apply(vh as f32 * ratio),
        )
    }

    /// Prepare this pass for the frame.
    ///
    /// Records `source` as the input. With `for_chain` the pass acquires a
    /// pooled output target that the next pass will read; otherwise it draws
    /// into whatever framebuffer the caller binds. Returns the output
    /// texture, or the allocation error after reporting it.
    pub fn activate(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        source: Option<TextureHandle>,
        for_chain: bool,
    ) -> Result<Option<TextureHandle>> {
        self.camera = Some(camera.id);
        self.input_texture = source;

        if self.options.fixed_size.is_some() && (self.options.ratio - 1.0).abs() > f32::EPSILON {
            fc.diagnostics.report(
                DiagnosticKind::MisconfiguredChain,
                self.name.clone(),
                "both a fixed size and a ratio are set; the fixed size wins",
            );
        }

        let (width, height) = self.compute_size(camera);
        self.release_output(fc.pool);

        if for_chain {
            let desc = TextureDesc {
                width,
                height,
                format: self.options.format.unwrap_or_default(),
                sample_count: self.options.sample_count.max(1),
            };
            match fc.pool.acquire_desc(fc.gpu, &desc) {
                Ok(id) => {
                    self.output_target = Some(id);
                    self.output_texture = fc.pool.texture(id);
                }
                Err(e) => {
                    fc.diagnostics.report(
                        DiagnosticKind::ResourceExhaustion,
                        self.name.clone(),
                        e.to_string(),
                    );
                    self.output_texture = None;
                    return Err(e);
                }
            }
        } else {
            self.output_texture = None;
        }

        let size_changed = (width, height) != (self.width, self.height);
        self.width = width;
        self.height = height;

        let mut args = self.event_args();
        if size_changed {
            self.observers.notify(PassEvent::SizeChanged, &mut args);
        }
        self.observers.notify(PassEvent::Activate, &mut args);

        Ok(self.output_texture)
    }

    /// Return the pooled output target, keeping the texture handle for
    /// inspection
    pub fn release_output(&mut self, pool: &mut RenderTargetPool) {
        if let Some(id) = self.output_target.take() {
            pool.release(id);
        }
    }

    /// Bind effect, uniforms and samplers. None when disabled or not ready;
    /// the caller then skips drawing this pass.
    pub fn apply(&mut self, fc: &mut FrameContext<'_>) -> Option<BoundEffect> {
        if !self.enabled {
            return None;
        }
        if !self.is_ready(fc.gpu) {
            log::debug!("Pass '{}' not ready, skipping draw", self.name);
            return None;
        }
        let effect = self.effect?;

        let mut args = self.event_args();
        self.observers.notify(PassEvent::BeforeRender, &mut args);

        fc.gpu.bind_effect(effect);
        fc.gpu.set_alpha_mode(self.options.alpha_mode);
        fc.gpu.set_stencil(self.stencil);

        let mut values = UniformValues::new();
        if let Some((w, h)) = self.input_texture.and_then(|t| fc.gpu.texture_size(t)) {
            values.set("texelSize", [1.0 / w as f32, 1.0 / h as f32]);
        }
        values.set("screenSize", [self.width as f32, self.height as f32]);
        if let Some(params) = &self.params {
            params.write(&mut values);
        }
        values.extend_from(&self.uniforms);

        self.observers.notify(PassEvent::Apply, &mut args);
        values.extend_from(&args.uniforms);

        for (name, value) in values.iter() {
            fc.gpu.set_uniform(name, value);
        }
        for (name, source) in &self.samplers {
            let texture = match source {
                SamplerSource::Input => self.input_texture,
                SamplerSource::Texture(texture) => Some(*texture),
                SamplerSource::Unbound => None,
            };
            fc.gpu.set_texture(name, texture);
        }

        Some(BoundEffect {
            pass: self.id,
            effect,
        })
    }

    /// Bind the output texture as the framebuffer, clearing it if the pass
    /// auto-clears. False when the pass was not activated off-screen.
    ///
    /// The pooled target may already be back in the pool when a chain
    /// planned its reuse by a later pass.
    pub fn bind_output(&self, gpu: &mut dyn GraphicsContext) -> bool {
        match self.output_texture {
            Some(texture) => {
                gpu.bind_framebuffer(texture);
                if self.options.auto_clear {
                    gpu.clear(self.options.clear_color);
                }
                true
            }
            _ => false,
        }
    }

    /// Draw the quad with the bound effect
    pub fn draw(&mut self, gpu: &mut dyn GraphicsContext, quad: &ScreenQuad, bound: BoundEffect) {
        gpu.bind_buffers(quad.vertex_buffer, quad.index_buffer, bound.effect);

        let mut args = self.event_args();
        self.observers.notify(PassEvent::BeforeDraw, &mut args);

        gpu.draw_elements_type(DrawMode::Triangles, 0, QUAD_INDEX_COUNT);
        self.draw_count += 1;
        log::trace!("Pass '{}' drew {}x{}", self.name, self.width, self.height);

        self.observers.notify(PassEvent::AfterRender, &mut args);
    }

    /// Forget every backend handle after a context loss. The pass
    /// configuration is kept; the effect is recreated on the next poll.
    pub fn invalidate(&mut self) {
        self.effect = None;
        self.effect_failed = false;
        self.output_target = None;
        self.output_texture = None;
        self.input_texture = None;
    }

    /// Release the effect and output target
    pub fn dispose(&mut self, gpu: &mut dyn GraphicsContext, pool: &mut RenderTargetPool) {
        if let Some(effect) = self.effect.take() {
            if self.effect_generation == gpu.generation() {
                gpu.release_effect(effect);
            }
        }
        self.release_output(pool);
        self.output_texture = None;
        self.input_texture = None;
        self.observers.clear();
    }

    fn event_args(&self) -> PassEventArgs {
        PassEventArgs {
            pass: Some(self.id),
            name: self.name.clone(),
            camera: self.camera,
            width: self.width,
            height: self.height,
            input: self.input_texture,
            output: self.output_texture,
            uniforms: UniformValues::new(),
        }
    }
}

impl std::fmt::Debug for PostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcess")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("program", &self.program)
            .field("enabled", &self.enabled)
            .field("size", &(self.width, self.height))
            .finish()
    }
}
