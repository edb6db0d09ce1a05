//! Headless software backend
//!
//! A CPU implementation of [`GraphicsContext`]. Textures are RGBA `f32`
//! texel arrays with an 8-bit stencil plane; a draw of the full-screen quad
//! runs the bound program's [`Kernel`] over every texel of the bound
//! framebuffer, applying the stencil test and blend mode.
//!
//! Besides rendering it records every call, so tests can inspect draw
//! calls, bound samplers and global state, and it can simulate the failure
//! modes a real device has:
//! - compilation latency (`set_compile_latency`, `stall_effect`)
//! - compilation failure (`fail_program`)
//! - out-of-memory on texture creation (`fail_next_allocations`)
//! - device loss (`lose_context`)

pub mod programs;

pub use programs::{Fragment, Kernel, Sampled};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::context::{EffectDesc, EffectStatus, GraphicsContext};
use crate::error::{GpuError, GpuResult};
use crate::resource::{
    AlphaMode, BufferHandle, Color, DrawMode, EffectHandle, StencilState, TextureDesc,
    TextureFormat, TextureHandle, UniformValue,
};

/// A recorded draw call
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub effect: EffectHandle,
    /// Name from the effect description (the pass name)
    pub effect_name: String,
    pub program: String,
    /// Framebuffer drawn into, None for the screen
    pub target: Option<TextureHandle>,
    pub mode: DrawMode,
    pub index_count: u32,
    pub samplers: BTreeMap<String, Option<TextureHandle>>,
    pub uniforms: BTreeMap<String, UniformValue>,
    pub alpha_mode: AlphaMode,
    pub stencil: StencilState,
}

impl DrawRecord {
    /// Texture bound to a sampler
    pub fn sampler(&self, name: &str) -> Option<TextureHandle> {
        self.samplers.get(name).copied().flatten()
    }
}

/// A recorded state-changing call
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateEffect(String),
    CreateTexture { texture: TextureHandle, width: u32, height: u32 },
    ReleaseTexture(TextureHandle),
    BindFramebuffer(Option<TextureHandle>),
    Clear(Color),
    BindEffect(EffectHandle),
    Draw { effect: EffectHandle, index_count: u32 },
    SetDepthBuffer(bool),
    SetDepthWrite(bool),
    SetAlphaMode(AlphaMode),
    SetStencil(StencilState),
    ContextLost,
}

struct Surface {
    width: u32,
    height: u32,
    format: TextureFormat,
    texels: Vec<[f32; 4]>,
    stencil: Vec<u8>,
}

impl Surface {
    fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            format,
            texels: vec![[0.0; 4]; len],
            stencil: vec![0; len],
        }
    }

    fn snapshot(&self) -> Sampled {
        Sampled {
            width: self.width,
            height: self.height,
            texels: self.texels.clone(),
        }
    }
}

struct EffectEntry {
    desc: EffectDesc,
    polls_remaining: u32,
    failure: Option<String>,
    uniforms: BTreeMap<String, UniformValue>,
    textures: BTreeMap<String, Option<TextureHandle>>,
}

enum BufferKind {
    Vertex,
    Index,
}

/// CPU graphics context
pub struct HeadlessContext {
    generation: u64,
    next_handle: u64,
    screen: Surface,
    textures: BTreeMap<u64, Surface>,
    effects: BTreeMap<u64, EffectEntry>,
    buffers: BTreeMap<u64, BufferKind>,
    kernels: BTreeMap<String, Kernel>,

    compile_latency: u32,
    failed_programs: BTreeSet<String>,
    stalled_effects: BTreeSet<String>,
    failing_allocations: u32,

    framebuffer: Option<TextureHandle>,
    bound_effect: Option<EffectHandle>,
    bound_buffers: Option<(BufferHandle, BufferHandle)>,
    depth_buffer: bool,
    depth_write: bool,
    alpha_mode: AlphaMode,
    stencil: StencilState,

    draws: Vec<DrawRecord>,
    commands: Vec<Command>,
    rejected_draws: u64,
}

impl HeadlessContext {
    /// Create a context whose default framebuffer is `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            generation: 1,
            next_handle: 1,
            screen: Surface::new(width.max(1), height.max(1), TextureFormat::Rgba8Unorm),
            textures: BTreeMap::new(),
            effects: BTreeMap::new(),
            buffers: BTreeMap::new(),
            kernels: programs::builtin_kernels(),
            compile_latency: 0,
            failed_programs: BTreeSet::new(),
            stalled_effects: BTreeSet::new(),
            failing_allocations: 0,
            framebuffer: None,
            bound_effect: None,
            bound_buffers: None,
            depth_buffer: true,
            depth_write: true,
            alpha_mode: AlphaMode::Disabled,
            stencil: StencilState::disabled(),
            draws: Vec::new(),
            commands: Vec::new(),
            rejected_draws: 0,
        }
    }

    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    // Failure injection

    /// Effects created from now on need `polls` polls before they are ready
    pub fn set_compile_latency(&mut self, polls: u32) {
        self.compile_latency = polls;
    }

    /// Effects using this program fail to compile
    pub fn fail_program(&mut self, program: &str) {
        self.failed_programs.insert(program.to_string());
    }

    /// Effects with this name report `Compiling` until resumed
    pub fn stall_effect(&mut self, name: &str) {
        self.stalled_effects.insert(name.to_string());
    }

    pub fn resume_effect(&mut self, name: &str) {
        self.stalled_effects.remove(name);
    }

    /// The next `count` texture creations fail with out-of-memory
    pub fn fail_next_allocations(&mut self, count: u32) {
        self.failing_allocations = count;
    }

    /// Simulate a device reset: every handle becomes invalid and the
    /// generation advances. Failure injection settings are kept.
    pub fn lose_context(&mut self) {
        self.textures.clear();
        self.effects.clear();
        self.buffers.clear();
        self.framebuffer = None;
        self.bound_effect = None;
        self.bound_buffers = None;
        self.generation += 1;
        self.commands.push(Command::ContextLost);
        log::info!("Headless context lost (generation {})", self.generation);
    }

    /// Add or replace a program kernel
    pub fn register_program<F>(&mut self, name: &str, kernel: F)
    where
        F: Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync + 'static,
    {
        self.kernels.insert(name.to_string(), Arc::new(kernel));
    }

    // Texture content

    /// Create a texture filled with one color, bypassing failure injection
    pub fn create_filled_texture(&mut self, width: u32, height: u32, color: [f32; 4]) -> TextureHandle {
        let h = self.handle();
        let mut surface = Surface::new(width.max(1), height.max(1), TextureFormat::Rgba32Float);
        surface.texels.fill(color);
        self.textures.insert(h, surface);
        TextureHandle(h)
    }

    pub fn fill_texture(&mut self, texture: TextureHandle, color: [f32; 4]) -> bool {
        match self.textures.get_mut(&texture.0) {
            Some(surface) => {
                surface.texels.fill(color);
                true
            }
            None => false,
        }
    }

    /// Fill a rectangle `[x0, x1) x [y0, y1)` of a texture
    pub fn fill_rect(
        &mut self,
        texture: TextureHandle,
        (x0, y0): (u32, u32),
        (x1, y1): (u32, u32),
        color: [f32; 4],
    ) -> bool {
        let Some(surface) = self.textures.get_mut(&texture.0) else {
            return false;
        };
        for y in y0.min(surface.height)..y1.min(surface.height) {
            for x in x0.min(surface.width)..x1.min(surface.width) {
                surface.texels[(y * surface.width + x) as usize] = color;
            }
        }
        true
    }

    /// Write stencil values in a rectangle of a texture, or the screen when
    /// `target` is None
    pub fn fill_stencil(
        &mut self,
        target: Option<TextureHandle>,
        (x0, y0): (u32, u32),
        (x1, y1): (u32, u32),
        value: u8,
    ) -> bool {
        let surface = match target {
            Some(t) => match self.textures.get_mut(&t.0) {
                Some(s) => s,
                None => return false,
            },
            None => &mut self.screen,
        };
        for y in y0.min(surface.height)..y1.min(surface.height) {
            for x in x0.min(surface.width)..x1.min(surface.width) {
                surface.stencil[(y * surface.width + x) as usize] = value;
            }
        }
        true
    }

    pub fn read_pixel(&self, texture: TextureHandle, x: u32, y: u32) -> Option<[f32; 4]> {
        let surface = self.textures.get(&texture.0)?;
        if x >= surface.width || y >= surface.height {
            return None;
        }
        Some(surface.texels[(y * surface.width + x) as usize])
    }

    pub fn read_pixels(&self, texture: TextureHandle) -> Option<Vec<[f32; 4]>> {
        self.textures.get(&texture.0).map(|s| s.texels.clone())
    }

    pub fn screen_pixels(&self) -> &[[f32; 4]] {
        &self.screen.texels
    }

    pub fn screen_pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.screen.width || y >= self.screen.height {
            return None;
        }
        Some(self.screen.texels[(y * self.screen.width + x) as usize])
    }

    // Recorded calls

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    /// Draw calls issued by effects with this name
    pub fn draws_named(&self, name: &str) -> usize {
        self.draws.iter().filter(|d| d.effect_name == name).count()
    }

    /// Draw calls issued with this program
    pub fn draws_with_program(&self, program: &str) -> usize {
        self.draws.iter().filter(|d| d.program == program).count()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Forget recorded draws and commands
    pub fn clear_records(&mut self) {
        self.draws.clear();
        self.commands.clear();
        self.rejected_draws = 0;
    }

    /// Draws dropped for lack of a valid effect, buffers or framebuffer
    pub fn rejected_draws(&self) -> u64 {
        self.rejected_draws
    }

    // State inspection

    pub fn depth_buffer(&self) -> bool {
        self.depth_buffer
    }

    pub fn depth_write(&self) -> bool {
        self.depth_write
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    pub fn stencil_state(&self) -> StencilState {
        self.stencil
    }

    pub fn bound_framebuffer(&self) -> Option<TextureHandle> {
        self.framebuffer
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_effect_count(&self) -> usize {
        self.effects.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Uniform value last set on an effect
    pub fn effect_uniform(&self, effect: EffectHandle, name: &str) -> Option<UniformValue> {
        self.effects.get(&effect.0)?.uniforms.get(name).copied()
    }

    /// Texture last bound to a sampler of an effect
    pub fn effect_texture(&self, effect: EffectHandle, sampler: &str) -> Option<TextureHandle> {
        self.effects.get(&effect.0)?.textures.get(sampler).copied().flatten()
    }

    fn shade(&mut self, effect: EffectHandle) {
        let Some(entry) = self.effects.get(&effect.0) else {
            return;
        };
        let Some(kernel) = self.kernels.get(&entry.desc.program).cloned() else {
            return;
        };

        let samplers: BTreeMap<String, Sampled> = entry
            .textures
            .iter()
            .filter_map(|(name, texture)| {
                let surface = self.textures.get(&(*texture)?.0)?;
                Some((name.clone(), surface.snapshot()))
            })
            .collect();
        let uniforms = entry.uniforms.clone();

        let mode = self.alpha_mode;
        let stencil = self.stencil;
        let surface = match self.framebuffer {
            Some(t) => match self.textures.get_mut(&t.0) {
                Some(s) => s,
                None => return,
            },
            None => &mut self.screen,
        };
        let clamp = !surface.format.is_hdr();

        for y in 0..surface.height {
            for x in 0..surface.width {
                let index = (y * surface.width + x) as usize;
                if !stencil.passes(surface.stencil[index]) {
                    continue;
                }
                let fragment = Fragment {
                    uv: [
                        (x as f32 + 0.5) / surface.width as f32,
                        (y as f32 + 0.5) / surface.height as f32,
                    ],
                    x,
                    y,
                    width: surface.width,
                    height: surface.height,
                    samplers: &samplers,
                    uniforms: &uniforms,
                };
                let src = kernel(&fragment);
                let mut out = blend(mode, surface.texels[index], src);
                if clamp {
                    for c in &mut out {
                        *c = c.clamp(0.0, 1.0);
                    }
                }
                surface.texels[index] = out;
            }
        }
    }
}

/// Blend `src` over `dst`
pub fn blend(mode: AlphaMode, dst: [f32; 4], src: [f32; 4]) -> [f32; 4] {
    match mode {
        AlphaMode::Disabled => src,
        AlphaMode::Add => [
            dst[0] + src[0] * src[3],
            dst[1] + src[1] * src[3],
            dst[2] + src[2] * src[3],
            dst[3],
        ],
        AlphaMode::Combine => {
            let a = src[3];
            [
                src[0] * a + dst[0] * (1.0 - a),
                src[1] * a + dst[1] * (1.0 - a),
                src[2] * a + dst[2] * (1.0 - a),
                (a + dst[3]).min(1.0),
            ]
        }
        AlphaMode::Multiply => [src[0] * dst[0], src[1] * dst[1], src[2] * dst[2], dst[3]],
    }
}

impl GraphicsContext for HeadlessContext {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn create_effect(&mut self, desc: &EffectDesc) -> GpuResult<EffectHandle> {
        let failure = if self.failed_programs.contains(&desc.program) {
            Some(format!("program '{}' rejected", desc.program))
        } else if !self.kernels.contains_key(&desc.program) {
            Some(format!("unknown program '{}'", desc.program))
        } else {
            None
        };
        let h = self.handle();
        self.effects.insert(
            h,
            EffectEntry {
                desc: desc.clone(),
                polls_remaining: self.compile_latency,
                failure,
                uniforms: BTreeMap::new(),
                textures: BTreeMap::new(),
            },
        );
        self.commands.push(Command::CreateEffect(desc.name.clone()));
        Ok(EffectHandle(h))
    }

    fn poll_effect(&mut self, effect: EffectHandle) -> EffectStatus {
        let Some(entry) = self.effects.get_mut(&effect.0) else {
            return EffectStatus::Failed("unknown effect".to_string());
        };
        if let Some(failure) = &entry.failure {
            return EffectStatus::Failed(failure.clone());
        }
        if self.stalled_effects.contains(&entry.desc.name) {
            return EffectStatus::Compiling;
        }
        if entry.polls_remaining > 0 {
            entry.polls_remaining -= 1;
            return EffectStatus::Compiling;
        }
        EffectStatus::Ready
    }

    fn release_effect(&mut self, effect: EffectHandle) {
        self.effects.remove(&effect.0);
        if self.bound_effect == Some(effect) {
            self.bound_effect = None;
        }
    }

    fn create_vertex_buffer(&mut self, _data: &[u8]) -> GpuResult<BufferHandle> {
        let h = self.handle();
        self.buffers.insert(h, BufferKind::Vertex);
        Ok(BufferHandle(h))
    }

    fn create_index_buffer(&mut self, _indices: &[u32]) -> GpuResult<BufferHandle> {
        let h = self.handle();
        self.buffers.insert(h, BufferKind::Index);
        Ok(BufferHandle(h))
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> GpuResult<TextureHandle> {
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            return Err(GpuError::OutOfMemory {
                requested_bytes: desc.byte_size(),
            });
        }
        let h = self.handle();
        self.textures
            .insert(h, Surface::new(desc.width.max(1), desc.height.max(1), desc.format));
        let texture = TextureHandle(h);
        self.commands.push(Command::CreateTexture {
            texture,
            width: desc.width,
            height: desc.height,
        });
        Ok(texture)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.commands.push(Command::ReleaseTexture(texture));
        }
        if self.framebuffer == Some(texture) {
            self.framebuffer = None;
        }
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture.0).map(|s| (s.width, s.height))
    }

    fn bind_buffers(&mut self, vertex: BufferHandle, index: BufferHandle, effect: EffectHandle) {
        self.bound_buffers = Some((vertex, index));
        self.bound_effect = Some(effect);
    }

    fn bind_framebuffer(&mut self, texture: TextureHandle) {
        self.framebuffer = Some(texture);
        self.commands.push(Command::BindFramebuffer(Some(texture)));
    }

    fn restore_default_framebuffer(&mut self) {
        self.framebuffer = None;
        self.commands.push(Command::BindFramebuffer(None));
    }

    fn clear(&mut self, color: Color) {
        let surface = match self.framebuffer {
            Some(t) => match self.textures.get_mut(&t.0) {
                Some(s) => s,
                None => return,
            },
            None => &mut self.screen,
        };
        surface.texels.fill(color.to_array());
        self.commands.push(Command::Clear(color));
    }

    fn bind_effect(&mut self, effect: EffectHandle) {
        self.bound_effect = Some(effect);
        self.commands.push(Command::BindEffect(effect));
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        if let Some(entry) = self.bound_effect.and_then(|e| self.effects.get_mut(&e.0)) {
            entry.uniforms.insert(name.to_string(), value);
        }
    }

    fn set_texture(&mut self, sampler: &str, texture: Option<TextureHandle>) {
        if let Some(entry) = self.bound_effect.and_then(|e| self.effects.get_mut(&e.0)) {
            entry.textures.insert(sampler.to_string(), texture);
        }
    }

    fn draw_elements_type(&mut self, mode: DrawMode, start: u32, count: u32) {
        let Some(effect) = self.bound_effect else {
            log::warn!("Headless draw without a bound effect");
            self.rejected_draws += 1;
            return;
        };
        let buffers_valid = self.bound_buffers.map_or(false, |(v, i)| {
            matches!(self.buffers.get(&v.0), Some(BufferKind::Vertex))
                && matches!(self.buffers.get(&i.0), Some(BufferKind::Index))
        });
        let target_valid = self
            .framebuffer
            .map_or(true, |t| self.textures.contains_key(&t.0));
        let Some(entry) = self.effects.get(&effect.0) else {
            self.rejected_draws += 1;
            return;
        };
        if !buffers_valid || !target_valid {
            log::warn!("Headless draw of '{}' rejected: stale buffers or framebuffer", entry.desc.name);
            self.rejected_draws += 1;
            return;
        }

        self.draws.push(DrawRecord {
            effect,
            effect_name: entry.desc.name.clone(),
            program: entry.desc.program.clone(),
            target: self.framebuffer,
            mode,
            index_count: count,
            samplers: entry.textures.clone(),
            uniforms: entry.uniforms.clone(),
            alpha_mode: self.alpha_mode,
            stencil: self.stencil,
        });
        self.commands.push(Command::Draw {
            effect,
            index_count: count,
        });

        // Two triangles starting at zero cover the whole quad
        if mode == DrawMode::Triangles && start == 0 && count >= 6 {
            self.shade(effect);
        }
    }

    fn set_depth_buffer(&mut self, enabled: bool) {
        self.depth_buffer = enabled;
        self.commands.push(Command::SetDepthBuffer(enabled));
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.depth_write = enabled;
        self.commands.push(Command::SetDepthWrite(enabled));
    }

    fn set_alpha_mode(&mut self, mode: AlphaMode) {
        self.alpha_mode = mode;
        self.commands.push(Command::SetAlphaMode(mode));
    }

    fn set_stencil(&mut self, state: StencilState) {
        self.stencil = state;
        self.commands.push(Command::SetStencil(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quad::ScreenQuad;

    fn desc(name: &str, program: &str) -> EffectDesc {
        EffectDesc::new(name, program)
    }

    #[test]
    fn test_compile_latency() {
        let mut gpu = HeadlessContext::new(4, 4);
        gpu.set_compile_latency(1);
        let effect = gpu.create_effect(&desc("a", "pass_through")).unwrap();
        assert_eq!(gpu.poll_effect(effect), EffectStatus::Compiling);
        assert_eq!(gpu.poll_effect(effect), EffectStatus::Ready);
    }

    #[test]
    fn test_stall_and_fail() {
        let mut gpu = HeadlessContext::new(4, 4);
        gpu.stall_effect("slow");
        gpu.fail_program("blur");

        let slow = gpu.create_effect(&desc("slow", "pass_through")).unwrap();
        let broken = gpu.create_effect(&desc("b", "blur")).unwrap();
        let unknown = gpu.create_effect(&desc("u", "nope")).unwrap();

        assert_eq!(gpu.poll_effect(slow), EffectStatus::Compiling);
        assert!(matches!(gpu.poll_effect(broken), EffectStatus::Failed(_)));
        assert!(matches!(gpu.poll_effect(unknown), EffectStatus::Failed(_)));

        gpu.resume_effect("slow");
        assert_eq!(gpu.poll_effect(slow), EffectStatus::Ready);
    }

    #[test]
    fn test_draw_shades_bound_target() {
        let mut gpu = HeadlessContext::new(4, 4);
        let quad = ScreenQuad::create(&mut gpu).unwrap();
        let source = gpu.create_filled_texture(4, 4, [0.2, 0.4, 0.6, 1.0]);
        let target = gpu
            .create_texture(&TextureDesc::color(4, 4, TextureFormat::Rgba32Float))
            .unwrap();
        let effect = gpu.create_effect(&desc("copy", "pass_through")).unwrap();

        gpu.bind_framebuffer(target);
        gpu.bind_effect(effect);
        gpu.set_texture("textureSampler", Some(source));
        gpu.bind_buffers(quad.vertex_buffer, quad.index_buffer, effect);
        gpu.draw_elements_type(DrawMode::Triangles, 0, 6);

        assert_eq!(gpu.draw_count(), 1);
        assert_eq!(gpu.draws()[0].sampler("textureSampler"), Some(source));
        assert_eq!(gpu.read_pixel(target, 1, 2), Some([0.2, 0.4, 0.6, 1.0]));
    }

    #[test]
    fn test_stencil_masks_fragments() {
        let mut gpu = HeadlessContext::new(4, 4);
        let quad = ScreenQuad::create(&mut gpu).unwrap();
        let source = gpu.create_filled_texture(4, 4, [1.0, 1.0, 1.0, 1.0]);
        let target = gpu.create_filled_texture(4, 4, [0.0, 0.0, 0.0, 1.0]);
        gpu.fill_stencil(Some(target), (0, 0), (2, 4), 0x02);
        let effect = gpu.create_effect(&desc("copy", "pass_through")).unwrap();

        gpu.bind_framebuffer(target);
        gpu.bind_effect(effect);
        gpu.set_texture("textureSampler", Some(source));
        gpu.set_stencil(StencilState::test(crate::CompareFunction::Equal, 0x02));
        gpu.bind_buffers(quad.vertex_buffer, quad.index_buffer, effect);
        gpu.draw_elements_type(DrawMode::Triangles, 0, 6);

        assert_eq!(gpu.read_pixel(target, 0, 0), Some([1.0; 4]));
        assert_eq!(gpu.read_pixel(target, 3, 0), Some([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_blend_modes() {
        let dst = [0.5, 0.5, 0.5, 1.0];
        assert_eq!(blend(AlphaMode::Disabled, dst, [0.1, 0.2, 0.3, 0.4]), [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(blend(AlphaMode::Add, dst, [0.0, 0.0, 0.0, 1.0]), dst);
        assert_eq!(blend(AlphaMode::Combine, dst, [1.0, 1.0, 1.0, 0.0]), dst);
        assert_eq!(blend(AlphaMode::Multiply, dst, [1.0, 0.0, 1.0, 1.0]), [0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_lose_context_invalidates_handles() {
        let mut gpu = HeadlessContext::new(4, 4);
        let texture = gpu.create_filled_texture(4, 4, [1.0; 4]);
        let generation = gpu.generation();

        gpu.lose_context();
        assert_eq!(gpu.generation(), generation + 1);
        assert!(gpu.texture_size(texture).is_none());
        assert_eq!(gpu.live_texture_count(), 0);
    }

    #[test]
    fn test_allocation_failure_injection() {
        let mut gpu = HeadlessContext::new(4, 4);
        gpu.fail_next_allocations(1);
        let desc = TextureDesc::color(4, 4, TextureFormat::Rgba8Unorm);
        assert!(matches!(gpu.create_texture(&desc), Err(GpuError::OutOfMemory { .. })));
        assert!(gpu.create_texture(&desc).is_ok());
    }
}
