//! Effect Layers
//!
//! An effect layer composites a mesh-driven effect onto a camera's scene
//! color before the camera's pass chain runs. Every layer follows the same
//! frame:
//!
//! 1. **Extract**: each contributing mesh's emissive buffer is drawn into the
//!    layer's main texture, tinted by the layer-specific color
//! 2. **Blur**: the main texture runs through the layer's private blur chains
//! 3. **Merge**: a merge pass blends the blurred result onto the scene color
//!
//! Layers are composed, not inherited: [`EffectLayerCore`] carries the shared
//! data (meshes, intensities, main texture, extract pass, observers) and each
//! implementation of [`EffectLayer`] adds its own blur and merge.

mod glow;
mod highlight;

pub use glow::GlowLayer;
pub use highlight::{HighlightLayer, HIGHLIGHT_STENCIL_REF};

use std::collections::BTreeMap;

use afterimage_core::{define_id, ObserverHandle, ObserverRegistry};

use crate::camera::{Camera, CameraId, MeshId};
use crate::compositor::FrameContext;
use crate::context::GraphicsContext;
use crate::diagnostics::DiagnosticKind;
use crate::error::{GpuResult, Result};
use crate::pass::builtin::program;
use crate::pass::{PassChain, PostProcess, SamplerSource, SOURCE_SAMPLER};
use crate::quad::SharedQuad;
use crate::resource::{AlphaMode, Color, TextureDesc, TextureFormat, TextureHandle};
use crate::target_pool::RenderTargetPool;

define_id!(
    /// Identifies an effect layer
    LayerId
);

/// Sampler the extract pass reads a mesh's emissive buffer from
pub const EMISSIVE_SAMPLER: &str = "emissiveSampler";

/// A mesh registered with a layer.
///
/// `emissive` is the mesh's screen-space emissive buffer produced by the
/// scene renderer; a mesh without one cannot contribute.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectMesh {
    pub id: MeshId,
    pub emissive: Option<TextureHandle>,
    pub color: Color,
    pub rendering_group: u8,
}

impl EffectMesh {
    pub fn new(id: MeshId, emissive: Option<TextureHandle>) -> Self {
        Self {
            id,
            emissive,
            color: Color::WHITE,
            rendering_group: 0,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_rendering_group(mut self, group: u8) -> Self {
        self.rendering_group = group;
        self
    }
}

/// Where a layer is in its frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerState {
    Disabled,
    Preparing,
    Blurring,
    Compositing,
}

/// Layer lifecycle events
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerEvent {
    BeforeRenderMainTexture,
    BeforeCompose,
    AfterCompose,
    SizeChanged,
    Dispose,
}

/// Payload handed to layer observers
#[derive(Clone, Debug, Default)]
pub struct LayerEventArgs {
    pub layer: Option<LayerId>,
    pub name: String,
    pub camera: Option<CameraId>,
    pub width: u32,
    pub height: u32,
    pub main_texture: Option<TextureHandle>,
}

/// Outcome of one layer render
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub draw_calls: u32,
    pub meshes_drawn: u32,
    pub meshes_skipped: u32,
    /// The merge pass blended onto the scene color
    pub composed: bool,
}

/// A texture owned by a layer, recreated when its size or the context
/// generation changes
#[derive(Debug, Default)]
pub(crate) struct OwnedTexture {
    handle: Option<TextureHandle>,
    size: (u32, u32),
    generation: u64,
}

impl OwnedTexture {
    /// Returns the texture and whether it was (re)created
    pub(crate) fn ensure(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> GpuResult<(TextureHandle, bool)> {
        let generation = gpu.generation();
        if let Some(handle) = self.handle {
            if self.generation == generation && self.size == (width, height) {
                return Ok((handle, false));
            }
        }
        self.release(gpu);
        let handle = gpu.create_texture(&TextureDesc::color(width, height, format))?;
        self.handle = Some(handle);
        self.size = (width, height);
        self.generation = generation;
        Ok((handle, true))
    }

    pub(crate) fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    pub(crate) fn release(&mut self, gpu: &mut dyn GraphicsContext) {
        if let Some(handle) = self.handle.take() {
            if self.generation == gpu.generation() {
                gpu.release_texture(handle);
            }
        }
    }

    /// Forget the handle without releasing it
    pub(crate) fn invalidate(&mut self) {
        self.handle = None;
    }
}

/// Data and behavior shared by every layer
pub struct EffectLayerCore {
    id: LayerId,
    name: String,
    enabled: bool,
    intensity: f32,
    cameras: Vec<CameraId>,
    rendering_group: Option<u8>,
    main_texture_ratio: f32,
    main_texture_fixed_size: Option<u32>,
    neutral_color: Color,
    alpha_mode: AlphaMode,
    texture_format: TextureFormat,

    meshes: Vec<EffectMesh>,
    mesh_intensity: BTreeMap<MeshId, f32>,
    state: LayerState,

    quad: SharedQuad,
    main_texture: OwnedTexture,
    extract: Option<PostProcess>,
    observers: ObserverRegistry<LayerEvent, LayerEventArgs>,
}

impl EffectLayerCore {
    pub fn new(name: impl Into<String>, quad: SharedQuad) -> Self {
        let name = name.into();
        let mut extract = PostProcess::new(format!("{}.extract", name), program::EMISSIVE_EXTRACT)
            .with_sampler(SOURCE_SAMPLER, SamplerSource::Unbound)
            .with_sampler(EMISSIVE_SAMPLER, SamplerSource::Unbound)
            .with_alpha_mode(AlphaMode::Combine);
        // Meshes accumulate; the main texture is cleared once per frame
        extract.options_mut().auto_clear = false;

        Self {
            id: LayerId::new(),
            name,
            enabled: true,
            intensity: 1.0,
            cameras: Vec::new(),
            rendering_group: None,
            main_texture_ratio: 0.5,
            main_texture_fixed_size: None,
            neutral_color: Color::TRANSPARENT,
            alpha_mode: AlphaMode::Add,
            texture_format: TextureFormat::Rgba8Unorm,
            meshes: Vec::new(),
            mesh_intensity: BTreeMap::new(),
            state: LayerState::Disabled,
            quad,
            main_texture: OwnedTexture::default(),
            extract: Some(extract),
            observers: ObserverRegistry::new(),
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Merge factor
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity.max(0.0);
    }

    /// Cameras the layer renders for; empty means every camera
    pub fn cameras(&self) -> &[CameraId] {
        &self.cameras
    }

    pub fn add_camera(&mut self, camera: CameraId) {
        if !self.cameras.contains(&camera) {
            self.cameras.push(camera);
        }
    }

    pub fn remove_camera(&mut self, camera: CameraId) {
        self.cameras.retain(|c| *c != camera);
    }

    pub fn applies_to(&self, camera: CameraId) -> bool {
        self.cameras.is_empty() || self.cameras.contains(&camera)
    }

    pub fn rendering_group(&self) -> Option<u8> {
        self.rendering_group
    }

    pub fn set_rendering_group(&mut self, group: Option<u8>) {
        self.rendering_group = group;
    }

    pub fn main_texture_ratio(&self) -> f32 {
        self.main_texture_ratio
    }

    pub fn set_main_texture_ratio(&mut self, ratio: f32) {
        self.main_texture_ratio = ratio.max(0.0);
    }

    pub fn set_main_texture_fixed_size(&mut self, size: Option<u32>) {
        self.main_texture_fixed_size = size;
    }

    pub fn neutral_color(&self) -> Color {
        self.neutral_color
    }

    pub fn set_neutral_color(&mut self, color: Color) {
        self.neutral_color = color;
    }

    /// Blend mode of the merge onto the scene color
    pub fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    pub fn set_alpha_mode(&mut self, mode: AlphaMode) {
        self.alpha_mode = mode;
    }

    pub fn texture_format(&self) -> TextureFormat {
        self.texture_format
    }

    pub fn set_texture_format(&mut self, format: TextureFormat) {
        self.texture_format = format;
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn set_state(&mut self, state: LayerState) {
        self.state = state;
    }

    pub fn quad(&self) -> &SharedQuad {
        &self.quad
    }

    // Meshes

    /// Register a mesh, replacing an earlier registration of the same id
    pub fn add_mesh(&mut self, mesh: EffectMesh) {
        match self.meshes.iter_mut().find(|m| m.id == mesh.id) {
            Some(slot) => *slot = mesh,
            None => self.meshes.push(mesh),
        }
    }

    pub fn remove_mesh(&mut self, id: MeshId) -> Option<EffectMesh> {
        let index = self.meshes.iter().position(|m| m.id == id)?;
        self.mesh_intensity.remove(&id);
        Some(self.meshes.remove(index))
    }

    pub fn mesh(&self, id: MeshId) -> Option<&EffectMesh> {
        self.meshes.iter().find(|m| m.id == id)
    }

    pub fn has_mesh(&self, id: MeshId) -> bool {
        self.mesh(id).is_some()
    }

    pub fn meshes(&self) -> &[EffectMesh] {
        &self.meshes
    }

    /// Update the emissive buffer of a registered mesh
    pub fn set_mesh_emissive(&mut self, id: MeshId, emissive: Option<TextureHandle>) -> bool {
        match self.meshes.iter_mut().find(|m| m.id == id) {
            Some(mesh) => {
                mesh.emissive = emissive;
                true
            }
            None => false,
        }
    }

    /// Per-mesh intensity, 1.0 unless overridden
    pub fn mesh_intensity(&self, id: MeshId) -> f32 {
        self.mesh_intensity.get(&id).copied().unwrap_or(1.0)
    }

    pub fn set_mesh_intensity(&mut self, id: MeshId, intensity: f32) {
        self.mesh_intensity.insert(id, intensity.max(0.0));
    }

    pub fn in_rendering_group(&self, mesh: &EffectMesh) -> bool {
        self.rendering_group
            .map_or(true, |group| group == mesh.rendering_group)
    }

    // Observers

    pub fn on<F>(&mut self, event: LayerEvent, callback: F) -> ObserverHandle
    where
        F: FnMut(&mut LayerEventArgs) + Send + 'static,
    {
        self.observers.add(event, callback)
    }

    pub fn remove_observer(&mut self, handle: ObserverHandle) -> bool {
        self.observers.remove(handle)
    }

    pub fn notify(&mut self, event: LayerEvent, camera: Option<CameraId>) {
        let (width, height) = self.main_texture.size;
        let mut args = LayerEventArgs {
            layer: Some(self.id),
            name: self.name.clone(),
            camera,
            width,
            height,
            main_texture: self.main_texture.handle(),
        };
        self.observers.notify(event, &mut args);
    }

    // Frame helpers

    /// Size of the main texture for a camera
    pub fn main_texture_size(&self, camera: &Camera) -> (u32, u32) {
        if let Some(size) = self.main_texture_fixed_size {
            return (size.max(1), size.max(1));
        }
        let (w, h) = camera.viewport_pixels();
        (
            ((w as f32 * self.main_texture_ratio).floor() as u32).max(1),
            ((h as f32 * self.main_texture_ratio).floor() as u32).max(1),
        )
    }

    pub fn main_texture(&self) -> Option<TextureHandle> {
        self.main_texture.handle()
    }

    /// Create or resize the main texture. Reports and returns None when the
    /// allocation fails.
    pub fn ensure_main_texture(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
    ) -> Option<TextureHandle> {
        let (width, height) = self.main_texture_size(camera);
        match self
            .main_texture
            .ensure(fc.gpu, width, height, self.texture_format)
        {
            Ok((texture, resized)) => {
                if resized {
                    log::debug!("Layer '{}' main texture {}x{}", self.name, width, height);
                    self.notify(LayerEvent::SizeChanged, Some(camera.id));
                }
                Some(texture)
            }
            Err(e) => {
                fc.diagnostics.report(
                    DiagnosticKind::ResourceExhaustion,
                    format!("{}/main", self.name),
                    e.to_string(),
                );
                None
            }
        }
    }

    /// Create or resize a texture owned by the layer, reporting failures
    pub(crate) fn ensure_texture(
        &self,
        fc: &mut FrameContext<'_>,
        texture: &mut OwnedTexture,
        key: &str,
        (width, height): (u32, u32),
    ) -> Option<TextureHandle> {
        match texture.ensure(fc.gpu, width, height, self.texture_format) {
            Ok((handle, _)) => Some(handle),
            Err(e) => {
                fc.diagnostics.report(
                    DiagnosticKind::ResourceExhaustion,
                    format!("{}/{}", self.name, key),
                    e.to_string(),
                );
                None
            }
        }
    }

    pub fn is_extract_ready(&mut self, gpu: &mut dyn GraphicsContext) -> bool {
        self.extract.as_mut().map_or(true, |pass| pass.is_ready(gpu))
    }

    /// Blend `merge` onto the scene color. The merge pass's samplers must
    /// already point at the blurred textures.
    pub fn compose(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        merge: &mut PostProcess,
        input: TextureHandle,
        scene_target: TextureHandle,
    ) -> bool {
        self.state = LayerState::Compositing;
        self.notify(LayerEvent::BeforeCompose, Some(camera.id));

        let Some(quad) = *self.quad.read() else {
            return false;
        };
        merge.set_alpha_mode(self.alpha_mode);
        merge.set_uniform("intensity", self.intensity);
        if merge.activate(fc, camera, Some(input), false).is_err() {
            return false;
        }
        let Some(bound) = merge.apply(fc) else {
            return false;
        };
        fc.gpu.bind_framebuffer(scene_target);
        merge.draw(fc.gpu, &quad, bound);

        self.notify(LayerEvent::AfterCompose, Some(camera.id));
        true
    }

    /// Run `chain` from `input` into `output`
    pub fn blur(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        chain: &mut PassChain,
        input: TextureHandle,
        output: TextureHandle,
    ) -> u32 {
        self.state = LayerState::Blurring;
        if !chain.prepare_frame(fc, camera, Some(input)) {
            return 0;
        }
        chain.finalize_frame(fc, Some(output), false).draw_calls
    }

    fn invalidate(&mut self) {
        self.main_texture.invalidate();
        if let Some(extract) = &mut self.extract {
            extract.invalidate();
        }
        self.state = LayerState::Disabled;
    }

    fn dispose(&mut self, gpu: &mut dyn GraphicsContext, pool: &mut RenderTargetPool) {
        self.notify(LayerEvent::Dispose, None);
        self.main_texture.release(gpu);
        if let Some(extract) = &mut self.extract {
            extract.dispose(gpu, pool);
        }
        self.observers.clear();
        self.state = LayerState::Disabled;
    }
}

impl std::fmt::Debug for EffectLayerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectLayerCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("intensity", &self.intensity)
            .field("meshes", &self.meshes.len())
            .field("state", &self.state)
            .finish()
    }
}

/// A mesh-driven effect composited onto the scene color
pub trait EffectLayer: Send {
    fn core(&self) -> &EffectLayerCore;

    fn core_mut(&mut self) -> &mut EffectLayerCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn id(&self) -> LayerId {
        self.core().id()
    }

    /// Poll every effect the layer uses. Never blocks.
    fn is_ready(&mut self, gpu: &mut dyn GraphicsContext) -> bool;

    /// Whether the merge relies on the scene's stencil buffer
    fn need_stencil(&self) -> bool {
        false
    }

    /// Whether a registered mesh adds something to the layer
    fn contributes(&self, mesh: &EffectMesh) -> bool {
        self.core().in_rendering_group(mesh)
    }

    fn should_render(&self) -> bool {
        let core = self.core();
        core.is_enabled() && core.meshes().iter().any(|m| self.contributes(m))
    }

    /// Build the pass that blends the layer onto the scene color
    fn create_merge_effect(&self) -> PostProcess;

    /// Configure the extract pass for a mesh. False skips the mesh.
    fn set_emissive_texture_and_color(&self, mesh: &EffectMesh, extract: &mut PostProcess) -> bool;

    /// Blur the extracted main texture and merge it onto `scene_target`
    fn internal_render(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        main_texture: TextureHandle,
        scene_target: TextureHandle,
    ) -> LayerStats;

    /// Extract, blur and merge for one camera
    fn render(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        scene_target: TextureHandle,
    ) -> LayerStats {
        let mut stats = LayerStats::default();
        if !self.should_render() {
            self.core_mut().set_state(LayerState::Disabled);
            return stats;
        }
        if !self.is_ready(fc.gpu) {
            fc.diagnostics.report(
                DiagnosticKind::NotReady,
                self.name().to_string(),
                "effects still compiling or failed; layer skipped",
            );
            return stats;
        }

        self.core_mut().set_state(LayerState::Preparing);
        self.core_mut()
            .notify(LayerEvent::BeforeRenderMainTexture, Some(camera.id));
        let Some(main) = self.core_mut().ensure_main_texture(fc, camera) else {
            self.core_mut().set_state(LayerState::Disabled);
            return stats;
        };
        let extracted = render_main_texture(self, fc, camera, main, &mut stats);
        if extracted == 0 {
            log::trace!("Layer '{}' extracted nothing", self.name());
            self.core_mut().set_state(LayerState::Disabled);
            return stats;
        }

        let inner = self.internal_render(fc, camera, main, scene_target);
        stats.draw_calls += inner.draw_calls;
        stats.composed = inner.composed;
        self.core_mut().set_state(LayerState::Disabled);
        stats
    }

    /// Forget backend handles after a context loss; textures and effects
    /// are recreated on the next render
    fn rebuild(&mut self, gpu: &mut dyn GraphicsContext) -> Result<()>;

    /// Return pooled intermediates held by the layer's chains
    fn release_targets(&mut self, pool: &mut RenderTargetPool);

    fn dispose(&mut self, gpu: &mut dyn GraphicsContext, pool: &mut RenderTargetPool);

    fn has_mesh(&self, mesh: MeshId) -> bool {
        self.core().has_mesh(mesh)
    }

    fn camera(&self) -> &[CameraId] {
        self.core().cameras()
    }

    fn applies_to(&self, camera: CameraId) -> bool {
        self.core().applies_to(camera)
    }

    fn rendering_group(&self) -> Option<u8> {
        self.core().rendering_group()
    }
}

/// Draw every contributing mesh's emissive buffer into the main texture.
/// Returns the number of meshes drawn.
fn render_main_texture<L: EffectLayer + ?Sized>(
    layer: &mut L,
    fc: &mut FrameContext<'_>,
    camera: &Camera,
    main: TextureHandle,
    stats: &mut LayerStats,
) -> u32 {
    let Some(quad) = *layer.core().quad().read() else {
        return 0;
    };
    let Some(mut extract) = layer.core_mut().extract.take() else {
        return 0;
    };
    // Extraction writes the main texture, not the viewport
    let (width, height) = layer.core().main_texture_size(camera);
    extract.options_mut().fixed_size = Some((width, height));

    fc.gpu.bind_framebuffer(main);
    fc.gpu.clear(layer.core().neutral_color());

    let mut drawn = 0;
    let meshes = layer.core().meshes().to_vec();
    for mesh in &meshes {
        if !layer.contributes(mesh) {
            continue;
        }
        let Some(emissive) = mesh.emissive else {
            fc.diagnostics.report(
                DiagnosticKind::MissingAuxiliaryBuffer,
                format!("{}/{}", layer.name(), mesh.id),
                "mesh has no emissive buffer; skipped",
            );
            stats.meshes_skipped += 1;
            continue;
        };
        if !layer.set_emissive_texture_and_color(mesh, &mut extract) {
            continue;
        }
        extract.set_sampler(EMISSIVE_SAMPLER, SamplerSource::Texture(emissive));

        if extract.activate(fc, camera, None, false).is_err() {
            stats.meshes_skipped += 1;
            continue;
        }
        let Some(bound) = extract.apply(fc) else {
            stats.meshes_skipped += 1;
            continue;
        };
        fc.gpu.bind_framebuffer(main);
        extract.draw(fc.gpu, &quad, bound);
        stats.draw_calls += 1;
        stats.meshes_drawn += 1;
        drawn += 1;
    }

    layer.core_mut().extract = Some(extract);
    drawn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessContext;
    use crate::quad::shared_quad;

    #[test]
    fn test_mesh_registration() {
        let mut core = EffectLayerCore::new("layer", shared_quad());
        let mesh = MeshId::new();
        core.add_mesh(EffectMesh::new(mesh, None));
        core.add_mesh(EffectMesh::new(mesh, None).with_color(Color::BLACK));

        assert_eq!(core.meshes().len(), 1);
        assert_eq!(core.mesh(mesh).unwrap().color, Color::BLACK);
        assert_eq!(core.mesh_intensity(mesh), 1.0);

        core.set_mesh_intensity(mesh, 0.25);
        assert_eq!(core.mesh_intensity(mesh), 0.25);

        core.remove_mesh(mesh);
        assert!(!core.has_mesh(mesh));
        assert_eq!(core.mesh_intensity(mesh), 1.0);
    }

    #[test]
    fn test_camera_filter() {
        let mut core = EffectLayerCore::new("layer", shared_quad());
        let a = CameraId::new();
        let b = CameraId::new();
        assert!(core.applies_to(a));

        core.add_camera(a);
        assert!(core.applies_to(a));
        assert!(!core.applies_to(b));
    }

    #[test]
    fn test_rendering_group_filter() {
        let mut core = EffectLayerCore::new("layer", shared_quad());
        let mesh = EffectMesh::new(MeshId::new(), None).with_rendering_group(2);
        assert!(core.in_rendering_group(&mesh));
        core.set_rendering_group(Some(1));
        assert!(!core.in_rendering_group(&mesh));
    }

    #[test]
    fn test_main_texture_size() {
        let mut core = EffectLayerCore::new("layer", shared_quad());
        let camera = Camera::new("main", 101, 50);
        assert_eq!(core.main_texture_size(&camera), (50, 25));

        core.set_main_texture_fixed_size(Some(64));
        assert_eq!(core.main_texture_size(&camera), (64, 64));
    }

    #[test]
    fn test_owned_texture_recreated_after_context_loss() {
        let mut gpu = HeadlessContext::new(8, 8);
        let mut texture = OwnedTexture::default();

        let (first, created) = texture.ensure(&mut gpu, 4, 4, TextureFormat::Rgba8Unorm).unwrap();
        assert!(created);
        let (same, created) = texture.ensure(&mut gpu, 4, 4, TextureFormat::Rgba8Unorm).unwrap();
        assert!(!created);
        assert_eq!(first, same);

        gpu.lose_context();
        let (second, created) = texture.ensure(&mut gpu, 4, 4, TextureFormat::Rgba8Unorm).unwrap();
        assert!(created);
        assert_ne!(first, second);
        assert_eq!(gpu.texture_size(second), Some((4, 4)));
    }
}
