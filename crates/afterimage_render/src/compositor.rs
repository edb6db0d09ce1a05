//! Compositor
//!
//! Drives post-processing for every camera of a frame. For each camera, in
//! the order the frame inputs are given:
//!
//! 1. the effect layers bound to the camera composite onto its scene color,
//!    in registration order
//! 2. the camera's pass chain runs from the scene color into the requested
//!    target, or the screen
//!
//! The compositor owns the render target pool, the shared full-screen quad
//! and the diagnostics channel. Each frame it lends them, together with the
//! caller's graphics context, to passes and layers through a [`FrameContext`].
//!
//! A change of the context generation means the device was reset; with
//! `auto_rebuild` the compositor rebuilds itself before drawing.

use crate::camera::{Camera, CameraId, Scene};
use crate::config::CompositorConfig;
use crate::context::GraphicsContext;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::effect_layer::{EffectLayer, LayerId};
use crate::error::{PostProcessError, Result};
use crate::pass::chain::restore_state;
use crate::pass::{ChainStats, PassChain, PassId, PostProcess};
use crate::quad::{shared_quad, ScreenQuad, SharedQuad};
use crate::resource::TextureHandle;
use crate::target_pool::RenderTargetPool;

/// Everything a pass or layer needs while drawing one frame
pub struct FrameContext<'a> {
    pub gpu: &'a mut dyn GraphicsContext,
    pub pool: &'a mut RenderTargetPool,
    pub quad: &'a SharedQuad,
    pub diagnostics: &'a mut Diagnostics,
    pub frame: u64,
}

impl<'a> FrameContext<'a> {
    pub fn new(
        gpu: &'a mut dyn GraphicsContext,
        pool: &'a mut RenderTargetPool,
        quad: &'a SharedQuad,
        diagnostics: &'a mut Diagnostics,
        frame: u64,
    ) -> Self {
        Self {
            gpu,
            pool,
            quad,
            diagnostics,
            frame,
        }
    }

    /// Quad buffers, None until the compositor created them
    pub fn screen_quad(&self) -> Option<ScreenQuad> {
        *self.quad.read()
    }
}

/// One camera's input for a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInput {
    pub camera: CameraId,
    /// Scene color rendered by the camera
    pub source: TextureHandle,
    /// Destination texture, None presents to the screen
    pub target: Option<TextureHandle>,
}

impl FrameInput {
    pub fn to_screen(camera: CameraId, source: TextureHandle) -> Self {
        Self {
            camera,
            source,
            target: None,
        }
    }

    pub fn to_texture(camera: CameraId, source: TextureHandle, target: TextureHandle) -> Self {
        Self {
            camera,
            source,
            target: Some(target),
        }
    }
}

/// Outcome of one compositor frame
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub cameras_rendered: u32,
    pub cameras_abandoned: u32,
    pub layers_rendered: u32,
    pub draw_calls: u32,
    pub passes_skipped: u32,
    /// The compositor rebuilt itself after a context loss this frame
    pub rebuilt: bool,
}

/// Compositor frame state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositorState {
    Idle,
    Running,
    Finalizing,
    Done,
}

/// Pass chain registered for a camera
#[derive(Debug)]
pub struct CameraPipeline {
    pub camera_id: CameraId,
    pub chain: PassChain,
}

/// Per-camera post-processing driver
pub struct Compositor {
    config: CompositorConfig,
    pool: RenderTargetPool,
    quad: SharedQuad,
    diagnostics: Diagnostics,
    pipelines: Vec<CameraPipeline>,
    layers: Vec<Box<dyn EffectLayer>>,
    frame: u64,
    last_generation: Option<u64>,
    active_camera: Option<CameraId>,
    state: CompositorState,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self {
            config,
            pool: RenderTargetPool::new(),
            quad: shared_quad(),
            diagnostics: Diagnostics::new(),
            pipelines: Vec::new(),
            layers: Vec::new(),
            frame: 0,
            last_generation: None,
            active_camera: None,
            state: CompositorState::Idle,
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Quad reference to hand to effect layers
    pub fn shared_quad(&self) -> SharedQuad {
        self.quad.clone()
    }

    pub fn pool(&self) -> &RenderTargetPool {
        &self.pool
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn state(&self) -> CompositorState {
        self.state
    }

    pub fn active_camera(&self) -> Option<CameraId> {
        self.active_camera
    }

    /// Frames rendered so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn pipelines(&self) -> &[CameraPipeline] {
        &self.pipelines
    }

    // Pass management

    /// Append a pass to a camera's chain, creating the chain on first use
    pub fn add_pass(&mut self, camera: CameraId, pass: PostProcess) -> PassId {
        self.chain_entry(camera).add(pass)
    }

    /// Detach a pass from a camera's chain
    pub fn remove_pass(&mut self, camera: CameraId, id: PassId) -> Option<PostProcess> {
        self.chain_mut(camera)?.remove(id)
    }

    pub fn pass_mut(&mut self, camera: CameraId, id: PassId) -> Option<&mut PostProcess> {
        self.chain_mut(camera)?.pass_mut(id)
    }

    pub fn chain(&self, camera: CameraId) -> Option<&PassChain> {
        self.pipelines
            .iter()
            .find(|p| p.camera_id == camera)
            .map(|p| &p.chain)
    }

    pub fn chain_mut(&mut self, camera: CameraId) -> Option<&mut PassChain> {
        self.pipelines
            .iter_mut()
            .find(|p| p.camera_id == camera)
            .map(|p| &mut p.chain)
    }

    fn chain_entry(&mut self, camera: CameraId) -> &mut PassChain {
        let index = match self.pipelines.iter().position(|p| p.camera_id == camera) {
            Some(index) => index,
            None => {
                let mut chain = PassChain::new(format!("camera{}", camera.id().index()));
                chain.set_discard_intermediates(self.config.discard_intermediates);
                chain.set_target_format(self.config.target_format);
                self.pipelines.push(CameraPipeline {
                    camera_id: camera,
                    chain,
                });
                self.pipelines.len() - 1
            }
        };
        &mut self.pipelines[index].chain
    }

    // Layer management

    /// Register an effect layer. Layers run in registration order.
    pub fn add_layer(&mut self, layer: Box<dyn EffectLayer>) -> LayerId {
        let id = layer.id();
        log::debug!("Registered effect layer '{}'", layer.name());
        self.layers.push(layer);
        id
    }

    pub fn layer(&self, id: LayerId) -> Option<&dyn EffectLayer> {
        self.layers.iter().find(|l| l.id() == id).map(|l| l.as_ref())
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut (dyn EffectLayer + 'static)> {
        self.layers
            .iter_mut()
            .find(|l| l.id() == id)
            .map(|l| l.as_mut())
    }

    /// Detach a layer and release its resources
    pub fn remove_layer(&mut self, gpu: &mut dyn GraphicsContext, id: LayerId) -> bool {
        let Some(index) = self.layers.iter().position(|l| l.id() == id) else {
            return false;
        };
        let mut layer = self.layers.remove(index);
        layer.dispose(gpu, &mut self.pool);
        true
    }

    pub fn layers(&self) -> impl Iterator<Item = &dyn EffectLayer> {
        self.layers.iter().map(|l| l.as_ref())
    }

    // Frame driving

    /// Post-process every camera of the frame
    pub fn render(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        scene: &Scene,
        inputs: &[FrameInput],
    ) -> FrameStats {
        let mut stats = self.begin_frame(gpu);
        if !self.ensure_quad(gpu) {
            self.state = CompositorState::Done;
            return stats;
        }
        self.state = CompositorState::Running;

        let Self {
            pool,
            quad,
            diagnostics,
            pipelines,
            layers,
            active_camera,
            frame,
            ..
        } = self;

        for input in inputs {
            let camera = match scene.camera(input.camera) {
                Some(camera) if scene.post_processes_enabled => camera,
                _ => {
                    log::debug!("Abandoning post-processing for camera {}", input.camera);
                    if let Some(pipeline) = pipelines.iter_mut().find(|p| p.camera_id == input.camera) {
                        pipeline.chain.abandon(pool);
                    }
                    stats.cameras_abandoned += 1;
                    continue;
                }
            };
            *active_camera = Some(camera.id);

            let mut fc = FrameContext::new(&mut *gpu, &mut *pool, &*quad, &mut *diagnostics, *frame);

            for layer in layers.iter_mut() {
                if !layer.applies_to(camera.id) || !layer.should_render() {
                    continue;
                }
                let layer_stats = layer.render(&mut fc, camera, input.source);
                stats.draw_calls += layer_stats.draw_calls;
                if layer_stats.composed {
                    stats.layers_rendered += 1;
                }
            }
            restore_state(fc.gpu);

            if let Some(pipeline) = pipelines.iter_mut().find(|p| p.camera_id == camera.id) {
                let chain = &mut pipeline.chain;
                if chain.prepare_frame(&mut fc, camera, Some(input.source)) {
                    let chain_stats = chain.finalize_frame(&mut fc, input.target, false);
                    stats.draw_calls += chain_stats.draw_calls;
                    stats.passes_skipped += chain_stats.passes_skipped;
                }
            }
            stats.cameras_rendered += 1;
        }

        self.end_frame(gpu);
        stats
    }

    /// Start the active camera's chain for a frame.
    ///
    /// False when the camera is gone, post-processing is off or the chain
    /// has nothing enabled. Pair with [`Compositor::finalize_frame`].
    pub fn prepare_frame(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        scene: &Scene,
        camera: CameraId,
        source: TextureHandle,
    ) -> bool {
        self.begin_frame(gpu);
        if !self.ensure_quad(gpu) {
            return false;
        }
        let Some(cam) = scene.camera(camera) else {
            return false;
        };
        if !scene.post_processes_enabled {
            return false;
        }

        let Self {
            pool,
            quad,
            diagnostics,
            pipelines,
            frame,
            ..
        } = self;
        let Some(pipeline) = pipelines.iter_mut().find(|p| p.camera_id == camera) else {
            return false;
        };
        let mut fc = FrameContext::new(gpu, pool, quad, diagnostics, *frame);
        if !pipeline.chain.prepare_frame(&mut fc, cam, Some(source)) {
            return false;
        }
        self.active_camera = Some(camera);
        self.state = CompositorState::Running;
        true
    }

    /// Finish the frame started by [`Compositor::prepare_frame`]
    pub fn finalize_frame(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        target: Option<TextureHandle>,
        do_not_present: bool,
    ) -> ChainStats {
        let Some(camera) = self.active_camera else {
            return ChainStats::default();
        };
        if self.state != CompositorState::Running {
            log::debug!("Compositor finalized without a prepared frame");
            return ChainStats::default();
        }
        self.state = CompositorState::Finalizing;

        let Self {
            pool,
            quad,
            diagnostics,
            pipelines,
            frame,
            ..
        } = self;
        let stats = match pipelines.iter_mut().find(|p| p.camera_id == camera) {
            Some(pipeline) => {
                let mut fc = FrameContext::new(&mut *gpu, pool, quad, diagnostics, *frame);
                pipeline.chain.finalize_frame(&mut fc, target, do_not_present)
            }
            None => ChainStats::default(),
        };

        // A kept output stays valid until the next frame starts
        if !do_not_present || target.is_some() {
            self.end_frame(gpu);
        } else {
            self.state = CompositorState::Done;
        }
        stats
    }

    /// Run an external chain outside the per-camera bookkeeping
    pub fn direct_render(
        &mut self,
        gpu: &mut dyn GraphicsContext,
        chain: &mut PassChain,
        camera: &Camera,
        source: TextureHandle,
        target: Option<TextureHandle>,
    ) -> ChainStats {
        self.begin_frame(gpu);
        if !self.ensure_quad(gpu) {
            return ChainStats::default();
        }
        let mut fc = FrameContext::new(
            &mut *gpu,
            &mut self.pool,
            &self.quad,
            &mut self.diagnostics,
            self.frame,
        );
        let stats = chain.direct_render(&mut fc, camera, Some(source), target);
        chain.release_targets(&mut self.pool);
        self.end_frame(gpu);
        stats
    }

    /// Recover from a context loss: quad, pooled targets, effects and layer
    /// resources are recreated. Every component is attempted; the first
    /// failure is returned.
    pub fn rebuild(&mut self, gpu: &mut dyn GraphicsContext) -> Result<()> {
        log::info!("Rebuilding compositor for context generation {}", gpu.generation());
        let mut first_error = None;

        {
            let mut slot = self.quad.write();
            if let Some(old) = slot.take() {
                if old.is_current(gpu) {
                    old.release(gpu);
                }
            }
            match ScreenQuad::create(gpu) {
                Ok(quad) => *slot = Some(quad),
                Err(e) => first_error = Some(PostProcessError::from(e)),
            }
        }

        for pipeline in &mut self.pipelines {
            pipeline.chain.invalidate();
        }
        if let Err(e) = self.pool.rebuild_all(gpu) {
            first_error.get_or_insert(e);
        }
        for layer in &mut self.layers {
            if let Err(e) = layer.rebuild(gpu) {
                first_error.get_or_insert(e);
            }
        }

        self.last_generation = Some(gpu.generation());
        self.active_camera = None;
        self.state = CompositorState::Idle;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Release every resource the compositor and its layers own
    pub fn dispose(&mut self, gpu: &mut dyn GraphicsContext) {
        for pipeline in &mut self.pipelines {
            pipeline.chain.dispose(gpu, &mut self.pool);
        }
        for layer in &mut self.layers {
            layer.dispose(gpu, &mut self.pool);
        }
        self.pool.dispose(gpu);
        if let Some(quad) = self.quad.write().take() {
            if quad.is_current(gpu) {
                quad.release(gpu);
            }
        }
        self.active_camera = None;
        self.state = CompositorState::Idle;
        log::info!("Compositor disposed");
    }

    fn begin_frame(&mut self, gpu: &mut dyn GraphicsContext) -> FrameStats {
        self.frame += 1;
        self.diagnostics.set_frame(self.frame);
        let mut stats = FrameStats {
            frame: self.frame,
            ..Default::default()
        };

        let generation = gpu.generation();
        if let Some(last) = self.last_generation.filter(|&g| g != generation) {
            self.diagnostics.report(
                DiagnosticKind::ContextLoss,
                format!("generation{}", generation),
                format!("context generation changed from {} to {}", last, generation),
            );
            if self.config.auto_rebuild {
                if let Err(e) = self.rebuild(gpu) {
                    log::warn!("Compositor rebuild incomplete: {}", e);
                }
                stats.rebuilt = true;
            }
        }
        self.last_generation = Some(generation);
        stats
    }

    fn ensure_quad(&mut self, gpu: &mut dyn GraphicsContext) -> bool {
        let mut slot = self.quad.write();
        if slot.map_or(false, |q| q.is_current(gpu)) {
            return true;
        }
        match ScreenQuad::create(gpu) {
            Ok(quad) => {
                *slot = Some(quad);
                true
            }
            Err(e) => {
                self.diagnostics.report(
                    DiagnosticKind::ResourceExhaustion,
                    "quad",
                    format!("full-screen quad creation failed: {}", e),
                );
                false
            }
        }
    }

    fn end_frame(&mut self, gpu: &mut dyn GraphicsContext) {
        for pipeline in &mut self.pipelines {
            pipeline.chain.release_targets(&mut self.pool);
        }
        for layer in &mut self.layers {
            layer.release_targets(&mut self.pool);
        }
        self.pool.end_frame();
        if self.config.trim_idle_frames > 0 {
            self.pool.trim(gpu, self.config.trim_idle_frames);
        }
        self.state = CompositorState::Done;
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(CompositorConfig::default())
    }
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("frame", &self.frame)
            .field("state", &self.state)
            .field("pipelines", &self.pipelines.len())
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessContext;
    use crate::pass::{builtin, PassOptions};
    use crate::resource::TextureFormat;

    fn setup(size: u32) -> (HeadlessContext, Scene, CameraId, Compositor) {
        let gpu = HeadlessContext::new(size, size);
        let mut scene = Scene::new();
        let camera = scene.add_camera(Camera::new("main", size, size));
        (gpu, scene, camera, Compositor::default())
    }

    #[test]
    fn test_render_runs_camera_chain() {
        let (mut gpu, scene, camera, mut compositor) = setup(8);
        compositor.add_pass(camera, builtin::grayscale());
        compositor.add_pass(camera, builtin::pass_through());
        let source = gpu.create_filled_texture(8, 8, [1.0, 0.0, 0.0, 1.0]);

        let stats = compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, source)]);

        assert_eq!(stats.cameras_rendered, 1);
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(compositor.state(), CompositorState::Done);
        assert_eq!(compositor.active_camera(), Some(camera));
        assert_eq!(compositor.pool().in_use_count(), 0);
    }

    #[test]
    fn test_disabled_post_processing_abandons_camera() {
        let (mut gpu, mut scene, camera, mut compositor) = setup(8);
        compositor.add_pass(camera, builtin::grayscale());
        scene.post_processes_enabled = false;
        let source = gpu.create_filled_texture(8, 8, [1.0; 4]);

        let stats = compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, source)]);

        assert_eq!(stats.cameras_abandoned, 1);
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(gpu.draw_count(), 0);
    }

    #[test]
    fn test_removed_camera_is_abandoned() {
        let (mut gpu, mut scene, camera, mut compositor) = setup(8);
        compositor.add_pass(camera, builtin::grayscale());
        let source = gpu.create_filled_texture(8, 8, [1.0; 4]);
        scene.remove_camera(camera);

        let stats = compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, source)]);
        assert_eq!(stats.cameras_abandoned, 1);
        assert_eq!(stats.cameras_rendered, 0);
    }

    #[test]
    fn test_generation_change_triggers_rebuild() {
        let (mut gpu, scene, camera, mut compositor) = setup(8);
        compositor.add_pass(camera, builtin::grayscale());
        let source = gpu.create_filled_texture(8, 8, [1.0; 4]);
        compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, source)]);

        gpu.lose_context();
        let source = gpu.create_filled_texture(8, 8, [1.0; 4]);
        let stats = compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, source)]);

        assert!(stats.rebuilt);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(compositor.diagnostics().count(DiagnosticKind::ContextLoss), 1);
    }

    #[test]
    fn test_prepare_and_finalize() {
        let (mut gpu, scene, camera, mut compositor) = setup(8);
        compositor.add_pass(camera, builtin::pass_through());
        compositor.add_pass(camera, builtin::grayscale());
        let source = gpu.create_filled_texture(8, 8, [0.0, 1.0, 0.0, 1.0]);
        let target = gpu.create_filled_texture(8, 8, [0.0; 4]);

        assert!(compositor.prepare_frame(&mut gpu, &scene, camera, source));
        assert_eq!(compositor.state(), CompositorState::Running);
        let stats = compositor.finalize_frame(&mut gpu, Some(target), false);

        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.output, Some(target));
        assert_eq!(compositor.state(), CompositorState::Done);
        assert!(gpu.depth_buffer() && gpu.depth_write());
    }

    #[test]
    fn test_target_format_applies_to_added_passes() {
        let (mut gpu, scene, camera, _) = setup(8);
        let mut compositor = Compositor::new(CompositorConfig {
            target_format: TextureFormat::Rgba16Float,
            ..Default::default()
        });
        compositor.add_pass(camera, builtin::grayscale());
        compositor.add_pass(
            camera,
            builtin::pass_through().with_options(PassOptions {
                format: Some(TextureFormat::Rgba32Float),
                ..Default::default()
            }),
        );
        compositor.add_pass(camera, builtin::pass_through());
        let source = gpu.create_filled_texture(8, 8, [1.0; 4]);

        compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, source)]);

        let formats: Vec<TextureFormat> = compositor
            .pool()
            .targets()
            .iter()
            .map(|t| t.desc.format)
            .collect();
        assert_eq!(formats, vec![TextureFormat::Rgba16Float, TextureFormat::Rgba32Float]);
    }

    #[test]
    fn test_prepare_without_chain_is_false() {
        let (mut gpu, scene, camera, mut compositor) = setup(8);
        let source = gpu.create_filled_texture(8, 8, [1.0; 4]);
        assert!(!compositor.prepare_frame(&mut gpu, &scene, camera, source));
    }

    #[test]
    fn test_dispose_releases_everything() {
        let (mut gpu, scene, camera, mut compositor) = setup(8);
        compositor.add_pass(camera, builtin::pass_through());
        compositor.add_pass(camera, builtin::grayscale());
        let source = gpu.create_filled_texture(8, 8, [1.0; 4]);
        compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, source)]);

        compositor.dispose(&mut gpu);
        assert_eq!(compositor.pool().live_count(), 0);
        assert_eq!(gpu.live_effect_count(), 0);
        assert_eq!(gpu.live_buffer_count(), 0);
        // Only the caller's source remains
        assert_eq!(gpu.live_texture_count(), 1);
    }
}
