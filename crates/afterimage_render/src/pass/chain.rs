//! Pass Chain
//!
//! An ordered list of passes where each pass reads the previous pass's
//! output. A frame runs through `Idle → Running → Finalizing → Done`:
//!
//! 1. `prepare_frame` activates every pass, each with the previous pass's
//!    output as its source
//! 2. `finalize_frame` applies and draws every pass in order into its
//!    pooled target
//! 3. the last pass draws into the requested texture, or the screen
//! 4. depth test, depth write, opaque blending and stencil-off are restored
//!
//! A target goes back to the pool as soon as the pass two steps later is
//! activated, since the pass in between has drawn from it by the time that
//! pass draws. A chain of any length at one resolution ping-pongs between
//! two targets.
//!
//! A pass that is not ready, or whose target could not be allocated, is
//! skipped: the next pass receives the skipped pass's input. If the last
//! pass is skipped its input is copied to the destination instead.

use crate::camera::Camera;
use crate::compositor::FrameContext;
use crate::context::GraphicsContext;
use crate::diagnostics::DiagnosticKind;
use crate::error::PostProcessError;
use crate::pass::builtin;
use crate::pass::{PassId, PostProcess};
use crate::resource::{AlphaMode, StencilState, TextureFormat, TextureHandle};
use crate::target_pool::RenderTargetPool;

/// Per-frame chain state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    Running,
    Finalizing,
    /// Frame complete; the next `prepare_frame` starts from Idle again
    Done,
}

/// Outcome of one chain run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub draw_calls: u32,
    pub passes_drawn: u32,
    pub passes_skipped: u32,
    /// Where the result ended up: the destination texture, or with
    /// `do_not_present` the last pass's pooled output
    pub output: Option<TextureHandle>,
}

/// Ordered passes feeding one another
pub struct PassChain {
    name: String,
    passes: Vec<PostProcess>,
    discard_intermediates: bool,
    target_format: TextureFormat,
    state: ChainState,
    copy_pass: Option<PostProcess>,

    camera: Option<Camera>,
    source: Option<TextureHandle>,
    plan: Vec<PlannedPass>,
}

/// How `prepare_frame` activated one enabled pass
#[derive(Clone, Copy, Debug)]
struct PlannedPass {
    index: usize,
    activated: bool,
    off_screen: bool,
}

impl PassChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: Vec::new(),
            discard_intermediates: true,
            target_format: TextureFormat::default(),
            state: ChainState::Idle,
            copy_pass: None,
            camera: None,
            source: None,
            plan: Vec::new(),
        }
    }

    pub fn with_passes(name: impl Into<String>, passes: Vec<PostProcess>) -> Self {
        let mut chain = Self::new(name);
        for pass in passes {
            chain.add(pass);
        }
        chain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a pass
    pub fn add(&mut self, pass: PostProcess) -> PassId {
        let pass = self.adopt(pass);
        let id = pass.id();
        self.passes.push(pass);
        id
    }

    pub fn insert(&mut self, index: usize, pass: PostProcess) -> PassId {
        let pass = self.adopt(pass);
        let id = pass.id();
        self.passes.insert(index.min(self.passes.len()), pass);
        id
    }

    fn adopt(&self, mut pass: PostProcess) -> PostProcess {
        if pass.options().format.is_none() {
            pass.options_mut().format = Some(self.target_format);
        }
        pass
    }

    /// Detach a pass; the caller owns its resources afterwards
    pub fn remove(&mut self, id: PassId) -> Option<PostProcess> {
        let index = self.passes.iter().position(|p| p.id() == id)?;
        Some(self.passes.remove(index))
    }

    pub fn pass(&self, id: PassId) -> Option<&PostProcess> {
        self.passes.iter().find(|p| p.id() == id)
    }

    pub fn pass_mut(&mut self, id: PassId) -> Option<&mut PostProcess> {
        self.passes.iter_mut().find(|p| p.id() == id)
    }

    pub fn passes(&self) -> &[PostProcess] {
        &self.passes
    }

    pub fn passes_mut(&mut self) -> &mut [PostProcess] {
        &mut self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.passes.iter().filter(|p| p.is_enabled()).count()
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn discard_intermediates(&self) -> bool {
        self.discard_intermediates
    }

    pub fn set_discard_intermediates(&mut self, discard: bool) {
        self.discard_intermediates = discard;
    }

    pub fn target_format(&self) -> TextureFormat {
        self.target_format
    }

    /// Format given to passes added from now on without one of their own
    pub fn set_target_format(&mut self, format: TextureFormat) {
        self.target_format = format;
    }

    fn enabled_indices(&self) -> Vec<usize> {
        self.passes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_enabled())
            .map(|(i, _)| i)
            .collect()
    }

    /// Start a frame. False when there is nothing to do (no enabled pass);
    /// the chain then stays Idle.
    ///
    /// Every enabled pass is activated here, each with the previous pass's
    /// output as its source, so the linkage can be inspected before
    /// `finalize_frame` draws. The last pass is activated for the screen.
    /// With `discard_intermediates`, activating pass `k` returns the target
    /// pass `k - 1` reads to the pool: pass `k - 1` draws before pass `k`,
    /// so a same-size chain ping-pongs between two targets. Until the frame
    /// is finalized nothing else may acquire from the pool.
    pub fn prepare_frame(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        source: Option<TextureHandle>,
    ) -> bool {
        if self.state == ChainState::Running || self.state == ChainState::Finalizing {
            log::warn!("Chain '{}' prepared twice without finalizing", self.name);
            self.release_targets(fc.pool);
        }
        self.state = ChainState::Idle;
        self.plan.clear();

        let enabled = self.enabled_indices();
        if enabled.is_empty() {
            log::trace!("Chain '{}' has no enabled pass", self.name);
            return false;
        }

        self.camera = Some(camera.clone());
        self.source = source;

        let mut input = source;
        let mut input_owner: Option<usize> = None;
        // Owner of the texture the previously activated pass reads
        let mut consumed: Option<usize> = None;

        for (pos, &index) in enabled.iter().enumerate() {
            let is_last = pos + 1 == enabled.len();
            if !is_last && self.discard_intermediates {
                if let Some(owner) = consumed {
                    if !self.passes[owner].is_reusable() {
                        self.passes[owner].release_output(fc.pool);
                    }
                }
            }

            let activated = self.passes[index]
                .activate(fc, camera, input, !is_last)
                .is_ok();
            self.plan.push(PlannedPass {
                index,
                activated,
                off_screen: !is_last,
            });

            if activated && !is_last {
                consumed = input_owner;
                input = self.passes[index].output_texture();
                input_owner = Some(index);
            }
        }

        self.state = ChainState::Running;
        true
    }

    /// Run the prepared frame into `target`, or the screen when None.
    ///
    /// With `do_not_present` and no target, the last pass renders into a
    /// pooled target reported as [`ChainStats::output`]. A pass whose
    /// activation failed is skipped; so is a pass that is not ready, and the
    /// passes after it are then activated again with the input they really
    /// receive.
    pub fn finalize_frame(
        &mut self,
        fc: &mut FrameContext<'_>,
        target: Option<TextureHandle>,
        do_not_present: bool,
    ) -> ChainStats {
        let mut stats = ChainStats::default();
        if self.state != ChainState::Running {
            log::debug!("Chain '{}' finalized without a prepared frame", self.name);
            return stats;
        }

        let Some(camera) = self.camera.take() else {
            self.state = ChainState::Idle;
            return stats;
        };
        let quad = match fc.screen_quad() {
            Some(quad) => quad,
            None => {
                let err = PostProcessError::MisconfiguredChain(
                    "full-screen quad not created".to_string(),
                );
                fc.diagnostics.report(
                    DiagnosticKind::MisconfiguredChain,
                    format!("{}/quad", self.name),
                    err.to_string(),
                );
                self.abandon(fc.pool);
                restore_state(fc.gpu);
                self.state = ChainState::Done;
                return stats;
            }
        };

        let plan = std::mem::take(&mut self.plan);
        let keep_output = do_not_present && target.is_none();
        let mut input = self.source;
        let mut input_owner: Option<usize> = None;

        for (pos, step) in plan.iter().enumerate() {
            let index = step.index;
            // Passes removed since the frame was prepared
            if index >= self.passes.len() {
                stats.passes_skipped += 1;
                continue;
            }
            let is_last = pos + 1 == plan.len();
            if is_last {
                self.state = ChainState::Finalizing;
            }
            let off_screen = !is_last || keep_output;

            let activated = step.activated
                && ((self.passes[index].input_texture() == input && step.off_screen == off_screen)
                    || self.reactivate(fc, &camera, index, input, off_screen));
            if !activated {
                stats.passes_skipped += 1;
                if is_last && !keep_output {
                    self.copy_to_destination(fc, &camera, input, target, &mut stats);
                }
                continue;
            }

            let Some(bound) = self.passes[index].apply(fc) else {
                stats.passes_skipped += 1;
                self.passes[index].release_output(fc.pool);
                if is_last && !keep_output {
                    self.copy_to_destination(fc, &camera, input, target, &mut stats);
                }
                continue;
            };

            let pass = &mut self.passes[index];
            if off_screen {
                pass.bind_output(fc.gpu);
            } else {
                bind_destination(fc.gpu, target);
                if pass.options().auto_clear {
                    fc.gpu.clear(pass.options().clear_color);
                }
            }
            pass.draw(fc.gpu, &quad, bound);
            stats.draw_calls += 1;
            stats.passes_drawn += 1;

            if self.discard_intermediates {
                if let Some(owner) = input_owner {
                    if !self.passes[owner].is_reusable() {
                        self.passes[owner].release_output(fc.pool);
                    }
                }
            }
            if off_screen {
                input = self.passes[index].output_texture();
                input_owner = Some(index);
            }
        }

        // Without discarding, intermediates stay held until the frame ends
        if self.discard_intermediates {
            let kept = if keep_output { input_owner } else { None };
            for (index, pass) in self.passes.iter_mut().enumerate() {
                if Some(index) != kept {
                    pass.release_output(fc.pool);
                }
            }
        }

        stats.output = if keep_output { input } else { target };
        restore_state(fc.gpu);
        self.state = ChainState::Done;
        stats
    }

    /// Prepare and finalize in one go
    pub fn direct_render(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        source: Option<TextureHandle>,
        target: Option<TextureHandle>,
    ) -> ChainStats {
        if !self.prepare_frame(fc, camera, source) {
            return ChainStats::default();
        }
        self.finalize_frame(fc, target, false)
    }

    /// Drop a prepared frame without drawing
    pub fn abandon(&mut self, pool: &mut RenderTargetPool) {
        for pass in &mut self.passes {
            pass.release_output(pool);
        }
        self.camera = None;
        self.plan.clear();
        self.state = ChainState::Idle;
    }

    /// Return every target still held to the pool
    pub fn release_targets(&mut self, pool: &mut RenderTargetPool) {
        for pass in &mut self.passes {
            pass.release_output(pool);
        }
        if let Some(copy) = &mut self.copy_pass {
            copy.release_output(pool);
        }
    }

    /// Forget backend handles after a context loss
    pub fn invalidate(&mut self) {
        for pass in &mut self.passes {
            pass.invalidate();
        }
        if let Some(copy) = &mut self.copy_pass {
            copy.invalidate();
        }
        self.camera = None;
        self.plan.clear();
        self.state = ChainState::Idle;
    }

    pub fn dispose(&mut self, gpu: &mut dyn GraphicsContext, pool: &mut RenderTargetPool) {
        for pass in &mut self.passes {
            pass.dispose(gpu, pool);
        }
        if let Some(mut copy) = self.copy_pass.take() {
            copy.dispose(gpu, pool);
        }
        self.state = ChainState::Idle;
    }

    /// Activate a pass again when the input it was prepared with is not
    /// the one it receives. The input target is held while the pass
    /// acquires, so the two never alias.
    fn reactivate(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        index: usize,
        input: Option<TextureHandle>,
        off_screen: bool,
    ) -> bool {
        log::trace!(
            "Chain '{}' re-activating pass '{}'",
            self.name,
            self.passes[index].name()
        );
        self.passes[index].release_output(fc.pool);
        let held = input.and_then(|texture| fc.pool.hold_texture(texture));
        let activated = self.passes[index]
            .activate(fc, camera, input, off_screen)
            .is_ok();
        if let Some(id) = held {
            fc.pool.release(id);
        }
        activated
    }

    fn copy_to_destination(
        &mut self,
        fc: &mut FrameContext<'_>,
        camera: &Camera,
        input: Option<TextureHandle>,
        target: Option<TextureHandle>,
        stats: &mut ChainStats,
    ) {
        let Some(input) = input else {
            return;
        };
        if target == Some(input) {
            return;
        }
        let Some(quad) = fc.screen_quad() else {
            return;
        };

        let name = format!("{}.copy", self.name);
        let copy = self
            .copy_pass
            .get_or_insert_with(|| builtin::pass_through().named(name));
        if copy.activate(fc, camera, Some(input), false).is_err() {
            return;
        }
        if let Some(bound) = copy.apply(fc) {
            bind_destination(fc.gpu, target);
            copy.draw(fc.gpu, &quad, bound);
            stats.draw_calls += 1;
            log::debug!("Chain '{}' copied input past a skipped last pass", self.name);
        }
    }
}

impl std::fmt::Debug for PassChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassChain")
            .field("name", &self.name)
            .field("passes", &self.passes)
            .field("state", &self.state)
            .finish()
    }
}

fn bind_destination(gpu: &mut dyn GraphicsContext, target: Option<TextureHandle>) {
    match target {
        Some(texture) => gpu.bind_framebuffer(texture),
        None => gpu.restore_default_framebuffer(),
    }
}

/// Global state every chain leaves behind
pub(crate) fn restore_state(gpu: &mut dyn GraphicsContext) {
    gpu.set_depth_buffer(true);
    gpu.set_depth_write(true);
    gpu.set_alpha_mode(AlphaMode::Disabled);
    gpu.set_stencil(StencilState::disabled());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::headless::HeadlessContext;
    use crate::quad::{shared_quad, ScreenQuad, SharedQuad};

    fn setup(size: u32) -> (HeadlessContext, RenderTargetPool, SharedQuad, Diagnostics) {
        let mut gpu = HeadlessContext::new(size, size);
        let quad = shared_quad();
        *quad.write() = Some(ScreenQuad::create(&mut gpu).unwrap());
        (gpu, RenderTargetPool::new(), quad, Diagnostics::new())
    }

    fn identity_chain(n: usize) -> PassChain {
        let mut chain = PassChain::new("test");
        for i in 0..n {
            chain.add(builtin::pass_through().named(format!("pass{}", i)));
        }
        chain
    }

    #[test]
    fn test_empty_chain_does_not_prepare() {
        let (mut gpu, mut pool, quad, mut diagnostics) = setup(8);
        let mut fc = FrameContext::new(&mut gpu, &mut pool, &quad, &mut diagnostics, 1);
        let camera = Camera::new("main", 8, 8);

        let mut chain = PassChain::new("empty");
        assert!(!chain.prepare_frame(&mut fc, &camera, None));
        assert_eq!(chain.state(), ChainState::Idle);

        let mut disabled = identity_chain(2);
        for pass in disabled.passes_mut() {
            pass.set_enabled(false);
        }
        assert!(!disabled.prepare_frame(&mut fc, &camera, None));
    }

    #[test]
    fn test_state_transitions() {
        let (mut gpu, mut pool, quad, mut diagnostics) = setup(8);
        let mut fc = FrameContext::new(&mut gpu, &mut pool, &quad, &mut diagnostics, 1);
        let camera = Camera::new("main", 8, 8);
        let source = fc.gpu.create_texture(&crate::TextureDesc::color(8, 8, Default::default())).unwrap();

        let mut chain = identity_chain(2);
        assert!(chain.prepare_frame(&mut fc, &camera, Some(source)));
        assert_eq!(chain.state(), ChainState::Running);

        let stats = chain.finalize_frame(&mut fc, None, false);
        assert_eq!(chain.state(), ChainState::Done);
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.passes_skipped, 0);
    }

    #[test]
    fn test_ping_pong_uses_two_targets() {
        let (mut gpu, mut pool, quad, mut diagnostics) = setup(16);
        let source = gpu.create_filled_texture(16, 16, [0.5, 0.5, 0.5, 1.0]);
        let mut fc = FrameContext::new(&mut gpu, &mut pool, &quad, &mut diagnostics, 1);
        let camera = Camera::new("main", 16, 16);

        let mut chain = identity_chain(5);
        chain.direct_render(&mut fc, &camera, Some(source), None);

        assert_eq!(pool.allocation_count(), 2);
    }

    #[test]
    fn test_keep_intermediates_allocates_per_pass() {
        let (mut gpu, mut pool, quad, mut diagnostics) = setup(16);
        let source = gpu.create_filled_texture(16, 16, [0.5, 0.5, 0.5, 1.0]);
        let mut fc = FrameContext::new(&mut gpu, &mut pool, &quad, &mut diagnostics, 1);
        let camera = Camera::new("main", 16, 16);

        let mut chain = identity_chain(4);
        chain.set_discard_intermediates(false);
        chain.direct_render(&mut fc, &camera, Some(source), None);

        // Every pass but the last kept its own target
        assert_eq!(pool.allocation_count(), 3);
    }

    #[test]
    fn test_do_not_present_keeps_output() {
        let (mut gpu, mut pool, quad, mut diagnostics) = setup(8);
        let source = gpu.create_filled_texture(8, 8, [1.0, 0.0, 0.0, 1.0]);
        let mut fc = FrameContext::new(&mut gpu, &mut pool, &quad, &mut diagnostics, 1);
        let camera = Camera::new("main", 8, 8);

        let mut chain = identity_chain(1);
        assert!(chain.prepare_frame(&mut fc, &camera, Some(source)));
        let stats = chain.finalize_frame(&mut fc, None, true);

        let output = stats.output.unwrap();
        assert_ne!(output, source);
        assert_eq!(gpu.read_pixel(output, 3, 3), Some([1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_skipped_middle_pass_relinks_next_pass() {
        let (mut gpu, mut pool, quad, mut diagnostics) = setup(8);
        gpu.stall_effect("pass1");
        let source = gpu.create_filled_texture(8, 8, [0.2, 0.4, 0.6, 1.0]);
        let target = gpu.create_filled_texture(8, 8, [0.0; 4]);
        let mut fc = FrameContext::new(&mut gpu, &mut pool, &quad, &mut diagnostics, 1);
        let camera = Camera::new("main", 8, 8);

        let mut chain = identity_chain(4);
        let stats = chain.direct_render(&mut fc, &camera, Some(source), Some(target));
        assert_eq!(stats.passes_skipped, 1);
        assert_eq!(stats.draw_calls, 3);

        // pass2 reads pass0 and writes somewhere else
        let passes = chain.passes();
        assert_eq!(passes[2].input_texture(), passes[0].output_texture());
        assert_ne!(passes[2].output_texture(), passes[2].input_texture());
        assert_eq!(passes[3].input_texture(), passes[2].output_texture());
        assert_eq!(gpu.read_pixel(target, 1, 1), Some([0.2, 0.4, 0.6, 1.0]));
    }

    #[test]
    fn test_skipped_last_pass_copies_input() {
        let (mut gpu, mut pool, quad, mut diagnostics) = setup(8);
        gpu.fail_program("grayscale");
        let source = gpu.create_filled_texture(8, 8, [0.2, 0.4, 0.6, 1.0]);
        let target = gpu.create_filled_texture(8, 8, [0.0, 0.0, 0.0, 1.0]);
        let mut fc = FrameContext::new(&mut gpu, &mut pool, &quad, &mut diagnostics, 1);
        let camera = Camera::new("main", 8, 8);

        let mut chain = PassChain::new("test");
        chain.add(builtin::pass_through());
        chain.add(builtin::grayscale());
        let stats = chain.direct_render(&mut fc, &camera, Some(source), Some(target));

        assert_eq!(stats.passes_skipped, 1);
        assert_eq!(stats.draw_calls, 2);
        let pixel = gpu.read_pixel(target, 0, 0).unwrap();
        assert!((pixel[2] - 0.6).abs() < 1e-6);
    }
}
