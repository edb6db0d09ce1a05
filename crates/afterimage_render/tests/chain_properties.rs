//! Pass chain behavior against the headless backend

use std::sync::Arc;

use afterimage_render::prelude::*;
use afterimage_render::{CompareFunction, PassEvent, StencilState};
use parking_lot::Mutex;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn identity_chain(n: usize) -> PassChain {
    let mut chain = PassChain::new("identity");
    for i in 0..n {
        chain.add(builtin::pass_through().named(format!("pass{}", i)));
    }
    chain
}

/// Every pass reads what the previous pass wrote, and passes draw in order
#[test]
fn chain_passes_run_in_order_and_feed_each_other() {
    init_logging();
    let mut gpu = HeadlessContext::new(32, 32);
    let mut compositor = Compositor::default();
    let camera = Camera::new("main", 32, 32);
    let source = gpu.create_filled_texture(32, 32, [0.1, 0.2, 0.3, 1.0]);

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut chain = identity_chain(3);
    for (i, pass) in chain.passes_mut().iter_mut().enumerate() {
        let order = order.clone();
        pass.on(PassEvent::AfterRender, move |_| order.lock().push(i));
    }

    let stats = compositor.direct_render(&mut gpu, &mut chain, &camera, source, None);

    assert_eq!(*order.lock(), vec![0, 1, 2]);
    assert_eq!(stats.draw_calls, 3);

    let passes = chain.passes();
    assert_eq!(passes[0].input_texture(), Some(source));
    for i in 1..passes.len() {
        assert!(passes[i - 1].output_texture().is_some());
        assert_eq!(passes[i].input_texture(), passes[i - 1].output_texture());
    }
    // The last pass presents
    assert_eq!(passes[2].output_texture(), None);
    assert_eq!(gpu.screen_pixel(5, 5), Some([0.1, 0.2, 0.3, 1.0]));
}

/// Linkage is in place as soon as the frame is prepared, before any draw
#[test]
fn prepare_links_every_pass_before_drawing() {
    init_logging();
    let mut gpu = HeadlessContext::new(16, 16);
    let mut compositor = Compositor::default();
    let mut scene = Scene::new();
    let camera = scene.add_camera(Camera::new("main", 16, 16));
    for i in 0..6 {
        compositor.add_pass(camera, builtin::pass_through().named(format!("pass{}", i)));
    }
    let source = gpu.create_filled_texture(16, 16, [0.3, 0.2, 0.1, 1.0]);

    assert!(compositor.prepare_frame(&mut gpu, &scene, camera, source));
    assert_eq!(gpu.draw_count(), 0);

    let passes = compositor.chain(camera).unwrap().passes();
    assert_eq!(passes[0].input_texture(), Some(source));
    for i in 1..passes.len() {
        assert!(passes[i - 1].output_texture().is_some());
        assert_eq!(passes[i].input_texture(), passes[i - 1].output_texture());
        assert_ne!(passes[i].input_texture(), passes[i].output_texture());
    }
    // Six passes at one size still ping-pong
    assert_eq!(compositor.pool().allocation_count(), 2);

    let stats = compositor.finalize_frame(&mut gpu, None, false);
    assert_eq!(stats.draw_calls, 6);
    assert_eq!(gpu.screen_pixel(4, 4), Some([0.3, 0.2, 0.1, 1.0]));
}

/// A pass that is not ready is never drawn and does not stall the rest
#[test]
fn unready_pass_is_skipped_every_frame() {
    init_logging();
    let mut gpu = HeadlessContext::new(16, 16);
    gpu.stall_effect("pass1");
    let mut compositor = Compositor::default();
    let camera = Camera::new("main", 16, 16);
    let source = gpu.create_filled_texture(16, 16, [0.5; 4]);

    let mut chain = identity_chain(3);
    for _ in 0..4 {
        let stats = compositor.direct_render(&mut gpu, &mut chain, &camera, source, None);
        assert_eq!(stats.passes_skipped, 1);
        assert_eq!(stats.draw_calls, 2);
    }

    assert_eq!(gpu.draws_named("pass1"), 0);
    assert_eq!(gpu.draws_named("pass0"), 4);
    assert_eq!(gpu.draws_named("pass2"), 4);
    // pass2 read pass0's output directly
    let last = gpu.draws().last().unwrap();
    assert_eq!(last.sampler("textureSampler"), chain.passes()[0].output_texture());

    gpu.resume_effect("pass1");
    let stats = compositor.direct_render(&mut gpu, &mut chain, &camera, source, None);
    assert_eq!(stats.passes_skipped, 0);
    assert_eq!(gpu.draws_named("pass1"), 1);
}

/// A failing effect behaves like a permanently unready one
#[test]
fn failed_effect_never_draws() {
    init_logging();
    let mut gpu = HeadlessContext::new(16, 16);
    gpu.fail_program("vignette");
    let mut compositor = Compositor::default();
    let camera = Camera::new("main", 16, 16);
    let source = gpu.create_filled_texture(16, 16, [0.5; 4]);

    let mut chain = PassChain::new("c");
    chain.add(builtin::grayscale());
    chain.add(builtin::vignette(VignetteParams::default()));
    chain.add(builtin::pass_through());

    for _ in 0..3 {
        compositor.direct_render(&mut gpu, &mut chain, &camera, source, None);
    }
    assert_eq!(gpu.draws_with_program("vignette"), 0);
    assert_eq!(gpu.draws_with_program("pass_through"), 3);
}

/// Ping-pong keeps a same-size chain within two or three targets
#[test]
fn four_pass_chain_allocates_at_most_three_targets() {
    init_logging();
    let mut gpu = HeadlessContext::new(64, 64);
    let mut compositor = Compositor::default();
    let camera = Camera::new("main", 64, 64);
    let source = gpu.create_filled_texture(64, 64, [0.5; 4]);

    let mut chain = identity_chain(4);
    for _ in 0..3 {
        compositor.direct_render(&mut gpu, &mut chain, &camera, source, None);
    }
    assert!(compositor.pool().allocation_count() <= 3);
    assert_eq!(compositor.pool().allocation_count(), 2);

    // A reusable pass holds its target for the frame
    let mut reusing = identity_chain(4);
    reusing.passes_mut()[0].set_reusable(true);
    let mut compositor = Compositor::default();
    compositor.direct_render(&mut gpu, &mut reusing, &camera, source, None);
    assert!(compositor.pool().allocation_count() <= 3);
}

/// Global state is restored whatever the passes bound
#[test]
fn finalize_restores_global_state() {
    init_logging();
    let mut gpu = HeadlessContext::new(16, 16);
    let mut compositor = Compositor::default();
    let mut scene = Scene::new();
    let camera = scene.add_camera(Camera::new("main", 16, 16));
    let source = gpu.create_filled_texture(16, 16, [0.5; 4]);

    let additive = compositor.add_pass(camera, builtin::pass_through().with_alpha_mode(AlphaMode::Add));
    compositor
        .pass_mut(camera, additive)
        .unwrap()
        .set_stencil(StencilState::test(CompareFunction::Equal, 1));
    compositor.add_pass(camera, builtin::grayscale().with_alpha_mode(AlphaMode::Multiply));

    gpu.set_depth_buffer(false);
    gpu.set_depth_write(false);

    assert!(compositor.prepare_frame(&mut gpu, &scene, camera, source));
    compositor.finalize_frame(&mut gpu, None, false);

    assert!(gpu.depth_buffer());
    assert!(gpu.depth_write());
    assert_eq!(gpu.alpha_mode(), AlphaMode::Disabled);
    assert!(!gpu.stencil_state().enabled);
    // The passes did bind their own state while drawing
    assert_eq!(gpu.draws()[0].alpha_mode, AlphaMode::Add);
    assert_eq!(gpu.draws()[1].alpha_mode, AlphaMode::Multiply);
}

/// Allocation failure skips the pass and presents the unprocessed input
#[test]
fn allocation_failure_falls_back_to_input() {
    init_logging();
    let mut gpu = HeadlessContext::new(8, 8);
    let mut compositor = Compositor::default();
    let mut scene = Scene::new();
    let camera = scene.add_camera(Camera::new("main", 8, 8));
    compositor.add_pass(camera, builtin::grayscale());
    compositor.add_pass(camera, builtin::pass_through());
    let source = gpu.create_filled_texture(8, 8, [1.0, 0.0, 0.0, 1.0]);

    for _ in 0..2 {
        gpu.fail_next_allocations(1);
        let stats = compositor.render(&mut gpu, &scene, &[FrameInput::to_screen(camera, source)]);
        assert_eq!(stats.passes_skipped, 1);
        assert_eq!(stats.draw_calls, 1);
    }

    assert_eq!(gpu.screen_pixel(2, 2), Some([1.0, 0.0, 0.0, 1.0]));
    assert_eq!(
        compositor.diagnostics().count(DiagnosticKind::ResourceExhaustion),
        1
    );
}

/// Passes sized by ratio and fixed size share the chain
#[test]
fn mixed_resolution_chain() {
    init_logging();
    let mut gpu = HeadlessContext::new(64, 32);
    let mut compositor = Compositor::default();
    let camera = Camera::new("main", 64, 32);
    let source = gpu.create_filled_texture(64, 32, [0.25; 4]);

    let mut chain = PassChain::new("mixed");
    chain.add(builtin::pass_through().with_options(PassOptions::with_ratio(0.5)));
    chain.add(builtin::pass_through().with_options(PassOptions::with_fixed_size(8, 8)));
    chain.add(builtin::pass_through());
    compositor.direct_render(&mut gpu, &mut chain, &camera, source, None);

    assert_eq!(chain.passes()[0].size(), (32, 16));
    assert_eq!(chain.passes()[1].size(), (8, 8));
    assert_eq!(chain.passes()[2].size(), (64, 32));
    let sizes: Vec<(u32, u32)> = compositor
        .pool()
        .targets()
        .iter()
        .map(|t| (t.desc.width, t.desc.height))
        .collect();
    assert_eq!(sizes, vec![(32, 16), (8, 8)]);
}

/// Intermediates kept for inspection are not handed to later cameras
#[test]
fn kept_intermediates_survive_later_cameras() {
    init_logging();
    let mut gpu = HeadlessContext::new(8, 8);
    let mut compositor = Compositor::new(CompositorConfig {
        discard_intermediates: false,
        ..Default::default()
    });
    let mut scene = Scene::new();
    let red_camera = scene.add_camera(Camera::new("red", 8, 8));
    let green_camera = scene.add_camera(Camera::new("green", 8, 8));
    for camera in [red_camera, green_camera] {
        compositor.add_pass(camera, builtin::pass_through());
        compositor.add_pass(camera, builtin::pass_through());
    }
    let red = gpu.create_filled_texture(8, 8, [1.0, 0.0, 0.0, 1.0]);
    let green = gpu.create_filled_texture(8, 8, [0.0, 1.0, 0.0, 1.0]);
    let mirror = gpu.create_filled_texture(8, 8, [0.0; 4]);

    compositor.render(
        &mut gpu,
        &scene,
        &[
            FrameInput::to_texture(red_camera, red, mirror),
            FrameInput::to_screen(green_camera, green),
        ],
    );

    let intermediate = |camera| {
        compositor.chain(camera).unwrap().passes()[0]
            .output_texture()
            .unwrap()
    };
    let red_intermediate = intermediate(red_camera);
    let green_intermediate = intermediate(green_camera);
    assert_ne!(red_intermediate, green_intermediate);
    assert_eq!(gpu.read_pixel(red_intermediate, 2, 2), Some([1.0, 0.0, 0.0, 1.0]));
    assert_eq!(gpu.read_pixel(green_intermediate, 2, 2), Some([0.0, 1.0, 0.0, 1.0]));
}
