//! Glow and highlight layers driven through the compositor

use std::sync::Arc;

use afterimage_render::prelude::*;
use afterimage_render::{LayerEvent, UniformValue};
use parking_lot::Mutex;

const SIZE: u32 = 32;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Setup {
    gpu: HeadlessContext,
    compositor: Compositor,
    scene: Scene,
    camera: CameraId,
}

fn setup() -> Setup {
    init_logging();
    let mut scene = Scene::new();
    let camera = scene.add_camera(Camera::new("main", SIZE, SIZE));
    Setup {
        gpu: HeadlessContext::new(SIZE, SIZE),
        compositor: Compositor::default(),
        scene,
        camera,
    }
}

fn square_emissive(gpu: &mut HeadlessContext) -> TextureHandle {
    let texture = gpu.create_filled_texture(SIZE, SIZE, [0.0; 4]);
    gpu.fill_rect(texture, (SIZE / 4, SIZE / 4), (SIZE * 3 / 4, SIZE * 3 / 4), [1.0; 4]);
    texture
}

fn max_difference(a: &[[f32; 4]], b: &[[f32; 4]]) -> f32 {
    a.iter()
        .zip(b)
        .flat_map(|(x, y)| x.iter().zip(y).map(|(p, q)| (p - q).abs()))
        .fold(0.0, f32::max)
}

#[test]
fn empty_glow_layer_draws_nothing() {
    let mut s = setup();
    let glow = GlowLayer::new("glow", GlowLayerConfig::default(), s.compositor.shared_quad());
    assert!(!glow.should_render());
    s.compositor.add_layer(Box::new(glow));

    let source = s.gpu.create_filled_texture(SIZE, SIZE, [0.2, 0.4, 0.6, 1.0]);
    for _ in 0..3 {
        let stats = s
            .compositor
            .render(&mut s.gpu, &s.scene, &[FrameInput::to_screen(s.camera, source)]);
        assert_eq!(stats.layers_rendered, 0);
        assert_eq!(stats.draw_calls, 0);
    }
    assert_eq!(s.gpu.draw_count(), 0);
    assert_eq!(s.gpu.read_pixel(source, 3, 3), Some([0.2, 0.4, 0.6, 1.0]));
}

#[test]
fn zero_intensity_glow_leaves_scene_unchanged() {
    let mut s = setup();
    let emissive = square_emissive(&mut s.gpu);
    let mut glow = GlowLayer::new("glow", GlowLayerConfig::default(), s.compositor.shared_quad());
    glow.add_mesh(EffectMesh::new(MeshId::new(), Some(emissive)));
    glow.set_intensity(0.0);
    let id = s.compositor.add_layer(Box::new(glow));

    let source = s.gpu.create_filled_texture(SIZE, SIZE, [0.2, 0.3, 0.4, 1.0]);
    let before = s.gpu.read_pixels(source).unwrap();
    let stats = s
        .compositor
        .render(&mut s.gpu, &s.scene, &[FrameInput::to_screen(s.camera, source)]);

    // extract, two blur levels of two passes each, merge
    assert_eq!(stats.draw_calls, 6);
    assert_eq!(stats.layers_rendered, 1);
    let after = s.gpu.read_pixels(source).unwrap();
    assert!(max_difference(&before, &after) < 1e-6);

    // Full intensity brightens the scene around the mesh
    s.compositor
        .layer_mut(id)
        .unwrap()
        .core_mut()
        .set_intensity(1.0);
    s.compositor
        .render(&mut s.gpu, &s.scene, &[FrameInput::to_screen(s.camera, source)]);
    let lit = s.gpu.read_pixels(source).unwrap();
    assert!(max_difference(&before, &lit) > 0.01);
}

#[test]
fn extract_pass_is_sized_to_the_main_texture() {
    let mut s = setup();
    let emissive = square_emissive(&mut s.gpu);
    let mut glow = GlowLayer::new("glow", GlowLayerConfig::default(), s.compositor.shared_quad());
    glow.add_mesh(EffectMesh::new(MeshId::new(), Some(emissive)));
    s.compositor.add_layer(Box::new(glow));

    let source = s.gpu.create_filled_texture(SIZE, SIZE, [0.0, 0.0, 0.0, 1.0]);
    s.compositor
        .render(&mut s.gpu, &s.scene, &[FrameInput::to_screen(s.camera, source)]);

    let extract = s
        .gpu
        .draws()
        .iter()
        .find(|d| d.program == "emissive_extract")
        .unwrap();
    let half = SIZE as f32 / 2.0;
    assert_eq!(
        extract.uniforms.get("screenSize"),
        Some(&UniformValue::Vec2([half, half]))
    );
}

#[test]
fn layer_events_fire_in_frame_order() {
    let mut s = setup();
    let emissive = square_emissive(&mut s.gpu);
    let mut glow = GlowLayer::new("glow", GlowLayerConfig::default(), s.compositor.shared_quad());
    glow.add_mesh(EffectMesh::new(MeshId::new(), Some(emissive)));

    let events = Arc::new(Mutex::new(Vec::new()));
    for event in [
        LayerEvent::BeforeRenderMainTexture,
        LayerEvent::SizeChanged,
        LayerEvent::BeforeCompose,
        LayerEvent::AfterCompose,
    ] {
        let events = events.clone();
        glow.core_mut().on(event, move |args| {
            events.lock().push((event, args.width, args.height));
        });
    }
    s.compositor.add_layer(Box::new(glow));

    let source = s.gpu.create_filled_texture(SIZE, SIZE, [0.0, 0.0, 0.0, 1.0]);
    for _ in 0..2 {
        s.compositor
            .render(&mut s.gpu, &s.scene, &[FrameInput::to_screen(s.camera, source)]);
    }

    let kinds: Vec<LayerEvent> = events.lock().iter().map(|e| e.0).collect();
    assert_eq!(
        kinds,
        vec![
            LayerEvent::BeforeRenderMainTexture,
            LayerEvent::SizeChanged,
            LayerEvent::BeforeCompose,
            LayerEvent::AfterCompose,
            LayerEvent::BeforeRenderMainTexture,
            LayerEvent::BeforeCompose,
            LayerEvent::AfterCompose,
        ]
    );
    let (_, width, height) = events.lock()[1];
    assert_eq!((width, height), (SIZE / 2, SIZE / 2));
}

#[test]
fn layer_restricted_to_another_camera_is_skipped() {
    let mut s = setup();
    let other = s.scene.add_camera(Camera::new("minimap", SIZE, SIZE));
    let emissive = square_emissive(&mut s.gpu);
    let mut glow = GlowLayer::new("glow", GlowLayerConfig::default(), s.compositor.shared_quad());
    glow.add_mesh(EffectMesh::new(MeshId::new(), Some(emissive)));
    glow.core_mut().add_camera(other);
    s.compositor.add_layer(Box::new(glow));

    let source = s.gpu.create_filled_texture(SIZE, SIZE, [0.0, 0.0, 0.0, 1.0]);
    let stats = s
        .compositor
        .render(&mut s.gpu, &s.scene, &[FrameInput::to_screen(s.camera, source)]);
    assert_eq!(stats.layers_rendered, 0);

    let minimap_source = s.gpu.create_filled_texture(SIZE, SIZE, [0.0, 0.0, 0.0, 1.0]);
    let stats = s
        .compositor
        .render(&mut s.gpu, &s.scene, &[FrameInput::to_screen(other, minimap_source)]);
    assert_eq!(stats.layers_rendered, 1);
}

#[test]
fn highlight_then_chain_on_the_same_camera() {
    let mut s = setup();
    let emissive = square_emissive(&mut s.gpu);
    let mut highlight = HighlightLayer::new(
        "highlight",
        HighlightLayerConfig::default(),
        s.compositor.shared_quad(),
    );
    highlight.set_inner_glow(false);
    highlight.add_mesh(
        EffectMesh::new(MeshId::new(), Some(emissive)),
        Color::rgb(1.0, 0.0, 0.0),
        false,
    );
    s.compositor.add_layer(Box::new(highlight));
    s.compositor.add_pass(s.camera, builtin::pass_through());

    let source = s.gpu.create_filled_texture(SIZE, SIZE, [0.0, 0.0, 0.0, 1.0]);
    // Mark the mesh footprint in the scene's stencil
    s.gpu.fill_stencil(
        Some(source),
        (SIZE / 4, SIZE / 4),
        (SIZE * 3 / 4, SIZE * 3 / 4),
        afterimage_render::effect_layer::HIGHLIGHT_STENCIL_REF,
    );

    let stats = s
        .compositor
        .render(&mut s.gpu, &s.scene, &[FrameInput::to_screen(s.camera, source)]);
    assert_eq!(stats.layers_rendered, 1);
    // extract, two blur passes, merge, then the chain's pass
    assert_eq!(stats.draw_calls, 5);

    // The chain ran after the layer composed into its input
    let last = s.gpu.draws().last().unwrap();
    assert_eq!(last.program, "pass_through");
    assert_eq!(last.sampler("textureSampler"), Some(source));

    let inside = s.gpu.screen_pixel(SIZE / 2, SIZE / 2).unwrap();
    assert_eq!(&inside[..3], &[0.0, 0.0, 0.0]);
    let rim = s.gpu.screen_pixel(SIZE / 4 - 1, SIZE / 2).unwrap();
    assert!(rim[0] > 0.0, "outer glow should tint the rim");
    assert!(!s.gpu.stencil_state().enabled);
}
