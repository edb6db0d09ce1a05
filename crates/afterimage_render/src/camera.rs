//! Cameras and scenes as seen by the compositor
//!
//! The compositor only needs a camera's identity and the pixel size of its
//! viewport, and a scene's camera list plus the global post-process switch.

use afterimage_core::define_id;

define_id!(
    /// Identifies a camera
    CameraId
);

define_id!(
    /// Identifies a mesh registered with an effect layer
    MeshId
);

/// Normalized viewport rectangle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::FULL
    }
}

/// A camera with a render size and viewport
#[derive(Clone, Debug)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    pub viewport: Viewport,
    /// Size of the surface the camera renders to, in pixels
    pub render_width: u32,
    pub render_height: u32,
}

impl Camera {
    pub fn new(name: impl Into<String>, render_width: u32, render_height: u32) -> Self {
        Self {
            id: CameraId::new(),
            name: name.into(),
            viewport: Viewport::FULL,
            render_width,
            render_height,
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Viewport size in pixels, never below 1x1
    pub fn viewport_pixels(&self) -> (u32, u32) {
        let w = (self.render_width as f32 * self.viewport.width).round() as u32;
        let h = (self.render_height as f32 * self.viewport.height).round() as u32;
        (w.max(1), h.max(1))
    }
}

/// Scene collaborator: the cameras that exist and whether post-processing
/// is globally enabled
#[derive(Clone, Debug)]
pub struct Scene {
    cameras: Vec<Camera>,
    pub post_processes_enabled: bool,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            cameras: Vec::new(),
            post_processes_enabled: true,
        }
    }

    pub fn add_camera(&mut self, camera: Camera) -> CameraId {
        let id = camera.id;
        self.cameras.push(camera);
        id
    }

    pub fn remove_camera(&mut self, id: CameraId) -> Option<Camera> {
        let index = self.cameras.iter().position(|c| c.id == id)?;
        Some(self.cameras.remove(index))
    }

    pub fn camera(&self, id: CameraId) -> Option<&Camera> {
        self.cameras.iter().find(|c| c.id == id)
    }

    pub fn camera_mut(&mut self, id: CameraId) -> Option<&mut Camera> {
        self.cameras.iter_mut().find(|c| c.id == id)
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
