use bevy_math::EulerRot;
use bevy_math::Mat4;
use bevy_math::Vec3;

use crate::constants::SceneConstants;

pub const DEFAULT_UP: Vec3 = Vec3::Y;
pub const DEFAULT_FORWARD: Vec3 = Vec3::Z;
pub const DEFAULT_RIGHT: Vec3 = Vec3::X;

/// One frame of already-polled input.
///
/// `forward` and `right` are movement axes in `-1.0..=1.0`; mouse deltas are
/// relative-mode counts since the last frame.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CameraInput {
    pub forward: f32,
    pub right: f32,
    pub mouse_dx: f32,
    pub mouse_dy: f32,
}

impl CameraInput {
    /// W/S win over each other in that order, as do D/A.
    pub fn from_keys(w: bool, a: bool, s: bool, d: bool, mouse_dx: f32, mouse_dy: f32) -> Self {
        let forward = if w {
            1.0
        } else if s {
            -1.0
        } else {
            0.0
        };
        let right = if a {
            -1.0
        } else if d {
            1.0
        } else {
            0.0
        };
        Self {
            forward,
            right,
            mouse_dx,
            mouse_dy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_4,
            near: 0.01,
            far: 100.0,
        }
    }
}

impl Projection {
    pub fn matrix(&self, width: u32, height: u32) -> Mat4 {
        let aspect = width as f32 / height.max(1) as f32;
        Mat4::perspective_lh(self.fov_y, aspect, self.near, self.far)
    }
}

/// Left-handed free-fly camera steered by yaw/pitch.
#[derive(Debug, Clone)]
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub move_speed: f32,
    /// Radians per mouse count per second.
    pub mouse_sensitivity: f32,
    pub right: Vec3,
    pub up: Vec3,
    pub forward: Vec3,
    view: Mat4,
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 200.0))
    }
}

impl FlyCamera {
    /// Starts at `position` looking at the origin. Orientation takes over
    /// from the first [`update`](Self::update) on.
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            yaw: -3.0,
            pitch: 0.37,
            move_speed: 5.0,
            mouse_sensitivity: 0.1,
            right: DEFAULT_RIGHT,
            up: DEFAULT_UP,
            forward: DEFAULT_FORWARD,
            view: Mat4::look_at_lh(position, Vec3::ZERO, DEFAULT_UP),
        }
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn update(&mut self, input: CameraInput, elapsed_seconds: f32) {
        let step = elapsed_seconds * self.move_speed;
        self.yaw += input.mouse_dx * elapsed_seconds * self.mouse_sensitivity;
        self.pitch += input.mouse_dy * elapsed_seconds * self.mouse_sensitivity;

        let rotation = Mat4::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0);
        let look = rotation.transform_point3(DEFAULT_FORWARD).normalize();
        self.right = rotation.transform_point3(DEFAULT_RIGHT);
        self.up = rotation.transform_point3(DEFAULT_UP);
        self.forward = rotation.transform_point3(DEFAULT_FORWARD);

        self.position += input.right * step * self.right;
        self.position += input.forward * step * self.forward;

        self.view = Mat4::look_at_lh(self.position, self.position + look, self.up);
    }

    pub fn constants(&self, world: Mat4, projection: Mat4) -> SceneConstants {
        SceneConstants::new(world, self.view, projection, self.position)
    }
}
