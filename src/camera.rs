use glam::{Mat4, Vec3};

/// Perspective camera orbiting a target point.
///
/// The pose is stored as spherical coordinates around `target`; the
/// eye position and matrices are derived on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y: 75f32.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 100_000.0,
            target: Vec3::ZERO,
            distance: 5.0,
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

impl Camera {
    /// Updates the projection aspect ratio from a framebuffer size.
    ///
    /// Only the aspect changes; pose and clip planes are untouched, so
    /// repeated calls with the same size are no-ops.
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.aspect = width as f32 / height as f32;
    }

    /// Eye position derived from the orbit pose.
    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        let offset = Vec3::new(
            self.distance * cos_pitch * sin_yaw,
            self.distance * sin_pitch,
            self.distance * cos_pitch * cos_yaw,
        );
        self.target + offset
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }
}

/// Pointer input accumulated between frames and applied once per tick.
///
/// Left drag rotates around the target, right drag pans the target in
/// the view plane, the wheel dollies in and out.
#[derive(Debug, Clone, Default)]
pub struct OrbitController {
    rotate: glam::Vec2,
    pan: glam::Vec2,
    zoom: f32,
}

impl OrbitController {
    const ROTATE_SPEED: f32 = 0.005;
    const PAN_SPEED: f32 = 0.002;
    const ZOOM_SPEED: f32 = 0.25;
    const MIN_DISTANCE: f32 = 0.05;
    const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.rotate.x += dx;
        self.rotate.y += dy;
    }

    pub fn pan(&mut self, dx: f32, dy: f32) {
        self.pan.x += dx;
        self.pan.y += dy;
    }

    pub fn zoom(&mut self, amount: f32) {
        self.zoom += amount;
    }

    pub fn has_pending_input(&self) -> bool {
        self.rotate != glam::Vec2::ZERO || self.pan != glam::Vec2::ZERO || self.zoom != 0.0
    }

    /// Applies and clears the accumulated input.
    pub fn apply(&mut self, camera: &mut Camera) {
        camera.yaw -= self.rotate.x * Self::ROTATE_SPEED;
        camera.pitch = (camera.pitch + self.rotate.y * Self::ROTATE_SPEED)
            .clamp(-Self::MAX_PITCH, Self::MAX_PITCH);

        if self.pan != glam::Vec2::ZERO {
            // Pan in the view plane, scaled so a drag covers a similar
            // screen distance regardless of zoom level.
            let view = camera.view();
            let right = Vec3::new(view.x_axis.x, view.y_axis.x, view.z_axis.x);
            let up = Vec3::new(view.x_axis.y, view.y_axis.y, view.z_axis.y);
            let scale = camera.distance * Self::PAN_SPEED;
            camera.target += (-right * self.pan.x + up * self.pan.y) * scale;
        }

        camera.distance =
            (camera.distance * (1.0 - self.zoom * Self::ZOOM_SPEED).max(0.01)).max(Self::MIN_DISTANCE);

        self.rotate = glam::Vec2::ZERO;
        self.pan = glam::Vec2::ZERO;
        self.zoom = 0.0;
    }
}

/// Camera plus its controller, owned by the frame loop.
#[derive(Debug, Clone, Default)]
pub struct CameraRig {
    pub camera: Camera,
    pub controller: OrbitController,
}

impl CameraRig {
    pub fn update(&mut self) {
        self.controller.apply(&mut self.camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pose_matches_the_viewer() {
        let camera = Camera::default();
        assert!((camera.fov_y - 75f32.to_radians()).abs() < 1e-6);
        assert!((camera.near - 0.1).abs() < f32::EPSILON);
        assert!((camera.far - 100_000.0).abs() < f32::EPSILON);
        assert_eq!(camera.eye(), Vec3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn set_aspect_only_changes_aspect() {
        let mut camera = Camera::default();
        let before = camera.clone();
        camera.set_aspect(1024, 768);
        assert!((camera.aspect - 1024.0 / 768.0).abs() < 1e-6);
        assert_eq!(camera.fov_y, before.fov_y);
        assert_eq!(camera.near, before.near);
        assert_eq!(camera.far, before.far);
        assert_eq!(camera.distance, before.distance);

        // Same size again is a no-op.
        let resized = camera.clone();
        camera.set_aspect(1024, 768);
        assert_eq!(camera, resized);
    }

    #[test]
    fn zero_sized_framebuffer_is_ignored() {
        let mut camera = Camera::default();
        camera.set_aspect(0, 768);
        camera.set_aspect(1024, 0);
        assert_eq!(camera.aspect, 1.0);
    }

    #[test]
    fn rotation_moves_the_eye_and_clears_pending_input() {
        let mut rig = CameraRig::default();
        let eye_before = rig.camera.eye();
        rig.controller.rotate(120.0, -40.0);
        assert!(rig.controller.has_pending_input());
        rig.update();
        assert!(!rig.controller.has_pending_input());
        assert_ne!(rig.camera.eye(), eye_before);
        // Distance is preserved under pure rotation.
        assert!(((rig.camera.eye() - rig.camera.target).length() - 5.0).abs() < 1e-4);
    }

    #[test]
    fn pitch_is_clamped_short_of_the_poles() {
        let mut rig = CameraRig::default();
        rig.controller.rotate(0.0, 1.0e6);
        rig.update();
        assert!(rig.camera.pitch < std::f32::consts::FRAC_PI_2);
        rig.controller.rotate(0.0, -1.0e6);
        rig.update();
        assert!(rig.camera.pitch > -std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn zoom_shrinks_distance_but_never_reaches_zero() {
        let mut rig = CameraRig::default();
        rig.controller.zoom(1.0);
        rig.update();
        assert!(rig.camera.distance < 5.0);
        for _ in 0..100 {
            rig.controller.zoom(10.0);
            rig.update();
        }
        assert!(rig.camera.distance >= 0.05);
    }

    #[test]
    fn pan_moves_the_target() {
        let mut rig = CameraRig::default();
        rig.controller.pan(50.0, 0.0);
        rig.update();
        assert_ne!(rig.camera.target, Vec3::ZERO);
    }
}
