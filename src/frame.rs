use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::camera::{Camera, CameraRig};
use crate::scene::Scene;

/// Clonable shutdown flag shared between the frame loop and whoever
/// decides the viewer should stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-frame logic, separated from the window event loop so it runs in
/// tests without a window or a GPU.
///
/// A tick applies pending camera input and hands the scene to the draw
/// callback exactly once. Draw failures are logged and the loop keeps
/// running; only cancellation stops it.
#[derive(Debug)]
pub struct FrameLoop {
    cancel: CancelToken,
    last_frame: Instant,
}

impl FrameLoop {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            last_frame: Instant::now(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs one frame. Returns false once the token is cancelled, in
    /// which case the draw callback is not invoked.
    pub fn tick<F>(&mut self, rig: &mut CameraRig, scene: &Scene, draw: F) -> bool
    where
        F: FnOnce(&Scene, &Camera) -> Result<()>,
    {
        if self.cancel.is_cancelled() {
            return false;
        }

        let now = Instant::now();
        let dt = now - self.last_frame;
        self.last_frame = now;
        log::trace!("frame tick, dt {:?}", dt);

        rig.update();

        if let Err(err) = draw(scene, &rig.camera) {
            log::error!("frame draw failed: {err:#}");
        }
        true
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new(CancelToken::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn tick_draws_exactly_once() {
        let mut frames = FrameLoop::default();
        let mut rig = CameraRig::default();
        let scene = Scene::with_default_lights();

        let mut calls = 0;
        let alive = frames.tick(&mut rig, &scene, |_, _| {
            calls += 1;
            Ok(())
        });
        assert!(alive);
        assert_eq!(calls, 1);
    }

    #[test]
    fn cancelled_loop_skips_drawing() {
        let mut frames = FrameLoop::default();
        frames.cancel_token().cancel();

        let mut rig = CameraRig::default();
        let scene = Scene::new();
        let mut drawn = false;
        let alive = frames.tick(&mut rig, &scene, |_, _| {
            drawn = true;
            Ok(())
        });
        assert!(!alive);
        assert!(!drawn);
    }

    #[test]
    fn draw_errors_do_not_stop_the_loop() {
        let mut frames = FrameLoop::default();
        let mut rig = CameraRig::default();
        let scene = Scene::new();

        assert!(frames.tick(&mut rig, &scene, |_, _| Err(anyhow!("device lost"))));
        assert!(frames.tick(&mut rig, &scene, |_, _| Ok(())));
    }

    #[test]
    fn tick_applies_pending_camera_input() {
        let mut frames = FrameLoop::default();
        let mut rig = CameraRig::default();
        rig.controller.zoom(1.0);
        let scene = Scene::new();

        frames.tick(&mut rig, &scene, |_, _| Ok(()));
        assert!(rig.camera.distance < 5.0);
        assert!(!rig.controller.has_pending_input());
    }

    #[test]
    fn empty_scene_ticks_cleanly() {
        let mut frames = FrameLoop::default();
        let mut rig = CameraRig::default();
        let scene = Scene::new();
        assert!(frames.tick(&mut rig, &scene, |scene, _| {
            assert!(scene.is_empty());
            Ok(())
        }));
    }
}
