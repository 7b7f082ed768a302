use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::obj::ObjModel;

/// Kinds of lights the renderer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightKind {
    Ambient,
    Directional,
}

/// One light in the scene.
///
/// `position` is meaningless for ambient lights and kept at the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub kind: LightKind,
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Ambient,
            position: Vec3::ZERO,
            color,
            intensity,
        }
    }

    pub fn directional(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            position,
            color,
            intensity,
        }
    }
}

/// A loaded model placed in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub model: ObjModel,
}

impl SceneObject {
    /// Places a model at the origin with identity orientation.
    pub fn from_model(name: impl Into<String>, model: ObjModel) -> Self {
        Self {
            name: name.into(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            model,
        }
    }

    pub fn transform(&self) -> glam::Mat4 {
        glam::Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Everything the renderer draws: objects in insertion order plus lights.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub lights: Vec<Light>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty scene carrying the viewer's fixed lighting: a half-strength
    /// white ambient term and a white directional light above and behind
    /// the default camera.
    pub fn with_default_lights() -> Self {
        Self {
            objects: Vec::new(),
            lights: vec![
                Light::ambient(Vec3::ONE, 0.5),
                Light::directional(Vec3::new(0.0, 5.0, 5.0), Vec3::ONE, 0.8),
            ],
        }
    }

    pub fn push(&mut self, object: SceneObject) {
        self.objects.push(object);
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// First ambient light, if any.
    pub fn ambient_light(&self) -> Option<&Light> {
        self.lights.iter().find(|l| l.kind == LightKind::Ambient)
    }

    /// First directional light, if any.
    pub fn directional_light(&self) -> Option<&Light> {
        self.lights
            .iter()
            .find(|l| l.kind == LightKind::Directional)
    }

    /// Total triangle count across all objects, for summaries and logs.
    pub fn triangle_count(&self) -> usize {
        self.objects
            .iter()
            .flat_map(|o| o.model.surfaces.iter())
            .map(|s| s.triangle_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtl::MaterialSet;
    use crate::obj::load_obj_from_str;

    fn triangle_model() -> ObjModel {
        load_obj_from_str(
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
            &MaterialSet::default(),
        )
        .unwrap()
    }

    #[test]
    fn default_lights_match_the_viewer_dressing() {
        let scene = Scene::with_default_lights();
        assert!(scene.is_empty());

        let ambient = scene.ambient_light().unwrap();
        assert_eq!(ambient.color, Vec3::ONE);
        assert!((ambient.intensity - 0.5).abs() < f32::EPSILON);

        let sun = scene.directional_light().unwrap();
        assert_eq!(sun.position, Vec3::new(0.0, 5.0, 5.0));
        assert!((sun.intensity - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn objects_keep_insertion_order() {
        let mut scene = Scene::new();
        scene.push(SceneObject::from_model("first", triangle_model()));
        scene.push(SceneObject::from_model("second", triangle_model()));
        let names: Vec<&str> = scene.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(scene.triangle_count(), 2);
    }

    #[test]
    fn from_model_places_at_origin() {
        let object = SceneObject::from_model("m", triangle_model());
        assert_eq!(object.position, Vec3::ZERO);
        assert_eq!(object.rotation, Quat::IDENTITY);
        assert_eq!(object.scale, Vec3::ONE);
        assert_eq!(object.transform(), glam::Mat4::IDENTITY);
    }
}
