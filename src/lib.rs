//! Core modules for the OBJ model viewer.
//!
//! The crate exposes the asset pipeline (MTL materials, OBJ geometry,
//! the two-stage loader), the scene and camera model, and the wgpu
//! renderer.  Window and event-loop integration is intentionally kept
//! in the binary so that the loading and camera logic stays testable
//! without a display or a GPU.

pub mod assets;
pub mod camera;
pub mod frame;
pub mod mtl;
pub mod obj;
pub mod render;
pub mod scene;

pub use assets::{
    AssetLoader, AssetSource, DirectorySource, LoadError, LoadProgress, LoadRequest, LoadStage,
    MemorySource, SharedProgress,
};
pub use camera::{Camera, CameraRig, OrbitController};
pub use frame::{CancelToken, FrameLoop};
pub use mtl::{load_mtl_from_str, Material, MaterialSet};
pub use obj::{load_obj_from_str, ObjModel, SurfaceMesh};
pub use render::Renderer;
pub use scene::{Light, LightKind, Scene, SceneObject};
