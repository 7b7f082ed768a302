use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use thiserror::Error;

use crate::mtl::{load_mtl_from_str, MaterialSet};
use crate::obj::{load_obj_from_str, ObjModel};

/// The two phases of a model load, in mandatory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Material,
    Geometry,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStage::Material => f.write_str("material stage"),
            LoadStage::Geometry => f.write_str("geometry stage"),
        }
    }
}

/// Terminal failure of a load request, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("material stage failed for {file}: {cause:#}")]
    Material { file: String, cause: anyhow::Error },
    #[error("geometry stage failed for {file}: {cause:#}")]
    Geometry { file: String, cause: anyhow::Error },
}

impl LoadError {
    pub fn stage(&self) -> LoadStage {
        match self {
            LoadError::Material { .. } => LoadStage::Material,
            LoadError::Geometry { .. } => LoadStage::Geometry,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            LoadError::Material { file, .. } | LoadError::Geometry { file, .. } => file,
        }
    }
}

/// Names the material and geometry resources of one model load.
///
/// Both names are resolved by the [`AssetSource`] the loader was built
/// with; a request never changes after it is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    material_file: String,
    geometry_file: String,
}

impl LoadRequest {
    pub fn new(material_file: impl Into<String>, geometry_file: impl Into<String>) -> Self {
        Self {
            material_file: material_file.into(),
            geometry_file: geometry_file.into(),
        }
    }

    pub fn material_file(&self) -> &str {
        &self.material_file
    }

    pub fn geometry_file(&self) -> &str {
        &self.geometry_file
    }
}

/// Byte-level progress of one stage fetch; observational only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadProgress {
    pub stage: LoadStage,
    pub bytes: u64,
    pub total: Option<u64>,
}

/// Resolves resource names to raw bytes.
pub trait AssetSource {
    fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

/// Filesystem source rooted at an asset directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    base: PathBuf,
}

impl DirectorySource {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl AssetSource for DirectorySource {
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.base.join(name);
        std::fs::read(&path).with_context(|| format!("unable to read {}", path.display()))
    }
}

/// In-memory source used by fixtures and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }
}

impl AssetSource for MemorySource {
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("resource not found: {name}"))
    }
}

type ProgressFn = dyn Fn(LoadProgress) + Send + Sync;

/// Two-stage model loader: material definitions first, then geometry
/// bound to the parsed material set.
///
/// The loader never mutates a scene; the caller inserts the returned
/// model. A failure at either stage is terminal for the request — the
/// geometry stage is only reached once materials resolved successfully.
pub struct AssetLoader<S: AssetSource> {
    source: S,
    progress: Option<Box<ProgressFn>>,
}

impl<S: AssetSource> AssetLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            progress: None,
        }
    }

    /// Installs an observer for per-stage fetch progress.
    pub fn with_progress(
        mut self,
        observer: impl Fn(LoadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(observer));
        self
    }

    /// Runs both load stages and yields the finished model.
    pub async fn load(&self, request: &LoadRequest) -> Result<ObjModel, LoadError> {
        let materials = self.load_materials(request).await?;
        self.load_geometry(request, &materials).await
    }

    async fn load_materials(&self, request: &LoadRequest) -> Result<MaterialSet, LoadError> {
        let fail = |cause| LoadError::Material {
            file: request.material_file.clone(),
            cause,
        };
        let text = self
            .fetch_text(&request.material_file, LoadStage::Material)
            .map_err(fail)?;
        load_mtl_from_str(&text).map_err(fail)
    }

    async fn load_geometry(
        &self,
        request: &LoadRequest,
        materials: &MaterialSet,
    ) -> Result<ObjModel, LoadError> {
        let fail = |cause| LoadError::Geometry {
            file: request.geometry_file.clone(),
            cause,
        };
        let text = self
            .fetch_text(&request.geometry_file, LoadStage::Geometry)
            .map_err(fail)?;
        load_obj_from_str(&text, materials).map_err(fail)
    }

    fn fetch_text(&self, name: &str, stage: LoadStage) -> Result<String> {
        let bytes = self.source.fetch(name)?;
        if let Some(observer) = &self.progress {
            let len = bytes.len() as u64;
            observer(LoadProgress {
                stage,
                bytes: len,
                total: Some(len),
            });
        }
        String::from_utf8(bytes).with_context(|| format!("{name} is not valid UTF-8"))
    }
}

/// Latest progress notification, shared across threads.
///
/// The loader usually runs on a worker thread; the event loop polls this
/// cell when it wants to report progress without blocking on the worker.
#[derive(Debug, Clone, Default)]
pub struct SharedProgress {
    latest: Arc<RwLock<Option<LoadProgress>>>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, progress: LoadProgress) {
        *self.latest.write() = Some(progress);
    }

    pub fn latest(&self) -> Option<LoadProgress> {
        *self.latest.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Scene, SceneObject};
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use pollster::block_on;
    use std::io::Write;

    static RED_MTL: Lazy<String> = Lazy::new(|| "newmtl red\nKd 1 0 0\n".to_string());
    static RED_OBJ: Lazy<String> = Lazy::new(|| {
        "mtllib model.mtl\nusemtl red\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".to_string()
    });

    fn red_source() -> MemorySource {
        let mut source = MemorySource::new();
        source.insert("model.mtl", RED_MTL.as_bytes());
        source.insert("model.obj", RED_OBJ.as_bytes());
        source
    }

    /// Wraps a source and counts fetches per resource name.
    struct CountingSource {
        inner: MemorySource,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl CountingSource {
        fn new(inner: MemorySource) -> Self {
            Self {
                inner,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn count(&self, name: &str) -> usize {
            self.calls.lock().get(name).copied().unwrap_or(0)
        }
    }

    impl AssetSource for &CountingSource {
        fn fetch(&self, name: &str) -> Result<Vec<u8>> {
            *self.calls.lock().entry(name.to_string()).or_insert(0) += 1;
            self.inner.fetch(name)
        }
    }

    #[test]
    fn successful_load_adds_exactly_one_scene_object() {
        let loader = AssetLoader::new(red_source());
        let request = LoadRequest::new("model.mtl", "model.obj");
        let model = block_on(loader.load(&request)).unwrap();

        let mut scene = Scene::with_default_lights();
        let before = scene.objects.len();
        scene.push(SceneObject::from_model("model.obj", model));
        assert_eq!(scene.objects.len(), before + 1);
        let object = scene.objects.last().unwrap();
        assert_eq!(object.model.surfaces.len(), 1);
        assert_eq!(object.model.surfaces[0].material.name, "red");
    }

    #[test]
    fn material_failure_never_fetches_geometry() {
        let mut source = MemorySource::new();
        source.insert("model.obj", RED_OBJ.as_bytes());
        let counting = CountingSource::new(source);

        let loader = AssetLoader::new(&counting);
        let request = LoadRequest::new("model.mtl", "model.obj");
        let err = block_on(loader.load(&request)).unwrap_err();

        assert_eq!(err.stage(), LoadStage::Material);
        assert_eq!(err.file(), "model.mtl");
        assert_eq!(counting.count("model.obj"), 0);
    }

    #[test]
    fn unparsable_materials_stop_before_geometry() {
        let mut source = MemorySource::new();
        source.insert("model.mtl", "Kd 1 0 0\n");
        source.insert("model.obj", RED_OBJ.as_bytes());
        let counting = CountingSource::new(source);

        let loader = AssetLoader::new(&counting);
        let err = block_on(loader.load(&LoadRequest::new("model.mtl", "model.obj"))).unwrap_err();
        assert_eq!(err.stage(), LoadStage::Material);
        assert_eq!(counting.count("model.obj"), 0);
    }

    #[test]
    fn unresolved_material_reference_fails_the_geometry_stage() {
        let mut source = MemorySource::new();
        source.insert("model.mtl", RED_MTL.as_bytes());
        source.insert(
            "model.obj",
            "usemtl blue\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
        );

        let loader = AssetLoader::new(source);
        let err = block_on(loader.load(&LoadRequest::new("model.mtl", "model.obj"))).unwrap_err();
        assert_eq!(err.stage(), LoadStage::Geometry);
        assert!(err.to_string().contains("blue"));

        // Failure leaves the scene untouched because nothing was returned.
        let scene = Scene::with_default_lights();
        assert_eq!(scene.objects.len(), 0);
    }

    #[test]
    fn progress_is_reported_for_both_stages() {
        let seen: Arc<Mutex<Vec<LoadProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let loader = AssetLoader::new(red_source())
            .with_progress(move |progress| sink.lock().push(progress));

        block_on(loader.load(&LoadRequest::new("model.mtl", "model.obj"))).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].stage, LoadStage::Material);
        assert_eq!(seen[1].stage, LoadStage::Geometry);
        assert!(seen.iter().all(|p| p.bytes > 0));
    }

    #[test]
    fn directory_source_reads_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("model.mtl")).unwrap();
        file.write_all(RED_MTL.as_bytes()).unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.fetch("model.mtl").unwrap(), RED_MTL.as_bytes());
        assert!(source.fetch("missing.mtl").is_err());
    }

    #[test]
    fn shared_progress_keeps_the_latest_value() {
        let shared = SharedProgress::new();
        assert!(shared.latest().is_none());
        shared.record(LoadProgress {
            stage: LoadStage::Material,
            bytes: 10,
            total: Some(10),
        });
        shared.record(LoadProgress {
            stage: LoadStage::Geometry,
            bytes: 4,
            total: None,
        });
        assert_eq!(shared.latest().unwrap().stage, LoadStage::Geometry);
    }
}
