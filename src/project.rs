//! The project model: an ordered, owned mask list plus the canvas size,
//! the arena of concurrently open projects, and the on-disk JSON
//! document (`.bad`).
//!
//! All list mutation (add/remove/reorder) goes through [`Project`] so
//! z-order and id stability are enforced in one place.

use std::path::{Path, PathBuf};

use kurbo::Point;
use tracing::warn;

use crate::{
    error::{PromapError, PromapResult},
    mask::{Mask, MaskId, MaskShape, MediaTransform},
    media::{FrameSource, MediaDescriptor, MediaKind},
};

pub const DEFAULT_CANVAS_WIDTH: u32 = 1920;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1080;
pub const PROJECT_EXTENSION: &str = "bad";

const DOC_VERSION: &str = "1.0";

/// Canvas size + ordered masks. Index 0 paints first; later masks paint
/// over earlier ones.
pub struct Project {
    pub width: u32,
    pub height: u32,
    masks: Vec<Mask>,
    next_mask_id: u64,
}

impl Project {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            masks: Vec::new(),
            next_mask_id: 0,
        }
    }

    /// The "new project" starting point: default canvas with one
    /// rectangle mask.
    pub fn with_default_mask() -> Self {
        let mut p = Self::new(DEFAULT_CANVAS_WIDTH, DEFAULT_CANVAS_HEIGHT);
        p.add_mask(MaskShape::Rectangle, 600.0, 400.0, Point::new(200.0, 200.0));
        p
    }

    fn alloc_id(&mut self) -> MaskId {
        let id = MaskId(self.next_mask_id);
        self.next_mask_id += 1;
        id
    }

    pub fn add_mask(
        &mut self,
        shape: MaskShape,
        width: f64,
        height: f64,
        position: Point,
    ) -> MaskId {
        let id = self.alloc_id();
        self.masks.push(Mask::new(id, shape, width, height, position));
        id
    }

    /// Remove a mask, releasing its media first.
    pub fn remove_mask(&mut self, id: MaskId) -> bool {
        let Some(idx) = self.masks.iter().position(|m| m.id == id) else {
            return false;
        };
        self.masks[idx].clear_media();
        self.masks.remove(idx);
        true
    }

    /// Reorder a mask within the paint order.
    pub fn move_mask_to(&mut self, id: MaskId, index: usize) -> bool {
        let Some(from) = self.masks.iter().position(|m| m.id == id) else {
            return false;
        };
        let to = index.min(self.masks.len() - 1);
        let mask = self.masks.remove(from);
        self.masks.insert(to, mask);
        true
    }

    pub fn mask(&self, id: MaskId) -> Option<&Mask> {
        self.masks.iter().find(|m| m.id == id)
    }

    pub fn mask_mut(&mut self, id: MaskId) -> Option<&mut Mask> {
        self.masks.iter_mut().find(|m| m.id == id)
    }

    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    /// Mutable slice access for the compositor / interaction controller.
    /// Order is paint order; callers must not restructure the list.
    pub fn masks_mut(&mut self) -> &mut [Mask] {
        &mut self.masks
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Changing the canvas invalidates any cached buffer sizes; callers
    /// resize their compositor to match.
    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Release every mask's media (application shutdown).
    pub fn release_all_media(&mut self) {
        for mask in &mut self.masks {
            mask.clear_media();
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk document
// ---------------------------------------------------------------------------

fn default_version() -> String {
    DOC_VERSION.to_string()
}

fn default_mask_width() -> f64 {
    400.0
}

fn default_mask_height() -> f64 {
    300.0
}

fn default_mask_position() -> [f64; 2] {
    [100.0, 100.0]
}

fn default_scale() -> f64 {
    1.0
}

fn default_shape() -> MaskShape {
    MaskShape::Rectangle
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ProjectDoc {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    projection: ProjectionDoc,
    #[serde(default)]
    masks: Vec<MaskDoc>,
}

fn default_canvas_width() -> u32 {
    DEFAULT_CANVAS_WIDTH
}

fn default_canvas_height() -> u32 {
    DEFAULT_CANVAS_HEIGHT
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ProjectionDoc {
    #[serde(default = "default_canvas_width")]
    width: u32,
    #[serde(default = "default_canvas_height")]
    height: u32,
}

impl Default for ProjectionDoc {
    fn default() -> Self {
        Self {
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MaskDoc {
    #[serde(rename = "type", default = "default_shape")]
    shape: MaskShape,
    #[serde(default = "default_mask_width")]
    width: f64,
    #[serde(default = "default_mask_height")]
    height: f64,
    #[serde(default = "default_mask_position")]
    position: [f64; 2],
    #[serde(default)]
    vertices: Vec<[f64; 2]>,
    #[serde(default)]
    original_vertices: Vec<[f64; 2]>,
    #[serde(default)]
    rotation: f64,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    media: Option<MediaDoc>,
    #[serde(default)]
    media_transform: MediaTransformDoc,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MediaDoc {
    path: PathBuf,
    /// Absent in older documents; the path's extension decides then.
    #[serde(default)]
    kind: Option<MediaKind>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct MediaTransformDoc {
    #[serde(default)]
    offset_x: f64,
    #[serde(default)]
    offset_y: f64,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default)]
    rotation: f64,
    /// Format placeholder; media-space perspective editing is not
    /// implemented, but old documents may carry the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    perspective_points: Option<Vec<[f64; 2]>>,
}

impl Default for MediaTransformDoc {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            scale: 1.0,
            rotation: 0.0,
            perspective_points: None,
        }
    }
}

fn to_xy(p: Point) -> [f64; 2] {
    [p.x, p.y]
}

fn from_xy(v: [f64; 2]) -> Point {
    Point::new(v[0], v[1])
}

fn mask_to_doc(mask: &Mask) -> MaskDoc {
    let media = mask.media.as_ref().and_then(|m| {
        let descriptor = m.descriptor();
        // Webcams are live devices and synthetic sources have no path;
        // neither is persisted.
        descriptor
            .path()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| MediaDoc {
                path: p.to_path_buf(),
                kind: Some(descriptor.kind()),
            })
    });

    MaskDoc {
        shape: mask.shape,
        width: mask.width,
        height: mask.height,
        position: to_xy(mask.position),
        vertices: mask.vertices.iter().copied().map(to_xy).collect(),
        original_vertices: mask.original_vertices.iter().copied().map(to_xy).collect(),
        rotation: mask.rotation,
        scale: mask.scale,
        hidden: mask.hidden,
        locked: mask.locked,
        media,
        media_transform: MediaTransformDoc {
            offset_x: mask.media_transform.offset_x,
            offset_y: mask.media_transform.offset_y,
            scale: mask.media_transform.scale,
            rotation: mask.media_transform.rotation,
            perspective_points: None,
        },
    }
}

fn mask_from_doc(project: &mut Project, doc: MaskDoc) {
    let id = project.alloc_id();
    let mut mask = Mask::new(id, doc.shape, doc.width, doc.height, from_xy(doc.position));

    let wanted = doc.shape.vertex_count();
    if doc.vertices.len() == wanted {
        mask.vertices = doc.vertices.into_iter().map(from_xy).collect();
    }
    if doc.original_vertices.len() == wanted {
        mask.original_vertices = doc.original_vertices.into_iter().map(from_xy).collect();
    }
    mask.rotation = doc.rotation;
    mask.scale = doc.scale;
    mask.hidden = doc.hidden;
    mask.locked = doc.locked;
    mask.media_transform = MediaTransform {
        offset_x: doc.media_transform.offset_x,
        offset_y: doc.media_transform.offset_y,
        scale: doc.media_transform.scale.max(crate::mask::MIN_MEDIA_SCALE),
        rotation: doc.media_transform.rotation,
    };

    // A mask whose media file went missing still loads; it just comes up
    // empty.
    if let Some(media_doc) = doc.media {
        let descriptor = match media_doc.kind {
            Some(MediaKind::Image) => Some(MediaDescriptor::ImagePath(media_doc.path)),
            Some(MediaKind::Video) => Some(MediaDescriptor::VideoPath(media_doc.path)),
            // Live devices are not persisted.
            Some(MediaKind::Webcam) => None,
            None => Some(MediaDescriptor::from_path(media_doc.path)),
        };
        if let Some(descriptor) = descriptor {
            match FrameSource::open(&descriptor) {
                Ok(source) => mask.attach_media(source),
                Err(e) => warn!("dropping media for loaded mask: {e}"),
            }
        }
    }

    project.masks.push(mask);
}

/// Normalize to the project extension, mirroring what the save dialog
/// produces.
fn with_project_extension(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case(PROJECT_EXTENSION) => path.to_path_buf(),
        _ => {
            let mut s = path.as_os_str().to_os_string();
            s.push(".");
            s.push(PROJECT_EXTENSION);
            PathBuf::from(s)
        }
    }
}

/// Save a project document. Returns the path actually written (the
/// `.bad` extension is appended when missing).
pub fn save_project(project: &Project, path: &Path) -> PromapResult<PathBuf> {
    let doc = ProjectDoc {
        version: DOC_VERSION.to_string(),
        projection: ProjectionDoc {
            width: project.width,
            height: project.height,
        },
        masks: project.masks().iter().map(mask_to_doc).collect(),
    };

    let path = with_project_extension(path);
    let json = serde_json::to_string_pretty(&doc)
        .map_err(|e| PromapError::validation(format!("project serialization failed: {e}")))?;
    use anyhow::Context as _;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write project '{}'", path.display()))?;
    Ok(path)
}

/// Load a project document. Malformed/unreadable documents fail the whole
/// load with `ProjectLoad`; unknown versions and missing fields fall back
/// to defaults; missing media files leave the mask's media empty.
pub fn load_project(path: &Path) -> PromapResult<Project> {
    let bytes = std::fs::read(path).map_err(|e| {
        PromapError::project_load(format!("cannot read '{}': {e}", path.display()))
    })?;
    let doc: ProjectDoc = serde_json::from_slice(&bytes).map_err(|e| {
        PromapError::project_load(format!("malformed project '{}': {e}", path.display()))
    })?;

    if doc.version != DOC_VERSION {
        warn!(
            "project '{}' has version '{}', loading with defaults for unknown fields",
            path.display(),
            doc.version
        );
    }

    let mut project = Project::new(doc.projection.width, doc.projection.height);
    for mask_doc in doc.masks {
        mask_from_doc(&mut project, mask_doc);
    }
    Ok(project)
}

// ---------------------------------------------------------------------------
// Open-project arena
// ---------------------------------------------------------------------------

/// Stable identifier for an open project. Not the file path: paths
/// change on save-as and unsaved projects have none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProjectId(pub u64);

pub struct ProjectEntry {
    pub id: ProjectId,
    pub name: String,
    pub path: Option<PathBuf>,
    pub project: Project,
}

/// The arena of concurrently open projects. Each entry owns its masks
/// (and through them the media handles); switching the active project is
/// just changing the id, nothing is copied back and forth.
#[derive(Default)]
pub struct ProjectStore {
    entries: Vec<ProjectEntry>,
    active: Option<ProjectId>,
    next_id: u64,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&mut self) -> ProjectId {
        let id = ProjectId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create a new untitled project (default canvas + starter mask) and
    /// make it active.
    pub fn create(&mut self) -> ProjectId {
        let id = self.alloc_id();
        let name = format!("Untitled Project {}", self.entries.len() + 1);
        self.entries.push(ProjectEntry {
            id,
            name,
            path: None,
            project: Project::with_default_mask(),
        });
        self.active = Some(id);
        id
    }

    /// Open a project file. If that path is already open, switch to it
    /// instead of loading a second copy.
    pub fn open(&mut self, path: &Path) -> PromapResult<ProjectId> {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.path.as_deref() == Some(path))
            .map(|e| e.id)
        {
            self.active = Some(existing);
            return Ok(existing);
        }

        let project = load_project(path)?;
        let id = self.alloc_id();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        self.entries.push(ProjectEntry {
            id,
            name,
            path: Some(path.to_path_buf()),
            project,
        });
        self.active = Some(id);
        Ok(id)
    }

    pub fn activate(&mut self, id: ProjectId) -> bool {
        if self.entries.iter().any(|e| e.id == id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    pub fn active_id(&self) -> Option<ProjectId> {
        self.active
    }

    pub fn active(&self) -> Option<&ProjectEntry> {
        self.active
            .and_then(|id| self.entries.iter().find(|e| e.id == id))
    }

    pub fn active_mut(&mut self) -> Option<&mut ProjectEntry> {
        let id = self.active?;
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Save the active project to its known path.
    pub fn save_active(&mut self) -> PromapResult<PathBuf> {
        let entry = self
            .active_mut()
            .ok_or_else(|| PromapError::validation("no active project to save"))?;
        let path = entry
            .path
            .clone()
            .ok_or_else(|| PromapError::validation("project has no file path; use save-as"))?;
        save_project(&entry.project, &path)
    }

    /// Save the active project to a new path, adopting it (and the file
    /// stem as the project name).
    pub fn save_active_as(&mut self, path: &Path) -> PromapResult<PathBuf> {
        let entry = self
            .active_mut()
            .ok_or_else(|| PromapError::validation("no active project to save"))?;
        let written = save_project(&entry.project, path)?;
        entry.name = written
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        entry.path = Some(written.clone());
        Ok(written)
    }

    pub fn entries(&self) -> &[ProjectEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_and_reorder_masks() {
        let mut p = Project::new(640, 480);
        let a = p.add_mask(MaskShape::Rectangle, 100.0, 100.0, Point::new(0.0, 0.0));
        let b = p.add_mask(MaskShape::Triangle, 100.0, 100.0, Point::new(50.0, 50.0));
        let c = p.add_mask(MaskShape::Rectangle, 100.0, 100.0, Point::new(99.0, 99.0));
        assert_ne!(a, b);
        assert_eq!(p.len(), 3);

        assert!(p.move_mask_to(c, 0));
        assert_eq!(p.masks()[0].id, c);
        assert_eq!(p.masks()[2].id, b);

        assert!(p.remove_mask(b));
        assert!(!p.remove_mask(b));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn mask_ids_are_not_reused_after_removal() {
        let mut p = Project::new(640, 480);
        let a = p.add_mask(MaskShape::Rectangle, 10.0, 10.0, Point::new(0.0, 0.0));
        p.remove_mask(a);
        let b = p.add_mask(MaskShape::Rectangle, 10.0, 10.0, Point::new(0.0, 0.0));
        assert_ne!(a, b);
    }

    #[test]
    fn extension_normalization() {
        assert_eq!(
            with_project_extension(Path::new("/tmp/show")),
            PathBuf::from("/tmp/show.bad")
        );
        assert_eq!(
            with_project_extension(Path::new("/tmp/show.bad")),
            PathBuf::from("/tmp/show.bad")
        );
        assert_eq!(
            with_project_extension(Path::new("/tmp/show.json")),
            PathBuf::from("/tmp/show.json.bad")
        );
    }

    #[test]
    fn tolerant_load_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.bad");
        // Future version, missing projection and most mask fields.
        std::fs::write(
            &path,
            r#"{"version":"9.9","masks":[{"type":"triangle"}]}"#,
        )
        .unwrap();

        let p = load_project(&path).unwrap();
        assert_eq!(p.width, DEFAULT_CANVAS_WIDTH);
        assert_eq!(p.height, DEFAULT_CANVAS_HEIGHT);
        assert_eq!(p.len(), 1);
        let m = &p.masks()[0];
        assert_eq!(m.shape, MaskShape::Triangle);
        assert_eq!(m.vertices.len(), 3);
        assert!(m.media.is_none());
        assert!(m.media_transform.is_identity());
    }

    #[test]
    fn malformed_document_is_project_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bad");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_project(&path),
            Err(PromapError::ProjectLoad(_))
        ));
        assert!(matches!(
            load_project(&dir.path().join("missing.bad")),
            Err(PromapError::ProjectLoad(_))
        ));
    }

    #[test]
    fn missing_media_path_loads_mask_without_media() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.bad");
        std::fs::write(
            &path,
            r#"{
                "version": "1.0",
                "projection": {"width": 800, "height": 600},
                "masks": [{
                    "type": "rectangle",
                    "media": {"path": "/nowhere/gone.png", "kind": "image"}
                }]
            }"#,
        )
        .unwrap();

        let p = load_project(&path).unwrap();
        assert_eq!(p.len(), 1);
        assert!(p.masks()[0].media.is_none());
    }

    #[test]
    fn store_create_open_switch() {
        let mut store = ProjectStore::new();
        let a = store.create();
        assert_eq!(store.active_id(), Some(a));
        assert_eq!(store.active().unwrap().project.len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let written = store.save_active_as(&dir.path().join("one")).unwrap();
        assert!(written.ends_with("one.bad"));
        assert_eq!(store.active().unwrap().name, "one");

        let b = store.create();
        assert_ne!(a, b);
        assert_eq!(store.active_id(), Some(b));

        // Opening the already-open path switches instead of duplicating.
        let reopened = store.open(&written).unwrap();
        assert_eq!(reopened, a);
        assert_eq!(store.entries().len(), 2);
    }
}
