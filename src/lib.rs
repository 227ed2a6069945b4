#![forbid(unsafe_code)]

pub mod error;
pub mod export;
pub mod frame;
pub mod interact;
pub mod mask;
pub mod media;
pub mod project;
pub mod render;
pub mod transform;

pub use error::{PromapError, PromapResult};
pub use export::{ExportConfig, ExportStats, export_video, suggested_duration_secs};
pub use frame::Frame;
pub use interact::{EditTarget, EditType, InteractionController, PointerResponse};
pub use mask::{Mask, MaskId, MaskShape, MediaTransform};
pub use media::{FrameSource, MediaDescriptor, MediaKind};
pub use project::{Project, ProjectId, ProjectStore, load_project, save_project};
pub use render::{Compositor, RenderSettings};
pub use transform::Homography;
