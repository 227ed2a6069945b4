//! Masks: the polygons media gets warped into, plus the per-mask media
//! transform (offset/scale/rotation applied to the source before the
//! warp).

use kurbo::{Point, Rect, Vec2};

use crate::{media::FrameSource, transform};

/// Raw drag deltas move the media source at half speed.
pub const MEDIA_OFFSET_SCALE: f64 = 0.5;

/// Media scale is floor-clamped so content can never collapse to nothing.
pub const MIN_MEDIA_SCALE: f64 = 0.1;

/// Stable mask identity. Allocation is owned by [`crate::project::Project`];
/// equality is identity, not geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaskId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskShape {
    Rectangle,
    Triangle,
    /// Reserved for non-planar projection; renders as a rectangle today.
    Sphere,
}

impl MaskShape {
    pub fn vertex_count(self) -> usize {
        match self {
            MaskShape::Rectangle | MaskShape::Sphere => 4,
            MaskShape::Triangle => 3,
        }
    }
}

/// Offset/scale/rotation applied to a mask's media before warping.
/// Independent of the mask's own vertices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MediaTransform {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale: f64,
    pub rotation: f64,
}

impl Default for MediaTransform {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            scale: 1.0,
            rotation: 0.0,
        }
    }
}

impl MediaTransform {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale.max(MIN_MEDIA_SCALE);
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// A polygon in canvas space that media is projected into.
///
/// `vertices` is the authoritative geometry at all times; `rotation` and
/// `scale` are cumulative bookkeeping for display. Rotate/scale edits are
/// incremental about the *current* center so any perspective skew already
/// applied survives the edit.
pub struct Mask {
    pub id: MaskId,
    pub shape: MaskShape,
    pub width: f64,
    pub height: f64,
    pub position: Point,
    pub vertices: Vec<Point>,
    pub original_vertices: Vec<Point>,
    pub rotation: f64,
    pub scale: f64,
    pub hidden: bool,
    pub locked: bool,
    pub media: Option<FrameSource>,
    pub media_transform: MediaTransform,
}

impl Mask {
    pub fn new(id: MaskId, shape: MaskShape, width: f64, height: f64, position: Point) -> Self {
        let vertices = match shape {
            MaskShape::Rectangle | MaskShape::Sphere => {
                Self::rectangle_vertices(position, width, height)
            }
            MaskShape::Triangle => Self::triangle_vertices(position, width, height),
        };
        Self {
            id,
            shape,
            width,
            height,
            position,
            original_vertices: vertices.clone(),
            vertices,
            rotation: 0.0,
            scale: 1.0,
            hidden: false,
            locked: false,
            media: None,
            media_transform: MediaTransform::default(),
        }
    }

    /// Axis-aligned box, TL/TR/BR/BL winding.
    fn rectangle_vertices(position: Point, width: f64, height: f64) -> Vec<Point> {
        let (x, y) = (position.x, position.y);
        vec![
            Point::new(x, y),
            Point::new(x + width, y),
            Point::new(x + width, y + height),
            Point::new(x, y + height),
        ]
    }

    /// Apex top-center, then base bottom-right, base bottom-left.
    fn triangle_vertices(position: Point, width: f64, height: f64) -> Vec<Point> {
        let (x, y) = (position.x, position.y);
        vec![
            Point::new(x + width / 2.0, y),
            Point::new(x + width, y + height),
            Point::new(x, y + height),
        ]
    }

    /// Arithmetic mean of the current vertices.
    pub fn center(&self) -> Point {
        let sum = self
            .vertices
            .iter()
            .fold(Vec2::ZERO, |acc, p| acc + p.to_vec2());
        (sum / self.vertices.len() as f64).to_point()
    }

    /// Direct vertex replacement (perspective drag / move-by-vertex). No
    /// bounds check: masks may extend off-canvas.
    pub fn set_vertex(&mut self, index: usize, point: Point) {
        if let Some(v) = self.vertices.get_mut(index) {
            *v = point;
        }
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        let d = Vec2::new(dx, dy);
        for v in &mut self.vertices {
            *v += d;
        }
    }

    /// Rotate the current vertices about the current center. Cumulative:
    /// preserves whatever perspective skew the vertices already carry.
    pub fn rotate_mask(&mut self, delta_degrees: f64) {
        self.rotation += delta_degrees;
        let center = self.center();
        self.vertices = transform::rotate_points(&self.vertices, delta_degrees, center);
    }

    /// Scale the current vertices about the current center by
    /// `max(0.1, 1 + delta_fraction)`.
    pub fn scale_mask(&mut self, delta_fraction: f64) {
        let factor = (1.0 + delta_fraction).max(0.1);
        self.scale *= factor;
        let center = self.center();
        self.vertices = transform::scale_points(&self.vertices, factor, center);
    }

    /// Restore the creation-time shape and zero the bookkeeping fields.
    pub fn reset_transform(&mut self) {
        self.vertices = self.original_vertices.clone();
        self.rotation = 0.0;
        self.scale = 1.0;
    }

    /// Axis-aligned bounding box of the current vertices.
    pub fn bounds(&self) -> Rect {
        let first = self.vertices[0];
        self.vertices[1..]
            .iter()
            .fold(Rect::new(first.x, first.y, first.x, first.y), |r, p| {
                r.union_pt(*p)
            })
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Attach a frame source, releasing any previous one. The media
    /// transform is left as-is (a fresh mask starts at identity anyway).
    pub fn attach_media(&mut self, source: FrameSource) {
        if let Some(mut old) = self.media.take() {
            old.release();
        }
        self.media = Some(source);
    }

    /// Replace the frame source and reset the media transform to
    /// identity, so the new content starts centered and unscaled.
    pub fn replace_media(&mut self, source: FrameSource) {
        self.attach_media(source);
        self.media_transform.reset();
    }

    /// Detach and release the frame source, if any.
    pub fn clear_media(&mut self) {
        if let Some(mut old) = self.media.take() {
            old.release();
        }
    }
}
