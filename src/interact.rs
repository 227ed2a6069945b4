//! Translates pointer and scroll input into mask/media edits through the
//! edit-mode state machine, with hit-testing (vertex proximity, polygon
//! containment) against the project's mask list.

use kurbo::Point;

use crate::{
    mask::MaskId,
    project::Project,
    transform::point_in_polygon,
};

/// Pixel radius for grabbing a vertex.
pub const VERTEX_HIT_RADIUS: f64 = 10.0;

/// The "attach media" affordance is an 80x40 box on the mask center.
const ATTACH_HALF_WIDTH: f64 = 40.0;
const ATTACH_HALF_HEIGHT: f64 = 20.0;

/// Degrees of rotation per horizontal drag pixel.
const ROTATE_PER_PIXEL: f64 = 0.5;
/// Scale fraction per vertical drag pixel; dragging up scales up.
const SCALE_PER_PIXEL: f64 = 0.005;

const WHEEL_SCALE_UP: f64 = 1.05;
const WHEEL_SCALE_DOWN: f64 = 0.95;
const WHEEL_ROTATE_DEGREES: f64 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditTarget {
    Mask,
    Media,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditType {
    Rotate,
    Move,
    Scale,
    Perspective,
}

/// What a pointer-down resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerResponse {
    /// The user clicked the attach affordance of a media-less mask; the
    /// shell opens its file/device chooser and attaches the result.
    AttachMediaRequested(MaskId),
    Handled,
    Ignored,
}

#[derive(Clone, Copy, Debug)]
struct DragSession {
    mask: MaskId,
    /// Grabbed vertex, if the drag started on one.
    vertex: Option<usize>,
    /// Pointer position at drag start (nearest-vertex perspective drags).
    start: Point,
    /// Last sampled pointer position; deltas are per move sample.
    last: Point,
    /// True when this session edits the media offset (modifier drag).
    media: bool,
}

/// Edit-mode state machine + active drag session.
pub struct InteractionController {
    pub edit_target: EditTarget,
    pub edit_type: EditType,
    selected: Option<MaskId>,
    drag: Option<DragSession>,
}

impl Default for InteractionController {
    fn default() -> Self {
        Self {
            edit_target: EditTarget::Mask,
            edit_type: EditType::Move,
            selected: None,
            drag: None,
        }
    }
}

impl InteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<MaskId> {
        self.selected
    }

    pub fn select(&mut self, id: Option<MaskId>) {
        self.selected = id;
    }

    /// Drop the selection if it points at a mask that no longer exists
    /// (called after deletions).
    pub fn prune_selection(&mut self, project: &Project) {
        if let Some(id) = self.selected
            && project.mask(id).is_none()
        {
            self.selected = None;
        }
        if let Some(d) = self.drag
            && project.mask(d.mask).is_none()
        {
            self.drag = None;
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Resolve a pointer-down. First match wins; hidden and locked masks
    /// never participate.
    pub fn pointer_down(
        &mut self,
        project: &Project,
        pos: Point,
        media_modifier: bool,
    ) -> PointerResponse {
        // 1. Attach affordance on a mask with no media.
        for mask in project.masks() {
            if mask.hidden || mask.locked || mask.has_media() {
                continue;
            }
            let c = mask.center();
            if (pos.x - c.x).abs() < ATTACH_HALF_WIDTH && (pos.y - c.y).abs() < ATTACH_HALF_HEIGHT {
                return PointerResponse::AttachMediaRequested(mask.id);
            }
        }

        // 2. Modifier drag moves the media inside its mask.
        if media_modifier {
            for mask in project.masks() {
                if mask.hidden || mask.locked || !mask.has_media() {
                    continue;
                }
                if point_in_polygon(pos, &mask.vertices) {
                    self.selected = Some(mask.id);
                    self.drag = Some(DragSession {
                        mask: mask.id,
                        vertex: None,
                        start: pos,
                        last: pos,
                        media: true,
                    });
                    return PointerResponse::Handled;
                }
            }
        }

        // 3. Vertex grab.
        if let Some((id, idx)) = self.vertex_at(project, pos) {
            self.selected = Some(id);
            self.drag = Some(DragSession {
                mask: id,
                vertex: Some(idx),
                start: pos,
                last: pos,
                media: false,
            });
            return PointerResponse::Handled;
        }

        // 4. Whole-mask grab.
        for mask in project.masks() {
            if mask.hidden || mask.locked {
                continue;
            }
            if point_in_polygon(pos, &mask.vertices) {
                self.selected = Some(mask.id);
                self.drag = Some(DragSession {
                    mask: mask.id,
                    vertex: None,
                    start: pos,
                    last: pos,
                    media: false,
                });
                return PointerResponse::Handled;
            }
        }

        PointerResponse::Ignored
    }

    /// Vertex hit-test, usable for hover highlighting too.
    pub fn vertex_at(&self, project: &Project, pos: Point) -> Option<(MaskId, usize)> {
        for mask in project.masks() {
            if mask.hidden || mask.locked {
                continue;
            }
            for (i, v) in mask.vertices.iter().enumerate() {
                if v.distance(pos) < VERTEX_HIT_RADIUS {
                    return Some((mask.id, i));
                }
            }
        }
        None
    }

    /// Apply the active drag according to `(edit_target, edit_type)`.
    pub fn pointer_move(&mut self, project: &mut Project, pos: Point) {
        let Some(mut session) = self.drag else {
            return;
        };
        let Some(mask) = project.mask_mut(session.mask) else {
            self.drag = None;
            return;
        };
        // A mask locked mid-drag stops responding but keeps the session.
        if mask.locked {
            return;
        }

        let dx = pos.x - session.last.x;
        let dy = pos.y - session.last.y;

        if session.media || self.edit_target == EditTarget::Media {
            let t = &mut mask.media_transform;
            match self.edit_type {
                EditType::Rotate if !session.media => t.rotation += dx * ROTATE_PER_PIXEL,
                EditType::Scale if !session.media => t.set_scale(t.scale - dy * SCALE_PER_PIXEL),
                // Move, Perspective (aliased: media-space perspective is a
                // known gap, deliberately left as plain offset), and any
                // modifier-initiated drag.
                _ => {
                    t.offset_x += dx;
                    t.offset_y += dy;
                }
            }
        } else {
            match self.edit_type {
                EditType::Rotate => mask.rotate_mask(dx * ROTATE_PER_PIXEL),
                EditType::Move => match session.vertex {
                    Some(idx) => mask.set_vertex(idx, pos),
                    None => mask.translate(dx, dy),
                },
                EditType::Scale => mask.scale_mask(-dy * SCALE_PER_PIXEL),
                EditType::Perspective => match session.vertex {
                    Some(idx) => mask.set_vertex(idx, pos),
                    None => {
                        // Adopt the vertex nearest the drag start and pull
                        // it along for the rest of the session.
                        let nearest = mask
                            .vertices
                            .iter()
                            .enumerate()
                            .min_by(|(_, a), (_, b)| {
                                a.distance(session.start).total_cmp(&b.distance(session.start))
                            })
                            .map(|(i, _)| i);
                        if let Some(idx) = nearest {
                            session.vertex = Some(idx);
                            let v = mask.vertices[idx];
                            mask.set_vertex(idx, Point::new(v.x + dx, v.y + dy));
                        }
                    }
                },
            }
        }

        session.last = pos;
        self.drag = Some(session);
    }

    /// End the drag session unconditionally, clearing all transient
    /// state.
    pub fn pointer_up(&mut self) {
        self.drag = None;
    }

    /// Scroll-wheel media control on the selected mask, independent of
    /// the edit type: ±5% scale per notch, or ±5° rotation with the
    /// rotate modifier held.
    pub fn wheel(&mut self, project: &mut Project, notches: f64, rotate_modifier: bool) {
        if notches == 0.0 {
            return;
        }
        let Some(mask) = self.selected.and_then(|id| project.mask_mut(id)) else {
            return;
        };
        if mask.locked || !mask.has_media() {
            return;
        }

        let t = &mut mask.media_transform;
        if rotate_modifier {
            t.rotation += WHEEL_ROTATE_DEGREES * notches.signum() * notches.abs().ceil();
        } else {
            let per_notch = if notches > 0.0 {
                WHEEL_SCALE_UP
            } else {
                WHEEL_SCALE_DOWN
            };
            t.set_scale(t.scale * per_notch.powf(notches.abs().ceil()));
        }
    }
}
