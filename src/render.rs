//! The compositor: per-frame warping of each mask's media into canvas
//! space, coverage-masked painter's-algorithm compositing (list order =
//! z-order, later masks overwrite earlier ones), and the debug grid
//! overlay.

use std::borrow::Cow;

use kurbo::{Affine, Point};
use tracing::debug;

use crate::{
    error::{PromapError, PromapResult},
    frame::Frame,
    mask::{MEDIA_OFFSET_SCALE, Mask},
    transform::{self, Homography},
};

const OUTLINE_RGBA: [u8; 4] = [0, 200, 255, 255];
const GRID_RGBA: [u8; 4] = [70, 70, 70, 255];
const MARKER_RGBA: [u8; 4] = [255, 255, 255, 255];

#[derive(Clone, Copy, Debug)]
pub struct RenderSettings {
    /// Canvas clear color, applied as a full overwrite each pass.
    pub clear_rgba: [u8; 4],
    /// Draw the per-mask outline + subdivision grid after compositing.
    pub show_grid: bool,
    pub grid_rows: u32,
    pub grid_cols: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_rgba: [0, 0, 0, 255],
            show_grid: false,
            grid_rows: 10,
            grid_cols: 10,
        }
    }
}

/// Owns the canvas buffer. Nothing else writes to it; every pass rebuilds
/// it from scratch (clear + repaint) on the thread that drives ticks.
pub struct Compositor {
    width: u32,
    height: u32,
    canvas: Frame,
    pub settings: RenderSettings,
}

impl Compositor {
    pub fn new(width: u32, height: u32, settings: RenderSettings) -> Self {
        Self {
            width,
            height,
            canvas: Frame::new(width, height),
            settings,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resize the canvas; the old buffer is discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.canvas = Frame::new(width, height);
        }
    }

    /// Composite one full frame: clear, then paint every visible mask in
    /// list order. Per-mask failures (degenerate geometry while a vertex
    /// is dragged onto another, decode hiccups) skip that mask only;
    /// later masks always still render.
    pub fn composite(&mut self, masks: &mut [Mask]) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        self.canvas.fill(self.settings.clear_rgba);

        for mask in masks.iter_mut() {
            if mask.hidden || !mask.has_media() {
                continue;
            }
            if let Err(e) = self.render_mask(mask) {
                debug!(mask = mask.id.0, "skipping mask this frame: {e}");
            }
        }

        if self.settings.show_grid {
            for mask in masks.iter() {
                if !mask.hidden {
                    self.draw_grid(mask);
                }
            }
        }
    }

    /// The composited canvas for the display/export sink.
    pub fn output(&self) -> &Frame {
        &self.canvas
    }

    fn render_mask(&mut self, mask: &mut Mask) -> PromapResult<()> {
        let Some(media) = mask.media.as_mut() else {
            return Ok(());
        };
        let frame = media.current_frame();
        let t = &mask.media_transform;

        // Rotate + scale the source about its own center. Both are folded
        // into one resample pass; visually this equals scale followed by
        // center crop/pad back to the source dimensions.
        let prepared: Cow<'_, Frame> = if t.rotation == 0.0 && t.scale == 1.0 {
            Cow::Borrowed(frame)
        } else {
            let center = Point::new(f64::from(frame.width) / 2.0, f64::from(frame.height) / 2.0);
            let a = Affine::scale_about(t.scale, center)
                * Affine::rotate_about(t.rotation.to_radians(), center);
            Cow::Owned(transform::warp_image(
                frame,
                &Homography::from_affine(a),
                frame.width,
                frame.height,
            )?)
        };

        let (mw, mh) = (f64::from(prepared.width), f64::from(prepared.height));
        let offset = kurbo::Vec2::new(
            -t.offset_x * MEDIA_OFFSET_SCALE,
            -t.offset_y * MEDIA_OFFSET_SCALE,
        );

        let matrix = match mask.vertices.len() {
            4 => {
                let src = [
                    Point::new(0.0, 0.0) + offset,
                    Point::new(mw, 0.0) + offset,
                    Point::new(mw, mh) + offset,
                    Point::new(0.0, mh) + offset,
                ];
                let dst = [
                    mask.vertices[0],
                    mask.vertices[1],
                    mask.vertices[2],
                    mask.vertices[3],
                ];
                transform::solve_homography(&src, &dst)?
            }
            3 => {
                // Apex / base-right / base-left, matching the triangle
                // mask layout. A true 3-point affine solve: padding to a
                // degenerate quad would hand the homography solver
                // duplicate points.
                let src = [
                    Point::new(mw / 2.0, 0.0) + offset,
                    Point::new(mw, mh) + offset,
                    Point::new(0.0, mh) + offset,
                ];
                let dst = [mask.vertices[0], mask.vertices[1], mask.vertices[2]];
                Homography::from_affine(transform::solve_affine(&src, &dst)?)
            }
            n => {
                return Err(PromapError::validation(format!(
                    "mask has unsupported vertex count {n}"
                )));
            }
        };

        let warped = transform::warp_image(&prepared, &matrix, self.width, self.height)?;
        let coverage = rasterize_polygon(&mask.vertices, self.width, self.height);

        // Painter's algorithm: full overwrite inside coverage, hard edges.
        for (i, covered) in coverage.iter().enumerate() {
            if *covered {
                let o = i * 4;
                self.canvas.data[o..o + 4].copy_from_slice(&warped.data[o..o + 4]);
            }
        }
        Ok(())
    }

    /// Debug overlay: polygon outline, vertex markers, and an interior
    /// grid interpolated from the corner vertices. Drawn straight onto
    /// the canvas after compositing.
    fn draw_grid(&mut self, mask: &Mask) {
        let verts = &mask.vertices;
        let n = verts.len();
        if n < 3 {
            return;
        }

        for i in 0..n {
            draw_line(&mut self.canvas, verts[i], verts[(i + 1) % n], OUTLINE_RGBA);
        }

        let rows = self.settings.grid_rows.max(1);
        let cols = self.settings.grid_cols.max(1);
        if n >= 4 {
            // Bilinear interpolation across the quad edges.
            for i in 1..rows {
                let t = f64::from(i) / f64::from(rows);
                let p1 = verts[0].lerp(verts[3], t);
                let p2 = verts[1].lerp(verts[2], t);
                draw_line(&mut self.canvas, p1, p2, GRID_RGBA);
            }
            for j in 1..cols {
                let t = f64::from(j) / f64::from(cols);
                let p1 = verts[0].lerp(verts[1], t);
                let p2 = verts[3].lerp(verts[2], t);
                draw_line(&mut self.canvas, p1, p2, GRID_RGBA);
            }
        } else {
            // Triangle: rows between the two slanted edges, spokes from
            // the base up to the apex.
            for i in 1..rows {
                let t = f64::from(i) / f64::from(rows);
                let p1 = verts[0].lerp(verts[2], t);
                let p2 = verts[0].lerp(verts[1], t);
                draw_line(&mut self.canvas, p1, p2, GRID_RGBA);
            }
            for j in 1..cols {
                let t = f64::from(j) / f64::from(cols);
                let base = verts[2].lerp(verts[1], t);
                draw_line(&mut self.canvas, base, verts[0], GRID_RGBA);
            }
        }

        for v in verts {
            draw_marker(&mut self.canvas, *v, MARKER_RGBA);
        }
    }
}

/// Scanline even-odd rasterization of a polygon into a per-pixel coverage
/// mask, sampled at pixel centers. Horizontal edges contribute no
/// crossings.
pub fn rasterize_polygon(vertices: &[Point], width: u32, height: u32) -> Vec<bool> {
    let mut coverage = vec![false; width as usize * height as usize];
    let n = vertices.len();
    if n < 3 {
        return coverage;
    }

    let mut crossings: Vec<f64> = Vec::with_capacity(n);
    for yi in 0..height {
        let yc = f64::from(yi) + 0.5;
        crossings.clear();
        for i in 0..n {
            let p1 = vertices[i];
            let p2 = vertices[(i + 1) % n];
            if p1.y == p2.y {
                continue;
            }
            // Half-open on y so shared vertices count once.
            if (p1.y <= yc) != (p2.y <= yc) {
                let t = (yc - p1.y) / (p2.y - p1.y);
                crossings.push(p1.x + t * (p2.x - p1.x));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            let (x0, x1) = (span[0], span[1]);
            // Pixel covered when its center lies in [x0, x1).
            let first = (x0 - 0.5).ceil().max(0.0) as i64;
            let last = ((x1 - 0.5).ceil() as i64 - 1).min(i64::from(width) - 1);
            for xi in first..=last {
                coverage[yi as usize * width as usize + xi as usize] = true;
            }
        }
    }
    coverage
}

fn draw_marker(canvas: &mut Frame, p: Point, rgba: [u8; 4]) {
    let (cx, cy) = (p.x.round() as i64, p.y.round() as i64);
    for dy in -2..=2 {
        for dx in -2..=2 {
            plot(canvas, cx + dx, cy + dy, rgba);
        }
    }
}

fn draw_line(canvas: &mut Frame, a: Point, b: Point, rgba: [u8; 4]) {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let steps = dx.abs().max(dy.abs()).ceil() as usize;
    if steps == 0 {
        plot(canvas, a.x.round() as i64, a.y.round() as i64, rgba);
        return;
    }
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = (a.x + dx * t).round() as i64;
        let y = (a.y + dy * t).round() as i64;
        plot(canvas, x, y, rgba);
    }
}

#[inline]
fn plot(canvas: &mut Frame, x: i64, y: i64, rgba: [u8; 4]) {
    if x >= 0 && y >= 0 && x < i64::from(canvas.width) && y < i64::from(canvas.height) {
        canvas.put_pixel(x as u32, y as u32, rgba);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterize_left_half_rectangle() {
        let verts = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ];
        let cov = rasterize_polygon(&verts, 200, 100);
        // Columns [0,100) covered, [100,200) not.
        for y in [0usize, 50, 99] {
            assert!(cov[y * 200]);
            assert!(cov[y * 200 + 99]);
            assert!(!cov[y * 200 + 100]);
            assert!(!cov[y * 200 + 199]);
        }
    }

    #[test]
    fn rasterize_triangle_excludes_outside_corner() {
        let verts = vec![
            Point::new(50.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ];
        let cov = rasterize_polygon(&verts, 100, 100);
        // Mid-height, mid-width sits inside the triangle.
        assert!(cov[50 * 100 + 50]);
        // Top-left corner is outside.
        assert!(!cov[2 * 100 + 2]);
    }

    #[test]
    fn rasterize_degenerate_polygon_is_empty() {
        let verts = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        assert!(!rasterize_polygon(&verts, 10, 10).contains(&true));
    }

    #[test]
    fn resize_reallocates_canvas() {
        let mut c = Compositor::new(10, 10, RenderSettings::default());
        c.resize(20, 5);
        assert_eq!(c.output().width, 20);
        assert_eq!(c.output().height, 5);
    }

    #[test]
    fn composite_clears_to_settings_color() {
        let mut c = Compositor::new(
            4,
            4,
            RenderSettings {
                clear_rgba: [1, 2, 3, 255],
                ..RenderSettings::default()
            },
        );
        c.composite(&mut []);
        assert_eq!(c.output().pixel(2, 2), [1, 2, 3, 255]);
    }
}
