//! Pure 2D geometry: point-set transforms, exact affine/homography solves
//! from point correspondences, inverse-mapped bilinear warping, and
//! point-in-polygon testing.

use kurbo::{Affine, Point};

use crate::{
    error::{PromapError, PromapResult},
    frame::Frame,
};

/// Determinants below this magnitude are treated as singular.
const SINGULAR_EPSILON: f64 = 1e-9;

/// Rotate a point set about `center` by `angle_deg` degrees (clockwise in
/// screen coordinates, y-down).
pub fn rotate_points(points: &[Point], angle_deg: f64, center: Point) -> Vec<Point> {
    let a = Affine::rotate_about(angle_deg.to_radians(), center);
    points.iter().map(|&p| a * p).collect()
}

/// Uniformly scale a point set about `center`.
///
/// Non-positive factors produce a reflected/collapsed set; callers that
/// feed user input clamp first (see `Mask::scale_mask`).
pub fn scale_points(points: &[Point], factor: f64, center: Point) -> Vec<Point> {
    let a = Affine::scale_about(factor, center);
    points.iter().map(|&p| a * p).collect()
}

/// Solve `left * x = b` by Gaussian elimination with partial pivoting.
/// Returns `None` when the matrix is singular.
fn solve_linear<const N: usize>(left: [[f64; N]; N], b: [f64; N]) -> Option<[f64; N]> {
    let mut m = left;
    let mut rhs = b;

    for k in 0..N {
        let mut pivot = k;
        let mut max_val = m[k][k].abs();
        for i in (k + 1)..N {
            if m[i][k].abs() > max_val {
                max_val = m[i][k].abs();
                pivot = i;
            }
        }
        if max_val < SINGULAR_EPSILON {
            return None;
        }
        if pivot != k {
            m.swap(pivot, k);
            rhs.swap(pivot, k);
        }

        for i in (k + 1)..N {
            let f = m[i][k] / m[k][k];
            for j in k..N {
                m[i][j] -= f * m[k][j];
            }
            rhs[i] -= f * rhs[k];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let mut acc = rhs[i];
        for j in (i + 1)..N {
            acc -= m[i][j] * x[j];
        }
        x[i] = acc / m[i][i];
    }
    Some(x)
}

fn triangle_area2(p: &[Point; 3]) -> f64 {
    (p[1].x - p[0].x) * (p[2].y - p[0].y) - (p[2].x - p[0].x) * (p[1].y - p[0].y)
}

/// Exact affine map sending `src[i]` to `dst[i]` for three correspondences.
///
/// Fails with `DegenerateGeometry` when the source triangle is collinear:
/// three collinear points do not determine an affine map.
pub fn solve_affine(src: &[Point; 3], dst: &[Point; 3]) -> PromapResult<Affine> {
    if triangle_area2(src).abs() < SINGULAR_EPSILON {
        return Err(PromapError::degenerate(
            "affine solve: source triangle is collinear",
        ));
    }

    let m = [
        [src[0].x, src[0].y, 1.0],
        [src[1].x, src[1].y, 1.0],
        [src[2].x, src[2].y, 1.0],
    ];
    let xs = solve_linear(m, [dst[0].x, dst[1].x, dst[2].x])
        .ok_or_else(|| PromapError::degenerate("affine solve: singular system"))?;
    let ys = solve_linear(m, [dst[0].y, dst[1].y, dst[2].y])
        .ok_or_else(|| PromapError::degenerate("affine solve: singular system"))?;

    // kurbo coeff order [a, b, c, d, e, f]: x' = a*x + c*y + e, y' = b*x + d*y + f.
    Ok(Affine::new([xs[0], ys[0], xs[1], ys[1], xs[2], ys[2]]))
}

/// A 3x3 projective transform, row-major.
///
/// The affine case is represented with bottom row `[0, 0, 1]`; `apply`
/// always performs the perspective divide, `warp_image` takes the cheap
/// path when the divide is a no-op.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub m: [[f64; 3]; 3],
}

impl Homography {
    pub const IDENTITY: Homography = Homography {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    pub fn from_affine(a: Affine) -> Self {
        let [ca, cb, cc, cd, ce, cf] = a.as_coeffs();
        Self {
            m: [[ca, cc, ce], [cb, cd, cf], [0.0, 0.0, 1.0]],
        }
    }

    pub fn is_affine(&self) -> bool {
        self.m[2][0].abs() < SINGULAR_EPSILON
            && self.m[2][1].abs() < SINGULAR_EPSILON
            && (self.m[2][2] - 1.0).abs() < SINGULAR_EPSILON
    }

    /// Apply to a point, including the perspective divide.
    pub fn apply(&self, p: Point) -> Point {
        let m = &self.m;
        let w = m[2][0] * p.x + m[2][1] * p.y + m[2][2];
        let x = m[0][0] * p.x + m[0][1] * p.y + m[0][2];
        let y = m[1][0] * p.x + m[1][1] * p.y + m[1][2];
        Point::new(x / w, y / w)
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse via the adjugate; `None` when singular.
    pub fn invert(&self) -> Option<Homography> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return None;
        }
        let m = &self.m;
        let inv = [
            [
                (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det,
            ],
            [
                (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det,
            ],
            [
                (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det,
            ],
        ];
        Some(Homography { m: inv })
    }

    fn has_finite_entries(&self) -> bool {
        self.m.iter().flatten().all(|v| v.is_finite())
    }
}

/// Exact perspective map sending `src[i]` to `dst[i]` for four
/// correspondences (direct linear transform, 8 unknowns with `h33 = 1`).
///
/// Fails with `DegenerateGeometry` when the correspondences do not
/// determine a valid homography (collinear source points, repeated
/// points, or a singular system). Never returns NaN/Inf entries.
pub fn solve_homography(src: &[Point; 4], dst: &[Point; 4]) -> PromapResult<Homography> {
    let mut a = [[0.0f64; 8]; 8];
    let mut b = [0.0f64; 8];
    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (xp, yp) = (dst[i].x, dst[i].y);
        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * xp, -y * xp];
        b[2 * i] = xp;
        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * yp, -y * yp];
        b[2 * i + 1] = yp;
    }

    let h = solve_linear(a, b)
        .ok_or_else(|| PromapError::degenerate("homography solve: singular system"))?;

    let hm = Homography {
        m: [
            [h[0], h[1], h[2]],
            [h[3], h[4], h[5]],
            [h[6], h[7], 1.0],
        ],
    };
    if !hm.has_finite_entries() {
        return Err(PromapError::degenerate(
            "homography solve: non-finite solution",
        ));
    }
    Ok(hm)
}

/// Warp `src` into an `out_width` x `out_height` buffer through `matrix`
/// (which maps source coordinates to destination coordinates).
///
/// Inverse mapping with bilinear sampling; samples outside the source
/// resolve to transparent black.
pub fn warp_image(
    src: &Frame,
    matrix: &Homography,
    out_width: u32,
    out_height: u32,
) -> PromapResult<Frame> {
    let inv = matrix
        .invert()
        .ok_or_else(|| PromapError::degenerate("warp: matrix is not invertible"))?;

    let mut out = Frame::new(out_width, out_height);
    let m = &inv.m;
    let affine = inv.is_affine();

    for y in 0..out_height {
        let yf = f64::from(y);
        for x in 0..out_width {
            let xf = f64::from(x);
            let (sx, sy) = if affine {
                (
                    m[0][0] * xf + m[0][1] * yf + m[0][2],
                    m[1][0] * xf + m[1][1] * yf + m[1][2],
                )
            } else {
                let w = m[2][0] * xf + m[2][1] * yf + m[2][2];
                if w.abs() < SINGULAR_EPSILON {
                    continue;
                }
                (
                    (m[0][0] * xf + m[0][1] * yf + m[0][2]) / w,
                    (m[1][0] * xf + m[1][1] * yf + m[1][2]) / w,
                )
            };
            if !sx.is_finite() || !sy.is_finite() {
                continue;
            }
            out.put_pixel(x, y, src.sample_bilinear(sx, sy));
        }
    }
    Ok(out)
}

/// Ray-casting point-in-polygon test.
///
/// Horizontal edges contribute no crossing (the `p1.y == p2.y` case), so
/// no division by zero is possible. Edge-touching points are
/// implementation-defined but deterministic.
pub fn point_in_polygon(point: Point, vertices: &[Point]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let (x, y) = (point.x, point.y);
    let mut inside = false;
    let mut p1 = vertices[0];
    for i in 1..=n {
        let p2 = vertices[i % n];
        if y > p1.y.min(p2.y) && y <= p1.y.max(p2.y) && x <= p1.x.max(p2.x) && p1.y != p2.y {
            let xinters = (y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
            if p1.x == p2.x || x <= xinters {
                inside = !inside;
            }
        }
        p1 = p2;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6
    }

    #[test]
    fn rotate_roundtrip_is_identity() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(7.0, 13.0),
        ];
        let center = Point::new(3.0, 4.0);
        let fwd = rotate_points(&pts, 37.5, center);
        let back = rotate_points(&fwd, -37.5, center);
        for (a, b) in pts.iter().zip(&back) {
            assert!(close(*a, *b), "{a:?} != {b:?}");
        }
    }

    #[test]
    fn scale_roundtrip_is_identity() {
        let pts = vec![Point::new(1.0, 2.0), Point::new(-5.0, 9.0)];
        let center = Point::new(0.5, -0.5);
        let fwd = scale_points(&pts, 2.5, center);
        let back = scale_points(&fwd, 1.0 / 2.5, center);
        for (a, b) in pts.iter().zip(&back) {
            assert!(close(*a, *b));
        }
    }

    #[test]
    fn affine_maps_corners_exactly() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(0.0, 50.0),
        ];
        let dst = [
            Point::new(10.0, 20.0),
            Point::new(110.0, 40.0),
            Point::new(-10.0, 80.0),
        ];
        let a = solve_affine(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert!(close(a * *s, *d));
        }
    }

    #[test]
    fn affine_rejects_collinear_source() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
        ];
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ];
        assert!(matches!(
            solve_affine(&src, &dst),
            Err(PromapError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn homography_maps_corners_exactly() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(200.0, 0.0),
            Point::new(200.0, 100.0),
            Point::new(0.0, 100.0),
        ];
        // A proper perspective target (not a parallelogram).
        let dst = [
            Point::new(20.0, 10.0),
            Point::new(180.0, 30.0),
            Point::new(160.0, 140.0),
            Point::new(10.0, 110.0),
        ];
        let h = solve_homography(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert!(close(h.apply(*s), *d), "{:?} -> {:?}", s, h.apply(*s));
        }
    }

    #[test]
    fn homography_rejects_collinear_source() {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(3.0, 0.0),
        ];
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let err = solve_homography(&src, &dst);
        assert!(matches!(err, Err(PromapError::DegenerateGeometry(_))));
    }

    #[test]
    fn homography_rejects_repeated_points() {
        let p = Point::new(5.0, 5.0);
        let src = [p, p, p, p];
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        assert!(solve_homography(&src, &dst).is_err());
    }

    #[test]
    fn invert_roundtrips() {
        let h = Homography {
            m: [[2.0, 0.1, 3.0], [0.2, 1.5, -4.0], [0.001, 0.002, 1.0]],
        };
        let inv = h.invert().unwrap();
        let p = Point::new(12.0, 34.0);
        assert!(close(inv.apply(h.apply(p)), p));
    }

    #[test]
    fn warp_identity_preserves_pixels() {
        let mut src = Frame::new(4, 4);
        src.put_pixel(1, 2, [9, 8, 7, 255]);
        let out = warp_image(&src, &Homography::IDENTITY, 4, 4).unwrap();
        assert_eq!(out.pixel(1, 2), [9, 8, 7, 255]);
    }

    #[test]
    fn warp_translation_moves_content() {
        let mut src = Frame::new(4, 4);
        src.put_pixel(0, 0, [255, 0, 0, 255]);
        let t = Homography::from_affine(Affine::translate((2.0, 1.0)));
        let out = warp_image(&src, &t, 4, 4).unwrap();
        assert_eq!(out.pixel(2, 1), [255, 0, 0, 255]);
        assert_eq!(out.pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn point_in_polygon_square() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(point_in_polygon(Point::new(5.0, 5.0), &square));
        assert!(!point_in_polygon(Point::new(15.0, 5.0), &square));

        // Edge point: implementation-defined but stable across calls.
        let edge = Point::new(0.0, 5.0);
        let first = point_in_polygon(edge, &square);
        for _ in 0..10 {
            assert_eq!(point_in_polygon(edge, &square), first);
        }
    }

    #[test]
    fn point_in_polygon_triangle() {
        let tri = vec![
            Point::new(5.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(point_in_polygon(Point::new(5.0, 6.0), &tri));
        assert!(!point_in_polygon(Point::new(0.5, 1.0), &tri));
    }
}
