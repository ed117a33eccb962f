//! Planar homographies: closed-form quad mappings and a normalized DLT solver.

use glam::{DMat3, DVec2, DVec3};
use motrack_core::{MotrackError, Result};
use nalgebra::{SMatrix, SymmetricEigen};

use super::HomographySolver;

/// Map `p` through `h`, dividing by the homogeneous coordinate.
/// Points sent to infinity give `None`.
#[inline]
pub fn apply_homography(h: &DMat3, p: DVec2) -> Option<DVec2> {
    let v = *h * p.extend(1.0);
    (v.z.abs() > 1e-12).then(|| DVec2::new(v.x / v.z, v.y / v.z))
}

/// Homography taking the unit square corners `(0,0) (1,0) (1,1) (0,1)` onto
/// `quad`, in that order.
pub fn square_to_quad(quad: &[DVec2; 4]) -> Option<DMat3> {
    let [p0, p1, p2, p3] = *quad;
    let s = p0 - p1 + p2 - p3;
    let (g, h) = if s.x.abs() < 1e-12 && s.y.abs() < 1e-12 {
        (0.0, 0.0)
    } else {
        let d1 = p1 - p2;
        let d2 = p3 - p2;
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-12 {
            return None;
        }
        (
            (s.x * d2.y - d2.x * s.y) / det,
            (d1.x * s.y - s.x * d1.y) / det,
        )
    };
    let a = p1 - p0 + g * p1;
    let b = p3 - p0 + h * p3;
    let m = DMat3::from_cols(
        DVec3::new(a.x, a.y, g),
        DVec3::new(b.x, b.y, h),
        DVec3::new(p0.x, p0.y, 1.0),
    );
    (m.determinant().abs() > 1e-12).then_some(m)
}

/// Homography taking the corners of `from` onto the corners of `to`.
pub fn quad_to_quad(from: &[DVec2; 4], to: &[DVec2; 4]) -> Option<DMat3> {
    let a = square_to_quad(from)?;
    let b = square_to_quad(to)?;
    Some(b * a.inverse())
}

/// Similarity that moves the centroid to the origin and scales the mean
/// distance from it to √2.
pub(crate) fn normalization(points: &[DVec2]) -> Option<DMat3> {
    let n = points.len() as f64;
    let centroid = points.iter().copied().sum::<DVec2>() / n;
    let mean_dist = points.iter().map(|p| p.distance(centroid)).sum::<f64>() / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(DMat3::from_cols(
        DVec3::new(s, 0.0, 0.0),
        DVec3::new(0.0, s, 0.0),
        DVec3::new(-s * centroid.x, -s * centroid.y, 1.0),
    ))
}

/// Direct linear transform on normalized coordinates.
#[derive(Debug, Clone, Default)]
pub struct DltHomographySolver;

impl DltHomographySolver {
    pub fn new() -> Self {
        Self
    }
}

impl HomographySolver for DltHomographySolver {
    fn solve(&self, x1: &[DVec2], x2: &[DVec2]) -> Result<DMat3> {
        if x1.len() != x2.len() {
            return Err(MotrackError::InvalidParameter(format!(
                "{} source points for {} destination points",
                x1.len(),
                x2.len()
            )));
        }
        if x1.len() < 4 {
            return Err(MotrackError::Precondition(format!(
                "Need at least 4 correspondences for a homography, got {}",
                x1.len()
            )));
        }
        let degenerate = || MotrackError::Solver("Degenerate point configuration".into());
        let t1 = normalization(x1).ok_or_else(degenerate)?;
        let t2 = normalization(x2).ok_or_else(degenerate)?;

        let mut ata = SMatrix::<f64, 9, 9>::zeros();
        for (p, q) in x1.iter().zip(x2) {
            let p = (t1 * p.extend(1.0)).truncate();
            let q = (t2 * q.extend(1.0)).truncate();
            let rows = [
                [-p.x, -p.y, -1.0, 0.0, 0.0, 0.0, q.x * p.x, q.x * p.y, q.x],
                [0.0, 0.0, 0.0, -p.x, -p.y, -1.0, q.y * p.x, q.y * p.y, q.y],
            ];
            for row in rows {
                let r = SMatrix::<f64, 9, 1>::from_row_slice(&row);
                ata += r * r.transpose();
            }
        }

        let eigen = SymmetricEigen::new(ata);
        let mut order: Vec<usize> = (0..9).collect();
        order.sort_by(|a, b| eigen.eigenvalues[*a].total_cmp(&eigen.eigenvalues[*b]));
        let largest = eigen.eigenvalues[order[8]].abs().max(1e-300);
        if eigen.eigenvalues[order[1]].abs() / largest < 1e-12 {
            return Err(degenerate());
        }

        let h = eigen.eigenvectors.column(order[0]);
        let hn = DMat3::from_cols(
            DVec3::new(h[0], h[3], h[6]),
            DVec3::new(h[1], h[4], h[7]),
            DVec3::new(h[2], h[5], h[8]),
        );
        let mut out = t2.inverse() * hn * t1;
        if out.z_axis.z.abs() > 1e-12 {
            out *= 1.0 / out.z_axis.z;
        }
        if out.determinant().abs() < 1e-12 {
            return Err(degenerate());
        }
        Ok(out)
    }
}
