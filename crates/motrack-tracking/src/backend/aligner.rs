//! Lucas-Kanade style patch aligner: brute-force translation search followed
//! by Levenberg-Marquardt refinement of the motion model parameters.

use glam::{DMat2, DVec2};
use motrack_core::Result;
use nalgebra::{DMatrix, DVector};
use tracing::trace;

use super::homography::{apply_homography, quad_to_quad, square_to_quad};
use super::{AlignError, PatchAligner, RegionTrackRequest, RegionTrackResult};
use crate::image::GrayImage;
use crate::track::MotionModel;

/// Largest pattern side sampled, in samples.
const MAX_PATTERN_SAMPLES: usize = 64;
const MIN_PATTERN_SAMPLES: usize = 3;

/// Parameterization of a motion model around the reference pattern.
///
/// Affine-family models transform the reference corners about their
/// centroid; the perspective model stores the four destination corners.
struct Warp {
    model: MotionModel,
    reference: [DVec2; 4],
    centroid: DVec2,
}

impl Warp {
    fn new(model: MotionModel, reference: [DVec2; 4]) -> Self {
        let centroid = reference.iter().copied().sum::<DVec2>() / 4.0;
        Self {
            model,
            reference,
            centroid,
        }
    }

    /// Parameters that best map the reference corners onto `guess`.
    fn fit(&self, guess: &[DVec2; 4]) -> Vec<f64> {
        let guess_centroid = guess.iter().copied().sum::<DVec2>() / 4.0;
        let t = guess_centroid - self.centroid;

        let (mut aa, mut dot, mut cross) = (0.0, 0.0, 0.0);
        let mut m = DMat2::ZERO;
        let mut n = DMat2::ZERO;
        for (r, g) in self.reference.iter().zip(guess.iter()) {
            let a = *r - self.centroid;
            let b = *g - guess_centroid;
            aa += a.length_squared();
            dot += a.dot(b);
            cross += a.perp_dot(b);
            m += DMat2::from_cols(b * a.x, b * a.y);
            n += DMat2::from_cols(a * a.x, a * a.y);
        }
        let aa = aa.max(1e-12);

        match self.model {
            MotionModel::Translation => vec![t.x, t.y],
            MotionModel::TranslationRotation => vec![t.x, t.y, cross.atan2(dot)],
            MotionModel::TranslationScale => vec![t.x, t.y, dot / aa],
            MotionModel::Similarity => vec![t.x, t.y, cross.atan2(dot), dot.hypot(cross) / aa],
            MotionModel::Affine => {
                let a = if n.determinant().abs() > 1e-12 {
                    m * n.inverse()
                } else {
                    DMat2::IDENTITY
                };
                vec![t.x, t.y, a.x_axis.x, a.y_axis.x, a.x_axis.y, a.y_axis.y]
            }
            MotionModel::Perspective => guess.iter().flat_map(|p| [p.x, p.y]).collect(),
        }
    }

    fn linear_part(&self, params: &[f64]) -> DMat2 {
        match self.model {
            MotionModel::Translation | MotionModel::Perspective => DMat2::IDENTITY,
            MotionModel::TranslationRotation => DMat2::from_angle(params[2]),
            MotionModel::TranslationScale => DMat2::from_diagonal(DVec2::splat(params[2])),
            MotionModel::Similarity => DMat2::from_angle(params[2]) * params[3],
            MotionModel::Affine => DMat2::from_cols(
                DVec2::new(params[2], params[4]),
                DVec2::new(params[3], params[5]),
            ),
        }
    }

    /// Destination corners for `params`.
    fn corners(&self, params: &[f64]) -> [DVec2; 4] {
        if self.model == MotionModel::Perspective {
            return [0, 1, 2, 3].map(|i| DVec2::new(params[2 * i], params[2 * i + 1]));
        }
        let l = self.linear_part(params);
        let t = DVec2::new(params[0], params[1]);
        self.reference
            .map(|p| l * (p - self.centroid) + self.centroid + t)
    }

    fn translate(&self, params: &mut [f64], offset: DVec2) {
        if self.model == MotionModel::Perspective {
            for pair in params.chunks_exact_mut(2) {
                pair[0] += offset.x;
                pair[1] += offset.y;
            }
        } else {
            params[0] += offset.x;
            params[1] += offset.y;
        }
    }

    /// Finite-difference step for parameter `j`.
    fn step(&self, j: usize) -> f64 {
        match (self.model, j) {
            (MotionModel::Perspective, _) | (_, 0) | (_, 1) => 1e-2,
            _ => 1e-4,
        }
    }
}

/// Reference pattern resampled on a regular grid over the unit square.
struct Pattern {
    uv: Vec<DVec2>,
    values: Vec<f64>,
    weights: Vec<f64>,
    /// Values with weighted mean removed and unit weighted deviation.
    normalized: Vec<f64>,
}

fn weighted_stats(values: &[f64], weights: &[f64]) -> (f64, f64) {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total;
    let var = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - mean) * (v - mean))
        .sum::<f64>()
        / total;
    (mean, var.max(0.0).sqrt())
}

fn normalize(values: &[f64], weights: &[f64]) -> Vec<f64> {
    let (mean, dev) = weighted_stats(values, weights);
    let dev = if dev > 1e-12 { dev } else { 1.0 };
    values.iter().map(|v| (v - mean) / dev).collect()
}

/// Weighted normalized cross-correlation in `[-1, 1]`.
fn weighted_ncc(a: &[f64], b: &[f64], weights: &[f64]) -> f64 {
    let (ma, da) = weighted_stats(a, weights);
    let (mb, db) = weighted_stats(b, weights);
    if da < 1e-12 || db < 1e-12 {
        return 0.0;
    }
    let total: f64 = weights.iter().sum();
    let cov = a
        .iter()
        .zip(b)
        .zip(weights)
        .map(|((x, y), w)| w * (x - ma) * (y - mb))
        .sum::<f64>()
        / total;
    (cov / (da * db)).clamp(-1.0, 1.0)
}

impl Pattern {
    fn sample(
        image: &GrayImage,
        quad: &[DVec2; 4],
        mask: Option<&crate::mask::FloatMask>,
    ) -> std::result::Result<Self, AlignError> {
        let h = square_to_quad(quad).ok_or(AlignError::Degenerate)?;
        let min = quad.iter().copied().reduce(DVec2::min).unwrap_or_default();
        let max = quad.iter().copied().reduce(DVec2::max).unwrap_or_default();
        let extent = (max - min).max_element().ceil() as usize;
        let n = extent.clamp(MIN_PATTERN_SAMPLES, MAX_PATTERN_SAMPLES);

        let mut uv = Vec::with_capacity(n * n);
        let mut values = Vec::with_capacity(n * n);
        let mut weights = Vec::with_capacity(n * n);
        for j in 0..n {
            for i in 0..n {
                let s = DVec2::new((i as f64 + 0.5) / n as f64, (j as f64 + 0.5) / n as f64);
                let p = apply_homography(&h, s).ok_or(AlignError::Degenerate)?;
                uv.push(s);
                values.push(image.sample(p.x, p.y) as f64);
                weights.push(mask.map_or(1.0, |m| m.sample(p.x, p.y) as f64));
            }
        }

        let (_, dev) = weighted_stats(&values, &weights);
        if dev < 1e-6 {
            return Err(AlignError::NoTexture);
        }
        let normalized = normalize(&values, &weights);
        Ok(Self {
            uv,
            values,
            weights,
            normalized,
        })
    }

    fn positions(&self, corners: &[DVec2; 4]) -> Option<Vec<DVec2>> {
        let h = square_to_quad(corners)?;
        self.uv.iter().map(|s| apply_homography(&h, *s)).collect()
    }
}

/// Default production aligner.
#[derive(Debug, Clone, Default)]
pub struct LucasKanadeAligner;

impl LucasKanadeAligner {
    pub fn new() -> Self {
        Self
    }

    fn align(&self, req: &RegionTrackRequest<'_>) -> std::result::Result<RegionTrackResult, AlignError> {
        let opts = req.options;
        let reference = req.reference.gaussian_blur(opts.sigma);
        let destination = req.destination.gaussian_blur(opts.sigma);

        let ref_quad = [0, 1, 2, 3].map(|i| req.reference_coords[i]);
        let guess_quad = [0, 1, 2, 3].map(|i| req.guess_coords[i]);
        let pattern = Pattern::sample(&reference, &ref_quad, req.mask)?;
        let warp = Warp::new(opts.motion_model, ref_quad);
        let mut params = warp.fit(&guess_quad);

        let problem = Problem {
            pattern: &pattern,
            warp: &warp,
            image: &destination,
            normalized: opts.use_normalization,
        };

        if opts.use_brute {
            let offset = problem.brute_translation(&params);
            warp.translate(&mut params, offset);
        }
        let iterations = problem.refine(&mut params, opts.num_iterations)?;

        let corners = warp.corners(&params);
        let sampled = problem.sample(&params).ok_or(AlignError::Degenerate)?;
        let correlation = weighted_ncc(&pattern.values, &sampled, &pattern.weights);
        trace!(correlation, iterations, model = ?opts.motion_model, "Region aligned");
        if correlation < opts.minimum_correlation {
            return Err(AlignError::LowCorrelation {
                correlation,
                minimum: opts.minimum_correlation,
            });
        }

        let (w, h) = (destination.width as f64, destination.height as f64);
        let inside = |p: &DVec2| p.x >= -0.5 && p.y >= -0.5 && p.x <= w - 0.5 && p.y <= h - 0.5;
        if !corners.iter().all(inside) {
            return Err(AlignError::OutOfBounds);
        }

        let to_dest = quad_to_quad(&ref_quad, &corners).ok_or(AlignError::Degenerate)?;
        let center =
            apply_homography(&to_dest, req.reference_coords[4]).ok_or(AlignError::Degenerate)?;

        Ok(RegionTrackResult {
            coords: [corners[0], corners[1], corners[2], corners[3], center],
            correlation,
            iterations,
        })
    }
}

impl PatchAligner for LucasKanadeAligner {
    fn track_region(&self, request: &RegionTrackRequest<'_>) -> Result<RegionTrackResult> {
        Ok(self.align(request)?)
    }
}

/// Destination image matched against a pattern under a warp.
struct Problem<'a> {
    pattern: &'a Pattern,
    warp: &'a Warp,
    image: &'a GrayImage,
    normalized: bool,
}

impl Problem<'_> {
    fn sample(&self, params: &[f64]) -> Option<Vec<f64>> {
        let positions = self.pattern.positions(&self.warp.corners(params))?;
        Some(
            positions
                .iter()
                .map(|p| self.image.sample(p.x, p.y) as f64)
                .collect(),
        )
    }

    fn residuals(&self, params: &[f64]) -> Option<DVector<f64>> {
        let sampled = self.sample(params)?;
        let (reference, sampled) = if self.normalized {
            (&self.pattern.normalized, normalize(&sampled, &self.pattern.weights))
        } else {
            (&self.pattern.values, sampled)
        };
        Some(DVector::from_iterator(
            sampled.len(),
            sampled
                .iter()
                .zip(reference)
                .zip(&self.pattern.weights)
                .map(|((d, r), w)| w.sqrt() * (d - r)),
        ))
    }

    /// Integer offset of the initial warp that best matches the pattern.
    /// Equal scores prefer the smaller displacement.
    fn brute_translation(&self, params: &[f64]) -> DVec2 {
        let Some(positions) = self.pattern.positions(&self.warp.corners(params)) else {
            return DVec2::ZERO;
        };
        let min = positions.iter().copied().reduce(DVec2::min).unwrap_or_default();
        let max = positions.iter().copied().reduce(DVec2::max).unwrap_or_default();
        let lo = (-min).ceil();
        let hi = (DVec2::new(self.image.width as f64 - 1.0, self.image.height as f64 - 1.0) - max).floor();
        if lo.x > hi.x || lo.y > hi.y {
            return DVec2::ZERO;
        }

        let weights = &self.pattern.weights;
        let mut sampled = vec![0.0; positions.len()];
        let mut best = (f64::INFINITY, f64::INFINITY, DVec2::ZERO);
        for dy in lo.y as i32..=hi.y as i32 {
            for dx in lo.x as i32..=hi.x as i32 {
                let offset = DVec2::new(dx as f64, dy as f64);
                for (s, p) in sampled.iter_mut().zip(&positions) {
                    let q = *p + offset;
                    *s = self.image.sample(q.x, q.y) as f64;
                }
                let score = if self.normalized {
                    1.0 - weighted_ncc(&self.pattern.values, &sampled, weights)
                } else {
                    sampled
                        .iter()
                        .zip(&self.pattern.values)
                        .zip(weights)
                        .map(|((s, v), w)| w * (s - v).abs())
                        .sum()
                };
                let dist = offset.length_squared();
                if score < best.0 - 1e-9 || (score <= best.0 + 1e-9 && dist < best.1) {
                    best = (score, dist, offset);
                }
            }
        }
        best.2
    }

    /// Levenberg-Marquardt on the sum of squared residuals. Returns the
    /// number of iterations run.
    fn refine(&self, params: &mut Vec<f64>, max_iterations: u32) -> std::result::Result<u32, AlignError> {
        let k = params.len();
        let mut r = self.residuals(params).ok_or(AlignError::Degenerate)?;
        let mut cost = r.norm_squared();
        let mut lambda = 1e-3;
        let mut iterations = 0;

        while iterations < max_iterations && cost > 1e-12 {
            iterations += 1;
            let mut jac = DMatrix::<f64>::zeros(r.len(), k);
            for j in 0..k {
                let h = self.warp.step(j);
                let mut perturbed = params.clone();
                perturbed[j] += h;
                let rj = self.residuals(&perturbed).ok_or(AlignError::Degenerate)?;
                jac.set_column(j, &((rj - &r) / h));
            }
            let jtj = jac.transpose() * &jac;
            let gradient = jac.transpose() * &r;

            let mut improved = false;
            let mut largest_step = 0.0f64;
            for _ in 0..10 {
                let mut system = jtj.clone();
                for d in 0..k {
                    system[(d, d)] += lambda * jtj[(d, d)].max(1e-9);
                }
                let Some(delta) = system.lu().solve(&(-&gradient)) else {
                    lambda *= 10.0;
                    continue;
                };
                let candidate: Vec<f64> = params.iter().zip(delta.iter()).map(|(p, d)| p + d).collect();
                if let Some(rc) = self.residuals(&candidate) {
                    let c = rc.norm_squared();
                    if c < cost {
                        *params = candidate;
                        r = rc;
                        cost = c;
                        lambda = (lambda * 0.1).max(1e-12);
                        largest_step = delta.amax();
                        improved = true;
                        break;
                    }
                }
                lambda *= 10.0;
            }
            if !improved || largest_step < 1e-6 {
                break;
            }
        }
        Ok(iterations)
    }
}
