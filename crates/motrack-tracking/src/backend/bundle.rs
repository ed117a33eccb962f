//! Linear structure-from-motion: two-view initialization from an essential
//! matrix, incremental DLT resection and triangulation, alternating
//! refinement rounds. Tripod footage is solved as pure rotation.

use std::collections::{BTreeMap, BTreeSet};

use glam::{DMat3, DMat4, DVec2, DVec3, DVec4};
use motrack_core::Result;
use nalgebra::{DMatrix, DVector, Matrix3};
use tracing::{debug, warn};

use super::homography::normalization;
use super::{BundleAdjuster, BundleProblem, BundleSolution, SolveProgress, SolvedCamera, SolvedPoint};
use crate::camera::CameraIntrinsics;

/// Tracks two keyframes must share for the initial pair.
const MIN_COMMON_TRACKS: usize = 8;
/// Reconstructed points a frame needs before it can be resected.
const MIN_RESECTION_POINTS: usize = 6;
/// Known bundles a tripod frame needs for its rotation.
const MIN_ROTATION_POINTS: usize = 3;
/// Longest keyframe gap considered by automatic selection.
const MAX_KEYFRAME_SPAN: i32 = 100;
const REFINE_ROUNDS: usize = 3;
const FOCAL_SEARCH_STEPS: usize = 24;

// ── nalgebra glue ───────────────────────────────────────────────

fn to_na(m: &DMat3) -> Matrix3<f64> {
    Matrix3::from_column_slice(&m.to_cols_array())
}

fn to_glam(m: &Matrix3<f64>) -> DMat3 {
    DMat3::from_cols_slice(m.as_slice())
}

/// Eigenvector of the smallest eigenvalue of a symmetric matrix.
fn null_vector(ata: DMatrix<f64>) -> Option<DVector<f64>> {
    let eigen = ata.symmetric_eigen();
    let idx = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;
    Some(eigen.eigenvectors.column(idx).into_owned())
}

fn accumulate(ata: &mut DMatrix<f64>, row: &[f64], weight: f64) {
    let r = DVector::from_row_slice(row);
    *ata += (&r * r.transpose()) * weight;
}

/// SVD of a 3x3 matrix with singular values in descending order.
fn sorted_svd(m: &DMat3) -> Option<(DMat3, DVec3, DMat3)> {
    let svd = to_na(m).svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();
    let s = svd.singular_values;
    let mut order = [0usize, 1, 2];
    order.sort_by(|a, b| s[*b].total_cmp(&s[*a]));
    let u = DMat3::from_cols(
        to_glam(&u).col(order[0]),
        to_glam(&u).col(order[1]),
        to_glam(&u).col(order[2]),
    );
    let v = DMat3::from_cols(
        to_glam(&v).col(order[0]),
        to_glam(&v).col(order[1]),
        to_glam(&v).col(order[2]),
    );
    Some((u, DVec3::new(s[order[0]], s[order[1]], s[order[2]]), v))
}

/// Closest rotation to `m`.
fn orthonormalize(m: &DMat3) -> Option<DMat3> {
    let (u, _, v) = sorted_svd(m)?;
    let mut r = u * v.transpose();
    if r.determinant() < 0.0 {
        let flip = DMat3::from_diagonal(DVec3::new(1.0, 1.0, -1.0));
        r = u * flip * v.transpose();
    }
    Some(r)
}

// ── Scene ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pose {
    r: DMat3,
    t: DVec3,
}

impl Pose {
    const IDENTITY: Self = Self {
        r: DMat3::IDENTITY,
        t: DVec3::ZERO,
    };

    #[inline]
    fn to_camera(&self, x: DVec3) -> DVec3 {
        self.r * x + self.t
    }

    /// Normalized image position of `x`, if it is in front of the camera.
    fn project(&self, x: DVec3) -> Option<DVec2> {
        let c = self.to_camera(x);
        (c.z > 1e-9).then(|| DVec2::new(c.x / c.z, c.y / c.z))
    }
}

#[derive(Debug, Clone, Copy)]
struct View {
    frame: i32,
    track: usize,
    /// Undistorted normalized coordinates.
    point: DVec2,
    /// Observed pixel position.
    pixel: DVec2,
    weight: f64,
}

/// Observations grouped by frame and by track.
struct Views {
    by_frame: BTreeMap<i32, Vec<View>>,
    by_track: BTreeMap<usize, Vec<View>>,
}

impl Views {
    fn new(problem: &BundleProblem<'_>, intrinsics: &CameraIntrinsics) -> Self {
        let mut by_frame: BTreeMap<i32, Vec<View>> = BTreeMap::new();
        let mut by_track: BTreeMap<usize, Vec<View>> = BTreeMap::new();
        for obs in problem.observations.iter().filter(|o| o.weight > 0.0) {
            let pixel = DVec2::new(obs.x, obs.y);
            let n = intrinsics.normalize(problem.width, problem.height, pixel);
            let view = View {
                frame: obs.frame,
                track: obs.track,
                point: intrinsics.distortion.undistort(n),
                pixel,
                weight: obs.weight,
            };
            by_frame.entry(obs.frame).or_default().push(view);
            by_track.entry(obs.track).or_default().push(view);
        }
        Self { by_frame, by_track }
    }

    fn frame(&self, frame: i32) -> &[View] {
        self.by_frame.get(&frame).map_or(&[], Vec::as_slice)
    }

    /// Normalized positions of tracks seen in both frames.
    fn common(&self, a: i32, b: i32) -> Vec<(usize, DVec2, DVec2)> {
        let second: BTreeMap<usize, DVec2> =
            self.frame(b).iter().map(|v| (v.track, v.point)).collect();
        self.frame(a)
            .iter()
            .filter_map(|v| second.get(&v.track).map(|p| (v.track, v.point, *p)))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct Scene {
    poses: BTreeMap<i32, Pose>,
    points: BTreeMap<usize, DVec3>,
}

// ── Geometry kernels ────────────────────────────────────────────

/// Linear triangulation from any number of views. The point must be in
/// front of every camera used.
fn triangulate(observations: &[(Pose, DVec2, f64)]) -> Option<DVec3> {
    if observations.len() < 2 {
        return None;
    }
    let mut ata = DMatrix::<f64>::zeros(4, 4);
    for (pose, x, w) in observations {
        let row = |i: usize| {
            let r = pose.r.row(i);
            [r.x, r.y, r.z, pose.t[i]]
        };
        let (p0, p1, p2) = (row(0), row(1), row(2));
        let a: Vec<f64> = (0..4).map(|k| x.x * p2[k] - p0[k]).collect();
        let b: Vec<f64> = (0..4).map(|k| x.y * p2[k] - p1[k]).collect();
        accumulate(&mut ata, &a, *w);
        accumulate(&mut ata, &b, *w);
    }
    let v = null_vector(ata)?;
    if v[3].abs() < 1e-12 {
        return None;
    }
    let x = DVec3::new(v[0], v[1], v[2]) / v[3];
    observations
        .iter()
        .all(|(pose, _, _)| pose.to_camera(x).z > 0.0)
        .then_some(x)
}

/// Camera pose from 3D-2D correspondences by the direct linear transform.
fn resect(pairs: &[(DVec3, DVec2)]) -> Option<Pose> {
    if pairs.len() < MIN_RESECTION_POINTS {
        return None;
    }
    let n = pairs.len() as f64;
    let centroid = pairs.iter().map(|(x, _)| *x).sum::<DVec3>() / n;
    let mean_dist = pairs.iter().map(|(x, _)| x.distance(centroid)).sum::<f64>() / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = 3f64.sqrt() / mean_dist;
    let t3 = DMat4::from_cols(
        DVec4::new(s, 0.0, 0.0, 0.0),
        DVec4::new(0.0, s, 0.0, 0.0),
        DVec4::new(0.0, 0.0, s, 0.0),
        (-s * centroid).extend(1.0),
    );

    let mut ata = DMatrix::<f64>::zeros(12, 12);
    for (x, p) in pairs {
        let xn = (t3 * x.extend(1.0)).truncate();
        let h = [xn.x, xn.y, xn.z, 1.0];
        let mut a = [0.0; 12];
        let mut b = [0.0; 12];
        for k in 0..4 {
            a[k] = h[k];
            a[8 + k] = -p.x * h[k];
            b[4 + k] = h[k];
            b[8 + k] = -p.y * h[k];
        }
        accumulate(&mut ata, &a, 1.0);
        accumulate(&mut ata, &b, 1.0);
    }
    let v = null_vector(ata)?;

    // Rows of the 3x4 projection in normalized point space, back to world.
    let pn = DMat4::from_cols(
        DVec4::new(v[0], v[4], v[8], 0.0),
        DVec4::new(v[1], v[5], v[9], 0.0),
        DVec4::new(v[2], v[6], v[10], 0.0),
        DVec4::new(v[3], v[7], v[11], 0.0),
    );
    let p = pn * t3;
    let mut m = DMat3::from_cols(p.x_axis.truncate(), p.y_axis.truncate(), p.z_axis.truncate());
    let mut t = p.w_axis.truncate();
    if m.determinant() < 0.0 {
        m = -m;
        t = -t;
    }
    let (_, s, _) = sorted_svd(&m)?;
    let scale = (s.x + s.y + s.z) / 3.0;
    if scale < 1e-12 {
        return None;
    }
    let pose = Pose {
        r: orthonormalize(&m)?,
        t: t / scale,
    };
    let in_front = pairs.iter().filter(|(x, _)| pose.to_camera(*x).z > 0.0).count();
    (in_front * 2 > pairs.len()).then_some(pose)
}

/// Relative pose of the second keyframe from the essential matrix, plus the
/// shared tracks triangulated from the pair.
fn two_view(pairs: &[(usize, DVec2, DVec2)]) -> Option<(Pose, Vec<(usize, DVec3)>)> {
    if pairs.len() < MIN_COMMON_TRACKS {
        return None;
    }
    let x1: Vec<DVec2> = pairs.iter().map(|p| p.1).collect();
    let x2: Vec<DVec2> = pairs.iter().map(|p| p.2).collect();
    let t1 = normalization(&x1)?;
    let t2 = normalization(&x2)?;

    let mut ata = DMatrix::<f64>::zeros(9, 9);
    for (a, b) in x1.iter().zip(&x2) {
        let a = (t1 * a.extend(1.0)).truncate();
        let b = (t2 * b.extend(1.0)).truncate();
        let row = [b.x * a.x, b.x * a.y, b.x, b.y * a.x, b.y * a.y, b.y, a.x, a.y, 1.0];
        accumulate(&mut ata, &row, 1.0);
    }
    let e = null_vector(ata)?;
    let en = DMat3::from_cols(
        DVec3::new(e[0], e[3], e[6]),
        DVec3::new(e[1], e[4], e[7]),
        DVec3::new(e[2], e[5], e[8]),
    );
    let essential = t2.transpose() * en * t1;

    let (mut u, _, mut v) = sorted_svd(&essential)?;
    if u.determinant() < 0.0 {
        u = -u;
    }
    if v.determinant() < 0.0 {
        v = -v;
    }
    let w = DMat3::from_cols(
        DVec3::new(0.0, 1.0, 0.0),
        DVec3::new(-1.0, 0.0, 0.0),
        DVec3::new(0.0, 0.0, 1.0),
    );
    let rotations = [u * w * v.transpose(), u * w.transpose() * v.transpose()];
    let baseline = u.z_axis;

    let mut best: Option<(usize, Pose, Vec<(usize, DVec3)>)> = None;
    for r in rotations {
        for t in [baseline, -baseline] {
            let pose = Pose { r, t };
            let points: Vec<(usize, DVec3)> = pairs
                .iter()
                .filter_map(|(track, a, b)| {
                    triangulate(&[(Pose::IDENTITY, *a, 1.0), (pose, *b, 1.0)]).map(|x| (*track, x))
                })
                .collect();
            if best.as_ref().map_or(true, |b| points.len() > b.0) {
                best = Some((points.len(), pose, points));
            }
        }
    }
    let (count, pose, points) = best?;
    (count * 2 >= pairs.len()).then_some((pose, points))
}

/// Rotation taking world directions onto camera rays.
fn kabsch(pairs: &[(DVec3, DVec3, f64)]) -> Option<DMat3> {
    if pairs.len() < MIN_ROTATION_POINTS {
        return None;
    }
    let h = pairs
        .iter()
        .fold(DMat3::ZERO, |acc, (world, ray, w)| {
            acc + DMat3::from_cols(*ray * world.x, *ray * world.y, *ray * world.z) * *w
        });
    orthonormalize(&h)
}

fn ray(p: DVec2) -> DVec3 {
    p.extend(1.0).normalize()
}

// ── Reconstruction drivers ──────────────────────────────────────

/// Frame pair with the most shared tracks times their median parallax.
fn select_keyframes(views: &Views) -> Option<(i32, i32)> {
    let frames: Vec<i32> = views
        .by_frame
        .iter()
        .filter(|(_, v)| v.len() >= MIN_COMMON_TRACKS)
        .map(|(f, _)| *f)
        .collect();
    let mut best: Option<(f64, i32, i32)> = None;
    for (i, &a) in frames.iter().enumerate() {
        for &b in frames[i + 1..].iter().take_while(|b| **b - a <= MAX_KEYFRAME_SPAN) {
            let common = views.common(a, b);
            if common.len() < MIN_COMMON_TRACKS {
                continue;
            }
            let mut parallax: Vec<f64> = common.iter().map(|(_, p, q)| p.distance(*q)).collect();
            parallax.sort_by(f64::total_cmp);
            let score = common.len() as f64 * parallax[parallax.len() / 2];
            if best.map_or(true, |(s, _, _)| score > s) {
                best = Some((score, a, b));
            }
        }
    }
    best.map(|(_, a, b)| (a, b))
}

fn track_views(views: &Views, scene: &Scene, track: usize) -> Vec<(Pose, DVec2, f64)> {
    views
        .by_track
        .get(&track)
        .map(|list| {
            list.iter()
                .filter_map(|v| scene.poses.get(&v.frame).map(|p| (*p, v.point, v.weight)))
                .collect()
        })
        .unwrap_or_default()
}

fn frame_pairs(views: &Views, scene: &Scene, frame: i32) -> Vec<(DVec3, DVec2)> {
    views
        .frame(frame)
        .iter()
        .filter_map(|v| scene.points.get(&v.track).map(|x| (*x, v.point)))
        .collect()
}

fn reconstruct_full(views: &Views, kf1: i32, kf2: i32) -> Option<Scene> {
    let (pose, points) = two_view(&views.common(kf1, kf2))?;
    let mut scene = Scene::default();
    scene.poses.insert(kf1, Pose::IDENTITY);
    scene.poses.insert(kf2, pose);
    scene.points.extend(points);

    loop {
        let mut changed = false;

        let mut candidates: Vec<(usize, i32)> = views
            .by_frame
            .keys()
            .filter(|f| !scene.poses.contains_key(f))
            .map(|f| (frame_pairs(views, &scene, *f).len(), *f))
            .filter(|(n, _)| *n >= MIN_RESECTION_POINTS)
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        for (_, frame) in candidates {
            if let Some(pose) = resect(&frame_pairs(views, &scene, frame)) {
                scene.poses.insert(frame, pose);
                changed = true;
            }
        }

        let pending: Vec<usize> = views
            .by_track
            .keys()
            .filter(|t| !scene.points.contains_key(t))
            .copied()
            .collect();
        for track in pending {
            if let Some(x) = triangulate(&track_views(views, &scene, track)) {
                scene.points.insert(track, x);
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    for _ in 0..REFINE_ROUNDS {
        let frames: Vec<i32> = scene.poses.keys().copied().filter(|f| *f != kf1).collect();
        for frame in frames {
            if let Some(pose) = resect(&frame_pairs(views, &scene, frame)) {
                scene.poses.insert(frame, pose);
            }
        }
        let tracks: Vec<usize> = scene.points.keys().copied().collect();
        for track in tracks {
            if let Some(x) = triangulate(&track_views(views, &scene, track)) {
                scene.points.insert(track, x);
            }
        }
    }
    Some(scene)
}

/// Rotation-only reconstruction; bundles are directions on the unit sphere.
fn reconstruct_tripod(views: &Views, kf1: i32) -> Option<Scene> {
    let anchor = if views.frame(kf1).len() >= MIN_ROTATION_POINTS {
        kf1
    } else {
        views
            .by_frame
            .iter()
            .max_by_key(|(f, v)| (v.len(), -**f))
            .map(|(f, _)| *f)?
    };

    let mut scene = Scene::default();
    scene.poses.insert(anchor, Pose::IDENTITY);
    for v in views.frame(anchor) {
        scene.points.insert(v.track, ray(v.point));
    }

    let rotate = |scene: &Scene, frame: i32| -> Option<DMat3> {
        let pairs: Vec<(DVec3, DVec3, f64)> = views
            .frame(frame)
            .iter()
            .filter_map(|v| scene.points.get(&v.track).map(|d| (*d, ray(v.point), v.weight)))
            .collect();
        kabsch(&pairs)
    };

    let mut frames: Vec<i32> = views.by_frame.keys().copied().filter(|f| *f != anchor).collect();
    frames.sort_by_key(|f| (f - anchor).abs());
    loop {
        let mut changed = false;
        for &frame in &frames {
            if scene.poses.contains_key(&frame) {
                continue;
            }
            let Some(r) = rotate(&scene, frame) else {
                continue;
            };
            scene.poses.insert(frame, Pose { r, t: DVec3::ZERO });
            for v in views.frame(frame) {
                scene
                    .points
                    .entry(v.track)
                    .or_insert_with(|| (r.transpose() * ray(v.point)).normalize());
            }
            changed = true;
        }
        if !changed {
            break;
        }
    }

    for _ in 0..REFINE_ROUNDS {
        let tracks: Vec<usize> = scene.points.keys().copied().collect();
        for track in tracks {
            let sum = track_views(views, &scene, track)
                .iter()
                .fold(DVec3::ZERO, |acc, (pose, p, w)| acc + pose.r.transpose() * ray(*p) * *w);
            if sum.length_squared() > 1e-24 {
                scene.points.insert(track, sum.normalize());
            }
        }
        let posed: Vec<i32> = scene.poses.keys().copied().filter(|f| *f != anchor).collect();
        for frame in posed {
            if let Some(r) = rotate(&scene, frame) {
                scene.poses.insert(frame, Pose { r, t: DVec3::ZERO });
            }
        }
    }
    Some(scene)
}

// ── Errors ──────────────────────────────────────────────────────

struct Residuals {
    per_frame: BTreeMap<i32, (f64, usize)>,
    per_track: BTreeMap<usize, (f64, usize)>,
    total: (f64, usize),
}

impl Residuals {
    fn rms((sum, n): (f64, usize)) -> f64 {
        if n == 0 {
            0.0
        } else {
            (sum / n as f64).sqrt()
        }
    }
}

fn residuals(views: &Views, scene: &Scene, intrinsics: &CameraIntrinsics, width: u32, height: u32) -> Residuals {
    let mut out = Residuals {
        per_frame: BTreeMap::new(),
        per_track: BTreeMap::new(),
        total: (0.0, 0),
    };
    for (frame, list) in &views.by_frame {
        let Some(pose) = scene.poses.get(frame) else {
            continue;
        };
        for v in list {
            let Some(x) = scene.points.get(&v.track) else {
                continue;
            };
            let Some(n) = pose.project(*x) else {
                continue;
            };
            let pixel = intrinsics.denormalize(width, height, intrinsics.distortion.distort(n));
            let sq = pixel.distance_squared(v.pixel);
            for acc in [
                out.per_frame.entry(*frame).or_insert((0.0, 0)),
                out.per_track.entry(v.track).or_insert((0.0, 0)),
                &mut out.total,
            ] {
                acc.0 += sq;
                acc.1 += 1;
            }
        }
    }
    out
}

// ── Adjuster ────────────────────────────────────────────────────

/// Production bundle adjuster.
#[derive(Debug, Clone, Default)]
pub struct LinearBundleAdjuster;

impl LinearBundleAdjuster {
    pub fn new() -> Self {
        Self
    }

    fn reconstruct(
        &self,
        problem: &BundleProblem<'_>,
        intrinsics: &CameraIntrinsics,
        keyframes: (i32, i32),
    ) -> (Views, Option<Scene>) {
        let views = Views::new(problem, intrinsics);
        let scene = if problem.tripod {
            reconstruct_tripod(&views, keyframes.0)
        } else {
            reconstruct_full(&views, keyframes.0, keyframes.1)
        };
        (views, scene)
    }

    fn scene_error(&self, problem: &BundleProblem<'_>, intrinsics: &CameraIntrinsics, keyframes: (i32, i32)) -> f64 {
        match self.reconstruct(problem, intrinsics, keyframes) {
            (views, Some(scene)) if scene.poses.len() >= 2 => {
                let res = residuals(&views, &scene, intrinsics, problem.width, problem.height);
                Residuals::rms(res.total)
            }
            _ => f64::INFINITY,
        }
    }

    /// Golden-section search of the focal length in pixels.
    fn refine_focal(&self, problem: &BundleProblem<'_>, keyframes: (i32, i32)) -> CameraIntrinsics {
        let width = problem.width;
        let base = problem.intrinsics.focal_px(width);
        let eval = |focal: f64| {
            let mut intr = problem.intrinsics.clone();
            intr.set_focal_px(focal, width);
            self.scene_error(problem, &intr, keyframes)
        };

        let ratio = (5f64.sqrt() - 1.0) / 2.0;
        let (mut lo, mut hi) = (base * 0.5, base * 2.0);
        let mut c = hi - ratio * (hi - lo);
        let mut d = lo + ratio * (hi - lo);
        let (mut fc, mut fd) = (eval(c), eval(d));
        for _ in 0..FOCAL_SEARCH_STEPS {
            if fc < fd {
                hi = d;
                d = c;
                fd = fc;
                c = hi - ratio * (hi - lo);
                fc = eval(c);
            } else {
                lo = c;
                c = d;
                fc = fd;
                d = lo + ratio * (hi - lo);
                fd = eval(d);
            }
        }
        let best = (lo + hi) / 2.0;
        let mut intrinsics = problem.intrinsics.clone();
        if eval(best) <= eval(base) {
            intrinsics.set_focal_px(best, width);
        }
        debug!(focal_px = intrinsics.focal_px(width), "Focal length refined");
        intrinsics
    }
}

impl BundleAdjuster for LinearBundleAdjuster {
    fn solve(&self, problem: &BundleProblem<'_>, progress: SolveProgress<'_>) -> Result<BundleSolution> {
        let invalid = |keyframes: (i32, i32)| BundleSolution {
            cameras: Vec::new(),
            points: Vec::new(),
            intrinsics: problem.intrinsics.clone(),
            keyframe1: keyframes.0,
            keyframe2: keyframes.1,
            error: 0.0,
            is_valid: false,
        };

        progress(0.0, "Selecting keyframes");
        let mut keyframes = (problem.keyframe1, problem.keyframe2);
        if problem.select_keyframes && !problem.tripod {
            let views = Views::new(problem, &problem.intrinsics);
            match select_keyframes(&views) {
                Some(kf) => keyframes = kf,
                None => {
                    warn!("No frame pair shares enough tracks for automatic keyframes");
                    return Ok(invalid(keyframes));
                }
            }
            debug!(keyframe1 = keyframes.0, keyframe2 = keyframes.1, "Keyframes selected");
        }

        let intrinsics = if problem.refine.focal_length {
            progress(0.2, "Refining focal length");
            self.refine_focal(problem, keyframes)
        } else {
            problem.intrinsics.clone()
        };
        if problem.refine.principal_point
            || problem.refine.radial_distortion
            || problem.refine.tangential_distortion
        {
            debug!("Only the focal length is refined, other intrinsics are kept");
        }

        progress(0.6, "Reconstructing");
        let (views, scene) = self.reconstruct(problem, &intrinsics, keyframes);
        let Some(scene) = scene.filter(|s| s.poses.len() >= 2 && !s.points.is_empty()) else {
            warn!(
                keyframe1 = keyframes.0,
                keyframe2 = keyframes.1,
                "Initial reconstruction failed"
            );
            return Ok(invalid(keyframes));
        };

        progress(0.9, "Computing reprojection error");
        let res = residuals(&views, &scene, &intrinsics, problem.width, problem.height);
        let error = Residuals::rms(res.total);

        let tracks_without_views: BTreeSet<usize> = scene
            .points
            .keys()
            .filter(|t| !res.per_track.contains_key(t))
            .copied()
            .collect();
        let cameras = scene
            .poses
            .iter()
            .map(|(frame, pose)| SolvedCamera {
                frame: *frame,
                rotation: pose.r,
                translation: pose.t,
                error: res.per_frame.get(frame).copied().map_or(0.0, Residuals::rms),
            })
            .collect();
        let points = scene
            .points
            .iter()
            .filter(|(t, _)| !tracks_without_views.contains(t))
            .map(|(track, position)| SolvedPoint {
                track: *track,
                position: *position,
                error: res.per_track.get(track).copied().map_or(0.0, Residuals::rms),
            })
            .collect();

        progress(1.0, "Done");
        Ok(BundleSolution {
            cameras,
            points,
            intrinsics,
            keyframe1: keyframes.0,
            keyframe2: keyframes.1,
            error,
            is_valid: error.is_finite(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Observation;
    use crate::settings::RefineFlags;

    const W: u32 = 1920;
    const H: u32 = 1080;

    fn world_points() -> Vec<DVec3> {
        (0..40)
            .map(|i| {
                let f = i as f64;
                DVec3::new(
                    (f * 0.37).sin() * 3.0,
                    (f * 0.53).cos() * 2.0,
                    8.0 + (f * 0.71).sin() * 2.5,
                )
            })
            .collect()
    }

    fn camera_pose(frame: i32, tripod: bool) -> Pose {
        let f = frame as f64;
        let r = DMat3::from_rotation_y(0.01 * f) * DMat3::from_rotation_x(0.004 * f);
        let center = if tripod {
            DVec3::ZERO
        } else {
            DVec3::new(0.12 * f, 0.02 * f, 0.0)
        };
        Pose { r, t: -(r * center) }
    }

    fn observations(frames: std::ops::RangeInclusive<i32>, tripod: bool) -> Vec<Observation> {
        let intr = CameraIntrinsics::default();
        let points = world_points();
        let mut out = Vec::new();
        for frame in frames {
            let pose = camera_pose(frame, tripod);
            for (track, x) in points.iter().enumerate() {
                let x = if tripod { x.normalize() } else { *x };
                if let Some(n) = pose.project(x) {
                    let px = intr.denormalize(W, H, n);
                    out.push(Observation {
                        frame,
                        track,
                        x: px.x,
                        y: px.y,
                        weight: 1.0,
                    });
                }
            }
        }
        out
    }

    fn problem(obs: &[Observation], tripod: bool) -> BundleProblem<'_> {
        BundleProblem {
            observations: obs,
            intrinsics: CameraIntrinsics::default(),
            width: W,
            height: H,
            keyframe1: 1,
            keyframe2: 10,
            select_keyframes: false,
            tripod,
            refine: RefineFlags::NONE,
        }
    }

    #[test]
    fn test_full_solve_recovers_scene() {
        let obs = observations(1..=15, false);
        let mut calls = 0;
        let solution = LinearBundleAdjuster
            .solve(&problem(&obs, false), &mut |_, _| calls += 1)
            .unwrap();
        assert!(solution.is_valid);
        assert_eq!(solution.cameras.len(), 15);
        assert_eq!(solution.points.len(), 40);
        assert!(solution.error < 1e-3, "error {}", solution.error);
        assert!(calls > 0);
        let first = solution.cameras[0];
        assert_eq!(first.frame, 1);
        assert!((first.rotation - DMat3::IDENTITY).to_cols_array().iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_tripod_solve() {
        let obs = observations(1..=10, true);
        let solution = LinearBundleAdjuster
            .solve(&problem(&obs, true), &mut |_, _| {})
            .unwrap();
        assert!(solution.is_valid);
        assert_eq!(solution.cameras.len(), 10);
        assert!(solution.error < 1e-3, "error {}", solution.error);
        assert!(solution.cameras.iter().all(|c| c.translation == DVec3::ZERO));
        assert!(solution.points.iter().all(|p| (p.position.length() - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_automatic_keyframes() {
        let obs = observations(1..=12, false);
        let mut p = problem(&obs, false);
        p.keyframe1 = 100;
        p.keyframe2 = 200;
        p.select_keyframes = true;
        let solution = LinearBundleAdjuster.solve(&p, &mut |_, _| {}).unwrap();
        assert!(solution.is_valid);
        assert!(solution.keyframe1 >= 1 && solution.keyframe2 <= 12);
        assert!(solution.keyframe1 < solution.keyframe2);
    }

    #[test]
    fn test_too_few_tracks_is_invalid() {
        let obs: Vec<Observation> = observations(1..=10, false)
            .into_iter()
            .filter(|o| o.track < 7)
            .collect();
        let solution = LinearBundleAdjuster
            .solve(&problem(&obs, false), &mut |_, _| {})
            .unwrap();
        assert!(!solution.is_valid);
        assert!(solution.cameras.is_empty());
    }

    #[test]
    fn test_focal_refinement_moves_towards_truth() {
        let obs = observations(1..=12, false);
        let mut p = problem(&obs, false);
        p.intrinsics.focal_mm = 30.0;
        p.refine.focal_length = true;
        let solution = LinearBundleAdjuster.solve(&p, &mut |_, _| {}).unwrap();
        let recovered = solution.intrinsics.focal_mm;
        assert!((recovered - 35.0).abs() < (30.0f64 - 35.0).abs());
    }

    #[test]
    fn test_triangulate_two_views() {
        let x = DVec3::new(0.5, -0.3, 6.0);
        let a = camera_pose(0, false);
        let b = camera_pose(8, false);
        let obs = [
            (a, a.project(x).unwrap(), 1.0),
            (b, b.project(x).unwrap(), 1.0),
        ];
        assert!((triangulate(&obs).unwrap() - x).length() < 1e-8);
    }
}
