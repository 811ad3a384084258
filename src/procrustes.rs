//! Closed-form weighted Procrustes fitting between matched point sets.
//!
//! Follows the quaternion formulation of Besl & McKay, "A Method for
//! Registration of 3-D Shapes", IEEE PAMI 14(2), 1992, §III-C:
//!
//! 1. Weighted centroids `μP`, `μX`.
//! 2. Cross-covariance `Σ = Σᵢ wᵢ·Pᵢ·Xᵢᵀ − μP·μXᵀ`.
//! 3. Symmetric 4×4 matrix `Q(Σ)` built from `tr(Σ)`, the antisymmetric part
//!    of `Σ`, and `Σ + Σᵀ − tr(Σ)·I`.
//! 4. The unit eigenvector of the largest eigenvalue of `Q` is the optimal
//!    rotation quaternion `(w, x, y, z)`.
//! 5. Optional isotropic scale from the ratio of weighted spreads.
//! 6. Translation `μX − s·R·μP`.
//!
//! Sums and the eigen-decomposition are carried out in f64; inputs and the
//! returned transform are f32.

use nalgebra::{Matrix3, Matrix4, Quaternion, SymmetricEigen, UnitQuaternion, Vector3};
use tracing::{debug, warn};

use crate::{CoregError, PointSet, Result, RigidTransform};

/// Weighted source spread (squared units) below which no scale is estimated.
const MIN_SPREAD: f64 = 1e-20;

/// Fit the transform `T` minimizing `Σ wᵢ · ‖T·Pᵢ − Xᵢ‖²`.
///
/// Rows of `source` and `destination` correspond by index. `weights`, when
/// given, must have one entry per row; an all-zero vector behaves like `None`.
/// With `allow_scale` the 3×3 block is `s·R`, otherwise a pure rotation.
///
/// Degenerate configurations (fewer than three distinct, non-collinear points)
/// are not detected: the rotation is then whatever the eigensolver returns.
///
/// # Errors
///
/// * [`CoregError::ShapeMismatch`]: row counts differ, or `weights` has the wrong length.
/// * [`CoregError::EmptyPointSet`]: no rows.
pub fn fit_matched(
    source: &PointSet,
    destination: &PointSet,
    weights: Option<&[f32]>,
    allow_scale: bool,
) -> Result<RigidTransform> {
    let n = source.nrows();
    if destination.nrows() != n {
        return Err(CoregError::ShapeMismatch {
            expected: n,
            actual: destination.nrows(),
        });
    }
    if let Some(w) = weights {
        if w.len() != n {
            return Err(CoregError::ShapeMismatch {
                expected: n,
                actual: w.len(),
            });
        }
    }
    if n == 0 {
        return Err(CoregError::EmptyPointSet);
    }

    let w = normalized_weights(weights, n);

    // ── Centroids and cross-covariance ──
    let mut mu_p = Vector3::<f64>::zeros();
    let mut mu_x = Vector3::<f64>::zeros();
    let mut dot = Matrix3::<f64>::zeros();
    for i in 0..n {
        let p = row_f64(source, i);
        let x = row_f64(destination, i);
        mu_p += p * w[i];
        mu_x += x * w[i];
        dot += p * (x * w[i]).transpose();
    }
    let sigma = dot - mu_p * mu_x.transpose();

    let rotation = rotation_from_covariance(&sigma);

    let scale = if allow_scale {
        spread_ratio(source, destination, &w, &mu_p, &mu_x)
    } else {
        1.0
    };

    let translation = mu_x - rotation * mu_p * scale;
    debug!(
        "fit_matched: n={}, scale={:.6}, t=({:.5}, {:.5}, {:.5})",
        n, scale, translation.x, translation.y, translation.z
    );

    Ok(RigidTransform::from_parts(
        &rotation.cast::<f32>(),
        scale as f32,
        &translation.cast::<f32>(),
    ))
}

/// Per-row weights summing to one.
///
/// `None`, and vectors that sum to zero, yield uniform weights.
fn normalized_weights(weights: Option<&[f32]>, n: usize) -> Vec<f64> {
    let uniform = || vec![1.0 / n as f64; n];
    let Some(weights) = weights else {
        return uniform();
    };
    let total: f64 = weights.iter().map(|&w| w as f64).sum();
    if total == 0.0 {
        debug!("fit_matched: all-zero weight vector, using uniform weights");
        return uniform();
    }
    weights.iter().map(|&w| w as f64 / total).collect()
}

#[inline]
fn row_f64(points: &PointSet, i: usize) -> Vector3<f64> {
    Vector3::new(
        points[(i, 0)] as f64,
        points[(i, 1)] as f64,
        points[(i, 2)] as f64,
    )
}

/// Optimal rotation for a cross-covariance matrix (Besl & McKay eq. 25).
fn rotation_from_covariance(sigma: &Matrix3<f64>) -> Matrix3<f64> {
    let trace = sigma.trace();
    let a = sigma - sigma.transpose();
    let delta = Vector3::new(a[(1, 2)], a[(2, 0)], a[(0, 1)]);

    let mut q = Matrix4::<f64>::zeros();
    q[(0, 0)] = trace;
    q.fixed_view_mut::<1, 3>(0, 1).copy_from(&delta.transpose());
    q.fixed_view_mut::<3, 1>(1, 0).copy_from(&delta);
    q.fixed_view_mut::<3, 3>(1, 1)
        .copy_from(&(sigma + sigma.transpose() - Matrix3::identity() * trace));

    let eigen = SymmetricEigen::new(q);
    let best = largest_index(eigen.eigenvalues.as_slice());
    let v = eigen.eigenvectors.column(best);
    let quat = UnitQuaternion::from_quaternion(Quaternion::new(v[0], v[1], v[2], v[3]));
    quat.to_rotation_matrix().into_inner()
}

/// Index of the largest value; the first one wins ties.
fn largest_index(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// `sqrt(Σ wᵢ‖Xᵢ − μX‖² / Σ wᵢ‖Pᵢ − μP‖²)`, or 1 when the source has no spread.
fn spread_ratio(
    source: &PointSet,
    destination: &PointSet,
    w: &[f64],
    mu_p: &Vector3<f64>,
    mu_x: &Vector3<f64>,
) -> f64 {
    let mut dev_p = 0.0f64;
    let mut dev_x = 0.0f64;
    for (i, wi) in w.iter().enumerate() {
        dev_p += wi * (row_f64(source, i) - mu_p).norm_squared();
        dev_x += wi * (row_f64(destination, i) - mu_x).norm_squared();
    }
    if dev_p < MIN_SPREAD {
        warn!("fit_matched: source points have no spread, scale fixed to 1");
        return 1.0;
    }
    (dev_x / dev_p).sqrt()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    /// Six non-coplanar points spread over a few centimetres.
    fn head_like_points() -> PointSet {
        PointSet::from_row_slice(&[
            0.00, 0.09, 0.00, //
            -0.07, 0.00, 0.00, //
            0.07, 0.00, 0.00, //
            0.00, 0.00, 0.10, //
            0.02, -0.08, 0.04, //
            -0.03, 0.05, 0.07,
        ])
    }

    #[test]
    fn test_identity_fit() {
        let p = head_like_points();
        let t = fit_matched(&p, &p, None, false).unwrap();
        assert_relative_eq!(*t.matrix(), Matrix4::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_identity_fit_with_scale() {
        let p = head_like_points();
        let t = fit_matched(&p, &p, None, true).unwrap();
        assert_relative_eq!(t.scale(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(*t.matrix(), Matrix4::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_recovers_known_rigid_transform() {
        let rot = Rotation3::from_euler_angles(0.3_f32, -0.5, 1.2);
        let truth = RigidTransform::from_parts(rot.matrix(), 1.0, &Vector3::new(0.01, -0.03, 0.02));
        let p = head_like_points();
        let x = truth.apply(&p);

        let t = fit_matched(&p, &x, None, false).unwrap();
        assert_relative_eq!(*t.matrix(), *truth.matrix(), epsilon = 1e-5);
    }

    #[test]
    fn test_recovers_known_scaled_transform() {
        let rot = Rotation3::from_euler_angles(-0.8_f32, 0.2, 2.5);
        let truth = RigidTransform::from_parts(rot.matrix(), 1.15, &Vector3::new(-0.2, 0.1, 0.3));
        let p = head_like_points();
        let x = truth.apply(&p);

        let t = fit_matched(&p, &x, None, true).unwrap();
        assert_relative_eq!(t.scale(), 1.15, max_relative = 1e-4);
        assert_relative_eq!(*t.matrix(), *truth.matrix(), epsilon = 1e-4);
    }

    #[test]
    fn test_rotation_is_proper() {
        let rot = Rotation3::from_euler_angles(1.0_f32, 0.7, -2.0);
        let truth = RigidTransform::from_parts(rot.matrix(), 1.0, &Vector3::zeros());
        let p = head_like_points();
        let t = fit_matched(&p, &truth.apply(&p), None, false).unwrap();
        assert_relative_eq!(t.rotation_scale().determinant(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_uniform_weights_match_unweighted() {
        let rot = Rotation3::from_euler_angles(0.1_f32, 0.2, -0.4);
        let truth = RigidTransform::from_parts(rot.matrix(), 1.0, &Vector3::new(0.0, 0.02, 0.0));
        let p = head_like_points();
        let mut x = truth.apply(&p);
        // Perturb one point so the fit is not exact and weighting matters.
        x[(4, 0)] += 0.005;

        let unweighted = fit_matched(&p, &x, None, true).unwrap();
        let uniform = vec![2.5f32; p.nrows()];
        let weighted = fit_matched(&p, &x, Some(uniform.as_slice()), true).unwrap();
        assert_relative_eq!(*weighted.matrix(), *unweighted.matrix(), epsilon = 1e-6);
    }

    #[test]
    fn test_zero_weights_match_unweighted() {
        let p = head_like_points();
        let mut x = p.clone();
        x[(0, 2)] += 0.01;
        let zeros = vec![0.0f32; p.nrows()];
        let a = fit_matched(&p, &x, Some(zeros.as_slice()), false).unwrap();
        let b = fit_matched(&p, &x, None, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_weights_pull_fit_toward_heavy_points() {
        let p = head_like_points();
        let mut x = p.clone();
        // Shift the last point only; heavily weighting it should drag the
        // translation towards that shift.
        let last = p.nrows() - 1;
        x[(last, 0)] += 0.02;

        let mut w = vec![1.0f32; p.nrows()];
        let light = fit_matched(&p, &x, Some(&w[..]), false).unwrap();
        w[last] = 100.0;
        let heavy = fit_matched(&p, &x, Some(&w[..]), false).unwrap();

        let moved_light = light.apply_point(&p.row(last).transpose());
        let moved_heavy = heavy.apply_point(&p.row(last).transpose());
        let target = x.row(last).transpose();
        assert!(
            (moved_heavy - target).norm() < (moved_light - target).norm(),
            "heavy weight should reduce the residual of the weighted point"
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let p = head_like_points();
        let x = p.rows(0, 4).into_owned();
        assert_eq!(
            fit_matched(&p, &x, None, false),
            Err(CoregError::ShapeMismatch {
                expected: 6,
                actual: 4
            })
        );
    }

    #[test]
    fn test_weight_length_mismatch() {
        let p = head_like_points();
        let w = [1.0f32; 3];
        assert!(matches!(
            fit_matched(&p, &p, Some(&w[..]), false),
            Err(CoregError::ShapeMismatch { expected: 6, actual: 3 })
        ));
    }

    #[test]
    fn test_empty_point_set() {
        let p = PointSet::zeros(0);
        assert_eq!(fit_matched(&p, &p, None, false), Err(CoregError::EmptyPointSet));
    }

    #[test]
    fn test_coincident_source_keeps_unit_scale() {
        let p = PointSet::zeros(3);
        let x = PointSet::from_row_slice(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let t = fit_matched(&p, &x, None, true).unwrap();
        assert_relative_eq!(t.scale(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_largest_index_prefers_first_on_tie() {
        assert_eq!(largest_index(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(largest_index(&[-1.0]), 0);
    }
}
