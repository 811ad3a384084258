//! Iterative Closest Point refinement of a transform against a surface.
//!
//! The surface lives in the *source* frame; the query points live in the
//! *destination* frame. The caller's estimate maps source → destination.
//!
//! Algorithm (Besl & McKay 1992, with scaling optional):
//! 1. Invert the estimate to get a query → surface mapping `M`.
//! 2. Map the original query set `P0` with `M` and look up the closest surface
//!    points `Y`.
//! 3. Re-fit `M = fit(P0, Y)` with the weighted Procrustes fitter. Since the fit
//!    starts from `P0`, it is the complete mapping and replaces the previous one.
//! 4. The convergence signal is the mean query-to-surface distance; stop once
//!    it changes by less than `tolerance` between consecutive iterations.
//! 5. Invert `M` back to source → destination for the result.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::surface::SurfaceIndex;
use crate::{fit_matched, CoregError, PointSet, Result, RigidTransform};

// ── Config ──────────────────────────────────────────────────────────────────

/// Configuration for an ICP run.
#[derive(Debug, Clone)]
pub struct IcpConfig {
    /// Maximum number of iterations, i.e. surface queries. Zero returns the
    /// initial transform untouched without querying. Default: 20.
    pub max_iterations: u32,
    /// Convergence threshold on the change of the mean distance between two
    /// consecutive iterations, in point units. Default: 1e-4.
    pub tolerance: f32,
    /// Fit an isotropic scale along with rotation and translation. Default: true.
    pub allow_scale: bool,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 1e-4,
            allow_scale: true,
        }
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

/// Outcome of an ICP run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpStatus {
    /// The mean distance settled within the tolerance.
    Converged,
    /// The iteration budget ran out first. The transform is still the best
    /// available estimate.
    Exhausted,
}

/// Result of an ICP run.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Refined source → destination transform.
    pub transform: RigidTransform,
    /// Outcome status.
    pub status: IcpStatus,
    /// Number of iterations run. Each iteration issues one surface query.
    pub iterations: u32,
    /// Mean query-to-surface distance of the last iteration.
    /// `None` when no iteration ran.
    pub mse: Option<f32>,
    /// Wall-clock time spent, in milliseconds.
    pub elapsed_ms: f32,
}

impl IcpResult {
    /// Zero-based index of the iteration at which convergence was detected.
    pub fn converged_at(&self) -> Option<u32> {
        match self.status {
            IcpStatus::Converged => self.iterations.checked_sub(1),
            IcpStatus::Exhausted => None,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.status == IcpStatus::Converged
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// Refine `initial` (source → destination) so that `query` (destination frame)
/// lies as close as possible to `surface` (source frame).
///
/// `weights`, when given, must have one entry per query row; they weight each
/// point in the Procrustes re-fit. A length mismatch is rejected before the
/// surface is queried.
///
/// # Errors
///
/// * [`CoregError::SingularTransform`](crate::CoregError::SingularTransform):
///   `initial`, or a fitted estimate, cannot be inverted.
/// * [`CoregError::ShapeMismatch`](crate::CoregError::ShapeMismatch):
///   `weights` does not have one entry per query row.
/// * Any error of the surface query, and fitter errors on mismatched input.
///   No partial transform is returned in that case.
pub fn icp<S>(
    surface: &S,
    query: &PointSet,
    initial: &RigidTransform,
    config: &IcpConfig,
    weights: Option<&[f32]>,
) -> Result<IcpResult>
where
    S: SurfaceIndex + ?Sized,
{
    let t_start = Instant::now();
    let elapsed_ms = || t_start.elapsed().as_secs_f32() * 1000.0;

    if let Some(w) = weights {
        if w.len() != query.nrows() {
            return Err(CoregError::ShapeMismatch {
                expected: query.nrows(),
                actual: w.len(),
            });
        }
    }

    if config.max_iterations == 0 {
        debug!("icp: zero iteration budget, returning initial transform");
        return Ok(IcpResult {
            transform: *initial,
            status: IcpStatus::Exhausted,
            iterations: 0,
            mse: None,
            elapsed_ms: elapsed_ms(),
        });
    }

    // Query frame → surface frame.
    let mut estimate = initial.inverse()?;
    let mut prev_mse: Option<f32> = None;

    for k in 0..config.max_iterations {
        let mapped = estimate.apply(query);
        let closest = surface.closest_points(&mapped)?;
        closest.ensure_len(query.nrows())?;

        estimate = fit_matched(query, &closest.points, weights, config.allow_scale)?;
        let mse = closest.mean_distance();
        debug!(
            "icp iter {}: mse={:.6e}, scale={:.6}",
            k,
            mse,
            estimate.scale()
        );

        if let Some(prev) = prev_mse {
            if (mse - prev).abs() < config.tolerance {
                let transform = estimate.inverse()?;
                info!(
                    "icp converged at iteration {} (mse={:.6e}, {} points)",
                    k,
                    mse,
                    query.nrows()
                );
                return Ok(IcpResult {
                    transform,
                    status: IcpStatus::Converged,
                    iterations: k + 1,
                    mse: Some(mse),
                    elapsed_ms: elapsed_ms(),
                });
            }
        }
        prev_mse = Some(mse);
    }

    let transform = estimate.inverse()?;
    warn!(
        "icp did not converge within {} iterations (last mse={:.6e})",
        config.max_iterations,
        prev_mse.unwrap_or(f32::NAN)
    );
    Ok(IcpResult {
        transform,
        status: IcpStatus::Exhausted,
        iterations: config.max_iterations,
        mse: prev_mse,
        elapsed_ms: elapsed_ms(),
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
