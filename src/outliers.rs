//! Rejection of query points that lie far from the reference surface.

use tracing::{debug, info};

use crate::surface::SurfaceIndex;
use crate::{PointSet, Result, RigidTransform};

/// Points surviving an outlier pass.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierSelection {
    /// Row indices into the original query set, in ascending order.
    pub kept_indices: Vec<usize>,
    /// The kept rows, in their original (destination frame) coordinates.
    pub kept_points: PointSet,
    /// Number of rows dropped.
    pub discarded: usize,
}

impl OutlierSelection {
    fn keep_all(query: &PointSet) -> Self {
        Self {
            kept_indices: (0..query.nrows()).collect(),
            kept_points: query.clone(),
            discarded: 0,
        }
    }

    /// Select the matching entries of a per-point vector (e.g. weights).
    ///
    /// # Panics
    ///
    /// If `values` is shorter than the query set the selection was made from.
    pub fn select<T: Clone>(&self, values: &[T]) -> Vec<T> {
        self.kept_indices.iter().map(|&i| values[i].clone()).collect()
    }
}

/// Keep the query points whose distance to `surface` is at most `max_distance`.
///
/// `transform` maps the surface (source) frame to the query (destination)
/// frame; query points are pulled back through its inverse before lookup.
/// The comparison is inclusive. A `max_distance` of zero or less, or NaN,
/// disables filtering: every point is kept and the surface is not queried.
///
/// # Errors
///
/// * [`CoregError::SingularTransform`](crate::CoregError::SingularTransform): `transform` cannot be inverted.
/// * Any error of the surface query.
pub fn discard_outliers<S>(
    surface: &S,
    query: &PointSet,
    transform: &RigidTransform,
    max_distance: f32,
) -> Result<OutlierSelection>
where
    S: SurfaceIndex + ?Sized,
{
    if max_distance.is_nan() || max_distance <= 0.0 {
        debug!("discard_outliers: filtering disabled (max_distance={})", max_distance);
        return Ok(OutlierSelection::keep_all(query));
    }

    let mapped = transform.inverse()?.apply(query);
    let closest = surface.closest_points(&mapped)?;
    closest.ensure_len(query.nrows())?;

    let kept_indices: Vec<usize> = closest
        .distances
        .iter()
        .enumerate()
        .filter(|(_, d)| **d <= max_distance)
        .map(|(i, _)| i)
        .collect();

    let mut kept_points = PointSet::zeros(kept_indices.len());
    for (row, &i) in kept_indices.iter().enumerate() {
        kept_points.set_row(row, &query.row(i));
    }
    let discarded = query.nrows() - kept_indices.len();

    info!(
        "discard_outliers: {} of {} points beyond {:.4} discarded",
        discarded,
        query.nrows(),
        max_distance
    );
    Ok(OutlierSelection {
        kept_indices,
        kept_points,
        discarded,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
