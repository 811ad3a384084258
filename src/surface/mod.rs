//! Closest-point queries against a reference surface.
//!
//! The registration engine only sees the [`SurfaceIndex`] trait: given a batch
//! of query points it needs, per point, the closest point on the surface, the
//! surface element it landed on, and the distance. [`TriangleSurface`] is a
//! ready-made implementation over a triangle mesh with a uniform-grid index.

pub mod grid;
pub mod triangle;

pub use grid::SurfaceGridConfig;
pub use triangle::TriangleSurface;

use crate::{CoregError, PointSet, Result};

/// Nearest-point lookup on a fixed reference surface.
///
/// Implementations are queried read-only; concurrent registration jobs may
/// share one index if the implementation is also `Sync`.
pub trait SurfaceIndex {
    /// For every row of `query`, find the closest point on the surface.
    ///
    /// Should fail with [`CoregError::SurfaceNotReady`] when the lookup
    /// structure has not been built.
    fn closest_points(&self, query: &PointSet) -> Result<ClosestPoints>;
}

impl<T: SurfaceIndex + ?Sized> SurfaceIndex for &T {
    fn closest_points(&self, query: &PointSet) -> Result<ClosestPoints> {
        (**self).closest_points(query)
    }
}

/// Per-query answers of a [`SurfaceIndex`], in query row order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosestPoints {
    /// Closest surface point for each query row (N×3).
    pub points: PointSet,
    /// Identifier of the surface element (e.g. triangle) each point lies on.
    pub element_ids: Vec<usize>,
    /// Euclidean distance from each query point to its closest point.
    pub distances: Vec<f32>,
}

impl ClosestPoints {
    /// Number of answered queries.
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    /// Check that a collaborator answered exactly `n` queries.
    pub(crate) fn ensure_len(&self, n: usize) -> Result<()> {
        if self.points.nrows() != n || self.element_ids.len() != n || self.distances.len() != n {
            return Err(CoregError::SurfaceQueryFailure(format!(
                "expected {} answers, got {} points / {} ids / {} distances",
                n,
                self.points.nrows(),
                self.element_ids.len(),
                self.distances.len()
            )));
        }
        Ok(())
    }

    /// Mean distance, accumulated in f64.
    pub fn mean_distance(&self) -> f32 {
        if self.distances.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.distances.iter().map(|&d| d as f64).sum();
        (sum / self.distances.len() as f64) as f32
    }
}
