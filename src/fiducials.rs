//! Anatomical landmarks and the fiducial-based initial alignment.

use nalgebra::Vector3;

use crate::{fit_matched, PointSet, Result, RigidTransform};

/// The three cardinal landmarks of a head coordinate frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fiducials {
    /// Left pre-auricular point.
    pub lpa: Vector3<f32>,
    pub nasion: Vector3<f32>,
    /// Right pre-auricular point.
    pub rpa: Vector3<f32>,
}

impl Fiducials {
    pub fn new(lpa: Vector3<f32>, nasion: Vector3<f32>, rpa: Vector3<f32>) -> Self {
        Self { lpa, nasion, rpa }
    }

    /// Rows `[lpa, nasion, rpa]`.
    pub fn to_point_set(&self) -> PointSet {
        PointSet::from_rows(&[
            self.lpa.transpose(),
            self.nasion.transpose(),
            self.rpa.transpose(),
        ])
    }

    /// Landmarks mapped through `transform`.
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        Self {
            lpa: transform.apply_point(&self.lpa),
            nasion: transform.apply_point(&self.nasion),
            rpa: transform.apply_point(&self.rpa),
        }
    }
}

/// Relative importance of each landmark in the fiducial fit.
///
/// The nasion is usually located far more reliably than the pre-auricular
/// points, hence the default emphasis.
#[derive(Debug, Clone)]
pub struct FiducialWeights {
    /// Default: 1.
    pub lpa: f32,
    /// Default: 10.
    pub nasion: f32,
    /// Default: 1.
    pub rpa: f32,
}

impl Default for FiducialWeights {
    fn default() -> Self {
        Self {
            lpa: 1.0,
            nasion: 10.0,
            rpa: 1.0,
        }
    }
}

impl FiducialWeights {
    /// Weights in `[lpa, nasion, rpa]` row order.
    pub fn as_array(&self) -> [f32; 3] {
        [self.lpa, self.nasion, self.rpa]
    }
}

/// Weighted fit of the head-frame landmarks onto the MRI-frame landmarks.
///
/// Returns the head → MRI transform. Three landmarks fully determine a rigid
/// fit as long as they are not collinear.
pub fn fit_fiducials(
    head: &Fiducials,
    mri: &Fiducials,
    weights: &FiducialWeights,
    allow_scale: bool,
) -> Result<RigidTransform> {
    fit_matched(
        &head.to_point_set(),
        &mri.to_point_set(),
        Some(&weights.as_array()[..]),
        allow_scale,
    )
}
