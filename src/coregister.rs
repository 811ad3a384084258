//! Full head ↔ MRI coregistration: fiducial alignment, outlier rejection, ICP.
//!
//! Frames:
//! - *head*: digitizer and head-fiducial coordinates (query points).
//! - *MRI*: the scalp surface and MRI-fiducial coordinates.
//!
//! The ICP engine works with the surface (MRI) → query (head) convention, so
//! the fiducial estimate is inverted on the way in and the ICP result is
//! inverted on the way out.

use tracing::info;

use crate::fiducials::{fit_fiducials, FiducialWeights, Fiducials};
use crate::icp::{icp, IcpConfig, IcpResult};
use crate::outliers::{discard_outliers, OutlierSelection};
use crate::surface::SurfaceIndex;
use crate::{PointSet, Result, RigidTransform};

/// Configuration for [`coregister`].
#[derive(Debug, Clone)]
pub struct CoregConfig {
    /// ICP settings for the surface refinement.
    pub icp: IcpConfig,
    /// Landmark weights for the initial fiducial fit.
    pub fiducial_weights: FiducialWeights,
    /// Fit an isotropic scale in the fiducial step. Default: false.
    pub fit_fiducial_scale: bool,
    /// Digitizers farther than this from the scalp after the fiducial fit are
    /// dropped before ICP. Zero or less keeps everything. Default: 0.005 (5 mm
    /// for coordinates in metres).
    pub max_outlier_distance: f32,
}

impl Default for CoregConfig {
    fn default() -> Self {
        Self {
            icp: IcpConfig::default(),
            fiducial_weights: FiducialWeights::default(),
            fit_fiducial_scale: false,
            max_outlier_distance: 0.005,
        }
    }
}

/// Result of [`coregister`].
#[derive(Debug, Clone)]
pub struct CoregResult {
    /// Final head → MRI transform.
    pub head_to_mri: RigidTransform,
    /// Head → MRI transform from the fiducials alone.
    pub fiducial_fit: RigidTransform,
    /// ICP diagnostics. `icp.transform` is MRI → head.
    pub icp: IcpResult,
    /// Digitizers used for ICP.
    pub outliers: OutlierSelection,
}

/// Register head-frame digitizers to an MRI scalp surface.
///
/// 1. Fit `head_fiducials` onto `mri_fiducials` for an initial head → MRI
///    estimate.
/// 2. Drop digitizers farther than `max_outlier_distance` from the surface
///    under that estimate.
/// 3. Refine with ICP on the remaining digitizers.
///
/// # Errors
///
/// Fitter, inversion and surface errors are propagated. When every digitizer
/// is rejected as an outlier the ICP fit fails with
/// [`CoregError::EmptyPointSet`](crate::CoregError::EmptyPointSet).
pub fn coregister<S>(
    surface: &S,
    head_fiducials: &Fiducials,
    mri_fiducials: &Fiducials,
    digitizers: &PointSet,
    config: &CoregConfig,
) -> Result<CoregResult>
where
    S: SurfaceIndex + ?Sized,
{
    let fiducial_fit = fit_fiducials(
        head_fiducials,
        mri_fiducials,
        &config.fiducial_weights,
        config.fit_fiducial_scale,
    )?;
    let mri_to_head = fiducial_fit.inverse()?;

    let outliers = discard_outliers(
        surface,
        digitizers,
        &mri_to_head,
        config.max_outlier_distance,
    )?;

    let icp = icp(
        surface,
        &outliers.kept_points,
        &mri_to_head,
        &config.icp,
        None,
    )?;
    let head_to_mri = icp.transform.inverse()?;

    info!(
        "coregister: {:?} after {} iterations, {} of {} digitizers used, mse={:?}",
        icp.status,
        icp.iterations,
        outliers.kept_indices.len(),
        digitizers.nrows(),
        icp.mse
    );

    Ok(CoregResult {
        head_to_mri,
        fiducial_fit,
        icp,
        outliers,
    })
}
