//! # coreg
//!
//! Rigid **point-set coregistration**: align digitized head points with an MRI
//! scalp surface.
//!
//! Given a cloud of 3-D points and a reference surface, `coreg` estimates the
//! rotation, translation and (optionally) isotropic scale that bring the points
//! onto the surface.
//!
//! ## Features
//!
//! - **Weighted Procrustes fit**: closed-form least-squares alignment of matched
//!   point sets via the Besl–McKay quaternion method
//! - **ICP**: iterative closest point refinement against any [`SurfaceIndex`]
//! - **Outlier rejection**: drop points that sit too far from the surface
//! - **Fiducial alignment**: initial estimate from LPA / nasion / RPA landmarks
//! - **Reference surface**: triangle mesh with a uniform-grid closest-point
//!   index, queried in parallel with [rayon](https://docs.rs/rayon) (feature
//!   `parallel`, on by default)
//!
//! ## Example
//!
//! ```no_run
//! use coreg::{coregister, CoregConfig, Fiducials, PointSet, SurfaceGridConfig, TriangleSurface};
//! use nalgebra::Vector3;
//!
//! // Scalp surface in MRI coordinates (metres)
//! let scalp = TriangleSurface::ellipsoid(Vector3::zeros(), Vector3::new(0.075, 0.1, 0.09), 4)
//!     .with_index(&SurfaceGridConfig::default());
//!
//! let mri_fids = Fiducials::new(
//!     Vector3::new(-0.075, 0.0, 0.0),
//!     Vector3::new(0.0, 0.1, 0.0),
//!     Vector3::new(0.075, 0.0, 0.0),
//! );
//! let head_fids = mri_fids; // as digitized
//! let digitizers = PointSet::from_row_slice(&[
//!     0.0, 0.0, 0.09, //
//!     0.03, 0.05, 0.06, //
//!     // ... more head-shape points ...
//! ]);
//!
//! let result = coregister(&scalp, &head_fids, &mri_fids, &digitizers, &CoregConfig::default())
//!     .unwrap();
//! println!("head -> MRI: {}", result.head_to_mri.matrix());
//! println!("{:?} after {} iterations", result.icp.status, result.icp.iterations);
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Fiducial fit**: weighted Procrustes of the head landmarks onto the MRI
//!    landmarks gives the initial estimate
//! 2. **Outlier rejection**: digitizers farther than a threshold from the
//!    surface are discarded
//! 3. **ICP**: map the digitizers into the surface frame, look up their closest
//!    surface points, re-fit, and repeat until the mean distance settles
//!
//! Reference: P. J. Besl and N. D. McKay, "A Method for Registration of 3-D
//! Shapes," IEEE PAMI 14(2), 1992.
//!

pub mod coregister;
mod error;
pub mod fiducials;
pub mod icp;
pub mod outliers;
pub mod procrustes;
pub mod surface;
mod transform;

pub use coregister::{coregister, CoregConfig, CoregResult};
pub use error::{CoregError, Result};
pub use fiducials::{fit_fiducials, FiducialWeights, Fiducials};
pub use icp::{icp, IcpConfig, IcpResult, IcpStatus};
pub use outliers::{discard_outliers, OutlierSelection};
pub use procrustes::fit_matched;
pub use surface::{ClosestPoints, SurfaceGridConfig, SurfaceIndex, TriangleSurface};
pub use surface::triangle::SurfacePoint;
pub use transform::{RigidTransform, TransformParams};

// Point data and transforms are 32-bit. Centroids, covariances and the
// eigen-decomposition in the fitter run in 64-bit.
/// N×3 matrix, one point per row.
pub type PointSet = nalgebra::MatrixXx3<f32>;
