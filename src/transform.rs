//! Homogeneous 3-D transforms: rotation (optionally scaled) plus translation.
//!
//! A [`RigidTransform`] is a 4×4 matrix
//!
//! ```text
//! [ s·R  t ]
//! [ 0    1 ]
//! ```
//!
//! whose bottom row is always `(0, 0, 0, 1)`. The 3×3 block is usually a
//! rotation times an isotropic scale, but any invertible block is accepted so
//! that transforms built from per-axis scaling parameters round-trip.

use nalgebra::{Matrix3, Matrix4, Rotation3, RowVector4, Vector3};

use crate::{CoregError, PointSet, Result};

/// Determinant magnitude below which a 3×3 block is treated as singular.
const SINGULAR_DET: f64 = 1e-30;

/// Affine 3-D transform with a fixed homogeneous bottom row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    matrix: Matrix4<f32>,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Wrap a 4×4 matrix. The bottom row is overwritten with `(0, 0, 0, 1)`.
    pub fn from_matrix(mut matrix: Matrix4<f32>) -> Self {
        matrix.set_row(3, &RowVector4::new(0.0, 0.0, 0.0, 1.0));
        Self { matrix }
    }

    /// Build `[scale·rotation | translation]`.
    pub fn from_parts(rotation: &Matrix3<f32>, scale: f32, translation: &Vector3<f32>) -> Self {
        Self::from_block(&(rotation * scale), translation)
    }

    /// Build a transform from an arbitrary 3×3 block and a translation.
    pub fn from_block(block: &Matrix3<f32>, translation: &Vector3<f32>) -> Self {
        let mut matrix = Matrix4::identity();
        matrix.fixed_view_mut::<3, 3>(0, 0).copy_from(block);
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        Self { matrix }
    }

    /// Pure translation.
    pub fn from_translation(translation: &Vector3<f32>) -> Self {
        Self::from_block(&Matrix3::identity(), translation)
    }

    /// The full homogeneous matrix.
    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.matrix
    }

    /// The 3×3 rotation·scale block.
    pub fn rotation_scale(&self) -> Matrix3<f32> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f32> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Isotropic scale factor, `|det(block)|^(1/3)`.
    ///
    /// For transforms produced by the Procrustes fitter this is exactly the
    /// fitted scale; for per-axis scaled transforms it is their geometric mean.
    pub fn scale(&self) -> f32 {
        self.rotation_scale().determinant().abs().cbrt()
    }

    /// Invert in place.
    ///
    /// Uses the block structure `[A | t]⁻¹ = [A⁻¹ | −A⁻¹·t]`, computed in f64.
    /// On failure the transform is left untouched.
    pub fn invert(&mut self) -> Result<()> {
        let block = self.rotation_scale().cast::<f64>();
        if block.determinant().abs() < SINGULAR_DET {
            return Err(CoregError::SingularTransform);
        }
        let inv_block = block.try_inverse().ok_or(CoregError::SingularTransform)?;
        let inv_translation = -(inv_block * self.translation().cast::<f64>());
        *self = Self::from_block(&inv_block.cast::<f32>(), &inv_translation.cast::<f32>());
        Ok(())
    }

    /// Return the inverse transform.
    pub fn inverse(&self) -> Result<Self> {
        let mut inv = *self;
        inv.invert()?;
        Ok(inv)
    }

    /// Map a single point.
    pub fn apply_point(&self, point: &Vector3<f32>) -> Vector3<f32> {
        self.rotation_scale() * point + self.translation()
    }

    /// Map every row of an N×3 point set, returning a new set.
    pub fn apply(&self, points: &PointSet) -> PointSet {
        let block = self.rotation_scale();
        let translation = self.translation();
        let mut out = PointSet::zeros(points.nrows());
        for (i, row) in points.row_iter().enumerate() {
            let mapped = block * row.transpose() + translation;
            out.set_row(i, &mapped.transpose());
        }
        out
    }

    /// Compose: the returned transform applies `self` first, then `next`.
    pub fn then(&self, next: &RigidTransform) -> RigidTransform {
        Self::from_matrix(next.matrix * self.matrix)
    }

    /// Build a transform from Euler angles, translation and per-axis scale.
    ///
    /// The block is `R · diag(scale)` with `R = Rz(yaw)·Ry(pitch)·Rx(roll)`,
    /// so scaling is applied in the source frame before rotating.
    pub fn from_params(params: &TransformParams) -> Self {
        let rotation = Rotation3::from_euler_angles(
            params.rotation.x,
            params.rotation.y,
            params.rotation.z,
        );
        let block = rotation.matrix() * Matrix3::from_diagonal(&params.scale);
        Self::from_block(&block, &params.translation)
    }

    /// Decompose into Euler angles, translation and per-axis scale.
    ///
    /// Inverse of [`RigidTransform::from_params`] for blocks of the form
    /// `R · diag(s)` with positive `s`.
    pub fn params(&self) -> TransformParams {
        let block = self.rotation_scale();
        let scale = Vector3::new(
            block.column(0).norm(),
            block.column(1).norm(),
            block.column(2).norm(),
        );
        let mut rotation = block;
        for (j, s) in scale.iter().enumerate() {
            if *s > 0.0 {
                rotation.column_mut(j).unscale_mut(*s);
            }
        }
        let (roll, pitch, yaw) = Rotation3::from_matrix_unchecked(rotation).euler_angles();
        TransformParams {
            rotation: Vector3::new(roll, pitch, yaw),
            translation: self.translation(),
            scale,
        }
    }
}

/// Human-editable parameterisation of a transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    /// Euler angles `(roll, pitch, yaw)` about x, y, z in radians.
    pub rotation: Vector3<f32>,
    /// Translation in the units of the destination frame.
    pub translation: Vector3<f32>,
    /// Per-axis scale factors.
    pub scale: Vector3<f32>,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            rotation: Vector3::zeros(),
            translation: Vector3::zeros(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
