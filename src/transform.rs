//! Rigid transform helpers.
//!
//! A [`RigidTransform`] is a 4x4 homogeneous matrix holding rotation and
//! translation with unit scale. `compose(a, b)` applies `b` first, then `a`,
//! matching column-vector convention: `p' = A * B * p`.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform(pub Matrix4<f64>);

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    /// Build `T = [R | t]` from a translation and a rotation.
    pub fn from_parts(position: &Vector3<f64>, rotation: &UnitQuaternion<f64>) -> Self {
        let mut m = rotation.to_homogeneous();
        m[(0, 3)] = position.x;
        m[(1, 3)] = position.y;
        m[(2, 3)] = position.z;
        Self(m)
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    /// Translation column.
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.0[(0, 3)], self.0[(1, 3)], self.0[(2, 3)])
    }

    /// Rotation part, re-orthonormalized after removing any scale.
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        decompose(self).1
    }

    pub fn inverse(&self) -> Self {
        invert(self)
    }

    pub fn then(&self, other: &RigidTransform) -> Self {
        compose(other, self)
    }

    pub fn is_valid(&self) -> bool {
        is_valid(self)
    }
}

/// Closed-form inverse of a rigid transform: `[Rᵀ | -Rᵀ t]`.
///
/// Non-finite inputs produce non-finite outputs; check with [`is_valid`].
pub fn invert(t: &RigidTransform) -> RigidTransform {
    let r: Matrix3<f64> = t.0.fixed_view::<3, 3>(0, 0).into_owned();
    let p = t.position();
    let rt = r.transpose();
    let p_inv = -(rt * p);

    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rt);
    m[(0, 3)] = p_inv.x;
    m[(1, 3)] = p_inv.y;
    m[(2, 3)] = p_inv.z;
    RigidTransform(m)
}

/// `a ∘ b`: apply `b`, then `a`.
pub fn compose(a: &RigidTransform, b: &RigidTransform) -> RigidTransform {
    RigidTransform(a.0 * b.0)
}

/// Split into (position, rotation, per-axis scale).
pub fn decompose(t: &RigidTransform) -> (Vector3<f64>, UnitQuaternion<f64>, Vector3<f64>) {
    let position = t.position();
    let basis: Matrix3<f64> = t.0.fixed_view::<3, 3>(0, 0).into_owned();
    let scale = Vector3::new(
        basis.column(0).norm(),
        basis.column(1).norm(),
        basis.column(2).norm(),
    );

    let mut unscaled = basis;
    for i in 0..3 {
        if scale[i] > f64::EPSILON {
            for r in 0..3 {
                unscaled[(r, i)] /= scale[i];
            }
        }
    }
    let rotation = if unscaled.iter().all(|v| v.is_finite()) {
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&unscaled))
    } else {
        UnitQuaternion::identity()
    };
    (position, rotation, scale)
}

/// All sixteen entries finite.
pub fn is_valid(t: &RigidTransform) -> bool {
    t.0.iter().all(|v| v.is_finite())
}
