//! Homogeneous 4x4 spatial transforms.
//!
//! Matrices are row-major and act on column vectors, so a point `p` maps to
//! `M * p`. Concatenation is left-to-right: `a.then(&b)` applies `a` first.

use serde::{Deserialize, Serialize};

const SINGULAR_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub matrix: [[f64; 4]; 4],
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Self = Self {
        matrix: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn from_matrix(matrix: [[f64; 4]; 4]) -> Self {
        Self { matrix }
    }

    pub fn from_translation(t: [f64; 3]) -> Self {
        let mut out = Self::IDENTITY;
        for (row, value) in t.iter().enumerate() {
            out.matrix[row][3] = *value;
        }
        out
    }

    pub fn from_scale(s: [f64; 3]) -> Self {
        let mut out = Self::IDENTITY;
        for (axis, value) in s.iter().enumerate() {
            out.matrix[axis][axis] = *value;
        }
        out
    }

    /// Scaling by `spacing` followed by a shift to `origin`, i.e. the
    /// IJK-to-physical mapping of an axis-aligned voxel grid.
    pub fn from_spacing_origin(spacing: [f64; 3], origin: [f64; 3]) -> Self {
        let mut out = Self::from_scale(spacing);
        for (row, value) in origin.iter().enumerate() {
            out.matrix[row][3] = *value;
        }
        out
    }

    /// Returns the transform that applies `self` first, then `next`.
    pub fn then(&self, next: &Affine) -> Affine {
        next.mul(self)
    }

    fn mul(&self, rhs: &Affine) -> Affine {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.matrix[r][k] * rhs.matrix[k][c]).sum();
            }
        }
        Affine { matrix: out }
    }

    /// Inverse of the transform, `None` when the linear part is singular or
    /// the bottom row is not `[0, 0, 0, 1]`.
    pub fn inverse(&self) -> Option<Affine> {
        let m = &self.matrix;
        if m[3] != [0.0, 0.0, 0.0, 1.0] {
            return None;
        }

        let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
        if det.abs() < SINGULAR_EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        let mut inv = Affine::IDENTITY;
        let r = &mut inv.matrix;
        r[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det;
        r[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det;
        r[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det;
        r[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det;
        r[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det;
        r[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det;
        r[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det;
        r[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det;
        r[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det;

        // -R^-1 * t
        for row in 0..3 {
            r[row][3] = -(0..3).map(|k| r[row][k] * m[k][3]).sum::<f64>();
        }
        Some(inv)
    }

    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        let mut out = [0.0; 3];
        for (row, value) in out.iter_mut().enumerate() {
            *value = m[row][0] * p[0] + m[row][1] * p[1] + m[row][2] * p[2] + m[row][3];
        }
        out
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: [f64; 3], b: [f64; 3]) {
        for axis in 0..3 {
            assert!((a[axis] - b[axis]).abs() < 1e-9, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_then_applies_left_first() {
        let scale = Affine::from_scale([2.0, 2.0, 2.0]);
        let shift = Affine::from_translation([1.0, 0.0, 0.0]);

        // scale then shift: (1,1,1) -> (2,2,2) -> (3,2,2)
        assert_close(scale.then(&shift).apply([1.0, 1.0, 1.0]), [3.0, 2.0, 2.0]);
        // shift then scale: (1,1,1) -> (2,1,1) -> (4,2,2)
        assert_close(shift.then(&scale).apply([1.0, 1.0, 1.0]), [4.0, 2.0, 2.0]);
    }

    #[test]
    fn test_inverse_undoes_transform() {
        let t = Affine::from_spacing_origin([0.7, 1.3, 2.5], [-10.0, 4.0, 12.5]);
        let inv = t.inverse().expect("spacing transform is invertible");
        let p = [3.0, -2.0, 7.5];
        assert_close(inv.apply(t.apply(p)), p);
        assert_close(t.then(&inv).apply(p), p);
    }

    #[test]
    fn test_identity_inverse_is_exact() {
        let inv = Affine::IDENTITY.inverse().expect("identity is invertible");
        assert!(inv.is_identity());
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let flat = Affine::from_scale([1.0, 0.0, 1.0]);
        assert!(flat.inverse().is_none());
    }
}
