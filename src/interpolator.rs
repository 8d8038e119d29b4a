use crate::enums::Interpolation;

use ndarray::ArrayView3;

/// Continuous voxel coordinates closer than this to a grid point are
/// treated as lying on it.
const GRID_SNAP: f64 = 1e-6;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Sample `volume` at continuous voxel coordinate `(i, j, k)`.
    ///
    /// Returns `None` outside the grid. The valid range per axis is
    /// `[0, extent - 1]` after snapping.
    pub(crate) fn sample(
        volume: &ArrayView3<f32>,
        ijk: [f64; 3],
        interpolation: Interpolation,
    ) -> Option<f32> {
        let (depth, height, width) = volume.dim();
        let extent = [width, height, depth];
        let mut p = [0.0; 3];
        for axis in 0..3 {
            let v = Self::snap(ijk[axis]);
            if v < 0.0 || v > (extent[axis] as f64 - 1.0) || extent[axis] == 0 {
                return None;
            }
            p[axis] = v;
        }

        match interpolation {
            Interpolation::Nearest => Some(Self::nearest(volume, p)),
            Interpolation::Linear => Some(Self::trilinear_interpolate(volume, p)),
        }
    }

    #[inline]
    fn snap(v: f64) -> f64 {
        let rounded = v.round();
        if (v - rounded).abs() < GRID_SNAP {
            rounded
        } else {
            v
        }
    }

    #[inline]
    fn nearest(volume: &ArrayView3<f32>, p: [f64; 3]) -> f32 {
        let [i, j, k] = p.map(|v| v.round() as usize);
        volume[[k, j, i]]
    }

    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f32>, p: [f64; 3]) -> f32 {
        let (depth, height, width) = volume.dim();

        let x0 = p[0].floor() as usize;
        let y0 = p[1].floor() as usize;
        let z0 = p[2].floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = (p[0] - x0 as f64) as f32;
        let dy = (p[1] - y0 as f64) as f32;
        let dz = (p[2] - z0 as f64) as f32;

        // Exact grid points skip the blend so the stored value comes back
        // untouched.
        if dx == 0.0 && dy == 0.0 && dz == 0.0 {
            return volume[[z0, y0, x0]];
        }

        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;
        let one_minus_dz = 1.0 - dz;

        let lerp_row = |z: usize, y: usize| {
            volume[[z, y, x0]].mul_add(one_minus_dx, volume[[z, y, x1]] * dx)
        };

        let v0 = lerp_row(z0, y0).mul_add(one_minus_dy, lerp_row(z0, y1) * dy);
        let v1 = lerp_row(z1, y0).mul_add(one_minus_dy, lerp_row(z1, y1) * dy);

        v0.mul_add(one_minus_dz, v1 * dz)
    }
}
