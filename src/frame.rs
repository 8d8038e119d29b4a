use crate::transform::Affine;

use ndarray::{Array3, ArrayView3, Zip};

/// Spatial placement of a voxel grid.
///
/// `spacing` and `origin` are given per (i, j, k) axis, `ijk_to_ras` maps
/// voxel coordinates to physical (RAS) millimetres.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    pub ijk_to_ras: Affine,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::axis_aligned([1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
    }
}

impl Geometry {
    pub fn axis_aligned(spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            spacing,
            origin,
            ijk_to_ras: Affine::from_spacing_origin(spacing, origin),
        }
    }

    /// Geometry with an arbitrary direction matrix; spacing and origin are
    /// read back from the columns of `ijk_to_ras`.
    pub fn from_ijk_to_ras(ijk_to_ras: Affine) -> Self {
        let m = &ijk_to_ras.matrix;
        let column_norm = |c: usize| (0..3).map(|r| m[r][c] * m[r][c]).sum::<f64>().sqrt();
        Self {
            spacing: [column_norm(0), column_norm(1), column_norm(2)],
            origin: [m[0][3], m[1][3], m[2][3]],
            ijk_to_ras,
        }
    }

    pub fn ras_to_ijk(&self) -> Option<Affine> {
        self.ijk_to_ras.inverse()
    }

    /// Physical volume of one voxel, in cubic spacing units.
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.iter().product()
    }
}

/// One volumetric sample of a sequence.
///
/// Voxel data is stored as (depth, height, width), i.e. indexed `[k, j, i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    data: Array3<f32>,
    geometry: Geometry,
}

impl Frame {
    pub fn new(data: Array3<f32>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// Frame on an axis-aligned grid.
    pub fn with_spacing(data: Array3<f32>, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self::new(data, Geometry::axis_aligned(spacing, origin))
    }

    /// Get the dimensions of the frame (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Grid extent per (i, j, k) axis.
    pub fn extent(&self) -> [usize; 3] {
        let (depth, height, width) = self.data.dim();
        [width, height, depth]
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.geometry.spacing
    }

    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    /// Minimum and maximum voxel value, `None` for an empty grid.
    pub fn scalar_range(&self) -> Option<(f32, f32)> {
        if self.data.is_empty() {
            return None;
        }
        let range = Zip::from(&self.data).par_fold(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |(lo, hi), &v| (lo.min(v), hi.max(v)),
            |a, b| (a.0.min(b.0), a.1.max(b.1)),
        );
        Some(range)
    }

    pub fn same_grid(&self, other: &Frame) -> bool {
        self.dim() == other.dim() && self.geometry == other.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    #[test]
    fn test_extent_is_ijk_order() {
        let frame = Frame::with_spacing(Array3::zeros((4, 3, 2)), [1.0; 3], [0.0; 3]);
        assert_eq!(frame.extent(), [2, 3, 4]);
        assert_eq!(frame.voxel_count(), 24);
    }

    #[test]
    fn test_voxel_volume() {
        let geometry = Geometry::axis_aligned([2.0, 2.0, 2.0], [0.0; 3]);
        assert_eq!(geometry.voxel_volume(), 8.0);
    }

    #[test]
    fn test_scalar_range() {
        let mut data = Array3::zeros((2, 2, 2));
        data[[0, 1, 0]] = -4.0;
        data[[1, 1, 1]] = 3.0;
        let frame = Frame::with_spacing(data, [1.0; 3], [0.0; 3]);
        assert_eq!(frame.scalar_range(), Some((-4.0, 3.0)));
    }

    #[test]
    fn test_scalar_range_of_strided_data() {
        let mut data = Array3::<f32>::zeros((4, 4, 8));
        data[[2, 1, 6]] = 3.0;
        data[[3, 3, 7]] = 9.0;
        let strided = data.slice_move(s![.., .., ..;2]);
        assert!(!strided.is_standard_layout());

        let frame = Frame::with_spacing(strided, [1.0; 3], [0.0; 3]);
        assert_eq!(frame.scalar_range(), Some((0.0, 3.0)));
    }

    #[test]
    fn test_geometry_from_direction_matrix() {
        let ijk_to_ras = Affine::from_matrix([
            [-0.5, 0.0, 0.0, 10.0],
            [0.0, -0.5, 0.0, 20.0],
            [0.0, 0.0, 3.0, -5.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let geometry = Geometry::from_ijk_to_ras(ijk_to_ras);
        assert_eq!(geometry.spacing, [0.5, 0.5, 3.0]);
        assert_eq!(geometry.origin, [10.0, 20.0, -5.0]);
    }
}
