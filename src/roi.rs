//! Box-shaped regions of interest in physical space.

use crate::{
    error::ProcessorError,
    frame::{Frame, Geometry},
    transform::Affine,
};

use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in its own coordinate system, optionally placed in RAS
/// by `box_to_ras`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub center: [f64; 3],
    pub radius: [f64; 3],
    #[serde(default)]
    pub box_to_ras: Option<Affine>,
}

impl Roi {
    pub fn new(center: [f64; 3], radius: [f64; 3]) -> Self {
        Self {
            center,
            radius,
            box_to_ras: None,
        }
    }

    pub fn with_transform(mut self, box_to_ras: Affine) -> Self {
        self.box_to_ras = Some(box_to_ras);
        self
    }

    fn ras_to_box(&self) -> Result<Affine, ProcessorError> {
        match &self.box_to_ras {
            Some(box_to_ras) => box_to_ras
                .inverse()
                .ok_or_else(|| ProcessorError::Geometry("ROI transform is singular".to_string())),
            None => Ok(Affine::IDENTITY),
        }
    }

    fn contains_box_point(&self, p: [f64; 3]) -> bool {
        (0..3).all(|axis| (p[axis] - self.center[axis]).abs() <= self.radius[axis])
    }

    pub fn contains(&self, ras: [f64; 3]) -> Result<bool, ProcessorError> {
        Ok(self.contains_box_point(self.ras_to_box()?.apply(ras)))
    }

    /// The eight box corners in RAS.
    pub fn corners(&self) -> [[f64; 3]; 8] {
        let placement = self.box_to_ras.unwrap_or(Affine::IDENTITY);
        std::array::from_fn(|n| {
            let corner = std::array::from_fn(|axis| {
                let sign = if (n >> axis) & 1 == 1 { 1.0 } else { -1.0 };
                self.center[axis] + sign * self.radius[axis]
            });
            placement.apply(corner)
        })
    }

    /// Binary mask on the grid of `reference`: 1 inside the box, 0 outside.
    pub fn mask_for(&self, reference: &Frame) -> Result<Frame, ProcessorError> {
        let ijk_to_box = reference.geometry().ijk_to_ras.then(&self.ras_to_box()?);
        let mut mask = Array3::<f32>::zeros(reference.dim());
        Zip::indexed(&mut mask).par_for_each(|(k, j, i), voxel| {
            let p = ijk_to_box.apply([i as f64, j as f64, k as f64]);
            if self.contains_box_point(p) {
                *voxel = 1.0;
            }
        });
        Ok(Frame::new(mask, reference.geometry().clone()))
    }

    /// Inclusive voxel bounds `([i0, j0, k0], [i1, j1, k1])` of the grid
    /// points of `geometry`/`extent` that fall inside the box's bounding box,
    /// or `None` if there are none.
    pub fn voxel_bounds(
        &self,
        geometry: &Geometry,
        extent: [usize; 3],
    ) -> Result<Option<([usize; 3], [usize; 3])>, ProcessorError> {
        let ras_to_ijk = geometry
            .ras_to_ijk()
            .ok_or_else(|| ProcessorError::Geometry("frame geometry is singular".to_string()))?;

        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for corner in self.corners() {
            let ijk = ras_to_ijk.apply(corner);
            for axis in 0..3 {
                lo[axis] = lo[axis].min(ijk[axis]);
                hi[axis] = hi[axis].max(ijk[axis]);
            }
        }

        let mut first = [0usize; 3];
        let mut last = [0usize; 3];
        for axis in 0..3 {
            if extent[axis] == 0 {
                return Ok(None);
            }
            let start = (lo[axis] - 1e-6).ceil().max(0.0);
            let end = (hi[axis] + 1e-6).floor().min(extent[axis] as f64 - 1.0);
            if start > end {
                return Ok(None);
            }
            first[axis] = start as usize;
            last[axis] = end as usize;
        }
        Ok(Some((first, last)))
    }
}
