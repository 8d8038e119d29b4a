use crate::{
    error::{FrameError, ProcessorError},
    frame::{Frame, Geometry},
    processor::{FrameInput, FrameOperation, RunReport, SequenceProcessor},
    roi::Roi,
    sequence::{FrameStore, Sequence},
    transform::Affine,
};

use ndarray::s;

/// Crops every frame to the voxels inside a region of interest.
#[derive(Debug, Clone)]
pub struct CropOperation {
    roi: Roi,
}

impl CropOperation {
    pub fn new(roi: Roi) -> Self {
        Self { roi }
    }

    pub fn crop(&self, frame: &Frame) -> Result<Frame, FrameError> {
        let bounds = self
            .roi
            .voxel_bounds(frame.geometry(), frame.extent())
            .map_err(|_| FrameError::SingularTransform)?;
        let Some((first, last)) = bounds else {
            return Err(FrameError::OutsideRoi);
        };

        let data = frame
            .data()
            .slice(s![
                first[2]..=last[2],
                first[1]..=last[1],
                first[0]..=last[0]
            ])
            .to_owned();

        let shift = Affine::from_translation(first.map(|v| v as f64));
        let ijk_to_ras = shift.then(&frame.geometry().ijk_to_ras);
        let geometry = Geometry {
            spacing: frame.spacing(),
            origin: [
                ijk_to_ras.matrix[0][3],
                ijk_to_ras.matrix[1][3],
                ijk_to_ras.matrix[2][3],
            ],
            ijk_to_ras,
        };
        Ok(Frame::new(data, geometry))
    }

    /// Crops the frames of `sequence` where they stand. Frames the ROI misses
    /// are left untouched and show up in the report's diagnostics.
    pub fn crop_in_place(
        &mut self,
        processor: &SequenceProcessor,
        sequence: &mut Sequence,
    ) -> Result<RunReport, ProcessorError> {
        let mut cropped = Sequence::with_index(sequence.index().clone());
        let report = processor.run(&*sequence, self, &mut cropped)?;
        for (index_value, frame) in cropped.into_entries() {
            sequence.put(frame, index_value);
        }
        Ok(report)
    }
}

impl FrameOperation for CropOperation {
    type Output = Frame;
    type Carry = ();

    fn name(&self) -> &'static str {
        "crop"
    }

    fn prepare(&mut self, _driving: &dyn FrameStore) -> Result<(), ProcessorError> {
        if self.roi.radius.iter().any(|r| *r < 0.0) {
            return Err(ProcessorError::Geometry(
                "ROI radius must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(
        &mut self,
        input: &FrameInput<'_>,
        _prior: Option<&()>,
    ) -> Result<Frame, FrameError> {
        self.crop(input.frame)
    }
}
