//! Resampling of an input volume onto the grid of each reference frame.
//!
//! For every reference frame the mapping
//! `input IJK -> input RAS -> (transform) -> reference RAS -> reference IJK`
//! is built and inverted, and each reference voxel pulls its value from the
//! input through that inverse. Voxels that map outside the input get the
//! background value. The output takes over the reference geometry.

use crate::{
    config::ResampleConfig,
    enums::Interpolation,
    error::{FrameError, ProcessorError},
    frame::Frame,
    interpolator::Interpolator,
    processor::{FrameInput, FrameOperation},
    sequence::{Correspondence, FrameStore, SequenceInput, check_correspondence},
    transform::Affine,
};

use ndarray::{Array3, Zip};

#[derive(Debug)]
pub struct ResampleOperation<'a> {
    input: SequenceInput<'a>,
    transforms: SequenceInput<'a, Affine>,
    interpolation: Interpolation,
    background: f32,
}

impl<'a> ResampleOperation<'a> {
    /// `transforms` map input physical space to reference physical space.
    pub fn new(input: SequenceInput<'a>, transforms: SequenceInput<'a, Affine>) -> Self {
        Self {
            input,
            transforms,
            interpolation: Interpolation::default(),
            background: 0.0,
        }
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_background(mut self, background: f32) -> Self {
        self.background = background;
        self
    }

    pub fn with_config(self, config: &ResampleConfig) -> Self {
        self.with_interpolation(config.interpolation)
            .with_background(config.background)
    }

    /// Mapping from reference voxel coordinates to input voxel coordinates.
    pub fn reference_to_input_ijk(
        input: &Frame,
        reference: &Frame,
        transform: &Affine,
    ) -> Result<Affine, FrameError> {
        let reference_ras_to_ijk = reference
            .geometry()
            .ras_to_ijk()
            .ok_or(FrameError::SingularTransform)?;
        input
            .geometry()
            .ijk_to_ras
            .then(transform)
            .then(&reference_ras_to_ijk)
            .inverse()
            .ok_or(FrameError::SingularTransform)
    }

    pub fn resample(
        &self,
        input: &Frame,
        reference: &Frame,
        transform: &Affine,
    ) -> Result<Frame, FrameError> {
        let reference_to_input = Self::reference_to_input_ijk(input, reference, transform)?;
        let source = input.view();
        let interpolation = self.interpolation;
        let background = self.background;

        let mut output = Array3::<f32>::zeros(reference.dim());
        Zip::indexed(&mut output).par_for_each(|(k, j, i), voxel| {
            let ijk = reference_to_input.apply([i as f64, j as f64, k as f64]);
            *voxel = Interpolator::sample(&source, ijk, interpolation).unwrap_or(background);
        });

        Ok(Frame::new(output, reference.geometry().clone()))
    }
}

impl FrameOperation for ResampleOperation<'_> {
    type Output = Frame;
    type Carry = ();

    fn name(&self) -> &'static str {
        "resample"
    }

    fn prepare(&mut self, driving: &dyn FrameStore) -> Result<(), ProcessorError> {
        if let Some(transforms) = self.transforms.as_sequence() {
            check_correspondence(
                "transform sequence",
                driving,
                transforms,
                Correspondence::Subset,
            )?;
        }
        if let Some(input) = self.input.as_sequence() {
            check_correspondence("input sequence", driving, input, Correspondence::Subset)?;
        }
        Ok(())
    }

    fn apply(
        &mut self,
        input: &FrameInput<'_>,
        _prior: Option<&()>,
    ) -> Result<Frame, FrameError> {
        let transform = self
            .transforms
            .resolve(input.index_value)
            .ok_or(FrameError::MissingInput { what: "transform" })?;
        let source = self
            .input
            .resolve(input.index_value)
            .ok_or(FrameError::MissingInput {
                what: "input volume",
            })?;
        self.resample(source, input.frame, transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Geometry;

    fn ramp(spacing: [f64; 3], origin: [f64; 3]) -> Frame {
        let data = Array3::from_shape_fn((3, 4, 5), |(k, j, i)| (i + 10 * j + 100 * k) as f32);
        Frame::with_spacing(data, spacing, origin)
    }

    #[test]
    fn test_identity_is_bit_identical() {
        let frame = ramp([0.7, 1.3, 2.9], [-12.1, 3.3, 40.0]);
        for interpolation in [Interpolation::Nearest, Interpolation::Linear] {
            let operation = ResampleOperation::new(
                SequenceInput::SingleFrame(&frame),
                SequenceInput::SingleFrame(&Affine::IDENTITY),
            )
            .with_interpolation(interpolation);
            let output = operation
                .resample(&frame, &frame, &Affine::IDENTITY)
                .expect("identity resample");
            assert_eq!(output.data(), frame.data());
            assert_eq!(output.geometry(), frame.geometry());
        }
    }

    #[test]
    fn test_translation_shifts_voxels() {
        let input = ramp([1.0; 3], [0.0; 3]);
        let reference = ramp([1.0; 3], [0.0; 3]);
        // Input content moves +1 mm along i in reference space.
        let shift = Affine::from_translation([1.0, 0.0, 0.0]);
        let operation = ResampleOperation::new(
            SequenceInput::SingleFrame(&input),
            SequenceInput::SingleFrame(&shift),
        )
        .with_background(-1.0);
        let output = operation
            .resample(&input, &reference, &shift)
            .expect("resample");

        assert_eq!(output.data()[[0, 0, 0]], -1.0);
        assert_eq!(output.data()[[1, 2, 3]], input.data()[[1, 2, 2]]);
    }

    #[test]
    fn test_output_takes_reference_geometry() {
        let input = ramp([1.0; 3], [0.0; 3]);
        let reference = Frame::new(
            Array3::zeros((2, 2, 2)),
            Geometry::axis_aligned([2.0; 3], [0.0; 3]),
        );
        let operation = ResampleOperation::new(
            SequenceInput::SingleFrame(&input),
            SequenceInput::SingleFrame(&Affine::IDENTITY),
        );
        let output = operation
            .resample(&input, &reference, &Affine::IDENTITY)
            .expect("resample");

        assert_eq!(output.dim(), (2, 2, 2));
        assert_eq!(output.geometry(), reference.geometry());
        // reference voxel (1,1,1) sits at 2 mm, input voxel (2,2,2)
        assert_eq!(output.data()[[1, 1, 1]], input.data()[[2, 2, 2]]);
    }

    #[test]
    fn test_singular_transform_is_frame_error() {
        let frame = ramp([1.0; 3], [0.0; 3]);
        let flat = Affine::from_scale([1.0, 0.0, 1.0]);
        let operation = ResampleOperation::new(
            SequenceInput::SingleFrame(&frame),
            SequenceInput::SingleFrame(&flat),
        );
        assert_eq!(
            operation.resample(&frame, &frame, &flat).unwrap_err(),
            FrameError::SingularTransform
        );
    }
}
