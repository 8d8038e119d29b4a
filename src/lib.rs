//! # Volume-sequence library
//!
//! This crate applies per-frame operations to sequences of volumes, such as
//! a time series of DICOM series acquired during a dynamic study.
//!
//! A [`Sequence`] holds frames keyed by index values (usually a time stamp).
//! The [`SequenceProcessor`] walks a driving sequence in order, hands every
//! frame to a [`FrameOperation`] and collects the results in a
//! [`ResultSink`] under the driving frame's index value. A frame that cannot
//! be processed (empty mask, failed registration, no overlap with a region
//! of interest) is reported and skipped, the run goes on with the next one.
//! Inputs that do not line up with the driving sequence abort the run
//! before the first frame.
//!
//! Available operations:
//!  - Label statistics: count, volume, min, max, mean and standard deviation
//!    of the intensity voxels under a label, exported as CSV
//!  - Resampling of an input volume onto every reference frame through a
//!    per-frame transform
//!  - Registration of every frame to a fixed frame through an external
//!    registration service, optionally chaining transforms from frame to
//!    frame
//!  - Cropping of every frame to a box-shaped region of interest
//!
//!  Secondary inputs can be a single frame used for every index value or
//!  another sequence looked up by index value (see [`SequenceInput`]).
//!  Long runs can be stopped between frames through a
//!  [`CancellationToken`].
//!
//! # Examples
//!
//! ## Label statistics of a DICOM time series
//!
//! Load one frame per subdirectory of `dicom/`, measure the voxels under the
//! highest label of `label/` in every frame and save the table as CSV.
//!
//! ```no_run
//! # use volume_sequence::{
//! #     FrameLoader, IndexSource, LabelStatisticsOperation, SequenceInput, SequenceProcessor,
//! #     SortBy, StatisticsTable,
//! # };
//! let intensity = FrameLoader::load_sequence_from_directories(
//!     "dicom",
//!     SortBy::ImagePositionPatient,
//!     IndexSource::TriggerTime,
//! )
//! .expect("should have loaded the sequence");
//! let label = FrameLoader::load_from_directory("label", SortBy::ImagePositionPatient)
//!     .expect("should have loaded the label volume");
//!
//! let mut operation = LabelStatisticsOperation::new(SequenceInput::SingleFrame(&label));
//! let mut table = StatisticsTable::label_statistics();
//! let report = SequenceProcessor::new()
//!     .run(&intensity, &mut operation, &mut table)
//!     .expect("inputs should line up");
//! println!("{report}");
//! table.save("statistics.csv").expect("should have written the table");
//! ```

pub mod config;
pub mod crop;
pub mod enums;
pub mod error;
pub mod frame;
mod interpolator;
pub mod loader;
pub mod logging;
pub mod processor;
pub mod registration;
pub mod resample;
pub mod roi;
pub mod sequence;
pub mod statistics;
pub mod transform;

pub use crop::CropOperation;
pub use enums::{IndexSource, IndexType, InitializeMode, Interpolation, SortBy};
pub use error::{FrameError, ProcessorError, ServiceError, StatisticsError};
pub use frame::{Frame, Geometry};
pub use loader::{FrameLoader, LoaderError};
pub use processor::{
    CancellationToken, FrameDiagnostic, FrameInput, FrameOperation, RunReport, RunStatus,
    SequenceProcessor,
};
pub use registration::{
    MaskProcessing, PollPolicy, RegistrationOperation, RegistrationOutput, RegistrationParameters,
    RegistrationRequest, RegistrationService, RegistrationSink, ServiceStatus, invert_transforms,
};
pub use resample::ResampleOperation;
pub use roi::Roi;
pub use sequence::{FrameStore, IndexMetadata, IndexValue, ResultSink, Sequence, SequenceInput};
pub use statistics::{LabelStatistics, LabelStatisticsOperation, StatisticsTable};
pub use transform::Affine;
