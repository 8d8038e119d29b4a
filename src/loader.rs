use crate::{
    enums::{IndexSource, SortBy},
    frame::Frame,
    sequence::{IndexMetadata, IndexValue, Sequence},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("No series directories found in {0}")]
    NoSeriesDirectories(PathBuf),

    #[error("Index value {index_value} of {} is already taken by another series", directory.display())]
    DuplicateIndexValue {
        directory: PathBuf,
        index_value: IndexValue,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

type DicomFile = FileDicomObject<InMemDicomObject>;

struct Slice {
    order: Option<f64>,
    position: Option<[f64; 3]>,
    image: Array2<f32>,
}

pub struct FrameLoader;

impl FrameLoader {
    /// Load a frame from DICOM objects of one series.
    ///
    /// Slices are sorted by `sort_by` and stacked along k. Pixel values are
    /// the modality values (rescale applied, no VOI windowing). The origin is
    /// the Image Position (Patient) of the first stacked slice.
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found, dimensions are inconsistent
    /// or no object carries spacing information
    pub fn load_from_dicom_objects(
        dicom_objects: &[DicomFile],
        sort_by: SortBy,
    ) -> Result<Frame, LoaderError> {
        let mut slices: Vec<_> = dicom_objects
            .par_iter()
            .filter_map(|dicom_object| Self::extract_slice(dicom_object, sort_by))
            .collect();

        if slices.is_empty() {
            return Err(LoaderError::NoValidImages);
        }

        Self::sort_slices(&mut slices, sort_by);
        Self::validate_dimensions(&slices)?;

        let spacing = Self::get_spacing(dicom_objects).ok_or(LoaderError::MissingSpacing)?;
        let origin = slices[0].position.unwrap_or([0.0; 3]);
        let data = Self::build_volume_array(&slices);

        Ok(Frame::with_spacing(data, spacing, origin))
    }

    /// Load a frame from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<Frame, LoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a frame from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Frame, LoaderError> {
        let paths = Self::dicom_paths(path.as_ref())?;
        if paths.is_empty() {
            return Err(LoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    /// Load a sequence from a root directory whose subdirectories each hold
    /// one series. Subdirectories are visited in name order; the index value
    /// of each frame comes from `index_source`.
    pub fn load_sequence_from_directories(
        root: impl AsRef<Path>,
        sort_by: SortBy,
        index_source: IndexSource,
    ) -> Result<Sequence, LoaderError> {
        let root = root.as_ref();
        let mut directories: Vec<_> = fs::read_dir(root)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        directories.sort();

        if directories.is_empty() {
            return Err(LoaderError::NoSeriesDirectories(root.to_path_buf()));
        }

        let mut sequence = Sequence::with_index(Self::index_metadata(index_source));
        for (ordinal, directory) in directories.iter().enumerate() {
            let paths = Self::dicom_paths(directory)?;
            let objects: Result<Vec<_>, _> = paths.iter().map(open_file).collect();
            let objects = objects?;

            let index_value = Self::index_value(&objects, ordinal, index_source);
            let frame = Self::load_from_dicom_objects(&objects, sort_by)?;
            debug!(
                directory = %directory.display(),
                index_value = %index_value,
                dim = ?frame.dim(),
                "loaded frame"
            );
            Self::insert_frame(&mut sequence, frame, index_value, directory)?;
        }

        info!(frames = sequence.len(), root = %root.display(), "loaded sequence");
        Ok(sequence)
    }

    /// Two series resolving to the same index value would silently replace
    /// each other, so that is an error.
    fn insert_frame(
        sequence: &mut Sequence,
        frame: Frame,
        index_value: IndexValue,
        directory: &Path,
    ) -> Result<(), LoaderError> {
        if sequence.position(&index_value).is_some() {
            return Err(LoaderError::DuplicateIndexValue {
                directory: directory.to_path_buf(),
                index_value,
            });
        }
        sequence.put(frame, index_value);
        Ok(())
    }

    fn dicom_paths(directory: &Path) -> Result<Vec<PathBuf>, LoaderError> {
        let mut paths: Vec<_> = fs::read_dir(directory)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn index_metadata(index_source: IndexSource) -> IndexMetadata {
        match index_source {
            IndexSource::Ordinal => IndexMetadata {
                name: "frame".to_string(),
                unit: String::new(),
                ..IndexMetadata::default()
            },
            IndexSource::TriggerTime => IndexMetadata {
                name: "trigger time".to_string(),
                unit: "ms".to_string(),
                ..IndexMetadata::default()
            },
            IndexSource::TemporalPosition => IndexMetadata {
                name: "temporal position".to_string(),
                unit: String::new(),
                ..IndexMetadata::default()
            },
        }
    }

    /// Falls back to the ordinal when no object carries the attribute.
    fn index_value(
        objects: &[DicomFile],
        ordinal: usize,
        index_source: IndexSource,
    ) -> IndexValue {
        let value = match index_source {
            IndexSource::Ordinal => None,
            IndexSource::TriggerTime => objects.iter().find_map(|dicom_object| {
                dicom_object
                    .element(tags::TRIGGER_TIME)
                    .ok()?
                    .to_float64()
                    .ok()
            }),
            IndexSource::TemporalPosition => objects.iter().find_map(|dicom_object| {
                dicom_object
                    .element(tags::TEMPORAL_POSITION_IDENTIFIER)
                    .ok()?
                    .to_int::<i64>()
                    .ok()
                    .map(|n| n as f64)
            }),
        };
        value.map_or_else(|| IndexValue::from(ordinal), IndexValue::from)
    }

    fn extract_slice(dicom_object: &DicomFile, sort_by: SortBy) -> Option<Slice> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let image = Self::decode_image(dicom_object)?;
        let position = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()
            .and_then(|element| element.to_multi_float64().ok())
            .filter(|pos| pos.len() == 3)
            .map(|pos| [pos[0], pos[1], pos[2]]);
        Some(Slice {
            order,
            position,
            image,
        })
    }

    fn get_sort_order(dicom_object: &DicomFile, sort_by: SortBy) -> Option<Option<f64>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float64()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float64()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(f64::from);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn decode_image(dicom_object: &DicomFile) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    /// Ascending order, so k grows with the sort key.
    fn sort_slices(slices: &mut [Slice], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    fn validate_dimensions(slices: &[Slice]) -> Result<(), LoaderError> {
        let first_dim = slices[0].image.dim();
        if slices.iter().any(|slice| slice.image.dim() != first_dim) {
            return Err(LoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[Slice]) -> Array3<f32> {
        let (height, width) = slices[0].image.dim();
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (k, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![k, .., ..]).assign(&slice.image);
        }

        volume
    }

    /// Pixel Spacing is (row, column), i.e. (y, x).
    fn get_spacing(dicom_objects: &[DicomFile]) -> Option<[f64; 3]> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float64()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float64()
                .ok()?;

            Some([
                *pixel_spacing.get(1)?,
                *pixel_spacing.first()?,
                slice_thickness,
            ])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_directory_has_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let result = FrameLoader::load_from_directory(dir.path(), SortBy::InstanceNumber);
        assert!(matches!(result, Err(LoaderError::NoValidImages)));
    }

    #[test]
    fn test_sequence_root_without_series_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a series").unwrap();
        let result = FrameLoader::load_sequence_from_directories(
            dir.path(),
            SortBy::ImagePositionPatient,
            IndexSource::Ordinal,
        );
        assert!(matches!(result, Err(LoaderError::NoSeriesDirectories(_))));
    }

    #[test]
    fn test_series_directory_without_dicom_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("0001")).unwrap();
        let result = FrameLoader::load_sequence_from_directories(
            dir.path(),
            SortBy::ImagePositionPatient,
            IndexSource::TriggerTime,
        );
        assert!(matches!(result, Err(LoaderError::NoValidImages)));
    }

    #[test]
    fn test_ordinal_index_without_objects() {
        assert_eq!(
            FrameLoader::index_value(&[], 3, IndexSource::TriggerTime),
            IndexValue::from(3usize)
        );
    }

    #[test]
    fn test_duplicate_index_value_is_rejected() {
        let mut sequence =
            Sequence::with_index(FrameLoader::index_metadata(IndexSource::TriggerTime));
        let frame = || Frame::with_spacing(Array3::zeros((1, 1, 1)), [1.0; 3], [0.0; 3]);

        FrameLoader::insert_frame(&mut sequence, frame(), IndexValue::from(40.0), Path::new("a"))
            .unwrap();
        let err = FrameLoader::insert_frame(
            &mut sequence,
            frame(),
            IndexValue::from(40.0005),
            Path::new("b"),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            LoaderError::DuplicateIndexValue { ref directory, ref index_value }
                if directory == Path::new("b") && index_value.as_str() == "40.0005"
        ));
        assert_eq!(sequence.len(), 1);

        FrameLoader::insert_frame(&mut sequence, frame(), IndexValue::from(80.0), Path::new("c"))
            .unwrap();
        assert_eq!(sequence.len(), 2);
    }

    #[test]
    fn test_sort_slices_ascending() {
        let slice = |order: f64| Slice {
            order: Some(order),
            position: Some([0.0, 0.0, order]),
            image: Array2::zeros((2, 2)),
        };
        let mut slices = vec![slice(3.0), slice(-1.0), slice(1.0)];
        FrameLoader::sort_slices(&mut slices, SortBy::ImagePositionPatient);
        let orders: Vec<_> = slices.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![Some(-1.0), Some(1.0), Some(3.0)]);
    }
}
