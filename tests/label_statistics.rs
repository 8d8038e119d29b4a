use ndarray::{Array3, s};
use volume_sequence::{
    Frame, FrameError, IndexMetadata, IndexValue, LabelStatisticsOperation, ProcessorError,
    Sequence, SequenceInput, SequenceProcessor, StatisticsTable,
};

fn frame(data: Array3<f32>, spacing: f64) -> Frame {
    Frame::with_spacing(data, [spacing; 3], [0.0; 3])
}

/// 4x4x4 label volume with `count` voxels set to `label` (in memory order).
fn label_volume(label: f32, count: usize) -> Frame {
    let mut data = Array3::<f32>::zeros((4, 4, 4));
    for voxel in data.iter_mut().take(count) {
        *voxel = label;
    }
    frame(data, 2.0)
}

fn intensity_sequence(frames: usize) -> Sequence {
    Sequence::from_entries(
        IndexMetadata::default(),
        (0..frames).map(|n| {
            let data = Array3::from_shape_fn((4, 4, 4), |(k, j, i)| {
                (n * 100 + k * 16 + j * 4 + i) as f32
            });
            (IndexValue::from(n as f64 * 1.5), frame(data, 2.0))
        }),
    )
}

#[test]
fn test_count_and_volume_for_label_three() {
    let intensity = Sequence::from_entries(
        IndexMetadata::default(),
        [(IndexValue::from(0.0), frame(Array3::from_elem((4, 4, 4), 7.0), 2.0))],
    );
    let label = label_volume(3.0, 10);

    let mut operation = LabelStatisticsOperation::new(SequenceInput::SingleFrame(&label));
    let mut table = StatisticsTable::label_statistics();
    let report = SequenceProcessor::new()
        .run(&intensity, &mut operation, &mut table)
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(operation.selected_label(), Some(3.0));
    assert_eq!(table.get(0, "Count").unwrap().as_f64(), 10.0);
    assert_eq!(table.get(0, "Volume mm^3").unwrap().as_f64(), 80.0);
    assert!((table.get(0, "Volume cc").unwrap().as_f64() - 0.08).abs() < 1e-12);
    assert_eq!(table.get(0, "Min").unwrap().as_f64(), 7.0);
    assert_eq!(table.get(0, "Max").unwrap().as_f64(), 7.0);
    assert_eq!(table.get(0, "Mean").unwrap().as_f64(), 7.0);
    assert_eq!(table.get(0, "StdDev").unwrap().as_f64(), 0.0);
}

#[test]
fn test_empty_mask_frame_is_skipped() {
    let intensity = intensity_sequence(5);
    let labels = Sequence::from_entries(
        IndexMetadata::default(),
        (0..5).map(|n| {
            let count = if n == 2 { 0 } else { 6 };
            (IndexValue::from(n as f64 * 1.5), label_volume(1.0, count))
        }),
    );

    let mut operation = LabelStatisticsOperation::new(SequenceInput::Sequence(&labels));
    let mut table = StatisticsTable::label_statistics();
    let report = SequenceProcessor::new()
        .run(&intensity, &mut operation, &mut table)
        .unwrap();

    assert_eq!(report.to_string(), "completed with 4/5 frames processed");
    assert_eq!(table.len(), 4);
    assert_eq!(table.labels().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].ordinal, 2);
    assert_eq!(report.diagnostics[0].reason, FrameError::EmptyMask);
    assert_eq!(table.index_value(3), Some(&IndexValue::from(4.5)));
}

#[test]
fn test_label_sequence_length_mismatch_aborts() {
    let intensity = intensity_sequence(5);
    let labels = Sequence::from_entries(
        IndexMetadata::default(),
        (0..4).map(|n| (IndexValue::from(n as f64 * 1.5), label_volume(1.0, 3))),
    );

    let mut table = StatisticsTable::label_statistics();
    table.set(9, "Count", 1usize).unwrap();
    let mut operation = LabelStatisticsOperation::new(SequenceInput::Sequence(&labels));
    let err = SequenceProcessor::new()
        .run(&intensity, &mut operation, &mut table)
        .unwrap_err();

    assert!(matches!(
        err,
        ProcessorError::LengthMismatch {
            expected: 5,
            found: 4,
            ..
        }
    ));
    assert_eq!(table.len(), 1);
}

#[test]
fn test_label_sequence_index_mismatch_aborts() {
    let intensity = intensity_sequence(3);
    let labels = Sequence::from_entries(
        IndexMetadata::default(),
        (0..3).map(|n| (IndexValue::from(n as f64 * 2.0), label_volume(1.0, 3))),
    );

    let mut operation = LabelStatisticsOperation::new(SequenceInput::Sequence(&labels));
    let err = SequenceProcessor::new()
        .run(&intensity, &mut operation, &mut StatisticsTable::label_statistics())
        .unwrap_err();

    assert_eq!(
        err,
        ProcessorError::IndexMismatch {
            what: "label sequence",
            index_value: IndexValue::from(1.5),
        }
    );
}

#[test]
fn test_sample_standard_deviation() {
    let data = Array3::from_shape_fn((1, 1, 4), |(_, _, i)| [2.0, 4.0, 4.0, 6.0][i]);
    let intensity = Sequence::from_entries(
        IndexMetadata::default(),
        [(IndexValue::from(0.0), frame(data, 1.0))],
    );
    let label = frame(Array3::from_elem((1, 1, 4), 1.0), 1.0);

    let mut operation = LabelStatisticsOperation::new(SequenceInput::SingleFrame(&label));
    let mut table = StatisticsTable::label_statistics();
    SequenceProcessor::new()
        .run(&intensity, &mut operation, &mut table)
        .unwrap();

    assert_eq!(table.get(0, "Mean").unwrap().as_f64(), 4.0);
    let std_dev = table.get(0, "StdDev").unwrap().as_f64();
    assert!((std_dev - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
}

#[test]
fn test_saved_csv() {
    let intensity = intensity_sequence(2);
    let label = label_volume(5.0, 2);
    let mut operation = LabelStatisticsOperation::new(SequenceInput::SingleFrame(&label));
    let mut table = StatisticsTable::label_statistics();
    SequenceProcessor::new()
        .run(&intensity, &mut operation, &mut table)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("statistics.csv");
    table.save(&path).unwrap();
    let csv = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = csv.lines().collect();

    assert_eq!(
        lines[0],
        "\"Index\",\"Count\",\"Volume mm^3\",\"Volume cc\",\"Min\",\"Max\",\"Mean\",\"StdDev\""
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("0,2,16,"));
    assert!(lines[2].starts_with("1,2,16,"));
    assert!(csv.ends_with('\n'));
    assert!(!lines[1].ends_with(','));
}

#[test]
fn test_rerun_clears_previous_rows() {
    let label = label_volume(1.0, 4);
    let mut table = StatisticsTable::label_statistics();

    for frames in [3, 2] {
        let intensity = intensity_sequence(frames);
        let mut operation = LabelStatisticsOperation::new(SequenceInput::SingleFrame(&label));
        SequenceProcessor::new()
            .run(&intensity, &mut operation, &mut table)
            .unwrap();
    }

    assert_eq!(table.len(), 2);
}

#[test]
fn test_strided_label_volume_is_measured() {
    let mut wide = Array3::<f32>::zeros((4, 4, 8));
    wide[[1, 2, 4]] = 3.0;
    let label = frame(wide.slice_move(s![.., .., ..;2]), 2.0);
    let intensity = Sequence::from_entries(
        IndexMetadata::default(),
        [(IndexValue::from(0.0), frame(Array3::from_elem((4, 4, 4), 5.0), 2.0))],
    );

    let mut operation = LabelStatisticsOperation::new(SequenceInput::SingleFrame(&label));
    let mut table = StatisticsTable::label_statistics();
    let report = SequenceProcessor::new()
        .run(&intensity, &mut operation, &mut table)
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(operation.selected_label(), Some(3.0));
    assert_eq!(table.get(0, "Count").unwrap().as_f64(), 1.0);
}
