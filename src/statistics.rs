//! Per-frame statistics of the intensity voxels under one label.
//!
//! The label value is chosen once per run: the highest value found in the
//! first label frame. Each frame is masked with `label == selected` and the
//! masked intensities are summarized. Frames whose mask is empty produce no
//! row.

use crate::{
    config::StatisticsConfig,
    error::{FrameError, ProcessorError, StatisticsError},
    frame::Frame,
    processor::{FrameInput, FrameOperation},
    sequence::{
        Correspondence, FrameStore, IndexValue, ResultSink, SequenceInput, check_correspondence,
    },
};

use ndarray::Zip;
use std::{fmt, fs, path::Path};
use tracing::debug;

pub const CC_PER_CUBIC_MM: f64 = 0.001;

pub const LABEL_STATISTICS_KEYS: [&str; 8] = [
    "Index",
    "Count",
    "Volume mm^3",
    "Volume cc",
    "Min",
    "Max",
    "Mean",
    "StdDev",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatValue {
    Int(i64),
    Float(f64),
}

impl StatValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            StatValue::Int(v) => v as f64,
            StatValue::Float(v) => v,
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Int(v) => write!(f, "{v}"),
            StatValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for StatValue {
    fn from(value: i64) -> Self {
        StatValue::Int(value)
    }
}

impl From<usize> for StatValue {
    fn from(value: usize) -> Self {
        StatValue::Int(value as i64)
    }
}

impl From<f64> for StatValue {
    fn from(value: f64) -> Self {
        StatValue::Float(value)
    }
}

/// Summary of the masked voxels of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStatistics {
    /// Ordinal of the frame in the driving sequence.
    pub index: usize,
    pub count: usize,
    pub volume_mm3: f64,
    pub volume_cc: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl LabelStatistics {
    /// Values in [`LABEL_STATISTICS_KEYS`] order.
    pub fn values(&self) -> [StatValue; 8] {
        [
            self.index.into(),
            self.count.into(),
            self.volume_mm3.into(),
            self.volume_cc.into(),
            self.min.into(),
            self.max.into(),
            self.mean.into(),
            self.std_dev.into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    label: usize,
    index_value: Option<IndexValue>,
    values: Vec<Option<StatValue>>,
}

/// Table of metrics keyed by (row label, metric name).
///
/// The metric names are fixed at construction. Rows keep the order in which
/// they were first written.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsTable {
    keys: Vec<String>,
    rows: Vec<Row>,
}

impl Default for StatisticsTable {
    fn default() -> Self {
        Self::label_statistics()
    }
}

impl StatisticsTable {
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn label_statistics() -> Self {
        Self::new(LABEL_STATISTICS_KEYS)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().map(|row| row.label)
    }

    fn column(&self, key: &str) -> Result<usize, StatisticsError> {
        self.keys
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| StatisticsError::UnknownKey(key.to_string()))
    }

    fn row_mut(&mut self, label: usize) -> &mut Row {
        let position = match self.rows.iter().position(|row| row.label == label) {
            Some(position) => position,
            None => {
                self.rows.push(Row {
                    label,
                    index_value: None,
                    values: vec![None; self.keys.len()],
                });
                self.rows.len() - 1
            }
        };
        &mut self.rows[position]
    }

    pub fn set(
        &mut self,
        label: usize,
        key: &str,
        value: impl Into<StatValue>,
    ) -> Result<(), StatisticsError> {
        let column = self.column(key)?;
        self.row_mut(label).values[column] = Some(value.into());
        Ok(())
    }

    pub fn get(&self, label: usize, key: &str) -> Option<StatValue> {
        let column = self.column(key).ok()?;
        self.rows
            .iter()
            .find(|row| row.label == label)
            .and_then(|row| row.values[column])
    }

    pub fn index_value(&self, label: usize) -> Option<&IndexValue> {
        self.rows
            .iter()
            .find(|row| row.label == label)
            .and_then(|row| row.index_value.as_ref())
    }

    pub fn record(&mut self, stats: &LabelStatistics, index_value: Option<IndexValue>) {
        let columns: Vec<_> = LABEL_STATISTICS_KEYS
            .iter()
            .map(|key| self.column(key).ok())
            .collect();
        let row = self.row_mut(stats.index);
        row.index_value = index_value;
        for (column, value) in columns.into_iter().zip(stats.values()) {
            if let Some(column) = column {
                row.values[column] = Some(value);
            }
        }
    }

    /// CSV text: a header of quoted metric names, then one line per row.
    pub fn to_csv(&self) -> String {
        let mut csv = self
            .keys
            .iter()
            .map(|key| format!("\"{key}\""))
            .collect::<Vec<_>>()
            .join(",");
        csv.push('\n');

        for row in &self.rows {
            let line = row
                .values
                .iter()
                .map(|value| value.map(|v| v.to_string()).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(",");
            csv.push_str(&line);
            csv.push('\n');
        }
        csv
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StatisticsError> {
        fs::write(path.as_ref(), self.to_csv())?;
        Ok(())
    }

    /// `(label + 1, value)` points of one metric for plotting. Label 0 is the
    /// background and is left out when `ignore_zero` is set.
    pub fn series(
        &self,
        key: &str,
        ignore_zero: bool,
    ) -> Result<Vec<(f64, f64)>, StatisticsError> {
        let column = self.column(key)?;
        Ok(self
            .rows
            .iter()
            .filter(|row| !(ignore_zero && row.label == 0))
            .filter_map(|row| {
                row.values[column].map(|value| ((row.label + 1) as f64, value.as_f64()))
            })
            .collect())
    }
}

impl ResultSink<LabelStatistics> for StatisticsTable {
    fn clear(&mut self) {
        self.rows.clear();
    }

    fn put(&mut self, item: LabelStatistics, index_value: IndexValue) {
        self.record(&item, Some(index_value));
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct Moments {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Moments {
    fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn add(mut self, value: f64) -> Self {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    /// Sample standard deviation, 0 for a single voxel.
    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0))
            .max(0.0)
            .sqrt()
    }
}

/// Masked intensity statistics of every frame against a label volume or a
/// label sequence.
#[derive(Debug)]
pub struct LabelStatisticsOperation<'a> {
    labels: SequenceInput<'a>,
    cc_per_cubic_mm: f64,
    selected_label: Option<f32>,
    cubic_mm_per_voxel: f64,
}

impl<'a> LabelStatisticsOperation<'a> {
    pub fn new(labels: SequenceInput<'a>) -> Self {
        Self {
            labels,
            cc_per_cubic_mm: CC_PER_CUBIC_MM,
            selected_label: None,
            cubic_mm_per_voxel: 1.0,
        }
    }

    pub fn with_cc_per_cubic_mm(mut self, factor: f64) -> Self {
        self.cc_per_cubic_mm = factor;
        self
    }

    pub fn with_config(self, config: &StatisticsConfig) -> Self {
        self.with_cc_per_cubic_mm(config.cc_per_cubic_mm)
    }

    /// Label value being measured, known once the run has started.
    pub fn selected_label(&self) -> Option<f32> {
        self.selected_label
    }

    fn measure(label: &Frame, intensity: &Frame, selected: f32) -> Moments {
        Zip::from(label.data()).and(intensity.data()).par_fold(
            Moments::empty,
            |acc, &l, &v| {
                if l == selected {
                    acc.add(v as f64)
                } else {
                    acc
                }
            },
            Moments::merge,
        )
    }
}

impl FrameOperation for LabelStatisticsOperation<'_> {
    type Output = LabelStatistics;
    type Carry = ();

    fn name(&self) -> &'static str {
        "label-statistics"
    }

    fn prepare(&mut self, driving: &dyn FrameStore) -> Result<(), ProcessorError> {
        if let Some(sequence) = self.labels.as_sequence() {
            check_correspondence("label sequence", driving, sequence, Correspondence::Exact)?;
        }
        let first = self
            .labels
            .first()
            .ok_or(ProcessorError::MissingConfiguration("label volume"))?;
        let (_, max) = first
            .scalar_range()
            .ok_or_else(|| ProcessorError::Geometry("label volume has no voxels".to_string()))?;

        // Labels are integral; a fractional maximum is truncated.
        let selected = max.trunc();
        self.selected_label = Some(selected);
        self.cubic_mm_per_voxel = first.geometry().voxel_volume();
        debug!(selected_label = selected, "label selected");
        Ok(())
    }

    fn apply(
        &mut self,
        input: &FrameInput<'_>,
        _prior: Option<&()>,
    ) -> Result<LabelStatistics, FrameError> {
        let selected = self
            .selected_label
            .ok_or(FrameError::MissingInput { what: "selected label" })?;
        let label = self
            .labels
            .resolve(input.index_value)
            .ok_or(FrameError::MissingInput { what: "label volume" })?;
        if label.dim() != input.frame.dim() {
            return Err(FrameError::GeometryMismatch {
                what: "label volume",
            });
        }

        let moments = Self::measure(label, input.frame, selected);
        if moments.count == 0 {
            return Err(FrameError::EmptyMask);
        }

        let volume_mm3 = moments.count as f64 * self.cubic_mm_per_voxel;
        Ok(LabelStatistics {
            index: input.ordinal,
            count: moments.count,
            volume_mm3,
            volume_cc: volume_mm3 * self.cc_per_cubic_mm,
            min: moments.min,
            max: moments.max,
            mean: moments.mean(),
            std_dev: moments.std_dev(),
        })
    }
}
