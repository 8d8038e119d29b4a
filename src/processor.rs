//! The per-frame processing loop.
//!
//! [`SequenceProcessor`] walks a driving sequence in ordinal order, hands
//! each frame to a [`FrameOperation`] and writes successful results into a
//! [`ResultSink`] under the driving index value. Failures of a single frame
//! are recorded as [`FrameDiagnostic`]s and the loop moves on; structural
//! problems are returned as [`ProcessorError`] before the first frame.

use crate::{
    error::{FrameError, ProcessorError},
    frame::Frame,
    sequence::{FrameStore, IndexValue, ResultSink},
};

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, info, warn};
use web_time::{Duration, Instant};

/// The frame handed to an operation for one iteration.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub ordinal: usize,
    pub index_value: &'a IndexValue,
    pub frame: &'a Frame,
}

pub trait FrameOperation {
    type Output;
    /// State handed from one successful iteration to the next.
    type Carry;

    fn name(&self) -> &'static str;

    /// Validates secondary inputs against the driving sequence. Runs once,
    /// before any frame is processed.
    fn prepare(&mut self, _driving: &dyn FrameStore) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// `prior` is the carry of the immediately preceding iteration, `None`
    /// when that iteration failed or this is the first frame.
    fn apply(
        &mut self,
        input: &FrameInput<'_>,
        prior: Option<&Self::Carry>,
    ) -> Result<Self::Output, FrameError>;

    fn carry(&self, _output: &Self::Output) -> Option<Self::Carry> {
        None
    }
}

/// Cooperative cancellation, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Why a frame produced no output.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDiagnostic {
    pub ordinal: usize,
    pub index_value: Option<IndexValue>,
    pub reason: FrameError,
}

impl fmt::Display for FrameDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index_value {
            Some(index_value) => write!(
                f,
                "frame {} (index value {}): {}",
                self.ordinal, index_value, self.reason
            ),
            None => write!(f, "frame {}: {}", self.ordinal, self.reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub operation: &'static str,
    pub status: RunStatus,
    pub total: usize,
    pub processed: usize,
    pub diagnostics: Vec<FrameDiagnostic>,
    pub elapsed: Duration,
}

impl RunReport {
    fn new(operation: &'static str, total: usize) -> Self {
        Self {
            operation,
            status: RunStatus::Completed,
            total,
            processed: 0,
            diagnostics: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed && self.processed == self.total
    }

    pub fn skipped(&self) -> usize {
        self.diagnostics.len()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            RunStatus::Completed => write!(
                f,
                "completed with {}/{} frames processed",
                self.processed, self.total
            ),
            RunStatus::Cancelled => write!(
                f,
                "cancelled with {}/{} frames processed",
                self.processed, self.total
            ),
        }
    }
}

/// Sink that drops every result, for operations whose output is consumed
/// elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl<T> ResultSink<T> for Discard {
    fn clear(&mut self) {}

    fn put(&mut self, _item: T, _index_value: IndexValue) {}

    fn len(&self) -> usize {
        0
    }
}

#[derive(Debug, Default, Clone)]
pub struct SequenceProcessor {
    cancellation: Option<CancellationToken>,
}

impl SequenceProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Runs `operation` over every frame of `driving` and stores results in
    /// `sink`, which is cleared first.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessorError`] when the driving sequence is empty or the
    /// operation rejects its inputs. Nothing is written to `sink` then.
    pub fn run<S, O, K>(
        &self,
        driving: &S,
        operation: &mut O,
        sink: &mut K,
    ) -> Result<RunReport, ProcessorError>
    where
        S: FrameStore,
        O: FrameOperation,
        K: ResultSink<O::Output> + ?Sized,
    {
        let started = Instant::now();
        let total = driving.len();
        if total == 0 {
            return Err(ProcessorError::EmptySequence);
        }
        operation.prepare(driving)?;

        sink.clear();
        if let Some(index) = driving.index_metadata() {
            sink.prepare(index);
        }

        info!(operation = operation.name(), frames = total, "run started");

        let mut report = RunReport::new(operation.name(), total);
        let mut prior: Option<O::Carry> = None;

        for ordinal in 0..total {
            if self.is_cancelled() {
                report.status = RunStatus::Cancelled;
                info!(operation = operation.name(), ordinal, "run cancelled");
                break;
            }

            let (Some(frame), Some(index_value)) =
                (driving.frame_at(ordinal), driving.index_value_at(ordinal))
            else {
                prior = None;
                Self::record_skip(
                    &mut report,
                    ordinal,
                    None,
                    FrameError::MissingInput {
                        what: "driving frame",
                    },
                );
                continue;
            };

            let input = FrameInput {
                ordinal,
                index_value,
                frame,
            };
            match operation.apply(&input, prior.as_ref()) {
                Ok(output) => {
                    prior = operation.carry(&output);
                    sink.put(output, index_value.clone());
                    report.processed += 1;
                    debug!(ordinal, index_value = %index_value, "frame processed");
                }
                Err(reason) => {
                    prior = None;
                    Self::record_skip(&mut report, ordinal, Some(index_value.clone()), reason);
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            operation = operation.name(),
            processed = report.processed,
            total,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "{report}"
        );
        Ok(report)
    }

    /// Like [`run`](Self::run), for operations that fold their results
    /// internally.
    pub fn run_without_sink<S, O>(
        &self,
        driving: &S,
        operation: &mut O,
    ) -> Result<RunReport, ProcessorError>
    where
        S: FrameStore,
        O: FrameOperation,
    {
        self.run(driving, operation, &mut Discard)
    }

    fn record_skip(
        report: &mut RunReport,
        ordinal: usize,
        index_value: Option<IndexValue>,
        reason: FrameError,
    ) {
        warn!(
            ordinal,
            index_value = index_value.as_ref().map(IndexValue::as_str).unwrap_or("-"),
            %reason,
            "frame skipped"
        );
        report.diagnostics.push(FrameDiagnostic {
            ordinal,
            index_value,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{IndexMetadata, Sequence};
    use ndarray::Array3;

    fn constant_sequence(values: &[f32]) -> Sequence {
        Sequence::from_entries(
            IndexMetadata::default(),
            values.iter().enumerate().map(|(i, &v)| {
                (
                    IndexValue::from(i),
                    Frame::with_spacing(Array3::from_elem((1, 1, 1), v), [1.0; 3], [0.0; 3]),
                )
            }),
        )
    }

    /// Doubles the first voxel, fails on negative values and remembers the
    /// previous output.
    #[derive(Default)]
    struct Doubler {
        priors: Vec<Option<f32>>,
    }

    impl FrameOperation for Doubler {
        type Output = f32;
        type Carry = f32;

        fn name(&self) -> &'static str {
            "doubler"
        }

        fn apply(
            &mut self,
            input: &FrameInput<'_>,
            prior: Option<&f32>,
        ) -> Result<f32, FrameError> {
            self.priors.push(prior.copied());
            let value = input.frame.data()[[0, 0, 0]];
            if value < 0.0 {
                return Err(FrameError::EmptyMask);
            }
            Ok(value * 2.0)
        }

        fn carry(&self, output: &f32) -> Option<f32> {
            Some(*output)
        }
    }

    #[test]
    fn test_empty_sequence_is_structural() {
        let driving = Sequence::new();
        let mut sink: Sequence<f32> = Sequence::new();
        let result = SequenceProcessor::new().run(&driving, &mut Doubler::default(), &mut sink);
        assert_eq!(result.unwrap_err(), ProcessorError::EmptySequence);
    }

    #[test]
    fn test_results_keyed_by_driving_index() {
        let driving = constant_sequence(&[1.0, 2.0, 3.0]);
        let mut sink: Sequence<f32> = Sequence::new();
        let report = SequenceProcessor::new()
            .run(&driving, &mut Doubler::default(), &mut sink)
            .expect("run should succeed");

        assert!(report.is_complete());
        assert_eq!(report.to_string(), "completed with 3/3 frames processed");
        let written: Vec<_> = sink.iter().map(|(k, v)| (k.as_str().to_string(), *v)).collect();
        assert_eq!(
            written,
            vec![
                ("0".to_string(), 2.0),
                ("1".to_string(), 4.0),
                ("2".to_string(), 6.0)
            ]
        );
    }

    #[test]
    fn test_failed_frame_resets_carry() {
        let driving = constant_sequence(&[1.0, -1.0, 3.0, 4.0]);
        let mut sink: Sequence<f32> = Sequence::new();
        let mut operation = Doubler::default();
        let report = SequenceProcessor::new()
            .run(&driving, &mut operation, &mut sink)
            .expect("run should succeed");

        assert_eq!(report.processed, 3);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].ordinal, 1);
        assert_eq!(operation.priors, vec![None, Some(2.0), None, Some(6.0)]);
    }

    #[test]
    fn test_sink_is_cleared_before_run() {
        let driving = constant_sequence(&[1.0]);
        let mut sink: Sequence<f32> = Sequence::new();
        sink.put(99.0, IndexValue::from("42"));
        SequenceProcessor::new()
            .run(&driving, &mut Doubler::default(), &mut sink)
            .expect("run should succeed");
        assert_eq!(sink.len(), 1);
        assert!(sink.item_for_index(&IndexValue::from("42")).is_none());
    }

    #[test]
    fn test_cancelled_before_start_processes_nothing() {
        let driving = constant_sequence(&[1.0, 2.0]);
        let token = CancellationToken::new();
        token.cancel();
        let mut sink: Sequence<f32> = Sequence::new();
        let report = SequenceProcessor::new()
            .with_cancellation(token)
            .run(&driving, &mut Doubler::default(), &mut sink)
            .expect("cancellation is not an error");

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.processed, 0);
        assert!(sink.is_empty());
    }
}
