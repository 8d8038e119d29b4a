//! Rigid registration of every frame of a sequence against a fixed frame.
//!
//! The registration itself runs in an external service behind
//! [`RegistrationService`]. Each frame is submitted, polled with a bounded
//! [`PollPolicy`] and released again whatever the outcome. Timeouts and
//! failed jobs only skip the frame. The transform of a successful frame is
//! handed to the next frame as its initial transform.

use crate::{
    config::RegistrationConfig,
    enums::InitializeMode,
    error::{FrameError, ProcessorError, ServiceError},
    frame::Frame,
    processor::{FrameInput, FrameOperation, RunReport, SequenceProcessor},
    roi::Roi,
    sequence::{FrameStore, IndexMetadata, IndexValue, ResultSink, Sequence},
    transform::Affine,
};

use std::{borrow::Cow, fmt, thread};
use tracing::{debug, trace, warn};
use web_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            ServiceStatus::Running => "Running",
            ServiceStatus::Completed => "Completed",
            ServiceStatus::Failed => "Failed",
            ServiceStatus::TimedOut => "TimedOut",
        };
        f.write_str(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskProcessing {
    NoMask,
    Roi,
}

impl MaskProcessing {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskProcessing::NoMask => "NOMASK",
            MaskProcessing::Roi => "ROI",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationParameters {
    pub initialize_mode: InitializeMode,
    pub cost_metric: String,
    pub translation_scale: f64,
    pub iterations: u32,
    pub use_rigid: bool,
    /// Ask the service for the moving frame resampled into the fixed grid.
    pub resample_output: bool,
}

impl Default for RegistrationParameters {
    fn default() -> Self {
        Self {
            initialize_mode: InitializeMode::GeometryAlign,
            cost_metric: "MSE".to_string(),
            translation_scale: 100_000.0,
            iterations: 100,
            use_rigid: true,
            resample_output: false,
        }
    }
}

/// One registration job as handed to the service.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationRequest<'a> {
    pub fixed: &'a Frame,
    pub moving: &'a Frame,
    pub mask: Option<&'a Frame>,
    pub initial_transform: Option<&'a Affine>,
    pub parameters: &'a RegistrationParameters,
}

impl RegistrationRequest<'_> {
    pub fn mask_processing(&self) -> MaskProcessing {
        if self.mask.is_some() {
            MaskProcessing::Roi
        } else {
            MaskProcessing::NoMask
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOutput {
    /// Moving-to-fixed transform.
    pub transform: Affine,
    pub resampled: Option<Frame>,
}

/// Asynchronous registration backend.
pub trait RegistrationService {
    type Handle;

    fn submit(&mut self, request: &RegistrationRequest<'_>) -> Result<Self::Handle, ServiceError>;

    fn poll(&mut self, handle: &Self::Handle) -> Result<ServiceStatus, ServiceError>;

    /// Result of a job that reported [`ServiceStatus::Completed`].
    fn collect(&mut self, handle: &Self::Handle) -> Result<RegistrationOutput, ServiceError>;

    /// Frees whatever the service keeps for `handle`. Called exactly once
    /// per successful submission.
    fn release(&mut self, handle: Self::Handle) -> Result<(), ServiceError>;
}

/// Bounded polling with optional exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_millis(100),
            backoff_factor: 1.0,
            max_interval: Duration::from_secs(5),
        }
    }
}

impl PollPolicy {
    /// Policy without waiting between polls.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Wait after the `attempt`-th poll (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(scaled.clamp(0.0, self.max_interval.as_secs_f64()))
    }
}

/// A submitted job, released when dropped.
struct Submission<'s, S: RegistrationService> {
    service: &'s mut S,
    handle: Option<S::Handle>,
}

impl<'s, S: RegistrationService> Submission<'s, S> {
    fn submit(
        service: &'s mut S,
        request: &RegistrationRequest<'_>,
    ) -> Result<Self, ServiceError> {
        let handle = service.submit(request)?;
        Ok(Self {
            service,
            handle: Some(handle),
        })
    }

    fn poll(&mut self) -> Result<ServiceStatus, ServiceError> {
        let handle = self.handle.as_ref().ok_or(ServiceError::UnknownHandle)?;
        self.service.poll(handle)
    }

    fn collect(&mut self) -> Result<RegistrationOutput, ServiceError> {
        let handle = self.handle.as_ref().ok_or(ServiceError::UnknownHandle)?;
        self.service.collect(handle)
    }
}

impl<S: RegistrationService> Drop for Submission<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.service.release(handle) {
                warn!(%err, "failed to release registration job");
            }
        }
    }
}

/// Submits `request` and blocks until the job finishes or the poll budget
/// runs out. The job is released on every path.
pub fn register<S: RegistrationService>(
    service: &mut S,
    request: &RegistrationRequest<'_>,
    policy: &PollPolicy,
) -> Result<RegistrationOutput, FrameError> {
    let mut submission = Submission::submit(service, request)?;

    let mut attempts = 0;
    loop {
        let status = submission.poll()?;
        attempts += 1;
        trace!(attempts, %status, "registration polled");
        match status {
            ServiceStatus::Completed => return Ok(submission.collect()?),
            ServiceStatus::Failed | ServiceStatus::TimedOut => {
                return Err(FrameError::ServiceFailed {
                    status: status.to_string(),
                });
            }
            ServiceStatus::Running => {
                if attempts >= policy.max_attempts {
                    return Err(FrameError::TimedOut { attempts });
                }
                let delay = policy.delay(attempts);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// Registers each frame of the driving (moving) sequence to a fixed frame.
pub struct RegistrationOperation<'a, S> {
    service: S,
    fixed: &'a Frame,
    mask: Option<Cow<'a, Frame>>,
    initial_transform: Option<&'a Affine>,
    parameters: RegistrationParameters,
    policy: PollPolicy,
    chain_transforms: bool,
    invert_results: bool,
}

impl<'a, S: RegistrationService> RegistrationOperation<'a, S> {
    pub fn new(service: S, fixed: &'a Frame) -> Self {
        Self {
            service,
            fixed,
            mask: None,
            initial_transform: None,
            parameters: RegistrationParameters::default(),
            policy: PollPolicy::default(),
            chain_transforms: true,
            invert_results: false,
        }
    }

    pub fn with_mask(mut self, mask: &'a Frame) -> Self {
        self.mask = Some(Cow::Borrowed(mask));
        self
    }

    /// Restricts the metric to a box, rasterized on the fixed frame's grid.
    pub fn with_roi(mut self, roi: &Roi) -> Result<Self, ProcessorError> {
        self.mask = Some(Cow::Owned(roi.mask_for(self.fixed)?));
        Ok(self)
    }

    /// Initial transform for the first frame of the run.
    pub fn with_initial_transform(mut self, transform: &'a Affine) -> Self {
        self.initial_transform = Some(transform);
        self
    }

    pub fn with_parameters(mut self, parameters: RegistrationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// When set (the default), each frame starts from the previous frame's
    /// result.
    pub fn with_chained_transforms(mut self, chain: bool) -> Self {
        self.chain_transforms = chain;
        self
    }

    /// Invert the stored transforms once [`run_into`](Self::run_into) has
    /// finished the loop.
    pub fn with_inverted_results(mut self, invert: bool) -> Self {
        self.invert_results = invert;
        self
    }

    /// Takes parameters, poll policy and the inversion flag from a
    /// `[registration]` config section.
    pub fn with_config(self, config: &RegistrationConfig) -> Self {
        self.with_parameters(config.parameters())
            .with_poll_policy(config.poll_policy())
            .with_inverted_results(config.invert_results)
    }

    /// Registers every frame of `moving` into `sink`, then applies the
    /// inversion pass when enabled. Cancelled runs are inverted as far as
    /// they got.
    pub fn run_into(
        &mut self,
        processor: &SequenceProcessor,
        moving: &Sequence,
        sink: &mut RegistrationSink<'_>,
    ) -> Result<RunReport, ProcessorError> {
        let report = processor.run(moving, self, sink)?;
        if self.invert_results {
            let inverted = invert_transforms(&mut *sink.transforms);
            debug!(inverted, "registration results inverted");
        }
        Ok(report)
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn into_service(self) -> S {
        self.service
    }
}

impl<S: RegistrationService> FrameOperation for RegistrationOperation<'_, S> {
    type Output = RegistrationOutput;
    type Carry = Affine;

    fn name(&self) -> &'static str {
        "rigid-registration"
    }

    fn prepare(&mut self, _driving: &dyn FrameStore) -> Result<(), ProcessorError> {
        if self.policy.max_attempts == 0 {
            return Err(ProcessorError::MissingConfiguration("poll budget"));
        }
        if self.fixed.voxel_count() == 0 {
            return Err(ProcessorError::Geometry(
                "fixed volume has no voxels".to_string(),
            ));
        }
        if let Some(mask) = &self.mask {
            if mask.dim() != self.fixed.dim() {
                return Err(ProcessorError::Geometry(
                    "mask grid does not match the fixed volume".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn apply(
        &mut self,
        input: &FrameInput<'_>,
        prior: Option<&Affine>,
    ) -> Result<RegistrationOutput, FrameError> {
        let initial_transform = if input.ordinal == 0 {
            self.initial_transform
        } else {
            prior
        };
        let request = RegistrationRequest {
            fixed: self.fixed,
            moving: input.frame,
            mask: self.mask.as_deref(),
            initial_transform,
            parameters: &self.parameters,
        };
        register(&mut self.service, &request, &self.policy)
    }

    fn carry(&self, output: &RegistrationOutput) -> Option<Affine> {
        self.chain_transforms.then_some(output.transform)
    }
}

/// Writes registration results into a transform sequence and, optionally,
/// a sequence of resampled moving frames.
pub struct RegistrationSink<'a> {
    pub transforms: &'a mut Sequence<Affine>,
    pub volumes: Option<&'a mut Sequence<Frame>>,
}

impl<'a> RegistrationSink<'a> {
    pub fn new(transforms: &'a mut Sequence<Affine>) -> Self {
        Self {
            transforms,
            volumes: None,
        }
    }

    pub fn with_volumes(mut self, volumes: &'a mut Sequence<Frame>) -> Self {
        self.volumes = Some(volumes);
        self
    }
}

impl ResultSink<RegistrationOutput> for RegistrationSink<'_> {
    fn clear(&mut self) {
        self.transforms.clear();
        if let Some(volumes) = self.volumes.as_deref_mut() {
            volumes.clear();
        }
    }

    fn put(&mut self, item: RegistrationOutput, index_value: IndexValue) {
        if let (Some(volumes), Some(resampled)) = (self.volumes.as_deref_mut(), item.resampled) {
            volumes.put(resampled, index_value.clone());
        }
        self.transforms.put(item.transform, index_value);
    }

    fn len(&self) -> usize {
        self.transforms.len()
    }

    fn prepare(&mut self, index: &IndexMetadata) {
        self.transforms.set_index(index.clone());
        if let Some(volumes) = self.volumes.as_deref_mut() {
            volumes.set_index(index.clone());
        }
    }
}

/// Replaces every transform by its inverse, turning moving-to-fixed results
/// into fixed-to-moving ones. Singular transforms are left as they are;
/// returns how many were inverted.
pub fn invert_transforms(transforms: &mut Sequence<Affine>) -> usize {
    let mut inverted = 0;
    for transform in transforms.items_mut() {
        match transform.inverse() {
            Some(inverse) => {
                *transform = inverse;
                inverted += 1;
            }
            None => warn!("singular transform left uninverted"),
        }
    }
    inverted
}
