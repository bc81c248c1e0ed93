use crate::backend::InferenceBackend;
use crate::config::DetectorConfig;
use crate::detection::Detection;
use crate::geometry::Rect;
use crate::processing::{DecodeError, PostProcessor};
use common::retry_with_backoff;
use preprocess::{CpuPreProcessor, Frame, FrameTransform, Preprocess};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a detection pass produced nothing. Every variant is per-frame and
/// recoverable; the next frame is processed normally.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("preprocessing failed: {0:#}")]
    Preprocess(anyhow::Error),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("malformed model output: {0}")]
    MalformedOutput(#[from] DecodeError),
}

/// Outcome tag carried next to the detections, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectStatus {
    Ok,
    ModelUnavailable,
    PreprocessFailed,
    InferenceFailed,
    MalformedOutput,
    /// The worker serving this detector has shut down
    WorkerStopped,
}

impl DetectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectStatus::Ok => "ok",
            DetectStatus::ModelUnavailable => "model_unavailable",
            DetectStatus::PreprocessFailed => "preprocess_failed",
            DetectStatus::InferenceFailed => "inference_failed",
            DetectStatus::MalformedOutput => "malformed_output",
            DetectStatus::WorkerStopped => "worker_stopped",
        }
    }
}

impl From<&DetectError> for DetectStatus {
    fn from(error: &DetectError) -> Self {
        match error {
            DetectError::ModelUnavailable(_) => DetectStatus::ModelUnavailable,
            DetectError::Preprocess(_) => DetectStatus::PreprocessFailed,
            DetectError::Inference(_) => DetectStatus::InferenceFailed,
            DetectError::MalformedOutput(_) => DetectStatus::MalformedOutput,
        }
    }
}

/// Result of one detection pass as delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    pub detections: Vec<Detection>,
    /// Wall-clock time from the start of preprocessing to the end of decoding,
    /// or up to the failure point
    pub inference_time: Duration,
    pub status: DetectStatus,
}

impl DetectionReport {
    pub fn failed(status: DetectStatus, inference_time: Duration) -> Self {
        Self {
            detections: Vec::new(),
            inference_time,
            status,
        }
    }

    pub fn inference_time_secs(&self) -> f64 {
        self.inference_time.as_secs_f64()
    }

    pub fn is_ok(&self) -> bool {
        self.status == DetectStatus::Ok
    }
}

/// One model bound to one output layout.
///
/// Construction never fails: if the model could not be loaded the failure is
/// logged once and every later [`Detector::detect_frame`] returns an empty
/// report tagged [`DetectStatus::ModelUnavailable`].
pub struct Detector {
    config: DetectorConfig,
    model: Result<Box<dyn InferenceBackend>, String>,
    preprocessor: Box<dyn Preprocess + Send>,
    postprocessor: PostProcessor,
}

impl Detector {
    /// Bind `model` to `config`.
    ///
    /// An invalid `config` is treated like a missing model: logged here, and
    /// every frame reports [`DetectStatus::ModelUnavailable`].
    pub fn new(config: DetectorConfig, model: anyhow::Result<Box<dyn InferenceBackend>>) -> Self {
        let model = config
            .validate()
            .map_err(|e| e.context("Invalid detector configuration"))
            .and(model);
        let model = model.map_err(|e| {
            tracing::error!(
                model_path = %config.model_path,
                architecture = config.architecture.as_str(),
                error = %format!("{e:#}"),
                "Model unavailable, detections will be empty"
            );
            format!("{e:#}")
        });

        if let Ok(backend) = &model {
            tracing::info!(
                backend = backend.name(),
                architecture = config.architecture.as_str(),
                input_size = config.input_size,
                confidence_threshold = config.confidence_threshold,
                iou_threshold = config.iou_threshold,
                labels = config.labels.len(),
                "Detector ready"
            );
        }

        let preprocessor = CpuPreProcessor::with_options(
            config.input_size,
            config.resize_policy,
            config.normalization,
        );
        let postprocessor = PostProcessor::new(
            config.architecture,
            config.confidence_threshold,
            config.iou_threshold,
        );

        Self {
            config,
            model,
            preprocessor: Box::new(preprocessor),
            postprocessor,
        }
    }

    pub fn with_backend(config: DetectorConfig, backend: impl InferenceBackend + 'static) -> Self {
        Self::new(config, Ok(Box::new(backend)))
    }

    /// Load `B` from `config.model_path`, retrying with backoff before giving up.
    pub fn load<B: InferenceBackend + 'static>(config: DetectorConfig, attempts: u32) -> Self {
        Self::load_with(config, attempts, |config| {
            B::load_model(&config.model_path).map(|b| Box::new(b) as Box<dyn InferenceBackend>)
        })
    }

    /// Like [`Detector::load`] with a custom loader, for backends that need
    /// more than the model path.
    pub fn load_with<F>(config: DetectorConfig, attempts: u32, mut loader: F) -> Self
    where
        F: FnMut(&DetectorConfig) -> anyhow::Result<Box<dyn InferenceBackend>>,
    {
        let model = retry_with_backoff(|| loader(&config), attempts, 500, "model load");
        Self::new(config, model)
    }

    /// Substitute the preprocessing stage, e.g. a letterboxing or GPU implementation.
    pub fn with_preprocessor(mut self, preprocessor: impl Preprocess + Send + 'static) -> Self {
        if preprocessor.input_size() != self.config.input_size {
            tracing::warn!(
                preprocessor = preprocessor.input_size(),
                configured = self.config.input_size,
                "Preprocessor input size differs from configured model input"
            );
        }
        self.preprocessor = Box::new(preprocessor);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn is_available(&self) -> bool {
        self.model.is_ok()
    }

    /// Run one full detection pass. Never fails: errors become an empty report.
    pub fn detect_frame(&mut self, frame: &Frame) -> DetectionReport {
        let span = tracing::debug_span!(
            "detect_frame",
            architecture = self.config.architecture.as_str(),
            width = frame.width,
            height = frame.height
        );
        let _enter = span.enter();

        let start = Instant::now();
        match self.run_pipeline(frame) {
            Ok(detections) => {
                let inference_time = start.elapsed();
                tracing::debug!(
                    detections = detections.len(),
                    elapsed_ms = inference_time.as_secs_f64() * 1000.0,
                    "Frame processed"
                );
                DetectionReport {
                    detections,
                    inference_time,
                    status: DetectStatus::Ok,
                }
            }
            Err(error) => {
                let status = DetectStatus::from(&error);
                let inference_time = match status {
                    DetectStatus::ModelUnavailable => Duration::ZERO,
                    _ => start.elapsed(),
                };
                match &error {
                    DetectError::ModelUnavailable(_) => {
                        tracing::trace!("Skipping frame, model unavailable")
                    }
                    DetectError::MalformedOutput(e) => {
                        tracing::warn!(error = %e, "Model output does not match decoder layout")
                    }
                    other => tracing::warn!(error = %other, "Detection pass failed"),
                }
                DetectionReport::failed(status, inference_time)
            }
        }
    }

    fn run_pipeline(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let model = match &mut self.model {
            Ok(model) => model,
            Err(reason) => return Err(DetectError::ModelUnavailable(reason.clone())),
        };

        let preprocessed = self
            .preprocessor
            .preprocess(frame)
            .map_err(DetectError::Preprocess)?;

        let outputs = {
            let _infer_span = common::span_debug!("model_inference");
            model
                .infer(&preprocessed.tensor.view())
                .map_err(DetectError::Inference)?
        };

        let detections = self.postprocessor.process(
            &outputs,
            &self.config.output_names,
            &self.config.labels,
        )?;

        Ok(map_to_frame(detections, &preprocessed.transform))
    }
}

/// Re-express boxes decoded in input space in the frame's normalized space.
fn map_to_frame(detections: Vec<Detection>, transform: &FrameTransform) -> Vec<Detection> {
    if transform.is_identity() {
        return detections;
    }

    detections
        .into_iter()
        .map(|mut d| {
            let b = d.bounding_box;
            let (x_min, y_min) = transform.to_frame(b.x, b.y);
            let (x_max, y_max) = transform.to_frame(b.max_x(), b.max_y());
            // Corners inside the padding band land outside the frame
            d.bounding_box = Rect::from_corners(
                x_min.clamp(0.0, 1.0),
                y_min.clamp(0.0, 1.0),
                x_max.clamp(0.0, 1.0),
                y_max.clamp(0.0, 1.0),
            );
            d
        })
        .collect()
}
