pub mod backend;
pub mod config;
pub mod detection;
pub mod detector;
pub mod geometry;
pub mod labels;
pub mod logging;
pub mod processing;
pub mod service;
pub mod source;
pub mod worker;

// Re-export commonly used types for convenience
pub use backend::{InferenceBackend, ModelOutputs};
pub use config::{DetectorConfig, ServiceConfig};
pub use detection::Detection;
pub use detector::{DetectError, DetectStatus, DetectionReport, Detector};
pub use geometry::{Rect, intersection_over_union};
pub use labels::LabelTable;
pub use processing::{Architecture, DecodeError, OutputNames, PostProcessor, suppress};
pub use service::{DetectionService, FrameSource, ReportSink, ServiceStats, SubmitPolicy};
pub use source::DirectoryFrameSource;
pub use worker::{DetectorHandle, DetectorWorker, PendingDetection, SubmitError};
