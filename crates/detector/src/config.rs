use crate::labels::LabelTable;
use crate::processing::{Architecture, OutputNames};
use common::env_or;
use preprocess::{Normalization, ResizePolicy};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

pub use common::Environment;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_LABEL_OFFSET: usize = 1;

/// Everything a detector backend is constructed with. Fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub model_path: String,
    pub architecture: Architecture,
    /// Side of the square model input
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub labels: Arc<LabelTable>,
    pub output_names: OutputNames,
    pub input_name: String,
    pub resize_policy: ResizePolicy,
    pub normalization: Normalization,
}

impl DetectorConfig {
    /// Reference settings for `architecture`: COCO labels, 0.3 confidence,
    /// 0.5 IoU, stretch resize.
    pub fn new(architecture: Architecture, model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            architecture,
            input_size: architecture.default_input_size(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            labels: Arc::new(LabelTable::coco()),
            output_names: OutputNames::default(),
            input_name: "images".to_string(),
            resize_policy: ResizePolicy::Stretch,
            normalization: Normalization::UnitRange,
        }
    }

    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let label_offset = env_or("LABEL_OFFSET", DEFAULT_LABEL_OFFSET);
        let architecture = match env::var("ARCHITECTURE") {
            Ok(value) => parse_architecture(&value, label_offset)?,
            Err(_) => Architecture::AnchorGrid,
        };

        let model_path = env::var("MODEL_PATH").unwrap_or_else(|_| match architecture {
            Architecture::AnchorGrid => "models/ssd_mobilenet.onnx".to_string(),
            Architecture::PrefilteredList { .. } => "models/yolo.onnx".to_string(),
        });

        let mut config = Self::new(architecture, model_path);

        config.input_size = env_or("INPUT_SIZE", config.input_size);
        config.confidence_threshold = env_or("CONFIDENCE_THRESHOLD", config.confidence_threshold);
        config.iou_threshold = env_or("IOU_THRESHOLD", config.iou_threshold);

        if let Ok(name) = env::var("INPUT_NAME") {
            config.input_name = name;
        }
        if let Ok(policy) = env::var("RESIZE_POLICY") {
            config.resize_policy = policy.parse()?;
        }
        if let Ok(normalization) = env::var("NORMALIZATION") {
            config.normalization = normalization.parse()?;
        }
        if let Ok(path) = env::var("LABELS_PATH") {
            config.labels = Arc::new(LabelTable::from_file(path)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input_size == 0 {
            anyhow::bail!("INPUT_SIZE must be positive");
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            anyhow::bail!(
                "Confidence threshold {} outside [0, 1]",
                self.confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            anyhow::bail!("IoU threshold {} outside [0, 1]", self.iou_threshold);
        }
        if let Architecture::PrefilteredList { label_offset } = self.architecture {
            if label_offset >= self.labels.len() {
                anyhow::bail!(
                    "Label offset {} leaves no usable entries in a table of {}",
                    label_offset,
                    self.labels.len()
                );
            }
        }
        Ok(())
    }
}

fn parse_architecture(value: &str, label_offset: usize) -> anyhow::Result<Architecture> {
    match value.trim().to_lowercase().as_str() {
        "anchor-grid" | "ssd" => Ok(Architecture::AnchorGrid),
        "prefiltered-list" | "yolo" => Ok(Architecture::PrefilteredList { label_offset }),
        other => anyhow::bail!("Unknown architecture '{}'", other),
    }
}

/// Process-level settings for the detector binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub environment: Environment,
    pub detector: DetectorConfig,
    /// Directory of still images replayed as a frame source
    pub frame_dir: PathBuf,
    /// Pause between frames to emulate camera pacing
    pub frame_interval_ms: u64,
    pub model_load_attempts: u32,
    pub otel_endpoint: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            environment: Environment::from_env(),
            detector: DetectorConfig::from_env()?,
            frame_dir: env::var("FRAME_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("frames")),
            frame_interval_ms: env_or("FRAME_INTERVAL_MS", 33),
            model_load_attempts: env_or("MODEL_LOAD_ATTEMPTS", 3),
            otel_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        })
    }
}
