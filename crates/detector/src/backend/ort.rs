use super::{InferenceBackend, ModelOutputs};
use crate::config::DetectorConfig;
use crate::processing::OutputNames;
use ndarray::ArrayViewD;
use std::env;
use std::str::FromStr;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};

/// Defaults to CUDA when built with the `cuda` feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProvider {
    #[cfg_attr(not(feature = "cuda"), default)]
    Cpu,
    #[cfg(feature = "cuda")]
    #[default]
    Cuda,
}

impl ExecutionProvider {
    /// Read `EXECUTION_PROVIDER`, falling back to the build default
    pub fn from_env() -> anyhow::Result<Self> {
        match env::var("EXECUTION_PROVIDER") {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            #[cfg(feature = "cuda")]
            "cuda" => Ok(Self::Cuda),
            #[cfg(not(feature = "cuda"))]
            "cuda" => anyhow::bail!("EXECUTION_PROVIDER=cuda but built without the cuda feature"),
            other => anyhow::bail!("Unknown execution provider: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrtOptions {
    pub provider: ExecutionProvider,
    pub intra_threads: usize,
    /// Name of the image input of the graph
    pub input_name: String,
    /// Outputs copied out of the session after each run; missing ones are skipped
    pub output_names: Vec<String>,
}

impl Default for OrtOptions {
    fn default() -> Self {
        Self {
            provider: ExecutionProvider::default(),
            intra_threads: 4,
            input_name: "images".to_string(),
            output_names: OutputNames::default().all().map(str::to_string).collect(),
        }
    }
}

impl From<&DetectorConfig> for OrtOptions {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            input_name: config.input_name.clone(),
            output_names: config.output_names.all().map(str::to_string).collect(),
            ..Self::default()
        }
    }
}

pub struct OrtBackend {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
}

impl OrtBackend {
    pub fn load_model_with_options(path: &str, options: &OrtOptions) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        #[cfg_attr(not(feature = "cuda"), allow(unused_mut))]
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(options.intra_threads)?;

        match options.provider {
            #[cfg(feature = "cuda")]
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;

        tracing::info!(path, input = %options.input_name, "Model loaded");
        Ok(Self {
            session,
            input_name: options.input_name.clone(),
            output_names: options.output_names.clone(),
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn load_model(path: &str) -> anyhow::Result<Self> {
        Self::load_model_with_options(path, &OrtOptions::default())
    }

    fn infer(&mut self, input: &ArrayViewD<f32>) -> anyhow::Result<ModelOutputs> {
        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(input.view())?
        ])?;

        let mut tensors = ModelOutputs::default();
        for name in &self.output_names {
            if let Some(value) = outputs.get(name.as_str()) {
                let array = value.try_extract_array::<f32>()?;
                tensors.insert(name.clone(), array.into_owned());
            }
        }

        Ok(tensors)
    }

    fn name(&self) -> &str {
        "onnxruntime"
    }
}
