use common::TelemetryGuard;
use detector::{
    DetectionReport, DetectionService, Detector, DirectoryFrameSource, InferenceBackend,
    ServiceConfig,
    backend::ort::{ExecutionProvider, OrtBackend, OrtOptions},
    logging::setup_logging,
    worker,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;

    let _telemetry = match &config.otel_endpoint {
        Some(endpoint) => Some(TelemetryGuard::init(
            "detector",
            endpoint,
            config.environment,
        )?),
        None => {
            setup_logging(&config);
            None
        }
    };

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    let provider = ExecutionProvider::from_env()?;
    let detector = {
        let _span = common::span!("model_load");
        Detector::load_with(
            config.detector.clone(),
            config.model_load_attempts,
            |detector_config| {
                let options = OrtOptions {
                    provider,
                    ..OrtOptions::from(detector_config)
                };
                let backend =
                    OrtBackend::load_model_with_options(&detector_config.model_path, &options)?;
                Ok(Box::new(backend) as Box<dyn InferenceBackend>)
            },
        )
    };
    if !detector.is_available() {
        tracing::warn!("Continuing without a model, every frame will report no detections");
    }

    let source = DirectoryFrameSource::open(
        &config.frame_dir,
        Duration::from_millis(config.frame_interval_ms),
    )?;

    let (handle, worker) = worker::spawn(detector)?;
    let service = DetectionService::new(handle);

    let stats = service
        .run(source, |frame_number: u64, report: DetectionReport| {
            tracing::info!(
                frame_number,
                status = report.status.as_str(),
                detections = report.detections.len(),
                inference_ms = report.inference_time_secs() * 1000.0,
                "Frame report"
            );
            for detection in &report.detections {
                tracing::debug!(
                    frame_number,
                    label = %detection.label,
                    confidence = detection.confidence,
                    bounding_box = ?detection.bounding_box,
                    "Detection"
                );
            }
        })
        .await?;

    drop(service);
    worker.join();

    tracing::info!(
        frames_processed = stats.frames_processed,
        frames_skipped = stats.frames_skipped,
        "Detector exiting"
    );
    Ok(())
}
