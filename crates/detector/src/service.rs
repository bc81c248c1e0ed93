use crate::detector::{DetectStatus, DetectionReport};
use crate::worker::{DetectorHandle, PendingDetection, SubmitError};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use preprocess::Frame;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Producer of raw frames, polled from a blocking thread.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

/// Consumer of detection reports, called in frame order.
pub trait ReportSink {
    fn on_report(&mut self, frame_number: u64, report: DetectionReport);
}

impl<F: FnMut(u64, DetectionReport)> ReportSink for F {
    fn on_report(&mut self, frame_number: u64, report: DetectionReport) {
        self(frame_number, report)
    }
}

/// What to do with a frame that arrives while a detection is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitPolicy {
    /// Drop it; the next frame gets a chance instead
    #[default]
    DropLate,
    /// Hold the source until the worker is free
    Wait,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    /// Reports whose status was not `Ok`
    pub frames_failed: u64,
    pub detections: u64,
}

struct ServiceMetrics {
    duration: Histogram<f64>,
    frames: Counter<u64>,
    skipped: Counter<u64>,
    detections: Counter<u64>,
}

impl ServiceMetrics {
    fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.001, 0.002, 0.005, 0.007, 0.01, 0.015, 0.02, 0.025, 0.03, 0.04, 0.05, 0.075, 0.1,
            0.15, 0.2, 0.5,
        ];
        Self {
            duration: meter
                .f64_histogram("detector_duration_seconds")
                .with_description("Time for one detection pass (preprocess + infer + decode)")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            frames: meter
                .u64_counter("detector_frames_total")
                .with_description("Frames that went through a detection pass")
                .build(),
            skipped: meter
                .u64_counter("detector_frames_skipped_total")
                .with_description("Frames dropped because a detection was in flight")
                .build(),
            detections: meter
                .u64_counter("detector_detections_total")
                .with_description("Detections surviving suppression")
                .build(),
        }
    }

    fn record(&self, report: &DetectionReport) {
        let status = [KeyValue::new("status", report.status.as_str())];
        self.frames.add(1, &status);
        if report.status == DetectStatus::Ok {
            self.duration.record(report.inference_time_secs(), &[]);
            self.detections.add(report.detections.len() as u64, &[]);
        }
    }
}

/// Drives frames from a [`FrameSource`] through a detector worker and hands
/// each report to a [`ReportSink`].
pub struct DetectionService {
    handle: DetectorHandle,
    policy: SubmitPolicy,
    metrics: ServiceMetrics,
}

struct ProducerStats {
    frames_read: u64,
    frames_skipped: u64,
}

impl DetectionService {
    pub fn new(handle: DetectorHandle) -> Self {
        Self {
            handle,
            policy: SubmitPolicy::default(),
            metrics: ServiceMetrics::new("detector"),
        }
    }

    pub fn with_policy(mut self, policy: SubmitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run until `source` is exhausted or fails. A source error ends the run
    /// after every submitted frame has been reported.
    pub async fn run<S, K>(&self, source: S, mut sink: K) -> anyhow::Result<ServiceStats>
    where
        S: FrameSource + 'static,
        K: ReportSink,
    {
        tracing::info!(policy = ?self.policy, "Detection service starting");

        let (pending_tx, mut pending_rx) = mpsc::unbounded_channel();
        let producer = {
            let handle = self.handle.clone();
            let policy = self.policy;
            let skipped = self.metrics.skipped.clone();
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || {
                produce(source, handle, policy, &skipped, &runtime, pending_tx)
            })
        };

        let mut stats = ServiceStats::default();
        while let Some((frame_number, pending)) = pending_rx.recv().await {
            let report = pending.await;
            self.metrics.record(&report);

            stats.frames_processed += 1;
            stats.detections += report.detections.len() as u64;
            if !report.is_ok() {
                stats.frames_failed += 1;
            }

            if stats.frames_processed.is_multiple_of(100) {
                tracing::debug!(
                    frames_processed = stats.frames_processed,
                    frames_failed = stats.frames_failed,
                    detections = stats.detections,
                    "Service progress"
                );
            }

            sink.on_report(frame_number, report);
        }

        let produced = producer.await??;
        stats.frames_read = produced.frames_read;
        stats.frames_skipped = produced.frames_skipped;

        tracing::info!(
            frames_read = stats.frames_read,
            frames_processed = stats.frames_processed,
            frames_skipped = stats.frames_skipped,
            frames_failed = stats.frames_failed,
            detections = stats.detections,
            "Detection service finished"
        );
        Ok(stats)
    }
}

fn produce<S: FrameSource>(
    mut source: S,
    handle: DetectorHandle,
    policy: SubmitPolicy,
    skipped_counter: &Counter<u64>,
    runtime: &Handle,
    pending: mpsc::UnboundedSender<(u64, PendingDetection)>,
) -> anyhow::Result<ProducerStats> {
    let mut stats = ProducerStats {
        frames_read: 0,
        frames_skipped: 0,
    };

    while let Some(frame) = source.next_frame()? {
        stats.frames_read += 1;
        let frame_number = stats.frames_read;

        let submitted = match policy {
            SubmitPolicy::DropLate => handle.try_detect(frame),
            SubmitPolicy::Wait => runtime.block_on(handle.submit(frame)),
        };

        match submitted {
            Ok(detection) => {
                if pending.send((frame_number, detection)).is_err() {
                    break;
                }
            }
            Err(SubmitError::Busy(_)) => {
                stats.frames_skipped += 1;
                skipped_counter.add(1, &[]);
                tracing::trace!(frame_number, "Detection in flight, frame dropped");
            }
            Err(e @ SubmitError::Stopped(_)) => {
                tracing::error!(frame_number, error = %e, "Stopping frame intake");
                break;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InferenceBackend, ModelOutputs};
    use crate::config::DetectorConfig;
    use crate::detector::Detector;
    use crate::processing::Architecture;
    use crate::worker;
    use ndarray::ArrayViewD;
    use std::time::Duration;

    struct CountingSource {
        remaining: usize,
    }

    impl FrameSource for CountingSource {
        fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Frame::filled(8, 8, [0, 0, 0])))
        }
    }

    struct SlowBackend(Duration);

    impl InferenceBackend for SlowBackend {
        fn load_model(_path: &str) -> anyhow::Result<Self> {
            Ok(Self(Duration::ZERO))
        }

        fn infer(&mut self, _input: &ArrayViewD<f32>) -> anyhow::Result<ModelOutputs> {
            std::thread::sleep(self.0);
            anyhow::bail!("no model")
        }
    }

    fn service(delay: Duration) -> (DetectionService, worker::DetectorWorker) {
        let config = DetectorConfig::new(Architecture::AnchorGrid, "unused");
        let detector = Detector::with_backend(config, SlowBackend(delay));
        let (handle, worker) = worker::spawn(detector).unwrap();
        (DetectionService::new(handle), worker)
    }

    #[tokio::test]
    async fn test_wait_policy_reports_every_frame_in_order() {
        let (service, worker) = service(Duration::from_millis(1));
        let service = service.with_policy(SubmitPolicy::Wait);

        let mut seen = Vec::new();
        let stats = service
            .run(CountingSource { remaining: 5 }, |n: u64, report: DetectionReport| {
                assert_eq!(report.status, DetectStatus::InferenceFailed);
                seen.push(n);
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(stats.frames_read, 5);
        assert_eq!(stats.frames_processed, 5);
        assert_eq!(stats.frames_skipped, 0);
        assert_eq!(stats.frames_failed, 5);

        drop(service);
        worker.join();
    }

    #[tokio::test]
    async fn test_drop_late_skips_while_busy() {
        let (service, worker) = service(Duration::from_millis(200));

        let mut seen = Vec::new();
        let stats = service
            .run(CountingSource { remaining: 5 }, |n: u64, _: DetectionReport| {
                seen.push(n)
            })
            .await
            .unwrap();

        assert_eq!(seen[0], 1, "First frame always finds the worker idle");
        assert!(stats.frames_skipped >= 1);
        assert_eq!(stats.frames_processed + stats.frames_skipped, 5);
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "Reports never reorder");

        drop(service);
        worker.join();
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        struct BrokenSource;

        impl FrameSource for BrokenSource {
            fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
                anyhow::bail!("camera unplugged")
            }
        }

        let (service, worker) = service(Duration::ZERO);
        let result = service
            .run(BrokenSource, |_: u64, _: DetectionReport| {})
            .await;

        assert!(result.is_err());
        drop(service);
        worker.join();
    }
}
