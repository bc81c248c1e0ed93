use crate::detector::{DetectStatus, DetectionReport, Detector};
use preprocess::Frame;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};

type ReportCallback = Box<dyn FnOnce(DetectionReport) + Send>;

/// Where the worker delivers a finished report.
enum Reply {
    Channel(oneshot::Sender<DetectionReport>),
    Callback(ReportCallback),
}

impl Reply {
    fn deliver(self, report: DetectionReport) {
        match self {
            Reply::Channel(sender) => {
                if sender.send(report).is_err() {
                    tracing::trace!("Detection result dropped, caller went away");
                }
            }
            Reply::Callback(on_report) => on_report(report),
        }
    }
}

struct Job {
    frame: Frame,
    reply: Reply,
    _permit: OwnedSemaphorePermit,
}

/// Frame handed back when it could not be submitted.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("a detection is already in flight")]
    Busy(Frame),

    #[error("detector worker has stopped")]
    Stopped(Frame),
}

impl SubmitError {
    pub fn into_frame(self) -> Frame {
        match self {
            SubmitError::Busy(frame) | SubmitError::Stopped(frame) => frame,
        }
    }
}

/// Cloneable submission side of a detector worker.
///
/// At most one frame is in flight per worker. [`DetectorHandle::detect`]
/// waits for the slot; [`DetectorHandle::try_detect`] refuses instead, so a
/// camera loop can drop late frames rather than queue them.
#[derive(Clone)]
pub struct DetectorHandle {
    jobs: mpsc::Sender<Job>,
    slot: Arc<Semaphore>,
}

/// Owns the thread that runs detection passes.
pub struct DetectorWorker {
    thread: Option<JoinHandle<()>>,
}

/// Move `detector` onto a dedicated thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn(detector: Detector) -> anyhow::Result<(DetectorHandle, DetectorWorker)> {
    let (jobs, receiver) = mpsc::channel::<Job>(1);

    let thread = thread::Builder::new()
        .name("detector-worker".to_string())
        .spawn(move || run_worker(detector, receiver))?;

    let handle = DetectorHandle {
        jobs,
        slot: Arc::new(Semaphore::new(1)),
    };
    Ok((
        handle,
        DetectorWorker {
            thread: Some(thread),
        },
    ))
}

fn run_worker(mut detector: Detector, mut receiver: mpsc::Receiver<Job>) {
    tracing::debug!(
        architecture = detector.config().architecture.as_str(),
        "Detector worker started"
    );

    let mut processed = 0u64;
    while let Some(Job {
        frame,
        reply,
        _permit: permit,
    }) = receiver.blocking_recv()
    {
        let report = detector.detect_frame(&frame);
        processed += 1;
        // Free the slot before the caller can observe the report
        drop(permit);
        reply.deliver(report);
    }

    tracing::debug!(processed, "Detector worker stopped");
}

impl DetectorHandle {
    /// Submit `frame`, waiting until no other detection is in flight.
    pub async fn detect(&self, frame: Frame) -> DetectionReport {
        match self.submit(frame).await {
            Ok(pending) => pending.await,
            Err(_) => stopped_report(),
        }
    }

    /// Wait for the slot, then hand `frame` to the worker without waiting
    /// for its report.
    pub async fn submit(&self, frame: Frame) -> Result<PendingDetection, SubmitError> {
        match self.slot.clone().acquire_owned().await {
            Ok(permit) => self.send_pending(frame, permit),
            Err(_) => Err(SubmitError::Stopped(frame)),
        }
    }

    /// Submit `frame` only if the worker is idle. The returned future resolves
    /// to the report.
    pub fn try_detect(&self, frame: Frame) -> Result<PendingDetection, SubmitError> {
        match self.slot.clone().try_acquire_owned() {
            Ok(permit) => self.send_pending(frame, permit),
            Err(_) => Err(SubmitError::Busy(frame)),
        }
    }

    /// Callback flavor of [`DetectorHandle::try_detect`], usable without a
    /// tokio runtime. `on_report` runs on the worker thread once the report is
    /// ready and holds up the next frame until it returns.
    pub fn detect_with<F>(&self, frame: Frame, on_report: F) -> Result<(), SubmitError>
    where
        F: FnOnce(DetectionReport) + Send + 'static,
    {
        match self.slot.clone().try_acquire_owned() {
            Ok(permit) => self.send_job(frame, Reply::Callback(Box::new(on_report)), permit),
            Err(_) => Err(SubmitError::Busy(frame)),
        }
    }

    /// True when a detection is in flight.
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    fn send_pending(
        &self,
        frame: Frame,
        permit: OwnedSemaphorePermit,
    ) -> Result<PendingDetection, SubmitError> {
        let (sender, receiver) = oneshot::channel();
        self.send_job(frame, Reply::Channel(sender), permit)?;
        Ok(PendingDetection { receiver })
    }

    fn send_job(
        &self,
        frame: Frame,
        reply: Reply,
        permit: OwnedSemaphorePermit,
    ) -> Result<(), SubmitError> {
        let job = Job {
            frame,
            reply,
            _permit: permit,
        };

        // The permit guarantees the channel slot is free
        match self.jobs.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(job))
            | Err(mpsc::error::TrySendError::Full(job)) => Err(SubmitError::Stopped(job.frame)),
        }
    }
}

/// Report of a submitted frame, resolved exactly once.
pub struct PendingDetection {
    receiver: oneshot::Receiver<DetectionReport>,
}

impl Future for PendingDetection {
    type Output = DetectionReport;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| stopped_report()))
    }
}

fn stopped_report() -> DetectionReport {
    DetectionReport::failed(DetectStatus::WorkerStopped, Duration::ZERO)
}

impl DetectorWorker {
    /// Wait for the worker thread to finish. Drop every handle first.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Detector worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InferenceBackend, ModelOutputs};
    use crate::config::DetectorConfig;
    use crate::processing::Architecture;
    use ndarray::ArrayViewD;
    use std::sync::mpsc as std_mpsc;

    /// Blocks each inference until the test releases it
    struct GatedBackend {
        gate: std_mpsc::Receiver<()>,
    }

    impl InferenceBackend for GatedBackend {
        fn load_model(_path: &str) -> anyhow::Result<Self> {
            anyhow::bail!("gated backend is built in tests")
        }

        fn infer(&mut self, _input: &ArrayViewD<f32>) -> anyhow::Result<ModelOutputs> {
            self.gate.recv()?;
            Ok(ModelOutputs::default())
        }
    }

    fn gated_detector() -> (Detector, std_mpsc::Sender<()>) {
        let (release, gate) = std_mpsc::channel();
        let config = DetectorConfig::new(Architecture::AnchorGrid, "unused");
        (Detector::with_backend(config, GatedBackend { gate }), release)
    }

    fn frame() -> Frame {
        Frame::filled(16, 16, [10, 20, 30])
    }

    #[tokio::test]
    async fn test_try_detect_drops_while_busy() {
        let (detector, release) = gated_detector();
        let (handle, worker) = spawn(detector).unwrap();

        let pending = handle.try_detect(frame()).unwrap();
        assert!(handle.is_busy());

        match handle.try_detect(frame()) {
            Err(SubmitError::Busy(returned)) => assert_eq!(returned.width, 16),
            _ => panic!("Second frame should be refused while busy"),
        }

        release.send(()).unwrap();
        let report = pending.await;
        // Empty outputs: no confidence tensor, so the decoder flags it
        assert_eq!(report.status, DetectStatus::MalformedOutput);
        assert!(!handle.is_busy());

        drop(handle);
        drop(release);
        worker.join();
    }

    #[tokio::test]
    async fn test_detect_waits_for_slot() {
        let (detector, release) = gated_detector();
        let (handle, worker) = spawn(detector).unwrap();

        let first = handle.try_detect(frame()).unwrap();
        let second_handle = handle.clone();
        let second = tokio::spawn(async move { second_handle.detect(frame()).await });

        release.send(()).unwrap();
        release.send(()).unwrap();

        assert_eq!(first.await.status, DetectStatus::MalformedOutput);
        assert_eq!(second.await.unwrap().status, DetectStatus::MalformedOutput);

        drop(handle);
        worker.join();
    }

    #[tokio::test]
    async fn test_detect_with_callback() {
        let (detector, release) = gated_detector();
        let (handle, worker) = spawn(detector).unwrap();
        let (tx, rx) = oneshot::channel();

        handle
            .detect_with(frame(), move |report| {
                let _ = tx.send(report.detections.len());
            })
            .unwrap();
        release.send(()).unwrap();

        assert_eq!(rx.await.unwrap(), 0);

        drop(handle);
        worker.join();
    }

    #[test]
    fn test_detect_with_outside_runtime() {
        let (detector, release) = gated_detector();
        let (handle, worker) = spawn(detector).unwrap();
        let (tx, rx) = std_mpsc::channel();

        // Plain thread, no tokio runtime in scope
        let submitter = handle.clone();
        let submitted = thread::spawn(move || {
            submitter.detect_with(frame(), move |report| {
                let _ = tx.send((report.status, thread::current().name().map(String::from)));
            })
        })
        .join()
        .unwrap();
        assert!(submitted.is_ok());

        match handle.detect_with(frame(), |_| {}) {
            Err(SubmitError::Busy(_)) => {}
            _ => panic!("Second frame should be refused while busy"),
        }

        release.send(()).unwrap();
        let (status, thread_name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status, DetectStatus::MalformedOutput);
        assert_eq!(thread_name.as_deref(), Some("detector-worker"));

        drop(handle);
        drop(release);
        worker.join();
    }

    #[tokio::test]
    async fn test_worker_panic_resolves_as_stopped() {
        struct PanickingBackend;

        impl InferenceBackend for PanickingBackend {
            fn load_model(_path: &str) -> anyhow::Result<Self> {
                Ok(Self)
            }

            fn infer(&mut self, _input: &ArrayViewD<f32>) -> anyhow::Result<ModelOutputs> {
                panic!("runtime aborted")
            }
        }

        let config = DetectorConfig::new(Architecture::AnchorGrid, "unused");
        let (handle, worker) = spawn(Detector::with_backend(config, PanickingBackend)).unwrap();

        let report = handle.detect(frame()).await;
        assert_eq!(report.status, DetectStatus::WorkerStopped);

        // Later submissions keep resolving instead of hanging
        let again = handle.detect(frame()).await;
        assert_eq!(again.status, DetectStatus::WorkerStopped);

        drop(handle);
        worker.join();
    }
}
