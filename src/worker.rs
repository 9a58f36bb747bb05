use crate::capture::UploadSink;
use crate::http::HttpTransport;
use crate::protocol::UploadRequest;
use crate::{Result, ScenelockError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const JOB_QUEUE_DEPTH: usize = 8;
const COMPLETION_QUEUE_DEPTH: usize = 64;

/// Blocking network operations executed off the tick thread.
pub trait Transport: Send + 'static {
    /// Upload and return the body of a successful response.
    fn upload(&self, request: &UploadRequest) -> Result<String>;
    fn ping(&self) -> Result<bool>;
}

impl Transport for HttpTransport {
    fn upload(&self, request: &UploadRequest) -> Result<String> {
        HttpTransport::upload(self, request)
    }

    fn ping(&self) -> Result<bool> {
        HttpTransport::ping(self)
    }
}

/// Finished network operation.
#[derive(Debug)]
pub enum WorkerEvent {
    Uploaded { request_id: u64, result: Result<String> },
    Pinged(Result<bool>),
}

/// Asynchronous uploader as seen by a session: requests go in through
/// [`UploadSink::send`], completions come out of [`Uploader::poll`].
pub trait Uploader: UploadSink {
    fn ping(&mut self) -> Result<()>;
    /// Next completion, without blocking.
    fn poll(&mut self) -> Option<WorkerEvent>;
}

enum Job {
    Upload(UploadRequest),
    Ping,
}

/// Background thread running uploads and pings one at a time.
pub struct UploadWorker {
    jobs: Sender<Job>,
    completions: Receiver<WorkerEvent>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl UploadWorker {
    pub fn start<T: Transport>(transport: T) -> Result<UploadWorker> {
        let (jobs, job_rx) = crossbeam_channel::bounded(JOB_QUEUE_DEPTH);
        let (done_tx, completions) = crossbeam_channel::bounded(COMPLETION_QUEUE_DEPTH);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("scenelock-upload".into())
            .spawn(move || {
                worker_loop(transport, job_rx, done_tx, stop_clone);
            })
            .map_err(|e| ScenelockError::Network(format!("Failed to spawn upload thread: {}", e)))?;

        Ok(UploadWorker {
            jobs,
            completions,
            stop_flag,
            thread: Some(thread),
        })
    }

    /// Worker over the HTTP transport for `upload_url`.
    pub fn http(upload_url: &str, timeout: Duration) -> Result<UploadWorker> {
        Self::start(HttpTransport::new(upload_url, timeout)?)
    }

    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.completions.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.completions.recv_timeout(timeout).ok()
    }

    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
    }

    /// Stop the worker. A request in progress runs to completion first.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn submit(&self, job: Job) -> Result<()> {
        if !self.is_active() {
            return Err(ScenelockError::WorkerStopped);
        }
        self.jobs.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => ScenelockError::Busy,
            TrySendError::Disconnected(_) => ScenelockError::WorkerStopped,
        })
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl UploadSink for UploadWorker {
    fn send(&mut self, request: UploadRequest) -> Result<()> {
        self.submit(Job::Upload(request))
    }
}

impl Uploader for UploadWorker {
    fn ping(&mut self) -> Result<()> {
        self.submit(Job::Ping)
    }

    fn poll(&mut self) -> Option<WorkerEvent> {
        self.try_recv()
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<T: Transport>(
    transport: T,
    jobs: Receiver<Job>,
    completions: Sender<WorkerEvent>,
    stop_flag: Arc<AtomicBool>,
) {
    log::info!("Upload worker started");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("Upload worker stopping (stop flag set)");
            break;
        }

        // 100ms timeout to periodically check the stop flag
        let job = match jobs.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let event = match job {
            Job::Upload(request) => {
                log::debug!("Uploading #{} ({} bytes)", request.id, request.image.bytes.len());
                let result = transport.upload(&request);
                if let Err(e) = &result {
                    log::warn!("Upload #{} failed: {}", request.id, e);
                }
                WorkerEvent::Uploaded {
                    request_id: request.id,
                    result,
                }
            }
            Job::Ping => WorkerEvent::Pinged(transport.ping()),
        };

        if completions.send(event).is_err() {
            log::info!("Completion channel disconnected, stopping upload worker");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EncodedImage, FrameSelection};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeTransport {
        uploads: Arc<Mutex<Vec<u64>>>,
        finished: Arc<Mutex<usize>>,
        fail: bool,
        delay: Duration,
    }

    impl Transport for FakeTransport {
        fn upload(&self, request: &UploadRequest) -> Result<String> {
            self.uploads.lock().unwrap().push(request.id);
            std::thread::sleep(self.delay);
            *self.finished.lock().unwrap() += 1;
            if self.fail {
                Err(ScenelockError::Network("unreachable".into()))
            } else {
                Ok(r#"{"success":false}"#.into())
            }
        }

        fn ping(&self) -> Result<bool> {
            Ok(!self.fail)
        }
    }

    fn request(id: u64) -> UploadRequest {
        let image = EncodedImage::png(vec![1, 2, 3], 2, 2);
        UploadRequest {
            id,
            metadata: crate::protocol::build_metadata(
                0,
                &crate::types::DevicePose::identity(),
                &image,
                None,
                &FrameSelection::default(),
                &Default::default(),
            ),
            image,
            album_first: false,
        }
    }

    #[test]
    fn test_upload_completion_delivered() {
        let transport = FakeTransport::default();
        let mut worker = UploadWorker::start(transport.clone()).unwrap();
        worker.send(request(3)).unwrap();
        match worker.recv_timeout(Duration::from_secs(2)) {
            Some(WorkerEvent::Uploaded { request_id, result }) => {
                assert_eq!(request_id, 3);
                assert!(result.unwrap().contains("success"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(*transport.uploads.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_failures_are_reported_not_fatal() {
        let transport = FakeTransport {
            fail: true,
            ..FakeTransport::default()
        };
        let mut worker = UploadWorker::start(transport).unwrap();
        worker.send(request(1)).unwrap();
        let Some(WorkerEvent::Uploaded { result, .. }) = worker.recv_timeout(Duration::from_secs(2))
        else {
            panic!("no completion");
        };
        assert!(matches!(result, Err(ScenelockError::Network(_))));

        worker.ping().unwrap();
        let Some(WorkerEvent::Pinged(result)) = worker.recv_timeout(Duration::from_secs(2)) else {
            panic!("no ping completion");
        };
        assert!(!result.unwrap());
        assert!(worker.is_active());
    }

    #[test]
    fn test_drop_lets_in_progress_request_finish() {
        let transport = FakeTransport {
            delay: Duration::from_millis(200),
            ..FakeTransport::default()
        };
        let mut worker = UploadWorker::start(transport.clone()).unwrap();
        worker.send(request(9)).unwrap();
        for _ in 0..100 {
            if !transport.uploads.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        drop(worker);
        assert_eq!(*transport.uploads.lock().unwrap(), vec![9]);
        assert_eq!(*transport.finished.lock().unwrap(), 1);
    }
}
