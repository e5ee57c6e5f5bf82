// THEORY:
// One video is an inherently sequential job: the novelty model is a temporal
// filter and must see its frames in order. Independent videos share nothing,
// so the throughput lever is running several of them at once.
//
// `ParallelReducer` is a small actor system:
// 1.  **Dispatcher**: a single task receives submitted jobs and hands them to the
//     workers round-robin.
// 2.  **Workers**: a fixed number of long-lived tasks. Each builds a fresh
//     `VideoReducer` for every job, so no model state can leak between videos,
//     and runs it on tokio's blocking pool because the work is pure CPU.
// 3.  **Replies**: every job carries its own oneshot channel. The caller awaits
//     exactly its own result, and `reduce_all` returns results in submission
//     order regardless of which video finished first.
// A shared stop flag reaches every running reducer; each one finalises its
// partial output at its next sampled frame.
//
// Jobs built with `VideoJob::deferred` are opened by the worker that runs them,
// so at most one decoder and one output per worker are open at any time.

use crate::config::ReducerConfig;
use crate::error::{ConfigError, ReduceError, ReduceResult};
use crate::pipeline::{ReductionReport, VideoReducer};
use crate::video::{VideoSink, VideoSource};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

type OpenedVideo = (Box<dyn VideoSource + Send>, Box<dyn VideoSink + Send>);
type Opener = Box<dyn FnOnce() -> Result<OpenedVideo, String> + Send>;

enum JobIo {
    Ready(OpenedVideo),
    Deferred(Opener),
}

/// One video to reduce: where to read it and where to write the result.
pub struct VideoJob {
    pub name: String,
    io: JobIo,
}

impl VideoJob {
    /// A job whose source and sink are already open.
    pub fn new(
        name: impl Into<String>,
        source: impl VideoSource + Send + 'static,
        sink: impl VideoSink + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            io: JobIo::Ready((Box::new(source), Box::new(sink))),
        }
    }

    /// A job that opens its source and sink only once a worker picks it up.
    pub fn deferred<F, V, K, E>(name: impl Into<String>, open: F) -> Self
    where
        F: FnOnce() -> Result<(V, K), E> + Send + 'static,
        V: VideoSource + Send + 'static,
        K: VideoSink + Send + 'static,
        E: std::fmt::Display,
    {
        let opener: Opener = Box::new(move || match open() {
            Ok((source, sink)) => {
                let opened: OpenedVideo = (Box::new(source), Box::new(sink));
                Ok(opened)
            }
            Err(err) => Err(format!("{err:#}")),
        });
        Self {
            name: name.into(),
            io: JobIo::Deferred(opener),
        }
    }

    fn open(name: &str, io: JobIo) -> ReduceResult<OpenedVideo> {
        match io {
            JobIo::Ready(opened) => Ok(opened),
            JobIo::Deferred(opener) => opener().map_err(|reason| ReduceError::Open {
                name: name.to_string(),
                reason,
            }),
        }
    }
}

/// The result of one job, tagged with the job's name.
#[derive(Debug)]
pub struct JobOutcome {
    pub name: String,
    pub result: ReduceResult<ReductionReport>,
}

struct ReduceTask {
    job: VideoJob,
    result_sender: oneshot::Sender<ReduceResult<ReductionReport>>,
}

struct WorkerPool {
    task_sender: mpsc::UnboundedSender<ReduceTask>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(config: ReducerConfig, worker_count: usize, stop: Arc<AtomicBool>) -> Self {
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ReduceTask>();
        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<ReduceTask>())
            .unzip();

        let mut handles = Vec::with_capacity(worker_count + 1);
        handles.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if let Err(mpsc::error::SendError(task)) = worker_senders[worker_idx].send(task) {
                    let _ = task.result_sender.send(Err(ReduceError::WorkerUnavailable(format!(
                        "worker {worker_idx} has exited"
                    ))));
                }
                worker_idx = (worker_idx + 1) % worker_senders.len();
            }
        }));

        for (worker_id, mut worker_receiver) in worker_receivers.into_iter().enumerate() {
            let worker_config = config.clone();
            let worker_stop = stop.clone();
            handles.push(tokio::spawn(async move {
                while let Some(ReduceTask { job, result_sender }) = worker_receiver.recv().await {
                    let result = Self::run_job(worker_id, job, &worker_config, &worker_stop).await;
                    let _ = result_sender.send(result);
                }
            }));
        }

        Self {
            task_sender,
            handles,
        }
    }

    async fn run_job(
        worker_id: usize,
        job: VideoJob,
        config: &ReducerConfig,
        stop: &Arc<AtomicBool>,
    ) -> ReduceResult<ReductionReport> {
        let VideoJob { name, io } = job;
        info!(worker = worker_id, job = %name, "job started");

        let config = config.clone();
        let stop = stop.clone();
        let job_name = name.clone();
        let result = tokio::task::spawn_blocking(move || -> ReduceResult<ReductionReport> {
            let mut reducer = VideoReducer::new(config)?.with_stop_flag(stop);
            let (mut source, mut sink) = VideoJob::open(&job_name, io)?;
            reducer.reduce(&mut source, &mut sink)
        })
        .await
        .unwrap_or_else(|join_err| Err(ReduceError::WorkerUnavailable(join_err.to_string())));

        match &result {
            Ok(report) => info!(
                worker = worker_id,
                job = %name,
                retained = report.retained.len(),
                "job finished"
            ),
            Err(err) => error!(worker = worker_id, job = %name, error = %err, "job failed"),
        }
        result
    }

    async fn submit(&self, job: VideoJob) -> ReduceResult<ReductionReport> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(ReduceTask { job, result_sender })
            .map_err(|_| ReduceError::WorkerUnavailable("dispatcher has exited".into()))?;

        result_receiver
            .await
            .map_err(|_| ReduceError::WorkerUnavailable("worker dropped the job".into()))?
    }
}

/// Reduces many videos concurrently on a fixed pool of workers.
///
/// Must be created from within a tokio runtime.
pub struct ParallelReducer {
    worker_pool: WorkerPool,
    worker_count: usize,
    stop: Arc<AtomicBool>,
}

impl ParallelReducer {
    /// A pool with one worker per logical CPU.
    pub fn new(config: ReducerConfig) -> Result<Self, ConfigError> {
        Self::with_workers(config, num_cpus::get())
    }

    pub fn with_workers(config: ReducerConfig, worker_count: usize) -> Result<Self, ConfigError> {
        config.validate()?;
        let worker_count = worker_count.max(1);
        let stop = Arc::new(AtomicBool::new(false));
        info!(workers = worker_count, "starting reducer pool");
        Ok(Self {
            worker_pool: WorkerPool::new(config, worker_count, stop.clone()),
            worker_count,
            stop,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// The flag every running reducer polls; setting it stops them all.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub async fn reduce(&self, job: VideoJob) -> ReduceResult<ReductionReport> {
        self.worker_pool.submit(job).await
    }

    /// Runs every job and returns the outcomes in submission order.
    pub async fn reduce_all(&self, jobs: Vec<VideoJob>) -> Vec<JobOutcome> {
        let pending = jobs.into_iter().map(|job| async move {
            let name = job.name.clone();
            let result = self.reduce(job).await;
            JobOutcome { name, result }
        });
        join_all(pending).await
    }

    /// Stops accepting jobs and waits for the workers to drain.
    pub async fn shutdown(self) {
        let WorkerPool {
            task_sender,
            handles,
        } = self.worker_pool;
        drop(task_sender);
        for handle in join_all(handles).await {
            if let Err(err) = handle {
                error!(error = %err, "reducer worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoveltyConfig;
    use crate::error::SinkError;
    use crate::video::{MemorySink, MemoryVideo};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::AtomicUsize;

    fn config() -> ReducerConfig {
        ReducerConfig {
            sampling_rate: 5,
            sample_threshold: 200,
            frame_width: 64,
            frame_height: 64,
            progress_seconds: 5,
            novelty: NoveltyConfig::default(),
        }
    }

    /// 40 frames at 10 fps with a bright block in frames `flash..flash + 5`.
    fn video_with_flash(flash: Option<u64>) -> MemoryVideo {
        let frames = (0..40u64)
            .map(|n| {
                let lit = flash.is_some_and(|start| (start..start + 5).contains(&n));
                RgbImage::from_fn(64, 64, |x, y| {
                    if lit && (17..47).contains(&x) && (17..47).contains(&y) {
                        Rgb([160; 3])
                    } else {
                        Rgb([60; 3])
                    }
                })
            })
            .collect();
        MemoryVideo::new(frames, 10.0)
    }

    #[tokio::test]
    async fn outcomes_come_back_in_submission_order() {
        let pool = ParallelReducer::with_workers(config(), 2).unwrap();
        let jobs = vec![
            VideoJob::new("flash-20", video_with_flash(Some(20)), MemorySink::new()),
            VideoJob::new("still", video_with_flash(None), MemorySink::new()),
            VideoJob::new("flash-10", video_with_flash(Some(10)), MemorySink::new()),
        ];

        let outcomes = pool.reduce_all(jobs).await;
        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["flash-20", "still", "flash-10"]);

        let retained: Vec<Vec<u64>> = outcomes
            .into_iter()
            .map(|outcome| outcome.result.unwrap().retained)
            .collect();
        assert_eq!(retained[0], (15..=20).collect::<Vec<u64>>());
        assert!(retained[1].is_empty());
        assert_eq!(retained[2], (5..=10).collect::<Vec<u64>>());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn pooled_result_matches_a_direct_run() {
        let mut direct = VideoReducer::new(config()).unwrap();
        let expected = direct
            .reduce(&mut video_with_flash(Some(20)), &mut MemorySink::new())
            .unwrap();

        let pool = ParallelReducer::with_workers(config(), 3).unwrap();
        let pooled = pool
            .reduce(VideoJob::new(
                "flash",
                video_with_flash(Some(20)),
                MemorySink::new(),
            ))
            .await
            .unwrap();
        assert_eq!(pooled, expected);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn one_failing_job_does_not_affect_the_others() {
        let pool = ParallelReducer::with_workers(config(), 2).unwrap();
        let outcomes = pool
            .reduce_all(vec![
                VideoJob::new(
                    "full-sink",
                    video_with_flash(Some(20)),
                    MemorySink::with_capacity_limit(1),
                ),
                VideoJob::new("ok", video_with_flash(Some(20)), MemorySink::new()),
            ])
            .await;

        assert!(matches!(outcomes[0].result, Err(ReduceError::Sink(_))));
        assert_eq!(outcomes[1].result.as_ref().unwrap().retained.len(), 6);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn stop_request_reaches_every_job() {
        let pool = ParallelReducer::with_workers(config(), 2).unwrap();
        pool.request_stop();
        assert!(pool.stop_flag().load(Ordering::Relaxed));

        let outcomes = pool
            .reduce_all(vec![
                VideoJob::new("a", video_with_flash(Some(20)), MemorySink::new()),
                VideoJob::new("b", video_with_flash(Some(20)), MemorySink::new()),
            ])
            .await;
        for outcome in outcomes {
            let report = outcome.result.unwrap();
            assert!(report.stopped);
            assert!(report.retained.is_empty());
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn worker_count_is_at_least_one() {
        let pool = ParallelReducer::with_workers(config(), 0).unwrap();
        assert_eq!(pool.worker_count(), 1);
        let report = pool
            .reduce(VideoJob::new("still", video_with_flash(None), MemorySink::new()))
            .await
            .unwrap();
        assert_eq!(report.frame_count, 40);
        pool.shutdown().await;
    }

    /// Tracks how many deferred videos are open at once.
    #[derive(Clone, Default)]
    struct OpenCounter {
        open: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl OpenCounter {
        fn open(&self) -> CountedSink {
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            CountedSink {
                inner: MemorySink::new(),
                open: self.open.clone(),
            }
        }
    }

    struct CountedSink {
        inner: MemorySink,
        open: Arc<AtomicUsize>,
    }

    impl VideoSink for CountedSink {
        fn append(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
            self.inner.append(frame)
        }

        fn finish(&mut self) -> Result<(), SinkError> {
            self.open.fetch_sub(1, Ordering::SeqCst);
            self.inner.finish()
        }
    }

    #[tokio::test]
    async fn deferred_jobs_are_opened_by_their_worker() {
        let pool = ParallelReducer::with_workers(config(), 2).unwrap();
        let counter = OpenCounter::default();
        let jobs = (0..6)
            .map(|n| {
                let counter = counter.clone();
                VideoJob::deferred(format!("video-{n}"), move || {
                    Ok::<_, String>((video_with_flash(Some(20)), counter.open()))
                })
            })
            .collect();

        let outcomes = pool.reduce_all(jobs).await;
        for outcome in outcomes {
            assert_eq!(outcome.result.unwrap().retained.len(), 6);
        }
        assert!(counter.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(counter.open.load(Ordering::SeqCst), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn deferred_open_failure_is_reported_per_job() {
        let pool = ParallelReducer::with_workers(config(), 2).unwrap();
        let outcomes = pool
            .reduce_all(vec![
                VideoJob::deferred("missing", || {
                    Err::<(MemoryVideo, MemorySink), _>("no such file")
                }),
                VideoJob::new("ok", video_with_flash(Some(20)), MemorySink::new()),
            ])
            .await;

        match &outcomes[0].result {
            Err(ReduceError::Open { name, reason }) => {
                assert_eq!(name, "missing");
                assert_eq!(reason, "no such file");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(outcomes[1].result.is_ok());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut bad = config();
        bad.frame_width = 0;
        assert!(ParallelReducer::with_workers(bad, 2).is_err());
    }
}
