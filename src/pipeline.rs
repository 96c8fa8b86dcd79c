//! Bounded-concurrency image acquisition
//!
//! [`ImageAcquisitionPipeline::process`] submits one task per search result to a
//! [`ConcurrencyPool`]. Each task walks the same states:
//!
//! ```text
//! Pending → Fetching → {FetchFailed | Fetched}
//!         → Transforming → {TransformFailed | Transformed}
//!         → [Postprocessing → {PostprocessFailed}] → Done
//! ```
//!
//! Only `Done` yields an [`ImageDescriptor`]. Any other terminal state is logged,
//! reported as [`Event::ItemFailed`], and leaves no files behind.
//!
//! When the overall timeout elapses, `process` stops waiting and returns the
//! descriptors completed so far. Outstanding tasks keep running in the background,
//! post-process included, and keep their files; their descriptors are only seen
//! through [`Event::ItemAcquired`].

use crate::error::{Error, Result};
use crate::pool::ConcurrencyPool;
use crate::transform::{self, TransformedImage};
use crate::types::{Event, ImageDescriptor, NormalizedResult, PipelineConfig, TaskState};
use async_trait::async_trait;
use futures::FutureExt;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Where image bytes come from
///
/// Abstracted so the pipeline can be exercised without a network.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Download the bytes at `url`. Non-success statuses are errors.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`ImageSource`] over HTTP(S)
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    /// Create a source sending `user_agent` with every request
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(Error::Network)?;
        Ok(Self { client })
    }

    /// Create a source from an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::InvalidRequest(format!("invalid image url '{url}': {e}")))?;
        // Only http and https schemes
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidRequest(format!(
                "image url scheme '{}' is not supported",
                parsed.scheme()
            )));
        }

        let response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Downloads, transforms, persists and optionally post-processes search results
pub struct ImageAcquisitionPipeline {
    source: Arc<dyn ImageSource>,
    max_concurrent: usize,
}

impl ImageAcquisitionPipeline {
    /// Create a pipeline acquiring at most `max_concurrent` images at once
    pub fn new(source: Arc<dyn ImageSource>, max_concurrent: usize) -> Self {
        Self {
            source,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// The concurrency bound
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Acquire every result and return the descriptors of the ones that fully succeeded.
    ///
    /// Descriptors come back in completion order; correlate them with the input
    /// through `source_url`. Item failures never surface here.
    pub async fn process(
        &self,
        results: Vec<NormalizedResult>,
        config: &PipelineConfig,
    ) -> Vec<ImageDescriptor> {
        if results.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let total = results.len();

        if let Err(e) = tokio::fs::create_dir_all(&config.output_dir).await {
            // Every task will fail at persist; they still run so each failure is reported
            tracing::error!(
                output_dir = %config.output_dir.display(),
                error = %e,
                "cannot create output directory"
            );
        }

        let run = Arc::new(RunContext {
            source: Arc::clone(&self.source),
            config: config.clone(),
            collected: Mutex::new(Some(Vec::new())),
        });

        let pool = ConcurrencyPool::new(self.max_concurrent);
        for (index, result) in results.into_iter().enumerate() {
            tracing::trace!(index, state = %TaskState::Pending);
            pool.submit(run_task(Arc::clone(&run), index, result));
        }

        match config.overall_timeout {
            Some(limit) => {
                if !pool.join_timeout(limit).await {
                    tracing::warn!(
                        timeout_secs = limit.as_secs_f64(),
                        active = pool.active(),
                        pending = pool.pending(),
                        "overall timeout elapsed, returning partial results"
                    );
                }
            }
            None => pool.join().await,
        }

        // Taking the list closes the run; later finishers are not reported here
        let descriptors = run.lock_collected().take().unwrap_or_default();

        tracing::info!(
            requested = total,
            acquired = descriptors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "acquisition finished"
        );
        descriptors
    }
}

/// State shared by every task of one `process` call
struct RunContext {
    source: Arc<dyn ImageSource>,
    config: PipelineConfig,
    /// `None` once `process` has returned
    collected: Mutex<Option<Vec<ImageDescriptor>>>,
}

impl RunContext {
    fn lock_collected(&self) -> std::sync::MutexGuard<'_, Option<Vec<ImageDescriptor>>> {
        self.collected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.config.events {
            // Sending fails only when nobody is subscribed
            let _ = events.send(event);
        }
    }
}

/// Why a task ended without a descriptor
#[derive(Debug)]
struct TaskFailure {
    state: TaskState,
    error: Error,
}

impl TaskFailure {
    fn new(state: TaskState, error: Error) -> Self {
        Self { state, error }
    }
}

async fn run_task(run: Arc<RunContext>, index: usize, result: NormalizedResult) -> Result<()> {
    match acquire(&run, index, &result).await {
        Ok(descriptor) => {
            let reported = match run.lock_collected().as_mut() {
                Some(collected) => {
                    collected.push(descriptor.clone());
                    true
                }
                None => false,
            };

            if reported {
                tracing::debug!(index, url = %result.url, state = %TaskState::Done, "image acquired");
            } else {
                tracing::debug!(
                    index,
                    url = %result.url,
                    state = %TaskState::Done,
                    "image acquired after overall timeout, not in returned list"
                );
            }
            run.emit(Event::ItemAcquired { index, descriptor });
        }
        Err(TaskFailure { state, error }) => {
            tracing::warn!(
                index,
                url = %result.url,
                state = %state,
                error = %error,
                "image acquisition failed"
            );
            run.emit(Event::ItemFailed {
                index,
                url: result.url.clone(),
                state,
                error: error.to_string(),
            });
        }
    }
    Ok(())
}

async fn acquire(
    run: &RunContext,
    index: usize,
    result: &NormalizedResult,
) -> std::result::Result<ImageDescriptor, TaskFailure> {
    let config = &run.config;

    tracing::trace!(index, state = %TaskState::Fetching);
    let bytes = with_timeout(config.per_item_timeout, run.source.fetch(&result.url))
        .await
        .map_err(|e| TaskFailure::new(TaskState::FetchFailed, e))?;
    tracing::trace!(index, state = %TaskState::Fetched, bytes = bytes.len());

    tracing::trace!(index, state = %TaskState::Transforming);
    let policy = config.resize_policy;
    let transformed = tokio::task::spawn_blocking(move || transform::transform(&bytes, &policy))
        .await
        .map_err(|e| Error::Other(format!("transform task aborted: {e}")))
        .and_then(|r| r)
        .map_err(|e| TaskFailure::new(TaskState::TransformFailed, e))?;

    let descriptor = persist(&config.output_dir, index, result, &transformed)
        .await
        .map_err(|e| {
            tracing::debug!(index, output_dir = %config.output_dir.display(), error = %e, "persist failed");
            TaskFailure::new(TaskState::TransformFailed, e)
        })?;
    tracing::trace!(index, state = %TaskState::Transformed);

    if let Some(callback) = &config.postprocess_callback {
        tracing::trace!(index, state = %TaskState::Postprocessing, module = callback.name());
        let call = callback.process(
            &descriptor,
            &config.callback_extra_params,
            config.events.as_ref(),
        );
        let outcome = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Callback(format!("{} panicked", callback.name()))),
        };
        if let Err(e) = outcome {
            remove_files(&descriptor_paths(&descriptor)).await;
            return Err(TaskFailure::new(TaskState::PostprocessFailed, e));
        }
    }

    Ok(descriptor)
}

async fn with_timeout<F>(limit: Option<Duration>, fut: F) -> Result<Vec<u8>>
where
    F: Future<Output = Result<Vec<u8>>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(Error::Timeout(limit))),
        None => fut.await,
    }
}

/// File stem for a task: hash of its index, image id and url
///
/// The index keeps duplicate results in one run from sharing files.
pub fn file_stem(index: usize, result: &NormalizedResult) -> String {
    let mut hasher = Sha256::new();
    hasher.update((index as u64).to_be_bytes());
    hasher.update([0]);
    hasher.update(result.image_id.as_bytes());
    hasher.update([0]);
    hasher.update(result.url.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// Write the three variants; on failure, remove whatever was already written
async fn persist(
    output_dir: &Path,
    index: usize,
    result: &NormalizedResult,
    image: &TransformedImage,
) -> Result<ImageDescriptor> {
    let stem = file_stem(index, result);
    let orig = output_dir.join(format!("{stem}.{}", image.original_extension()));
    let thumb = output_dir.join(format!("{stem}-thumb.jpg"));
    let clean = output_dir.join(format!("{stem}-clean.{}", image.clean_extension()));

    let files = [
        (&orig, &image.original_bytes),
        (&thumb, &image.thumbnail_bytes),
        (&clean, &image.clean_bytes),
    ];
    let mut written: Vec<PathBuf> = Vec::with_capacity(files.len());
    for (path, bytes) in files {
        if let Err(e) = tokio::fs::write(path, bytes).await {
            tracing::warn!(path = %path.display(), error = %e, "write failed, rolling back");
            remove_files(&written).await;
            return Err(Error::Io(std::io::Error::new(
                e.kind(),
                format!("cannot write {}: {e}", path.display()),
            )));
        }
        written.push(path.clone());
    }

    Ok(ImageDescriptor {
        source_url: result.url.clone(),
        orig_fn: orig.to_string_lossy().into_owned(),
        thumb_fn: thumb.to_string_lossy().into_owned(),
        clean_fn: clean.to_string_lossy().into_owned(),
    })
}

fn descriptor_paths(descriptor: &ImageDescriptor) -> Vec<PathBuf> {
    [&descriptor.orig_fn, &descriptor.thumb_fn, &descriptor.clean_fn]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::PostProcessor;
    use crate::transform::tests::png_bytes;
    use crate::types::ResizePolicy;
    use serde_json::{Map, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// In-memory image source
    struct FakeSource {
        image: Vec<u8>,
        delay: Duration,
        slow: HashSet<String>,
        failing: HashSet<String>,
        garbage: HashSet<String>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                image: png_bytes(120, 80),
                delay: Duration::ZERO,
                slow: HashSet::new(),
                failing: HashSet::new(),
                garbage: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.slow.contains(url) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.failing.contains(url) {
                return Err(Error::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                });
            }
            if self.garbage.contains(url) {
                return Ok(b"<html>404</html>".to_vec());
            }
            Ok(self.image.clone())
        }
    }

    /// Records every descriptor it sees; fails for one url if asked to
    #[derive(Default)]
    struct RecordingCallback {
        seen: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl PostProcessor for RecordingCallback {
        fn name(&self) -> &str {
            "recording"
        }

        async fn process(
            &self,
            descriptor: &ImageDescriptor,
            extra_params: &Map<String, Value>,
            _events: Option<&broadcast::Sender<Event>>,
        ) -> Result<()> {
            assert_eq!(extra_params.get("tag"), Some(&Value::from("t1")));
            assert!(Path::new(&descriptor.clean_fn).exists());
            self.seen.lock().unwrap().push(descriptor.source_url.clone());
            if self.fail_for.as_deref() == Some(descriptor.source_url.as_str()) {
                return Err(Error::Callback("backend refused".into()));
            }
            Ok(())
        }
    }

    fn results(n: usize) -> Vec<NormalizedResult> {
        (0..n)
            .map(|i| NormalizedResult {
                url: format!("http://img.test/{i}.png"),
                image_id: format!("id-{i}"),
                title: format!("image {i}"),
            })
            .collect()
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn extra_params() -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert("tag".into(), Value::from("t1"));
        extra
    }

    #[tokio::test]
    async fn unreachable_url_is_dropped_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(64, 48)))
            .mount(&server)
            .await;

        let mut inputs: Vec<NormalizedResult> = (0..9)
            .map(|i| NormalizedResult {
                url: format!("{}/images/{i}.png", server.uri()),
                image_id: i.to_string(),
                title: String::new(),
            })
            .collect();
        inputs.insert(
            4,
            NormalizedResult {
                url: "http://127.0.0.1:1/unreachable.png".into(),
                image_id: "dead".into(),
                title: String::new(),
            },
        );

        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(HttpImageSource::new("imsearch-dl-test").unwrap());
        let pipeline = ImageAcquisitionPipeline::new(source, 4);

        let descriptors = pipeline
            .process(inputs, &PipelineConfig::new(dir.path()))
            .await;

        assert_eq!(descriptors.len(), 9);
        assert!(
            descriptors
                .iter()
                .all(|d| !d.source_url.contains("unreachable"))
        );
        assert_eq!(file_count(dir.path()), 27);
    }

    #[tokio::test]
    async fn http_error_status_fails_only_that_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/present.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(10, 10)))
            .mount(&server)
            .await;

        let source = HttpImageSource::new("imsearch-dl-test").unwrap();
        let err = source
            .fetch(&format!("{}/missing.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));

        let bytes = source
            .fetch(&format!("{}/present.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, png_bytes(10, 10));
    }

    #[tokio::test]
    async fn non_http_urls_are_rejected_without_a_request() {
        let source = HttpImageSource::new("imsearch-dl-test").unwrap();

        let err = source.fetch("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let err = source.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn every_descriptor_has_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ImageAcquisitionPipeline::new(Arc::new(FakeSource::new()), 3);

        let mut config = PipelineConfig::new(dir.path().join("nested/out"));
        config.resize_policy = ResizePolicy {
            max_width: Some(60),
            max_height: None,
        };
        let descriptors = pipeline.process(results(5), &config).await;

        assert_eq!(descriptors.len(), 5);
        for d in &descriptors {
            assert!(d.orig_fn.ends_with(".png"), "{}", d.orig_fn);
            assert!(d.thumb_fn.ends_with("-thumb.jpg"));
            assert!(d.clean_fn.ends_with("-clean.jpg"));

            let thumb = image::open(&d.thumb_fn).unwrap();
            assert!(thumb.width() <= 90 && thumb.height() <= 90);
            let clean = image::open(&d.clean_fn).unwrap();
            assert!(clean.width() <= 60);
            assert!(Path::new(&d.orig_fn).exists());
        }

        let names: HashSet<_> = descriptors.iter().map(|d| d.orig_fn.clone()).collect();
        assert_eq!(names.len(), 5, "filenames must not collide");
    }

    #[tokio::test]
    async fn duplicate_results_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ImageAcquisitionPipeline::new(Arc::new(FakeSource::new()), 2);

        let same = results(1).remove(0);
        let descriptors = pipeline
            .process(vec![same.clone(), same], &PipelineConfig::new(dir.path()))
            .await;

        assert_eq!(descriptors.len(), 2);
        assert_ne!(descriptors[0].orig_fn, descriptors[1].orig_fn);
        assert_eq!(file_count(dir.path()), 6);
    }

    #[tokio::test]
    async fn undecodable_bytes_leave_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new();
        source.garbage.insert("http://img.test/2.png".into());
        let pipeline = ImageAcquisitionPipeline::new(Arc::new(source), 4);

        let (events, mut rx) = broadcast::channel(64);
        let mut config = PipelineConfig::new(dir.path());
        config.events = Some(events);

        let descriptors = pipeline.process(results(4), &config).await;

        assert_eq!(descriptors.len(), 3);
        assert_eq!(file_count(dir.path()), 9);

        let mut failures = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::ItemFailed { index, state, .. } = event {
                failures.push((index, state));
            }
        }
        assert_eq!(failures, vec![(2, TaskState::TransformFailed)]);
    }

    #[tokio::test]
    async fn per_item_timeout_fails_slow_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new();
        source.slow.insert("http://img.test/1.png".into());
        let pipeline = ImageAcquisitionPipeline::new(Arc::new(source), 4);

        let (events, mut rx) = broadcast::channel(64);
        let mut config = PipelineConfig::new(dir.path());
        config.per_item_timeout = Some(Duration::from_millis(200));
        config.events = Some(events);

        let started = Instant::now();
        let descriptors = pipeline.process(results(3), &config).await;

        assert_eq!(descriptors.len(), 2);
        assert!(started.elapsed() < Duration::from_secs(3));

        let mut acquired = 0;
        let mut timed_out = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::ItemAcquired { .. } => acquired += 1,
                Event::ItemFailed {
                    index, state, error, ..
                } => timed_out = Some((index, state, error)),
                Event::ImagePathReturned { .. } => {}
            }
        }
        assert_eq!(acquired, 2);
        let (index, state, error) = timed_out.unwrap();
        assert_eq!(index, 1);
        assert_eq!(state, TaskState::FetchFailed);
        assert!(error.contains("timed out"), "{error}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overall_timeout_returns_completed_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new();
        source.image = png_bytes(16, 16);
        source.delay = Duration::from_secs(1);
        let source = Arc::new(source);
        let pipeline = ImageAcquisitionPipeline::new(source.clone(), 50);

        let mut config = PipelineConfig::new(dir.path());
        config.overall_timeout = Some(Duration::from_millis(1500));

        let started = Instant::now();
        let descriptors = pipeline.process(results(100), &config).await;
        let elapsed = started.elapsed();

        assert_eq!(descriptors.len(), 50, "first wave completes, second is cut");
        assert!(elapsed >= Duration::from_millis(1400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1900), "{elapsed:?}");

        // The second wave keeps running after the call returned and keeps its files
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 100);
        assert_eq!(file_count(dir.path()), 300);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn abandoned_tasks_finish_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new();
        source.image = png_bytes(16, 16);
        source.delay = Duration::from_secs(1);
        let source = Arc::new(source);
        let pipeline = ImageAcquisitionPipeline::new(source.clone(), 2);

        let callback = Arc::new(RecordingCallback::default());
        let (events, mut rx) = broadcast::channel(64);
        let mut config = PipelineConfig::new(dir.path());
        config.overall_timeout = Some(Duration::from_millis(500));
        config.postprocess_callback = Some(callback.clone());
        config.callback_extra_params = extra_params();
        config.events = Some(events);

        let started = Instant::now();
        let descriptors = pipeline.process(results(4), &config).await;

        assert!(descriptors.is_empty());
        assert!(started.elapsed() < Duration::from_millis(900));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(callback.seen.lock().unwrap().len(), 4, "post-process still runs");
        assert_eq!(file_count(dir.path()), 12);

        let mut acquired: Vec<usize> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                Event::ItemAcquired { index, descriptor } => {
                    assert!(Path::new(&descriptor.clean_fn).exists());
                    Some(index)
                }
                _ => None,
            })
            .collect();
        acquired.sort();
        assert_eq!(acquired, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn callback_runs_once_per_transformed_item() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new();
        source.failing.insert("http://img.test/0.png".into());
        let pipeline = ImageAcquisitionPipeline::new(Arc::new(source), 3);

        let callback = Arc::new(RecordingCallback::default());
        let mut config = PipelineConfig::new(dir.path());
        config.postprocess_callback = Some(callback.clone());
        config.callback_extra_params = extra_params();

        let descriptors = pipeline.process(results(6), &config).await;
        assert_eq!(descriptors.len(), 5);

        let mut seen = callback.seen.lock().unwrap().clone();
        seen.sort();
        let mut expected: Vec<String> = (1..6).map(|i| format!("http://img.test/{i}.png")).collect();
        expected.sort();
        assert_eq!(seen, expected, "exactly once per transformed item");
    }

    #[tokio::test]
    async fn callback_runs_only_for_the_run_that_configures_it() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ImageAcquisitionPipeline::new(Arc::new(FakeSource::new()), 3);
        let callback = Arc::new(RecordingCallback::default());

        let mut with_callback = PipelineConfig::new(dir.path().join("with"));
        with_callback.postprocess_callback = Some(callback.clone());
        with_callback.callback_extra_params = extra_params();
        // Same extra params, no callback
        let mut without_callback = PipelineConfig::new(dir.path().join("without"));
        without_callback.callback_extra_params = extra_params();

        let plain = pipeline.process(results(4), &without_callback).await;
        assert_eq!(plain.len(), 4);
        assert!(callback.seen.lock().unwrap().is_empty());

        let processed = pipeline.process(results(3), &with_callback).await;
        assert_eq!(processed.len(), 3);
        assert_eq!(callback.seen.lock().unwrap().len(), 3);

        let again = pipeline.process(results(2), &without_callback).await;
        assert_eq!(again.len(), 2);
        assert_eq!(callback.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failing_callback_only_fails_its_item() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ImageAcquisitionPipeline::new(Arc::new(FakeSource::new()), 2);

        let callback = Arc::new(RecordingCallback {
            seen: Mutex::new(Vec::new()),
            fail_for: Some("http://img.test/3.png".into()),
        });
        let (events, mut rx) = broadcast::channel(64);
        let mut config = PipelineConfig::new(dir.path());
        config.postprocess_callback = Some(callback.clone());
        config.callback_extra_params = extra_params();
        config.events = Some(events);

        let descriptors = pipeline.process(results(5), &config).await;

        assert_eq!(descriptors.len(), 4);
        assert!(
            descriptors
                .iter()
                .all(|d| d.source_url != "http://img.test/3.png")
        );
        assert_eq!(callback.seen.lock().unwrap().len(), 5);
        assert_eq!(file_count(dir.path()), 12, "failed item's files are removed");

        let failed: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                Event::ItemFailed { index, state, .. } => Some((index, state)),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec![(3, TaskState::PostprocessFailed)]);
    }

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let source = Arc::new(FakeSource::new());
        let pipeline = ImageAcquisitionPipeline::new(source.clone(), 2);

        let descriptors = pipeline
            .process(Vec::new(), &PipelineConfig::new("/nonexistent/never-created"))
            .await;

        assert!(descriptors.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unwritable_output_dir_yields_no_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let pipeline = ImageAcquisitionPipeline::new(Arc::new(FakeSource::new()), 2);
        let (events, mut rx) = broadcast::channel(64);
        let mut config = PipelineConfig::new(blocker.join("out"));
        config.events = Some(events);
        let descriptors = pipeline.process(results(3), &config).await;

        assert!(descriptors.is_empty());

        let failures: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                Event::ItemFailed { state, error, .. } => Some((state, error)),
                _ => None,
            })
            .collect();
        assert_eq!(failures.len(), 3);
        for (state, error) in failures {
            assert_eq!(state, TaskState::TransformFailed);
            assert!(error.starts_with("I/O error: cannot write "), "{error}");
            assert!(error.contains("not-a-dir"), "{error}");
        }
    }

    #[test]
    fn file_stem_is_deterministic_and_index_sensitive() {
        let result = results(1).remove(0);

        assert_eq!(file_stem(0, &result), file_stem(0, &result));
        assert_ne!(file_stem(0, &result), file_stem(1, &result));
        assert_eq!(file_stem(0, &result).len(), 32);
    }
}
