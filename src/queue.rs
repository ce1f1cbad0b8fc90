use crate::detect::{detector_for, DetectionResult};
use crate::inject::{execute_input, upload_and_wait, UploadOutcome};
use crate::page::{Page, PastePayload};
use crate::site::{resolve_adapter, SiteAdapter};
use nanoid::nanoid;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

// ========================= Notification Surface =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// Callbacks consumed by whatever hosts the engine (a panel, a CLI, a test sink).
/// Log lines carry a severity tag; progress is completed/total; the lifecycle hooks
/// drive external timer displays.
pub trait QueueObserver: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
    fn progress(&self, completed: usize, total: usize);
    fn queue_started(&self);
    fn job_started(&self);
    fn queue_ended(&self);
}

pub struct NullObserver;

impl QueueObserver for NullObserver {
    fn log(&self, _level: LogLevel, _message: &str) {}
    fn progress(&self, _completed: usize, _total: usize) {}
    fn queue_started(&self) {}
    fn job_started(&self) {}
    fn queue_ended(&self) {}
}

/// Forwards every notification to the tracing subscriber.
pub struct TracingObserver;

impl QueueObserver for TracingObserver {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Success | LogLevel::Info => info!("{message}"),
        }
    }

    fn progress(&self, completed: usize, total: usize) {
        debug!(completed, total, "progress");
    }

    fn queue_started(&self) {
        debug!("queue started");
    }

    fn job_started(&self) {
        debug!("job started");
    }

    fn queue_ended(&self) {
        debug!("queue ended");
    }
}

// ========================= Run State =========================

#[derive(Default)]
struct RunFlags {
    running: AtomicBool,
    abort: AtomicBool,
    current_index: AtomicUsize,
    started_at: Mutex<Option<Instant>>,
    job_started_at: Mutex<Option<Instant>>,
}

/// Shared run-state handle. The executor is the only writer of progress state; the
/// external caller uses a clone to request cancellation or read timings. The abort
/// flag is monotonic within a run, so plain atomics are enough.
#[derive(Clone, Default)]
pub struct RunHandle {
    flags: Arc<RunFlags>,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self) {
        self.flags.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.flags.abort.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }

    pub fn current_index(&self) -> usize {
        self.flags.current_index.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.flags.started_at.lock().unwrap()
    }

    pub fn job_started_at(&self) -> Option<Instant> {
        *self.flags.job_started_at.lock().unwrap()
    }

    fn begin(&self) {
        self.flags.abort.store(false, Ordering::SeqCst);
        self.flags.running.store(true, Ordering::SeqCst);
        self.flags.current_index.store(0, Ordering::SeqCst);
        *self.flags.started_at.lock().unwrap() = Some(Instant::now());
    }

    fn begin_job(&self, index: usize) {
        self.flags.current_index.store(index, Ordering::SeqCst);
        *self.flags.job_started_at.lock().unwrap() = Some(Instant::now());
    }

    fn finish(&self) {
        self.flags.running.store(false, Ordering::SeqCst);
    }
}

// ========================= Jobs =========================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Job {
    Text { prompt: String },
    Image { file: PastePayload, prompt: String },
}

impl Job {
    fn prompt(&self) -> &str {
        match self {
            Job::Text { prompt } => prompt,
            Job::Image { prompt, .. } => prompt,
        }
    }

    fn label(&self, index: usize, total: usize) -> String {
        match self {
            Job::Text { .. } => format!("job {}/{}", index + 1, total),
            Job::Image { file, .. } => format!("job {}/{} ({})", index + 1, total, file.name),
        }
    }
}

/// Builds one prompt per non-blank line: trimmed prefix, line, and suffix joined with
/// newlines, empty segments omitted.
pub fn compose_prompts<'a, I>(lines: I, prefix: &str, suffix: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = prefix.trim();
    let suffix = suffix.trim();
    lines
        .into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            [prefix, line, suffix]
                .iter()
                .filter(|part| !part.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

// ========================= Outcomes =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failed,
    Timeout,
    InputFailed,
    UploadFailed,
    SurfaceLost,
}

impl JobOutcome {
    fn describe(self) -> (LogLevel, &'static str) {
        match self {
            JobOutcome::Success => (LogLevel::Success, "image generated"),
            JobOutcome::Failed => (LogLevel::Error, "generation failed or blocked"),
            JobOutcome::Timeout => (LogLevel::Warn, "watch timed out"),
            JobOutcome::InputFailed => (LogLevel::Error, "input failed, skipping"),
            JobOutcome::UploadFailed => (LogLevel::Error, "image paste failed, skipping"),
            JobOutcome::SurfaceLost => (LogLevel::Error, "page went away, skipping"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub site: String,
    pub total: usize,
    pub outcomes: Vec<JobOutcome>,
    pub aborted: bool,
    pub elapsed_ms: u128,
}

impl RunReport {
    fn empty() -> Self {
        Self {
            run_id: nanoid!(),
            site: String::new(),
            total: 0,
            outcomes: Vec::new(),
            aborted: false,
            elapsed_ms: 0,
        }
    }
}

// ========================= Config =========================

/// Every interval the engine sleeps on. The poll interval and stability window are
/// empirical, not derived, so they stay configurable.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub detect_timeout: Duration,
    pub input_retry_delay: Duration,
    pub post_input_pause: Duration,
    pub pre_detect_pause: Duration,
    pub focus_pause: Duration,
    pub upload_settle: Duration,
    pub upload_poll: Duration,
    pub post_upload_pause: Duration,
    pub poll_interval: Duration,
    pub stability_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(5_000),
            max_delay: Duration::from_millis(15_000),
            detect_timeout: Duration::from_secs(60),
            input_retry_delay: Duration::from_secs(1),
            post_input_pause: Duration::from_millis(800),
            pre_detect_pause: Duration::from_secs(1),
            focus_pause: Duration::from_millis(300),
            upload_settle: Duration::from_secs(10),
            upload_poll: Duration::from_millis(500),
            post_upload_pause: Duration::from_millis(500),
            poll_interval: Duration::from_secs(1),
            stability_window: Duration::from_secs(5),
        }
    }
}

/// Uniform draw from `[min, max]`, degenerating to `min` when the interval is empty.
pub fn draw_cooldown(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{}m{:02}s", total / 60, total % 60)
}

// ========================= Executor =========================

enum JobStep {
    Done(JobOutcome),
    Aborted,
}

/// Sequential queue executor. One job at a time; all waiting is cooperative and polls
/// the shared abort flag. Single-flight is the caller's contract: starting a second
/// run on the same handle while one is active is not supported.
pub struct Runner<P: Page> {
    page: Arc<P>,
    cfg: QueueConfig,
    observer: Arc<dyn QueueObserver>,
    handle: RunHandle,
}

impl<P: Page> Runner<P> {
    pub fn new(page: Arc<P>) -> Self {
        Self {
            page,
            cfg: QueueConfig::default(),
            observer: Arc::new(NullObserver),
            handle: RunHandle::new(),
        }
    }

    pub fn with_config(mut self, cfg: QueueConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Clone of the shared run-state handle, for cancellation and progress queries.
    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    /// Runs one text job per non-blank line of `raw_prompts`, each wrapped with the
    /// trimmed prefix/suffix.
    pub async fn run_text_queue(&self, raw_prompts: &str, prefix: &str, suffix: &str) -> RunReport {
        let prompts = compose_prompts(raw_prompts.lines(), prefix, suffix);
        if prompts.is_empty() {
            self.observer
                .log(LogLevel::Warn, "enter at least one prompt first");
            return RunReport::empty();
        }

        let site = self.resolve_site().await;
        self.observer.log(
            LogLevel::Success,
            &format!("[{}] queue started, {} jobs", site.name, prompts.len()),
        );
        if !prefix.trim().is_empty() {
            self.observer
                .log(LogLevel::Info, &format!("prefix: \"{}\"", prefix.trim()));
        }
        if !suffix.trim().is_empty() {
            self.observer
                .log(LogLevel::Info, &format!("suffix: \"{}\"", suffix.trim()));
        }

        let jobs = prompts
            .into_iter()
            .map(|prompt| Job::Text { prompt })
            .collect();
        self.run_queue(site, jobs).await
    }

    /// Pastes each file into the page, then submits the one shared conversion prompt.
    pub async fn run_image_queue(&self, files: Vec<PastePayload>, prompt: &str) -> RunReport {
        let prompt = prompt.trim();
        if files.is_empty() {
            self.observer
                .log(LogLevel::Warn, "select at least one image first");
            return RunReport::empty();
        }
        if prompt.is_empty() {
            self.observer
                .log(LogLevel::Warn, "enter a conversion prompt first");
            return RunReport::empty();
        }

        let site = self.resolve_site().await;
        self.observer.log(
            LogLevel::Success,
            &format!("[{}] image queue started, {} files", site.name, files.len()),
        );
        self.observer
            .log(LogLevel::Info, &format!("prompt: \"{prompt}\""));

        let jobs = files
            .into_iter()
            .map(|file| Job::Image {
                file,
                prompt: prompt.to_string(),
            })
            .collect();
        self.run_queue(site, jobs).await
    }

    async fn resolve_site(&self) -> &'static SiteAdapter {
        match self.page.address().await {
            Ok(url) => resolve_adapter(&url),
            Err(err) => {
                warn!(error = %err, "page address unavailable, using default adapter");
                resolve_adapter("")
            }
        }
    }

    async fn run_queue(&self, site: &'static SiteAdapter, jobs: Vec<Job>) -> RunReport {
        let run_id = nanoid!();
        let total = jobs.len();
        self.handle.begin();
        self.observer.progress(0, total);
        self.observer.queue_started();
        let started = Instant::now();
        info!(run_id = %run_id, site = site.name, total, "queue run started");

        let mut outcomes = Vec::with_capacity(total);
        let mut aborted = false;

        for (i, job) in jobs.iter().enumerate() {
            if self.handle.abort_requested() {
                self.report_stopped(i, total);
                aborted = true;
                break;
            }

            self.observer
                .log(LogLevel::Info, &format!("starting {}", job.label(i, total)));
            self.handle.begin_job(i);
            self.observer.job_started();
            let job_started = Instant::now();

            match self.run_job(site, job).await {
                JobStep::Aborted => {
                    self.report_stopped(i, total);
                    aborted = true;
                    break;
                }
                JobStep::Done(outcome) => {
                    let (level, text) = outcome.describe();
                    self.observer.log(
                        level,
                        &format!(
                            "{}: {} ({})",
                            job.label(i, total),
                            text,
                            format_elapsed(job_started.elapsed())
                        ),
                    );
                    outcomes.push(outcome);
                }
            }
            self.observer.progress(i + 1, total);

            // Cooldown between jobs only, never after the last one.
            if i + 1 < total && !self.handle.abort_requested() {
                self.cooldown(i + 1, total).await;
            }
        }

        let elapsed = started.elapsed();
        if !aborted {
            self.observer.progress(total, total);
            self.observer.log(
                LogLevel::Success,
                &format!("all jobs finished, total {}", format_elapsed(elapsed)),
            );
        }
        self.handle.finish();
        self.observer.queue_ended();
        info!(run_id = %run_id, aborted, "queue run ended");

        RunReport {
            run_id,
            site: site.name.to_string(),
            total,
            outcomes,
            aborted,
            elapsed_ms: elapsed.as_millis(),
        }
    }

    async fn run_job(&self, site: &'static SiteAdapter, job: &Job) -> JobStep {
        let page: &dyn Page = self.page.as_ref();

        if let Job::Image { file, .. } = job {
            match upload_and_wait(
                page,
                site,
                file,
                &self.cfg,
                &self.handle,
                self.observer.as_ref(),
            )
            .await
            {
                Ok(UploadOutcome::Uploaded) => sleep(self.cfg.post_upload_pause).await,
                Ok(UploadOutcome::InputNotFound) => {
                    return JobStep::Done(JobOutcome::UploadFailed)
                }
                Ok(UploadOutcome::Aborted) => return JobStep::Aborted,
                Err(err) => {
                    self.observer
                        .log(LogLevel::Error, &format!("image paste failed: {err}"));
                    return JobStep::Done(JobOutcome::UploadFailed);
                }
            }
        }

        let injected = match execute_input(
            page,
            site,
            job.prompt(),
            &self.cfg,
            self.observer.as_ref(),
        )
        .await
        {
            Ok(ok) => ok,
            Err(err) => {
                self.observer
                    .log(LogLevel::Error, &format!("input failed: {err}"));
                return JobStep::Done(JobOutcome::SurfaceLost);
            }
        };
        if !injected {
            return JobStep::Done(JobOutcome::InputFailed);
        }

        sleep(self.cfg.pre_detect_pause).await;

        let result = match detector_for(site)
            .wait(page, site, &self.cfg, &self.handle, self.observer.as_ref())
            .await
        {
            Ok(result) => result,
            Err(err) => {
                self.observer
                    .log(LogLevel::Error, &format!("result watch failed: {err}"));
                return JobStep::Done(JobOutcome::SurfaceLost);
            }
        };

        match result {
            DetectionResult::Aborted => JobStep::Aborted,
            DetectionResult::Success => JobStep::Done(JobOutcome::Success),
            DetectionResult::Failed => JobStep::Done(JobOutcome::Failed),
            DetectionResult::Timeout => JobStep::Done(JobOutcome::Timeout),
        }
    }

    /// Counts the randomized delay down in one-second slices so an abort lands within
    /// a slice instead of only at the next job boundary.
    async fn cooldown(&self, completed: usize, total: usize) {
        let delay = draw_cooldown(self.cfg.min_delay, self.cfg.max_delay);
        let total_sec = (delay.as_millis() as u64 + 999) / 1000;
        self.observer
            .log(LogLevel::Info, &format!("cooling down {total_sec}s"));

        let mut remaining = total_sec;
        while remaining > 0 && !self.handle.abort_requested() {
            self.observer.progress(completed, total);
            sleep(Duration::from_secs(1)).await;
            remaining -= 1;
        }
    }

    fn report_stopped(&self, completed: usize, total: usize) {
        self.observer.log(
            LogLevel::Warn,
            &format!("queue stopped ({completed}/{total} done)"),
        );
    }
}
