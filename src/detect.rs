use crate::page::{Page, PageError};
use crate::queue::{LogLevel, QueueConfig, QueueObserver, RunHandle};
use crate::site::{DetectionMode, SiteAdapter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::time::{interval_at, sleep, Instant};
use tracing::debug;

// ========================= Detection Contract =========================

/// Terminal state of one generation attempt. Exactly one value is produced per
/// detector invocation; no interim values are exposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionResult {
    Success,
    Failed,
    Timeout,
    Aborted,
}

/// Waits until the page reaches a terminal state for the in-flight generation.
/// Implementations tear down their page subscriptions on return, so no further
/// signals are delivered once a result exists.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn wait(
        &self,
        page: &dyn Page,
        site: &SiteAdapter,
        cfg: &QueueConfig,
        handle: &RunHandle,
        observer: &dyn QueueObserver,
    ) -> Result<DetectionResult, PageError>;
}

pub fn detector_for(site: &SiteAdapter) -> &'static dyn Detector {
    match site.detection {
        DetectionMode::Burst => &BurstDetector,
        DetectionMode::Streaming => &StreamingDetector,
    }
}

fn hit_keyword(text: &str, site: &SiteAdapter) -> bool {
    !text.is_empty() && site.fail_keywords.iter().any(|kw| text.contains(kw))
}

/// New generation output: not empty, not an avatar, not in the pre-submission snapshot.
fn fresh_image(src: &str, snapshot: &HashSet<String>) -> bool {
    !src.is_empty() && !src.contains("avatar") && !snapshot.contains(src)
}

/// Poll-side filter additionally skips inline SVG placeholders that streaming sites
/// render while the real image is still pending.
fn fresh_polled_image(src: &str, snapshot: &HashSet<String>) -> bool {
    fresh_image(src, snapshot) && !src.contains("data:image/svg")
}

// ========================= Immediate-Signal Strategy =========================

/// For sites that append the finished image in one mutation burst: the first added
/// image element whose source is genuinely new resolves the attempt.
pub struct BurstDetector;

#[async_trait]
impl Detector for BurstDetector {
    async fn wait(
        &self,
        page: &dyn Page,
        site: &SiteAdapter,
        cfg: &QueueConfig,
        handle: &RunHandle,
        observer: &dyn QueueObserver,
    ) -> Result<DetectionResult, PageError> {
        // Snapshot first so pre-existing and upload-preview images never count.
        let snapshot: HashSet<String> = page.image_sources().await?.into_iter().collect();
        let mut batches = page.mutations().await?;

        observer.log(
            LogLevel::Info,
            &format!(
                "watching for generation result (timeout {}s)",
                cfg.detect_timeout.as_secs()
            ),
        );

        let deadline = sleep(cfg.detect_timeout);
        tokio::pin!(deadline);
        let mut live = true;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    observer.log(LogLevel::Warn, "watch timed out");
                    return Ok(DetectionResult::Timeout);
                }
                batch = batches.recv(), if live => {
                    if handle.abort_requested() {
                        return Ok(DetectionResult::Aborted);
                    }
                    match batch {
                        // Subscription went away with the page; run out the clock.
                        None => live = false,
                        Some(batch) => {
                            if batch.added_images.iter().any(|src| fresh_image(src, &snapshot)) {
                                return Ok(DetectionResult::Success);
                            }
                            if hit_keyword(&batch.added_text, site) {
                                observer.log(LogLevel::Warn, "failure phrase detected");
                                return Ok(DetectionResult::Failed);
                            }
                        }
                    }
                }
            }
        }
    }
}

// ========================= Hybrid Poll Strategy =========================

/// For sites that stream their response: a structural watcher tracks activity and
/// failure phrases while a fixed-interval poll re-scans rendered images and treats
/// prolonged DOM silence after first activity as completion.
pub struct StreamingDetector;

#[async_trait]
impl Detector for StreamingDetector {
    async fn wait(
        &self,
        page: &dyn Page,
        site: &SiteAdapter,
        cfg: &QueueConfig,
        handle: &RunHandle,
        observer: &dyn QueueObserver,
    ) -> Result<DetectionResult, PageError> {
        let snapshot: HashSet<String> = page.image_sources().await?.into_iter().collect();
        let mut batches = page.mutations().await?;

        observer.log(
            LogLevel::Info,
            &format!("[{}] hybrid watch started (image poll + DOM stability)", site.name),
        );

        let deadline = sleep(cfg.detect_timeout);
        tokio::pin!(deadline);
        let mut poll = interval_at(Instant::now() + cfg.poll_interval, cfg.poll_interval);
        let mut last_activity: Option<Instant> = None;
        let mut live = true;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    observer.log(LogLevel::Warn, "watch timed out");
                    return Ok(DetectionResult::Timeout);
                }
                batch = batches.recv(), if live => {
                    if handle.abort_requested() {
                        return Ok(DetectionResult::Aborted);
                    }
                    match batch {
                        None => live = false,
                        Some(batch) => {
                            last_activity = Some(Instant::now());
                            if hit_keyword(&batch.added_text, site) {
                                observer.log(LogLevel::Warn, "failure phrase detected");
                                return Ok(DetectionResult::Failed);
                            }
                        }
                    }
                }
                _ = poll.tick() => {
                    if handle.abort_requested() {
                        return Ok(DetectionResult::Aborted);
                    }
                    let current = page.image_sources().await?;
                    if current.iter().any(|src| fresh_polled_image(src, &snapshot)) {
                        observer.log(LogLevel::Info, "poll found a new image");
                        return Ok(DetectionResult::Success);
                    }
                    if let Some(at) = last_activity {
                        let quiet = at.elapsed();
                        if quiet >= cfg.stability_window {
                            observer.log(
                                LogLevel::Info,
                                &format!(
                                    "DOM quiet for {:.1}s, treating generation as complete",
                                    quiet.as_secs_f32()
                                ),
                            );
                            return Ok(DetectionResult::Success);
                        }
                    } else {
                        debug!("no page activity yet");
                    }
                }
            }
        }
    }
}
