mod common;

use common::Recorder;
use pretty_assertions::assert_eq;
use promptq::{
    detector_for, resolve_adapter, DetectionResult, FakePage, MutationBatch, NullObserver,
    QueueConfig, RunHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn burst_site() -> &'static promptq::SiteAdapter {
    resolve_adapter("https://gemini.google.com/app")
}

fn streaming_site() -> &'static promptq::SiteAdapter {
    resolve_adapter("https://chatgpt.com/")
}

async fn run_detector(
    page: &FakePage,
    site: &'static promptq::SiteAdapter,
    handle: &RunHandle,
) -> DetectionResult {
    detector_for(site)
        .wait(page, site, &QueueConfig::default(), handle, &NullObserver)
        .await
        .expect("substrate never fails in these tests")
}

#[tokio::test(start_paused = true)]
async fn burst_resolves_success_on_new_image_and_tears_down() {
    let page = FakePage::new("https://gemini.google.com/app")
        .with_staged_batch(MutationBatch::with_image("https://files.example/fresh.png"));
    let handle = RunHandle::new();

    let result = run_detector(&page, burst_site(), &handle).await;

    assert_eq!(result, DetectionResult::Success);
    assert!(page.subscriptions_closed());
}

#[tokio::test(start_paused = true)]
async fn burst_ignores_reposted_preexisting_image() {
    // The page re-appends an image that existed before submission; the snapshot must
    // keep it from counting as generation output.
    let page = FakePage::new("https://gemini.google.com/app")
        .with_images(&["https://files.example/old.png"])
        .with_staged_batch(MutationBatch::with_image("https://files.example/old.png"));
    let handle = RunHandle::new();
    let started = Instant::now();

    let result = run_detector(&page, burst_site(), &handle).await;

    assert_eq!(result, DetectionResult::Timeout);
    assert!(started.elapsed() >= QueueConfig::default().detect_timeout);
}

#[tokio::test(start_paused = true)]
async fn burst_ignores_avatar_images() {
    let page = FakePage::new("https://gemini.google.com/app")
        .with_staged_batch(MutationBatch::with_image("https://cdn.example/avatar-32.png"));
    let handle = RunHandle::new();

    let result = run_detector(&page, burst_site(), &handle).await;

    assert_eq!(result, DetectionResult::Timeout);
}

#[tokio::test(start_paused = true)]
async fn burst_resolves_failed_on_failure_phrase() {
    let page = FakePage::new("https://gemini.google.com/app")
        .with_staged_batch(MutationBatch::with_text("抱歉，无法生成此图片"));
    let handle = RunHandle::new();

    let result = run_detector(&page, burst_site(), &handle).await;

    assert_eq!(result, DetectionResult::Failed);
}

#[tokio::test(start_paused = true)]
async fn burst_resolves_aborted_on_next_batch() {
    let page = FakePage::new("https://gemini.google.com/app")
        .with_staged_batch(MutationBatch::activity());
    let handle = RunHandle::new();
    handle.request_abort();

    let result = run_detector(&page, burst_site(), &handle).await;

    assert_eq!(result, DetectionResult::Aborted);
}

#[tokio::test(start_paused = true)]
async fn streaming_resolves_success_after_stability_window() {
    // One batch of activity, then silence and no image at all: the stability window
    // decides the response finished rendering.
    let page = FakePage::new("https://chatgpt.com/")
        .with_staged_batch(MutationBatch::activity());
    let handle = RunHandle::new();
    let cfg = QueueConfig::default();
    let started = Instant::now();

    let result = run_detector(&page, streaming_site(), &handle).await;

    assert_eq!(result, DetectionResult::Success);
    assert!(started.elapsed() >= cfg.stability_window);
    assert!(started.elapsed() < cfg.detect_timeout);
    assert!(page.subscriptions_closed());
}

#[tokio::test(start_paused = true)]
async fn streaming_poll_spots_image_added_later() {
    let page = Arc::new(FakePage::new("https://chatgpt.com/").with_images(&["https://files.example/a.png"]));
    let handle = RunHandle::new();

    let pusher = {
        let page = page.clone();
        async move {
            sleep(Duration::from_millis(2_500)).await;
            page.add_image("https://files.example/b.png");
        }
    };
    let (result, _) = tokio::join!(run_detector(&page, streaming_site(), &handle), pusher);

    assert_eq!(result, DetectionResult::Success);
}

#[tokio::test(start_paused = true)]
async fn streaming_poll_skips_svg_placeholders() {
    // A placeholder shows up early; completion must come from the stability window
    // after the staged activity, not from the placeholder.
    let page = Arc::new(FakePage::new("https://chatgpt.com/").with_staged_batch(MutationBatch::activity()));
    let handle = RunHandle::new();
    let cfg = QueueConfig::default();
    let started = Instant::now();

    let pusher = {
        let page = page.clone();
        async move {
            sleep(Duration::from_millis(1_500)).await;
            page.add_image("data:image/svg+xml;base64,PHN2Zz48L3N2Zz4=");
        }
    };
    let (result, _) = tokio::join!(run_detector(&page, streaming_site(), &handle), pusher);

    assert_eq!(result, DetectionResult::Success);
    assert!(started.elapsed() >= cfg.stability_window);
}

#[tokio::test(start_paused = true)]
async fn streaming_resolves_failed_on_failure_phrase() {
    let page = FakePage::new("https://chatgpt.com/")
        .with_staged_batch(MutationBatch::with_text("I'm unable to generate that image"));
    let handle = RunHandle::new();

    let result = run_detector(&page, streaming_site(), &handle).await;

    assert_eq!(result, DetectionResult::Failed);
}

#[tokio::test(start_paused = true)]
async fn streaming_abort_lands_within_one_poll_interval() {
    let page = FakePage::new("https://chatgpt.com/");
    let handle = RunHandle::new();
    handle.request_abort();
    let started = Instant::now();

    let result = run_detector(&page, streaming_site(), &handle).await;

    assert_eq!(result, DetectionResult::Aborted);
    assert!(started.elapsed() <= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn detector_emits_watch_logs() {
    let recorder = Recorder::default();
    let page = FakePage::new("https://gemini.google.com/app")
        .with_staged_batch(MutationBatch::with_image("https://files.example/fresh.png"));
    let handle = RunHandle::new();

    let result = detector_for(burst_site())
        .wait(&page, burst_site(), &QueueConfig::default(), &handle, &recorder)
        .await
        .expect("fake page never fails");

    assert_eq!(result, DetectionResult::Success);
    assert_eq!(recorder.logs_matching("watching for generation result"), 1);
}
