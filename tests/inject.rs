mod common;

use common::Recorder;
use pretty_assertions::assert_eq;
use promptq::inject::{execute_input, upload_and_wait, UploadOutcome};
use promptq::page::PageCall;
use promptq::{resolve_adapter, FakePage, LogLevel, PastePayload, QueueConfig, RunHandle};

fn site() -> &'static promptq::SiteAdapter {
    resolve_adapter("https://gemini.google.com/app")
}

fn payload() -> PastePayload {
    PastePayload {
        name: "photo.jpg".to_string(),
        mime: "image/jpeg".to_string(),
        bytes: vec![0xff, 0xd8, 0xff],
    }
}

#[tokio::test(start_paused = true)]
async fn clicks_send_button_when_present() {
    let site = site();
    let page = FakePage::new("https://gemini.google.com/app")
        .with_selector(site.input_selector)
        .with_selector(site.send_button_selector);
    let recorder = Recorder::default();

    let ok = execute_input(&page, site, "a prompt", &QueueConfig::default(), &recorder)
        .await
        .expect("fake page never fails");

    assert!(ok);
    let calls = page.recorded();
    assert_eq!(
        calls,
        vec![
            PageCall::SetText {
                selector: site.input_selector.to_string(),
                text: "a prompt".to_string(),
            },
            PageCall::Click {
                selector: site.send_button_selector.to_string(),
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn finds_input_after_one_retry() {
    let site = site();
    let page = FakePage::new("https://gemini.google.com/app")
        .with_selector_after(site.input_selector, 1)
        .with_selector(site.send_button_selector);
    let recorder = Recorder::default();

    let ok = execute_input(&page, site, "late input", &QueueConfig::default(), &recorder)
        .await
        .expect("fake page never fails");

    assert!(ok);
    assert!(page
        .recorded()
        .iter()
        .any(|call| matches!(call, PageCall::SetText { .. })));
}

#[tokio::test(start_paused = true)]
async fn reports_failure_when_input_never_appears() {
    let site = site();
    let page = FakePage::new("https://gemini.google.com/app");
    let recorder = Recorder::default();

    let ok = execute_input(&page, site, "nowhere to go", &QueueConfig::default(), &recorder)
        .await
        .expect("fake page never fails");

    assert!(!ok);
    assert!(page.recorded().is_empty());
    assert!(recorder.has_log(LogLevel::Error, "prompt input not found"));
}

#[tokio::test(start_paused = true)]
async fn falls_back_to_enter_without_send_button() {
    let site = site();
    let page = FakePage::new("https://gemini.google.com/app").with_selector(site.input_selector);
    let recorder = Recorder::default();

    let ok = execute_input(&page, site, "press enter", &QueueConfig::default(), &recorder)
        .await
        .expect("fake page never fails");

    assert!(ok);
    assert!(page
        .recorded()
        .iter()
        .any(|call| matches!(
            call,
            PageCall::PressEnter { selector } if selector == site.input_selector
        )));
    assert!(recorder.has_log(LogLevel::Warn, "send button not found"));
}

#[tokio::test(start_paused = true)]
async fn upload_pastes_and_sits_out_settle_interval() {
    let site = site();
    let page = FakePage::new("https://gemini.google.com/app").with_selector(site.input_selector);
    let recorder = Recorder::default();
    let handle = RunHandle::new();

    let outcome = upload_and_wait(
        &page,
        site,
        &payload(),
        &QueueConfig::default(),
        &handle,
        &recorder,
    )
    .await
    .expect("fake page never fails");

    assert_eq!(outcome, UploadOutcome::Uploaded);
    assert!(page.recorded().iter().any(|call| matches!(
        call,
        PageCall::Paste { file, .. } if file == "photo.jpg"
    )));
    assert!(recorder.has_log(LogLevel::Info, "upload settle complete"));
}

#[tokio::test(start_paused = true)]
async fn upload_reports_missing_input() {
    let site = site();
    let page = FakePage::new("https://gemini.google.com/app");
    let recorder = Recorder::default();
    let handle = RunHandle::new();

    let outcome = upload_and_wait(
        &page,
        site,
        &payload(),
        &QueueConfig::default(),
        &handle,
        &recorder,
    )
    .await
    .expect("fake page never fails");

    assert_eq!(outcome, UploadOutcome::InputNotFound);
    assert!(recorder.has_log(LogLevel::Error, "cannot paste image"));
}

#[tokio::test(start_paused = true)]
async fn upload_honors_abort_during_settle() {
    let site = site();
    let page = FakePage::new("https://gemini.google.com/app").with_selector(site.input_selector);
    let recorder = Recorder::default();
    let handle = RunHandle::new();
    handle.request_abort();

    let outcome = upload_and_wait(
        &page,
        site,
        &payload(),
        &QueueConfig::default(),
        &handle,
        &recorder,
    )
    .await
    .expect("fake page never fails");

    assert_eq!(outcome, UploadOutcome::Aborted);
}
