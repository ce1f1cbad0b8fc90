use crate::page::{Page, PageError, PastePayload};
use crate::queue::{LogLevel, QueueConfig, QueueObserver, RunHandle};
use crate::site::SiteAdapter;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

// ========================= Input Injection =========================

/// Fills the site's prompt surface with `text` and triggers submission. `Ok(false)`
/// means the input surface never appeared; substrate failures bubble up as errors for
/// the executor to log and skip.
pub async fn execute_input<P: Page + ?Sized>(
    page: &P,
    site: &SiteAdapter,
    text: &str,
    cfg: &QueueConfig,
    observer: &dyn QueueObserver,
) -> Result<bool, PageError> {
    observer.log(
        LogLevel::Info,
        &format!("[{}] locating prompt input", site.name),
    );
    if !locate_input(page, site, cfg).await? {
        observer.log(LogLevel::Error, "prompt input not found");
        return Ok(false);
    }

    observer.log(
        LogLevel::Info,
        &format!("filling prompt: \"{}\"", preview(text)),
    );
    page.set_prompt_text(site.input_selector, text).await?;
    sleep(cfg.post_input_pause).await;

    if page.exists(site.send_button_selector).await? {
        observer.log(LogLevel::Info, "clicking send button");
        page.click(site.send_button_selector).await?;
    } else {
        observer.log(LogLevel::Warn, "send button not found, sending with Enter");
        page.press_enter(site.input_selector).await?;
    }
    Ok(true)
}

/// One retry after a short settle delay; dynamically rendered pages often have a gap
/// between navigation and control availability.
async fn locate_input<P: Page + ?Sized>(
    page: &P,
    site: &SiteAdapter,
    cfg: &QueueConfig,
) -> Result<bool, PageError> {
    if page.exists(site.input_selector).await? {
        return Ok(true);
    }
    debug!(site = site.name, "input not present yet, retrying once");
    sleep(cfg.input_retry_delay).await;
    page.exists(site.input_selector).await
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(40).collect();
    if text.chars().count() > 40 {
        out.push_str("...");
    }
    out
}

// ========================= Image Upload =========================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    InputNotFound,
    Aborted,
}

/// Pastes `file` into the prompt surface via a synthesized clipboard event, then sits
/// out a fixed settle interval so the site's own upload/preview pipeline can finish.
/// The settle wait is sliced so an abort is honored within one slice.
pub async fn upload_and_wait<P: Page + ?Sized>(
    page: &P,
    site: &SiteAdapter,
    file: &PastePayload,
    cfg: &QueueConfig,
    handle: &RunHandle,
    observer: &dyn QueueObserver,
) -> Result<UploadOutcome, PageError> {
    observer.log(
        LogLevel::Info,
        &format!("[{}] pasting image: {}", site.name, file.name),
    );
    if !locate_input(page, site, cfg).await? {
        observer.log(LogLevel::Error, "prompt input not found, cannot paste image");
        return Ok(UploadOutcome::InputNotFound);
    }

    sleep(cfg.focus_pause).await;
    page.paste_file(site.input_selector, file).await?;
    observer.log(
        LogLevel::Info,
        &format!(
            "paste dispatched, waiting {}s for upload to settle",
            cfg.upload_settle.as_secs()
        ),
    );

    let mut waited = Duration::ZERO;
    while waited < cfg.upload_settle {
        if handle.abort_requested() {
            return Ok(UploadOutcome::Aborted);
        }
        sleep(cfg.upload_poll).await;
        waited += cfg.upload_poll;
    }
    observer.log(LogLevel::Info, "upload settle complete");
    Ok(UploadOutcome::Uploaded)
}
