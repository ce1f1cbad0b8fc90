use anyhow::Result;
use promptq::{BrowserConfig, ChromiumPage, Runner, TracingObserver};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let page = if let Ok(ws) = std::env::var("CHROME_WS_URL") {
        if !ws.trim().is_empty() {
            ChromiumPage::connect(&ws).await?
        } else {
            ChromiumPage::launch(BrowserConfig { headless: false, user_agent: None }).await?
        }
    } else {
        ChromiumPage::launch(BrowserConfig { headless: false, user_agent: None }).await?
    };
    page.goto("https://gemini.google.com/app").await?;

    let runner = Runner::new(Arc::new(page)).with_observer(Arc::new(TracingObserver));

    // Ctrl-C requests a cooperative stop; the queue winds down within one slice.
    let handle = runner.handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        handle.request_abort();
    });

    let report = runner
        .run_text_queue(
            "a red fox in watercolor\na lighthouse at dawn, oil on canvas",
            "",
            "high detail, 4k",
        )
        .await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
