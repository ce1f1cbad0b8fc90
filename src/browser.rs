use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::page::Page as OxidePage;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::page::{MutationBatch, Page, PageError, PastePayload};

const DRAIN_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None }
    }
}

/// Live [`Page`] implementation over a CDP-driven Chromium tab. Page operations are
/// script evaluations reproducing what a human interaction leaves behind: native
/// value setters, bubbling input/change events, keyCode-13 key-downs, clipboard
/// pastes built from a `DataTransfer`.
pub struct ChromiumPage {
    page: OxidePage,
    _browser: Option<OxideBrowser>,
}

impl ChromiumPage {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Use a unique user data dir per run to avoid ProcessSingleton profile lock
        // conflicts when Chromium is restarted rapidly or multiple instances spawn.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("promptq-profile-{}-{}", std::process::id(), ts));
        let _ = std::fs::create_dir_all(&profile_dir);
        builder = builder.user_data_dir(profile_dir.clone());
        builder = builder
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;

        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });

        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        Ok(Self { page, _browser: Some(browser) })
    }

    /// Attach to an already running browser over its DevTools websocket and adopt the
    /// first open tab (or a blank one if none exist).
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = match browser.pages().await?.into_iter().next() {
            Some(page) => page,
            None => browser.new_page("about:blank").await?,
        };
        Ok(Self { page, _browser: Some(browser) })
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn eval(&self, script: String) -> Result<serde_json::Value, PageError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| PageError::Gone(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Runs a script that returns `false` when its target element vanished.
    async fn eval_on_element(&self, selector: &str, script: String) -> Result<(), PageError> {
        let found = self.eval(script).await?.as_bool().unwrap_or(false);
        if found {
            Ok(())
        } else {
            Err(PageError::Missing(selector.to_string()))
        }
    }
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl Page for ChromiumPage {
    async fn address(&self) -> Result<String, PageError> {
        self.page
            .url()
            .await
            .map(|url| url.unwrap_or_default())
            .map_err(|e| PageError::Gone(e.to_string()))
    }

    async fn exists(&self, selector: &str) -> Result<bool, PageError> {
        let script = format!("!!document.querySelector({})", js_str(selector));
        Ok(self.eval(script).await?.as_bool().unwrap_or(false))
    }

    async fn set_prompt_text(&self, selector: &str, text: &str) -> Result<(), PageError> {
        let script = format!(
            r#"(function() {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.focus();
  if (el.isContentEditable) {{
    el.innerHTML = '';
    const p = document.createElement('p');
    p.textContent = {text};
    el.appendChild(p);
  }} else {{
    const proto = el instanceof HTMLTextAreaElement
      ? HTMLTextAreaElement.prototype
      : HTMLInputElement.prototype;
    const setter = Object.getOwnPropertyDescriptor(proto, 'value')?.set;
    if (setter) {{ setter.call(el, {text}); }} else {{ el.value = {text}; }}
  }}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#,
            sel = js_str(selector),
            text = js_str(text),
        );
        self.eval_on_element(selector, script).await
    }

    async fn click(&self, selector: &str) -> Result<(), PageError> {
        let script = format!(
            r#"(function() {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.click();
  return true;
}})()"#,
            sel = js_str(selector),
        );
        self.eval_on_element(selector, script).await
    }

    async fn press_enter(&self, selector: &str) -> Result<(), PageError> {
        let script = format!(
            r#"(function() {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.dispatchEvent(new KeyboardEvent('keydown', {{
    key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true, cancelable: true
  }}));
  return true;
}})()"#,
            sel = js_str(selector),
        );
        self.eval_on_element(selector, script).await
    }

    async fn paste_file(&self, selector: &str, file: &PastePayload) -> Result<(), PageError> {
        let script = format!(
            r#"(function() {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.focus();
  const bin = atob({data});
  const bytes = new Uint8Array(bin.length);
  for (let i = 0; i < bin.length; i++) bytes[i] = bin.charCodeAt(i);
  const file = new File([bytes], {name}, {{ type: {mime} }});
  const dt = new DataTransfer();
  dt.items.add(file);
  el.dispatchEvent(new ClipboardEvent('paste', {{
    bubbles: true, cancelable: true, clipboardData: dt
  }}));
  return true;
}})()"#,
            sel = js_str(selector),
            data = js_str(&STANDARD.encode(&file.bytes)),
            name = js_str(&file.name),
            mime = js_str(&file.mime),
        );
        self.eval_on_element(selector, script).await
    }

    async fn image_sources(&self) -> Result<Vec<String>, PageError> {
        let script =
            "Array.from(document.querySelectorAll('img')).map(i => i.src).filter(Boolean)";
        let value = self.eval(script.to_string()).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn mutations(&self) -> Result<mpsc::Receiver<MutationBatch>, PageError> {
        self.eval(INSTALL_OBSERVER_JS.to_string()).await?;

        let (tx, rx) = mpsc::channel(64);
        let page = self.page.clone();
        tokio::spawn(async move {
            loop {
                sleep(DRAIN_INTERVAL).await;
                let drained: Vec<MutationBatch> = match page.evaluate(DRAIN_JS).await {
                    Ok(result) => result.into_value().unwrap_or_default(),
                    // Page gone, nothing left to tear down.
                    Err(err) => {
                        debug!(error = %err, "mutation drain stopped");
                        return;
                    }
                };
                for batch in drained {
                    if tx.send(batch).await.is_err() {
                        let _ = page.evaluate(TEARDOWN_JS).await;
                        return;
                    }
                }
                if tx.is_closed() {
                    let _ = page.evaluate(TEARDOWN_JS).await;
                    return;
                }
            }
        });
        Ok(rx)
    }
}

// In-page observer buffering mutation batches until the drain task collects them.
// Character-data and attribute churn produce empty batches on purpose: they still
// count as activity for stability tracking.
const INSTALL_OBSERVER_JS: &str = r#"(function() {
  if (window.__pqWatch) { window.__pqWatch.obs.disconnect(); }
  const state = { batches: [] };
  const obs = new MutationObserver((muts) => {
    const batch = { added_images: [], added_text: '' };
    let any = false;
    for (const m of muts) {
      any = true;
      if (m.type !== 'childList') continue;
      for (const node of m.addedNodes) {
        if (node.nodeType !== Node.ELEMENT_NODE) continue;
        if (node.tagName === 'IMG' && node.src) batch.added_images.push(node.src);
        const imgs = node.querySelectorAll ? node.querySelectorAll('img') : [];
        for (const img of imgs) { if (img.src) batch.added_images.push(img.src); }
        batch.added_text += node.textContent || '';
      }
    }
    if (any) state.batches.push(batch);
  });
  obs.observe(document.body, {
    childList: true, subtree: true, characterData: true, attributes: true
  });
  state.obs = obs;
  window.__pqWatch = state;
  return true;
})()"#;

const DRAIN_JS: &str = r#"(function() {
  const st = window.__pqWatch;
  if (!st) return [];
  const out = st.batches;
  st.batches = [];
  return out;
})()"#;

const TEARDOWN_JS: &str = r#"(function() {
  const st = window.__pqWatch;
  if (st) { st.obs.disconnect(); delete window.__pqWatch; }
  return true;
})()"#;
