use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

// ========================= Substrate Contract =========================

#[derive(Debug, Error)]
pub enum PageError {
    #[error("script evaluation failed: {0}")]
    Eval(String),
    #[error("element not found: {0}")]
    Missing(String),
    #[error("page is gone: {0}")]
    Gone(String),
}

/// One batch of structural additions observed on the page. An empty batch still counts
/// as activity (text edits, attribute churn) for stability tracking.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MutationBatch {
    /// Resource identifiers of image elements inside added subtrees.
    pub added_images: Vec<String>,
    /// Concatenated text content of added subtrees.
    pub added_text: String,
}

impl MutationBatch {
    pub fn activity() -> Self {
        Self::default()
    }

    pub fn with_image(src: impl Into<String>) -> Self {
        Self {
            added_images: vec![src.into()],
            added_text: String::new(),
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            added_images: Vec::new(),
            added_text: text.into(),
        }
    }
}

/// A binary file shipped to the page through a synthesized clipboard paste.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PastePayload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// The rendered-page substrate the engine drives. One implementation speaks CDP to a
/// live Chromium tab; the scripted [`FakePage`] backs the test suite.
#[async_trait]
pub trait Page: Send + Sync {
    /// Current page address, used once per queue run to pick a site adapter.
    async fn address(&self) -> Result<String, PageError>;

    /// Whether `selector` currently matches at least one element.
    async fn exists(&self, selector: &str) -> Result<bool, PageError>;

    /// Replace the editable surface's content with `text` and dispatch the bubbling
    /// input/change notifications host-page listeners expect. Contenteditable surfaces
    /// get a single plain paragraph; native fields are written through the
    /// property-level value setter so reactive frameworks observe the change.
    async fn set_prompt_text(&self, selector: &str, text: &str) -> Result<(), PageError>;

    /// Activate the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<(), PageError>;

    /// Dispatch a full Enter key-down (key code 13) on the matching element.
    async fn press_enter(&self, selector: &str) -> Result<(), PageError>;

    /// Focus the matching element and synthesize a clipboard paste carrying `file`.
    async fn paste_file(&self, selector: &str, file: &PastePayload) -> Result<(), PageError>;

    /// Resource identifiers of every currently rendered image element.
    async fn image_sources(&self) -> Result<Vec<String>, PageError>;

    /// Subscribe to structural-change batches, delivered in mutation order. Dropping
    /// the receiver stops delivery and releases the underlying observer.
    async fn mutations(&self) -> Result<mpsc::Receiver<MutationBatch>, PageError>;
}

// ========================= Test Double =========================

/// Call recorded by [`FakePage`], in invocation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageCall {
    SetText { selector: String, text: String },
    Click { selector: String },
    PressEnter { selector: String },
    Paste { selector: String, file: String },
}

/// Scripted in-memory page for tests: selector availability can be staged to appear
/// only after a number of failed probes, mutation batches are replayed to every
/// subscriber and can be pushed live, and every injection call is recorded.
pub struct FakePage {
    url: String,
    present: Mutex<HashSet<String>>,
    pending: Mutex<HashMap<String, usize>>,
    images: Mutex<Vec<String>>,
    staged: Mutex<Vec<MutationBatch>>,
    taps: Mutex<Vec<mpsc::Sender<MutationBatch>>>,
    pub calls: Mutex<Vec<PageCall>>,
}

impl FakePage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            present: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
            images: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
            taps: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_selector(self, selector: &str) -> Self {
        self.present.lock().unwrap().insert(selector.to_string());
        self
    }

    /// `selector` starts absent and becomes visible after `probes` failed lookups.
    pub fn with_selector_after(self, selector: &str, probes: usize) -> Self {
        self.pending.lock().unwrap().insert(selector.to_string(), probes);
        self
    }

    pub fn with_images(self, sources: &[&str]) -> Self {
        *self.images.lock().unwrap() = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Delivered to every future subscriber, in order, before any live pushes.
    pub fn with_staged_batch(self, batch: MutationBatch) -> Self {
        self.staged.lock().unwrap().push(batch);
        self
    }

    pub fn add_image(&self, src: &str) {
        self.images.lock().unwrap().push(src.to_string());
    }

    /// Push a batch to every live subscriber.
    pub fn push_batch(&self, batch: MutationBatch) {
        let taps = self.taps.lock().unwrap();
        for tap in taps.iter() {
            let _ = tap.try_send(batch.clone());
        }
    }

    /// True once every subscription handed out so far has been dropped.
    pub fn subscriptions_closed(&self) -> bool {
        self.taps.lock().unwrap().iter().all(|tap| tap.is_closed())
    }

    pub fn recorded(&self) -> Vec<PageCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: PageCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Page for FakePage {
    async fn address(&self) -> Result<String, PageError> {
        Ok(self.url.clone())
    }

    async fn exists(&self, selector: &str) -> Result<bool, PageError> {
        if self.present.lock().unwrap().contains(selector) {
            return Ok(true);
        }
        let mut pending = self.pending.lock().unwrap();
        if let Some(remaining) = pending.get_mut(selector) {
            if *remaining == 0 {
                return Ok(true);
            }
            *remaining -= 1;
        }
        Ok(false)
    }

    async fn set_prompt_text(&self, selector: &str, text: &str) -> Result<(), PageError> {
        self.record(PageCall::SetText {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), PageError> {
        self.record(PageCall::Click {
            selector: selector.to_string(),
        });
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), PageError> {
        self.record(PageCall::PressEnter {
            selector: selector.to_string(),
        });
        Ok(())
    }

    async fn paste_file(&self, selector: &str, file: &PastePayload) -> Result<(), PageError> {
        self.record(PageCall::Paste {
            selector: selector.to_string(),
            file: file.name.clone(),
        });
        Ok(())
    }

    async fn image_sources(&self) -> Result<Vec<String>, PageError> {
        Ok(self.images.lock().unwrap().clone())
    }

    async fn mutations(&self) -> Result<mpsc::Receiver<MutationBatch>, PageError> {
        let (tx, rx) = mpsc::channel(64);
        for batch in self.staged.lock().unwrap().iter() {
            let _ = tx.try_send(batch.clone());
        }
        self.taps.lock().unwrap().push(tx);
        Ok(rx)
    }
}
