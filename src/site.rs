use serde::{Deserialize, Serialize};

// ========================= Site Adapters =========================

/// How completion is recognized on a given site.
///
/// `Burst` sites append the finished image in a single mutation burst, so the first
/// genuinely new image element is the completion signal. `Streaming` sites render the
/// response incrementally, which makes "first new image" misfire on placeholders; those
/// are watched with an image poll plus a DOM-stability window instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    Burst,
    Streaming,
}

/// Static description of one supported chat site: where the controls live and which
/// phrases mark a rejected generation.
#[derive(Clone, Debug, Serialize)]
pub struct SiteAdapter {
    pub name: &'static str,
    pub url_markers: &'static [&'static str],
    pub input_selector: &'static str,
    pub send_button_selector: &'static str,
    pub fail_keywords: &'static [&'static str],
    pub file_input_selector: &'static str,
    pub upload_button_selector: &'static str,
    pub detection: DetectionMode,
}

impl SiteAdapter {
    pub fn matches(&self, url: &str) -> bool {
        self.url_markers.iter().any(|marker| url.contains(marker))
    }
}

pub static GEMINI: SiteAdapter = SiteAdapter {
    name: "Gemini",
    url_markers: &["gemini.google.com"],
    input_selector: r#"div[contenteditable="true"], textarea"#,
    send_button_selector: r#"button[aria-label*="发送"], button[aria-label*="Send"], .send-button-class"#,
    fail_keywords: &["无法生成", "请重试", "安全限制"],
    file_input_selector: r#"input[type="file"]"#,
    upload_button_selector: r#"button[aria-label*="上传"], button[aria-label*="Upload"], button[aria-label*="image"], button[aria-label*="图片"]"#,
    detection: DetectionMode::Burst,
};

pub static CHATGPT: SiteAdapter = SiteAdapter {
    name: "ChatGPT",
    url_markers: &["chat.openai.com", "chatgpt.openai.com", "chatgpt.com"],
    input_selector: r#"#prompt-textarea, div.ProseMirror[contenteditable="true"], div[contenteditable="true"]"#,
    send_button_selector: r#"button[data-testid="send-button"], button[aria-label*="Send"], button[aria-label*="发送"]"#,
    fail_keywords: &["unable to generate", "content policy", "无法生成"],
    file_input_selector: r#"input[type="file"]"#,
    upload_button_selector: r#"button[aria-label*="Attach"], button[aria-label*="附件"], button[aria-label*="Upload"]"#,
    detection: DetectionMode::Streaming,
};

pub static GROK: SiteAdapter = SiteAdapter {
    name: "Grok",
    url_markers: &["grok.com"],
    input_selector: r#"textarea, div[contenteditable="true"]"#,
    send_button_selector: r#"button[aria-label*="Send"], button[aria-label*="submit"], button[type="submit"]"#,
    fail_keywords: &["unable to generate", "content policy", "无法生成"],
    file_input_selector: r#"input[type="file"]"#,
    upload_button_selector: r#"button[aria-label*="Attach"], button[aria-label*="Upload"]"#,
    detection: DetectionMode::Burst,
};

static REGISTRY: [&SiteAdapter; 3] = [&GEMINI, &CHATGPT, &GROK];

/// Picks the adapter for the current page address. First registered match wins; an
/// unrecognized address falls back to the Gemini adapter so the rest of the engine can
/// proceed and fail at the selector-lookup stage instead of here.
pub fn resolve_adapter(url: &str) -> &'static SiteAdapter {
    REGISTRY
        .iter()
        .find(|site| site.matches(url))
        .copied()
        .unwrap_or(&GEMINI)
}
