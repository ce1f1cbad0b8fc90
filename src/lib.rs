pub mod browser;
pub mod detect;
pub mod inject;
pub mod page;
pub mod queue;
pub mod site;

pub use browser::{BrowserConfig, ChromiumPage};
pub use detect::{detector_for, DetectionResult, Detector};
pub use page::{FakePage, MutationBatch, Page, PageError, PastePayload};
pub use queue::{
    compose_prompts, draw_cooldown, format_elapsed, Job, JobOutcome, LogLevel, NullObserver,
    QueueConfig, QueueObserver, RunHandle, RunReport, Runner, TracingObserver,
};
pub use site::{resolve_adapter, DetectionMode, SiteAdapter};
