#![allow(dead_code)]

use promptq::{LogLevel, QueueObserver, RunHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Collects every notification the engine emits, for assertions.
#[derive(Default)]
pub struct Recorder {
    pub logs: Mutex<Vec<(LogLevel, String)>>,
    pub progress: Mutex<Vec<(usize, usize)>>,
    pub queue_starts: AtomicUsize,
    pub job_starts: AtomicUsize,
    pub queue_ends: AtomicUsize,
}

impl Recorder {
    pub fn logs_matching(&self, needle: &str) -> usize {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| message.contains(needle))
            .count()
    }

    pub fn has_log(&self, level: LogLevel, needle: &str) -> bool {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }

    pub fn last_progress(&self) -> Option<(usize, usize)> {
        self.progress.lock().unwrap().last().copied()
    }
}

impl QueueObserver for Recorder {
    fn log(&self, level: LogLevel, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn progress(&self, completed: usize, total: usize) {
        self.progress.lock().unwrap().push((completed, total));
    }

    fn queue_started(&self) {
        self.queue_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn job_started(&self) {
        self.job_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn queue_ended(&self) {
        self.queue_ends.fetch_add(1, Ordering::SeqCst);
    }
}

/// Requests an abort the first time a log line contains `needle`, then delegates
/// everything to the wrapped recorder.
pub struct AbortOnLog {
    pub needle: String,
    pub handle: RunHandle,
    pub inner: Arc<Recorder>,
}

impl QueueObserver for AbortOnLog {
    fn log(&self, level: LogLevel, message: &str) {
        if message.contains(&self.needle) {
            self.handle.request_abort();
        }
        self.inner.log(level, message);
    }

    fn progress(&self, completed: usize, total: usize) {
        self.inner.progress(completed, total);
    }

    fn queue_started(&self) {
        self.inner.queue_started();
    }

    fn job_started(&self) {
        self.inner.job_started();
    }

    fn queue_ended(&self) {
        self.inner.queue_ended();
    }
}
