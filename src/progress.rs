use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::Mutex;
use serde::Serialize;

pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {label} {current}/{total} ({pct:5.1}%)");
    }

    pub fn snapshot(&self, s: &ProgressSnapshot) {
        if s.total > 0 && !s.done {
            self.progress(&s.status, s.processed, s.total);
        } else {
            self.info(format!("{} ({}%)", s.status, s.percent));
        }
        if let Some(msg) = s.message.as_deref().filter(|_| s.done) {
            self.info(msg);
        }
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub status: String,
    pub processed: usize,
    pub total: usize,
    pub api_calls: usize,
    pub cached: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub done: bool,
}

const UNIT_PROGRESS_START: usize = 5;
const UNIT_PROGRESS_END: usize = 95;

/// Shared progress state written by the worker and read by the poller.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.lock().clone()
    }

    pub fn set_status(&self, status: impl Into<String>, percent: u8) {
        let mut s = self.inner.lock();
        s.status = status.into();
        s.percent = s.percent.max(percent.min(100));
    }

    /// Per-unit callback: maps `processed / total` onto 5..=95 percent.
    pub fn on_unit(&self, processed: usize, total: usize) {
        let span = UNIT_PROGRESS_END - UNIT_PROGRESS_START;
        let pct = if total == 0 {
            UNIT_PROGRESS_START
        } else {
            UNIT_PROGRESS_START + processed.min(total) * span / total
        };
        let mut s = self.inner.lock();
        s.processed = processed;
        s.total = total;
        s.percent = pct.min(UNIT_PROGRESS_END) as u8;
        s.status = format!("Translating ({processed}/{total})");
    }

    pub fn set_counters(&self, api_calls: usize, cached: usize) {
        let mut s = self.inner.lock();
        s.api_calls = api_calls;
        s.cached = cached;
    }

    fn finish(&self, status: &str, message: String) {
        let mut s = self.inner.lock();
        s.percent = 100;
        s.status = status.to_string();
        s.message = Some(message);
        s.done = true;
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const EMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Runs `job` on a worker thread and reports its progress from the calling
/// thread: polls every 100ms, emits at most once per second, then emits one
/// final snapshot. There is no cancellation.
pub fn run_in_worker<T, F, E>(tracker: &ProgressTracker, job: F, emit: E) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(ProgressTracker) -> anyhow::Result<T> + Send + 'static,
    E: FnMut(&ProgressSnapshot),
{
    run_in_worker_every(tracker, job, emit, POLL_INTERVAL, EMIT_INTERVAL)
}

fn run_in_worker_every<T, F, E>(
    tracker: &ProgressTracker,
    job: F,
    mut emit: E,
    poll: Duration,
    every: Duration,
) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(ProgressTracker) -> anyhow::Result<T> + Send + 'static,
    E: FnMut(&ProgressSnapshot),
{
    tracker.set_status("Starting translation", UNIT_PROGRESS_START as u8);
    emit(&tracker.snapshot());

    let worker_tracker = tracker.clone();
    let handle = thread::Builder::new()
        .name("translate-worker".to_string())
        .spawn(move || job(worker_tracker))
        .map_err(|e| anyhow!("spawn worker: {e}"))?;

    let mut last_emit = Instant::now();
    while !handle.is_finished() {
        if last_emit.elapsed() >= every {
            emit(&tracker.snapshot());
            last_emit = Instant::now();
        }
        thread::sleep(poll);
    }

    let result = handle
        .join()
        .map_err(|_| anyhow!("translation worker panicked"))
        .and_then(|r| r);
    match &result {
        Ok(_) => tracker.finish("Translation completed", "Document translation completed".to_string()),
        Err(e) => tracker.finish("Error", format!("Translation failed: {e:#}")),
    }
    emit(&tracker.snapshot());
    result
}
