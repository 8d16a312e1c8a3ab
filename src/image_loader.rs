//! Tri-state image loading: validate, sanitize, then preload off-thread.
//!
//! Each validation cycle is tagged with a sequence number. A preload result
//! only lands if its cycle is still the current one, so a slow probe for an
//! old URL can never overwrite the state of a newer one.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::image_url::{sanitize_image_url, validate_image_url};
use crate::preload::Preloader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub is_loading: bool,
    pub has_error: bool,
    pub sanitized_url: Option<String>,
}

struct PreloadResult {
    seq: u64,
    loaded: bool,
}

pub struct ImageLoader {
    preloader: Arc<dyn Preloader>,
    source: Option<String>,
    outcome: LoadOutcome,
    sanitized: Option<String>,
    seq: u64,
    tx: Sender<PreloadResult>,
    rx: Receiver<PreloadResult>,
}

impl ImageLoader {
    pub fn new(preloader: Arc<dyn Preloader>, source: Option<String>) -> Self {
        let (tx, rx) = unbounded();
        let mut loader = Self {
            preloader,
            source,
            outcome: LoadOutcome::Loading,
            sanitized: None,
            seq: 0,
            tx,
            rx,
        };
        loader.start_cycle();
        loader
    }

    /// Re-runs the pipeline only when the candidate actually changed.
    pub fn set_source(&mut self, source: Option<String>) {
        if self.source == source {
            return;
        }
        self.source = source;
        self.start_cycle();
    }

    /// Starts over from validation, whatever the current state.
    pub fn retry(&mut self) {
        debug!(source = ?self.source, "retrying image load");
        self.start_cycle();
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn outcome(&self) -> LoadOutcome {
        self.outcome
    }

    pub fn is_loading(&self) -> bool {
        self.outcome == LoadOutcome::Loading
    }

    pub fn has_error(&self) -> bool {
        self.outcome == LoadOutcome::Error
    }

    pub fn sanitized_url(&self) -> Option<&str> {
        self.sanitized.as_deref()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            is_loading: self.is_loading(),
            has_error: self.has_error(),
            sanitized_url: self.sanitized.clone(),
        }
    }

    /// Applies any preload results that have arrived. Returns true when the
    /// visible state changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(result) = self.rx.try_recv() {
            changed |= self.apply(result);
        }
        changed
    }

    /// Blocks until the current cycle settles.
    pub fn wait(&mut self) -> LoadOutcome {
        while self.is_loading() {
            match self.rx.recv() {
                Ok(result) => {
                    self.apply(result);
                }
                Err(_) => break,
            }
        }
        self.outcome
    }

    /// Like [`ImageLoader::wait`] but gives up after `timeout`, leaving the
    /// state untouched.
    pub fn wait_timeout(&mut self, timeout: Duration) -> LoadOutcome {
        let deadline = Instant::now() + timeout;
        while self.is_loading() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(result) => {
                    self.apply(result);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.outcome
    }

    fn apply(&mut self, result: PreloadResult) -> bool {
        if result.seq != self.seq || self.outcome != LoadOutcome::Loading {
            debug!(seq = result.seq, current = self.seq, "dropping stale preload result");
            return false;
        }
        self.outcome = if result.loaded {
            LoadOutcome::Loaded
        } else {
            LoadOutcome::Error
        };
        true
    }

    fn start_cycle(&mut self) {
        self.seq = self.seq.wrapping_add(1);
        self.outcome = LoadOutcome::Loading;
        self.sanitized = None;

        let Some(source) = self.source.clone() else {
            self.outcome = LoadOutcome::Error;
            return;
        };

        let validation = validate_image_url(Some(&source));
        if !validation.is_valid {
            warn!(
                url = %source,
                reason = validation.error.as_deref().unwrap_or_default(),
                "invalid image url"
            );
            self.outcome = LoadOutcome::Error;
            return;
        }

        let Some(sanitized) = sanitize_image_url(Some(&source)) else {
            warn!(url = %source, "image url sanitization failed");
            self.outcome = LoadOutcome::Error;
            return;
        };

        self.sanitized = Some(sanitized.clone());
        let seq = self.seq;
        let tx = self.tx.clone();
        let preloader = self.preloader.clone();
        thread::spawn(move || {
            let loaded = preloader.preload(&sanitized);
            let _ = tx.send(PreloadResult { seq, loaded });
        });
    }
}
