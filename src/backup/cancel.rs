//! Cooperative cancellation for blocking backup runs.
//!
//! A [`CancellationToken`] is cancelled either explicitly (shutdown signal,
//! caller abort) or implicitly when its deadline passes. Child tokens observe
//! their parent, so a scheduler-wide token can be narrowed to a per-run
//! timeout without losing the shutdown signal.

use derive_more::Display;
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Upper bound for a single condvar wait, so parent cancellation and
/// deadlines are noticed even without a notification on this token.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    #[display("cancelled")]
    Cancelled,
    #[display("timed out")]
    TimedOut,
}

#[derive(Debug, Default)]
struct Flag {
    cancelled: Mutex<bool>,
    notify: Condvar,
}

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<Flag>,
    deadline: Option<Instant>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child token that is cancelled with `self` or once `timeout` elapsed.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Child token that is cancelled with `self`, but can also be cancelled alone.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::default(),
            deadline: None,
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        let mut cancelled = self
            .flag
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        self.flag.notify.notify_all();
    }

    pub fn reason(&self) -> Option<CancelReason> {
        let cancelled = *self
            .flag
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if cancelled {
            return Some(CancelReason::Cancelled);
        }
        if let Some(reason) = self.parent.as_ref().and_then(|p| p.reason()) {
            return Some(reason);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::TimedOut),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Blocks for at most `timeout`, returning early with the reason if the
    /// token gets cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelReason> {
        let until = Instant::now() + timeout;
        loop {
            if let Some(reason) = self.reason() {
                return Some(reason);
            }
            let now = Instant::now();
            if now >= until {
                return None;
            }
            let slice = (until - now).min(WAIT_SLICE);
            let cancelled = self
                .flag
                .cancelled
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !*cancelled {
                let _ = self
                    .flag
                    .notify
                    .wait_timeout(cancelled, slice)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        }
    }
}
