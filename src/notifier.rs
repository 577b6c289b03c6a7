//! Transient on-screen messages and the loading indicator.
//!
//! Nothing here keeps application state: a toast is handed to the surface
//! and forgotten, the loading flag is a single bit.

use log::{error, info, warn};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Visual category of a toast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Warning,
    Info,
}

impl ToastKind {
    pub fn icon(self) -> &'static str {
        match self {
            ToastKind::Success => "✅",
            ToastKind::Error => "❌",
            ToastKind::Warning => "⚠️",
            ToastKind::Info => "ℹ️",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub icon: &'static str,
    pub message: String,
}

/// Sink for user feedback.
///
/// Implementations must be cheap to call from any handler; callers never
/// wait on the user acknowledging a message.
pub trait Notifier: Send + Sync {
    fn toast(&self, kind: ToastKind, message: &str);

    fn set_loading(&self, loading: bool);

    fn success(&self, message: &str) {
        self.toast(ToastKind::Success, message);
    }

    fn error(&self, message: &str) {
        self.toast(ToastKind::Error, message);
    }
}

/// Buffers toasts until the surface drains them.
///
/// The web shell drains after every request; tests inspect the buffer directly.
#[derive(Debug, Default)]
pub struct ToastQueue {
    pending: Mutex<Vec<Toast>>,
    loading: AtomicBool,
}

impl ToastQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every toast raised since the last drain
    pub fn drain(&self) -> Vec<Toast> {
        match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }
}

impl Notifier for ToastQueue {
    fn toast(&self, kind: ToastKind, message: &str) {
        match kind {
            ToastKind::Error => error!("toast: {}", message),
            ToastKind::Warning => warn!("toast: {}", message),
            ToastKind::Success | ToastKind::Info => info!("toast: {}", message),
        }

        let toast = Toast {
            kind,
            icon: kind.icon(),
            message: message.to_string(),
        };
        match self.pending.lock() {
            Ok(mut pending) => pending.push(toast),
            Err(poisoned) => poisoned.into_inner().push(toast),
        }
    }

    fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
    }
}

/// Raises the loading indicator for as long as it lives.
///
/// Dropping the guard clears the flag on every exit path, including `?`.
pub struct LoadingGuard<'a> {
    notifier: &'a dyn Notifier,
}

impl<'a> LoadingGuard<'a> {
    pub fn new(notifier: &'a dyn Notifier) -> Self {
        notifier.set_loading(true);
        Self { notifier }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.notifier.set_loading(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_queue() {
        let queue = ToastQueue::new();
        queue.success("saved");
        queue.error("failed");

        let toasts = queue.drain();
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[0].kind, ToastKind::Success);
        assert_eq!(toasts[1].message, "failed");
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn loading_guard_resets_flag() {
        let queue = ToastQueue::new();
        {
            let _guard = LoadingGuard::new(&queue);
            assert!(queue.is_loading());
        }
        assert!(!queue.is_loading());
    }
}
