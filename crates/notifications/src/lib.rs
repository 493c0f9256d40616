use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    DispatchFailed(String),
}

/// Side channel for messages that are relevant to the viewer but not part of
/// the active conversation (a private message while another thread is open).
///
/// The session controller calls this with a title and body; the sink decides
/// modality (sound, OS notification, permission handling).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Desktop notifications via the platform notification service.
///
/// Honors the `[ui] notifications` config toggle; when disabled every call is
/// a no-op rather than an error, so callers never need to special-case it.
pub struct DesktopSink {
    enabled: AtomicBool,
}

impl DesktopSink {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl NotificationSink for DesktopSink {
    fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        notify_rust::Notification::new()
            .summary(title)
            .body(body)
            .show()
            .map_err(|e| {
                let err = NotifyError::DispatchFailed(e.to_string());
                error!(error = %err, "failed to dispatch notification");
                err
            })?;
        Ok(())
    }
}
