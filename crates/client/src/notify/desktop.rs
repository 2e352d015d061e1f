//! Desktop notification seam.

use async_trait::async_trait;

/// Platform permission to show desktop notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    /// Not asked yet.
    #[default]
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("failed to show notification: {0}")]
    Show(String),
}

/// Shows desktop notifications.
#[async_trait]
pub trait DesktopNotifier: Send + Sync + 'static {
    fn permission(&self) -> Permission;

    /// Ask the platform for permission; returns the resulting state.
    async fn request_permission(&self) -> Permission;

    fn show(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Headless notifier: alerts become structured log events.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl DesktopNotifier for LogNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    fn show(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(target: "chatdesk::alert", %title, %body, "notification");
        Ok(())
    }
}
