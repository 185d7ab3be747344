//! Port for telling the user how a sync operation ended
//!
//! One notification is sent per operation, when its books are closed.
//! Delivery is best effort: a failed `notify` is logged by the caller and
//! never affects the operation.

use serde::{Deserialize, Serialize};

/// How insistently the desktop should present a notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    /// Stays on screen until dismissed
    Critical,
}

impl Urgency {
    /// Value of the freedesktop `urgency` hint
    pub fn level(self) -> u8 {
        match self {
            Urgency::Low => 0,
            Urgency::Normal => 1,
            Urgency::Critical => 2,
        }
    }
}

/// What a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// Completed, cancelled or parked behind a locked entity
    SyncFinished,
    /// At least one entity could not be synced
    SyncFailed,
}

impl NotificationCategory {
    /// Freedesktop `category` hint
    pub fn hint(self) -> &'static str {
        match self {
            NotificationCategory::SyncFinished => "transfer.complete",
            NotificationCategory::SyncFailed => "transfer.error",
        }
    }
}

impl std::fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.hint())
    }
}

/// Summary of a finished operation, ready for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    /// Job counts, e.g. `4 completed, 0 failed, 6 cancelled`
    pub body: String,
    pub urgency: Urgency,
    pub category: NotificationCategory,
}

impl Notification {
    /// An operation that ended without failures
    pub fn sync(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            urgency: Urgency::Normal,
            category: NotificationCategory::SyncFinished,
        }
    }

    /// An operation with failed entities
    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            urgency: Urgency::Critical,
            category: NotificationCategory::SyncFailed,
        }
    }
}

/// Delivers operation summaries to the user
#[async_trait::async_trait]
pub trait INotificationService: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}
