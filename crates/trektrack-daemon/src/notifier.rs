//! Desktop notifications over `org.freedesktop.Notifications`

use std::collections::HashMap;

use anyhow::Context;
use tracing::{info, warn};
use zbus::zvariant::Value;

use trektrack_core::ports::{INotificationService, Notification};

const APP_NAME: &str = "trektrack";
const NOTIFICATIONS_NAME: &str = "org.freedesktop.Notifications";
const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";

/// Sends notifications to the desktop, or only logs them when no session
/// bus is reachable
pub struct DesktopNotifier {
    connection: Option<zbus::Connection>,
}

impl DesktopNotifier {
    /// Connects to the session bus; falls back to log-only on failure
    pub async fn connect() -> Self {
        match zbus::Connection::session().await {
            Ok(connection) => Self {
                connection: Some(connection),
            },
            Err(e) => {
                warn!(error = %e, "Session bus unavailable, notifications will only be logged");
                Self::log_only()
            }
        }
    }

    pub fn log_only() -> Self {
        Self { connection: None }
    }
}

#[async_trait::async_trait]
impl INotificationService for DesktopNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            title = %notification.title,
            body = %notification.body,
            category = %notification.category,
            "Notification"
        );
        let Some(connection) = &self.connection else {
            return Ok(());
        };

        let mut hints: HashMap<&str, Value<'_>> = HashMap::new();
        hints.insert("urgency", Value::U8(notification.urgency.level()));
        hints.insert("category", Value::from(notification.category.hint()));
        let actions: Vec<&str> = Vec::new();

        connection
            .call_method(
                Some(NOTIFICATIONS_NAME),
                NOTIFICATIONS_PATH,
                Some(NOTIFICATIONS_NAME),
                "Notify",
                &(
                    APP_NAME,
                    0u32,
                    "",
                    notification.title.as_str(),
                    notification.body.as_str(),
                    actions,
                    hints,
                    -1i32,
                ),
            )
            .await
            .context("Failed to send desktop notification")?;
        Ok(())
    }
}
