//! Author notifications for moderation decisions.

mod service;

pub use service::NotificationService;

use crate::content_store::{ContentStore, Notification};
use anyhow::Result;
use std::sync::Arc;

/// Delivers a notification to its user.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Persists notifications in the content database.
pub struct StoreNotifier {
    store: Arc<dyn ContentStore>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

impl Notifier for StoreNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.store.insert_notification(notification)
    }
}
