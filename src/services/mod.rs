//! Business logic services

pub mod borrow;
pub mod broadcast;
pub mod eligibility;
pub mod expiry;
pub mod inventory;
pub mod notifications;
pub mod redis;

use std::{sync::Arc, time::Duration};

use crate::{
    config::{BorrowConfig, NotificationsConfig},
    error::AppResult,
    repository::BorrowStore,
};

use self::{
    borrow::BorrowService,
    broadcast::BroadcastHub,
    expiry::ExpiryScheduler,
    inventory::InventoryService,
    notifications::{Notifier, Publisher},
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub borrow: BorrowService,
    pub inventory: InventoryService,
    pub notifier: Notifier,
    /// Set when events are served over SSE
    pub hub: Option<BroadcastHub>,
    store: Arc<dyn BorrowStore>,
}

impl Services {
    /// Create all services on top of one store and one event transport
    pub fn new(
        store: Arc<dyn BorrowStore>,
        publisher: Arc<dyn Publisher>,
        hub: Option<BroadcastHub>,
        scheduler: ExpiryScheduler,
        notifications: &NotificationsConfig,
        borrow_config: &BorrowConfig,
    ) -> Self {
        let notifier = Notifier::new(
            publisher,
            Duration::from_millis(notifications.publish_timeout_ms),
        );
        let borrow = BorrowService::new(
            store.clone(),
            notifier.clone(),
            scheduler,
            chrono::Duration::minutes(borrow_config.acceptance_window_minutes),
            borrow_config.per_request_timers,
        );
        let inventory = InventoryService::new(store.clone(), borrow.clone());

        Self {
            borrow,
            inventory,
            notifier,
            hub,
            store,
        }
    }

    /// Check the store answers
    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }
}
