//! Lifecycle event fan-out to requesters and administrators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::models::{borrow::BorrowStatus, requester::Requester};

/// Audience of an event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Shared administrator room
    Admins,
    /// Private channel of one requester
    Requester(Requester),
}

impl Topic {
    /// Channel name on the wire
    pub fn channel(&self) -> String {
        match self {
            Topic::Admins => "admin_room".to_string(),
            Topic::Requester(Requester::Student(id)) => format!("student_{}", id),
            Topic::Requester(Requester::Lecturer(id)) => format!("lecturer_{}", id),
        }
    }
}

/// Lifecycle events; serialized as `{"event": "<name>", ...payload}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BorrowEvent {
    NewBorrowRequest {
        transaction_id: Uuid,
        requester: Requester,
        requester_name: Option<String>,
        class_name: Option<String>,
        acceptance_deadline: DateTime<Utc>,
        promised_return: DateTime<Utc>,
    },
    BorrowAccepted {
        transaction_id: Uuid,
        accepted_at: DateTime<Utc>,
    },
    StudentArrived {
        transaction_id: Uuid,
        requester: Requester,
    },
    BorrowCompleted {
        transaction_id: Uuid,
        item_id: i32,
        item_name: String,
        promised_return: DateTime<Utc>,
    },
    RequestProcessed {
        transaction_id: Uuid,
        status: BorrowStatus,
    },
    BorrowRejected {
        transaction_id: Uuid,
        reason: String,
    },
    BorrowAutoRejected {
        transaction_id: Uuid,
        reason: String,
    },
    RequestAutoRejected {
        transaction_id: Uuid,
        requester: Requester,
    },
    ItemOverdue {
        transaction_id: Uuid,
        requester: Requester,
        item_id: Option<i32>,
        promised_return: DateTime<Utc>,
    },
    DirectLendingCompleted {
        transaction_id: Uuid,
        requester: Requester,
        item_id: i32,
        item_name: String,
        promised_return: DateTime<Utc>,
    },
    ItemReturned {
        transaction_id: Uuid,
        requester: Requester,
        item_id: Option<i32>,
        returned_at: DateTime<Utc>,
    },
}

impl BorrowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BorrowEvent::NewBorrowRequest { .. } => "new_borrow_request",
            BorrowEvent::BorrowAccepted { .. } => "borrow_accepted",
            BorrowEvent::StudentArrived { .. } => "student_arrived",
            BorrowEvent::BorrowCompleted { .. } => "borrow_completed",
            BorrowEvent::RequestProcessed { .. } => "request_processed",
            BorrowEvent::BorrowRejected { .. } => "borrow_rejected",
            BorrowEvent::BorrowAutoRejected { .. } => "borrow_auto_rejected",
            BorrowEvent::RequestAutoRejected { .. } => "request_auto_rejected",
            BorrowEvent::ItemOverdue { .. } => "item_overdue",
            BorrowEvent::DirectLendingCompleted { .. } => "direct_lending_completed",
            BorrowEvent::ItemReturned { .. } => "item_returned",
        }
    }

    pub fn transaction_id(&self) -> Uuid {
        match self {
            BorrowEvent::NewBorrowRequest { transaction_id, .. }
            | BorrowEvent::BorrowAccepted { transaction_id, .. }
            | BorrowEvent::StudentArrived { transaction_id, .. }
            | BorrowEvent::BorrowCompleted { transaction_id, .. }
            | BorrowEvent::RequestProcessed { transaction_id, .. }
            | BorrowEvent::BorrowRejected { transaction_id, .. }
            | BorrowEvent::BorrowAutoRejected { transaction_id, .. }
            | BorrowEvent::RequestAutoRejected { transaction_id, .. }
            | BorrowEvent::ItemOverdue { transaction_id, .. }
            | BorrowEvent::DirectLendingCompleted { transaction_id, .. }
            | BorrowEvent::ItemReturned { transaction_id, .. } => *transaction_id,
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("publisher is closed")]
    Closed,
}

/// Event transport
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &Topic, event: &BorrowEvent) -> Result<(), PublishError>;

    /// Release transport resources; later publishes may fail
    async fn close(&self) {}
}

enum Dispatch {
    Publish(Topic, BorrowEvent),
    Flush(oneshot::Sender<()>),
}

/// Best-effort front of a [`Publisher`].
///
/// Called after the triggering unit has committed. Events are queued and
/// handed to the transport by one background task in the order they were
/// queued, so a caller never waits on delivery. Failures and timeouts are
/// logged and dropped.
#[derive(Clone)]
pub struct Notifier {
    queue: mpsc::UnboundedSender<Dispatch>,
    publisher: Arc<dyn Publisher>,
}

impl Notifier {
    /// Spawns the delivery task; must be called inside a Tokio runtime
    pub fn new(publisher: Arc<dyn Publisher>, timeout: Duration) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(deliver(publisher.clone(), timeout, pending));
        Self { queue, publisher }
    }

    pub fn publish_to_requester(&self, requester: &Requester, event: &BorrowEvent) {
        self.enqueue(Topic::Requester(requester.clone()), event)
    }

    pub fn publish_to_admins(&self, event: &BorrowEvent) {
        self.enqueue(Topic::Admins, event)
    }

    /// Wait until every event queued so far went through the transport.
    /// `false` when the delivery task is gone.
    pub async fn flush(&self) -> bool {
        let (done, delivered) = oneshot::channel();
        if self.queue.send(Dispatch::Flush(done)).is_err() {
            return false;
        }
        delivered.await.is_ok()
    }

    /// Deliver what is queued, then release the transport
    pub async fn close(&self) {
        if !self.flush().await {
            tracing::warn!("Event delivery task stopped before shutdown");
        }
        self.publisher.close().await
    }

    fn enqueue(&self, topic: Topic, event: &BorrowEvent) {
        if self.queue.send(Dispatch::Publish(topic, event.clone())).is_err() {
            tracing::warn!(
                event = event.name(),
                transaction_id = %event.transaction_id(),
                "Event delivery task stopped, dropping lifecycle event"
            );
        }
    }
}

async fn deliver(
    publisher: Arc<dyn Publisher>,
    timeout: Duration,
    mut pending: mpsc::UnboundedReceiver<Dispatch>,
) {
    while let Some(dispatch) = pending.recv().await {
        match dispatch {
            Dispatch::Publish(topic, event) => publish(publisher.as_ref(), timeout, &topic, &event).await,
            Dispatch::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn publish(publisher: &dyn Publisher, timeout: Duration, topic: &Topic, event: &BorrowEvent) {
    match tokio::time::timeout(timeout, publisher.publish(topic, event)).await {
        Ok(Ok(())) => {
            tracing::debug!(
                event = event.name(),
                channel = %topic.channel(),
                "Published lifecycle event"
            );
        }
        Ok(Err(e)) => {
            tracing::warn!(
                event = event.name(),
                channel = %topic.channel(),
                transaction_id = %event.transaction_id(),
                "Failed to publish lifecycle event: {}",
                e
            );
        }
        Err(_) => {
            tracing::warn!(
                event = event.name(),
                channel = %topic.channel(),
                transaction_id = %event.transaction_id(),
                "Publishing lifecycle event timed out after {:?}",
                timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted() -> BorrowEvent {
        BorrowEvent::BorrowAccepted {
            transaction_id: Uuid::nil(),
            accepted_at: Utc::now(),
        }
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Topic::Admins.channel(), "admin_room");
        assert_eq!(
            Topic::Requester(Requester::Student("2201001".into())).channel(),
            "student_2201001"
        );
        assert_eq!(
            Topic::Requester(Requester::Lecturer("198703".into())).channel(),
            "lecturer_198703"
        );
    }

    #[test]
    fn test_event_tag_matches_name() {
        let event = BorrowEvent::BorrowRejected {
            transaction_id: Uuid::nil(),
            reason: "No show".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["reason"], "No show");
    }

    #[tokio::test]
    async fn test_transport_error_is_swallowed() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(PublishError::Transport("connection reset".into())));

        let notifier = Notifier::new(Arc::new(publisher), Duration::from_millis(50));
        notifier.publish_to_admins(&accepted());
        assert!(notifier.flush().await);
    }

    #[tokio::test]
    async fn test_events_keep_their_order() {
        let mut publisher = MockPublisher::new();
        let mut seq = mockall::Sequence::new();
        publisher
            .expect_publish()
            .withf(|topic, _| *topic == Topic::Requester(Requester::Student("2201001".into())))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        publisher
            .expect_publish()
            .withf(|topic, _| *topic == Topic::Admins)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        publisher.expect_close().times(1).return_const(());

        let notifier = Notifier::new(Arc::new(publisher), Duration::from_millis(50));
        notifier.publish_to_requester(&Requester::Student("2201001".into()), &accepted());
        notifier.publish_to_admins(&accepted());
        notifier.close().await;
    }

    struct Stalled;

    #[async_trait]
    impl Publisher for Stalled {
        async fn publish(&self, _: &Topic, _: &BorrowEvent) -> Result<(), PublishError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transport_times_out() {
        let notifier = Notifier::new(Arc::new(Stalled), Duration::from_millis(200));
        let started = tokio::time::Instant::now();

        // Queuing returns at once; only the delivery task waits
        notifier.publish_to_requester(&Requester::Student("2201001".into()), &accepted());
        notifier.publish_to_admins(&accepted());
        assert_eq!(started.elapsed(), Duration::ZERO);

        assert!(notifier.flush().await);
        assert!(started.elapsed() >= Duration::from_millis(400));
    }
}
