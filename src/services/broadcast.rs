//! In-process event transport served over SSE

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::notifications::{BorrowEvent, PublishError, Publisher, Topic};

/// Event as delivered to subscribers
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub channel: String,
    #[serde(skip)]
    pub topic: Topic,
    #[serde(flatten)]
    pub event: BorrowEvent,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast channel shared by every subscriber; each filters on its topic
#[derive(Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<Envelope>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Publisher for BroadcastHub {
    async fn publish(&self, topic: &Topic, event: &BorrowEvent) -> Result<(), PublishError> {
        let envelope = Envelope {
            channel: topic.channel(),
            topic: topic.clone(),
            event: event.clone(),
            timestamp: Utc::now(),
        };
        // Nobody listening is not a failure
        let _ = self.sender.send(envelope);
        Ok(())
    }
}
