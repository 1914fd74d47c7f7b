//! Redis pub/sub event transport

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};

use super::notifications::{BorrowEvent, PublishError, Publisher, Topic};
use crate::error::{AppError, AppResult};

/// Publishes each event as JSON on the topic's channel
pub struct RedisPublisher {
    conn: ConnectionManager,
    closed: AtomicBool,
}

impl RedisPublisher {
    /// Connect and check the server answers
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;

        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis connection test failed: {}", e)))?;

        Ok(Self {
            conn,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, topic: &Topic, event: &BorrowEvent) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }

        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(topic.channel(), payload)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        tracing::info!("Redis event publisher closed");
    }
}
