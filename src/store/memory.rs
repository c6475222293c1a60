use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use super::{MessageStore, Subscription};
use crate::protocol::{ChatMessage, MessageBatch, NewMessage};

struct Inner {
    // 按 created_at 排序，时间相同则保持写入顺序
    messages: RwLock<Vec<ChatMessage>>,
    /// Oldest messages beyond this count are dropped
    capacity: usize,
    revision: watch::Sender<u64>,
}

impl Inner {
    async fn snapshot(&self, revision: u64, limit: usize) -> MessageBatch {
        let messages = self.messages.read().await;
        let start = messages.len().saturating_sub(limit);
        MessageBatch {
            revision,
            messages: messages[start..].to_vec(),
        }
    }
}

/// In-process message collection.
///
/// Cloning shares the same collection, so every clone sees the same feed.
/// Only the newest `capacity` messages are retained; reads asking for more
/// get at most that many.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    collection: String,
}

impl MemoryStore {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(collection: impl Into<String>) -> Self {
        Self::with_capacity(collection, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(collection: impl Into<String>, capacity: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                messages: RwLock::new(Vec::new()),
                capacity: capacity.max(1),
                revision,
            }),
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Write with an explicit timestamp.
    pub async fn add_at(&self, message: NewMessage, created_at: DateTime<Utc>) -> ChatMessage {
        let message = message.into_message(Uuid::new_v4().to_string(), created_at);
        {
            let mut messages = self.inner.messages.write().await;
            let pos = messages.partition_point(|m| m.created_at <= created_at);
            messages.insert(pos, message.clone());
            let excess = messages.len().saturating_sub(self.inner.capacity);
            if excess > 0 {
                messages.drain(..excess);
            }
        }
        self.inner.revision.send_modify(|r| *r += 1);

        log::debug!(
            "{}: added {} from {}",
            self.collection,
            message.id,
            message.nickname
        );
        message
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn add(&self, message: NewMessage) -> Result<ChatMessage> {
        Ok(self.add_at(message, Utc::now()).await)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let revision = *self.inner.revision.borrow();
        Ok(self.inner.snapshot(revision, limit).await.messages)
    }

    fn subscribe(&self, limit: usize) -> Subscription {
        let rx = self.inner.revision.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        log::info!("Subscribed to {} (last {} messages)", self.collection, limit);

        let feed = stream::unfold((rx, weak, true), move |(mut rx, weak, first)| async move {
            if !first {
                // Err 表示存储已被释放，订阅结束
                rx.changed().await.ok()?;
            }
            let revision = *rx.borrow_and_update();
            let inner = weak.upgrade()?;
            let batch = inner.snapshot(revision, limit).await;
            drop(inner);
            Some((batch, (rx, weak, false)))
        });

        Subscription::new(feed)
    }
}
