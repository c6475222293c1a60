//! store - Shared message collection with live subscriptions
//!
//! A subscription is a lazy stream of [`MessageBatch`] snapshots:
//! - the first item is the current state of the collection
//! - every later item follows one or more writes (bursts coalesce)
//! - it ends only when the store itself goes away
//! - calling `subscribe` again restarts from a fresh snapshot

mod memory;

use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::Stream;

use crate::protocol::{ChatMessage, MessageBatch, NewMessage};

pub use memory::MemoryStore;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Write a message; the store assigns its id and timestamp.
    async fn add(&self, message: NewMessage) -> Result<ChatMessage>;

    /// The `limit` most recent messages, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Start a live feed of snapshots holding at most `limit` messages each.
    fn subscribe(&self, limit: usize) -> Subscription;
}

/// Live feed handle returned by [`MessageStore::subscribe`].
pub struct Subscription {
    inner: Pin<Box<dyn Stream<Item = MessageBatch> + Send>>,
}

impl Subscription {
    pub fn new(stream: impl Stream<Item = MessageBatch> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for Subscription {
    type Item = MessageBatch;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
