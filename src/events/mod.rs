//! Status broadcasting.
//!
//! The [`Broadcaster`] owns the status store and the set of attached
//! observers. Every change to the workflow status goes through it: progress
//! is recomputed, the status is persisted, and the same serialized snapshot
//! is pushed to every [`StatusSink`].
//!
//! The broadcaster is not synchronized on its own. The workflow keeps it in
//! the same mutex as the [`Status`], so a snapshot is never serialized from a
//! half-applied update.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::status::Status;
use crate::core::types::SubscriberId;
use crate::storage::{StatusStore, StorageError};

/// Errors reported by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The observer went away. The sink is detached.
    #[error("subscriber disconnected")]
    Closed,

    /// Delivery failed for another reason. The sink stays attached.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Receives serialized status snapshots.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Deliver one snapshot.
    async fn send(&self, snapshot: &str) -> Result<(), SinkError>;
}

/// A sink backed by an unbounded channel.
///
/// The receiving side sees the channel close once the broadcaster drops the
/// sink, which is how connection handlers learn that the run is over.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    /// Create a sink and the receiver for its snapshots.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StatusSink for ChannelSink {
    async fn send(&self, snapshot: &str) -> Result<(), SinkError> {
        self.tx
            .send(snapshot.to_string())
            .map_err(|_| SinkError::Closed)
    }
}

/// Persists the status and fans it out to subscribers.
pub struct Broadcaster<S> {
    store: S,
    sinks: HashMap<SubscriberId, Arc<dyn StatusSink>>,
}

impl<S: StatusStore> Broadcaster<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            sinks: HashMap::new(),
        }
    }

    /// Get the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }

    /// Refresh progress and write the status to the store.
    pub async fn persist(&self, status: &mut Status) -> Result<(), StorageError> {
        status.refresh_progress();
        self.store.save(status).await
    }

    /// Push the current status to every subscriber.
    ///
    /// The status is serialized once. Delivery failures are logged; sinks
    /// whose observer is gone are detached.
    pub async fn broadcast(&mut self, status: &Status) {
        if self.sinks.is_empty() {
            return;
        }

        let snapshot = match status.to_json() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "unable to serialize status");
                return;
            }
        };

        let mut closed = Vec::new();
        for (id, sink) in &self.sinks {
            match sink.send(&snapshot).await {
                Ok(()) => {}
                Err(SinkError::Closed) => {
                    tracing::debug!(subscriber = %id, "subscriber disconnected");
                    closed.push(*id);
                }
                Err(e) => {
                    tracing::warn!(subscriber = %id, error = %e, "unable to write status to subscriber");
                }
            }
        }
        for id in closed {
            self.sinks.remove(&id);
        }
    }

    /// Refresh, persist and broadcast.
    pub async fn publish(&mut self, status: &mut Status) -> Result<(), StorageError> {
        self.persist(status).await?;
        self.broadcast(status).await;
        Ok(())
    }

    /// Attach a subscriber and send it the current status.
    ///
    /// Only the new subscriber receives this snapshot. It sees no earlier
    /// updates.
    pub async fn subscribe(&mut self, sink: Arc<dyn StatusSink>, status: &Status) -> SubscriberId {
        let id = SubscriberId::new();

        match status.to_json() {
            Ok(snapshot) => {
                if let Err(e) = sink.send(&snapshot).await {
                    tracing::warn!(subscriber = %id, error = %e, "unable to write initial status to subscriber");
                }
            }
            Err(e) => tracing::error!(error = %e, "unable to serialize status"),
        }

        self.sinks.insert(id, sink);
        tracing::debug!(subscriber = %id, "subscriber attached");
        id
    }

    /// Detach a subscriber. Returns whether it was attached.
    pub fn unsubscribe(&mut self, id: &SubscriberId) -> bool {
        self.sinks.remove(id).is_some()
    }

    /// Detach every subscriber.
    pub fn close_all(&mut self) {
        let count = self.sinks.len();
        self.sinks.clear();
        if count > 0 {
            tracing::debug!(count, "closed all subscribers");
        }
    }
}
