//! Registry event subscriptions.
//!
//! A [`Subscription`] owns a background poller that walks an [`EventSource`]
//! block by block and delivers typed [`RegistryEvent`]s over a bounded channel.
//! `unsubscribe` stops the poller and waits for it; dropping the handle aborts it.

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use crate::{
    types::{MessageId, MessageStatus},
    Error,
};

const EVENT_BUFFER: usize = 256;
const MAX_BLOCK_RANGE: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    MessageRegistered {
        message_id: MessageId,
        block_number: Option<u64>,
    },
    StatusUpdated {
        message_id: MessageId,
        status: MessageStatus,
        block_number: Option<u64>,
    },
}

impl RegistryEvent {
    pub fn message_id(&self) -> MessageId {
        match self {
            Self::MessageRegistered { message_id, .. } | Self::StatusUpdated { message_id, .. } => *message_id,
        }
    }

    /// True when the event means a new relay candidate may exist.
    pub fn signals_pending(&self) -> bool {
        match self {
            Self::MessageRegistered { .. } => true,
            Self::StatusUpdated { status, .. } => *status == MessageStatus::Pending,
        }
    }
}

#[async_trait]
pub trait EventSource: Send + Sync {
    fn label(&self) -> String;

    async fn latest_block(&self) -> Result<u64, Error>;

    /// Events in the inclusive block range.
    async fn events_between(&self, from_block: u64, to_block: u64) -> Result<Vec<RegistryEvent>, Error>;
}

pub struct Subscription {
    events: mpsc::Receiver<RegistryEvent>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

/// Starts polling `source` from its current head every `poll_every`.
pub fn subscribe(source: Arc<dyn EventSource>, poll_every: Duration) -> Subscription {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let (cancel, cancelled) = watch::channel(false);
    let task = tokio::spawn(poll_source(source, poll_every, tx, cancelled));

    Subscription {
        events: rx,
        cancel,
        task: Some(task),
    }
}

impl Subscription {
    /// Next event, or `None` once the poller has stopped.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        self.events.recv().await
    }

    pub async fn unsubscribe(mut self) {
        let _ = self.cancel.send(true);
        self.events.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_source(
    source: Arc<dyn EventSource>,
    poll_every: Duration,
    tx: mpsc::Sender<RegistryEvent>,
    mut cancelled: watch::Receiver<bool>,
) {
    let label = source.label();
    let mut next_block: Option<u64> = None;

    loop {
        match source.latest_block().await {
            Ok(head) => {
                // First poll starts at the current head.
                let from = *next_block.get_or_insert(head);
                if from <= head {
                    let to = head.min(from.saturating_add(MAX_BLOCK_RANGE - 1));
                    match source.events_between(from, to).await {
                        Ok(events) => {
                            debug!("{}: {} event(s) in blocks {}..={}", label, events.len(), from, to);
                            for event in events {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            next_block = Some(to + 1);
                        }
                        Err(e) => warn!("{}: failed to read events: {}", label, e),
                    }
                }
            }
            Err(e) => warn!("{}: failed to read block number: {}", label, e),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_every) => {}
            _ = cancelled.changed() => {
                if *cancelled.borrow() {
                    return;
                }
            }
        }
    }
}
