//! Queue event delivery.
//!
//! Observers register explicitly and receive events on their own unbounded
//! channel, so dispatch never waits on a slow consumer. Unsubscribing (or
//! dropping the [`Subscription`]) is safe while events are being published.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use vrender_models::{JobId, JobOutcome, JobStatus, ProgressSnapshot};

/// Notification sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A job was added to or removed from the queue
    QueueChanged,
    StatusChanged { job_id: JobId, status: JobStatus },
    Progress {
        job_id: JobId,
        snapshot: ProgressSnapshot,
    },
    /// Terminal result; sent exactly once per executed job
    Finished { job_id: JobId, outcome: JobOutcome },
}

impl QueueEvent {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueEvent::QueueChanged => None,
            QueueEvent::StatusChanged { job_id, .. }
            | QueueEvent::Progress { job_id, .. }
            | QueueEvent::Finished { job_id, .. } => Some(*job_id),
        }
    }
}

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Default)]
pub(crate) struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, UnboundedSender<QueueEvent>)>>,
}

impl EventBus {
    fn subscribers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, UnboundedSender<QueueEvent>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push((id, tx));
        Subscription {
            id,
            receiver: rx,
            bus: Arc::clone(self),
        }
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Deliver to every live subscriber, dropping the ones whose receiver is gone.
    pub(crate) fn publish(&self, event: QueueEvent) {
        self.subscribers()
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.subscribers().len()
    }
}

/// Receiving end of a registration. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: UnboundedReceiver<QueueEvent>,
    bus: Arc<EventBus>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<QueueEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking receive for callers outside the runtime.
    pub fn blocking_recv(&mut self) -> Option<QueueEvent> {
        self.receiver.blocking_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
