use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::{FeedCallback, FeedEvent};

/// Owner side of one live stream. Closing is idempotent and also happens
/// on drop, so a replaced handle never leaves its socket behind.
pub struct SubscriptionHandle {
    id: Uuid,
    stream: String,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

/// Producer side: forwards feed events until the handle is closed.
pub struct FeedEmitter {
    closed: Arc<AtomicBool>,
    callback: FeedCallback,
}

impl SubscriptionHandle {
    pub fn open(stream: impl Into<String>, callback: FeedCallback) -> (Self, FeedEmitter) {
        let closed = Arc::new(AtomicBool::new(false));
        let handle = Self {
            id: Uuid::new_v4(),
            stream: stream.into(),
            closed: Arc::clone(&closed),
            task: None,
        };
        (handle, FeedEmitter { closed, callback })
    }

    pub fn attach_task(&mut self, task: JoinHandle<()>) {
        if self.is_closed() {
            task.abort();
        } else {
            self.task = Some(task);
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!("Unsubscribed from {} ({})", self.stream, self.id);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl FeedEmitter {
    /// Returns `false` once the subscription is closed; the event is dropped.
    pub fn emit(&self, event: FeedEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        (self.callback)(event);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
