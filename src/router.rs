use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::registry::Registry;

/// How many broadcasts may be queued ahead of the dispatcher before
/// publishers are made to wait.
const QUEUE_CAPACITY: usize = 256;

/// Central fan-out path: one ordered queue, one dispatcher task.
///
/// Every published line is delivered to the outbound mailbox of each session
/// registered at the moment the dispatcher processes it. Sessions joining
/// mid-dispatch may miss that message; membership and fan-out are
/// deliberately not linearized against each other.
#[derive(Clone)]
pub struct Router {
    queue: mpsc::Sender<String>,
}

impl Router {
    /// Starts the dispatcher task and returns the publishing handle. The
    /// dispatcher exits once every `Router` clone is dropped.
    pub fn new(registry: Arc<Registry>) -> Self {
        let (queue, inbox) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(dispatch_loop(inbox, registry));
        Self { queue }
    }

    /// Appends one fully formatted line to the broadcast queue. Waits only
    /// when the queue is at capacity.
    pub async fn publish(&self, line: String) {
        if self.queue.send(line).await.is_err() {
            warn!("broadcast dispatcher is gone; message dropped");
        }
    }
}

async fn dispatch_loop(mut inbox: mpsc::Receiver<String>, registry: Arc<Registry>) {
    while let Some(line) = inbox.recv().await {
        // Snapshot first so no registry lock is held while enqueueing; a
        // member torn down in between simply drops the delivery.
        for (_, member) in registry.snapshot().await {
            member.enqueue(line.clone());
        }
    }
}
