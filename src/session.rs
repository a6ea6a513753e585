use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

/// How many outbound lines a session may have queued before further
/// deliveries to it are dropped. Bounds memory under a slow client.
pub const MAILBOX_CAPACITY: usize = 64;

/// Server-side state for one connected client.
///
/// The handle is shared between the registry, the broadcast dispatcher, and
/// the connection's own tasks. The underlying socket write half lives in a
/// dedicated writer task that drains the mailbox; everything else only ever
/// enqueues.
pub struct SessionHandle {
    addr: SocketAddr,
    name: RwLock<String>,
    outbound: mpsc::Sender<String>,
}

impl SessionHandle {
    /// Creates the handle plus the receiving end of its mailbox. The caller
    /// hands the receiver to exactly one writer task.
    pub fn new(addr: SocketAddr) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = Arc::new(Self {
            addr,
            name: RwLock::new(addr.to_string()),
            outbound,
        });
        (handle, mailbox)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current display name. Defaults to the remote address until the client
    /// renames itself.
    pub fn name(&self) -> String {
        self.name.read().expect("display name lock poisoned").clone()
    }

    /// Replaces the display name. Only the registry calls this, while its
    /// write lock is held, so the name and the registry key change together.
    /// The inner lock is synchronous and never held across an await, which
    /// keeps the registry's remove-rename-insert step one uninterruptible
    /// block.
    pub(crate) fn set_name(&self, name: String) {
        *self.name.write().expect("display name lock poisoned") = name;
    }

    /// Queues one line for delivery to this client, without the trailing
    /// newline; the writer task appends the delimiter.
    ///
    /// Delivery is best-effort: if the session is being torn down (mailbox
    /// closed) or the client is too slow to drain (mailbox full), the line is
    /// dropped.
    pub fn enqueue(&self, line: impl Into<String>) {
        if let Err(err) = self.outbound.try_send(line.into()) {
            debug!(peer = %self.addr, error = %err, "dropping undeliverable line");
        }
    }
}
