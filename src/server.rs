use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::protocol::{self, NOTICE_KICKED, NOTICE_OFFLINE, NOTICE_ONLINE};
use crate::registry::{Registry, RegistryError};
use crate::router::Router;
use crate::session::SessionHandle;
use crate::wire;

/// Idle window after which a silent session is kicked, unless overridden.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub struct RelayServer {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn new(listener: TcpListener, idle_timeout: Duration) -> Self {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&registry));
        Self {
            listener,
            state: Arc::new(RelayState {
                registry,
                router,
                idle_timeout,
            }),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves. A failed accept is
    /// logged and the loop keeps going; it never takes the listener down.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

struct RelayState {
    registry: Arc<Registry>,
    router: Router,
    idle_timeout: Duration,
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = supervise_session(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "session ended with error");
        }
    });
}

/// Per-connection control loop.
///
/// Owns the session from accept to teardown: spawns the mailbox writer and
/// the read loop, then waits on the race between inbound activity and the
/// idle timer. Whichever way the session ends, the registry entry is removed
/// exactly once and an offline notice goes out.
async fn supervise_session(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<RelayState>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let (session, mailbox) = SessionHandle::new(peer);
    tokio::spawn(drain_mailbox(mailbox, writer));

    let name = session.name();
    if let Err(RegistryError::NameTaken) =
        state.registry.register(&name, Arc::clone(&session)).await
    {
        // Two live connections can't share a remote address; a stale entry
        // here means an earlier session for this peer has not finished
        // tearing down yet. Refuse rather than clobber it.
        bail!("address {peer} already registered");
    }

    info!(peer = %peer, "client online");
    state
        .router
        .publish(protocol::tagged(peer, &name, NOTICE_ONLINE))
        .await;

    // The read loop signals each complete inbound line; dropping its sender
    // on EOF or a read error is what wakes the supervisor for teardown.
    let (activity_tx, activity_rx) = mpsc::channel(1);
    let read_task = tokio::spawn(read_loop(
        reader,
        Arc::clone(&session),
        Arc::clone(&state),
        activity_tx,
    ));

    let timed_out = wait_for_idle_or_close(activity_rx, state.idle_timeout).await;
    // Stop the read loop before touching the registry so no in-flight
    // command can rename the session out from under the unregister.
    read_task.abort();
    if timed_out {
        debug!(peer = %peer, "idle timeout reached, kicking session");
        session.enqueue(NOTICE_KICKED);
    }

    teardown(&state, &session).await;
    Ok(())
}

/// Blocks on whichever comes first: an activity signal (restart the timer),
/// the read loop going away (`false`), or the idle timer firing (`true`).
async fn wait_for_idle_or_close(mut activity: mpsc::Receiver<()>, idle: Duration) -> bool {
    loop {
        select! {
            signal = activity.recv() => {
                match signal {
                    Some(()) => continue,
                    None => return false,
                }
            }
            _ = time::sleep(idle) => return true,
        }
    }
}

async fn read_loop(
    reader: OwnedReadHalf,
    session: Arc<SessionHandle>,
    state: Arc<RelayState>,
    activity: mpsc::Sender<()>,
) {
    let mut reader = BufReader::new(reader);
    loop {
        match wire::read_line(&mut reader).await {
            Ok(Some(line)) => {
                protocol::dispatch(&line, &session, &state.registry, &state.router).await;
                if activity.send(()).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(peer = %session.addr(), error = %err, "connection read failed");
                break;
            }
        }
    }
}

/// Removes the session from the registry and announces it, exactly once; a
/// second call for the same session finds nothing to remove and stays quiet.
async fn teardown(state: &RelayState, session: &Arc<SessionHandle>) {
    if state.registry.remove_session(session).await {
        let name = session.name();
        info!(peer = %session.addr(), name, "client offline");
        state
            .router
            .publish(protocol::tagged(session.addr(), &name, NOTICE_OFFLINE))
            .await;
    }
}

/// Drains the session mailbox onto the socket. Ends when every sender is
/// gone (session teardown) or the peer stops accepting writes; dropping the
/// write half here is what closes the connection.
async fn drain_mailbox(mut mailbox: mpsc::Receiver<String>, mut writer: OwnedWriteHalf) {
    while let Some(line) = mailbox.recv().await {
        if let Err(err) = wire::write_line(&mut writer, &line).await {
            debug!(error = %err, "mailbox write failed, stopping writer");
            break;
        }
    }
}
