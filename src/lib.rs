//! Text-based multi-user chat relay over TCP.
//!
//! Clients connect, get their remote address as a default display name, and
//! exchange public broadcasts or direct messages through a single in-memory
//! relay process. Each module covers one responsibility:
//!
//! - [`cli`] parses the command-line interface for serve and client modes.
//! - [`server`] accepts connections and runs one supervisor per session,
//!   including the idle-timeout eviction policy.
//! - [`registry`] is the lock-guarded directory of online sessions.
//! - [`router`] fans broadcast messages out to every session's mailbox.
//! - [`session`] holds per-client state and the outbound mailbox.
//! - [`protocol`] classifies input lines (`who`, `rename|`, `to|`, broadcast)
//!   and produces the wire replies.
//! - [`wire`] is the newline-delimited text framing used on both ends.
//! - [`client`] is the interactive terminal client.
//!
//! Unit tests live beside the code; the tests in `tests/` exercise the relay
//! over real sockets.

pub mod cli;
pub mod client;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod wire;
