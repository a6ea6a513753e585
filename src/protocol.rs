//! Command grammar and dispatch for one decoded input line.
//!
//! The wire protocol is plain text: `who`, `rename|<name>`,
//! `to|<name>|<message>`, and everything else is a public broadcast. The
//! Chinese notice strings are part of the wire contract; existing clients
//! match on them verbatim.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::registry::{Registry, RegistryError};
use crate::router::Router;
use crate::session::SessionHandle;

pub const NOTICE_ONLINE: &str = "已上线";
pub const NOTICE_OFFLINE: &str = "已下线";
pub const NOTICE_KICKED: &str = "因超时，你被踢了";

const REPLY_PRESENT: &str = "在线...";
const ERR_NAME_TAKEN: &str = "当前用户名已被使用";
const ERR_NO_SUCH_USER: &str = "该用户名不存在";
const ERR_EMPTY_MESSAGE: &str = "无消息记录，请重发";
const ERR_MALFORMED_DIRECT: &str = "消息格式不正确，请使用 \"to|张三|你好啊\"格式。";

/// Formats the `[address]name:text` tag used for broadcasts, presence lines,
/// and the join/leave notices.
pub fn tagged(addr: SocketAddr, name: &str, text: &str) -> String {
    format!("[{addr}]{name}:{text}")
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Who,
    Rename(&'a str),
    Direct { target: &'a str, content: &'a str },
    Broadcast(&'a str),
}

impl<'a> Command<'a> {
    /// Classifies one input line. Empty lines carry no command; a `rename|`
    /// with an empty name segment falls through to a broadcast like any
    /// other unrecognized text.
    pub fn parse(line: &'a str) -> Option<Self> {
        if line.is_empty() {
            return None;
        }
        if line == "who" {
            return Some(Command::Who);
        }
        if let Some(rest) = line.strip_prefix("rename|") {
            let name = rest.split('|').next().unwrap_or_default();
            if !name.is_empty() {
                return Some(Command::Rename(name));
            }
        }
        if let Some(rest) = line.strip_prefix("to|") {
            let (target, content) = match rest.split_once('|') {
                Some((target, content)) => (target, content),
                None => (rest, ""),
            };
            return Some(Command::Direct { target, content });
        }
        Some(Command::Broadcast(line))
    }
}

/// Acts on one decoded line from `session`: registry queries and mutations
/// answer the requester directly through its mailbox, everything else goes
/// through the broadcast router.
pub async fn dispatch(
    line: &str,
    session: &Arc<SessionHandle>,
    registry: &Registry,
    router: &Router,
) {
    let Some(command) = Command::parse(line) else {
        return;
    };

    match command {
        Command::Who => {
            for (name, member) in registry.snapshot().await {
                session.enqueue(tagged(member.addr(), &name, REPLY_PRESENT));
            }
        }
        Command::Rename(new_name) => {
            let current = session.name();
            match registry.rename(&current, new_name).await {
                Ok(()) => session.enqueue(format!("用户名已更新：{new_name}")),
                Err(RegistryError::NameTaken) => session.enqueue(ERR_NAME_TAKEN),
            }
        }
        Command::Direct { target, content } => {
            if target.is_empty() {
                session.enqueue(ERR_MALFORMED_DIRECT);
                return;
            }
            let Some(peer) = registry.lookup(target).await else {
                session.enqueue(ERR_NO_SUCH_USER);
                return;
            };
            if content.is_empty() {
                session.enqueue(ERR_EMPTY_MESSAGE);
                return;
            }
            let sender = session.name();
            peer.enqueue(format!("{sender} 对您说 {content}"));
        }
        Command::Broadcast(text) => {
            let name = session.name();
            router.publish(tagged(session.addr(), &name, text)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session(port: u16) -> (Arc<SessionHandle>, mpsc::Receiver<String>) {
        let addr = format!("127.0.0.1:{port}").parse().expect("valid test address");
        SessionHandle::new(addr)
    }

    #[test]
    fn parse_classifies_commands() {
        assert_eq!(Command::parse("who"), Some(Command::Who));
        assert_eq!(Command::parse("rename|carol"), Some(Command::Rename("carol")));
        assert_eq!(
            Command::parse("to|bob|hello"),
            Some(Command::Direct { target: "bob", content: "hello" })
        );
        assert_eq!(Command::parse("hi all"), Some(Command::Broadcast("hi all")));
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn parse_keeps_pipes_inside_direct_content() {
        assert_eq!(
            Command::parse("to|bob|a|b"),
            Some(Command::Direct { target: "bob", content: "a|b" })
        );
    }

    #[test]
    fn parse_treats_incomplete_direct_as_empty_parts() {
        assert_eq!(
            Command::parse("to|bob"),
            Some(Command::Direct { target: "bob", content: "" })
        );
        assert_eq!(
            Command::parse("to|"),
            Some(Command::Direct { target: "", content: "" })
        );
    }

    #[test]
    fn parse_rename_without_name_is_a_broadcast() {
        assert_eq!(Command::parse("rename|"), Some(Command::Broadcast("rename|")));
    }

    #[tokio::test]
    async fn who_lists_every_member_to_the_requester_only() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&registry));
        let (alice, mut alice_mailbox) = session(9001);
        let (bob, mut bob_mailbox) = session(9002);
        registry
            .register("alice", Arc::clone(&alice))
            .await
            .expect("register alice");
        registry.register("bob", bob).await.expect("register bob");

        dispatch("who", &alice, &registry, &router).await;

        let mut lines = vec![
            alice_mailbox.recv().await.expect("first who line"),
            alice_mailbox.recv().await.expect("second who line"),
        ];
        lines.sort();
        assert_eq!(
            lines,
            vec![
                "[127.0.0.1:9001]alice:在线...".to_string(),
                "[127.0.0.1:9002]bob:在线...".to_string(),
            ]
        );
        assert!(bob_mailbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn direct_message_reaches_only_the_target() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&registry));
        let (alice, mut alice_mailbox) = session(9001);
        let (bob, mut bob_mailbox) = session(9002);
        registry
            .register("alice", Arc::clone(&alice))
            .await
            .expect("register alice");
        registry.register("bob", bob).await.expect("register bob");

        dispatch("to|bob|hello", &alice, &registry, &router).await;

        assert_eq!(bob_mailbox.recv().await.as_deref(), Some("alice 对您说 hello"));
        assert!(alice_mailbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn direct_message_to_unknown_user_reports_and_delivers_nothing() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&registry));
        let (alice, mut alice_mailbox) = session(9001);
        let (bob, mut bob_mailbox) = session(9002);
        registry
            .register("alice", Arc::clone(&alice))
            .await
            .expect("register alice");
        registry.register("bob", bob).await.expect("register bob");

        dispatch("to|ghost|hello", &alice, &registry, &router).await;

        assert_eq!(alice_mailbox.recv().await.as_deref(), Some("该用户名不存在"));
        assert!(bob_mailbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn direct_message_without_content_reports_empty() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&registry));
        let (alice, mut alice_mailbox) = session(9001);
        let (bob, mut bob_mailbox) = session(9002);
        registry
            .register("alice", Arc::clone(&alice))
            .await
            .expect("register alice");
        registry.register("bob", bob).await.expect("register bob");

        dispatch("to|bob|", &alice, &registry, &router).await;

        assert_eq!(alice_mailbox.recv().await.as_deref(), Some("无消息记录，请重发"));
        assert!(bob_mailbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn rename_collision_reports_error_and_keeps_state() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&registry));
        let (alice, mut alice_mailbox) = session(9001);
        let (bob, _bob_mailbox) = session(9002);
        registry
            .register("alice", Arc::clone(&alice))
            .await
            .expect("register alice");
        registry.register("bob", bob).await.expect("register bob");

        dispatch("rename|bob", &alice, &registry, &router).await;

        assert_eq!(alice_mailbox.recv().await.as_deref(), Some("当前用户名已被使用"));
        assert_eq!(alice.name(), "alice");
        assert!(registry.lookup("alice").await.is_some());
    }

    #[tokio::test]
    async fn rename_confirms_and_later_commands_use_the_new_name() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&registry));
        let (alice, mut alice_mailbox) = session(9001);
        let (bob, mut bob_mailbox) = session(9002);
        registry
            .register("alice", Arc::clone(&alice))
            .await
            .expect("register alice");
        registry.register("bob", bob).await.expect("register bob");

        dispatch("rename|carol", &alice, &registry, &router).await;
        assert_eq!(alice_mailbox.recv().await.as_deref(), Some("用户名已更新：carol"));

        dispatch("to|bob|hi", &alice, &registry, &router).await;
        assert_eq!(bob_mailbox.recv().await.as_deref(), Some("carol 对您说 hi"));
    }

    #[tokio::test]
    async fn plain_text_is_broadcast_with_the_sender_tag() {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&registry));
        let (alice, mut alice_mailbox) = session(9001);
        let (bob, mut bob_mailbox) = session(9002);
        registry
            .register("alice", Arc::clone(&alice))
            .await
            .expect("register alice");
        registry.register("bob", bob).await.expect("register bob");

        dispatch("hi all", &alice, &registry, &router).await;

        let expected = "[127.0.0.1:9001]alice:hi all";
        assert_eq!(alice_mailbox.recv().await.as_deref(), Some(expected));
        assert_eq!(bob_mailbox.recv().await.as_deref(), Some(expected));
    }
}
