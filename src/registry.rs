use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::session::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    NameTaken,
}

/// Shared directory of online sessions, keyed by display name.
///
/// All access goes through the reader/writer lock: membership queries take a
/// read lock, mutations take a write lock. The lock is never held across
/// socket I/O; callers that need to iterate while writing to clients use
/// [`Registry::snapshot`].
#[derive(Default)]
pub struct Registry {
    members: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the session under `name`, failing without side effects if the
    /// name is already in use. The session's display name is synced to the
    /// key under the same lock, so the two never disagree.
    pub async fn register(
        &self,
        name: &str,
        session: Arc<SessionHandle>,
    ) -> Result<(), RegistryError> {
        let mut members = self.members.write().await;
        if members.contains_key(name) {
            return Err(RegistryError::NameTaken);
        }
        session.set_name(name.to_string());
        members.insert(name.to_string(), session);
        Ok(())
    }

    /// Moves a session from `old` to `new` and updates the session's own
    /// display name, all under a single write-lock acquisition, so a
    /// concurrent lookup sees either the old mapping or the new one but
    /// never a gap or a duplicate.
    ///
    /// Renaming to a name already present fails and leaves everything
    /// unchanged, including renaming to the currently held name.
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), RegistryError> {
        let mut members = self.members.write().await;
        if members.contains_key(new) {
            return Err(RegistryError::NameTaken);
        }
        // The old entry can already be gone if the session was evicted while
        // this command was in flight; the rename then quietly dies with it.
        if let Some(session) = members.remove(old) {
            session.set_name(new.to_string());
            members.insert(new.to_string(), session);
        }
        Ok(())
    }

    /// Removes the entry for `name`, returning the session if one was
    /// registered. Removing an absent name is a no-op.
    pub async fn unregister(&self, name: &str) -> Option<Arc<SessionHandle>> {
        self.members.write().await.remove(name)
    }

    /// Removes the entry for this exact session, whatever name it currently
    /// holds. The name is read under the write lock, where it cannot change,
    /// so a rename racing the removal can never leave a stale entry behind.
    /// Returns whether an entry was removed; calling again is a no-op.
    pub async fn remove_session(&self, session: &Arc<SessionHandle>) -> bool {
        let mut members = self.members.write().await;
        let name = session.name();
        if members.get(&name).is_some_and(|member| Arc::ptr_eq(member, session)) {
            members.remove(&name);
            return true;
        }
        false
    }

    pub async fn lookup(&self, name: &str) -> Option<Arc<SessionHandle>> {
        self.members.read().await.get(name).cloned()
    }

    /// Point-in-time copy of the membership, for fanning out or listing
    /// without holding the lock while talking to sockets.
    pub async fn snapshot(&self) -> Vec<(String, Arc<SessionHandle>)> {
        self.members
            .read()
            .await
            .iter()
            .map(|(name, session)| (name.clone(), Arc::clone(session)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }
}
