//! VM handle cache.
//!
//! Resolved handles are kept per `(session, display name)`, so the same name
//! on two connections never shares an entry. Entries are dropped when their
//! session is closed and are never refreshed when a VM is renamed or removed
//! outside the library; such handles fail on their next remote call.

use crate::config::StaleHandlePolicy;
use crate::error::Result;
use crate::registry::{Connection, SessionId};
use sphere_api::VmHandle;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache of resolved VM handles.
#[derive(Default)]
pub struct VmCache {
    entries: HashMap<(SessionId, String), VmHandle>,
}

impl VmCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `name` on `connection`, resolving it on first use.
    ///
    /// A cached entry whose session no longer reports live authentication is
    /// handled according to `policy`; see [`StaleHandlePolicy`].
    ///
    /// # Errors
    ///
    /// Propagates the client's error (typically `VmNotFound`) when the name
    /// has to be resolved and the lookup fails.
    pub async fn resolve(
        &mut self,
        connection: &Connection,
        name: &str,
        policy: StaleHandlePolicy,
    ) -> Result<VmHandle> {
        let key = (connection.id(), name.to_string());

        if let Some(vm) = self.entries.get(&key) {
            if connection.session().is_connected().await {
                tracing::trace!(vm = %name, session = %connection.id(), "VM handle cache hit");
                return Ok(Arc::clone(vm));
            }

            tracing::warn!(
                vm = %name,
                host = %connection.host(),
                session = %connection.id(),
                ?policy,
                "Cached VM handle belongs to a session that is no longer authenticated"
            );
            match policy {
                StaleHandlePolicy::Keep => return Ok(Arc::clone(vm)),
                StaleHandlePolicy::Refresh => {
                    self.entries.remove(&key);
                }
            }
        }

        tracing::debug!(vm = %name, host = %connection.host(), "Resolving VM by name");
        let vm = connection.session().vm_by_name(name).await?;
        self.entries.insert(key, Arc::clone(&vm));
        Ok(vm)
    }

    /// Drop every entry owned by `session`. Returns the number removed.
    pub fn invalidate_for_session(&mut self, session: SessionId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(owner, _), _| *owner != session);
        let removed = before - self.entries.len();
        tracing::debug!(session = %session, removed, "Invalidated VM handles for session");
        removed
    }

    /// Drop every entry. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        tracing::debug!(removed, "Cleared VM handle cache");
        removed
    }

    /// Whether a handle for `name` on `session` is cached.
    pub fn contains(&self, session: SessionId, name: &str) -> bool {
        self.entries.contains_key(&(session, name.to_string()))
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no handles are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
