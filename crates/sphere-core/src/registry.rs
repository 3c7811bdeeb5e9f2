//! Connection registry: open sessions addressed by index or alias.
//!
//! Indices start at `1` and are never reused until the registry is drained
//! with [`ConnectionCache::close_all`]; closing a single connection only
//! leaves the registry without a current connection.

use crate::error::{CoreError, Result};
use sphere_api::SessionHandle;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Identity of an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered session and where it points.
#[derive(Clone)]
pub struct Connection {
    id: SessionId,
    host: String,
    session: SessionHandle,
}

impl Connection {
    /// Wrap a freshly opened session.
    pub fn new(host: impl Into<String>, session: SessionHandle) -> Self {
        Self {
            id: SessionId::new(),
            host: host.into(),
            session,
        }
    }

    /// Session identity.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Host the session was opened to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Underlying client session.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Registry of open connections with a current one.
#[derive(Debug)]
pub struct ConnectionCache<T> {
    connections: Vec<T>,
    aliases: HashMap<String, usize>,
    current: Option<usize>,
}

impl<T> Default for ConnectionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConnectionCache<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            aliases: HashMap::new(),
            current: None,
        }
    }

    /// Register a connection, make it current and return its index.
    ///
    /// An alias already pointing at another connection is moved to this one.
    pub fn register(&mut self, connection: T, alias: Option<&str>) -> usize {
        self.connections.push(connection);
        let index = self.connections.len();
        if let Some(alias) = alias {
            self.aliases.insert(alias.to_string(), index);
        }
        self.current = Some(index);
        index
    }

    /// Resolve an alias or a 1-based index. Aliases win over numeric text.
    pub fn resolve(&self, index_or_alias: &str) -> Result<usize> {
        if let Some(index) = self.aliases.get(index_or_alias) {
            return Ok(*index);
        }
        match index_or_alias.trim().parse::<usize>() {
            Ok(index) if index >= 1 && index <= self.connections.len() => Ok(index),
            _ => Err(CoreError::ConnectionNotFound(index_or_alias.to_string())),
        }
    }

    /// Make the connection named by `index_or_alias` current and return it.
    pub fn switch(&mut self, index_or_alias: &str) -> Result<&T> {
        let index = self.resolve(index_or_alias)?;
        self.current = Some(index);
        Ok(&self.connections[index - 1])
    }

    /// Connection by index or alias, without switching.
    pub fn get(&self, index_or_alias: &str) -> Result<&T> {
        let index = self.resolve(index_or_alias)?;
        Ok(&self.connections[index - 1])
    }

    /// The current connection, if any.
    pub fn current(&self) -> Option<&T> {
        self.current.map(|index| &self.connections[index - 1])
    }

    /// Index of the current connection, if any.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Leave the registry without a current connection.
    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Number of registered connections, closed ones included.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True if nothing was registered since the last reset.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Take every connection out and reset index allocation to `1`.
    pub fn close_all(&mut self) -> Vec<T> {
        self.aliases.clear();
        self.current = None;
        std::mem::take(&mut self.connections)
    }
}
