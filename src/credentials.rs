//! Credentials used to reach a CalDAV server
//!
//! This crate never persists credentials itself: they are provided by a [`CredentialSupplier`].

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::connection::{CalDavConnection, CalendarConnection};

/// A username/password pair, optionally bound to the server of the account
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    server_url: Option<String>,
}

impl Credentials {
    pub fn new<S: ToString, T: ToString>(username: S, password: T) -> Self {
        Self { username: username.to_string(), password: password.to_string(), server_url: None }
    }

    /// These credentials are only valid on this server, that overrides the configured one
    pub fn with_server<S: ToString>(mut self, server_url: S) -> Self {
        self.server_url = Some(server_url.to_string());
        self
    }

    pub fn username(&self) -> &str { &self.username }
    pub fn password(&self) -> &str { &self.password }
    pub fn server_url(&self) -> Option<&str> { self.server_url.as_deref() }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server_url", &self.server_url)
            .finish()
    }
}


/// Something that knows the CalDAV credentials of users
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    /// Returns `None` in case no CalDAV account is configured for this user
    async fn credentials_for(&self, user: &str) -> Option<Credentials>;

    /// Called after a successful sync
    async fn record_sync(&self, _user: &str, _at: DateTime<Utc>) {}
}


/// A fixed set of credentials, mostly useful for tests and command-line tools
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    by_user: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: ToString>(mut self, user: S, credentials: Credentials) -> Self {
        self.by_user.insert(user.to_string(), credentials);
        self
    }
}

#[async_trait]
impl CredentialSupplier for StaticCredentials {
    async fn credentials_for(&self, user: &str) -> Option<Credentials> {
        self.by_user.get(user).cloned()
    }
}


/// Serves credentials from stored CalDAV connections, and keeps their last-synced date up to date
#[derive(Debug, Default)]
pub struct ConnectionCredentials {
    connections: Mutex<Vec<CalDavConnection>>,
}

impl ConnectionCredentials {
    pub fn new(connections: Vec<CalDavConnection>) -> Self {
        Self { connections: Mutex::new(connections) }
    }

    /// A copy of the current connections, e.g. to persist them
    pub fn connections(&self) -> Vec<CalDavConnection> {
        match self.connections.lock() {
            Ok(connections) => connections.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl CredentialSupplier for ConnectionCredentials {
    async fn credentials_for(&self, user: &str) -> Option<Credentials> {
        let connections = match self.connections.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        connections.iter()
            .find(|conn| conn.user() == user)
            .map(|conn| Credentials::new(conn.account_email(), conn.access_token()).with_server(conn.server_url()))
    }

    async fn record_sync(&self, user: &str, at: DateTime<Utc>) {
        let mut connections = match self.connections.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        for conn in connections.iter_mut().filter(|conn| conn.user() == user) {
            conn.set_last_synced(at);
        }
    }
}
