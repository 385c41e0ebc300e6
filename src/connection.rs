//! Stored connections to remote calendar accounts
//!
//! Every provider keeps the same bookkeeping about an account (tokens, expiry, last sync...).
//! This is shared in [`ConnectionRecord`], and exposed through the [`CalendarConnection`] trait, that every provider-specific connection implements.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventSource;

/// Access tokens that expire within this delay are considered as needing a refresh
fn refresh_margin() -> Duration {
    Duration::minutes(5)
}

/// The data every connection carries, whatever its provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    id: String,
    user: String,
    account_email: String,
    /// For CalDAV accounts, this is the (application) password
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    scope: Option<String>,
    last_synced: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    pub fn new<S: ToString, T: ToString, U: ToString>(user: S, account_email: T, access_token: U) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_hyphenated().to_string(),
            user: user.to_string(),
            account_email: account_email.to_string(),
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: None,
            scope: None,
            last_synced: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: String, expires_at: DateTime<Utc>) -> Self {
        self.refresh_token = Some(refresh_token);
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_scope(mut self, scope: String) -> Self {
        self.scope = Some(scope);
        self
    }
}


/// The interface shared by connections to every provider
pub trait CalendarConnection {
    /// Which remote provider this connection is for
    fn provider(&self) -> EventSource;

    fn record(&self) -> &ConnectionRecord;
    fn record_mut(&mut self) -> &mut ConnectionRecord;

    fn id(&self) -> &str { &self.record().id }
    /// The local user this connection belongs to
    fn user(&self) -> &str { &self.record().user }
    fn account_email(&self) -> &str { &self.record().account_email }
    fn access_token(&self) -> &str { &self.record().access_token }
    fn refresh_token(&self) -> Option<&str> { self.record().refresh_token.as_deref() }
    fn expires_at(&self) -> Option<DateTime<Utc>> { self.record().expires_at }
    fn scope(&self) -> Option<&str> { self.record().scope.as_deref() }
    fn last_synced(&self) -> Option<DateTime<Utc>> { self.record().last_synced }

    fn set_last_synced(&mut self, at: DateTime<Utc>) {
        self.record_mut().last_synced = Some(at);
    }

    /// Store tokens that have just been refreshed
    fn update_tokens(&mut self, access_token: String, refresh_token: Option<String>, expires_at: Option<DateTime<Utc>>) {
        let record = self.record_mut();
        record.access_token = access_token;
        if refresh_token.is_some() {
            record.refresh_token = refresh_token;
        }
        record.expires_at = expires_at;
    }

    /// Whether the access token is expired (or about to be) and can be refreshed
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.refresh_token().is_none() {
            return false;
        }
        match self.expires_at() {
            None => false,
            Some(expiry) => expiry <= now + refresh_margin(),
        }
    }
}


/// A connection to a CalDAV account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalDavConnection {
    record: ConnectionRecord,
    server_url: String,
}

impl CalDavConnection {
    pub fn new<S: ToString>(record: ConnectionRecord, server_url: S) -> Self {
        Self { record, server_url: server_url.to_string() }
    }

    pub fn server_url(&self) -> &str { &self.server_url }
}

impl CalendarConnection for CalDavConnection {
    fn provider(&self) -> EventSource { EventSource::CalDav }
    fn record(&self) -> &ConnectionRecord { &self.record }
    fn record_mut(&mut self) -> &mut ConnectionRecord { &mut self.record }

    /// CalDAV passwords do not expire
    fn needs_refresh(&self, _now: DateTime<Utc>) -> bool {
        false
    }
}


/// A connection to a Google calendar account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoogleConnection {
    record: ConnectionRecord,
    calendar_id: String,
}

impl GoogleConnection {
    pub fn new(record: ConnectionRecord) -> Self {
        Self { record, calendar_id: String::from("primary") }
    }

    pub fn calendar_id(&self) -> &str { &self.calendar_id }
}

impl CalendarConnection for GoogleConnection {
    fn provider(&self) -> EventSource { EventSource::Google }
    fn record(&self) -> &ConnectionRecord { &self.record }
    fn record_mut(&mut self) -> &mut ConnectionRecord { &mut self.record }
}


/// A connection to a Microsoft (Outlook) calendar account
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MicrosoftConnection {
    record: ConnectionRecord,
    tenant: Option<String>,
}

impl MicrosoftConnection {
    pub fn new(record: ConnectionRecord, tenant: Option<String>) -> Self {
        Self { record, tenant }
    }

    pub fn tenant(&self) -> Option<&str> { self.tenant.as_deref() }
}

impl CalendarConnection for MicrosoftConnection {
    fn provider(&self) -> EventSource { EventSource::Microsoft }
    fn record(&self) -> &ConnectionRecord { &self.record }
    fn record_mut(&mut self) -> &mut ConnectionRecord { &mut self.record }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiring_tokens_need_a_refresh() {
        let now = Utc::now();
        let record = ConnectionRecord::new("alice", "alice@example.com", "token")
            .with_refresh_token("refresh".to_string(), now + Duration::minutes(2));
        let mut google = GoogleConnection::new(record.clone());
        assert!(google.needs_refresh(now));

        google.update_tokens("new-token".to_string(), None, Some(now + Duration::hours(1)));
        assert!(google.needs_refresh(now) == false);
        assert_eq!(google.access_token(), "new-token");
        assert_eq!(google.refresh_token(), Some("refresh"));

        let caldav = CalDavConnection::new(record, "https://dav.example.com");
        assert!(caldav.needs_refresh(now) == false);
        assert_eq!(caldav.provider(), EventSource::CalDav);
    }

    #[test]
    fn connections_without_refresh_token_never_refresh() {
        let now = Utc::now();
        let mut microsoft = MicrosoftConnection::new(ConnectionRecord::new("bob", "bob@example.com", "token"), None);
        assert!(microsoft.needs_refresh(now) == false);

        microsoft.set_last_synced(now);
        assert_eq!(microsoft.last_synced(), Some(now));
        assert_eq!(microsoft.user(), "bob");
    }
}
