//! The context of a sync operation

use url::Url;

use crate::calendar::remote_calendar::RemoteCalendar;
use crate::resource::Resource;

/// What a successful discovery produces: an HTTP client bound to the host that serves the calendars, and the calendars that can be used.
///
/// A context is built for one operation, then dropped.
/// Dropping it releases its HTTP connections (they are not shared with other contexts).
#[derive(Debug)]
pub struct SyncContext {
    home: Resource,
    calendars: Vec<RemoteCalendar>,
}

impl SyncContext {
    /// Calendars are expected to be in order of preference (writable ones first)
    pub fn new(home: Resource, calendars: Vec<RemoteCalendar>) -> Self {
        Self { home, calendars }
    }

    /// The calendar-home-set of the user
    pub fn home_url(&self) -> &Url { self.home.url() }

    /// The host every request of this context is sent to
    pub fn host(&self) -> Option<&str> {
        self.home.url().host_str()
    }

    pub fn calendars(&self) -> &[RemoteCalendar] {
        &self.calendars
    }

    /// The calendar new events are created in
    pub fn first_writable(&self) -> Option<&RemoteCalendar> {
        self.calendars.iter().find(|cal| cal.is_writable())
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        log::debug!("Releasing the sync context for {}", self.home.url());
    }
}
