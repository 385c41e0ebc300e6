//! Progress reporting of a sync
//!
//! A [`SyncProgress`] is handed down the whole fetch. It routes messages to the `log` facade, counts the problems, and may publish [`SyncEvent`]s on a watch channel, that a UI can observe with [`feedback_channel`].

use std::fmt::{Display, Formatter};

use log::Level;

/// A milestone of a sync
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    NotStarted,
    Started { user: String },
    /// A calendar is being queried
    Fetching { calendar: String },
    /// A calendar has answered with this many events
    Fetched { calendar: String, events: usize },
    Finished { success: bool, scanned: usize, saved: usize },
}

impl Display for SyncEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEvent::NotStarted => write!(f, "Waiting"),
            SyncEvent::Started { user } => write!(f, "Syncing the calendars of {}", user),
            SyncEvent::Fetching { calendar } => write!(f, "[{}] fetching events", calendar),
            SyncEvent::Fetched { calendar, events } => write!(f, "[{}] {} events received", calendar, events),
            SyncEvent::Finished { success: true, scanned, saved } => write!(f, "Done: {} events seen, {} new", scanned, saved),
            SyncEvent::Finished { success: false, .. } => write!(f, "Sync failed"),
        }
    }
}

impl Default for SyncEvent {
    fn default() -> Self {
        Self::NotStarted
    }
}


pub type FeedbackSender = tokio::sync::watch::Sender<SyncEvent>;
pub type FeedbackReceiver = tokio::sync::watch::Receiver<SyncEvent>;

/// Create a channel that always holds the latest milestone of a sync
pub fn feedback_channel() -> (FeedbackSender, FeedbackReceiver) {
    tokio::sync::watch::channel(SyncEvent::default())
}


/// Tracks the problems that happen during a sync.
///
/// Warnings are problems the sync recovers from (e.g. a calendar that could not be fetched and has been skipped), errors make it fail.
#[derive(Debug, Default)]
pub struct SyncProgress {
    errors: u32,
    warnings: u32,
    listener: Option<FeedbackSender>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_feedback_channel(listener: FeedbackSender) -> Self {
        Self { listener: Some(listener), ..Self::default() }
    }

    pub fn is_success(&self) -> bool { self.errors == 0 }
    pub fn n_errors(&self) -> u32 { self.errors }
    pub fn n_warnings(&self) -> u32 { self.warnings }

    pub fn error(&mut self, text: &str) { self.record(Level::Error, text) }
    pub fn warn(&mut self, text: &str) { self.record(Level::Warn, text) }
    pub fn info(&mut self, text: &str) { self.record(Level::Info, text) }
    pub fn debug(&mut self, text: &str) { self.record(Level::Debug, text) }
    pub fn trace(&mut self, text: &str) { self.record(Level::Trace, text) }

    fn record(&mut self, level: Level, text: &str) {
        match level {
            Level::Error => self.errors += 1,
            Level::Warn => self.warnings += 1,
            _ => (),
        }
        log::log!(level, "{}", text);
    }

    /// Publish a milestone to the listener, if any is still there
    pub fn feedback(&mut self, event: SyncEvent) {
        if let Some(listener) = &self.listener {
            let _ = listener.send(event);
        }
    }
}
