//! Calendar events

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::exceptions::{ExceptionSet, RecurrenceException};

/// The local, opaque identifier of an event.
/// It is owned by the local store and never sent to a server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId {
    content: String,
}

impl EventId {
    /// Generate a random EventId.
    pub fn random() -> Self {
        let random = uuid::Uuid::new_v4().to_hyphenated().to_string();
        Self { content: random }
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }
}

impl From<String> for EventId {
    fn from(content: String) -> Self {
        Self { content }
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.content)
    }
}


/// Where an event comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Created in this application
    Local,
    /// Mirrored from a CalDAV server
    CalDav,
    /// Mirrored from a Google calendar
    Google,
    /// Mirrored from a Microsoft (Outlook) calendar
    Microsoft,
}

impl EventSource {
    pub fn is_remote(&self) -> bool {
        *self != EventSource::Local
    }
}

impl Default for EventSource {
    fn default() -> Self {
        EventSource::Local
    }
}

impl Display for EventSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Local => write!(f, "local"),
            EventSource::CalDav => write!(f, "caldav"),
            EventSource::Google => write!(f, "google"),
            EventSource::Microsoft => write!(f, "microsoft"),
        }
    }
}


/// How an event repeats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceRule {
    None,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl RecurrenceRule {
    /// The fixed step between two occurrences, for rules that have one.
    /// `Monthly` has none, since months have different lengths.
    pub fn fixed_interval(&self) -> Option<Duration> {
        match self {
            RecurrenceRule::Daily => Some(Duration::days(1)),
            RecurrenceRule::Weekly => Some(Duration::days(7)),
            RecurrenceRule::Biweekly => Some(Duration::days(14)),
            RecurrenceRule::None | RecurrenceRule::Monthly => None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        *self != RecurrenceRule::None
    }
}

impl Default for RecurrenceRule {
    fn default() -> Self {
        RecurrenceRule::None
    }
}


/// A time span, used to restrict queries and expansions. Both bounds are inclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> DateTime<Utc> { self.start }
    pub fn end(&self) -> DateTime<Utc> { self.end }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}


/// A calendar event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The local identifier
    id: EventId,
    /// The user this event belongs to
    owner: String,
    /// Persistent, globally unique identifier for the calendar component, shared with the remote server.
    /// Events that have never been linked to a server have none.
    uid: Option<String>,
    /// Where this event comes from. Remote-owned events (that have a UID) always have a remote source
    source: EventSource,

    title: String,
    description: Option<String>,
    location: Option<String>,

    /// Start of the event. For all-day events, this is midnight (UTC) of the first day
    start: Option<DateTime<Utc>>,
    /// End of the event. For all-day events, this is midnight (UTC) of the last included day
    end: Option<DateTime<Utc>>,
    all_day: bool,

    /// The last time this item was modified
    last_modified: DateTime<Utc>,
    /// The iCal SEQUENCE this event had the last time it was parsed or serialized
    sequence: u32,

    recurrence: RecurrenceRule,
    exceptions: ExceptionSet,
}

impl Event {
    /// Create a brand new local event, that is not on a server yet.
    pub fn new<S: ToString, T: ToString>(title: S, owner: T) -> Self {
        Self {
            id: EventId::random(),
            owner: owner.to_string(),
            uid: None,
            source: EventSource::Local,
            title: title.to_string(),
            description: None,
            location: None,
            start: None,
            end: None,
            all_day: false,
            last_modified: Utc::now(),
            sequence: 0,
            recurrence: RecurrenceRule::None,
            exceptions: ExceptionSet::default(),
        }
    }

    /// Create an event that is known from a remote server
    pub fn new_remote<S: ToString>(uid: S, source: EventSource) -> Self {
        let mut event = Self::new("", "");
        event.uid = Some(uid.to_string());
        event.source = source;
        event
    }

    pub fn id(&self) -> &EventId          { &self.id }
    pub fn owner(&self) -> &str           { &self.owner }
    pub fn source(&self) -> EventSource   { self.source }
    pub fn title(&self) -> &str           { &self.title }
    pub fn description(&self) -> Option<&str> { self.description.as_deref() }
    pub fn location(&self) -> Option<&str>    { self.location.as_deref() }
    pub fn start(&self) -> Option<DateTime<Utc>> { self.start }
    pub fn end(&self) -> Option<DateTime<Utc>>   { self.end }
    pub fn is_all_day(&self) -> bool      { self.all_day }
    pub fn last_modified(&self) -> &DateTime<Utc> { &self.last_modified }
    pub fn sequence(&self) -> u32         { self.sequence }
    pub fn recurrence(&self) -> RecurrenceRule { self.recurrence }
    pub fn exceptions(&self) -> &ExceptionSet  { &self.exceptions }

    /// The remote UID, if this event is linked to a server.
    /// An empty UID is reported as no UID at all.
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref().filter(|uid| uid.is_empty() == false)
    }

    /// Whether this event is owned by a remote server
    pub fn is_remote_owned(&self) -> bool {
        self.uid().is_some()
    }

    /// Stored end minus stored start, when both are known
    pub fn duration(&self) -> Option<Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Link this event to a remote resource. The source is updated at the same time, so that remote-owned events always carry a remote source.
    pub fn link_remote<S: ToString>(&mut self, uid: S, source: EventSource) {
        let source = if source.is_remote() {
            source
        } else {
            log::warn!("Event {} is linked to a remote UID but was given a local source. Using CalDAV instead", self.id);
            EventSource::CalDav
        };
        self.uid = Some(uid.to_string());
        self.source = source;
    }

    /// Give this event a fresh local identity, owned by `owner`.
    /// This is used when a remote event is about to be inserted in the local store.
    pub fn assign_local_identity<S: ToString>(&mut self, owner: S) {
        self.id = EventId::random();
        self.owner = owner.to_string();
    }

    pub fn set_title<S: ToString>(&mut self, title: S) {
        self.update_last_modified();
        self.title = title.to_string();
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.update_last_modified();
        self.description = description;
    }

    pub fn set_location(&mut self, location: Option<String>) {
        self.update_last_modified();
        self.location = location;
    }

    /// Set a timed schedule
    pub fn set_times(&mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) {
        self.update_last_modified();
        self.start = start;
        self.end = end;
        self.all_day = false;
    }

    /// Set an all-day schedule. `last_day` is included in the event
    pub fn set_all_day(&mut self, first_day: NaiveDate, last_day: NaiveDate) {
        self.update_last_modified();
        self.start = Some(midnight_utc(first_day));
        self.end = Some(midnight_utc(last_day));
        self.all_day = true;
    }

    pub fn set_recurrence(&mut self, recurrence: RecurrenceRule) {
        self.update_last_modified();
        self.recurrence = recurrence;
    }

    pub fn set_exceptions(&mut self, exceptions: ExceptionSet) {
        self.update_last_modified();
        self.exceptions = exceptions;
    }

    /// Cancel a single occurrence of this (recurring) event
    pub fn cancel_occurrence(&mut self, date: NaiveDate) {
        self.update_last_modified();
        self.exceptions.insert(RecurrenceException::Single(date));
    }

    /// Cancel the occurrence at `date` and every later one
    pub fn truncate_from(&mut self, date: NaiveDate) {
        self.update_last_modified();
        self.exceptions.insert(RecurrenceException::From(date));
    }

    pub fn set_last_modified(&mut self, last_modified: DateTime<Utc>) {
        self.last_modified = last_modified;
    }

    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    fn update_last_modified(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Set all the schedule fields at once, without touching the last-modified date.
    /// This is what parsers need, since they read the last-modified date from the remote data.
    pub(crate) fn set_schedule(&mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>, all_day: bool) {
        self.start = start;
        self.end = end;
        self.all_day = all_day;
    }

    /// Set the descriptive fields at once, without touching the last-modified date.
    pub(crate) fn set_contents(&mut self, title: String, description: Option<String>, location: Option<String>) {
        self.title = title;
        self.description = description;
        self.location = location;
    }

    pub(crate) fn set_repetition(&mut self, recurrence: RecurrenceRule, exceptions: ExceptionSet) {
        self.recurrence = recurrence;
        self.exceptions = exceptions;
    }
}

/// Midnight (UTC) of a given day
pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(chrono::NaiveTime::MIN), Utc)
}
