//! This crate synchronizes calendar events with a CalDAV server.
//!
//! It provides a CalDAV client in the [`client`] module, that discovers the calendars of a user and builds a [`SyncContext`](context::SyncContext).
//! A context is then used to [fetch](fetch::fetch_events) remote events into a local [`EventStore`](traits::EventStore), or to [push](writer::upsert_event) local changes back to the server.
//!
//! Events are converted from and to iCal files by the [`ical`] module. Recurring events are expanded into occurrences by the [`recurrence`] module, that never touches the network.
//!
//! Most applications will use a [`SyncService`](provider::SyncService), that rate-limits sync requests and dispatches them to the provider of each account. \
//! A local store is provided in the [`cache`] module.

pub mod traits;

pub mod event;
pub use event::{Event, EventId, EventSource, RecurrenceRule, DateWindow};
pub mod recurrence;
pub use recurrence::{expand, Occurrence};
pub mod ical;

pub mod calendar;
pub mod client;
pub mod context;
pub use context::SyncContext;
pub mod fetch;
pub mod writer;
pub mod resource;

pub mod credentials;
pub mod connection;
pub mod throttle;
pub mod provider;
pub use provider::{SyncService, SyncReport, SyncError};

pub mod cache;
pub use cache::Cache;
pub mod mock_behaviour;

pub mod config;
pub mod utils;
