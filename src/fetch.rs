//! Retrieval of remote events into the local store

use std::collections::HashSet;

use crate::context::SyncContext;
use crate::event::{DateWindow, EventSource};
use crate::provider::sync_progress::{SyncEvent, SyncProgress};
use crate::traits::{EventStore, StoreError};

/// What a fetch did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// How many events (that had a UID) were returned by the server
    pub scanned: usize,
    /// How many of them were new, and have been stored
    pub saved: usize,
    /// The calendars that could not be queried
    pub failed_calendars: Vec<String>,
}

/// Fetch the events of every calendar of `context` that overlap `window`, and store the ones that are not known yet.
///
/// Events that are already known locally (by UID) are never overwritten, since they may carry local changes that are not pushed yet.
/// The known UIDs are read after every calendar has been queried.
/// A calendar that cannot be queried is skipped.
/// New events are stored in a single batch once every calendar has been queried.
pub async fn fetch_events(
    context: &SyncContext,
    store: &dyn EventStore,
    user: &str,
    window: &DateWindow,
    progress: &mut SyncProgress,
) -> Result<FetchReport, StoreError> {
    let mut report = FetchReport::default();
    // Remote events, deduplicated by UID across calendars
    let mut candidates = Vec::new();
    let mut seen_uids = HashSet::new();

    for calendar in context.calendars() {
        progress.feedback(SyncEvent::Fetching { calendar: calendar.name().to_string() });

        let blocks = match calendar.get_events_in_range(window).await {
            Err(err) => {
                progress.warn(&format!("Unable to fetch events of calendar {}: {}. Skipping it.", calendar.name(), err));
                report.failed_calendars.push(calendar.name().to_string());
                continue;
            },
            Ok(blocks) => blocks,
        };

        let mut n_events = 0;
        for block in blocks {
            for event in crate::ical::parse(&block, EventSource::CalDav) {
                let uid = match event.uid() {
                    None => continue,
                    Some(uid) => uid.to_string(),
                };
                report.scanned += 1;
                n_events += 1;
                if seen_uids.insert(uid) {
                    candidates.push(event);
                }
            }
        }
        progress.feedback(SyncEvent::Fetched { calendar: calendar.name().to_string(), events: n_events });
    }

    // Known UIDs are read once every calendar has answered, so that events linked in the meantime are not considered new
    let known_uids: HashSet<String> = store.find_by_user(user).await?
        .iter()
        .filter_map(|ev| ev.uid().map(|uid| uid.to_string()))
        .collect();
    progress.debug(&format!("{} already knows {} remote events", user, known_uids.len()));

    let mut new_events = Vec::new();
    for mut event in candidates {
        if event.uid().map(|uid| known_uids.contains(uid)).unwrap_or(true) {
            progress.trace(&format!("Event {:?} is already known", event.uid()));
            continue;
        }
        event.assign_local_identity(user);
        progress.debug(&format!("New event {:?} ({})", event.uid(), event.title()));
        new_events.push(event);
    }

    report.saved = new_events.len();
    if new_events.is_empty() == false {
        store.insert_all(new_events).await?;
    }
    progress.info(&format!("Fetched {} events for {}, {} of them are new", report.scanned, user, report.saved));
    Ok(report)
}
