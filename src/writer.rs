//! Pushing local changes to the server
//!
//! Events are located on the server by their UID, then written with preconditions on their version tag.

use url::Url;

use crate::calendar::remote_calendar::{Precondition, RemoteCalendar, RemoteEvent, WriteResponse};
use crate::context::SyncContext;
use crate::event::{Event, EventSource};

/// The result of [`upsert_event`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpsertResult {
    pub success: bool,
    /// The UID the event is stored under (it may have been minted by this upsert)
    pub uid: Option<String>,
    /// Whether a new remote resource was created (rather than an existing one updated)
    pub created: bool,
    /// The URL of the remote resource
    pub target: Option<Url>,
    /// The HTTP status of the last write attempt
    pub status: Option<u16>,
    /// The new version tag of the resource, if the server reported it
    pub etag: Option<String>,
    /// What went wrong, for failures
    pub diagnostic: Option<String>,
}

impl UpsertResult {
    fn failure(uid: &str, target: Option<Url>, status: Option<u16>, diagnostic: String) -> Self {
        log::warn!("Unable to push event {}: {}", uid, diagnostic);
        Self {
            success: false,
            uid: Some(uid.to_string()),
            target,
            status,
            diagnostic: Some(diagnostic),
            ..Self::default()
        }
    }
}

/// The result of [`delete_event`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The event has no UID, so it cannot be located on the server
    MissingUid,
    /// No calendar holds this UID: the remote copy is already gone
    NotFound,
    /// The server could not be reached, or refused the deletion
    Failed { status: Option<u16>, diagnostic: String },
}

impl DeleteOutcome {
    pub fn is_success(&self) -> bool {
        *self == DeleteOutcome::Deleted
    }

    pub fn diagnostic(&self) -> Option<String> {
        match self {
            DeleteOutcome::Deleted => None,
            DeleteOutcome::MissingUid => Some("the event has no UID, it cannot be located on the server".to_string()),
            DeleteOutcome::NotFound => Some("the event was not found on the server, it may already have been removed".to_string()),
            DeleteOutcome::Failed { diagnostic, .. } => Some(diagnostic.clone()),
        }
    }
}


/// Look for the calendar that holds an event, in the order of the context calendars (first match wins).
///
/// Returns `Err` if it was not found, but some calendars could not be searched
async fn locate<'c>(context: &'c SyncContext, uid: &str) -> Result<Option<(&'c RemoteCalendar, RemoteEvent)>, String> {
    let mut errors = Vec::new();
    for calendar in context.calendars() {
        match calendar.find_event_by_uid(uid).await {
            Err(err) => {
                log::warn!("Unable to search calendar {} for UID {}: {}", calendar.name(), uid, err);
                errors.push(format!("{}: {}", calendar.name(), err));
            },
            Ok(None) => continue,
            Ok(Some(remote)) => {
                log::debug!("Event {} found at {}", uid, remote.url());
                return Ok(Some((calendar, remote)));
            },
        }
    }

    if errors.is_empty() {
        Ok(None)
    } else {
        Err(format!("unable to search every calendar ({})", errors.join("; ")))
    }
}

/// Create or update an event on the server.
///
/// Events without a UID are given a new one, linked to the event right away.
/// Existing resources are updated in place, new ones are created in the first writable calendar.
/// In case the server reports a conflict, the write is retried once without any precondition.
pub async fn upsert_event(context: &SyncContext, event: &mut Event) -> UpsertResult {
    let uid = match event.uid() {
        Some(uid) => uid.to_string(),
        None => {
            let uid = uuid::Uuid::new_v4().to_hyphenated().to_string();
            log::debug!("Event {} has no UID yet, it is now {}", event.id(), uid);
            event.link_remote(&uid, EventSource::CalDav);
            uid
        },
    };

    let located = match locate(context, &uid).await {
        Err(diagnostic) => return UpsertResult::failure(&uid, None, None, diagnostic),
        Ok(located) => located,
    };

    let (calendar, target, precondition) = match &located {
        Some((calendar, remote)) => {
            let precondition = match remote.etag() {
                Some(etag) => Precondition::Matches(etag.to_string()),
                None => Precondition::None,
            };
            (*calendar, remote.url().clone(), precondition)
        },
        None => {
            let calendar = match context.first_writable().or_else(|| context.calendars().first()) {
                None => return UpsertResult::failure(&uid, None, None, "no calendar is available".to_string()),
                Some(cal) => cal,
            };
            let target = match calendar.url_for_new_event(&uid) {
                Err(err) => return UpsertResult::failure(&uid, None, None, format!("invalid event URL: {}", err)),
                Ok(url) => url,
            };
            (calendar, target, Precondition::MustNotExist)
        },
    };

    if calendar.is_writable() == false {
        return UpsertResult::failure(&uid, Some(target), None, format!("calendar {} is read-only", calendar.name()));
    }

    let ical_text = match crate::ical::build_from(event) {
        Err(err) => return UpsertResult::failure(&uid, Some(target), None, format!("unable to serialize the event: {}", err)),
        Ok(text) => text,
    };

    let mut response = match calendar.put_event(&target, ical_text.clone(), &precondition).await {
        Err(err) => return UpsertResult::failure(&uid, Some(target), None, format!("unable to reach the server: {}", err)),
        Ok(r) => r,
    };

    let mut retried = false;
    if response.is_conflict() && precondition != Precondition::None {
        log::info!("Conflict on {} (HTTP {}), retrying without precondition", target, response.status);
        retried = true;
        response = match calendar.put_event(&target, ical_text, &Precondition::None).await {
            Err(err) => return UpsertResult::failure(&uid, Some(target), None, format!("unable to reach the server: {}", err)),
            Ok(r) => r,
        };
    }

    if response.is_success() == false {
        let diagnostic = describe_failure(&response);
        return UpsertResult::failure(&uid, Some(target), Some(response.status.as_u16()), diagnostic);
    }

    event.set_sequence(event.sequence().saturating_add(1));
    log::info!("Event {} pushed to {}", uid, target);
    UpsertResult {
        success: true,
        uid: Some(uid),
        created: located.is_none() && retried == false,
        target: Some(target),
        status: Some(response.status.as_u16()),
        etag: response.etag,
        diagnostic: None,
    }
}

/// Delete the remote copy of an event
pub async fn delete_event(context: &SyncContext, event: &Event) -> DeleteOutcome {
    let uid = match event.uid() {
        None => return DeleteOutcome::MissingUid,
        Some(uid) => uid,
    };

    let (calendar, remote) = match locate(context, uid).await {
        Err(diagnostic) => return DeleteOutcome::Failed { status: None, diagnostic },
        Ok(None) => {
            log::info!("Event {} is not on the server, nothing to delete", uid);
            return DeleteOutcome::NotFound;
        },
        Ok(Some(found)) => found,
    };

    let response = match calendar.delete_event(remote.url(), remote.etag()).await {
        Err(err) => return DeleteOutcome::Failed { status: None, diagnostic: format!("unable to reach the server: {}", err) },
        Ok(r) => r,
    };

    if response.is_success() {
        log::info!("Event {} deleted from {}", uid, remote.url());
        return DeleteOutcome::Deleted;
    }
    if response.status == reqwest::StatusCode::NOT_FOUND || response.status == reqwest::StatusCode::GONE {
        return DeleteOutcome::NotFound;
    }
    DeleteOutcome::Failed {
        status: Some(response.status.as_u16()),
        diagnostic: describe_failure(&response),
    }
}

fn describe_failure(response: &WriteResponse) -> String {
    let body = response.body.trim();
    if body.is_empty() {
        format!("the server answered HTTP {}", response.status)
    } else {
        format!("the server answered HTTP {}: {}", response.status, body)
    }
}
