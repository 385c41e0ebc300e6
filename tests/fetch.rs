//! Tests of the retrieval of remote events into the local store

mod mock_server;
use mock_server::*;

use std::time::Duration;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use calsync::cache::Cache;
use calsync::fetch::fetch_events;
use calsync::provider::sync_progress::SyncProgress;
use calsync::traits::EventStore;
use calsync::{Event, EventSource, RecurrenceRule};

const USER: &str = "alice@example.com";


fn work_events() -> Vec<String> {
    vec![
        event_response(
            &format!("{}standup.ics", WORK), "\"1\"",
            &vcalendar(&[vevent(Some("standup-1"), "Standup", "20240304T090000Z")]),
        ),
        event_response(
            &format!("{}no-uid.ics", WORK), "\"2\"",
            &vcalendar(&[vevent(None, "Nameless", "20240305T090000Z")]),
        ),
        event_response(
            &format!("{}review.ics", WORK), "\"3\"",
            &vcalendar(&[vevent(Some("review-1"), "Review", "20240306T140000Z")]),
        ),
    ]
}

#[tokio::test]
async fn new_events_are_stored_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::start().await;
    mount_discovery(&server, &[calendar_response(WORK, "Work", true, &["VEVENT"])]).await;
    mount_events(&server, WORK, &work_events()).await;

    let context = build_context(&server).await;
    let store = Cache::in_memory();

    let mut progress = SyncProgress::new();
    let report = fetch_events(&context, &store, USER, &year_2024(), &mut progress).await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.saved, 2);
    assert!(report.failed_calendars.is_empty());
    assert!(progress.is_success());

    let mut uids: Vec<String> = store.find_by_user(USER).await.unwrap()
        .iter()
        .filter_map(|ev| ev.uid().map(|uid| uid.to_string()))
        .collect();
    uids.sort();
    assert_eq!(uids, vec!["review-1".to_string(), "standup-1".to_string()]);

    let stored = store.find_by_uid(USER, "standup-1").await.unwrap().unwrap();
    assert_eq!(stored.owner(), USER);
    assert_eq!(stored.source(), EventSource::CalDav);
    assert_eq!(stored.title(), "Standup");

    // A second run finds nothing new
    let report = fetch_events(&context, &store, USER, &year_2024(), &mut progress).await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.saved, 0);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn failing_calendars_are_skipped() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::start().await;
    mount_discovery(&server, &[
        calendar_response(WORK, "Work", true, &["VEVENT"]),
        calendar_response(PERSONAL, "Personal", true, &["VEVENT"]),
    ]).await;
    Mock::given(method("REPORT"))
        .and(path(WORK))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_events(&server, PERSONAL, &[
        event_response(
            &format!("{}dentist.ics", PERSONAL), "\"1\"",
            &vcalendar(&[vevent(Some("dentist"), "Dentist", "20240412T083000Z")]),
        ),
    ]).await;

    let context = build_context(&server).await;
    let store = Cache::in_memory();
    let mut progress = SyncProgress::new();
    let report = fetch_events(&context, &store, USER, &year_2024(), &mut progress).await.unwrap();

    assert_eq!(report.failed_calendars, vec!["Work".to_string()]);
    assert_eq!(report.saved, 1);
    assert!(progress.is_success());
    assert_eq!(progress.n_warnings(), 1);
    assert!(store.find_by_uid(USER, "dentist").await.unwrap().is_some());
}

#[tokio::test]
async fn known_events_are_not_overwritten() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::start().await;
    mount_discovery(&server, &[calendar_response(WORK, "Work", true, &["VEVENT"])]).await;
    mount_events(&server, WORK, &work_events()).await;

    let store = Cache::in_memory();
    let mut local = Event::new("Standup, moved locally", USER);
    local.link_remote("standup-1", EventSource::CalDav);
    store.insert(local).await.unwrap();

    let context = build_context(&server).await;
    let report = fetch_events(&context, &store, USER, &year_2024(), &mut SyncProgress::new()).await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.saved, 1);

    let kept = store.find_by_uid(USER, "standup-1").await.unwrap().unwrap();
    assert_eq!(kept.title(), "Standup, moved locally");
}

#[tokio::test]
async fn events_linked_during_a_fetch_are_not_new() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::start().await;
    mount_discovery(&server, &[calendar_response(WORK, "Work", true, &["VEVENT"])]).await;
    Mock::given(method("REPORT"))
        .and(path(WORK))
        .and(body_string_contains("time-range"))
        .respond_with(
            ResponseTemplate::new(207)
                .set_body_string(multistatus(&work_events().concat()))
                .set_delay(Duration::from_millis(300))
        )
        .mount(&server)
        .await;

    let context = build_context(&server).await;
    let store = Cache::in_memory();
    let mut progress = SyncProgress::new();

    // "standup-1" is pushed from this device while the server is still answering
    let link = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut pushed = Event::new("Standup", USER);
        pushed.link_remote("standup-1", EventSource::CalDav);
        store.insert(pushed).await.unwrap();
    };
    let range = year_2024();
    let (report, ()) = tokio::join!(fetch_events(&context, &store, USER, &range, &mut progress), link);

    let report = report.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.saved, 1);
    assert!(store.find_by_uid(USER, "review-1").await.unwrap().is_some());
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn overridden_instances_do_not_replace_their_series() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::start().await;
    mount_discovery(&server, &[calendar_response(WORK, "Work", true, &["VEVENT"])]).await;
    let series = "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//Test//Mock server//EN\n\
        BEGIN:VEVENT\nUID:standup-1\nDTSTAMP:20240101T000000Z\nRECURRENCE-ID:20240311T090000Z\n\
        SUMMARY:Moved standup\nDTSTART:20240311T110000Z\nEND:VEVENT\n\
        BEGIN:VEVENT\nUID:standup-1\nDTSTAMP:20240101T000000Z\nSUMMARY:Standup\n\
        DTSTART:20240304T090000Z\nRRULE:FREQ=WEEKLY\nEND:VEVENT\nEND:VCALENDAR\n";
    mount_events(&server, WORK, &[event_response(&format!("{}standup.ics", WORK), "\"1\"", series)]).await;

    let context = build_context(&server).await;
    let store = Cache::in_memory();
    let report = fetch_events(&context, &store, USER, &year_2024(), &mut SyncProgress::new()).await.unwrap();
    assert_eq!(report.saved, 1);

    let stored = store.find_by_uid(USER, "standup-1").await.unwrap().unwrap();
    assert_eq!(stored.title(), "Standup");
    assert_eq!(stored.recurrence(), RecurrenceRule::Weekly);
}

#[tokio::test]
async fn events_shared_by_calendars_are_stored_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::start().await;
    mount_discovery(&server, &[
        calendar_response(WORK, "Work", true, &["VEVENT"]),
        calendar_response(PERSONAL, "Personal", true, &["VEVENT"]),
    ]).await;
    let offsite = vcalendar(&[vevent(Some("offsite"), "Offsite", "20240620T080000Z")]);
    mount_events(&server, WORK, &[event_response(&format!("{}offsite.ics", WORK), "\"1\"", &offsite)]).await;
    mount_events(&server, PERSONAL, &[event_response(&format!("{}offsite.ics", PERSONAL), "\"7\"", &offsite)]).await;

    let context = build_context(&server).await;
    let store = Cache::in_memory();
    let report = fetch_events(&context, &store, USER, &year_2024(), &mut SyncProgress::new()).await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.saved, 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn stores_are_per_user() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::start().await;
    mount_discovery(&server, &[calendar_response(WORK, "Work", true, &["VEVENT"])]).await;
    mount_events(&server, WORK, &work_events()).await;

    let context = build_context(&server).await;
    let store = Cache::in_memory();
    fetch_events(&context, &store, USER, &year_2024(), &mut SyncProgress::new()).await.unwrap();
    let report = fetch_events(&context, &store, "bob@example.com", &year_2024(), &mut SyncProgress::new()).await.unwrap();

    assert_eq!(report.saved, 2);
    assert_eq!(store.len(), 4);
}

#[cfg(feature = "local_store_mocks")]
#[tokio::test]
async fn batches_are_all_or_nothing() {
    use std::sync::{Arc, Mutex};
    use calsync::mock_behaviour::MockBehaviour;

    let _ = env_logger::builder().is_test(true).try_init();

    let server = MockServer::start().await;
    mount_discovery(&server, &[calendar_response(WORK, "Work", true, &["VEVENT"])]).await;
    mount_events(&server, WORK, &work_events()).await;

    let mut store = Cache::in_memory();
    let behaviour = MockBehaviour { insert_all_behaviour: (0, 1), ..MockBehaviour::default() };
    store.set_mock_behaviour(Some(Arc::new(Mutex::new(behaviour))));

    let context = build_context(&server).await;
    let result = fetch_events(&context, &store, USER, &year_2024(), &mut SyncProgress::new()).await;
    assert!(result.is_err());
    assert!(store.is_empty());

    // The mocked failure is over, and the next run recovers every event
    let report = fetch_events(&context, &store, USER, &year_2024(), &mut SyncProgress::new()).await.unwrap();
    assert_eq!(report.saved, 2);
}
