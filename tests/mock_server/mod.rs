//! An in-process CalDAV server, used by the integration tests
#![allow(dead_code)]

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chrono::{TimeZone, Utc};

use calsync::client::Client;
use calsync::credentials::Credentials;
use calsync::{DateWindow, SyncContext};

pub const WELL_KNOWN: &str = "/.well-known/caldav";
pub const PRINCIPAL: &str = "/principals/alice/";
pub const HOME_SET: &str = "/calendars/alice/";
pub const WORK: &str = "/calendars/alice/work/";
pub const PERSONAL: &str = "/calendars/alice/personal/";
pub const SHARED: &str = "/calendars/alice/shared/";

pub fn credentials() -> Credentials {
    Credentials::new("alice", "secret")
}

/// A window that covers every event of these tests
pub fn year_2024() -> DateWindow {
    DateWindow::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap(),
    )
}

pub fn multistatus(responses: &str) -> String {
    format!(r#"<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">{}</d:multistatus>"#, responses)
}

fn ok_propstat(props: &str) -> String {
    format!("<d:propstat><d:prop>{}</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>", props)
}

pub fn principal_body(href: &str) -> String {
    multistatus(&format!(
        "<d:response><d:href>{}</d:href>{}</d:response>",
        WELL_KNOWN,
        ok_propstat(&format!("<d:current-user-principal><d:href>{}</d:href></d:current-user-principal>", href))
    ))
}

pub fn home_set_body(href: &str) -> String {
    multistatus(&format!(
        "<d:response><d:href>{}</d:href>{}</d:response>",
        PRINCIPAL,
        ok_propstat(&format!("<c:calendar-home-set><d:href>{}</d:href></c:calendar-home-set>", href))
    ))
}

/// The `<response>` that describes the calendar-home-set itself
pub fn home_set_response() -> String {
    format!(
        "<d:response><d:href>{}</d:href>{}</d:response>",
        HOME_SET,
        ok_propstat("<d:resourcetype><d:collection/></d:resourcetype>")
    )
}

pub fn calendar_response(href: &str, name: &str, writable: bool, components: &[&str]) -> String {
    let privileges = if writable {
        "<d:privilege><d:read/></d:privilege><d:privilege><d:write/></d:privilege>"
    } else {
        "<d:privilege><d:read/></d:privilege>"
    };
    let comps: String = components.iter().map(|c| format!(r#"<c:comp name="{}"/>"#, c)).collect();
    format!(
        "<d:response><d:href>{}</d:href>{}</d:response>",
        href,
        ok_propstat(&format!(
            "<d:displayname>{}</d:displayname>\
             <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>\
             <d:current-user-privilege-set>{}</d:current-user-privilege-set>\
             <c:supported-calendar-component-set>{}</c:supported-calendar-component-set>",
            name, privileges, comps
        ))
    )
}

pub fn event_response(href: &str, etag: &str, ical: &str) -> String {
    format!(
        "<d:response><d:href>{}</d:href>{}</d:response>",
        href,
        ok_propstat(&format!("<d:getetag>{}</d:getetag><c:calendar-data>{}</c:calendar-data>", etag, ical))
    )
}

/// A VEVENT. Lines are not indented, since they end up in an XML text node
pub fn vevent(uid: Option<&str>, summary: &str, dtstart: &str) -> String {
    let uid_line = uid.map(|uid| format!("UID:{}\n", uid)).unwrap_or_default();
    format!(
        "BEGIN:VEVENT\n{}DTSTAMP:20240101T000000Z\nSUMMARY:{}\nDTSTART:{}\nEND:VEVENT\n",
        uid_line, summary, dtstart
    )
}

pub fn vcalendar(events: &[String]) -> String {
    format!("BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//Test//Mock server//EN\n{}END:VCALENDAR\n", events.concat())
}


/// Answer the discovery handshake, with these calendar `<response>`s in the calendar-home-set
pub async fn mount_discovery(server: &MockServer, calendars: &[String]) {
    Mock::given(method("PROPFIND"))
        .and(path(WELL_KNOWN))
        .respond_with(ResponseTemplate::new(207).set_body_string(principal_body(PRINCIPAL)))
        .mount(server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path(PRINCIPAL))
        .respond_with(ResponseTemplate::new(207).set_body_string(home_set_body(HOME_SET)))
        .mount(server)
        .await;
    mount_calendar_list(server, calendars).await;
}

pub async fn mount_calendar_list(server: &MockServer, calendars: &[String]) {
    let body = multistatus(&format!("{}{}", home_set_response(), calendars.concat()));
    Mock::given(method("PROPFIND"))
        .and(path(HOME_SET))
        .respond_with(ResponseTemplate::new(207).set_body_string(body))
        .mount(server)
        .await;
}

/// Answer time-range queries to a calendar with these events
pub async fn mount_events(server: &MockServer, calendar: &str, events: &[String]) {
    Mock::given(method("REPORT"))
        .and(path(calendar))
        .and(body_string_contains("time-range"))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(&events.concat())))
        .mount(server)
        .await;
}

/// Answer UID queries to a calendar with these events (that may be empty)
pub async fn mount_uid_search(server: &MockServer, calendar: &str, uid: &str, events: &[String]) {
    Mock::given(method("REPORT"))
        .and(path(calendar))
        .and(body_string_contains("prop-filter"))
        .and(body_string_contains(uid))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(&events.concat())))
        .mount(server)
        .await;
}

pub async fn build_context(server: &MockServer) -> SyncContext {
    Client::new(server.uri(), credentials())
        .unwrap()
        .build_context()
        .await
        .unwrap()
}
