use std::error::Error;

use minidom::Element;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::calendar::SupportedComponents;
use crate::event::{DateWindow, EventSource};
use crate::resource::Resource;
use crate::utils::{find_elem, find_elems};

const ICAL_DATE_TIME_UTC: &str = "%Y%m%dT%H%M%SZ";

static EVENTS_IN_RANGE_BODY: &str = r#"
    <c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:prop>
            <d:getetag />
            <c:calendar-data />
        </d:prop>
        <c:filter>
            <c:comp-filter name="VCALENDAR">
                <c:comp-filter name="VEVENT">
                    <c:time-range start="{start}" end="{end}" />
                </c:comp-filter>
            </c:comp-filter>
        </c:filter>
    </c:calendar-query>
"#;

static EVENT_BY_UID_BODY: &str = r#"
    <c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:prop>
            <d:getetag />
            <c:calendar-data />
        </d:prop>
        <c:filter>
            <c:comp-filter name="VCALENDAR">
                <c:comp-filter name="VEVENT">
                    <c:prop-filter name="UID">
                        <c:text-match collation="i;octet">{uid}</c:text-match>
                    </c:prop-filter>
                </c:comp-filter>
            </c:comp-filter>
        </c:filter>
    </c:calendar-query>
"#;


/// A resource found on a server
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteEvent {
    url: Url,
    etag: Option<String>,
}

impl RemoteEvent {
    pub fn url(&self) -> &Url { &self.url }
    /// The version tag of this resource, if the server reported it
    pub fn etag(&self) -> Option<&str> { self.etag.as_deref() }
}

/// The precondition attached to a write
#[derive(Clone, Debug, PartialEq)]
pub enum Precondition {
    /// The write is unconditional
    None,
    /// The resource must not exist yet (`If-None-Match: *`)
    MustNotExist,
    /// The resource must still have this version tag (`If-Match`)
    Matches(String),
}

/// What a server answered to a PUT or DELETE
#[derive(Clone, Debug)]
pub struct WriteResponse {
    pub status: StatusCode,
    pub etag: Option<String>,
    pub body: String,
}

impl WriteResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the server refused the write because of a stale version tag
    pub fn is_conflict(&self) -> bool {
        self.status == StatusCode::CONFLICT || self.status == StatusCode::PRECONDITION_FAILED
    }
}


/// A CalDAV calendar created by a [`Client`](crate::client::Client).
#[derive(Clone, Debug)]
pub struct RemoteCalendar {
    name: String,
    resource: Resource,
    writable: bool,
    supported_components: SupportedComponents,
}

impl RemoteCalendar {
    pub fn new(name: String, resource: Resource, writable: bool, supported_components: SupportedComponents) -> Self {
        Self { name, resource, writable, supported_components }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn url(&self) -> &Url { self.resource.url() }
    /// Whether the current user is allowed to create and modify events in this calendar
    pub fn is_writable(&self) -> bool { self.writable }
    pub fn supported_components(&self) -> SupportedComponents { self.supported_components }

    /// The URL a new event with this UID is stored at
    pub fn url_for_new_event(&self, uid: &str) -> Result<Url, Box<dyn Error + Send + Sync>> {
        let filename = format!("{}.ics", sanitize_filename::sanitize(uid));
        Ok(self.resource.combine(&filename)?.url().clone())
    }

    /// Fetch the raw iCal data of every event that overlaps `window`
    pub async fn get_events_in_range(&self, window: &DateWindow) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
        let body = EVENTS_IN_RANGE_BODY
            .replace("{start}", &window.start().format(ICAL_DATE_TIME_UTC).to_string())
            .replace("{end}", &window.end().format(ICAL_DATE_TIME_UTC).to_string());

        let responses = self.report(body).await?;
        let blocks = responses.iter()
            .filter_map(|response| find_elem(response, "calendar-data"))
            .map(|data| data.text())
            .filter(|text| text.trim().is_empty() == false)
            .collect();
        Ok(blocks)
    }

    /// Look for the event that has this exact UID in this calendar
    pub async fn find_event_by_uid(&self, uid: &str) -> Result<Option<RemoteEvent>, Box<dyn Error + Send + Sync>> {
        let body = EVENT_BY_UID_BODY.replace("{uid}", &escape_xml(uid));
        let responses = self.report(body).await?;

        for response in &responses {
            let href = match find_elem(response, "href") {
                None => {
                    log::warn!("Unable to extract HREF in calendar {}", self.name);
                    continue;
                },
                Some(href) => href.text(),
            };

            // Some servers are lax with text-match: make sure this is the UID we are looking for
            if let Some(data) = find_elem(response, "calendar-data") {
                let events = crate::ical::parse(&data.text(), EventSource::CalDav);
                if events.iter().any(|ev| ev.uid() == Some(uid)) == false {
                    log::debug!("Ignoring {} that matched UID {} loosely", href, uid);
                    continue;
                }
            }

            let url = self.resource.combine(&href)?.url().clone();
            let etag = find_elem(response, "getetag")
                .map(|el| el.text().trim().to_string())
                .filter(|etag| etag.is_empty() == false);
            return Ok(Some(RemoteEvent { url, etag }));
        }

        Ok(None)
    }

    /// Upload an iCal file
    pub async fn put_event(&self, url: &Url, ical_text: String, precondition: &Precondition) -> Result<WriteResponse, Box<dyn Error + Send + Sync>> {
        let target = self.resource.combine(url.as_str())?;
        let mut request = target.request(Method::PUT)
            .header(CONTENT_TYPE, "text/calendar; charset=utf-8")
            .header(CONTENT_LENGTH, ical_text.len());
        request = match precondition {
            Precondition::None => request,
            Precondition::MustNotExist => request.header("If-None-Match", "*"),
            Precondition::Matches(etag) => request.header("If-Match", etag.as_str()),
        };

        let response = request.body(ical_text).send().await?;
        write_response(response).await
    }

    /// Delete a resource, optionally bound to its last known version tag
    pub async fn delete_event(&self, url: &Url, etag: Option<&str>) -> Result<WriteResponse, Box<dyn Error + Send + Sync>> {
        let target = self.resource.combine(url.as_str())?;
        let mut request = target.request(Method::DELETE);
        if let Some(etag) = etag {
            request = request.header("If-Match", etag);
        }

        let response = request.send().await?;
        write_response(response).await
    }

    /// Send a REPORT to this calendar, and return the `<response>` elements of its multistatus answer
    async fn report(&self, body: String) -> Result<Vec<Element>, Box<dyn Error + Send + Sync>> {
        let method = Method::from_bytes(b"REPORT")?;
        let response = self.resource.request(method)
            .header("Depth", 1)
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(body)
            .send()
            .await?;

        if response.status().is_success() == false {
            return Err(format!("Unexpected HTTP status code {:?} from calendar {}", response.status(), self.name).into());
        }

        let text = response.text().await?;
        let root: Element = text.parse()?;
        Ok(find_elems(&root, "response").into_iter().cloned().collect())
    }
}

async fn write_response(response: reqwest::Response) -> Result<WriteResponse, Box<dyn Error + Send + Sync>> {
    let status = response.status();
    let etag = response.headers()
        .get("ETag")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let body = response.text().await?;
    Ok(WriteResponse { status, etag, body })
}

/// Escape the characters that cannot appear verbatim in XML text
fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;

    #[test]
    fn test_new_event_url() {
        let resource = Resource::new(
            "https://dav.example.com/calendars/alice/work/".parse().unwrap(),
            Credentials::new("alice", "secret"),
            reqwest::Client::new(),
        );
        let calendar = RemoteCalendar::new("Work".to_string(), resource, true, SupportedComponents::EVENT);
        let url = calendar.url_for_new_event("abc/../def:1").unwrap();
        assert_eq!(url.host_str(), Some("dav.example.com"));
        let filename = url.path().strip_prefix("/calendars/alice/work/").unwrap();
        assert!(filename.ends_with(".ics"));
        assert!(filename.contains('/') == false);
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml(r#"a<b>&"c'"#), "a&lt;b&gt;&amp;&quot;c&apos;");
    }
}
