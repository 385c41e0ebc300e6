//! This module provides a client to connect to a CalDAV server, and to discover the calendars of a user

use std::convert::TryFrom;
use std::error::Error;
use std::fmt::{Display, Formatter};

use minidom::Element;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::calendar::remote_calendar::RemoteCalendar;
use crate::calendar::{find_prop, has_write_privilege, successful_props, SupportedComponents};
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::credentials::Credentials;
use crate::resource::Resource;
use crate::utils::{find_elem, find_elems, find_text_at};


static DAVCLIENT_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:">
       <d:prop>
           <d:current-user-principal />
       </d:prop>
    </d:propfind>
"#;

static HOMESET_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" >
      <d:self/>
      <d:prop>
        <c:calendar-home-set />
      </d:prop>
    </d:propfind>
"#;

static CAL_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" >
       <d:prop>
         <d:displayname />
         <d:resourcetype />
         <d:current-user-privilege-set />
         <c:supported-calendar-component-set />
       </d:prop>
    </d:propfind>
"#;

const WELL_KNOWN_PATH: &str = "/.well-known/caldav";


/// The steps of the discovery handshake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryStep {
    /// Looking for the current-user-principal from the well-known endpoint
    Principal,
    /// Looking for the calendar-home-set of the principal
    HomeSet,
    /// Listing the calendars of the calendar-home-set
    Calendars,
}

impl Display for DiscoveryStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryStep::Principal => write!(f, "principal lookup"),
            DiscoveryStep::HomeSet => write!(f, "calendar home set lookup"),
            DiscoveryStep::Calendars => write!(f, "calendar enumeration"),
        }
    }
}

/// Why a discovery failed. These are meant to be displayed to a user.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("{step} failed: not found on the server")]
    NotFound { step: DiscoveryStep },
    #[error("{step} failed: access forbidden, check the credentials")]
    Forbidden { step: DiscoveryStep },
    #[error("{step} failed: unexpected HTTP status {status}")]
    UnexpectedStatus { step: DiscoveryStep, status: u16 },
    #[error("{step} failed: the server could not be reached ({reason})")]
    Unreachable { step: DiscoveryStep, reason: String },
    #[error("{step} failed: unexpected answer from the server ({reason})")]
    Malformed { step: DiscoveryStep, reason: String },
    #[error("{step} failed: too many redirects")]
    TooManyRedirects { step: DiscoveryStep },
    #[error("no calendars found")]
    NoCalendars,
}

impl DiscoveryError {
    /// The step that failed. `None` if every step succeeded but nothing usable was found
    pub fn step(&self) -> Option<DiscoveryStep> {
        match self {
            DiscoveryError::NotFound { step }
            | DiscoveryError::Forbidden { step }
            | DiscoveryError::UnexpectedStatus { step, .. }
            | DiscoveryError::Unreachable { step, .. }
            | DiscoveryError::Malformed { step, .. }
            | DiscoveryError::TooManyRedirects { step } => Some(*step),
            DiscoveryError::NoCalendars => None,
        }
    }

    fn malformed<E: Display>(step: DiscoveryStep, err: E) -> Self {
        DiscoveryError::Malformed { step, reason: err.to_string() }
    }
}


/// A client that performs the CalDAV discovery handshake
pub struct Client {
    url: Url,
    credentials: Credentials,
    max_redirects: usize,
    http: reqwest::Client,
}

impl Client {
    /// Create a client. This does not start a connection
    pub fn new<S: AsRef<str>>(url: S, credentials: Credentials) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let url = Url::parse(url.as_ref())?;

        // Redirects are followed by hand, since an automatic redirect would turn a PROPFIND into a GET
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            url,
            credentials,
            max_redirects: SyncConfig::default().max_redirects,
            http,
        })
    }

    /// Create a client for the server described in `config`, unless the credentials are bound to another server
    pub fn from_config(config: &SyncConfig, credentials: Credentials) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let server_url = credentials.server_url().unwrap_or(&config.server_url).to_string();
        let mut client = Self::new(server_url, credentials)?;
        client.max_redirects = config.max_redirects;
        Ok(client)
    }

    pub fn url(&self) -> &Url { &self.url }

    /// Run the discovery handshake, and build a context that holds the usable calendars.
    ///
    /// This consumes the client: its HTTP connection pool is moved into the context, and released with it.
    pub async fn build_context(self) -> Result<SyncContext, DiscoveryError> {
        let principal = self.find_principal().await?;
        log::debug!("Principal URL is {}", principal);

        let home_set = self.find_home_set(&principal).await?;
        log::debug!("Calendar home set URL is {}", home_set);

        let calendars = self.list_calendars(&home_set).await?;
        let home = Resource::new(home_set, self.credentials, self.http);
        Ok(SyncContext::new(home, calendars))
    }

    async fn find_principal(&self) -> Result<Url, DiscoveryError> {
        let step = DiscoveryStep::Principal;
        let well_known = self.url.join(WELL_KNOWN_PATH).map_err(|err| DiscoveryError::malformed(step, err))?;

        let (answered_by, root) = self.propfind(&well_known, DAVCLIENT_BODY, 0, step).await?;
        let href = find_text_at(&root, &["current-user-principal", "href"])
            .ok_or_else(|| DiscoveryError::malformed(step, "no current-user-principal"))?;
        answered_by.join(&href).map_err(|err| DiscoveryError::malformed(step, err))
    }

    async fn find_home_set(&self, principal: &Url) -> Result<Url, DiscoveryError> {
        let step = DiscoveryStep::HomeSet;
        let (answered_by, root) = self.propfind(principal, HOMESET_BODY, 0, step).await?;
        let href = find_text_at(&root, &["calendar-home-set", "href"])
            .ok_or_else(|| DiscoveryError::malformed(step, "no calendar-home-set"))?;

        // Either the final URL after redirects, or an absolute href, may point to another front-end host
        let home_set = answered_by.join(&href).map_err(|err| DiscoveryError::malformed(step, err))?;
        if home_set.host_str() != self.url.host_str() {
            log::info!("Calendars are served by {}, rebinding to this host", home_set.host_str().unwrap_or("<unknown host>"));
        }
        Ok(home_set)
    }

    async fn list_calendars(&self, home_set: &Url) -> Result<Vec<RemoteCalendar>, DiscoveryError> {
        let step = DiscoveryStep::Calendars;
        let (answered_by, root) = self.propfind(home_set, CAL_BODY, 1, step).await?;
        let base = Resource::new(answered_by, self.credentials.clone(), self.http.clone());

        let mut calendars = Vec::new();
        for response in find_elems(&root, "response") {
            if let Some(calendar) = parse_calendar(&base, response) {
                log::info!("Found calendar {} ({})", calendar.name(), if calendar.is_writable() { "writable" } else { "read-only" });
                calendars.push(calendar);
            }
        }

        let writable: Vec<RemoteCalendar> = calendars.iter().filter(|cal| cal.is_writable()).cloned().collect();
        let usable = if writable.is_empty() {
            if calendars.is_empty() == false {
                log::warn!("No writable calendar found. Calendars will be used read-only");
            }
            calendars
        } else {
            writable
        };

        if usable.is_empty() {
            return Err(DiscoveryError::NoCalendars);
        }
        Ok(usable)
    }

    /// Send a PROPFIND, following redirects.
    /// Returns the URL that eventually answered, and the parsed answer
    async fn propfind(&self, url: &Url, body: &'static str, depth: u32, step: DiscoveryStep) -> Result<(Url, Element), DiscoveryError> {
        let method = Method::from_bytes(b"PROPFIND").map_err(|err| DiscoveryError::malformed(step, err))?;
        let mut current = url.clone();
        let mut redirects = 0;

        loop {
            let response = self.http
                .request(method.clone(), current.clone())
                .header("Depth", depth)
                .header(CONTENT_TYPE, "application/xml; charset=utf-8")
                .basic_auth(self.credentials.username(), Some(self.credentials.password()))
                .body(body)
                .send()
                .await
                .map_err(|err| DiscoveryError::Unreachable { step, reason: err.to_string() })?;

            let status = response.status();
            if status.is_redirection() {
                redirects += 1;
                if redirects > self.max_redirects {
                    return Err(DiscoveryError::TooManyRedirects { step });
                }
                let location = response.headers()
                    .get(LOCATION)
                    .and_then(|loc| loc.to_str().ok())
                    .ok_or_else(|| DiscoveryError::malformed(step, "redirect without a location"))?;
                current = current.join(location).map_err(|err| DiscoveryError::malformed(step, err))?;
                log::debug!("{} is redirected to {}", step, current);
                continue;
            }

            check_status(status, step)?;

            let text = response.text().await
                .map_err(|err| DiscoveryError::Unreachable { step, reason: err.to_string() })?;
            let root: Element = text.parse().map_err(|err| DiscoveryError::malformed(step, err))?;
            return Ok((current, root));
        }
    }
}

fn check_status(status: StatusCode, step: DiscoveryStep) -> Result<(), DiscoveryError> {
    if status.is_success() {
        return Ok(());
    }
    log::warn!("{} failed with HTTP status {}", step, status);
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(DiscoveryError::NotFound { step }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DiscoveryError::Forbidden { step }),
        other => Err(DiscoveryError::UnexpectedStatus { step, status: other.as_u16() }),
    }
}

/// Build a calendar from a `<response>` of the enumeration, if it describes a usable calendar
fn parse_calendar(base: &Resource, response: &Element) -> Option<RemoteCalendar> {
    let href = find_elem(response, "href")?.text();
    let props = successful_props(response);

    let display_name = find_prop(&props, "displayname")
        .map(|e| e.text().trim().to_string())
        .filter(|name| name.is_empty() == false)
        .unwrap_or_else(|| href.trim().trim_end_matches('/').rsplit('/').next().unwrap_or("<no name>").to_string());
    log::debug!("Considering calendar {}", display_name);

    // We filter out non-calendar items
    let resource_types = find_prop(&props, "resourcetype")?;
    if resource_types.children().any(|rt| rt.name() == "calendar") == false {
        return None;
    }

    // An absent component set means that every component is supported.
    // The root collection of some servers reports an empty one
    let supported_components = match find_prop(&props, "supported-calendar-component-set") {
        None => SupportedComponents::all(),
        Some(el) => match SupportedComponents::try_from(el) {
            Err(err) => {
                log::warn!("Calendar {} has invalid supported components ({})! Ignoring it.", display_name, err);
                return None;
            },
            Ok(sc) => sc,
        },
    };
    if supported_components.contains(SupportedComponents::EVENT) == false {
        log::debug!("Calendar {} does not support events, ignoring it", display_name);
        return None;
    }

    let writable = has_write_privilege(find_prop(&props, "current-user-privilege-set"));

    let resource = match base.combine(&href) {
        Err(err) => {
            log::warn!("Calendar {} has an invalid URL ({})! Ignoring it.", display_name, err);
            return None;
        },
        Ok(r) => r,
    };
    Some(RemoteCalendar::new(display_name, resource, writable, supported_components))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_servers_override_the_configured_one() {
        let config = SyncConfig { max_redirects: 2, ..SyncConfig::new("https://dav.example.com") };

        let client = Client::from_config(&config, Credentials::new("alice", "pw")).unwrap();
        assert_eq!(client.url().host_str(), Some("dav.example.com"));

        let bound = Credentials::new("bob", "pw").with_server("https://caldav.other.org/dav/");
        let client = Client::from_config(&config, bound).unwrap();
        assert_eq!(client.url().as_str(), "https://caldav.other.org/dav/");
        assert_eq!(client.max_redirects, 2);
    }

    #[test]
    fn discovery_errors_are_readable() {
        let err = DiscoveryError::Forbidden { step: DiscoveryStep::HomeSet };
        assert_eq!(err.to_string(), "calendar home set lookup failed: access forbidden, check the credentials");
        assert_eq!(err.step(), Some(DiscoveryStep::HomeSet));
        assert_eq!(DiscoveryError::NoCalendars.to_string(), "no calendars found");
        assert_eq!(DiscoveryError::NoCalendars.step(), None);
    }

    #[test]
    fn status_mapping() {
        assert!(check_status(StatusCode::MULTI_STATUS, DiscoveryStep::Principal).is_ok());
        assert_eq!(
            check_status(StatusCode::NOT_FOUND, DiscoveryStep::Principal),
            Err(DiscoveryError::NotFound { step: DiscoveryStep::Principal })
        );
        assert_eq!(
            check_status(StatusCode::UNAUTHORIZED, DiscoveryStep::Calendars),
            Err(DiscoveryError::Forbidden { step: DiscoveryStep::Calendars })
        );
        assert_eq!(
            check_status(StatusCode::INTERNAL_SERVER_ERROR, DiscoveryStep::HomeSet),
            Err(DiscoveryError::UnexpectedStatus { step: DiscoveryStep::HomeSet, status: 500 })
        );
    }

    #[test]
    fn enumeration_filters_calendars() {
        let xml = r#"<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
            <d:response>
                <d:href>/calendars/alice/</d:href>
                <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
            </d:response>
            <d:response>
                <d:href>/calendars/alice/work/</d:href>
                <d:propstat><d:prop>
                    <d:displayname>Work</d:displayname>
                    <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
                    <d:current-user-privilege-set><d:privilege><d:all/></d:privilege></d:current-user-privilege-set>
                    <c:supported-calendar-component-set><c:comp name="VEVENT"/></c:supported-calendar-component-set>
                </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
            </d:response>
            <d:response>
                <d:href>/calendars/alice/tasks/</d:href>
                <d:propstat><d:prop>
                    <d:displayname>Tasks</d:displayname>
                    <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
                    <c:supported-calendar-component-set><c:comp name="VTODO"/></c:supported-calendar-component-set>
                </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
            </d:response>
            <d:response>
                <d:href>/calendars/alice/holidays/</d:href>
                <d:propstat><d:prop>
                    <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
                </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
            </d:response>
        </d:multistatus>"#;
        let root: Element = xml.parse().unwrap();
        let base = Resource::new("https://dav.example.com/calendars/alice/".parse().unwrap(), Credentials::new("alice", "pw"), reqwest::Client::new());

        let calendars: Vec<RemoteCalendar> = find_elems(&root, "response")
            .into_iter()
            .filter_map(|response| parse_calendar(&base, response))
            .collect();
        assert_eq!(calendars.len(), 2);

        assert_eq!(calendars[0].name(), "Work");
        assert!(calendars[0].is_writable());
        assert_eq!(calendars[0].url().as_str(), "https://dav.example.com/calendars/alice/work/");

        assert_eq!(calendars[1].name(), "holidays");
        assert!(calendars[1].is_writable() == false);
    }
}
