use reqwest::{Method, RequestBuilder};
use url::Url;

use crate::credentials::Credentials;

/// Just a wrapper around a URL, credentials and the HTTP client that reaches it
#[derive(Clone, Debug)]
pub struct Resource {
    url: Url,
    credentials: Credentials,
    http: reqwest::Client,
}

impl Resource {
    pub fn new(url: Url, credentials: Credentials, http: reqwest::Client) -> Self {
        Self { url, credentials, http }
    }

    pub fn url(&self) -> &Url { &self.url }
    pub fn credentials(&self) -> &Credentials { &self.credentials }

    /// Build a new Resource by keeping the same credentials and HTTP client, for a `href` relative to this resource.
    ///
    /// Absolute hrefs (that may point to another host) are used as-is.
    pub fn combine(&self, href: &str) -> Result<Resource, url::ParseError> {
        let url = self.url.join(href.trim())?;
        Ok(Self {
            url,
            credentials: self.credentials.clone(),
            http: self.http.clone(),
        })
    }

    /// Start an authenticated request to this resource
    pub fn request(&self, method: Method) -> RequestBuilder {
        self.http
            .request(method, self.url.clone())
            .basic_auth(self.credentials.username(), Some(self.credentials.password()))
    }
}
