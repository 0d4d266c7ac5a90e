//! Issue tracker (Jira REST v2) client.
//!
//! This module provides:
//! - [`IssueSource`]: the fetch interface the cache manager resolves through
//! - [`JiraClient`]: the HTTP implementation against `/rest/api/2`
//!
//! The client never touches the network without a base URL, username and
//! API token; a missing value fails every call with
//! [`TrackerError::NotConfigured`] and warns the user once.

mod wire;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

use crate::config::TrackerSettings;
use crate::models::Issue;
use crate::notices::Notices;

pub use wire::{IssueResponse, SearchResponse};

/// User-Agent header sent with every request
const USER_AGENT: &str = concat!("tiller/", env!("CARGO_PKG_VERSION"));

/// Fields requested for child issue searches
pub const SEARCH_FIELDS: &str = "summary,status,description,issuetype,priority,assignee";

/// Transport timeout for a single request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Notice key for the one-time "not configured" warning
const NOT_CONFIGURED_NOTICE: &str = "tracker-not-configured";

/// Errors that can occur talking to the issue tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// URL, username or API token missing
    #[error("Issue tracker is not configured: run `tl configure`")]
    NotConfigured,

    /// Credentials rejected (401/403)
    #[error("Issue tracker rejected the credentials: HTTP {0}")]
    Unauthorized(u16),

    /// Issue does not exist or is not visible (404)
    #[error("Issue not found: {0}")]
    NotFound(String),

    /// Network or other HTTP error
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Response did not have the expected shape
    #[error("Failed to parse tracker response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TrackerError::Parse(e.to_string())
        } else {
            TrackerError::Http(e.to_string())
        }
    }
}

/// Where issues come from when neither cache tier has them.
pub trait IssueSource: Send + Sync {
    /// Fetch a single issue by key.
    fn fetch_issue<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Issue, TrackerError>>;

    /// Fetch the direct children of `parent_key`.
    fn fetch_child_issues<'a>(
        &'a self,
        parent_key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Issue>, TrackerError>>;
}

/// Validated connection details.
#[derive(Debug, Clone)]
struct Credentials {
    base_url: String,
    username: String,
    api_token: String,
}

/// HTTP client for the tracker's REST API.
pub struct JiraClient {
    http: reqwest::Client,
    credentials: Option<Credentials>,
    notices: Arc<Notices>,
}

impl JiraClient {
    /// Create a client from resolved settings.
    pub fn new(settings: &TrackerSettings, notices: Arc<Notices>) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| crate::Error::Other(format!("Failed to build HTTP client: {}", e)))?;

        let credentials = match (&settings.base_url, &settings.username, &settings.api_token) {
            (Some(url), Some(user), Some(token))
                if !url.trim().is_empty() && !user.is_empty() && !token.is_empty() =>
            {
                Some(Credentials {
                    base_url: url.trim().trim_end_matches('/').to_string(),
                    username: user.clone(),
                    api_token: token.clone(),
                })
            }
            _ => None,
        };

        Ok(Self {
            http,
            credentials,
            notices,
        })
    }

    /// Whether URL, username and API token are all present.
    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Browser URL for an issue.
    pub fn issue_url(&self, key: &str) -> Option<String> {
        self.credentials
            .as_ref()
            .map(|c| browse_url(&c.base_url, key))
    }

    fn credentials(&self) -> Result<&Credentials, TrackerError> {
        match &self.credentials {
            Some(credentials) => Ok(credentials),
            None => {
                self.notices.warn_once(
                    NOT_CONFIGURED_NOTICE,
                    "Issue tracker is not configured. Run `tl configure`.",
                );
                Err(TrackerError::NotConfigured)
            }
        }
    }

    async fn get_issue(&self, key: &str) -> Result<Issue, TrackerError> {
        let credentials = self.credentials()?;
        tracing::info!("Fetching issue from API: {}", key);

        let url = format!("{}/rest/api/2/issue/{}", credentials.base_url, key);
        let response = self
            .http
            .get(&url)
            .basic_auth(&credentials.username, Some(&credentials.api_token))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let response = check_status(response, key).await?;

        let body: IssueResponse = response.json().await?;
        Ok(body.into_issue())
    }

    async fn search_children(&self, parent_key: &str) -> Result<Vec<Issue>, TrackerError> {
        let credentials = self.credentials()?;
        tracing::info!("Fetching sub-issues for: {}", parent_key);

        let url = format!("{}/rest/api/2/search", credentials.base_url);
        let jql = format!("parent = {}", parent_key);
        let response = self
            .http
            .get(&url)
            .basic_auth(&credentials.username, Some(&credentials.api_token))
            .header(CONTENT_TYPE, "application/json")
            .query(&[("jql", jql.as_str()), ("fields", SEARCH_FIELDS)])
            .send()
            .await?;
        let response = check_status(response, parent_key).await?;

        let body: SearchResponse = response.json().await?;
        Ok(body.into_issues())
    }
}

impl IssueSource for JiraClient {
    fn fetch_issue<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Issue, TrackerError>> {
        async move {
            let result = self.get_issue(key).await;
            match &result {
                Err(TrackerError::NotConfigured) | Ok(_) => {}
                Err(e) => {
                    tracing::error!("Error fetching issue {}: {}", key, e);
                    self.notices
                        .error(format!("Failed to fetch issue {}.", key));
                }
            }
            result
        }
        .boxed()
    }

    fn fetch_child_issues<'a>(
        &'a self,
        parent_key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Issue>, TrackerError>> {
        async move {
            let result = self.search_children(parent_key).await;
            if let Err(e) = &result {
                tracing::warn!("Error fetching sub-issues for {}: {}", parent_key, e);
            }
            result
        }
        .boxed()
    }
}

/// Build the browser URL for `key` under `base_url`.
pub fn browse_url(base_url: &str, key: &str) -> String {
    format!("{}/browse/{}", base_url.trim_end_matches('/'), key)
}

async fn check_status(
    response: reqwest::Response,
    key: &str,
) -> Result<reqwest::Response, TrackerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        code @ (401 | 403) => Err(TrackerError::Unauthorized(code)),
        404 => Err(TrackerError::NotFound(key.to_string())),
        code => {
            let body = response.text().await.unwrap_or_default();
            Err(TrackerError::Http(format!("HTTP {}: {}", code, body)))
        }
    }
}
