//! GitHub repository discovery
//!
//! Resolves a [`Scope`] to one of the `/user/repos`, `/orgs/{org}/repos` or
//! `/users/{user}/repos` endpoints, walks its pages and turns every entry
//! into a [`RepositoryDescriptor`]. Listing is all-or-nothing: an error on
//! any page aborts the whole listing.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::ListingError;

/// Default GitHub REST endpoint
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Largest page size GitHub accepts
pub const MAX_PAGE_SIZE: u32 = 100;

/// Username paired with a bare token when no account is configured
const TOKEN_USERNAME: &str = "x-access-token";

/// One remote repository as seen by the listing endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    /// Repository name, case-sensitive as returned by the API
    pub name: String,
    /// `owner/name`
    pub full_name: String,
    pub owner: String,
    /// Clone URL, with credentials embedded when a secret is configured
    pub clone_url: String,
    /// Informational only, never filtered on
    pub private: bool,
    pub default_branch: Option<String>,
}

impl RepositoryDescriptor {
    /// Clone URL with any embedded credentials removed, safe for logs
    pub fn display_url(&self) -> String {
        strip_credentials(&self.clone_url)
    }
}

impl fmt::Debug for RepositoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryDescriptor")
            .field("name", &self.name)
            .field("full_name", &self.full_name)
            .field("owner", &self.owner)
            .field("clone_url", &self.display_url())
            .field("private", &self.private)
            .field("default_branch", &self.default_branch)
            .finish()
    }
}

/// Which repositories a run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Everything the authenticated identity can see
    Authenticated,
    /// Repositories owned by a user or organization
    Account(String),
}

/// Listing endpoint a scope resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    /// `/user/repos`: everything the identity can see
    Visible,
    /// `/user/repos?affiliation=owner`: the identity's own repositories, private included
    Owned,
    /// `/orgs/{org}/repos?type=all`: private included when the identity is a member
    Organization(String),
    /// `/users/{user}/repos`: public repositories only
    User(String),
}

impl Endpoint {
    fn path(&self) -> String {
        match self {
            Endpoint::Visible | Endpoint::Owned => "user/repos".to_string(),
            Endpoint::Organization(org) => format!("orgs/{}/repos", org),
            Endpoint::User(user) => format!("users/{}/repos", user),
        }
    }

    fn filter(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Endpoint::Visible | Endpoint::User(_) => None,
            Endpoint::Owned => Some(("affiliation", "owner")),
            Endpoint::Organization(_) => Some(("type", "all")),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Authenticated => write!(f, "authenticated user"),
            Scope::Account(account) => write!(f, "account {}", account),
        }
    }
}

/// Source of the remote repository set
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryLister: Send + Sync {
    /// Complete, deduplicated listing for `scope`, in page order
    async fn list(&self, scope: &Scope) -> Result<Vec<RepositoryDescriptor>, ListingError>;
}

/// Repository entry as returned by the REST API
#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    full_name: String,
    owner: ApiOwner,
    clone_url: String,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiAccount {
    login: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

/// [`RepositoryLister`] backed by the GitHub REST API
pub struct GitHubLister {
    http: reqwest::Client,
    api_url: String,
    account: Option<String>,
    secret: Option<String>,
    page_size: u32,
}

impl GitHubLister {
    /// Create a lister against `api_url`
    ///
    /// `account` only names the credential user embedded in clone URLs; the
    /// listed scope is chosen per call.
    pub fn new(
        api_url: &str,
        account: Option<String>,
        secret: Option<String>,
    ) -> Result<Self, ListingError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("hubmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ListingError::Network { page: 0, source })?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            account,
            secret,
            page_size: MAX_PAGE_SIZE,
        })
    }

    /// Override the page size (clamped to 1..=100)
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// GET `path` with the standard headers and decode the JSON body
    ///
    /// `page` only labels errors; 0 marks the account lookup.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        page: u32,
    ) -> Result<(T, HeaderMap), ListingError> {
        let url = format!("{}/{}", self.api_url, path);
        debug!("Fetching {} {:?}", url, query);

        let mut request = self
            .http
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .query(query);

        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|source| ListingError::Network { page, source })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|source| ListingError::Network { page, source })?;

        if !status.is_success() {
            return Err(classify_failure(status, &headers, &body, page));
        }

        let value = serde_json::from_slice(&body)
            .map_err(|source| ListingError::Malformed { page, source })?;

        Ok((value, headers))
    }

    async fn fetch_page(
        &self,
        endpoint: &Endpoint,
        page: u32,
    ) -> Result<(Vec<ApiRepository>, bool), ListingError> {
        let mut query = vec![
            ("per_page", self.page_size.to_string()),
            ("page", page.to_string()),
        ];
        if let Some((key, value)) = endpoint.filter() {
            query.push((key, value.to_string()));
        }

        let (items, headers) = self.get_json(&endpoint.path(), &query, page).await?;
        Ok((items, has_next_page(&headers)))
    }

    /// Pick the endpoint that shows everything the credentials allow
    ///
    /// `/users/{account}/repos` never returns private repositories, so with
    /// a secret the account is looked up first: the identity's own account
    /// lists through `/user/repos`, an organization through `/orgs`.
    async fn resolve(&self, scope: &Scope) -> Result<Endpoint, ListingError> {
        let account = match scope {
            Scope::Authenticated => return Ok(Endpoint::Visible),
            Scope::Account(account) if self.secret.is_none() => {
                return Ok(Endpoint::User(account.clone()))
            }
            Scope::Account(account) => account,
        };

        let lookup = |source| ListingError::AccountLookup {
            account: account.clone(),
            source: Box::new(source),
        };

        // Installation tokens may not read /user; that only rules out Owned
        match self.get_json::<ApiAccount>("user", &[], 0).await {
            Ok((me, _)) if me.login.eq_ignore_ascii_case(account) => {
                debug!("{} is the authenticated user", account);
                return Ok(Endpoint::Owned);
            }
            Ok(_) | Err(ListingError::Forbidden { .. }) => {}
            Err(e) => return Err(lookup(e)),
        }

        let (target, _) = self
            .get_json::<ApiAccount>(&format!("users/{}", account), &[], 0)
            .await
            .map_err(lookup)?;

        if target.kind == "Organization" {
            Ok(Endpoint::Organization(target.login))
        } else {
            Ok(Endpoint::User(account.clone()))
        }
    }

    fn to_descriptor(&self, repo: ApiRepository) -> RepositoryDescriptor {
        let clone_url = match &self.secret {
            Some(secret) => {
                let user = self.account.as_deref().unwrap_or(TOKEN_USERNAME);
                authenticate_url(&repo.clone_url, user, secret)
            }
            None => repo.clone_url,
        };

        RepositoryDescriptor {
            name: repo.name,
            full_name: repo.full_name,
            owner: repo.owner.login,
            clone_url,
            private: repo.private,
            default_branch: repo.default_branch,
        }
    }
}

#[async_trait]
impl RepositoryLister for GitHubLister {
    async fn list(&self, scope: &Scope) -> Result<Vec<RepositoryDescriptor>, ListingError> {
        debug!("Listing repositories for {}", scope);

        let endpoint = self.resolve(scope).await?;
        debug!("Listing through /{}", endpoint.path());

        let mut repositories = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1u32;

        loop {
            let (items, has_next) = self.fetch_page(&endpoint, page).await?;
            let received = items.len();

            for item in items {
                if seen.insert(item.full_name.clone()) {
                    repositories.push(self.to_descriptor(item));
                } else {
                    warn!("Dropping duplicate listing entry: {}", item.full_name);
                }
            }

            if received < self.page_size as usize || !has_next {
                break;
            }
            page += 1;
        }

        info!(
            "Found {} repositories for {} across {} page(s)",
            repositories.len(),
            scope,
            page
        );
        Ok(repositories)
    }
}

/// Map a non-success response to a typed listing error
fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &[u8], page: u32) -> ListingError {
    let message = serde_json::from_slice::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());

    let remaining = header_u64(headers, "x-ratelimit-remaining");
    let reset_at = header_u64(headers, "x-ratelimit-reset");

    match status {
        StatusCode::TOO_MANY_REQUESTS => ListingError::RateLimited { page, reset_at },
        StatusCode::FORBIDDEN if remaining == Some(0) => ListingError::RateLimited { page, reset_at },
        StatusCode::UNAUTHORIZED => ListingError::Unauthorized { page, message },
        StatusCode::FORBIDDEN => ListingError::Forbidden { page, message },
        StatusCode::NOT_FOUND => ListingError::NotFound { page, message },
        other => ListingError::Status {
            page,
            status: other.as_u16(),
            message,
        },
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// A `Link` header without `rel="next"` marks the last page.
/// Without the header at all, page size alone decides.
fn has_next_page(headers: &HeaderMap) -> bool {
    match headers.get(LINK).and_then(|value| value.to_str().ok()) {
        Some(link) => link
            .split(',')
            .any(|part| part.split(';').skip(1).any(|param| param.trim() == "rel=\"next\"")),
        None => true,
    }
}

/// Embed `user:secret` into an HTTP(S) clone URL
///
/// Anything that does not parse as an HTTP(S) URL (SSH remotes, local
/// paths) is returned unchanged.
pub fn authenticate_url(raw: &str, user: &str, secret: &str) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => return raw.to_string(),
    };

    if url.set_username(user).is_err() || url.set_password(Some(secret)).is_err() {
        return raw.to_string();
    }
    url.to_string()
}

/// Remove userinfo from an HTTP(S) URL
pub fn strip_credentials(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if matches!(url.scheme(), "http" | "https") => {
            if url.username().is_empty() && url.password().is_none() {
                return raw.to_string();
            }
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => raw.to_string(),
    }
}
