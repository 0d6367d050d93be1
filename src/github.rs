//! Pull request source: the GitHub REST API.
//!
//! [`GitHubClient`] lists closed pull requests merged on or after a cutoff,
//! paginating through `GET /repos/{owner}/{repo}/pulls` (sorted by update
//! time, newest first) until a page contains nothing updated since the
//! cutoff. Unmerged PRs are dropped. Diffs are fetched per PR with the
//! `application/vnd.github.v3.diff` media type.
//!
//! # Failure policy
//!
//! - 401, and 403 without rate-limit headers → [`Error::Auth`], fatal.
//! - 429, or 403 with `x-ratelimit-remaining: 0` → [`Error::RateLimit`],
//!   retried with backoff, then fatal.
//! - 5xx and transport errors → [`Error::Network`], retried, then fatal.
//! - A 200 page that is not valid JSON → [`Error::Decode`], fatal at once.
//! - A diff that cannot be fetched for any other reason skips that PR; the
//!   skip is logged and returned in [`PrListing::skipped`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GithubConfig;
use crate::error::{Error, Result};
use crate::models::{PullRequest, Repository};
use crate::retry::RetryPolicy;

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const DIFF_MEDIA_TYPE: &str = "application/vnd.github.v3.diff";

/// Pull requests gathered for one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrListing {
    /// Newest merge first.
    pub pull_requests: Vec<PullRequest>,
    pub skipped: Vec<SkippedPr>,
}

/// A pull request left out of a listing, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPr {
    pub number: i64,
    pub reason: String,
}

/// Anything that can supply merged pull requests for a repository.
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    /// Closed PRs merged at or after `since`, newest merge first.
    async fn list_closed_prs(
        &self,
        repo: &Repository,
        since: DateTime<Utc>,
        with_diffs: bool,
    ) -> Result<PrListing>;

    /// One PR by number. Fails with [`Error::Validation`] if it is not merged.
    async fn get_pull_request(
        &self,
        repo: &Repository,
        number: i64,
        with_diff: bool,
    ) -> Result<PrListing>;
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    number: i64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<ApiUser>,
    html_url: String,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    base: ApiRef,
    head: ApiRef,
    #[serde(default)]
    labels: Vec<ApiLabel>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

impl ApiPull {
    fn into_pull_request(self, merged_at: DateTime<Utc>, diff_text: Option<String>) -> PullRequest {
        PullRequest {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: self
                .user
                .map(|u| u.login)
                .unwrap_or_else(|| "unknown".to_string()),
            url: self.html_url,
            diff_text,
            merged_at,
            base_branch: self.base.name,
            head_branch: self.head.name,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    per_page: u32,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(config: &GithubConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        if config.token.is_none() {
            warn!("no GitHub token configured; unauthenticated requests are heavily rate limited");
        }

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            per_page: config.per_page.clamp(1, 100),
            retry,
        })
    }

    async fn send(
        &self,
        path: &str,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .get(format!("{}{}", self.api_url, path))
            .header(ACCEPT, accept)
            .header(USER_AGENT, concat!("shiplog/", env!("CARGO_PKG_VERSION")))
            .header("X-GitHub-Api-Version", "2022-11-28")
            .query(query);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_transport("GitHub", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &headers, &body, path))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.retry
            .run(&format!("GET {}", path), || async {
                let response = self.send(path, query, JSON_MEDIA_TYPE).await?;
                response
                    .json::<T>()
                    .await
                    .map_err(|e| Error::from_transport("GitHub", e))
            })
            .await
    }

    async fn get_diff(&self, slug: &str, number: i64) -> Result<String> {
        let path = format!("/repos/{}/pulls/{}", slug, number);
        self.retry
            .run(&format!("GET {} (diff)", path), || async {
                let response = self.send(&path, &[], DIFF_MEDIA_TYPE).await?;
                response
                    .text()
                    .await
                    .map_err(|e| Error::from_transport("GitHub", e))
            })
            .await
    }

    /// Attach a diff, or decide to skip the PR.
    ///
    /// Returns `Ok(None)` for a skip; auth and rate-limit failures propagate.
    async fn diff_or_skip(
        &self,
        slug: &str,
        number: i64,
        skipped: &mut Vec<SkippedPr>,
    ) -> Result<Option<String>> {
        match self.get_diff(slug, number).await {
            Ok(diff) => Ok(Some(diff)),
            Err(e @ (Error::Auth(_) | Error::RateLimit(_))) => Err(e),
            Err(e) => {
                warn!(pr = number, "skipping PR: diff fetch failed: {}", e);
                skipped.push(SkippedPr {
                    number,
                    reason: format!("diff fetch failed: {}", e),
                });
                Ok(None)
            }
        }
    }
}

fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str, path: &str) -> Error {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            Error::RateLimit(format!("GitHub rate limit hit on {}: {}", path, body))
        }
        StatusCode::FORBIDDEN if exhausted || body.to_lowercase().contains("rate limit") => {
            Error::RateLimit(format!("GitHub rate limit exhausted on {}: {}", path, body))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(format!(
            "GitHub returned {} for {}: {}",
            status, path, body
        )),
        StatusCode::NOT_FOUND => Error::NotFound(format!("GitHub resource {}", path)),
        s if s.is_server_error() => {
            Error::Network(format!("GitHub returned {} for {}: {}", status, path, body))
        }
        _ => Error::Validation(format!(
            "GitHub rejected request {} with {}: {}",
            path, status, body
        )),
    }
}

#[async_trait]
impl PullRequestSource for GitHubClient {
    async fn list_closed_prs(
        &self,
        repo: &Repository,
        since: DateTime<Utc>,
        with_diffs: bool,
    ) -> Result<PrListing> {
        let slug = repo.slug();
        let path = format!("/repos/{}/pulls", slug);
        let mut merged: Vec<(ApiPull, DateTime<Utc>)> = Vec::new();
        let mut page: u32 = 1;

        loop {
            let query = vec![
                ("state", "closed".to_string()),
                ("sort", "updated".to_string()),
                ("direction", "desc".to_string()),
                ("per_page", self.per_page.to_string()),
                ("page", page.to_string()),
            ];
            let batch: Vec<ApiPull> = self.get_json(&path, &query).await?;
            let fetched = batch.len();
            let mut any_recent = false;

            for pr in batch {
                if pr.updated_at >= since {
                    any_recent = true;
                }
                if let Some(merged_at) = pr.merged_at.filter(|m| *m >= since) {
                    merged.push((pr, merged_at));
                }
            }
            debug!(repo = %slug, page, fetched, kept = merged.len(), "fetched pull request page");

            if fetched < self.per_page as usize || !any_recent {
                break;
            }
            page += 1;
        }

        merged.sort_by(|(a, am), (b, bm)| bm.cmp(am).then_with(|| b.number.cmp(&a.number)));

        let mut listing = PrListing::default();
        for (pr, merged_at) in merged {
            let diff = if with_diffs {
                match self.diff_or_skip(&slug, pr.number, &mut listing.skipped).await? {
                    Some(diff) => Some(diff),
                    None => continue,
                }
            } else {
                None
            };
            listing.pull_requests.push(pr.into_pull_request(merged_at, diff));
        }

        info!(
            repo = %slug,
            merged = listing.pull_requests.len(),
            skipped = listing.skipped.len(),
            "collected merged pull requests since {}",
            since.format("%Y-%m-%d")
        );
        Ok(listing)
    }

    async fn get_pull_request(
        &self,
        repo: &Repository,
        number: i64,
        with_diff: bool,
    ) -> Result<PrListing> {
        let slug = repo.slug();
        let pr: ApiPull = self
            .get_json(&format!("/repos/{}/pulls/{}", slug, number), &[])
            .await?;
        let merged_at = pr
            .merged_at
            .ok_or_else(|| Error::Validation(format!("PR #{} has not been merged", number)))?;

        let mut listing = PrListing::default();
        let diff = if with_diff {
            match self.diff_or_skip(&slug, number, &mut listing.skipped).await? {
                Some(diff) => Some(diff),
                None => return Ok(listing),
            }
        } else {
            None
        };
        listing.pull_requests.push(pr.into_pull_request(merged_at, diff));
        Ok(listing)
    }
}
