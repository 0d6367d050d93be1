//! JSON HTTP API over the changelog store and generation pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/api/repos` | List repositories |
//! | `POST`   | `/api/repos` | Register a repository |
//! | `DELETE` | `/api/repos/{id}` | Delete a repository and all its state |
//! | `GET`    | `/api/repos/{id}/changelog` | Live snapshot (`?format=markdown` for Markdown) |
//! | `POST`   | `/api/repos/{id}/changelog` | Run a generation |
//! | `POST`   | `/api/repos/{id}/entries` | Add a manual entry |
//! | `GET`    | `/api/repos/{id}/versions` | List published versions |
//! | `POST`   | `/api/repos/{id}/versions` | Publish the live snapshot |
//! | `GET`    | `/api/repos/{id}/versions/{label}` | Read a published version |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: repository 'acme-widgets'" } }
//! ```
//!
//! Codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `conflict` (409), `rate_limited` (429), `upstream` (502), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::completion::create_completion_service;
use crate::config::Config;
use crate::error::Error;
use crate::export::render_markdown;
use crate::generate::{run_generation, GenerateOptions, GenerationReport};
use crate::github::{GitHubClient, PullRequestSource};
use crate::models::{ChangeRecord, ChangeType, ManualEntry, Repository, Snapshot, Version};
use crate::retry::RetryPolicy;
use crate::store::ChangelogStore;
use crate::summarizer::Summarizer;

/// The pieces a generation run needs besides the store.
pub struct Pipeline {
    pub source: Arc<dyn PullRequestSource>,
    pub summarizer: Arc<Summarizer>,
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChangelogStore>,
    /// `Err` carries the reason generation is unavailable (e.g. no API key);
    /// every other endpoint still works.
    pub pipeline: Arc<Result<Pipeline, String>>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/repos", get(handle_list_repos).post(handle_create_repo))
        .route("/api/repos/{id}", delete(handle_delete_repo))
        .route(
            "/api/repos/{id}/changelog",
            get(handle_get_changelog).post(handle_generate),
        )
        .route("/api/repos/{id}/entries", post(handle_add_entry))
        .route(
            "/api/repos/{id}/versions",
            get(handle_list_versions).post(handle_publish),
        )
        .route("/api/repos/{id}/versions/{label}", get(handle_get_version))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config, store: Arc<dyn ChangelogStore>) -> anyhow::Result<()> {
    let retry = RetryPolicy::from_config(&config.retry);

    let pipeline = match create_completion_service(&config.ai, retry) {
        Ok(completion) => {
            let source = GitHubClient::new(&config.github, retry)?;
            Ok(Pipeline {
                source: Arc::new(source),
                summarizer: Arc::new(Summarizer::from_config(Arc::from(completion), &config.ai)),
            })
        }
        Err(e) => {
            warn!("changelog generation disabled: {}", e);
            Err(e.to_string())
        }
    };

    let state = AppState {
        store,
        pipeline: Arc::new(pipeline),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("listening on http://{}", config.server.bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Converts a library [`Error`] into a status code and JSON body.
struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Duplicate(_) | Error::DuplicateVersion { .. } => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Network(_) | Error::Decode(_) | Error::AiResponse(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Repositories ============

async fn handle_list_repos(State(state): State<AppState>) -> ApiResult<Json<Vec<Repository>>> {
    Ok(Json(state.store.list_repositories().await?))
}

#[derive(Debug, Deserialize)]
struct CreateRepoRequest {
    /// `owner/name`.
    repo: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

async fn handle_create_repo(
    State(state): State<AppState>,
    Json(req): Json<CreateRepoRequest>,
) -> ApiResult<(StatusCode, Json<Repository>)> {
    let repo = Repository::from_slug(
        &req.repo,
        req.id.as_deref(),
        req.name.as_deref(),
        Utc::now(),
    )?;
    state.store.create_repository(&repo).await?;
    info!(repo = %repo.id, "registered repository");
    Ok((StatusCode::CREATED, Json(repo)))
}

async fn handle_delete_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete_repository(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Changelog ============

#[derive(Debug, Deserialize)]
struct ChangelogQuery {
    #[serde(default)]
    format: Option<String>,
}

async fn handle_get_changelog(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ChangelogQuery>,
) -> ApiResult<Response> {
    let repo = state.store.get_repository(&id).await?;
    let snapshot = state
        .store
        .get_snapshot(&id)
        .await?
        .unwrap_or_else(|| Snapshot::empty(&id, Utc::now()));

    match query.format.as_deref() {
        None | Some("json") => Ok(Json(snapshot).into_response()),
        Some("markdown") | Some("md") => Ok((
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            render_markdown(&snapshot, &format!("{} Changelog", repo.display_name)),
        )
            .into_response()),
        Some(other) => Err(Error::Validation(format!(
            "unknown format '{}'; expected json or markdown",
            other
        ))
        .into()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    days: Option<u32>,
    #[serde(default)]
    pr: Option<i64>,
    #[serde(default)]
    include_diff: bool,
}

async fn handle_generate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<GenerateRequest>>,
) -> ApiResult<Json<GenerationReport>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let pipeline = match state.pipeline.as_ref() {
        Ok(pipeline) => pipeline,
        Err(reason) => {
            return Err(Error::Config(format!("generation unavailable: {}", reason)).into());
        }
    };

    let options = GenerateOptions {
        days: req.days.unwrap_or(GenerateOptions::default().days),
        pr: req.pr,
        include_diff: req.include_diff,
    };
    let report = run_generation(
        state.store.as_ref(),
        pipeline.source.as_ref(),
        &pipeline.summarizer,
        &id,
        options,
        Utc::now(),
    )
    .await?;
    Ok(Json(report))
}

// ============ Manual entries ============

#[derive(Debug, Deserialize)]
struct AddEntryRequest {
    summary: String,
    #[serde(default)]
    details: Option<String>,
    #[serde(rename = "type", default)]
    change_type: Option<String>,
    #[serde(default)]
    author: Option<String>,
    /// Defaults to today (UTC).
    #[serde(default)]
    date: Option<NaiveDate>,
}

async fn handle_add_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddEntryRequest>,
) -> ApiResult<(StatusCode, Json<ChangeRecord>)> {
    let change_type = match req.change_type.as_deref() {
        Some(raw) => raw.parse::<ChangeType>()?,
        None => ChangeType::Other,
    };
    let entry = ManualEntry {
        summary: req.summary,
        details: req.details,
        change_type,
        author: req.author,
    };
    entry.validate()?;

    let date = req.date.unwrap_or_else(|| Utc::now().date_naive());
    let record = state.store.add_manual_entry(&id, date, entry).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// ============ Versions ============

#[derive(Debug, Serialize)]
struct VersionSummary {
    version_label: String,
    created_at: DateTime<Utc>,
    snapshot_ref: String,
}

async fn handle_list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<VersionSummary>>> {
    let versions = state.store.list_versions(&id).await?;
    Ok(Json(
        versions
            .into_iter()
            .map(|v| VersionSummary {
                version_label: v.version_label,
                created_at: v.created_at,
                snapshot_ref: v.snapshot_ref,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    version: String,
}

async fn handle_publish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<(StatusCode, Json<Version>)> {
    let version = state.store.publish(&id, &req.version).await?;
    info!(repo = %id, version = %version.version_label, "published version");
    Ok((StatusCode::CREATED, Json(version)))
}

async fn handle_get_version(
    State(state): State<AppState>,
    Path((id, label)): Path<(String, String)>,
) -> ApiResult<Json<Version>> {
    Ok(Json(state.store.get_version(&id, &label).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionService;
    use crate::github::PrListing;
    use crate::models::PullRequest;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct FixedSource;

    #[async_trait]
    impl PullRequestSource for FixedSource {
        async fn list_closed_prs(
            &self,
            repo: &Repository,
            _since: DateTime<Utc>,
            _with_diffs: bool,
        ) -> crate::error::Result<PrListing> {
            Ok(PrListing {
                pull_requests: vec![PullRequest {
                    number: 10,
                    title: "Add export".into(),
                    body: String::new(),
                    author: "dev".into(),
                    url: format!("{}/pull/10", repo.url()),
                    diff_text: None,
                    merged_at: Utc::now(),
                    base_branch: "main".into(),
                    head_branch: "export".into(),
                    labels: Vec::new(),
                }],
                skipped: Vec::new(),
            })
        }

        async fn get_pull_request(
            &self,
            _repo: &Repository,
            number: i64,
            _with_diff: bool,
        ) -> crate::error::Result<PrListing> {
            Err(Error::NotFound(format!("PR #{}", number)))
        }
    }

    struct FeatureCompletion;

    #[async_trait]
    impl CompletionService for FeatureCompletion {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> crate::error::Result<String> {
            Ok(r#"{"summary": "Export to CSV", "type": "feature"}"#.to_string())
        }
    }

    fn app_with(store: Arc<InMemoryStore>) -> Router {
        router(AppState {
            store,
            pipeline: Arc::new(Ok(Pipeline {
                source: Arc::new(FixedSource),
                summarizer: Arc::new(Summarizer::new(Arc::new(FeatureCompletion), 3, 4000)),
            })),
        })
    }

    fn app() -> Router {
        app_with(Arc::new(InMemoryStore::new()))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_repo_lifecycle() {
        let app = app();
        let (status, repo) = send(
            &app,
            "POST",
            "/api/repos",
            Some(json!({ "repo": "acme/widgets", "name": "Widgets" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(repo["id"], "acme-widgets");

        let (status, body) = send(
            &app,
            "POST",
            "/api/repos",
            Some(json!({ "repo": "acme/widgets" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "conflict");

        let (_, list) = send(&app, "GET", "/api/repos", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "DELETE", "/api/repos/acme-widgets", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&app, "GET", "/api/repos/acme-widgets/changelog", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_generate_then_publish() {
        let app = app();
        send(&app, "POST", "/api/repos", Some(json!({ "repo": "acme/widgets" }))).await;

        let (status, report) = send(
            &app,
            "POST",
            "/api/repos/acme-widgets/changelog",
            Some(json!({ "days": 7 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["summarized"], 1);
        assert_eq!(report["snapshot"]["categories"]["feature"], json!([10]));

        let (status, version) = send(
            &app,
            "POST",
            "/api/repos/acme-widgets/versions",
            Some(json!({ "version": "v1.0.0" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(version["version_label"], "v1.0.0");

        let (status, _) = send(
            &app,
            "POST",
            "/api/repos/acme-widgets/versions",
            Some(json!({ "version": "v1.0.0" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, fetched) =
            send(&app, "GET", "/api/repos/acme-widgets/versions/v1.0.0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["snapshot_ref"], version["snapshot_ref"]);
    }

    #[tokio::test]
    async fn test_manual_entry_type_is_validated() {
        let app = app();
        send(&app, "POST", "/api/repos", Some(json!({ "repo": "acme/widgets" }))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/repos/acme-widgets/entries",
            Some(json!({ "summary": "Docs pass", "type": "chore" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");

        let (status, record) = send(
            &app,
            "POST",
            "/api/repos/acme-widgets/entries",
            Some(json!({ "summary": "Docs pass", "type": "docs", "date": "2024-01-05" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(record["type"], "docs");
        assert_eq!(record["date"], "2024-01-05");

        let (_, snapshot) = send(&app, "GET", "/api/repos/acme-widgets/changelog", None).await;
        assert_eq!(snapshot["changes"]["2024-01-05"][0]["summary"], "Docs pass");
    }

    #[tokio::test]
    async fn test_generation_unavailable_is_internal_error() {
        let store = Arc::new(InMemoryStore::new());
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let repo = Repository::from_slug("acme/widgets", None, None, created).unwrap();
        store.create_repository(&repo).await.unwrap();
        let app = router(AppState {
            store,
            pipeline: Arc::new(Err("no API key".to_string())),
        });

        let (status, body) = send(&app, "POST", "/api/repos/acme-widgets/changelog", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "internal");

        let (status, _) = send(&app, "GET", "/api/repos/acme-widgets/changelog", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
