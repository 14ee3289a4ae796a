pub mod monitoring;

use std::io::{BufRead, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::warn;
use prometheus_client::encoding::text::encode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::duplicate_service::{DuplicateAnnotation, DuplicateService};
use crate::import_service::matcher::PgNaturalKeyIndex;
use crate::import_service::{ImportError, SourceKind};
use crate::registry_client::RegistryClientError;
use crate::state::AppState;

use monitoring::IMPORT_METRICS;

/// Uploaded GOVMAN/USLM files can be large; USLM titles run to hundreds of
/// megabytes.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> String {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).unwrap_or_default();
    buffer
}

fn parse_source_kind(source: &str) -> Option<SourceKind> {
    match source.to_ascii_lowercase().as_str() {
        "govman" => Some(SourceKind::Govman),
        "uscode" => Some(SourceKind::UsCode),
        _ => None,
    }
}

#[derive(Deserialize)]
struct UsCodeImportParams {
    release_point: Option<String>,
}

async fn import_govman(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    run_import(&state, SourceKind::Govman, None, body).await
}

async fn import_uscode(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UsCodeImportParams>,
    body: Bytes,
) -> Response {
    run_import(&state, SourceKind::UsCode, params.release_point.as_deref(), body).await
}

async fn run_import(
    state: &AppState,
    kind: SourceKind,
    release_point: Option<&str>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "empty request body" })),
        )
            .into_response();
    }

    let stream: Box<dyn BufRead + Send> = Box::new(Cursor::new(body.to_vec()));
    match state.import_service.run_import(kind, stream, release_point).await {
        Ok(report) if report.is_failed() => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(report)).into_response()
        }
        Ok(report) => Json(report).into_response(),
        Err(err @ ImportError::AlreadyRunning(_)) => {
            warn!("{err}");
            (StatusCode::CONFLICT, Json(json!({ "error": err.to_string() }))).into_response()
        }
        Err(err) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

async fn import_status(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
) -> Response {
    let Some(kind) = parse_source_kind(&source) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    // The count is informational; an unreachable store must not break the
    // status probe.
    let stored_records = state.import_service.stored_count(kind).await.ok();
    Json(json!({
        "source": kind.as_str(),
        "status": state.import_service.status(kind),
        "storedRecords": stored_records,
    }))
    .into_response()
}

async fn last_import_result(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
) -> Response {
    let Some(kind) = parse_source_kind(&source) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.import_service.last_result(kind).await {
        Some(report) => Json(report).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse<T> {
    results: Vec<DuplicateAnnotation<T>>,
    total: i64,
    page: u32,
    page_size: u32,
}

#[derive(Deserialize)]
struct CongressSearchParams {
    name: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn search_congress(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CongressSearchParams>,
) -> Response {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 250);
    let offset = (page - 1) * page_size;

    let fetched = match state.congress.fetch_members(page_size, offset).await {
        Ok(fetched) => fetched,
        Err(err) => return registry_error(err),
    };

    // Congress.gov list filtering is limited; the name filter applies locally
    // to the fetched page.
    let members = match params.name.as_deref().map(str::trim) {
        Some(needle) if !needle.is_empty() => {
            let needle = needle.to_lowercase();
            fetched
                .members
                .into_iter()
                .filter(|member| {
                    member
                        .name
                        .as_deref()
                        .map(|name| name.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .collect()
        }
        _ => fetched.members,
    };

    let duplicates = DuplicateService::new(PgNaturalKeyIndex::new(
        state.pool.clone(),
        SourceKind::Govman,
    ));
    match duplicates.annotate(members).await {
        Ok(results) => Json(SearchResponse {
            results,
            total: fetched.total,
            page,
            page_size,
        })
        .into_response(),
        Err(err) => store_error(err.message),
    }
}

#[derive(Deserialize)]
struct FederalRegisterSearchParams {
    term: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

async fn search_federal_register(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FederalRegisterSearchParams>,
) -> Response {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let term = params.term.unwrap_or_default();

    let fetched = match state
        .federal_register
        .fetch_documents(&term, page, per_page)
        .await
    {
        Ok(fetched) => fetched,
        Err(err) => return registry_error(err),
    };

    let duplicates = DuplicateService::new(PgNaturalKeyIndex::new(
        state.pool.clone(),
        SourceKind::Govman,
    ));
    match duplicates.annotate(fetched.documents).await {
        Ok(results) => Json(SearchResponse {
            results,
            total: fetched.total,
            page,
            page_size: per_page,
        })
        .into_response(),
        Err(err) => store_error(err.message),
    }
}

#[derive(Deserialize)]
struct LegislatorSearchParams {
    name: Option<String>,
}

async fn search_legislators(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LegislatorSearchParams>,
) -> Response {
    let name = params.name.unwrap_or_default();
    let fetched = match state.legislators.search_by_name(&name).await {
        Ok(fetched) => fetched,
        Err(err) => return registry_error(err),
    };
    let total = fetched.len() as i64;

    let duplicates = DuplicateService::new(PgNaturalKeyIndex::new(
        state.pool.clone(),
        SourceKind::Govman,
    ));
    match duplicates.annotate(fetched).await {
        Ok(results) => Json(SearchResponse {
            results,
            total,
            page: 1,
            page_size: total.try_into().unwrap_or(u32::MAX),
        })
        .into_response(),
        Err(err) => store_error(err.message),
    }
}

fn registry_error(err: RegistryClientError) -> Response {
    warn!("registry fetch failed: {err}");
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn store_error(message: String) -> Response {
    warn!("duplicate lookup failed: {message}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

pub async fn setup_server(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    setup_server_with_addr(state, SocketAddr::from(([0, 0, 0, 0], 3000)))
        .await
        .expect("failed to bind admin server")
}

/// Starts the admin/metrics HTTP server on the supplied socket address.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    {
        let mut registry = state.registry.write().await;

        IMPORT_METRICS
            .get_or_init(|| async { monitoring::ImportMetrics::register(&mut registry, "import") })
            .await;

        monitoring::register_build_info_metric(&mut registry, "worker");
    }

    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/", get(|| async { "govdata worker" }))
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .route("/admin/import/govman", post(import_govman))
        .route("/admin/import/uscode", post(import_uscode))
        .route("/admin/import/:source/status", get(import_status))
        .route("/admin/import/:source/last", get(last_import_result))
        .route("/admin/search/congress", get(search_congress))
        .route("/admin/search/federal-register", get(search_federal_register))
        .route("/admin/search/legislators", get(search_legislators))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await
        .unwrap();
    });

    Ok(server_handle)
}
