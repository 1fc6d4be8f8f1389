use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    response::Html,
    Json,
};
use indicatif::ProgressBar;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use super::{html, AppState};
use crate::db::{PriceRecord, Source};
use crate::error::{Error, Result};
use crate::extractor::process_documents;

/// `Query` whose rejection is the crate's JSON error instead of plain text.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| Error::InvalidRequest(e.body_text()))?;
        Ok(ApiQuery(value))
    }
}

/// `Path` counterpart of [`ApiQuery`].
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| Error::InvalidRequest(e.body_text()))?;
        Ok(ApiPath(value))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CheapestParams {
    pub n: Option<usize>,
}

/// Body returned by a trigger run.
#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub source: Source,
    pub documents: usize,
    pub failures: usize,
    pub processed: usize,
    pub inserted: usize,
    pub discarded: usize,
    pub skipped: usize,
}

fn page_limit(state: &AppState, limit: Option<usize>) -> usize {
    let q = &state.settings.query;
    limit.unwrap_or(q.default_limit).min(q.max_limit)
}

fn cheapest_count(state: &AppState, n: Option<usize>) -> usize {
    let q = &state.settings.query;
    n.unwrap_or(q.default_cheapest).min(q.max_limit)
}

pub async fn index(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Html<String>> {
    let limit = page_limit(&state, params.limit);
    let records = state.repo.list(limit, params.offset.unwrap_or(0))?;
    let cheapest = state.repo.cheapest(cheapest_count(&state, None))?;
    Ok(Html(html::render_page(&records, &cheapest)))
}

pub async fn list_prices(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<PriceRecord>>> {
    let limit = page_limit(&state, params.limit);
    let records = state.repo.list(limit, params.offset.unwrap_or(0))?;
    Ok(Json(records))
}

pub async fn cheapest(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<CheapestParams>,
) -> Result<Json<Vec<PriceRecord>>> {
    let records = state.repo.cheapest(cheapest_count(&state, params.n))?;
    Ok(Json(records))
}

pub async fn get_price(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<PriceRecord>> {
    state
        .repo
        .get_by_id(id)?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("price record {}", id)))
}

/// Collect one source and extract what was fetched, then report the counts.
pub async fn scrape(
    State(state): State<AppState>,
    ApiPath(source): ApiPath<String>,
) -> Result<Json<ScrapeResponse>> {
    let source: Source = source.parse()?;
    let _running = state.scrape_lock.lock().await;

    let report = state.collector.collect(source).await?;
    let documents = report.documents.len();
    let failures = report.failures;

    let repo = state.repo.clone();
    let settings = state.settings.clone();
    let summary = tokio::task::spawn_blocking(move || {
        process_documents(
            repo.as_ref(),
            &settings,
            source,
            &report.documents,
            &ProgressBar::hidden(),
        )
    })
    .await
    .map_err(|e| Error::Internal(format!("extraction task: {}", e)))??;

    info!(%source, documents, failures, inserted = summary.inserted, "trigger run finished");
    Ok(Json(ScrapeResponse {
        source,
        documents,
        failures,
        processed: summary.processed,
        inserted: summary.inserted,
        discarded: summary.discarded,
        skipped: summary.skipped,
    }))
}
