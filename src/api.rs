//! HTTP surface for chunklab.
//!
//! This module exposes an Axum router over [`ChunkLabApi`]:
//!
//! - `GET /benchmarks` – Catalog of benchmark datasets.
//! - `POST /chunk-test/update-datasets` – Re-fetch the catalog.
//! - `POST /chunk-test/user-documents` / `POST /chunk-test/benchmark` – Submit a chunk test.
//!   Returns `202` with the job's progress, or the full result with `?wait=true`.
//! - `GET /chunk-test/test-queries` – Canned queries for a dataset or `mixed`.
//! - `GET /chunk-test/progress/:id` – Poll a job.
//! - `GET /chunk-test/results/:id` – Full result once the job is terminal.
//! - `GET /chunk-test/results` – Newest-first result summaries.
//! - `POST /chunk-test/:id/cancel` – Request cancellation.
//! - `POST /documents`, `GET /documents/:id`, `POST /documents/:id/retry` – Document ingestion.
//! - `GET /metrics` and `GET /commands` – Counters and the command catalog.

use crate::chunk_test::{
    BenchmarkTestRequest, ChunkTestError, ChunkTestOverview, ChunkTestProgress, ChunkTestResult,
    UserDocumentsTestRequest,
};
use crate::datasets::{Benchmark, DatasetError, MAX_TEST_QUERIES, TestQueries};
use crate::jobs::SchedulerError;
use crate::metrics::MetricsSnapshot;
use crate::processing::Document;
use crate::service::{AppService, ServiceError};
use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Operations the HTTP surface needs from the application.
#[async_trait]
pub trait ChunkLabApi: Send + Sync {
    /// Current benchmark catalog.
    fn benchmarks(&self) -> Vec<Benchmark>;
    /// Re-fetch the benchmark catalog.
    async fn refresh_benchmarks(&self) -> Result<Vec<Benchmark>, ServiceError>;
    /// Canned queries for a dataset or `mixed`.
    async fn test_queries(
        &self,
        dataset_name: Option<&str>,
        count: usize,
    ) -> Result<TestQueries, ServiceError>;
    /// Accept a user-document chunk test.
    async fn submit_user_documents(
        &self,
        request: UserDocumentsTestRequest,
    ) -> Result<ChunkTestProgress, ServiceError>;
    /// Accept a benchmark chunk test.
    async fn submit_benchmark(
        &self,
        request: BenchmarkTestRequest,
    ) -> Result<ChunkTestProgress, ServiceError>;
    /// Block until a job is terminal and return its result.
    async fn wait_for_result(&self, test_id: u64) -> Result<Arc<ChunkTestResult>, ServiceError>;
    /// Live progress of a job.
    fn progress(&self, test_id: u64) -> Result<ChunkTestProgress, ServiceError>;
    /// Stored result of a terminal job.
    fn result(&self, test_id: u64) -> Result<Arc<ChunkTestResult>, ServiceError>;
    /// Newest-first result summaries.
    fn list_results(&self, dataset_name: Option<&str>, limit: usize) -> Vec<ChunkTestOverview>;
    /// Request cancellation of a job.
    async fn cancel(&self, test_id: u64) -> Result<ChunkTestProgress, ServiceError>;
    /// Register and queue an upload.
    fn upload_document(
        &self,
        file_name: &str,
        method: Option<&str>,
        content: Vec<u8>,
    ) -> Result<Document, ServiceError>;
    /// Current view of a document.
    fn document(&self, id: u64) -> Result<Document, ServiceError>;
    /// Re-run the pipeline for a terminal document.
    fn retry_document(&self, id: u64) -> Result<Document, ServiceError>;
    /// Current counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

#[async_trait]
impl ChunkLabApi for AppService {
    fn benchmarks(&self) -> Vec<Benchmark> {
        self.chunk_tests().benchmarks()
    }

    async fn refresh_benchmarks(&self) -> Result<Vec<Benchmark>, ServiceError> {
        Ok(self.chunk_tests().refresh_benchmarks().await?)
    }

    async fn test_queries(
        &self,
        dataset_name: Option<&str>,
        count: usize,
    ) -> Result<TestQueries, ServiceError> {
        Ok(self.chunk_tests().test_queries(dataset_name, count).await?)
    }

    async fn submit_user_documents(
        &self,
        request: UserDocumentsTestRequest,
    ) -> Result<ChunkTestProgress, ServiceError> {
        Ok(self.chunk_tests().submit_user_documents(request).await?)
    }

    async fn submit_benchmark(
        &self,
        request: BenchmarkTestRequest,
    ) -> Result<ChunkTestProgress, ServiceError> {
        Ok(self.chunk_tests().submit_benchmark(request).await?)
    }

    async fn wait_for_result(&self, test_id: u64) -> Result<Arc<ChunkTestResult>, ServiceError> {
        Ok(self.chunk_tests().wait_for_result(test_id).await?)
    }

    fn progress(&self, test_id: u64) -> Result<ChunkTestProgress, ServiceError> {
        Ok(self.chunk_tests().progress(test_id)?)
    }

    fn result(&self, test_id: u64) -> Result<Arc<ChunkTestResult>, ServiceError> {
        Ok(self.chunk_tests().result(test_id)?)
    }

    fn list_results(&self, dataset_name: Option<&str>, limit: usize) -> Vec<ChunkTestOverview> {
        self.chunk_tests().list_results(dataset_name, limit)
    }

    async fn cancel(&self, test_id: u64) -> Result<ChunkTestProgress, ServiceError> {
        Ok(self.chunk_tests().cancel(test_id).await?)
    }

    fn upload_document(
        &self,
        file_name: &str,
        method: Option<&str>,
        content: Vec<u8>,
    ) -> Result<Document, ServiceError> {
        AppService::upload_document(self, file_name, method, content)
    }

    fn document(&self, id: u64) -> Result<Document, ServiceError> {
        AppService::document(self, id)
    }

    fn retry_document(&self, id: u64) -> Result<Document, ServiceError> {
        AppService::retry_document(self, id)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics()
    }
}

/// Build the HTTP router exposing the chunk-test and document API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ChunkLabApi + 'static,
{
    Router::new()
        .route("/benchmarks", get(list_benchmarks::<S>))
        .route("/chunk-test/update-datasets", post(update_datasets::<S>))
        .route("/chunk-test/user-documents", post(submit_user_documents::<S>))
        .route("/chunk-test/benchmark", post(submit_benchmark::<S>))
        .route("/chunk-test/test-queries", get(get_test_queries::<S>))
        .route("/chunk-test/progress/:test_id", get(get_progress::<S>))
        .route("/chunk-test/results", get(list_results::<S>))
        .route("/chunk-test/results/:test_id", get(get_result::<S>))
        .route("/chunk-test/:test_id/cancel", post(cancel_test::<S>))
        .route("/documents", post(upload_document::<S>))
        .route("/documents/:id", get(get_document::<S>))
        .route("/documents/:id/retry", post(retry_document::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Response body for `GET /benchmarks` and `POST /chunk-test/update-datasets`.
#[derive(Serialize)]
struct BenchmarksResponse {
    benchmarks: Vec<Benchmark>,
    count: usize,
}

impl From<Vec<Benchmark>> for BenchmarksResponse {
    fn from(benchmarks: Vec<Benchmark>) -> Self {
        Self {
            count: benchmarks.len(),
            benchmarks,
        }
    }
}

async fn list_benchmarks<S>(State(service): State<Arc<S>>) -> Json<BenchmarksResponse>
where
    S: ChunkLabApi,
{
    Json(service.benchmarks().into())
}

/// Re-fetch the catalog. Concurrent calls share one fetch.
async fn update_datasets<S>(
    State(service): State<Arc<S>>,
) -> Result<Json<BenchmarksResponse>, ServiceError>
where
    S: ChunkLabApi,
{
    let benchmarks = service.refresh_benchmarks().await?;
    tracing::info!(count = benchmarks.len(), "Benchmark catalog refreshed");
    Ok(Json(benchmarks.into()))
}

/// `?wait=true` turns a submission into a blocking call returning the full result.
#[derive(Deserialize, Default)]
struct SubmitParams {
    #[serde(default)]
    wait: bool,
}

async fn submit_user_documents<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<SubmitParams>,
    Json(request): Json<UserDocumentsTestRequest>,
) -> Result<Response, ServiceError>
where
    S: ChunkLabApi,
{
    let accepted = service.submit_user_documents(request).await?;
    respond_to_submission(service.as_ref(), accepted, params.wait).await
}

async fn submit_benchmark<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<SubmitParams>,
    Json(request): Json<BenchmarkTestRequest>,
) -> Result<Response, ServiceError>
where
    S: ChunkLabApi,
{
    let accepted = service.submit_benchmark(request).await?;
    respond_to_submission(service.as_ref(), accepted, params.wait).await
}

async fn respond_to_submission<S>(
    service: &S,
    accepted: ChunkTestProgress,
    wait: bool,
) -> Result<Response, ServiceError>
where
    S: ChunkLabApi,
{
    if !wait {
        return Ok((StatusCode::ACCEPTED, Json(accepted)).into_response());
    }
    let result = service.wait_for_result(accepted.test_id).await?;
    Ok(Json(result.as_ref().clone()).into_response())
}

#[derive(Deserialize)]
struct TestQueriesParams {
    #[serde(default)]
    dataset_name: Option<String>,
    #[serde(default = "default_query_count")]
    count: usize,
}

fn default_query_count() -> usize {
    MAX_TEST_QUERIES
}

async fn get_test_queries<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<TestQueriesParams>,
) -> Result<Json<TestQueries>, ServiceError>
where
    S: ChunkLabApi,
{
    let queries = service
        .test_queries(params.dataset_name.as_deref(), params.count)
        .await?;
    Ok(Json(queries))
}

async fn get_progress<S>(
    State(service): State<Arc<S>>,
    Path(test_id): Path<u64>,
) -> Result<Json<ChunkTestProgress>, ServiceError>
where
    S: ChunkLabApi,
{
    Ok(Json(service.progress(test_id)?))
}

async fn get_result<S>(
    State(service): State<Arc<S>>,
    Path(test_id): Path<u64>,
) -> Result<Json<ChunkTestResult>, ServiceError>
where
    S: ChunkLabApi,
{
    let result = service.result(test_id)?;
    Ok(Json(result.as_ref().clone()))
}

#[derive(Deserialize)]
struct ListResultsParams {
    #[serde(default)]
    dataset_name: Option<String>,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    20
}

#[derive(Serialize)]
struct ResultsResponse {
    results: Vec<ChunkTestOverview>,
    count: usize,
}

async fn list_results<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<ListResultsParams>,
) -> Json<ResultsResponse>
where
    S: ChunkLabApi,
{
    let dataset = params
        .dataset_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let results = service.list_results(dataset, params.limit);
    Json(ResultsResponse {
        count: results.len(),
        results,
    })
}

async fn cancel_test<S>(
    State(service): State<Arc<S>>,
    Path(test_id): Path<u64>,
) -> Result<(StatusCode, Json<ChunkTestProgress>), ServiceError>
where
    S: ChunkLabApi,
{
    let progress = service.cancel(test_id).await?;
    Ok((StatusCode::ACCEPTED, Json(progress)))
}

#[derive(Deserialize)]
struct UploadParams {
    file_name: String,
    #[serde(default)]
    method: Option<String>,
}

/// Register a raw upload; the pipeline runs in the background.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<Document>), ServiceError>
where
    S: ChunkLabApi,
{
    let document =
        service.upload_document(&params.file_name, params.method.as_deref(), body.to_vec())?;
    Ok((StatusCode::ACCEPTED, Json(document)))
}

async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<u64>,
) -> Result<Json<Document>, ServiceError>
where
    S: ChunkLabApi,
{
    Ok(Json(service.document(id)?))
}

async fn retry_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<Document>), ServiceError>
where
    S: ChunkLabApi,
{
    let document = service.retry_document(id)?;
    Ok((StatusCode::ACCEPTED, Json(document)))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: ChunkLabApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

fn command(
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
) -> CommandDescriptor {
    CommandDescriptor {
        name,
        method,
        path,
        description,
        request_example: None,
    }
}

/// Enumerate supported HTTP commands for discovery by hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            command(
                "list_benchmarks",
                "GET",
                "/benchmarks",
                "List benchmark datasets available for chunk tests.",
            ),
            command(
                "update_datasets",
                "POST",
                "/chunk-test/update-datasets",
                "Re-fetch the benchmark catalog. Running tests keep the corpus they started with.",
            ),
            CommandDescriptor {
                request_example: Some(json!({
                    "document_ids": [1, 2],
                    "queries": ["What causes tides?"],
                    "modes": ["fixed-size", "semantic"]
                })),
                ..command(
                    "chunk_test_user_documents",
                    "POST",
                    "/chunk-test/user-documents",
                    "Compare chunking methods over uploaded documents. Returns 202 with progress, or the full result with ?wait=true.",
                )
            },
            CommandDescriptor {
                request_example: Some(json!({
                    "dataset_name": "geo-101",
                    "queries": ["capital of France"],
                    "modes": ["fixed-size", "semantic"]
                })),
                ..command(
                    "chunk_test_benchmark",
                    "POST",
                    "/chunk-test/benchmark",
                    "Compare chunking methods over a benchmark dataset; queries default to its canned set.",
                )
            },
            command(
                "test_queries",
                "GET",
                "/chunk-test/test-queries?dataset_name=&count=",
                "Example queries for a dataset or 'mixed' (at most 20).",
            ),
            command(
                "chunk_test_progress",
                "GET",
                "/chunk-test/progress/{test_id}",
                "Poll a chunk test until its status is completed or failed.",
            ),
            command(
                "chunk_test_result",
                "GET",
                "/chunk-test/results/{test_id}",
                "Full comparison result of a finished chunk test.",
            ),
            command(
                "chunk_test_results",
                "GET",
                "/chunk-test/results?dataset_name=&limit=",
                "Newest-first summaries of stored chunk-test results.",
            ),
            command(
                "chunk_test_cancel",
                "POST",
                "/chunk-test/{test_id}/cancel",
                "Cancel a running chunk test; it ends failed with cause 'cancelled'.",
            ),
            command(
                "upload_document",
                "POST",
                "/documents?file_name=&method=",
                "Upload raw document bytes and queue them for extraction, chunking, embedding and indexing.",
            ),
            command(
                "get_document",
                "GET",
                "/documents/{id}",
                "Document status, current stage and percent complete.",
            ),
            command(
                "retry_document",
                "POST",
                "/documents/{id}/retry",
                "Re-run the pipeline for a failed or completed document.",
            ),
            command(
                "metrics",
                "GET",
                "/metrics",
                "Ingestion and chunk-test counters.",
            ),
        ],
    })
}

impl ServiceError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ChunkTest(error) => chunk_test_status(error),
            ServiceError::InvalidRequest(_) | ServiceError::Method(_) => StatusCode::BAD_REQUEST,
            ServiceError::UnknownDocument(_) => StatusCode::NOT_FOUND,
            ServiceError::DocumentBusy(_) => StatusCode::CONFLICT,
            ServiceError::Scheduler(error) => scheduler_status(error),
            ServiceError::Dataset(error) => dataset_status(error),
            ServiceError::Embedding(_) | ServiceError::Index(_) | ServiceError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

fn chunk_test_status(error: &ChunkTestError) -> StatusCode {
    match error {
        ChunkTestError::NoDocuments
        | ChunkTestError::NoQueries
        | ChunkTestError::UnusableDocument { .. }
        | ChunkTestError::Method(_) => StatusCode::BAD_REQUEST,
        ChunkTestError::Dataset(error) => dataset_status(error),
        ChunkTestError::UnknownDocument(_) | ChunkTestError::UnknownTest(_) => {
            StatusCode::NOT_FOUND
        }
        ChunkTestError::NotReady(_) | ChunkTestError::AlreadyFinished(_) => StatusCode::CONFLICT,
        ChunkTestError::Scheduler(error) => scheduler_status(error),
        ChunkTestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn dataset_status(error: &DatasetError) -> StatusCode {
    match error {
        DatasetError::UnknownDataset(_) | DatasetError::EmptyCorpus(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn scheduler_status(error: &SchedulerError) -> StatusCode {
    match error {
        SchedulerError::AlreadyActive(_) => StatusCode::CONFLICT,
        SchedulerError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::datasets::BuiltinDatasets;
    use crate::embedding::HashEmbeddingClient;
    use crate::index::InMemoryIndex;
    use crate::jobs::SchedulerSettings;
    use crate::metrics::ServiceMetrics;
    use crate::processing::CleanOptions;
    use crate::service::{AppService, AppSettings};
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app(dir: &tempfile::TempDir) -> Router {
        let service = AppService::assemble(
            Arc::new(HashEmbeddingClient::new(32)),
            Arc::new(InMemoryIndex::new()),
            Arc::new(BuiltinDatasets::new().expect("builtin datasets")),
            AppSettings {
                chunking: crate::chunking::ChunkingSettings {
                    chunk_size: 120,
                    chunk_overlap: 20,
                    semantic_tokens: 30,
                    tokenizer_model: "cl100k_base".into(),
                },
                batch_size: 8,
                top_k: 5,
                clean: CleanOptions::default(),
                scheduler: SchedulerSettings {
                    pool_size: 2,
                    lease_timeout: Duration::from_secs(10),
                    lease_check_interval: Duration::from_millis(100),
                    max_attempts: 1,
                },
                data_dir: dir.path().to_path_buf(),
            },
            Arc::new(ServiceMetrics::new()),
        )
        .await
        .expect("service");
        create_router(Arc::new(service))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    #[tokio::test]
    async fn commands_catalog_lists_chunk_test_endpoints() {
        let commands = get_commands().await.0.commands;
        let benchmark = commands
            .iter()
            .find(|cmd| cmd.name == "chunk_test_benchmark")
            .expect("benchmark command present");
        assert_eq!(benchmark.method, "POST");
        assert_eq!(benchmark.path, "/chunk-test/benchmark");
        assert!(benchmark.request_example.is_some());
        assert!(commands.iter().any(|cmd| cmd.path == "/metrics"));
    }

    #[tokio::test]
    async fn benchmark_submission_with_wait_returns_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/chunk-test/benchmark?wait=true",
            Some(json!({
                "dataset_name": "geo-101",
                "queries": ["capital of France"],
                "modes": ["fixed-size", "semantic"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["progress_percent"], 100);
        assert_eq!(body["methods"], json!(["fixed-size", "semantic"]));
        assert!(body["chunking_comparison"]["fixed-size"]["chunk_count"].as_u64().unwrap() > 0);
        assert!(body["retrieval_comparison"]["semantic"].is_object());

        let id = body["test_id"].as_u64().unwrap();
        let (status, progress) =
            call(&app, Method::GET, &format!("/chunk-test/progress/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(progress["status"], "completed");

        let (status, listed) = call(&app, Method::GET, "/chunk-test/results?dataset_name=geo-101", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["results"][0]["test_id"], id);

        let (status, _) = call(&app, Method::POST, &format!("/chunk-test/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn async_submission_returns_accepted_progress() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/chunk-test/benchmark",
            Some(json!({ "dataset_name": "geo-101", "modes": ["sentence"] })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["progress_percent"], 0);
    }

    #[tokio::test]
    async fn input_errors_map_to_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/chunk-test/benchmark",
            Some(json!({ "dataset_name": "atlantis" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("atlantis"));

        let (status, _) = call(
            &app,
            Method::POST,
            "/chunk-test/user-documents",
            Some(json!({ "document_ids": [], "queries": ["q"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            "/chunk-test/user-documents",
            Some(json!({ "document_ids": [9], "queries": ["q"] })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::GET, "/chunk-test/results/41", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, Method::GET, "/documents/41", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_queries_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        let (status, body) = call(
            &app,
            Method::GET,
            "/chunk-test/test-queries?dataset_name=geo-101&count=2",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["queries"][0], "capital of France");

        let (_, mixed) = call(&app, Method::GET, "/chunk-test/test-queries?count=50", None).await;
        assert_eq!(mixed["dataset"], "mixed");
        assert!(mixed["count"].as_u64().unwrap() <= 20);
    }

    #[tokio::test]
    async fn benchmarks_and_refresh_share_a_shape() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        let (_, listed) = call(&app, Method::GET, "/benchmarks", None).await;
        let (status, refreshed) = call(&app, Method::POST, "/chunk-test/update-datasets", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["benchmarks"], refreshed["benchmarks"]);
        assert!(listed["count"].as_u64().unwrap() >= 5);
    }

    #[tokio::test]
    async fn document_upload_is_accepted_and_pollable() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/documents?file_name=notes.txt&method=paragraph")
                    .body(Body::from("Tides follow the moon.\n\nCurrents carry heat."))
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let document: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(document["chunking_method"], "paragraph");

        let id = document["id"].as_u64().unwrap();
        let (status, polled) = call(&app, Method::GET, &format!("/documents/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polled["file_name"], "notes.txt");

        let (status, _) = call(&app, Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
