//! HTTP surface.
//!
//! - `POST /ingest` – rebuild the index from the corpus (admin credential). Development runs
//!   inline and returns `{ "status": "success", "chunks_processed": n }`; production accepts a
//!   background job and returns `{ "job_id": "...", "status": "started" }`.
//! - `GET /ingest/:job_id` – poll a background job (admin credential, production only).
//! - `POST /query` – answer `{ "question": "...", "k": 4 }` with citations (caller credential,
//!   rate limited in production).
//! - `GET /health` – `{ "status": "ok", "index_loaded": bool }`.
//!
//! Every error renders as `{ "detail": "<message>" }`.

use crate::auth::ADMIN_KEY_HEADER;
use crate::context::ServingContext;
use crate::error::ServiceError;
use crate::health::HealthStatus;
use crate::ingestion::IngestJob;
use crate::query::QueryAnswer;
use crate::rate_limit::{API_KEY_HEADER, identity_key};
use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

type SharedContext = Arc<ServingContext>;

/// Build the router over a shared serving context.
pub fn create_router(context: SharedContext) -> Router {
    let admin = Router::new()
        .route("/ingest", post(ingest))
        .route("/ingest/:job_id", get(ingest_status))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&context),
            require_admin,
        ));

    let caller = Router::new()
        .route("/query", post(query))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&context),
            require_caller,
        ));

    Router::new()
        .merge(admin)
        .merge(caller)
        .route("/health", get(health))
        .layer(cors_layer(&context))
        .with_state(context)
}

fn cors_layer(context: &ServingContext) -> CorsLayer {
    if !context.config.environment.is_production() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = context
        .config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        tracing::info!("No CORS origins configured; cross-origin requests will be refused");
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static(API_KEY_HEADER),
            HeaderName::from_static(ADMIN_KEY_HEADER),
        ])
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn require_admin(
    State(context): State<SharedContext>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    context
        .auth
        .check_admin_credential(header_str(request.headers(), ADMIN_KEY_HEADER))?;
    Ok(next.run(request).await)
}

async fn require_caller(
    State(context): State<SharedContext>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    context
        .auth
        .check_query_credential(header_str(request.headers(), API_KEY_HEADER))?;

    if context.config.environment.is_production() {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        context
            .limiter
            .check(&identity_key(request.headers(), peer))?;
    }

    Ok(next.run(request).await)
}

/// Body of a completed synchronous ingestion.
#[derive(Serialize)]
struct IngestCompleted {
    status: &'static str,
    chunks_processed: usize,
}

/// Body of an accepted background ingestion.
#[derive(Serialize)]
struct IngestStarted {
    job_id: Uuid,
    status: &'static str,
}

async fn ingest(State(context): State<SharedContext>) -> Result<Response, ServiceError> {
    if context.config.environment.is_production() {
        let job_id = context.ingestion.start();
        return Ok(Json(IngestStarted {
            job_id,
            status: "started",
        })
        .into_response());
    }

    let chunks_processed = context.ingestion.run_sync().await?;
    tracing::info!(chunks_processed, "Ingest request completed");
    Ok(Json(IngestCompleted {
        status: "success",
        chunks_processed,
    })
    .into_response())
}

async fn ingest_status(
    State(context): State<SharedContext>,
    Path(job_id): Path<String>,
) -> Result<Json<IngestJob>, ServiceError> {
    if !context.config.environment.is_production() {
        return Err(ServiceError::NotFound(
            "Job tracking is only available in production mode".into(),
        ));
    }
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| ServiceError::NotFound(format!("Ingestion job {job_id} not found")))?;
    context.ingestion.status(job_id).map(Json)
}

/// Body of `POST /query`.
#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn query(
    State(context): State<SharedContext>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryAnswer>, ServiceError> {
    let Json(request) = payload.map_err(|rejection| ServiceError::Validation(rejection.body_text()))?;
    let answer = context.query.answer(&request.question, request.k).await?;
    Ok(Json(answer))
}

async fn health(State(context): State<SharedContext>) -> Json<HealthStatus> {
    Json(context.health.status())
}

impl ServiceError {
    /// HTTP status this error renders with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotReady => StatusCode::BAD_REQUEST,
            Self::SourceNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ConfigMismatch(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            Self::Internal(message) => {
                tracing::error!(error = %message, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EmbeddingProvider, Environment};
    use crate::document::{Chunk, ChunkMetadata};
    use crate::embedding::HashedEmbeddingClient;
    use crate::generation::{AnswerGenerator, GenerationClientError, GenerationRequest};
    use crate::index::{Collaborators, EmbeddingIdentity, GenerationSettings, VectorIndex};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use std::fs;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    struct StubGenerator;

    #[async_trait]
    impl AnswerGenerator for StubGenerator {
        async fn generate(&self, _: GenerationRequest) -> Result<String, GenerationClientError> {
            Ok("Revenue was $1M.".into())
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            embedder: Arc::new(HashedEmbeddingClient::new(16)),
            generator: Arc::new(StubGenerator),
            generation: GenerationSettings {
                model: "stub".into(),
                temperature: 0.0,
                context_k: 4,
            },
        }
    }

    fn config(environment: Environment, root: &std::path::Path) -> Config {
        Config {
            environment,
            embedding_provider: EmbeddingProvider::Local,
            embedding_model: "hashed".into(),
            embedding_dimension: 16,
            docs_path: root.join("docs"),
            index_root: root.join("index"),
            rate_limit_per_minute: 2,
            api_key: "query-secret".into(),
            admin_api_key: "admin-secret".into(),
            ..Config::default()
        }
    }

    fn context(environment: Environment, root: &std::path::Path) -> SharedContext {
        Arc::new(ServingContext::new(config(environment, root), collaborators()))
    }

    fn publish(context: &ServingContext, chunks: usize) {
        let chunks: Vec<Chunk> = (0..chunks)
            .map(|i| Chunk {
                text: format!("Quarter {i} revenue"),
                metadata: ChunkMetadata {
                    source: "report.pdf".into(),
                    chunk_id: format!("report.pdf_{i}"),
                    page: Some(i as u32),
                    section: None,
                },
            })
            .collect();
        let vectors = chunks.iter().map(|_| vec![1.0; 16]).collect();
        let index = VectorIndex::build(chunks, vectors).expect("index");
        context.index.replace(Arc::new(collaborators().snapshot(
            EmbeddingIdentity {
                provider: EmbeddingProvider::Local,
                model: "hashed".into(),
            },
            index,
            OffsetDateTime::now_utc(),
        )));
    }

    async fn send(
        context: &SharedContext,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = create_router(Arc::clone(context))
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_index_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Local, dir.path());

        let (status, body) = send(&context, Method::GET, "/health", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "index_loaded": false }));

        publish(&context, 1);
        let (_, body) = send(&context, Method::GET, "/health", &[], None).await;
        assert_eq!(body["index_loaded"], true);
    }

    #[tokio::test]
    async fn query_before_ingestion_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Local, dir.path());
        let (status, body) = send(
            &context,
            Method::POST,
            "/query",
            &[],
            Some(json!({ "question": "What was revenue?" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "No index loaded. Call /ingest first");
    }

    #[tokio::test]
    async fn query_returns_k_citations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Local, dir.path());
        publish(&context, 5);

        let (status, body) = send(
            &context,
            Method::POST,
            "/query",
            &[],
            Some(json!({ "question": "What was revenue?", "k": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "Revenue was $1M.");
        let citations = body["citations"].as_array().expect("citations");
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0]["source"], "report.pdf");
        assert!(citations[0]["chunk_id"].is_string());
        assert!(citations[0]["snippet"].is_string());
    }

    #[tokio::test]
    async fn malformed_query_body_is_unprocessable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Local, dir.path());
        let (status, body) = send(
            &context,
            Method::POST,
            "/query",
            &[],
            Some(json!({ "k": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn production_ingest_requires_admin_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Production, dir.path());

        let (status, body) = send(&context, Method::POST, "/ingest", &[], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Missing X-Admin-Key header");

        let (status, body) = send(
            &context,
            Method::POST,
            "/ingest",
            &[("x-admin-key", "wrong")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Invalid Admin key");
    }

    #[tokio::test]
    async fn production_query_requires_api_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Production, dir.path());
        let question = json!({ "question": "What was revenue?" });

        let (status, _) = send(&context, Method::POST, "/query", &[], Some(question.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &context,
            Method::POST,
            "/query",
            &[("x-api-key", "nope")],
            Some(question),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Invalid API key");
    }

    #[tokio::test]
    async fn production_query_is_rate_limited_per_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Production, dir.path());
        publish(&context, 1);
        let question = json!({ "question": "What was revenue?" });
        let headers = [("x-api-key", "query-secret")];

        for _ in 0..2 {
            let (status, _) = send(&context, Method::POST, "/query", &headers, Some(question.clone())).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = send(&context, Method::POST, "/query", &headers, Some(question)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body["detail"],
            "Rate limit exceeded. Max 2 requests/minute. Try again shortly."
        );
    }

    #[tokio::test]
    async fn local_queries_are_not_rate_limited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Local, dir.path());
        publish(&context, 1);
        for _ in 0..5 {
            let (status, _) = send(
                &context,
                Method::POST,
                "/query",
                &[],
                Some(json!({ "question": "What was revenue?" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn local_ingest_runs_inline() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("docs")).expect("mkdir");
        fs::write(dir.path().join("docs").join("q1.txt"), "Revenue was $1M.").expect("write");
        let context = context(Environment::Local, dir.path());

        let (status, body) = send(&context, Method::POST, "/ingest", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "success", "chunks_processed": 1 }));
        assert!(context.health.status().index_loaded);
    }

    #[tokio::test]
    async fn local_ingest_without_corpus_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Local, dir.path());
        let (status, body) = send(&context, Method::POST, "/ingest", &[], None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(
            body["detail"]
                .as_str()
                .is_some_and(|detail| detail.starts_with("Data directory not found"))
        );
    }

    #[tokio::test]
    async fn job_status_is_not_found_in_local_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = context(Environment::Local, dir.path());
        let uri = format!("/ingest/{}", Uuid::new_v4());
        let (status, _) = send(&context, Method::GET, &uri, &[], None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn production_ingest_is_tracked_as_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("docs")).expect("mkdir");
        fs::write(dir.path().join("docs").join("q1.txt"), "Revenue was $1M.").expect("write");
        let context = context(Environment::Production, dir.path());
        let admin = [("x-admin-key", "admin-secret")];

        let (status, body) = send(&context, Method::POST, "/ingest", &admin, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "started");
        let job_id = body["job_id"].as_str().expect("job id").to_string();

        let uri = format!("/ingest/{job_id}");
        let mut last = serde_json::Value::Null;
        for _ in 0..200 {
            let (status, body) = send(&context, Method::GET, &uri, &admin, None).await;
            assert_eq!(status, StatusCode::OK);
            last = body;
            if last["status"] == "completed" || last["status"] == "failed" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], "completed");
        assert_eq!(last["chunks_processed"], 1);
        assert_eq!(last["job_id"], job_id.as_str());
        assert!(last["completed_at"].is_string());

        let (status, _) = send(
            &context,
            Method::GET,
            &format!("/ingest/{}", Uuid::new_v4()),
            &admin,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_hide_details() {
        let response = ServiceError::internal("db password leaked").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ServiceError::ConfigMismatch("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ServiceError::NotReady.status_code(), StatusCode::BAD_REQUEST);
    }
}
