use crate::config::Pipeline;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use recflow_core::message::{
    ContextReply, ForwardRequest, IndexerReply, InvertedRequest, ItemReply, RecRequest,
};
use recflow_core::status::ErrorBody;
use recflow_core::{HashIndex, ScopeId, Status};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// A failed stage call, answered with its [`ErrorBody`].
pub struct ApiError(pub Status);

impl From<Status> for ApiError {
    fn from(status: Status) -> Self {
        ApiError(status)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match self.0 {
            Status::Cancelled(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Status::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
        };
        (code, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(pipeline: Pipeline) -> Router {
    let state = AppState { pipeline: Arc::new(pipeline) };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/indexer/:name/forward", post(forward_handler))
        .route("/indexer/:name/inverted", post(inverted_handler))
        .route("/context/:scope", post(context_handler))
        .route("/retrieval/:retrieval_id", post(retrieval_handler))
        .route("/recommend", post(recommend_handler))
        .fallback(|| async { ApiError(Status::unimplemented("no such route")) })
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn indexer(state: &AppState, name: &str) -> Result<Arc<HashIndex>, ApiError> {
    state
        .pipeline
        .indexers
        .get(name)
        .cloned()
        .ok_or_else(|| ApiError(Status::unimplemented(format!("no indexer named {name:?}"))))
}

pub async fn forward_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ForwardRequest>,
) -> ApiResult<IndexerReply> {
    Ok(Json(indexer(&state, &name)?.forward(&req)?))
}

pub async fn inverted_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<InvertedRequest>,
) -> ApiResult<IndexerReply> {
    Ok(Json(indexer(&state, &name)?.inverted(&req)?))
}

pub async fn context_handler(
    State(state): State<AppState>,
    Path(scope): Path<ScopeId>,
    Json(req): Json<RecRequest>,
) -> ApiResult<ContextReply> {
    let server = state
        .pipeline
        .contexts
        .get(&scope)
        .ok_or_else(|| ApiError(Status::unimplemented(format!("no context at scope {scope}"))))?;
    Ok(Json(server.context(&req).await?))
}

pub async fn retrieval_handler(
    State(state): State<AppState>,
    Path(retrieval_id): Path<i32>,
    Json(req): Json<RecRequest>,
) -> ApiResult<ItemReply> {
    let server = state
        .pipeline
        .retrievals
        .get(&retrieval_id)
        .ok_or_else(|| ApiError(Status::unimplemented(format!("no retrieval {retrieval_id}"))))?;
    Ok(Json(server.retrieval(&req).await?))
}

pub async fn recommend_handler(
    State(state): State<AppState>,
    Json(req): Json<RecRequest>,
) -> ApiResult<ItemReply> {
    let server = state
        .pipeline
        .recommender
        .as_ref()
        .ok_or_else(|| ApiError(Status::unimplemented("recommend is not served here")))?;
    Ok(Json(server.recommend(&req).await?))
}
