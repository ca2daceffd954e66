//! HTTP API over the document service, the QA pipeline and the
//! conversation store.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/documents` | List ingested documents, newest first |
//! | `POST`   | `/documents?filename=<name>` | Ingest the raw request body as `<name>` |
//! | `DELETE` | `/documents/{id}` | Delete a document and its chunks |
//! | `POST`   | `/ask` | Answer a question, optionally inside a conversation |
//! | `GET`    | `/conversations` | List conversations, most recent first |
//! | `POST`   | `/conversations` | Create a conversation |
//! | `GET`    | `/conversations/{id}/messages` | Transcript of one conversation |
//! | `DELETE` | `/conversations/{id}` | Delete a conversation and its messages |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_input", "message": "La requête est vide." } }
//! ```
//!
//! Error codes: `bad_request` (400), `invalid_input` (400), `not_found` (404),
//! `configuration_error` (500), `generation_failure` (502), `internal` (500).

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::app::{App, ChatTurn};
use crate::config::Config;
use crate::error::QaError;
use crate::models::{Conversation, DocumentRecord, Message};

#[derive(Clone)]
struct AppState {
    app: Arc<App>,
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = Arc::new(App::open(config).await?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    println!("gqa server listening on http://{}", bind_addr);

    axum::serve(listener, router(app)).await?;
    Ok(())
}

/// The full route table over `app`.
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", get(handle_list_documents).post(handle_upload))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/ask", post(handle_ask))
        .route(
            "/conversations",
            get(handle_list_conversations).post(handle_create_conversation),
        )
        .route("/conversations/{id}", delete(handle_delete_conversation))
        .route("/conversations/{id}/messages", get(handle_messages))
        .layer(cors)
        .with_state(AppState { app })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

impl From<QaError> for AppError {
    fn from(err: QaError) -> Self {
        let status = match &err {
            QaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            QaError::Generation(_) => StatusCode::BAD_GATEWAY,
            QaError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.user_message(),
        }
    }
}

/// Ingestion rejects bad names and extensions with plain `anyhow` errors.
fn classify_ingest_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("Unsupported file extension") || msg.contains("Invalid file name") {
        bad_request(msg)
    } else {
        internal(err)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentRecord>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let documents = state
        .app
        .documents()
        .list_documents()
        .await
        .map_err(internal)?;
    Ok(Json(DocumentListResponse { documents }))
}

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    document: DocumentRecord,
    chunks: usize,
}

async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let filename = params
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| bad_request("filename query parameter is required"))?;
    if body.is_empty() {
        return Err(bad_request("request body must not be empty"));
    }

    let (document, chunks) = state
        .app
        .documents()
        .ingest(&filename, &body)
        .await
        .map_err(classify_ingest_error)?;
    Ok((StatusCode::CREATED, Json(UploadResponse { document, chunks })))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state
        .app
        .documents()
        .delete_document(&id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(not_found(format!("document not found: {}", id)));
    }
    Ok(Json(DeleteResponse { deleted }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    conversation_id: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<ChatTurn>, AppError> {
    let turn = state
        .app
        .respond(req.conversation_id.as_deref(), &req.question, req.top_k)
        .await?;
    Ok(Json(turn))
}

// ============ /conversations ============

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<Conversation>,
}

async fn handle_list_conversations(
    State(state): State<AppState>,
) -> Result<Json<ConversationListResponse>, AppError> {
    let conversations = state.app.conversations().list().await.map_err(internal)?;
    Ok(Json(ConversationListResponse { conversations }))
}

#[derive(Deserialize, Default)]
struct CreateConversationRequest {
    #[serde(default)]
    title: Option<String>,
}

async fn handle_create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), AppError> {
    let conversation = state
        .app
        .conversations()
        .create(req.title.as_deref())
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

#[derive(Serialize)]
struct MessagesResponse {
    conversation: Conversation,
    messages: Vec<Message>,
}

async fn handle_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, AppError> {
    let store = state.app.conversations();
    let conversation = store
        .get(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("conversation not found: {}", id)))?;
    let messages = store.list_messages(&id).await.map_err(internal)?;
    Ok(Json(MessagesResponse {
        conversation,
        messages,
    }))
}

async fn handle_delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state
        .app
        .conversations()
        .delete(&id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(not_found(format!("conversation not found: {}", id)));
    }
    Ok(Json(DeleteResponse { deleted }))
}
