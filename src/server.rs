//! HTTP API and review progress WebSocket.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/api/contracts?page&size` | Page through contracts, newest first |
//! | `POST`   | `/api/contracts` | Create a contract (multipart, optional `file`) |
//! | `POST`   | `/api/contracts/upload` | Draft contract from one file |
//! | `POST`   | `/api/contracts/batch-upload` | Draft contracts from many files |
//! | `GET`    | `/api/contracts/number/{number}` | Look up by contract number |
//! | `GET`    | `/api/contracts/{id}` | Fetch a contract |
//! | `DELETE` | `/api/contracts/{id}` | Cascade delete |
//! | `PUT`    | `/api/contracts/{id}/status` | `{"status": 2}` |
//! | `GET`    | `/api/contracts/{id}/versions` | List versions |
//! | `POST`   | `/api/contracts/{id}/versions` | Add a version (multipart `file`, `remark`) |
//! | `GET`    | `/api/contracts/{id}/versions/latest` | Latest version |
//! | `GET`    | `/api/contracts/{id}/versions/{number}` | One version |
//! | `GET`    | `/api/contracts/{id}/content?version` | Content record |
//! | `GET`    | `/api/contracts/{id}/export?format&version` | Download txt / html / raw |
//! | `GET`    | `/api/contracts/{id}/compare?base&target` | Side-by-side texts |
//! | `GET`    | `/api/contracts/{id}/file?version` | Original upload |
//! | `POST`   | `/api/contracts/agent/review` | `{"id": 1, "detach": false}` |
//! | `GET`    | `/ws/review/{contract_id}` | Progress WebSocket |
//!
//! # Envelope
//!
//! Every `/api` JSON reply, success or error, has the shape
//!
//! ```json
//! { "code": 200, "message": "success", "data": { ... }, "timestamp": 1760000000000 }
//! ```
//!
//! Errors carry the [`ContractError`] code both in `code` and as the HTTP
//! status. The caller's identity comes from the `x-user-id` header.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        DefaultBodyLimit, Multipart, Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::config::Config;
use crate::contracts::{CreateContract, ExportFormat, FileUpload};
use crate::error::ContractError;
use crate::models::ContractStatus;
use crate::progress::{ProgressEvent, ProgressReporter};

pub const USER_HEADER: &str = "x-user-id";

/// Starts the HTTP server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    let router = router(app);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "contract review server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Builds the router. Exposed for in-process tests.
pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(app.max_upload_bytes);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/contracts",
            get(handle_list_contracts).post(handle_create_contract),
        )
        .route("/api/contracts/upload", post(handle_upload))
        .route("/api/contracts/batch-upload", post(handle_batch_upload))
        .route("/api/contracts/agent/review", post(handle_review))
        .route("/api/contracts/number/{number}", get(handle_get_by_number))
        .route(
            "/api/contracts/{id}",
            get(handle_get_contract).delete(handle_delete_contract),
        )
        .route("/api/contracts/{id}/status", put(handle_update_status))
        .route(
            "/api/contracts/{id}/versions",
            get(handle_list_versions).post(handle_add_version),
        )
        .route("/api/contracts/{id}/versions/latest", get(handle_latest_version))
        .route("/api/contracts/{id}/versions/{number}", get(handle_version))
        .route("/api/contracts/{id}/content", get(handle_content))
        .route("/api/contracts/{id}/export", get(handle_export))
        .route("/api/contracts/{id}/compare", get(handle_compare))
        .route("/api/contracts/{id}/file", get(handle_file))
        .route("/ws/review/{contract_id}", get(handle_review_socket))
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

// ============ Envelope ============

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    timestamp: i64,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        code: 200,
        message: "success".to_string(),
        data: Some(data),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

/// Error reply in the shared envelope.
struct AppError(ContractError);

impl From<ContractError> for AppError {
    fn from(err: ContractError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = Envelope {
            code,
            message: self.0.to_string(),
            data: self.0.data().cloned(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Multipart body split into text fields and file parts.
#[derive(Default)]
struct MultipartForm {
    fields: HashMap<String, String>,
    files: Vec<FileUpload>,
}

impl MultipartForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ContractError> {
        let mut form = MultipartForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ContractError::invalid_input(format!("invalid multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field.bytes().await.map_err(|e| {
                        ContractError::invalid_input(format!("invalid multipart file: {}", e))
                    })?;
                    form.files.push(FileUpload {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
                None => {
                    let text = field.text().await.map_err(|e| {
                        ContractError::invalid_input(format!("invalid multipart field: {}", e))
                    })?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn single_file(mut self) -> Result<(FileUpload, HashMap<String, String>), ContractError> {
        if self.files.len() != 1 {
            return Err(ContractError::invalid_input(format!(
                "expected exactly one file, got {}",
                self.files.len()
            )));
        }
        let file = self.files.remove(0);
        Ok((file, self.fields))
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

// ============ Contracts ============

#[derive(Deserialize)]
struct PageQuery {
    page: Option<i64>,
    size: Option<i64>,
}

async fn handle_list_contracts(
    State(app): State<App>,
    Query(q): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = app
        .contracts
        .list_contracts(q.page.unwrap_or(1), q.size.unwrap_or(20))
        .await?;
    Ok(ok(page))
}

async fn handle_create_contract(
    State(app): State<App>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut form = MultipartForm::read(multipart).await?;
    if form.files.len() > 1 {
        return Err(ContractError::invalid_input("at most one initial file is accepted").into());
    }
    let request = CreateContract {
        contract_number: form.text("contract_number").unwrap_or_default(),
        contract_name: form.text("contract_name").unwrap_or_default(),
        category: form.text("category"),
        department: form.text("department"),
        remark: form.text("remark"),
        file: form.files.pop(),
    };
    let created = app
        .contracts
        .create_contract(request, user_id(&headers).as_deref())
        .await?;
    Ok(ok(created))
}

async fn handle_upload(
    State(app): State<App>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (file, fields) = MultipartForm::read(multipart).await?.single_file()?;
    let created = app
        .contracts
        .upload_contract(
            &file,
            fields.get("category").map(String::as_str),
            fields.get("department").map(String::as_str),
            user_id(&headers).as_deref(),
        )
        .await?;
    Ok(ok(created))
}

async fn handle_batch_upload(
    State(app): State<App>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = MultipartForm::read(multipart).await?;
    let outcome = app
        .contracts
        .batch_upload(
            &form.files,
            form.text("category").as_deref(),
            form.text("department").as_deref(),
            user_id(&headers).as_deref(),
        )
        .await?;
    Ok(ok(outcome))
}

async fn handle_get_contract(
    State(app): State<App>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(app.contracts.get_contract(id).await?))
}

async fn handle_get_by_number(
    State(app): State<App>,
    Path(number): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(app.contracts.get_by_number(&number).await?))
}

async fn handle_delete_contract(
    State(app): State<App>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let removed = app.contracts.delete_contract(id).await?;
    Ok(ok(serde_json::json!({ "id": id, "versions_removed": removed })))
}

#[derive(Deserialize)]
struct StatusBody {
    status: ContractStatus,
}

async fn handle_update_status(
    State(app): State<App>,
    Path(id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(app.contracts.update_status(id, body.status).await?))
}

// ============ Versions and content ============

#[derive(Deserialize)]
struct VersionQuery {
    version: Option<i64>,
}

async fn handle_list_versions(
    State(app): State<App>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(app.contracts.list_versions(id).await?))
}

async fn handle_add_version(
    State(app): State<App>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (file, fields) = MultipartForm::read(multipart).await?.single_file()?;
    let remark = fields.get("remark").map(|s| s.trim()).filter(|s| !s.is_empty());
    let version = app
        .contracts
        .add_version(id, &file, remark, user_id(&headers).as_deref())
        .await?;
    Ok(ok(version))
}

async fn handle_latest_version(
    State(app): State<App>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(app.contracts.version(id, None).await?))
}

async fn handle_version(
    State(app): State<App>,
    Path((id, number)): Path<(i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(app.contracts.version(id, Some(number)).await?))
}

async fn handle_content(
    State(app): State<App>,
    Path(id): Path<i64>,
    Query(q): Query<VersionQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(app.contracts.content(id, q.version).await?))
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
    version: Option<i64>,
}

async fn handle_export(
    State(app): State<App>,
    Path(id): Path<i64>,
    Query(q): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format: ExportFormat = q.format.as_deref().unwrap_or("txt").parse()?;
    let export = app.contracts.export(id, q.version, format).await?;
    Ok(attachment(export.media_type, &export.file_name, export.bytes))
}

#[derive(Deserialize)]
struct CompareQuery {
    base: i64,
    target: i64,
}

async fn handle_compare(
    State(app): State<App>,
    Path(id): Path<i64>,
    Query(q): Query<CompareQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(app.contracts.compare(id, q.base, q.target).await?))
}

async fn handle_file(
    State(app): State<App>,
    Path(id): Path<i64>,
    Query(q): Query<VersionQuery>,
) -> ApiResult<Response> {
    let (version, bytes) = app.contracts.fetch_file(id, q.version).await?;
    let media_type = version
        .media_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    Ok(attachment(media_type, &version.file_name, bytes))
}

fn attachment(media_type: &str, file_name: &str, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', "_"));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, media_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

// ============ Review ============

#[derive(Deserialize)]
struct ReviewRequest {
    id: i64,
    #[serde(default)]
    detach: bool,
}

/// Runs a review. With `detach`, the run continues on a background task and
/// its outcome is only visible on the progress channel.
async fn handle_review(
    State(app): State<App>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Response> {
    if req.detach {
        app.contracts.get_contract(req.id).await?;
        let progress: std::sync::Arc<dyn ProgressReporter> = app.progress.clone();
        let _handle = app.pipeline.clone().spawn(req.id, progress);
        tracing::info!(contract_id = req.id, "review started in background");
        let body = ok(serde_json::json!({ "contract_id": req.id, "detached": true }));
        return Ok((StatusCode::ACCEPTED, body).into_response());
    }

    let outcome = app.pipeline.review(req.id, app.progress.as_ref()).await?;
    Ok(ok(outcome).into_response())
}

async fn handle_review_socket(
    ws: WebSocketUpgrade,
    State(app): State<App>,
    Path(contract_id): Path<i64>,
) -> Response {
    tracing::info!(contract_id, "progress socket requested");
    ws.on_upgrade(move |socket| handle_socket(socket, app, contract_id))
}

async fn handle_socket(socket: WebSocket, app: App, contract_id: i64) {
    let mut subscription = app.progress.subscribe(contract_id);
    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = send_event(&mut sender, &ProgressEvent::connected(contract_id)).await {
        tracing::warn!(contract_id, error = %e, "failed to send connected event");
        app.progress.unsubscribe(contract_id, subscription.id);
        return;
    }

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => {
                    tracing::debug!(contract_id, text = %text.as_str(), "client message ignored");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(contract_id, error = %e, "progress socket receive error");
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            event = subscription.events.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = send_event(&mut sender, &event).await {
                            tracing::debug!(contract_id, error = %e, "progress socket send failed");
                            break;
                        }
                    }
                    // Replaced by a newer subscriber.
                    None => break,
                }
            }
            _ = &mut recv_task => break,
        }
    }

    recv_task.abort();
    app.progress.unsubscribe(contract_id, subscription.id);
    tracing::info!(contract_id, "progress socket closed");
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ProgressEvent,
) -> Result<(), axum::Error> {
    sender.send(Message::Text(event.to_json().into())).await
}
