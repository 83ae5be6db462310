use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Request, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    serve, Form, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::Deserialize;
use thiserror::Error;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app_state::{ttl_from_mins, SessionStore, SharedSession};
use crate::catalog::{ModelId, UnknownModel, MODELS};
use crate::constants::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PORT, DEFAULT_SESSION_TTL_MINS};
use crate::document::{Document, DocumentError};
use crate::llm_interaction::{ChatBackend, GroqError, GroqSettings};
use crate::prompt::NOT_FOUND_REPLY;
use crate::session::{Session, SessionError};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
    /// Watch the templates directory and reload on change.
    pub autoreload: bool,
    pub max_upload_bytes: usize,
    pub session_ttl: Duration,
    pub groq: GroqSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: DEFAULT_PORT,
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
            autoreload: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            session_ttl: ttl_from_mins(DEFAULT_SESSION_TTL_MINS),
            groq: GroqSettings::default(),
        }
    }
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    sessions: Arc<SessionStore>,
    // Built from the server-wide key; None when the process has no key.
    backend: Option<Arc<dyn ChatBackend>>,
    groq: GroqSettings,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(config: &ServerConfig, backend: Option<Arc<dyn ChatBackend>>) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(
                config.templates_dir.clone(),
                config.autoreload,
            )),
            sessions: Arc::new(SessionStore::new(config.session_ttl)),
            backend,
            groq: config.groq.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    async fn new_session(&self) -> Uuid {
        self.sessions.insert(Session::new(self.backend.clone())).await
    }

    async fn session(&self, id: &Uuid) -> Result<SharedSession, ApiError> {
        self.sessions.get(id).await.ok_or(ApiError::SessionNotFound)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session not found")]
    SessionNotFound,
    #[error("invalid upload: {0}")]
    Upload(String),
    #[error("upload too large: {0}")]
    UploadTooLarge(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Groq(#[from] GroqError),
    #[error(transparent)]
    UnknownModel(#[from] UnknownModel),
    #[error("failed to render page: {0}")]
    Template(#[from] minijinja::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound => StatusCode::NOT_FOUND,
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Document(DocumentError::UnsupportedType { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ApiError::Document(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Session(SessionError::EmptyQuestion) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Session(SessionError::NoDocument) => StatusCode::CONFLICT,
            ApiError::Session(SessionError::Groq(e)) | ApiError::Groq(e) => groq_status(e),
            ApiError::UnknownModel(_) => StatusCode::BAD_REQUEST,
            ApiError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn groq_status(error: &GroqError) -> StatusCode {
    match error {
        GroqError::MissingApiKey => StatusCode::UNAUTHORIZED,
        GroqError::InvalidApiKey => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, "Request failed");
        } else {
            warn!(%status, error = %self, "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: PathBuf, autoreload: bool) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(templates_dir.clone()));
        if autoreload {
            notifier.watch_path(&templates_dir, true);
        }
        Ok(env)
    })
}

fn render_page(state: &AppState, context: minijinja::Value) -> Result<Html<String>, ApiError> {
    let env = state.templates.acquire_env()?;
    let template = env.get_template("index.html")?;
    Ok(Html(template.render(context)?))
}

fn session_url(id: &Uuid) -> String {
    format!("/s/{}", id)
}

fn upload_error(error: MultipartError) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::UploadTooLarge(error.body_text())
    } else {
        ApiError::Upload(error.body_text())
    }
}

/// Pulls the `file` field out of a multipart upload and builds a document.
async fn read_upload(multipart: &mut Multipart) -> Result<Document, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(upload_error)?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        if name.is_empty() {
            return Err(ApiError::Upload("choose a TXT or CSV file to upload".to_string()));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(upload_error)?;
        return Ok(Document::from_upload(&name, content_type.as_deref(), &bytes)?);
    }
    Err(ApiError::Upload("missing 'file' field".to_string()))
}

fn parse_model(model: Option<&str>) -> Result<Option<ModelId>, UnknownModel> {
    match model.map(str::trim) {
        None | Some("") => Ok(None),
        Some(id) => id.parse().map(Some),
    }
}

// --- HTML pages ---

async fn index_handler(State(state): State<AppState>) -> Redirect {
    let id = state.new_session().await;
    Redirect::to(&session_url(&id))
}

async fn page_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    // Expired or unknown sessions start over rather than erroring.
    let Some(session) = state.sessions.get(&id).await else {
        return Ok(Redirect::to("/").into_response());
    };

    let view = {
        let mut session = session.lock().await;
        let view = session.view();
        session.dismiss_error();
        view
    };

    let context = minijinja::context! {
        title => "File-Based Q&A Assistant",
        session_id => id.to_string(),
        view => view,
        not_found_reply => NOT_FOUND_REPLY,
        max_upload_mb => state.max_upload_bytes / (1024 * 1024),
    };
    Ok(render_page(&state, context)?.into_response())
}

async fn upload_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Redirect, ApiError> {
    let session = state.session(&id).await?;
    let upload = read_upload(&mut multipart).await;

    let mut session = session.lock().await;
    match upload {
        Ok(document) => session.load_document(document),
        Err(e) => {
            warn!(%id, error = %e, "Upload rejected");
            session.record_error(e.to_string());
        }
    }
    Ok(Redirect::to(&session_url(&id)))
}

#[derive(Debug, Deserialize)]
struct AskForm {
    question: String,
    model: Option<String>,
}

async fn ask_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<AskForm>,
) -> Result<Redirect, ApiError> {
    let session = state.session(&id).await?;
    match parse_model(form.model.as_deref()) {
        // Failures are recorded on the session and shown on the next render.
        Ok(model) => {
            let _ = session.ask(&form.question, model).await;
        }
        Err(e) => session.lock().await.record_error(e.to_string()),
    }
    Ok(Redirect::to(&session_url(&id)))
}

#[derive(Debug, Deserialize)]
struct ModelForm {
    model: String,
}

async fn model_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<ModelForm>,
) -> Result<Redirect, ApiError> {
    let session = state.session(&id).await?;
    let mut session = session.lock().await;
    match form.model.parse::<ModelId>() {
        Ok(model) => session.select_model(model),
        Err(e) => session.record_error(e.to_string()),
    }
    Ok(Redirect::to(&session_url(&id)))
}

#[derive(Deserialize)]
struct ApiKeyForm {
    api_key: String,
}

async fn api_key_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Form(form): Form<ApiKeyForm>,
) -> Result<Redirect, ApiError> {
    let session = state.session(&id).await?;
    let mut session = session.lock().await;
    match session.use_api_key(&form.api_key, &state.groq) {
        Ok(()) => info!(%id, "Session switched to its own API key"),
        Err(e) => session.record_error(e.to_string()),
    }
    Ok(Redirect::to(&session_url(&id)))
}

async fn clear_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Redirect, ApiError> {
    let session = state.session(&id).await?;
    session.lock().await.clear_history();
    Ok(Redirect::to(&session_url(&id)))
}

// --- JSON API ---

async fn list_models_handler() -> impl IntoResponse {
    Json(MODELS)
}

async fn create_session_handler(State(state): State<AppState>) -> impl IntoResponse {
    let id = state.new_session().await;
    (StatusCode::CREATED, Json(serde_json::json!({ "id": id })))
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session(&id).await?;
    let view = session.lock().await.view();
    Ok(Json(view))
}

async fn upload_document_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session(&id).await?;
    let document = read_upload(&mut multipart).await?;
    let info = document.info();
    session.lock().await.load_document(document);
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
struct QuestionBody {
    question: String,
    model: Option<String>,
}

async fn ask_question_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<QuestionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.session(&id).await?;
    let model = parse_model(body.model.as_deref())?;
    let turn = session.ask(&body.question, model).await?;
    Ok(Json(turn))
}

pub fn build_router(state: AppState, static_dir: PathBuf) -> Router {
    // Serve static files from the configured directory
    let static_files_service = ServeDir::new(static_dir).not_found_service(
        tower::service_fn(|_req: Request| async {
            Ok::<_, std::convert::Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
        }),
    );

    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/", get(index_handler))
        .route("/s/:id", get(page_handler))
        .route("/s/:id/upload", post(upload_handler))
        .route("/s/:id/ask", post(ask_handler))
        .route("/s/:id/model", post(model_handler))
        .route("/s/:id/api-key", post(api_key_handler))
        .route("/s/:id/clear", post(clear_handler))
        .route("/api/models", get(list_models_handler))
        .route("/api/sessions", post(create_session_handler))
        .route("/api/sessions/:id", get(get_session_handler))
        .route("/api/sessions/:id/document", post(upload_document_handler))
        .route("/api/sessions/:id/questions", post(ask_question_handler))
        .nest_service("/static", static_files_service)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

/// Builds the full application for the given configuration.
pub fn app(config: &ServerConfig, backend: Option<Arc<dyn ChatBackend>>) -> Router {
    let state = AppState::new(config, backend);
    build_router(state, config.static_dir.clone())
}

pub async fn start_web_server(
    config: ServerConfig,
    backend: Option<Arc<dyn ChatBackend>>,
) -> Result<()> {
    if backend.is_none() {
        warn!("No server-wide Groq API key; users must enter their own key in the UI");
    }

    let app = app(&config, backend);
    let addr = SocketAddr::new(config.host, config.port);
    info!("Web server listening on http://{}", addr);

    // Bind using tokio::net::TcpListener
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
