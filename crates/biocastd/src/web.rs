//! HTTP surface: upload form, match results, health.
//!
//! - `GET /` — instructions and upload form
//! - `POST /match` — multipart upload (field `image`), renders results or an error
//! - `GET /health` — JSON status

use std::path::Path;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use biocast_core::catalog::has_image_extension;
use biocast_core::types::EMBEDDING_DIM;
use biocast_core::{PipelineError, PresentedMatch, Representative};
use image::ImageFormat;
use tower_http::trace::TraceLayer;

use crate::engine::{EngineError, EngineHandle, MatchOutcome};
use crate::render::{self, RenderedMatch};

/// Shared application state.
pub struct AppState {
    pub engine: EngineHandle,
    pub catalog_size: usize,
}

/// Build the router with all routes.
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/match", post(match_upload))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A single uploaded file.
struct Upload {
    file_name: Option<String>,
    bytes: Vec<u8>,
}

enum UploadError {
    Multipart(MultipartError),
    UnsupportedType(String),
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        Self::Multipart(err)
    }
}

/// GET / - Upload form
async fn index() -> Html<String> {
    Html(render::index_page())
}

/// GET /health - Daemon status
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "catalog_size": state.catalog_size,
        "embedding_dim": EMBEDDING_DIM,
    }))
}

/// POST /match - Run the pipeline on one uploaded image
async fn match_upload(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return Html(render::index_page()).into_response(),
        Err(UploadError::UnsupportedType(name)) => {
            tracing::info!(file = %name, "rejected upload with unsupported type");
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Html(render::failure_page("Unsupported file type. Upload a .jpg, .jpeg or .png image.")),
            )
                .into_response();
        }
        Err(UploadError::Multipart(err)) => {
            tracing::warn!(error = %err, "malformed upload");
            return (err.status(), Html(render::failure_page(render::FAILURE_MESSAGE))).into_response();
        }
    };

    tracing::info!(file = ?upload.file_name, bytes = upload.bytes.len(), "match requested");
    let upload_uri = data_uri(upload_mime(&upload.bytes), &upload.bytes);

    match state.engine.find_matches(upload.bytes).await {
        Ok(MatchOutcome::NoFace) => Html(render::no_face_page(&upload_uri)).into_response(),
        Ok(MatchOutcome::Matches(matches)) => {
            let mut rendered = Vec::with_capacity(matches.len());
            for presented in matches {
                rendered.push(with_photo(presented).await);
            }
            Html(render::results_page(&upload_uri, &rendered)).into_response()
        }
        Err(EngineError::Pipeline(PipelineError::Decode(err))) => {
            tracing::info!(error = %err, "upload could not be decoded");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Html(render::failure_page(render::FAILURE_MESSAGE)),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "match failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(render::failure_page(render::FAILURE_MESSAGE)),
            )
                .into_response()
        }
    }
}

/// Pull the `image` field out of the form. An empty file input counts as no upload;
/// anything that does not sniff as JPEG or PNG is rejected.
async fn read_upload(multipart: &mut Multipart) -> Result<Option<Upload>, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }

        let file_name = field.file_name().map(str::to_owned);
        if let Some(name) = file_name.as_deref().filter(|n| !n.is_empty()) {
            if !has_image_extension(Path::new(name)) {
                return Err(UploadError::UnsupportedType(name.to_string()));
            }
        }

        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        // Content must sniff as JPEG or PNG whatever the file name says.
        if !matches!(image::guess_format(&bytes), Ok(ImageFormat::Jpeg | ImageFormat::Png)) {
            let name = file_name.filter(|n| !n.is_empty()).unwrap_or_else(|| "<unnamed>".into());
            return Err(UploadError::UnsupportedType(name));
        }
        return Ok(Some(Upload {
            file_name,
            bytes: bytes.to_vec(),
        }));
    }
    Ok(None)
}

/// Attach the representative photo as a `data:` URI when there is one.
async fn with_photo(presented: PresentedMatch) -> RenderedMatch {
    let image_uri = match &presented.representative {
        Representative::Image(path) => match tokio::fs::read(path).await {
            Ok(bytes) => Some(data_uri(path_mime(path), &bytes)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "catalog photo unreadable");
                None
            }
        },
        Representative::FolderNotFound | Representative::NoImageAvailable => None,
    };
    RenderedMatch { presented, image_uri }
}

fn upload_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

fn path_mime(path: &Path) -> &'static str {
    ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}
