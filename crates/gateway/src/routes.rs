use crate::state::AppState;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use classifier::{ClassifyError, InferenceBackend};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const INDEX_HTML: &str = include_str!("index.html");
const IMAGE_FIELD: &str = "image";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub label: String,
    pub class_index: usize,
    pub confidence: f32,
    /// The label rendered in the configured output format
    pub text: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Classify(ClassifyError),
}

impl From<ClassifyError> for ApiError {
    fn from(e: ClassifyError) -> Self {
        ApiError::Classify(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Classify(e @ ClassifyError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ApiError::Classify(ClassifyError::Timeout(_)) => (
                StatusCode::GATEWAY_TIMEOUT,
                "inference timed out".to_string(),
            ),
            ApiError::Classify(e) => {
                tracing::error!(error = %e, "Classification failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "inference failed".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

pub fn router<B>(state: AppState<B>, body_limit_bytes: usize) -> Router
where
    B: InferenceBackend + Send + 'static,
{
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/classify", post(classify_form::<B>))
        .route("/api/classify", post(classify_raw::<B>))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> &'static str {
    "ok"
}

/// Upload-form endpoint: multipart `image` field in, formatted text out.
async fn classify_form<B>(
    State(state): State<AppState<B>>,
    mut multipart: Multipart,
) -> Result<String, ApiError>
where
    B: InferenceBackend + Send + 'static,
{
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;

        let prediction = state.classify(bytes.to_vec()).await?;
        return Ok(prediction.format(state.output_format()));
    }

    Err(ApiError::BadRequest(format!(
        "missing `{}` field",
        IMAGE_FIELD
    )))
}

/// API endpoint: raw image bytes in, JSON prediction out.
async fn classify_raw<B>(
    State(state): State<AppState<B>>,
    body: Bytes,
) -> Result<Json<ClassifyResponse>, ApiError>
where
    B: InferenceBackend + Send + 'static,
{
    let prediction = state.classify(body.to_vec()).await?;
    let text = prediction.format(state.output_format());

    Ok(Json(ClassifyResponse {
        label: prediction.label,
        class_index: prediction.class_index,
        confidence: prediction.confidence,
        text,
    }))
}
