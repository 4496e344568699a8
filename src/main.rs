// HTTP entry point for the image text translation service.

use retext::{
    core::{types::OcrItem, Config, PipelineError},
    HttpTranslator, ImageTranslator, Metrics, TextLayoutEngine, TranslateImageRequest, Translator,
};

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose, Engine};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    translator: Arc<ImageTranslator>,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::new()?);

    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::new(format!(
        "retext={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let metrics = Metrics::new();

    let layout_engine = Arc::new(TextLayoutEngine::new(config.fonts_dir()));
    let backend: Arc<dyn Translator> = Arc::new(HttpTranslator::new(
        &config.translator,
        Some(metrics.clone()),
    )?);
    let translator = Arc::new(ImageTranslator::new(
        config.clone(),
        backend,
        layout_engine,
        Some(metrics.clone()),
    ));

    let state = AppState {
        translator,
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/translate", post(translate))
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("Server starting on http://{}", addr);
    info!("  GET  /health    - Health check");
    info!("  GET  /metrics   - Prometheus metrics");
    info!("  GET  /stats     - Statistics snapshot");
    info!("  POST /translate - Translate an image (multipart/form-data)");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    serde_json::to_value(state.metrics.snapshot())
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialize metrics: {}", e),
            )
        })
}

/// Translate an image.
///
/// Multipart fields:
/// - `image`: the raster to translate (PNG/JPEG/WebP)
/// - `items`: JSON array of OCR items
/// - `source_lang`, `target_lang`: BCP 47-ish language codes
/// - `ocr_width`, `ocr_height`: raster dimensions the OCR coordinates refer to
/// - `debug` (optional): "true" to get a JSON payload with debug artifacts
///   instead of raw PNG bytes
async fn translate(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, (StatusCode, String)> {
    state.metrics.record_endpoint_request("/translate");

    let mut image_bytes: Option<Vec<u8>> = None;
    let mut items: Option<Vec<OcrItem>> = None;
    let mut source_lang = "auto".to_string();
    let mut target_lang = "en".to_string();
    let mut ocr_width: Option<u32> = None;
    let mut ocr_height: Option<u32> = None;
    let mut debug = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid multipart: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let data = field.bytes().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read image: {}", e))
                })?;
                image_bytes = Some(data.to_vec());
            }
            "items" => {
                let text = field.text().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read items: {}", e))
                })?;
                let parsed: Vec<OcrItem> = serde_json::from_str(&text).map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Invalid items JSON: {}", e))
                })?;
                items = Some(parsed);
            }
            "source_lang" => source_lang = field_text(field).await?,
            "target_lang" => target_lang = field_text(field).await?,
            "ocr_width" => ocr_width = Some(field_u32(field, "ocr_width").await?),
            "ocr_height" => ocr_height = Some(field_u32(field, "ocr_height").await?),
            "debug" => {
                let value = field_text(field).await?;
                debug = value == "true" || value == "1";
            }
            _ => {}
        }
    }

    let image_bytes = image_bytes
        .ok_or((StatusCode::BAD_REQUEST, "Missing 'image' field".to_string()))?;
    let items = items.ok_or((StatusCode::BAD_REQUEST, "Missing 'items' field".to_string()))?;

    let image = retext::load_image_from_memory_async(&image_bytes)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid image: {}", e)))?;

    let request = TranslateImageRequest {
        ocr_width: ocr_width.unwrap_or(image.width()),
        ocr_height: ocr_height.unwrap_or(image.height()),
        image,
        items,
        source_lang,
        target_lang,
        debug,
    };

    match state.translator.translate_image(request).await {
        Ok(result) => {
            if debug {
                let steps: Vec<serde_json::Value> = result
                    .debug
                    .as_ref()
                    .map(|d| {
                        d.steps
                            .iter()
                            .map(|s| {
                                serde_json::json!({
                                    "label": s.label,
                                    "width": s.width,
                                    "height": s.height,
                                    "png": general_purpose::STANDARD.encode(&s.blob),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let body = serde_json::json!({
                    "width": result.width,
                    "height": result.height,
                    "png": general_purpose::STANDARD.encode(&result.png),
                    "regions": result.debug.as_ref().map(|d| &d.regions),
                    "stats": result.debug.as_ref().map(|d| &d.stats),
                    "steps": steps,
                });
                Ok(Json(body).into_response())
            } else {
                Ok((
                    StatusCode::OK,
                    [("Content-Type", "image/png")],
                    result.png,
                )
                    .into_response())
            }
        }
        Err(err) => {
            state.metrics.record_image_failure();
            error!(%err, "translation failed");
            let status = match err {
                PipelineError::NoOcrRegions
                | PipelineError::InvalidOcrDimensions { .. }
                | PipelineError::BoundsUnavailable
                | PipelineError::NoTranslatedText => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((status, err.to_string()))
        }
    }
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, (StatusCode, String)> {
    field
        .text()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid field: {}", e)))
}

async fn field_u32(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<u32, (StatusCode, String)> {
    field_text(field).await?.trim().parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Field '{}' must be a positive integer", name),
        )
    })
}
