use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::Json;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tranh_core::{GenerationMode, GenerationRequest};

use crate::error::{AppError, AppResult};
use crate::form::{GenerationForm, RequestFields};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub translated_text: String,
    pub image_path: String,
}

/// POST /text-to-image/
pub async fn text_to_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    form: GenerationForm,
) -> AppResult<Json<GenerationResponse>> {
    let fields = RequestFields::new(form, query);
    let prompt = fields.prompt()?;
    generate(&state, &fields, prompt, GenerationMode::TextToImage).await
}

/// POST /image-to-image/
pub async fn image_to_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    form: GenerationForm,
) -> AppResult<Json<GenerationResponse>> {
    let fields = RequestFields::new(form, query);
    let prompt = fields.prompt()?;
    let file = fields.file("file")?;

    let image = decode_upload(file, "file").await?;
    generate(&state, &fields, prompt, GenerationMode::ImageToImage { image }).await
}

/// POST /inpainting/
pub async fn inpainting(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    form: GenerationForm,
) -> AppResult<Json<GenerationResponse>> {
    let fields = RequestFields::new(form, query);
    let prompt = fields.prompt()?;
    let file = fields.file("file")?;
    let mask = fields.file("mask")?;

    let image = decode_upload(file, "file").await?;
    let mask = decode_upload(mask, "mask").await?;
    generate(&state, &fields, prompt, GenerationMode::Inpainting { image, mask }).await
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /{name}: a previously generated image.
pub async fn output_image(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let bytes = state.outputs.read(&name).await?;
    Ok(([(CONTENT_TYPE, "image/png")], bytes))
}

async fn decode_upload(bytes: Bytes, field: &'static str) -> AppResult<RgbImage> {
    tokio::task::spawn_blocking(move || tranh_core::decode_image(&bytes))
        .await
        .map_err(|e| AppError::Internal(format!("image decoder task failed: {e}")))?
        .map_err(|e| AppError::validation(format!("`{field}` is {e}")))
}

/// Validate → translate → generate → persist, stopping at the first failure.
#[tracing::instrument(skip_all, fields(mode = mode.name()))]
async fn generate(
    state: &AppState,
    fields: &RequestFields,
    prompt: String,
    mode: GenerationMode,
) -> AppResult<Json<GenerationResponse>> {
    let mut request = GenerationRequest::new(prompt, mode);
    fields.apply(&mut request)?;
    request.validate()?;

    let translated_text = state.translator.translate(&request.prompt).await?;
    tracing::info!(prompt = %request.prompt, translated = %translated_text, "translated prompt");
    request.prompt = translated_text.clone();

    let image = state.pipeline.generate(request).await?;
    let image_path = state.outputs.persist(image).await?;
    tracing::info!(%image_path, "saved generated image");

    Ok(Json(GenerationResponse {
        translated_text,
        image_path,
    }))
}
