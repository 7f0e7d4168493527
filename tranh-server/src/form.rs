//! Request field extraction shared by the generation endpoints.
//!
//! Prompts and images come from the request body (multipart, or URL-encoded
//! for text-only requests). Numeric parameters may come from the query
//! string or the body; the body wins.

use std::collections::HashMap;
use std::str::FromStr;

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Form;
use tranh_core::GenerationRequest;

use crate::error::{AppError, AppResult};

/// Multipart fields always treated as binary uploads.
const FILE_FIELDS: [&str; 2] = ["file", "mask"];

#[derive(Debug, Default)]
pub struct GenerationForm {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, Bytes>,
}

impl<S> FromRequest<S> for GenerationForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state).await.map_err(|e| {
                AppError::body(e.status(), format!("malformed multipart body: {e}"))
            })?;
            let mut form = Self::default();
            while let Some(field) = multipart.next_field().await.map_err(|e| {
                AppError::body(e.status(), format!("malformed multipart body: {e}"))
            })?
            {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                if field.file_name().is_some() || FILE_FIELDS.contains(&name.as_str()) {
                    let data = field.bytes().await.map_err(|e| {
                        AppError::body(e.status(), format!("failed to read upload `{name}`: {e}"))
                    })?;
                    form.files.insert(name, data);
                } else {
                    let text = field.text().await.map_err(|e| {
                        AppError::body(e.status(), format!("failed to read field `{name}`: {e}"))
                    })?;
                    form.fields.insert(name, text);
                }
            }
            Ok(form)
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| AppError::body(e.status(), format!("malformed form body: {e}")))?;
            Ok(Self {
                fields,
                files: HashMap::new(),
            })
        } else if content_type.is_empty() {
            Ok(Self::default())
        } else {
            Err(AppError::validation(format!(
                "unsupported content type `{content_type}`, expected multipart/form-data"
            )))
        }
    }
}

/// Body and query fields of one generation request.
#[derive(Debug)]
pub struct RequestFields {
    form: GenerationForm,
    query: HashMap<String, String>,
}

impl RequestFields {
    pub fn new(form: GenerationForm, query: HashMap<String, String>) -> Self {
        Self { form, query }
    }

    /// The untranslated prompt from the required `input` field.
    pub fn prompt(&self) -> AppResult<String> {
        match self.form.fields.get("input") {
            Some(input) if !input.trim().is_empty() => Ok(input.clone()),
            Some(_) => Err(AppError::validation("field `input` must not be empty")),
            None => Err(AppError::validation("missing required field `input`")),
        }
    }

    /// A required uploaded file.
    pub fn file(&self, name: &str) -> AppResult<Bytes> {
        self.form
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::validation(format!("missing required file `{name}`")))
    }

    fn value(&self, name: &str) -> Option<&str> {
        self.form
            .fields
            .get(name)
            .or_else(|| self.query.get(name))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str, kind: &str) -> AppResult<Option<T>> {
        self.value(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| {
                    AppError::validation(format!("field `{name}` must be {kind}, got `{raw}`"))
                })
            })
            .transpose()
    }

    /// Overrides the request's numeric parameters with whatever was supplied.
    pub fn apply(&self, request: &mut GenerationRequest) -> AppResult<()> {
        if let Some(width) = self.parse("width", "an integer")? {
            request.width = width;
        }
        if let Some(height) = self.parse("height", "an integer")? {
            request.height = height;
        }
        if let Some(steps) = self.parse("num_inference_steps", "an integer")? {
            request.steps = steps;
        }
        if let Some(guidance_scale) = self.parse("guidance_scale", "a number")? {
            request.guidance_scale = guidance_scale;
        }
        request.seed = self.parse("seed", "an integer")?;
        request.strength = self.parse("strength", "a number")?;
        Ok(())
    }
}
