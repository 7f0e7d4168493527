#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use clap::Parser;
use http_body_util::BodyExt;
use image::{ImageFormat, RgbImage};
use tranh_core::{Error, GenerationRequest, ModelLike, Pipeline, Translator};
use tranh_server::output::OutputStore;
use tranh_server::{app, AppState, Args};

pub const BOUNDARY: &str = "tranh-test-boundary";

/// Dictionary translator standing in for the remote service.
#[derive(Default)]
pub struct FakeTranslator {
    pub calls: AtomicUsize,
    pub unavailable: bool,
}

impl FakeTranslator {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str) -> tranh_core::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(Error::translation(
                "request to translation service failed: connection refused",
            ));
        }
        Ok(match text {
            "con mèo" => "cat".to_string(),
            "hoàng hôn" => "sunset".to_string(),
            "bầu trời xanh" => "blue sky".to_string(),
            other => format!("en:{other}"),
        })
    }
}

/// What the model saw for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCall {
    pub prompt: String,
    pub mode: &'static str,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance_scale: f64,
    pub conditioning: Option<(u32, u32)>,
    pub mask: Option<(u32, u32)>,
}

/// Model that paints a flat image of the requested size.
#[derive(Default)]
pub struct FakeModel {
    pub calls: Mutex<Vec<ModelCall>>,
    pub fail: bool,
    pub panic: bool,
}

impl FakeModel {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ModelLike for FakeModel {
    fn run(&self, request: &GenerationRequest) -> anyhow::Result<RgbImage> {
        self.calls.lock().unwrap().push(ModelCall {
            prompt: request.prompt.clone(),
            mode: request.mode.name(),
            width: request.width,
            height: request.height,
            steps: request.steps,
            guidance_scale: request.guidance_scale,
            conditioning: request.mode.conditioning_image().map(|i| i.dimensions()),
            mask: request.mode.mask().map(|m| m.dimensions()),
        });
        if self.panic {
            panic!("attention kernel indexed past the sequence");
        }
        if self.fail {
            anyhow::bail!("CUDA out of memory");
        }
        Ok(RgbImage::from_pixel(
            request.width as u32,
            request.height as u32,
            image::Rgb([200, 120, 40]),
        ))
    }
}

pub struct TestApp {
    pub router: Router,
    pub translator: Arc<FakeTranslator>,
    pub model: Arc<FakeModel>,
    pub dir: tempfile::TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(FakeTranslator::default(), FakeModel::default(), false)
    }

    pub fn with(translator: FakeTranslator, model: FakeModel, unique_outputs: bool) -> Self {
        Self::with_args(translator, model, unique_outputs, &[])
    }

    /// Builds the app with extra command line flags.
    pub fn with_args(
        translator: FakeTranslator,
        model: FakeModel,
        unique_outputs: bool,
        flags: &[&str],
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let translator = Arc::new(translator);
        let model = Arc::new(model);
        let args = Args::parse_from(std::iter::once("tranh-server").chain(flags.iter().copied()));
        let state = AppState {
            translator: translator.clone(),
            pipeline: Pipeline::new(model.clone()),
            outputs: OutputStore::new(dir.path(), "output_image.png", unique_outputs),
        };
        Self {
            router: app(state, &args),
            translator,
            model,
            dir,
        }
    }

    pub fn output_path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    pub fn output_files(&self) -> usize {
        std::fs::read_dir(self.dir.path()).unwrap().count()
    }
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(
        &RgbImage::from_pixel(width, height, image::Rgb([30, 60, 90])),
        ImageFormat::Jpeg,
    )
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    encode(
        &RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255])),
        ImageFormat::Png,
    )
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    use tower::ServiceExt;

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

pub async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = send(router, request).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub fn image_dimensions(path: &Path) -> (u32, u32) {
    let image = image::open(path).unwrap();
    (image.width(), image.height())
}

pub fn counts(app: &TestApp) -> (usize, usize) {
    (app.translator.calls(), app.model.calls().len())
}
