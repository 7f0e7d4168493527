use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use tranh_core::Error as CoreError;
use tranh_server::error::AppError;

async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn client_errors_map_to_bad_request() {
    let (status, body) = render(AppError::validation("missing required field `input`")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["detail"], "missing required field `input`");

    let (status, body) = render(CoreError::invalid_parameter("width must be a multiple of 8").into()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PARAMETER");
}

#[tokio::test]
async fn upstream_failures_map_to_server_errors() {
    let (status, body) = render(CoreError::translation("HTTP 503").into()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "TRANSLATION_ERROR");
    assert_eq!(body["detail"], "translation failed: HTTP 503");

    let (status, body) =
        render(CoreError::generation(anyhow::anyhow!("CUDA out of memory")).into()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "GENERATION_ERROR");

    let (status, body) = render(AppError::Internal("disk full".into())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn missing_output_is_not_found() {
    let (status, body) = render(AppError::NotFound("output_image.png".into())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn body_over_limit_is_payload_too_large() {
    let (status, body) =
        render(AppError::body(StatusCode::PAYLOAD_TOO_LARGE, "length limit exceeded".into())).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");

    let (status, body) =
        render(AppError::body(StatusCode::BAD_REQUEST, "malformed multipart body".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
