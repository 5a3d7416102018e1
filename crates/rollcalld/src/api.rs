//! HTTP surface of the recognition service.

use crate::service::{Recognition, RecognitionService, ServiceError};
use actix_web::http::StatusCode;
use actix_web::{error::InternalError, web, HttpRequest, HttpResponse, ResponseError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No image data provided")]
    MissingImage,
    #[error("invalid base64 image data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("cannot decode image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingImage | Self::InvalidBase64(_) | Self::InvalidImage(_) => StatusCode::BAD_REQUEST,
            Self::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let Self::Service(e) = self {
            tracing::error!(error = %e, "request failed");
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FaceLocation {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeResponse {
    pub name: Option<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_location: Option<FaceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl RecognizeResponse {
    fn unmatched(message: &'static str) -> Self {
        Self {
            name: None,
            confidence: 0.0,
            distance: None,
            face_location: None,
            message: Some(message),
        }
    }
}

impl From<Recognition> for RecognizeResponse {
    fn from(recognition: Recognition) -> Self {
        match recognition {
            Recognition::NoFace => Self::unmatched("No face detected"),
            Recognition::NoKnownFaces => Self::unmatched("No known faces loaded"),
            Recognition::Unknown => Self::unmatched("Face detected but not a known person"),
            Recognition::Matched {
                label,
                confidence,
                distance,
                face_location,
            } => Self {
                name: Some(label),
                confidence,
                distance: Some(distance),
                face_location: Some(FaceLocation {
                    x: face_location.x,
                    y: face_location.y,
                    width: face_location.width,
                    height: face_location.height,
                }),
                message: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub message: &'static str,
    pub loaded_labels: Vec<String>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub known_faces: Vec<String>,
    pub total_faces: usize,
    pub tolerance: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecognitionResponse {
    pub known_faces_count: usize,
    pub known_faces: Vec<String>,
    pub encodings_loaded: usize,
    pub status: &'static str,
}

/// Mount all routes, including the legacy `/api/...` names.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/recognize", web::post().to(recognize))
        .route("/reload-gallery", web::post().to(reload_gallery))
        .route("/status", web::get().to(status))
        .route("/test-recognition", web::get().to(test_recognition))
        .service(
            web::scope("/api")
                .route("/recognize-face", web::post().to(recognize))
                .route("/reload-faces", web::post().to(reload_gallery))
                .route("/status", web::get().to(status))
                .route("/test-recognition", web::get().to(test_recognition)),
        );
}

/// JSON extractor settings: body limit and `{ error }` bodies for bad JSON.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req: &HttpRequest| {
            let body = json!({ "error": err.to_string() });
            InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
        })
}

/// Strip an optional `data:<mime>;base64,` prefix and decode.
fn decode_image(encoded: &str) -> Result<image::RgbImage, ApiError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

async fn recognize(
    service: web::Data<RecognitionService>,
    request: web::Json<RecognizeRequest>,
) -> Result<HttpResponse, ApiError> {
    let encoded = request
        .into_inner()
        .image
        .filter(|image| !image.is_empty())
        .ok_or(ApiError::MissingImage)?;
    let image = decode_image(&encoded)?;

    let recognition = service.recognize(image).await?;
    Ok(HttpResponse::Ok().json(RecognizeResponse::from(recognition)))
}

async fn reload_gallery(service: web::Data<RecognitionService>) -> Result<HttpResponse, ApiError> {
    let summary = service.reload().await?;
    Ok(HttpResponse::Ok().json(ReloadResponse {
        message: "Known faces reloaded successfully",
        total_count: summary.labels.len(),
        loaded_labels: summary.labels,
    }))
}

async fn status(service: web::Data<RecognitionService>) -> HttpResponse {
    let snapshot = service.snapshot().await;
    HttpResponse::Ok().json(StatusResponse {
        status: "running",
        total_faces: snapshot.labels.len(),
        known_faces: snapshot.labels,
        tolerance: snapshot.tolerance,
    })
}

async fn test_recognition(service: web::Data<RecognitionService>) -> HttpResponse {
    let snapshot = service.snapshot().await;
    HttpResponse::Ok().json(TestRecognitionResponse {
        known_faces_count: snapshot.labels.len(),
        known_faces: snapshot.labels,
        encodings_loaded: snapshot.signatures,
        status: if snapshot.signatures > 0 { "ready" } else { "no_faces_loaded" },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::engine::tests::ColourEncoder;
    use actix_web::{test, App};
    use image::{Rgb, RgbImage};
    use serde_json::Value;
    use std::path::Path;

    fn png_base64(colour: [u8; 3]) -> String {
        png_base64_width(8, colour)
    }

    /// ColourEncoder gives 1-pixel-wide images a 2-dimensional signature.
    fn png_base64_width(width: u32, colour: [u8; 3]) -> String {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 8, Rgb(colour)))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        STANDARD.encode(bytes)
    }

    fn service_for(dir: &Path) -> web::Data<RecognitionService> {
        let engine = spawn_engine(ColourEncoder).unwrap();
        web::Data::new(RecognitionService::new(engine, dir.to_path_buf(), 0.6))
    }

    fn seed(dir: &Path) {
        RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]))
            .save(dir.join("alice.png"))
            .unwrap();
        RgbImage::from_pixel(8, 8, Rgb([0, 0, 255]))
            .save(dir.join("bob.jpg"))
            .unwrap();
    }

    macro_rules! app {
        ($data:expr) => {
            test::init_service(
                App::new()
                    .app_data($data.clone())
                    .app_data(json_config(1024 * 1024))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_recognize_matched() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let data = service_for(dir.path());
        data.reload().await.unwrap();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/recognize")
            .set_json(json!({ "image": png_base64([255, 0, 0]) }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["name"], "alice");
        assert_eq!(body["confidence"], 1.0);
        assert_eq!(body["distance"], 0.0);
        assert_eq!(body["faceLocation"]["width"], 3.0);
        assert!(body.get("message").is_none());
    }

    #[actix_web::test]
    async fn test_recognize_unknown_via_legacy_route() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let data = service_for(dir.path());
        data.reload().await.unwrap();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/recognize-face")
            .set_json(json!({ "image": png_base64([0, 255, 0]) }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["name"], Value::Null);
        assert_eq!(body["confidence"], 0.0);
        assert_eq!(body["message"], "Face detected but not a known person");
        assert!(body.get("distance").is_none());
    }

    #[actix_web::test]
    async fn test_recognize_zero_faces() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let data = service_for(dir.path());
        data.reload().await.unwrap();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/recognize")
            .set_json(json!({ "image": png_base64([0, 0, 0]) }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["name"], Value::Null);
        assert_eq!(body["confidence"], 0.0);
        assert_eq!(body["message"], "No face detected");
    }

    #[actix_web::test]
    async fn test_recognize_with_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let data = service_for(dir.path());
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/recognize")
            .set_json(json!({ "image": format!("data:image/png;base64,{}", png_base64([255, 0, 0])) }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["message"], "No known faces loaded");
    }

    #[actix_web::test]
    async fn test_recognize_dimension_mismatch_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let data = service_for(dir.path());
        data.reload().await.unwrap();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/recognize")
            .set_json(json!({ "image": png_base64_width(1, [255, 0, 0]) }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        let error = body["error"].as_str().unwrap();
        assert!(error.contains("dimension mismatch"), "got {error}");
        assert!(body.get("name").is_none());
    }

    #[actix_web::test]
    async fn test_recognize_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let data = service_for(dir.path());
        let app = app!(data);

        for payload in [json!({}), json!({ "image": "" }), json!({ "image": "@@not base64@@" })] {
            let req = test::TestRequest::post()
                .uri("/recognize")
                .set_json(payload)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert!(body["error"].is_string());
        }

        let req = test::TestRequest::post()
            .uri("/recognize")
            .set_json(json!({ "image": STANDARD.encode(b"not an image") }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_malformed_json_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let data = service_for(dir.path());
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/recognize")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn test_reload_status_and_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let data = service_for(dir.path());
        let app = app!(data);

        let req = test::TestRequest::get().uri("/test-recognition").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "no_faces_loaded");
        assert_eq!(body["encodingsLoaded"], 0);

        seed(dir.path());
        let req = test::TestRequest::post().uri("/reload-gallery").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["totalCount"], 2);
        assert_eq!(body["loadedLabels"], json!(["alice", "bob"]));

        let req = test::TestRequest::get().uri("/api/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["totalFaces"], 2);
        assert_eq!(body["knownFaces"], json!(["alice", "bob"]));

        let req = test::TestRequest::get().uri("/api/test-recognition").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["knownFacesCount"], 2);
    }

    #[actix_web::test]
    async fn test_failed_reload_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        RgbImage::from_pixel(1, 8, Rgb([0, 255, 0]))
            .save(dir.path().join("zed.png"))
            .unwrap();
        let data = service_for(dir.path());
        let app = app!(data);

        let req = test::TestRequest::post().uri("/api/reload-faces").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("dimension"));
    }
}
