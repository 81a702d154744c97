use actix_multipart::Multipart;
use actix_web::{HttpMessage, HttpRequest, HttpResponse, mime, web};
use futures::TryStreamExt;
use log::{error, info};
use shared::{HealthResponse, IdentifyResponse};

use crate::classifier::Prediction;
use crate::error::IdentifyError;
use crate::explain::explain;
use crate::imaging;
use crate::state::AppState;

const IMAGE_FIELD: &str = "image";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/identify-disease").route(web::post().to(identify_disease)))
        .service(web::resource("/health").route(web::get().to(health_check)));
}

async fn identify_disease(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: Multipart,
) -> Result<HttpResponse, IdentifyError> {
    match identify(&state, &req, payload).await {
        Ok(body) => Ok(HttpResponse::Ok().json(body)),
        Err(e) => {
            error!("Disease identification failed: {:?}", e);
            Err(e)
        }
    }
}

async fn identify(
    state: &AppState,
    req: &HttpRequest,
    payload: Multipart,
) -> Result<IdentifyResponse, IdentifyError> {
    if !is_form_upload(req) {
        return Err(IdentifyError::MissingImage);
    }

    let upload = read_image_field(payload, state.upload_limit_bytes)
        .await?
        .ok_or(IdentifyError::MissingImage)?;
    info!("Received image upload of {} bytes", upload.len());

    let classifier = state.classifier.clone();
    let (image, prediction) = web::block(move || -> Result<(String, Prediction), IdentifyError> {
        let decoded = imaging::decode(&upload).map_err(IdentifyError::Decode)?;
        let image = imaging::to_base64_jpeg(&decoded).map_err(IdentifyError::Encode)?;
        let prediction = classifier.classify(&decoded)?;
        Ok((image, prediction))
    })
    .await??;
    info!(
        "Detected {} (confidence {:.3})",
        prediction.label, prediction.confidence
    );

    let explanation = explain(state.explainer.as_ref(), &prediction.label).await?;

    Ok(IdentifyResponse::detected(
        image,
        prediction.label,
        explanation.cause,
        explanation.recommendation,
    ))
}

/// A body that cannot hold file parts (wrong or unparsable content type, no
/// boundary) is treated as an upload without an image.
fn is_form_upload(req: &HttpRequest) -> bool {
    match req.mime_type() {
        Ok(Some(content_type)) => {
            content_type.type_() == mime::MULTIPART
                && content_type.subtype() == mime::FORM_DATA
                && content_type.get_param(mime::BOUNDARY).is_some()
        }
        _ => false,
    }
}

/// Returns the bytes of the first `image` file part. Plain form values and
/// other fields are drained and dropped.
async fn read_image_field(
    mut payload: Multipart,
    limit: usize,
) -> Result<Option<Vec<u8>>, IdentifyError> {
    let mut image = None;

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .is_some();
        let wanted = image.is_none() && is_file && field.name() == Some(IMAGE_FIELD);
        let mut data = Vec::new();

        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            if !wanted {
                continue;
            }
            if data.len() + chunk.len() > limit {
                return Err(IdentifyError::ImageTooLarge { limit });
            }
            data.extend_from_slice(&chunk);
        }

        if wanted {
            image = Some(data);
        }
    }

    Ok(image)
}

fn multipart_error(err: actix_multipart::MultipartError) -> IdentifyError {
    IdentifyError::Multipart(err.to_string())
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "OK".to_string(),
        labels: state.classifier.labels().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use actix_web::http::{StatusCode, header};
    use actix_web::{App, test};
    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose};
    use image::{DynamicImage, GenericImageView};

    use crate::classifier::{Classifier, ClassifierError, LabelSet};
    use crate::explain::{ExplanationError, Explainer, NO_CAUSE, NO_RECOMMENDATION};
    use crate::imaging::tests::{leaf_jpeg, leaf_png};

    const BOUNDARY: &str = "----leafboundary7MA4YWxk";
    const MULTIPART: &str = "multipart/form-data; boundary=----leafboundary7MA4YWxk";

    /// Picks the label whose index matches the dominant colour channel of
    /// the top-left pixel.
    struct ColourClassifier {
        labels: LabelSet,
    }

    impl ColourClassifier {
        fn new() -> Self {
            let labels = LabelSet::from_id2label(
                [
                    ("0", "Tomato___Early_blight"),
                    ("1", "Tomato___Late_blight"),
                    ("2", "Tomato___healthy"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            )
            .unwrap();
            Self { labels }
        }
    }

    impl Classifier for ColourClassifier {
        fn classify(&self, image: &DynamicImage) -> Result<Prediction, ClassifierError> {
            let pixel = image.to_rgb8().get_pixel(0, 0).0;
            let logits: Vec<f32> = pixel.iter().map(|&c| c as f32).collect();
            self.labels.predict(&logits)
        }

        fn labels(&self) -> &LabelSet {
            &self.labels
        }
    }

    enum Reply {
        Text,
        Nothing,
        Fail,
    }

    struct CannedExplainer {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl CannedExplainer {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Explainer for CannedExplainer {
        async fn generate(&self, prompt: &str) -> Result<Option<String>, ExplanationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Text => Ok(Some(format!("answer to: {}", prompt))),
                Reply::Nothing => Ok(None),
                Reply::Fail => Err(ExplanationError::Api {
                    status: 500,
                    message: "internal error".to_string(),
                }),
            }
        }
    }

    /// Each part is `(name, filename, data)`; parts without a filename are
    /// plain form values.
    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let disposition = match filename {
                Some(filename) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    name, filename
                ),
                None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", name),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn post(
        explainer: Arc<CannedExplainer>,
        limit: usize,
        body: Vec<u8>,
        content_type: &str,
    ) -> (StatusCode, IdentifyResponse) {
        let state = AppState::new(Arc::new(ColourClassifier::new()), explainer, limit);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/identify-disease")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        (status, test::read_body_json(resp).await)
    }

    async fn upload_parts(
        explainer: Arc<CannedExplainer>,
        parts: &[(&str, Option<&str>, &[u8])],
    ) -> (StatusCode, IdentifyResponse) {
        post(explainer, 1024 * 1024, multipart_body(parts), MULTIPART).await
    }

    async fn upload(
        explainer: Arc<CannedExplainer>,
        files: &[(&str, &[u8])],
    ) -> (StatusCode, IdentifyResponse) {
        let parts: Vec<(&str, Option<&str>, &[u8])> = files
            .iter()
            .map(|&(name, data)| (name, Some("leaf.png"), data))
            .collect();
        upload_parts(explainer, &parts).await
    }

    #[actix_web::test]
    async fn leaf_upload_is_detected_and_explained() {
        let explainer = CannedExplainer::new(Reply::Text);
        let png = leaf_png(40, 30);

        let (status, body) = upload(explainer.clone(), &[("image", png.as_slice())]).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.message.as_deref(), Some("Successfully Detected"));
        assert_eq!(body.detected.as_deref(), Some("Tomato___Late_blight"));
        assert_eq!(
            body.cause.as_deref(),
            Some("answer to: Explain the cause of Tomato___Late_blight in full detail.")
        );
        assert_eq!(
            body.recommendation.as_deref(),
            Some("answer to: Provide full recommendations for managing Tomato___Late_blight.")
        );
        assert!(body.error.is_none());
        assert_eq!(explainer.calls.load(Ordering::SeqCst), 2);

        let jpeg = general_purpose::STANDARD.decode(body.image.unwrap()).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&jpeg).unwrap().dimensions(), (40, 30));
    }

    #[actix_web::test]
    async fn other_fields_are_ignored() {
        let png = leaf_png(8, 8);
        let (status, body) = upload(
            CannedExplainer::new(Reply::Text),
            &[("note", b"from the greenhouse".as_slice()), ("image", png.as_slice())],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.detected.as_deref(), Some("Tomato___Late_blight"));
    }

    #[actix_web::test]
    async fn same_image_gives_same_label() {
        let png = leaf_png(16, 16);
        let files = [("image", png.as_slice())];
        let (_, first) = upload(CannedExplainer::new(Reply::Text), &files).await;
        let (_, second) = upload(CannedExplainer::new(Reply::Text), &files).await;

        assert!(first.detected.is_some());
        assert_eq!(first.detected, second.detected);
    }

    #[actix_web::test]
    async fn empty_explanations_use_fallback_text() {
        let png = leaf_png(8, 8);
        let (status, body) =
            upload(CannedExplainer::new(Reply::Nothing), &[("image", png.as_slice())]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.cause.as_deref(), Some(NO_CAUSE));
        assert_eq!(body.recommendation.as_deref(), Some(NO_RECOMMENDATION));
    }

    #[actix_web::test]
    async fn missing_image_field_is_a_bad_request() {
        let explainer = CannedExplainer::new(Reply::Text);
        let (status, body) = upload(explainer.clone(), &[("photo", b"whatever".as_slice())]).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, IdentifyResponse::missing_input("No image uploaded"));
        assert_eq!(explainer.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn non_multipart_request_is_a_bad_request() {
        let (status, body) = post(
            CannedExplainer::new(Reply::Text),
            1024,
            b"{}".to_vec(),
            "application/json",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.as_deref(), Some("No image uploaded"));
    }

    #[actix_web::test]
    async fn undecodable_upload_is_a_server_error() {
        let explainer = CannedExplainer::new(Reply::Text);
        let not_an_image = b"GIF89a but not really".as_slice();
        let (status, body) = upload(explainer.clone(), &[("image", not_an_image)]).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.success);
        assert!(body.message.unwrap().starts_with("Cannot identify image file"));
        assert!(body.detected.is_none());
        assert_eq!(explainer.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn explanation_failure_discards_the_classification() {
        let png = leaf_png(8, 8);
        let (status, body) =
            upload(CannedExplainer::new(Reply::Fail), &[("image", png.as_slice())]).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.success);
        assert_eq!(
            body.message.as_deref(),
            Some("Generative API error (500): internal error")
        );
        assert!(body.detected.is_none());
        assert!(body.image.is_none());
        assert!(body.cause.is_none());
    }

    #[actix_web::test]
    async fn oversized_upload_is_rejected() {
        let png = leaf_png(64, 64);
        let (status, body) = post(
            CannedExplainer::new(Reply::Text),
            16,
            multipart_body(&[("image", Some("leaf.png"), png.as_slice())]),
            MULTIPART,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body.message.as_deref(),
            Some("Uploaded image exceeds the 16 byte limit")
        );
    }

    #[actix_web::test]
    async fn jpeg_upload_is_detected_and_echoed() {
        let jpeg = leaf_jpeg(48, 36);
        let (status, body) = upload_parts(
            CannedExplainer::new(Reply::Text),
            &[("image", Some("leaf.jpg"), jpeg.as_slice())],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.detected.as_deref(), Some("Tomato___Late_blight"));
        assert!(!body.cause.unwrap().is_empty());
        assert!(!body.recommendation.unwrap().is_empty());

        let echoed = general_purpose::STANDARD.decode(body.image.unwrap()).unwrap();
        assert_eq!(image::guess_format(&echoed).unwrap(), image::ImageFormat::Jpeg);
        assert_eq!(image::load_from_memory(&echoed).unwrap().dimensions(), (48, 36));
    }

    #[actix_web::test]
    async fn text_value_named_image_is_not_an_upload() {
        let explainer = CannedExplainer::new(Reply::Text);
        let (status, body) = upload_parts(
            explainer.clone(),
            &[("image", None, b"just some text".as_slice())],
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, IdentifyResponse::missing_input("No image uploaded"));
        assert_eq!(explainer.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn file_part_wins_over_text_value_with_same_name() {
        let png = leaf_png(8, 8);
        let (status, body) = upload_parts(
            CannedExplainer::new(Reply::Text),
            &[
                ("image", None, b"caption".as_slice()),
                ("image", Some("leaf.png"), png.as_slice()),
            ],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.detected.as_deref(), Some("Tomato___Late_blight"));
    }

    #[actix_web::test]
    async fn multipart_without_boundary_is_a_bad_request() {
        let png = leaf_png(8, 8);
        let (status, body) = post(
            CannedExplainer::new(Reply::Text),
            1024 * 1024,
            multipart_body(&[("image", Some("leaf.png"), png.as_slice())]),
            "multipart/form-data",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.as_deref(), Some("No image uploaded"));
    }

    #[actix_web::test]
    async fn truncated_multipart_body_is_a_server_error() {
        let mut body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"leaf.png\"\r\n\r\n",
            BOUNDARY
        )
        .into_bytes();
        body.extend_from_slice(&leaf_png(8, 8)[..20]);

        let (status, body) =
            post(CannedExplainer::new(Reply::Text), 1024 * 1024, body, MULTIPART).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.success);
        assert!(body.message.unwrap().starts_with("Multipart error"));
    }

    #[actix_web::test]
    async fn health_reports_label_count() {
        let state = AppState::new(
            Arc::new(ColourClassifier::new()),
            CannedExplainer::new(Reply::Text),
            1024,
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: HealthResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.status, "OK");
        assert_eq!(body.labels, 3);
    }
}
