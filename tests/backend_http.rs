//! HTTP contract tests against a local mock of the inference backend

use advex::client::{
    ClientError, CompareAttacksRequest, EvaluateDefenseRequest, ExplorerBackend, GenerateRequest,
    PrecomputedChart,
};
use advex::session::{AttackSession, Phase};
use advex::{HttpBackend, ImagePayload};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Captured = Arc<Mutex<Vec<serde_json::Value>>>;

async fn spawn(app: Router) -> String {
    // The crate accepts uploads up to 5 MiB; axum's default 2 MB body limit
    // would reject the wire bodies these tests send.
    let app = app.layer(axum::extract::DefaultBodyLimit::max(16 * 1024 * 1024));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn backend(base_url: &str) -> HttpBackend {
    HttpBackend::new(base_url, Duration::from_secs(5))
}

fn generate_response() -> serde_json::Value {
    serde_json::json!({
        "original_image": "b3JpZw==",
        "adversarial_image": "YWR2",
        "original_pred": "tabby",
        "adv_pred": "guacamole",
        "original_conf": 0.97,
        "adv_conf": 0.64,
        "success": true,
        "l2_dist": 1.31,
        "linf_dist": 0.03,
        "comparison_plot": "cGxvdA=="
    })
}

fn test_image() -> ImagePayload {
    let mut bytes = vec![0x5A; 2 * 1024 * 1024];
    bytes[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    ImagePayload::from_bytes("image/jpeg", &bytes).unwrap()
}

#[tokio::test]
async fn list_endpoints_decode_their_payloads() {
    let app = Router::new()
        .route(
            "/api/attacks",
            get(|| async { Json(serde_json::json!({"attacks": ["fgsm", "pgd"]})) }),
        )
        .route(
            "/api/defenses",
            get(|| async {
                Json(serde_json::json!({"defenses": ["best_standard_model.pth"]}))
            }),
        );
    let client = backend(&spawn(app).await);

    assert_eq!(client.list_attacks().await.unwrap(), ["fgsm", "pgd"]);
    assert_eq!(
        client.list_defenses().await.unwrap(),
        ["best_standard_model.pth"]
    );
}

#[tokio::test]
async fn generate_posts_the_exact_wire_body() {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(
            "/api/generate_adversarial",
            post(
                |State(captured): State<Captured>, Json(body): Json<serde_json::Value>| async move {
                    captured.lock().unwrap().push(body);
                    Json(generate_response())
                },
            ),
        )
        .with_state(Arc::clone(&captured));
    let client = backend(&spawn(app).await);

    let image = test_image();
    let request = GenerateRequest::new(&image, "fgsm", 0.03);
    let outcome = client.generate_adversarial(&request).await.unwrap();

    assert_eq!(outcome.adv_pred, "guacamole");
    assert!(outcome.success);

    let bodies = captured.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["attack_type"], "fgsm");
    assert_eq!(bodies[0]["epsilon"], 0.03);
    let wire = bodies[0]["image"].as_str().unwrap();
    assert_eq!(wire, image.wire_format());
    assert!(!wire.starts_with("data:"));
}

#[tokio::test]
async fn server_error_surfaces_the_backend_message() {
    let app = Router::new().route(
        "/api/compare_attacks",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "CUDA out of memory"})),
            )
        }),
    );
    let client = backend(&spawn(app).await);

    let request = CompareAttacksRequest::new(&test_image(), &["fgsm".to_string()], 0.03);
    let err = client.compare_attacks(&request).await.unwrap_err();
    match err {
        ClientError::Rejected { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "CUDA out of memory");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_success_body_fails_fast() {
    let app = Router::new().route(
        "/api/evaluate_defense",
        post(|| async { Json(serde_json::json!({"clean_accuracy": "not a number"})) }),
    );
    let client = backend(&spawn(app).await);

    let request = EvaluateDefenseRequest {
        model_name: "best_standard_model.pth".to_string(),
        attack_type: "pgd".to_string(),
        epsilon: 0.05,
    };
    let err = client.evaluate_defense(&request).await.unwrap_err();
    assert!(matches!(err, ClientError::Malformed(_)));
}

#[tokio::test]
async fn invalid_input_is_caught_before_any_request() {
    // Nothing is listening on this port; a request would fail differently.
    let client = backend("http://127.0.0.1:9");
    let mut request = GenerateRequest::new(&test_image(), "fgsm", 0.03);
    request.image.clear();
    let err = client.generate_adversarial(&request).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidInput(_)));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let client = backend("http://127.0.0.1:9");
    let err = client.list_attacks().await.unwrap_err();
    assert!(matches!(err, ClientError::Unavailable(_)));
}

#[tokio::test]
async fn precomputed_returns_raw_bytes_and_404_is_rejected() {
    let app = Router::new().route(
        "/api/precomputed/:name",
        get(|axum::extract::Path(name): axum::extract::Path<String>| async move {
            if name == "robustness_overview" {
                ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G'])
                    .into_response()
            } else {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"error": "Visualization not found"})),
                )
                    .into_response()
            }
        }),
    );
    let client = backend(&spawn(app).await);

    let bytes = client
        .fetch_precomputed(PrecomputedChart::RobustnessOverview)
        .await
        .unwrap();
    assert_eq!(bytes, [0x89, b'P', b'N', b'G']);

    let err = client
        .fetch_precomputed(PrecomputedChart::LossLandscape)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn static_fetch_reports_the_content_type() {
    let app = Router::new().route(
        "/static/samples/sample_1.jpg",
        get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], vec![0xFFu8, 0xD8, 0xFF]) }),
    );
    let client = backend(&spawn(app).await);

    let (mime, bytes) = client.fetch_static("samples/sample_1.jpg").await.unwrap();
    assert_eq!(mime, "image/jpeg");
    assert_eq!(bytes, [0xFF, 0xD8, 0xFF]);
}

#[tokio::test]
async fn remote_image_normalizes_with_header_mime() {
    let app = Router::new()
        .route(
            "/img/ok.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G']) }),
        )
        .route(
            "/img/nope",
            get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html></html>") }),
        );
    let base = spawn(app).await;
    let client = reqwest::Client::new();

    let payload = ImagePayload::from_url(&client, &format!("{base}/img/ok.png"))
        .await
        .unwrap();
    assert_eq!(payload.mime(), "image/png");
    assert!(!payload.wire_format().starts_with("data:"));

    // Non-image Content-Type is rejected, never normalized
    let err = ImagePayload::from_url(&client, &format!("{base}/img/nope")).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn attack_session_end_to_end_over_http() {
    let app = Router::new()
        .route(
            "/api/attacks",
            get(|| async { Json(serde_json::json!({"attacks": ["fgsm", "pgd", "deepfool", "cw"]})) }),
        )
        .route(
            "/api/generate_adversarial",
            post(|Json(_): Json<serde_json::Value>| async { Json(generate_response()) }),
        );
    let client = Arc::new(backend(&spawn(app).await));

    let mut session = AttackSession::new(
        Arc::clone(&client) as Arc<dyn ExplorerBackend>,
        vec!["fgsm".to_string()],
    );
    session.refresh_catalog().await;
    assert_eq!(session.attacks().len(), 4);

    session.set_image(test_image());
    session.set_epsilon(0.03);
    session.generate().await.unwrap();

    match session.generation() {
        Phase::Success(result) => assert_eq!(result.adv_pred, "guacamole"),
        other => panic!("expected Success, got {other:?}"),
    }

    let stats = client.stats().snapshot();
    let generate_row = stats
        .iter()
        .find(|row| row.0 == "generate_adversarial")
        .unwrap();
    assert_eq!((generate_row.1, generate_row.2, generate_row.3), (1, 1, 0));
}
