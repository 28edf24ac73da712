//! Typed REST client for the inference backend
//!
//! Every backend operation is a stateless request/response pair. Calls are
//! never retried and responses are never cached: each action issues a fresh
//! request and surfaces its outcome (or failure) directly to the caller.
//! Response bodies are deserialized into the typed structs below, so a
//! malformed payload fails fast instead of leaking undefined fields upward.

use crate::image::ImagePayload;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from backend communication
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("backend unreachable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("backend rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed backend response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Request to generate a single adversarial example
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    /// Base64 image in wire format (no data-URL prefix)
    pub image: String,
    pub attack_type: String,
    pub epsilon: f64,
}

/// Request to run several attacks against one image
#[derive(Debug, Clone, Serialize)]
pub struct CompareAttacksRequest {
    pub image: String,
    pub attacks: Vec<String>,
    pub epsilon: f64,
}

/// Request to evaluate one defense model under an attack
#[derive(Debug, Clone, Serialize)]
pub struct EvaluateDefenseRequest {
    pub model_name: String,
    pub attack_type: String,
    pub epsilon: f64,
}

/// Request to compare several defense models under an attack
#[derive(Debug, Clone, Serialize)]
pub struct CompareDefensesRequest {
    pub model_names: Vec<String>,
    pub attack_type: String,
    pub epsilon: f64,
}

impl GenerateRequest {
    pub fn new(image: &ImagePayload, attack_type: &str, epsilon: f64) -> Self {
        Self {
            image: image.wire_format().to_string(),
            attack_type: attack_type.to_string(),
            epsilon,
        }
    }

    fn validate(&self) -> Result<(), ClientError> {
        require_image(&self.image)?;
        require_name("attack_type", &self.attack_type)?;
        require_epsilon(self.epsilon)
    }
}

impl CompareAttacksRequest {
    pub fn new(image: &ImagePayload, attacks: &[String], epsilon: f64) -> Self {
        Self {
            image: image.wire_format().to_string(),
            attacks: attacks.to_vec(),
            epsilon,
        }
    }

    fn validate(&self) -> Result<(), ClientError> {
        require_image(&self.image)?;
        if self.attacks.is_empty() {
            return Err(ClientError::InvalidInput("attack list is empty".to_string()));
        }
        for attack in &self.attacks {
            require_name("attack", attack)?;
        }
        require_epsilon(self.epsilon)
    }
}

impl EvaluateDefenseRequest {
    fn validate(&self) -> Result<(), ClientError> {
        require_name("model_name", &self.model_name)?;
        require_name("attack_type", &self.attack_type)?;
        require_epsilon(self.epsilon)
    }
}

impl CompareDefensesRequest {
    fn validate(&self) -> Result<(), ClientError> {
        if self.model_names.is_empty() {
            return Err(ClientError::InvalidInput("model list is empty".to_string()));
        }
        for name in &self.model_names {
            require_name("model_name", name)?;
        }
        require_name("attack_type", &self.attack_type)?;
        require_epsilon(self.epsilon)
    }
}

fn require_image(image: &str) -> Result<(), ClientError> {
    if image.is_empty() {
        return Err(ClientError::InvalidInput("image data is empty".to_string()));
    }
    if image.starts_with("data:") {
        return Err(ClientError::InvalidInput(
            "image must be wire-format base64 without a data-URL prefix".to_string(),
        ));
    }
    Ok(())
}

fn require_name(field: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::InvalidInput(format!("{field} is empty")));
    }
    Ok(())
}

fn require_epsilon(epsilon: f64) -> Result<(), ClientError> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(ClientError::InvalidInput(format!(
            "epsilon must be a positive number, got {epsilon}"
        )));
    }
    Ok(())
}

/// Result of a single adversarial generation
#[derive(Debug, Clone, Deserialize)]
pub struct AttackOutcome {
    /// Model input, re-encoded by the backend (base64 PNG)
    pub original_image: String,
    /// Perturbed image (base64 PNG)
    pub adversarial_image: String,
    pub original_pred: String,
    pub adv_pred: String,
    pub original_conf: f64,
    pub adv_conf: f64,
    /// True when the prediction flipped
    pub success: bool,
    pub l2_dist: f64,
    pub linf_dist: f64,
    /// Side-by-side visualization rendered by the backend (base64 PNG)
    pub comparison_plot: String,
}

/// Per-attack record inside a comparison response
#[derive(Debug, Clone, Deserialize)]
pub struct AttackRecord {
    pub original_pred: String,
    pub adv_pred: String,
    pub original_conf: f64,
    pub adv_conf: f64,
    pub l2_dist: f64,
    pub linf_dist: f64,
    pub success: bool,
}

/// Result of comparing several attacks on one image.
///
/// `attack_results` is keyed by attack name; the backend does not guarantee
/// ordering, so callers iterate in their own request order.
#[derive(Debug, Clone, Deserialize)]
pub struct AttackComparison {
    pub comparison_plot: String,
    pub confidence_plot: String,
    pub attack_results: HashMap<String, AttackRecord>,
}

/// Result of evaluating one defense model
#[derive(Debug, Clone, Deserialize)]
pub struct DefenseEvaluation {
    pub clean_accuracy: f64,
    pub adv_accuracy: f64,
    /// Raw example images (base64), present on newer backends
    #[serde(default)]
    pub example_images: Vec<String>,
    /// Rendered example plots (base64)
    pub example_plots: Vec<String>,
}

/// Per-model scores inside a defense comparison
#[derive(Debug, Clone, Deserialize)]
pub struct ModelScore {
    pub clean_accuracy: f64,
    pub adv_accuracy: f64,
    /// adv_accuracy / clean_accuracy, computed by the backend
    pub robustness_ratio: f64,
}

/// Result of comparing several defense models
#[derive(Debug, Clone, Deserialize)]
pub struct DefenseComparison {
    pub robustness_bar_chart: String,
    pub robustness_by_class: String,
    pub feature_maps: String,
    pub model_results: HashMap<String, ModelScore>,
}

#[derive(Debug, Deserialize)]
struct AttackListResponse {
    attacks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DefenseListResponse {
    defenses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Precomputed visualizations served by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrecomputedChart {
    FgsmRobustness,
    PgdRobustness,
    DeepfoolRobustness,
    RobustnessOverview,
    RobustnessByClass,
    RobustnessDropByClass,
    FeatureMaps,
    GradientVisualization,
    LossLandscape,
    IntegratedGradients,
    TransferabilityMatrix,
}

impl PrecomputedChart {
    pub const ALL: [PrecomputedChart; 11] = [
        PrecomputedChart::FgsmRobustness,
        PrecomputedChart::PgdRobustness,
        PrecomputedChart::DeepfoolRobustness,
        PrecomputedChart::RobustnessOverview,
        PrecomputedChart::RobustnessByClass,
        PrecomputedChart::RobustnessDropByClass,
        PrecomputedChart::FeatureMaps,
        PrecomputedChart::GradientVisualization,
        PrecomputedChart::LossLandscape,
        PrecomputedChart::IntegratedGradients,
        PrecomputedChart::TransferabilityMatrix,
    ];

    /// Name segment used in `/api/precomputed/{name}`
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecomputedChart::FgsmRobustness => "fgsm_robustness",
            PrecomputedChart::PgdRobustness => "pgd_robustness",
            PrecomputedChart::DeepfoolRobustness => "deepfool_robustness",
            PrecomputedChart::RobustnessOverview => "robustness_overview",
            PrecomputedChart::RobustnessByClass => "robustness_by_class",
            PrecomputedChart::RobustnessDropByClass => "robustness_drop_by_class",
            PrecomputedChart::FeatureMaps => "feature_maps",
            PrecomputedChart::GradientVisualization => "gradient_visualization",
            PrecomputedChart::LossLandscape => "loss_landscape",
            PrecomputedChart::IntegratedGradients => "integrated_gradients",
            PrecomputedChart::TransferabilityMatrix => "transferability_matrix",
        }
    }
}

impl FromStr for PrecomputedChart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrecomputedChart::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown chart \"{s}\""))
    }
}

/// Sample inputs shipped with the backend
pub const SAMPLE_IMAGES: [&str; 3] = ["sample_1.jpg", "sample_2.jpg", "sample_3.jpg"];

/// Counters for one endpoint
#[derive(Debug, Default)]
pub struct EndpointStats {
    pub requests: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub total_latency_ms: AtomicU64,
}

/// Per-endpoint request counters, shared across clones of the backend handle
#[derive(Debug, Default)]
pub struct BackendStats {
    endpoints: DashMap<&'static str, Arc<EndpointStats>>,
}

impl BackendStats {
    fn entry(&self, endpoint: &'static str) -> Arc<EndpointStats> {
        Arc::clone(
            &self
                .endpoints
                .entry(endpoint)
                .or_insert_with(|| Arc::new(EndpointStats::default())),
        )
    }

    fn record(&self, endpoint: &'static str, ok: bool, latency_ms: u64) {
        let stats = self.entry(endpoint);
        stats.requests.fetch_add(1, Ordering::Relaxed);
        if ok {
            stats.successes.fetch_add(1, Ordering::Relaxed);
            stats.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        } else {
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of (endpoint, requests, successes, failures, mean latency ms)
    pub fn snapshot(&self) -> Vec<(&'static str, u64, u64, u64, u64)> {
        let mut rows: Vec<_> = self
            .endpoints
            .iter()
            .map(|entry| {
                let s = entry.value();
                let successes = s.successes.load(Ordering::Relaxed);
                let mean = if successes > 0 {
                    s.total_latency_ms.load(Ordering::Relaxed) / successes
                } else {
                    0
                };
                (
                    *entry.key(),
                    s.requests.load(Ordering::Relaxed),
                    successes,
                    s.failures.load(Ordering::Relaxed),
                    mean,
                )
            })
            .collect();
        rows.sort_by_key(|row| row.0);
        rows
    }
}

/// Backend operations, one method per REST endpoint.
///
/// Session controllers hold a `dyn ExplorerBackend`, so tests can substitute a
/// scripted implementation without a network.
#[async_trait]
pub trait ExplorerBackend: Send + Sync {
    /// GET /api/attacks
    async fn list_attacks(&self) -> Result<Vec<String>, ClientError>;

    /// GET /api/defenses
    async fn list_defenses(&self) -> Result<Vec<String>, ClientError>;

    /// POST /api/generate_adversarial
    async fn generate_adversarial(&self, req: &GenerateRequest)
        -> Result<AttackOutcome, ClientError>;

    /// POST /api/compare_attacks
    async fn compare_attacks(
        &self,
        req: &CompareAttacksRequest,
    ) -> Result<AttackComparison, ClientError>;

    /// POST /api/evaluate_defense
    async fn evaluate_defense(
        &self,
        req: &EvaluateDefenseRequest,
    ) -> Result<DefenseEvaluation, ClientError>;

    /// POST /api/compare_defenses
    async fn compare_defenses(
        &self,
        req: &CompareDefensesRequest,
    ) -> Result<DefenseComparison, ClientError>;

    /// GET /api/precomputed/{name}, raw image bytes
    async fn fetch_precomputed(&self, chart: PrecomputedChart) -> Result<Vec<u8>, ClientError>;

    /// GET /static/{path}, raw bytes plus Content-Type
    async fn fetch_static(&self, path: &str) -> Result<(String, Vec<u8>), ClientError>;
}

/// reqwest-backed implementation of [`ExplorerBackend`]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    stats: Arc<BackendStats>,
}

impl HttpBackend {
    /// Create a backend client with the given base URL and request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            stats: Arc::new(BackendStats::default()),
        }
    }

    pub fn from_config(config: &crate::ExplorerConfig) -> Self {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> Arc<BackendStats> {
        Arc::clone(&self.stats)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
    ) -> Result<T, ClientError> {
        let url = format!("{}/api/{}", self.base_url, endpoint);
        let start = Instant::now();
        let result = async {
            let response = self.client.get(&url).send().await?;
            decode_json(response).await
        }
        .await;
        self.finish(endpoint, start, result)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = format!("{}/api/{}", self.base_url, endpoint);
        let start = Instant::now();
        let result = async {
            let response = self.client.post(&url).json(body).send().await?;
            decode_json(response).await
        }
        .await;
        self.finish(endpoint, start, result)
    }

    async fn get_bytes(
        &self,
        endpoint: &'static str,
        url: String,
    ) -> Result<(String, Vec<u8>), ClientError> {
        let start = Instant::now();
        let result = async {
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            let mime = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let bytes = response.bytes().await?.to_vec();
            if !status.is_success() {
                return Err(rejection(status, &String::from_utf8_lossy(&bytes)));
            }
            Ok((mime, bytes))
        }
        .await;
        self.finish(endpoint, start, result)
    }

    fn finish<T>(
        &self,
        endpoint: &'static str,
        start: Instant,
        result: Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let latency = start.elapsed().as_millis() as u64;
        self.stats.record(endpoint, result.is_ok(), latency);
        match &result {
            Ok(_) => debug!(endpoint, latency_ms = latency, "Backend call succeeded"),
            Err(e) => warn!(endpoint, error = %e, "Backend call failed"),
        }
        result
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(rejection(status, &text));
    }
    Ok(serde_json::from_str(&text)?)
}

/// Build a Rejected error, preferring the backend's `{"error": ...}` body.
fn rejection(status: StatusCode, body: &str) -> ClientError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                trimmed.to_string()
            }
        });
    ClientError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ExplorerBackend for HttpBackend {
    async fn list_attacks(&self) -> Result<Vec<String>, ClientError> {
        let response: AttackListResponse = self.get_json("attacks").await?;
        Ok(response.attacks)
    }

    async fn list_defenses(&self) -> Result<Vec<String>, ClientError> {
        let response: DefenseListResponse = self.get_json("defenses").await?;
        Ok(response.defenses)
    }

    async fn generate_adversarial(
        &self,
        req: &GenerateRequest,
    ) -> Result<AttackOutcome, ClientError> {
        req.validate()?;
        self.post_json("generate_adversarial", req).await
    }

    async fn compare_attacks(
        &self,
        req: &CompareAttacksRequest,
    ) -> Result<AttackComparison, ClientError> {
        req.validate()?;
        self.post_json("compare_attacks", req).await
    }

    async fn evaluate_defense(
        &self,
        req: &EvaluateDefenseRequest,
    ) -> Result<DefenseEvaluation, ClientError> {
        req.validate()?;
        self.post_json("evaluate_defense", req).await
    }

    async fn compare_defenses(
        &self,
        req: &CompareDefensesRequest,
    ) -> Result<DefenseComparison, ClientError> {
        req.validate()?;
        self.post_json("compare_defenses", req).await
    }

    async fn fetch_precomputed(&self, chart: PrecomputedChart) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}/api/precomputed/{}", self.base_url, chart.as_str());
        let (_, bytes) = self.get_bytes("precomputed", url).await?;
        Ok(bytes)
    }

    async fn fetch_static(&self, path: &str) -> Result<(String, Vec<u8>), ClientError> {
        let url = format!("{}/static/{}", self.base_url, path.trim_start_matches('/'));
        self.get_bytes("static", url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ImagePayload {
        ImagePayload::from_bytes("image/png", b"pixels").unwrap()
    }

    #[test]
    fn generate_request_validates_shape() {
        let ok = GenerateRequest::new(&payload(), "fgsm", 0.03);
        assert!(ok.validate().is_ok());

        let mut bad = ok.clone();
        bad.attack_type = "  ".to_string();
        assert!(matches!(bad.validate(), Err(ClientError::InvalidInput(_))));

        let mut bad = ok.clone();
        bad.epsilon = f64::NAN;
        assert!(matches!(bad.validate(), Err(ClientError::InvalidInput(_))));

        let mut bad = ok;
        bad.image = format!("data:image/png;base64,{}", bad.image);
        assert!(matches!(bad.validate(), Err(ClientError::InvalidInput(_))));
    }

    #[test]
    fn compare_request_rejects_empty_attack_list() {
        let req = CompareAttacksRequest::new(&payload(), &[], 0.03);
        assert!(matches!(req.validate(), Err(ClientError::InvalidInput(_))));
    }

    #[test]
    fn defense_requests_validate_names() {
        let req = EvaluateDefenseRequest {
            model_name: String::new(),
            attack_type: "pgd".to_string(),
            epsilon: 0.05,
        };
        assert!(matches!(req.validate(), Err(ClientError::InvalidInput(_))));

        let req = CompareDefensesRequest {
            model_names: vec!["best_standard_model.pth".to_string()],
            attack_type: "pgd".to_string(),
            epsilon: 0.05,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejection_prefers_backend_error_body() {
        let err = rejection(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error": "model not found"}"#);
        match err {
            ClientError::Rejected { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "model not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejection_falls_back_to_status_reason() {
        let err = rejection(StatusCode::NOT_FOUND, "");
        match err {
            ClientError::Rejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn chart_names_round_trip() {
        for chart in PrecomputedChart::ALL {
            assert_eq!(chart.as_str().parse::<PrecomputedChart>().unwrap(), chart);
        }
        assert!("nonsense".parse::<PrecomputedChart>().is_err());
    }

    #[test]
    fn stats_snapshot_tracks_outcomes() {
        let stats = BackendStats::default();
        stats.record("generate_adversarial", true, 120);
        stats.record("generate_adversarial", true, 80);
        stats.record("generate_adversarial", false, 0);
        let rows = stats.snapshot();
        assert_eq!(rows, vec![("generate_adversarial", 3, 2, 1, 100)]);
    }

    #[test]
    fn malformed_response_is_a_typed_error() {
        let parsed: Result<AttackOutcome, _> =
            serde_json::from_str(r#"{"original_image": "abc"}"#);
        assert!(parsed.is_err());
    }
}
