//! Session controllers for the explorer workflows
//!
//! Each controller owns the transient state of one view: the selected
//! parameters, the current image, and the outcome of the last backend action.
//! Every action moves through the same lifecycle, `Idle -> Loading ->
//! (Success | Failed)`, and returns to `Idle` when an input change invalidates
//! the displayed result.
//!
//! Responses are fenced with a per-action sequence id: a completion is applied
//! only when it belongs to the most recently issued request, so a slow stale
//! response can never overwrite a newer one. `cancel` bumps the sequence,
//! which discards the in-flight response on arrival.

use crate::client::{
    AttackComparison, AttackOutcome, ClientError, CompareAttacksRequest, CompareDefensesRequest,
    DefenseComparison, DefenseEvaluation, EvaluateDefenseRequest, ExplorerBackend,
    GenerateRequest, PrecomputedChart,
};
use crate::image::{ImageError, ImagePayload};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced directly by a controller, before any network call
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Please upload an image first.")]
    NoImage,

    #[error("unknown attack type \"{0}\"")]
    UnknownAttack(String),

    #[error("unknown defense model \"{0}\"")]
    UnknownModel(String),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Backend(#[from] ClientError),
}

/// Lifecycle of one user-triggered action
#[derive(Debug, Clone, Default)]
pub enum Phase<T> {
    #[default]
    Idle,
    Loading,
    Success(T),
    Failed(String),
}

impl<T> Phase<T> {
    pub fn is_idle(&self) -> bool {
        matches!(self, Phase::Idle)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Phase::Loading)
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Phase::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            Phase::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Handle tying a completion to the request that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    seq: u64,
}

#[derive(Debug)]
struct Slot<T> {
    phase: Phase<T>,
    seq: u64,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            seq: 0,
        }
    }

    fn begin(&mut self) -> RequestTicket {
        self.seq += 1;
        self.phase = Phase::Loading;
        RequestTicket { seq: self.seq }
    }

    /// Apply a completion. Returns false when the ticket is stale, in which
    /// case the current phase is left untouched.
    fn settle(&mut self, ticket: RequestTicket, result: Result<T, ClientError>) -> bool {
        if ticket.seq != self.seq {
            debug!(
                ticket = ticket.seq,
                current = self.seq,
                "Discarding stale response"
            );
            return false;
        }
        self.phase = match result {
            Ok(value) => Phase::Success(value),
            Err(e) => Phase::Failed(e.to_string()),
        };
        true
    }

    /// Invalidate the in-flight request (if any) and return to Idle.
    fn reset(&mut self) {
        self.seq += 1;
        self.phase = Phase::Idle;
    }
}

/// Inclusive epsilon bound with a slider step
#[derive(Debug, Clone, Copy)]
pub struct EpsilonRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Bound for adversarial generation and attack comparison
pub const ATTACK_EPSILON: EpsilonRange = EpsilonRange {
    min: 0.001,
    max: 0.1,
    step: 0.001,
};

/// Bound for defense evaluation. Deliberately distinct from the attack bound;
/// the two contexts are tuned independently.
pub const DEFENSE_EPSILON: EpsilonRange = EpsilonRange {
    min: 0.01,
    max: 0.1,
    step: 0.01,
};

impl EpsilonRange {
    /// Clamp into the bound and snap to the nearest step.
    pub fn clamp(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.min;
        }
        let clamped = value.clamp(self.min, self.max);
        let steps = ((clamped - self.min) / self.step).round();
        // Both ranges use steps of at least 0.001, so rounding to six decimal
        // places only removes float drift from the multiplication.
        let snapped = ((self.min + steps * self.step) * 1e6).round() / 1e6;
        snapped.clamp(self.min, self.max)
    }
}

/// Controller for the attack workflow: upload an image, pick an attack and a
/// perturbation budget, generate a single adversarial example or compare the
/// whole attack catalog.
pub struct AttackSession {
    backend: Arc<dyn ExplorerBackend>,
    attacks: Vec<String>,
    attack_type: String,
    epsilon: f64,
    image: Option<ImagePayload>,
    generation: Slot<AttackOutcome>,
    comparison: Slot<AttackComparison>,
}

impl AttackSession {
    /// `fallback_attacks` is the catalog used until (and unless) a refresh
    /// from the backend succeeds. Injected explicitly so the default is part
    /// of the construction contract rather than a buried rescue path.
    pub fn new(backend: Arc<dyn ExplorerBackend>, fallback_attacks: Vec<String>) -> Self {
        let attack_type = fallback_attacks
            .first()
            .cloned()
            .unwrap_or_else(|| "fgsm".to_string());
        Self {
            backend,
            attacks: fallback_attacks,
            attack_type,
            epsilon: 0.03,
            image: None,
            generation: Slot::new(),
            comparison: Slot::new(),
        }
    }

    /// Replace the catalog from `/api/attacks`; a failure keeps the fallback.
    pub async fn refresh_catalog(&mut self) {
        match self.backend.list_attacks().await {
            Ok(attacks) if !attacks.is_empty() => {
                if !attacks.contains(&self.attack_type) {
                    self.attack_type = attacks[0].clone();
                }
                self.attacks = attacks;
            }
            Ok(_) => warn!("Backend returned an empty attack catalog, keeping fallback"),
            Err(e) => warn!(error = %e, "Could not refresh attack catalog, keeping fallback"),
        }
    }

    pub fn attacks(&self) -> &[String] {
        &self.attacks
    }

    pub fn attack_type(&self) -> &str {
        &self.attack_type
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn image(&self) -> Option<&ImagePayload> {
        self.image.as_ref()
    }

    pub fn generation(&self) -> &Phase<AttackOutcome> {
        &self.generation.phase
    }

    pub fn comparison(&self) -> &Phase<AttackComparison> {
        &self.comparison.phase
    }

    pub fn set_attack_type(&mut self, attack: &str) -> Result<(), SessionError> {
        if !self.attacks.iter().any(|a| a == attack) {
            return Err(SessionError::UnknownAttack(attack.to_string()));
        }
        self.attack_type = attack.to_string();
        Ok(())
    }

    pub fn set_epsilon(&mut self, value: f64) {
        self.epsilon = ATTACK_EPSILON.clamp(value);
    }

    /// A new image invalidates any displayed result.
    pub fn set_image(&mut self, image: ImagePayload) {
        self.image = Some(image);
        self.generation.reset();
        self.comparison.reset();
    }

    pub fn clear_image(&mut self) {
        self.image = None;
        self.generation.reset();
        self.comparison.reset();
    }

    /// Fetch one of the backend's sample inputs and use it as the image.
    pub async fn load_sample(&mut self, name: &str) -> Result<(), SessionError> {
        let (mime, bytes) = self
            .backend
            .fetch_static(&format!("samples/{name}"))
            .await?;
        let payload = ImagePayload::from_bytes(&mime, &bytes)?;
        self.set_image(payload);
        Ok(())
    }

    /// Start a generation: validates the image is present, moves to Loading,
    /// and returns the ticket plus the request to send. No network call is
    /// made here, which keeps the fencing logic testable in isolation.
    pub fn begin_generate(&mut self) -> Result<(RequestTicket, GenerateRequest), SessionError> {
        let image = self.image.as_ref().ok_or(SessionError::NoImage)?;
        let request = GenerateRequest::new(image, &self.attack_type, self.epsilon);
        Ok((self.generation.begin(), request))
    }

    pub fn apply_generate(
        &mut self,
        ticket: RequestTicket,
        result: Result<AttackOutcome, ClientError>,
    ) -> bool {
        self.generation.settle(ticket, result)
    }

    /// Run a generation end to end against the session's backend.
    pub async fn generate(&mut self) -> Result<(), SessionError> {
        let (ticket, request) = self.begin_generate()?;
        let result = self.backend.generate_adversarial(&request).await;
        self.apply_generate(ticket, result);
        Ok(())
    }

    /// Start a comparison across the full attack catalog.
    pub fn begin_compare(
        &mut self,
    ) -> Result<(RequestTicket, CompareAttacksRequest), SessionError> {
        let image = self.image.as_ref().ok_or(SessionError::NoImage)?;
        let request = CompareAttacksRequest::new(image, &self.attacks, self.epsilon);
        Ok((self.comparison.begin(), request))
    }

    pub fn apply_compare(
        &mut self,
        ticket: RequestTicket,
        result: Result<AttackComparison, ClientError>,
    ) -> bool {
        self.comparison.settle(ticket, result)
    }

    pub async fn compare(&mut self) -> Result<(), SessionError> {
        let (ticket, request) = self.begin_compare()?;
        let result = self.backend.compare_attacks(&request).await;
        self.apply_compare(ticket, result);
        Ok(())
    }

    pub fn cancel_generate(&mut self) {
        self.generation.reset();
    }

    pub fn cancel_compare(&mut self) {
        self.comparison.reset();
    }
}

/// Controller for the defense workflow: pick a model, an attack, and a
/// perturbation budget, then evaluate it or compare the whole model catalog.
pub struct DefenseSession {
    backend: Arc<dyn ExplorerBackend>,
    models: Vec<String>,
    model_name: String,
    attack_type: String,
    epsilon: f64,
    evaluation: Slot<DefenseEvaluation>,
    comparison: Slot<DefenseComparison>,
}

impl DefenseSession {
    pub fn new(backend: Arc<dyn ExplorerBackend>, fallback_models: Vec<String>) -> Self {
        let model_name = fallback_models.first().cloned().unwrap_or_default();
        Self {
            backend,
            models: fallback_models,
            model_name,
            attack_type: "pgd".to_string(),
            epsilon: 0.03,
            evaluation: Slot::new(),
            comparison: Slot::new(),
        }
    }

    /// Replace the catalog from `/api/defenses`; a failure keeps the fallback.
    pub async fn refresh_catalog(&mut self) {
        match self.backend.list_defenses().await {
            Ok(models) if !models.is_empty() => {
                if !models.contains(&self.model_name) {
                    self.model_name = models[0].clone();
                }
                self.models = models;
            }
            Ok(_) => warn!("Backend returned an empty defense catalog, keeping fallback"),
            Err(e) => warn!(error = %e, "Could not refresh defense catalog, keeping fallback"),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn attack_type(&self) -> &str {
        &self.attack_type
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn evaluation(&self) -> &Phase<DefenseEvaluation> {
        &self.evaluation.phase
    }

    pub fn comparison(&self) -> &Phase<DefenseComparison> {
        &self.comparison.phase
    }

    pub fn set_model(&mut self, model: &str) -> Result<(), SessionError> {
        if !self.models.iter().any(|m| m == model) {
            return Err(SessionError::UnknownModel(model.to_string()));
        }
        self.model_name = model.to_string();
        self.evaluation.reset();
        Ok(())
    }

    pub fn set_attack_type(&mut self, attack: &str) {
        self.attack_type = attack.to_string();
    }

    pub fn set_epsilon(&mut self, value: f64) {
        self.epsilon = DEFENSE_EPSILON.clamp(value);
    }

    pub fn begin_evaluate(&mut self) -> (RequestTicket, EvaluateDefenseRequest) {
        let request = EvaluateDefenseRequest {
            model_name: self.model_name.clone(),
            attack_type: self.attack_type.clone(),
            epsilon: self.epsilon,
        };
        (self.evaluation.begin(), request)
    }

    pub fn apply_evaluate(
        &mut self,
        ticket: RequestTicket,
        result: Result<DefenseEvaluation, ClientError>,
    ) -> bool {
        self.evaluation.settle(ticket, result)
    }

    pub async fn evaluate(&mut self) {
        let (ticket, request) = self.begin_evaluate();
        let result = self.backend.evaluate_defense(&request).await;
        self.apply_evaluate(ticket, result);
    }

    /// Compare the full model catalog under the current attack settings.
    pub fn begin_compare(&mut self) -> (RequestTicket, CompareDefensesRequest) {
        let request = CompareDefensesRequest {
            model_names: self.models.clone(),
            attack_type: self.attack_type.clone(),
            epsilon: self.epsilon,
        };
        (self.comparison.begin(), request)
    }

    pub fn apply_compare(
        &mut self,
        ticket: RequestTicket,
        result: Result<DefenseComparison, ClientError>,
    ) -> bool {
        self.comparison.settle(ticket, result)
    }

    pub async fn compare(&mut self) {
        let (ticket, request) = self.begin_compare();
        let result = self.backend.compare_defenses(&request).await;
        self.apply_compare(ticket, result);
    }

    pub fn cancel_evaluate(&mut self) {
        self.evaluation.reset();
    }

    pub fn cancel_compare(&mut self) {
        self.comparison.reset();
    }
}

/// Controller for the leaderboard view: loads the precomputed chart set.
pub struct LeaderboardSession {
    backend: Arc<dyn ExplorerBackend>,
    charts: Slot<Vec<(PrecomputedChart, Vec<u8>)>>,
}

impl LeaderboardSession {
    pub fn new(backend: Arc<dyn ExplorerBackend>) -> Self {
        Self {
            backend,
            charts: Slot::new(),
        }
    }

    pub fn charts(&self) -> &Phase<Vec<(PrecomputedChart, Vec<u8>)>> {
        &self.charts.phase
    }

    /// Fetch every known precomputed chart. Charts the backend does not have
    /// are skipped; a transport failure fails the whole load.
    pub async fn load(&mut self) {
        let ticket = self.charts.begin();
        let mut loaded = Vec::new();
        let mut failure = None;
        for chart in PrecomputedChart::ALL {
            match self.backend.fetch_precomputed(chart).await {
                Ok(bytes) => loaded.push((chart, bytes)),
                Err(ClientError::Rejected { status: 404, .. }) => {
                    debug!(chart = chart.as_str(), "Chart not available, skipping");
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let result = match failure {
            Some(e) => Err(e),
            None => Ok(loaded),
        };
        self.charts.settle(ticket, result);
    }

    pub fn cancel(&mut self) {
        self.charts.reset();
    }
}
