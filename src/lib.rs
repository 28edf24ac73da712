//! Adversarial Attacks Explorer client
//!
//! This crate provides:
//! - Image ingestion and normalization to the backend's base64 wire format
//! - A typed REST client for the adversarial-attack/defense backend
//! - Session controllers for the attack, defense, and leaderboard workflows

pub mod client;
pub mod image;
pub mod session;

pub use client::{ClientError, ExplorerBackend, HttpBackend};
pub use image::ImagePayload;
pub use session::{AttackSession, DefenseSession, LeaderboardSession, Phase};

/// Configuration for the explorer client
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExplorerConfig {
    /// Base URL of the inference backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attack catalog used when `/api/attacks` is unreachable
    #[serde(default = "default_attacks")]
    pub fallback_attacks: Vec<String>,

    /// Defense-model catalog used when `/api/defenses` is unreachable
    #[serde(default = "default_defenses")]
    pub fallback_defenses: Vec<String>,
}

fn default_base_url() -> String {
    "https://saninets-adversarial-attacks-backend.hf.space".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_attacks() -> Vec<String> {
    ["fgsm", "pgd", "deepfool", "cw"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_defenses() -> Vec<String> {
    [
        "best_standard_model.pth",
        "best_adv_pgd_model.pth",
        "best_distill_model.pth",
        "best_progressive_pgd_model.pth",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            fallback_attacks: default_attacks(),
            fallback_defenses: default_defenses(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: ExplorerConfig = toml::from_str("base_url = \"http://localhost:5000\"")
            .expect("partial config should parse");
        assert_eq!(config.base_url, "http://localhost:5000");
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.fallback_attacks, vec!["fgsm", "pgd", "deepfool", "cw"]);
        assert_eq!(config.fallback_defenses.len(), 4);
    }

    #[test]
    fn empty_config_is_fully_defaulted() {
        let config: ExplorerConfig = toml::from_str("").expect("empty config should parse");
        assert!(config.base_url.starts_with("https://"));
        assert!(config.fallback_attacks.contains(&"cw".to_string()));
    }
}
