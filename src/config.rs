//! Enhancer configuration management
//!
//! The configuration is an explicit value owned by the [`Enhancer`] instance
//! (never a process-wide singleton). Runtime updates go through
//! [`EnhancerConfig::apply_update`], which validates every recognized key and
//! rejects the whole update — naming the offending keys — rather than
//! silently dropping anything.
//!
//! [`Enhancer`]: crate::enhancer::Enhancer

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How aggressively fusion supplements the original description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancementLevel {
    Low,
    Medium,
    High,
}

impl Default for EnhancementLevel {
    fn default() -> Self {
        EnhancementLevel::Medium
    }
}

impl FromStr for EnhancementLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(EnhancementLevel::Low),
            "medium" => Ok(EnhancementLevel::Medium),
            "high" => Ok(EnhancementLevel::High),
            other => Err(Error::Config(format!(
                "unknown enhancement_level '{other}' (expected low/medium/high)"
            ))),
        }
    }
}

impl fmt::Display for EnhancementLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnhancementLevel::Low => "low",
            EnhancementLevel::Medium => "medium",
            EnhancementLevel::High => "high",
        };
        f.write_str(s)
    }
}

/// Strategy used to merge the original description with inferred supplements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    /// Inline up to two technical phrases plus one consistency parenthetical.
    Natural,
    /// Labeled technical-specs and consistency-requirements lines, no cap.
    Structured,
    /// A single bracketed suffix with at most one phrase of each kind.
    Minimal,
    /// LLM-delegated fusion with a deterministic fallback.
    Intelligent,
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::Intelligent
    }
}

impl FromStr for FusionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "natural" => Ok(FusionStrategy::Natural),
            "structured" => Ok(FusionStrategy::Structured),
            "minimal" => Ok(FusionStrategy::Minimal),
            "intelligent" => Ok(FusionStrategy::Intelligent),
            other => Err(Error::Config(format!(
                "unknown fusion_strategy '{other}' (expected natural/structured/minimal/intelligent)"
            ))),
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FusionStrategy::Natural => "natural",
            FusionStrategy::Structured => "structured",
            FusionStrategy::Minimal => "minimal",
            FusionStrategy::Intelligent => "intelligent",
        };
        f.write_str(s)
    }
}

/// Weights and bounds for the fusion quality score.
///
/// These are empirically chosen defaults, not invariants; integrators may
/// tune them per project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Weight of the length-balance component
    pub length_weight: f64,

    /// Weight of the information-density component
    pub density_weight: f64,

    /// Weight of the coherence component
    pub coherence_weight: f64,

    /// Lower bound of the ideal enhanced-description length (chars)
    pub min_length: usize,

    /// Upper bound of the ideal enhanced-description length (chars)
    pub max_length: usize,

    /// Number of supplements that counts as full information density
    pub density_target: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            length_weight: 0.3,
            density_weight: 0.3,
            coherence_weight: 0.4,
            min_length: 100,
            max_length: 250,
            density_target: 4,
        }
    }
}

/// User-extensible keyword and template overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomRules {
    /// Extra vocabulary treated as technical keywords
    #[serde(default)]
    pub technical_keywords: Vec<String>,

    /// Extra vocabulary treated as consistency keywords
    #[serde(default)]
    pub consistency_keywords: Vec<String>,

    /// Section label overrides, keyed by section name
    #[serde(default)]
    pub enhancement_templates: std::collections::HashMap<String, String>,
}

/// Performance knobs persisted alongside the functional settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub cache_enabled: bool,
    pub cache_size: usize,
    pub batch_processing: bool,
    pub max_batch_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_size: 1000,
            batch_processing: false,
            max_batch_size: 10,
        }
    }
}

/// Enhancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancerConfig {
    /// Run the technical-details analyzer
    pub enable_technical_details: bool,

    /// Run consistency detection and injection
    pub enable_consistency_injection: bool,

    /// Supplement aggressiveness
    pub enhancement_level: EnhancementLevel,

    /// Fusion strategy
    pub fusion_strategy: FusionStrategy,

    /// Minimum acceptable fusion score; below it the quality gate re-runs
    /// once with the natural strategy
    pub quality_threshold: f64,

    /// Language model call timeout in seconds
    pub llm_timeout_secs: u64,

    /// Quality-score weights and bounds
    #[serde(default)]
    pub quality: QualityConfig,

    /// Performance knobs
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// User-extensible keyword/template overrides
    #[serde(default)]
    pub custom_rules: CustomRules,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            enable_technical_details: true,
            enable_consistency_injection: true,
            enhancement_level: EnhancementLevel::Medium,
            fusion_strategy: FusionStrategy::Intelligent,
            quality_threshold: 0.3,
            llm_timeout_secs: 60,
            quality: QualityConfig::default(),
            performance: PerformanceConfig::default(),
            custom_rules: CustomRules::default(),
        }
    }
}

impl EnhancerConfig {
    /// The configured language model timeout as a [`Duration`].
    ///
    /// [`Duration`]: std::time::Duration
    pub fn llm_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.llm_timeout_secs)
    }

    /// Load configuration from `enhancer_config.json`, falling back to the
    /// defaults when the file is missing.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => {
                let config: EnhancerConfig = serde_json::from_str(&data)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Persist configuration to `enhancer_config.json`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Check internal consistency of the loaded values.
    pub fn validate(&self) -> Result<()> {
        let mut invalid = Vec::new();
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            invalid.push("quality_threshold");
        }
        if self.quality.min_length >= self.quality.max_length {
            invalid.push("quality.min_length/max_length");
        }
        if self.quality.density_target == 0 {
            invalid.push("quality.density_target");
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "invalid configuration keys: {}",
                invalid.join(", ")
            )))
        }
    }

    /// Apply a runtime update. Either every provided key is valid and the
    /// config is mutated, or nothing changes and the offending keys are
    /// reported.
    pub fn apply_update(&mut self, update: ConfigUpdate) -> Result<()> {
        let mut invalid = Vec::new();

        let mut level = None;
        if let Some(ref s) = update.enhancement_level {
            match s.parse::<EnhancementLevel>() {
                Ok(v) => level = Some(v),
                Err(_) => invalid.push(format!("enhancement_level={s}")),
            }
        }

        let mut strategy = None;
        if let Some(ref s) = update.fusion_strategy {
            match s.parse::<FusionStrategy>() {
                Ok(v) => strategy = Some(v),
                Err(_) => invalid.push(format!("fusion_strategy={s}")),
            }
        }

        if let Some(t) = update.quality_threshold {
            if !(0.0..=1.0).contains(&t) {
                invalid.push(format!("quality_threshold={t}"));
            }
        }

        if !invalid.is_empty() {
            return Err(Error::Config(format!(
                "rejected configuration update: {}",
                invalid.join(", ")
            )));
        }

        if let Some(v) = update.enable_technical_details {
            self.enable_technical_details = v;
        }
        if let Some(v) = update.enable_consistency_injection {
            self.enable_consistency_injection = v;
        }
        if let Some(v) = level {
            self.enhancement_level = v;
        }
        if let Some(v) = strategy {
            self.fusion_strategy = v;
        }
        if let Some(v) = update.quality_threshold {
            self.quality_threshold = v;
        }
        Ok(())
    }
}

/// Recognized keys of a runtime configuration update.
///
/// Enum-valued keys arrive as strings so hosts can forward user input
/// directly; parsing happens inside [`EnhancerConfig::apply_update`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_technical_details: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_consistency_injection: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhancement_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion_strategy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EnhancerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fusion_strategy, FusionStrategy::Intelligent);
        assert_eq!(config.enhancement_level, EnhancementLevel::Medium);
    }

    #[test]
    fn test_apply_update_valid_keys() {
        let mut config = EnhancerConfig::default();
        let update = ConfigUpdate {
            fusion_strategy: Some("natural".to_string()),
            quality_threshold: Some(0.7),
            enable_technical_details: Some(false),
            ..Default::default()
        };
        config.apply_update(update).unwrap();
        assert_eq!(config.fusion_strategy, FusionStrategy::Natural);
        assert_eq!(config.quality_threshold, 0.7);
        assert!(!config.enable_technical_details);
    }

    #[test]
    fn test_apply_update_rejects_unknown_enum() {
        let mut config = EnhancerConfig::default();
        let update = ConfigUpdate {
            fusion_strategy: Some("telepathic".to_string()),
            quality_threshold: Some(0.9),
            ..Default::default()
        };
        let err = config.apply_update(update).unwrap_err();
        assert!(err.to_string().contains("telepathic"));
        // Nothing from the rejected update may land
        assert_eq!(config.fusion_strategy, FusionStrategy::Intelligent);
        assert_eq!(config.quality_threshold, 0.3);
    }

    #[test]
    fn test_apply_update_rejects_out_of_range_threshold() {
        let mut config = EnhancerConfig::default();
        let update = ConfigUpdate {
            quality_threshold: Some(1.5),
            ..Default::default()
        };
        let err = config.apply_update(update).unwrap_err();
        assert!(err.to_string().contains("quality_threshold"));
        assert_eq!(config.quality_threshold, 0.3);
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EnhancerConfig::load(&dir.path().join("enhancer_config.json"))
            .await
            .unwrap();
        assert_eq!(config.quality_threshold, 0.3);
    }

    #[tokio::test]
    async fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("enhancer_config.json");

        let mut config = EnhancerConfig::default();
        config.fusion_strategy = FusionStrategy::Minimal;
        config.quality_threshold = 0.5;
        config.save(&path).await.unwrap();

        let reloaded = EnhancerConfig::load(&path).await.unwrap();
        assert_eq!(reloaded.fusion_strategy, FusionStrategy::Minimal);
        assert_eq!(reloaded.quality_threshold, 0.5);
    }

    #[test]
    fn test_strategy_parse_round_trip() {
        for s in ["natural", "structured", "minimal", "intelligent"] {
            let parsed: FusionStrategy = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }
}
