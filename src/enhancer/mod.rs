//! Pipeline orchestration
//!
//! [`Enhancer`] wires the stages together: clothing-color pre-pass,
//! technical analysis, consistency extraction and content fusion, with a
//! quality gate that re-runs fusion once under the natural strategy when the
//! first attempt scores below the configured threshold.
//!
//! `enhance` is total. Every stage absorbs its own failures, so the worst
//! case for any input is the input handed back unchanged.

mod storyboard;

pub use storyboard::{ShotEnhancement, StoryboardEnhancement};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::colors::ColorResolver;
use crate::config::{ConfigUpdate, EnhancerConfig, FusionStrategy};
use crate::consistency::{ConsistencyInfo, ConsistencyInjector};
use crate::entities::store::EntityStore;
use crate::error::Result;
use crate::fusion::ContentFuser;
use crate::llm::LanguageModel;
use crate::technical::{TechnicalAnalyzer, TechnicalDetails};

/// Everything `enhance_with_details` knows about one enhancement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementReport {
    pub original_description: String,
    pub enhanced_description: String,
    pub technical_details: String,
    pub consistency_info: String,
    pub technical_additions: Vec<String>,
    pub consistency_additions: Vec<String>,
    pub quality_score: f64,
    pub strategy_used: FusionStrategy,
    pub config: EnhancerConfig,
}

/// Scene-description enhancement pipeline.
pub struct Enhancer {
    project_dir: PathBuf,
    store: Arc<EntityStore>,
    config: RwLock<EnhancerConfig>,
    colors: ColorResolver,
    analyzer: TechnicalAnalyzer,
    injector: ConsistencyInjector,
    fuser: ContentFuser,
}

impl Enhancer {
    /// Open (or initialize) the entity store under `project_dir` and build
    /// the pipeline around it.
    pub async fn open(project_dir: &Path, config: EnhancerConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(EntityStore::open(project_dir).await?);
        let colors = ColorResolver::new()?;
        let analyzer = TechnicalAnalyzer::new()?;
        let injector = ConsistencyInjector::new(store.clone());
        let fuser = ContentFuser::new(config.quality.clone())?;
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            store,
            config: RwLock::new(config),
            colors,
            analyzer,
            injector,
            fuser,
        })
    }

    /// Attach a language model for intelligent fusion. The per-call timeout
    /// comes from the config active at attach time.
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        let timeout = self.config.get_mut().llm_timeout();
        self.fuser = self.fuser.with_model(model, timeout);
        self
    }

    pub fn store(&self) -> Arc<EntityStore> {
        self.store.clone()
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> EnhancerConfig {
        self.config.read().await.clone()
    }

    /// Apply a partial config update. All keys are validated before any is
    /// applied; a rejected update leaves the previous config untouched.
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        let mut config = self.config.write().await;
        config.apply_update(update)?;
        tracing::info!("enhancer configuration updated");
        Ok(())
    }

    /// Enhance a single description. Total: any stage failure degrades to
    /// the stage's neutral output, never to an error.
    pub async fn enhance(&self, description: &str, characters: &[String]) -> String {
        self.enhance_with_details(description, characters)
            .await
            .enhanced_description
    }

    /// Enhance a single description, reporting everything the pipeline saw.
    pub async fn enhance_with_details(
        &self,
        description: &str,
        characters: &[String],
    ) -> EnhancementReport {
        let config = self.config.read().await.clone();
        if description.trim().is_empty() {
            return self.passthrough_report(description, config).await;
        }
        tracing::debug!(chars = description.chars().count(), "enhancing description");

        let original = description.to_string();
        let description = self.color_prepass(description).await;

        let technical = if config.enable_technical_details {
            self.analyzer.analyze(&description)
        } else {
            TechnicalDetails::default()
        };

        let consistency = if config.enable_consistency_injection {
            self.injector.extract(&description, characters).await
        } else {
            ConsistencyInfo::default()
        };

        let mut result = self
            .fuser
            .fuse(&description, &technical, &consistency, config.fusion_strategy)
            .await;

        // One retry under the natural strategy when the gate fails; that
        // result is used unconditionally.
        if result.quality_score < config.quality_threshold
            && result.strategy_applied != FusionStrategy::Natural
        {
            tracing::debug!(
                score = result.quality_score,
                threshold = config.quality_threshold,
                "quality below threshold, retrying with natural fusion"
            );
            result = self
                .fuser
                .fuse(&description, &technical, &consistency, FusionStrategy::Natural)
                .await;
        }

        EnhancementReport {
            original_description: original,
            enhanced_description: result.enhanced_description,
            technical_details: technical.to_description(),
            consistency_info: consistency.to_description(),
            technical_additions: result.technical_additions,
            consistency_additions: result.consistency_additions,
            quality_score: result.quality_score,
            strategy_used: result.strategy_applied,
            config,
        }
    }

    async fn passthrough_report(&self, description: &str, config: EnhancerConfig) -> EnhancementReport {
        EnhancementReport {
            original_description: description.to_string(),
            enhanced_description: description.to_string(),
            technical_details: String::new(),
            consistency_info: String::new(),
            technical_additions: Vec::new(),
            consistency_additions: Vec::new(),
            quality_score: 0.0,
            strategy_used: config.fusion_strategy,
            config,
        }
    }

    /// Rewrite the description so each stored character mentioned in it
    /// wears their single canonical clothing color.
    async fn color_prepass(&self, description: &str) -> String {
        let snapshot = self.store.snapshot().await;
        let mut records: Vec<_> = snapshot.characters.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let mut text = description.to_string();
        for record in records {
            if record.name.is_empty() || !text.contains(record.name.as_str()) {
                continue;
            }
            let color = self.colors.character_primary_color(record);
            if color.is_empty() {
                continue;
            }
            text = self.colors.apply_to_text(&text, &record.name, &color);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::types::Character;
    use crate::llm::mock::{FailingModel, HangingModel, ScriptedModel};
    use tempfile::TempDir;

    async fn enhancer_with_fixtures(config: EnhancerConfig) -> (TempDir, Enhancer) {
        let dir = TempDir::new().unwrap();
        let enhancer = Enhancer::open(dir.path(), config).await.unwrap();

        let mut ye = Character::minimal("叶文洁");
        ye.appearance.hair = "短发".to_string();
        ye.clothing.colors = vec!["灰色".to_string()];
        ye.consistency_prompt = "中年女性，短发头发整齐，穿着灰色服装".to_string();
        enhancer.store().save_character("char_ye", ye).await.unwrap();

        (dir, enhancer)
    }

    #[tokio::test]
    async fn test_enhance_is_total_for_plain_text() {
        let (_dir, enhancer) = enhancer_with_fixtures(EnhancerConfig::default()).await;
        let out = enhancer.enhance("空旷的走廊尽头有一扇门", &[]).await;
        assert!(!out.is_empty());
    }

    #[tokio::test]
    async fn test_enhance_empty_input_passthrough() {
        let (_dir, enhancer) = enhancer_with_fixtures(EnhancerConfig::default()).await;
        assert_eq!(enhancer.enhance("", &[]).await, "");
        assert_eq!(enhancer.enhance("   ", &[]).await, "   ");
    }

    #[tokio::test]
    async fn test_enhance_total_under_model_failure() {
        let (_dir, enhancer) = enhancer_with_fixtures(EnhancerConfig::default()).await;
        let enhancer = enhancer.with_model(Arc::new(FailingModel));
        let out = enhancer
            .enhance("叶文洁凝视着屏幕", &["叶文洁".to_string()])
            .await;
        assert!(out.contains("叶文洁"));
        assert!(!out.is_empty());
    }

    #[tokio::test]
    async fn test_enhance_total_under_hanging_model() {
        let mut config = EnhancerConfig::default();
        config.llm_timeout_secs = 1;
        let (_dir, enhancer) = enhancer_with_fixtures(config).await;
        let enhancer = enhancer.with_model(Arc::new(HangingModel));
        let out = enhancer.enhance("叶文洁凝视着屏幕", &[]).await;
        assert!(!out.is_empty());
    }

    #[tokio::test]
    async fn test_model_reply_used_when_available() {
        let (_dir, enhancer) = enhancer_with_fixtures(EnhancerConfig::default()).await;
        let enhancer =
            enhancer.with_model(Arc::new(ScriptedModel::new("特写镜头下，叶文洁凝视着屏幕。")));
        let report = enhancer
            .enhance_with_details("叶文洁凝视着屏幕", &[])
            .await;
        assert_eq!(report.enhanced_description, "特写镜头下，叶文洁凝视着屏幕。");
        assert_eq!(report.strategy_used, FusionStrategy::Intelligent);
        assert_eq!(report.quality_score, 0.85);
    }

    #[tokio::test]
    async fn test_color_prepass_enforces_canonical_color() {
        let (_dir, enhancer) = enhancer_with_fixtures(EnhancerConfig::default()).await;
        let out = enhancer
            .enhance("叶文洁穿着蓝色衣服站在走廊里", &[])
            .await;
        assert!(!out.contains("蓝色"), "got: {out}");
        assert!(out.contains("灰色"));
    }

    #[tokio::test]
    async fn test_report_keeps_callers_input_verbatim() {
        let (_dir, enhancer) = enhancer_with_fixtures(EnhancerConfig::default()).await;
        let input = "叶文洁穿着蓝色衣服站在走廊里";
        let report = enhancer.enhance_with_details(input, &[]).await;
        // The color pre-pass rewrites pipeline state, not the record of
        // what the caller asked for
        assert_eq!(report.original_description, input);
        assert!(!report.enhanced_description.contains("蓝色"));
    }

    #[tokio::test]
    async fn test_quality_gate_retries_with_natural() {
        let mut config = EnhancerConfig::default();
        config.fusion_strategy = FusionStrategy::Minimal;
        config.quality_threshold = 0.99; // force the gate to fail
        let (_dir, enhancer) = enhancer_with_fixtures(config).await;
        let report = enhancer
            .enhance_with_details("叶文洁凝视着屏幕", &[])
            .await;
        assert_eq!(report.strategy_used, FusionStrategy::Natural);
    }

    #[tokio::test]
    async fn test_disabled_stages_contribute_nothing() {
        let mut config = EnhancerConfig::default();
        config.enable_technical_details = false;
        config.enable_consistency_injection = false;
        config.fusion_strategy = FusionStrategy::Structured;
        let (_dir, enhancer) = enhancer_with_fixtures(config).await;
        let report = enhancer
            .enhance_with_details("特写镜头下叶文洁凝视着屏幕", &[])
            .await;
        assert_eq!(report.technical_details, "");
        assert_eq!(report.consistency_info, "");
        assert!(!report.enhanced_description.contains("技术规格"));
    }

    #[tokio::test]
    async fn test_update_config_rejects_and_retains() {
        let (_dir, enhancer) = enhancer_with_fixtures(EnhancerConfig::default()).await;
        let before = enhancer.config().await;
        let update = ConfigUpdate {
            fusion_strategy: Some("dramatic".to_string()),
            quality_threshold: Some(0.5),
            ..Default::default()
        };
        let err = enhancer.update_config(update).await.unwrap_err();
        assert!(err.to_string().contains("fusion_strategy"));
        let after = enhancer.config().await;
        assert_eq!(after.quality_threshold, before.quality_threshold);
        assert_eq!(after.fusion_strategy, before.fusion_strategy);
    }

    #[tokio::test]
    async fn test_update_config_applies_valid_update() {
        let (_dir, enhancer) = enhancer_with_fixtures(EnhancerConfig::default()).await;
        let update = ConfigUpdate {
            fusion_strategy: Some("minimal".to_string()),
            ..Default::default()
        };
        enhancer.update_config(update).await.unwrap();
        assert_eq!(enhancer.config().await.fusion_strategy, FusionStrategy::Minimal);
    }
}
