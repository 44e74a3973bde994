//! Content fusion
//!
//! [`ContentFuser`] merges an original shot description with inferred
//! technical details and retrieved consistency text. Four strategies trade
//! off fluency against completeness; the intelligent strategy may delegate
//! the merge to a language model and falls back to a deterministic strategy
//! picked by input shape when the model is absent or misbehaves.
//!
//! `fuse` is total: any internal failure degrades to the unmodified original
//! with a zero quality score.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::config::{FusionStrategy, QualityConfig};
use crate::consistency::ConsistencyInfo;
use crate::error::{Error, Result};
use crate::llm::{complete_bounded, LanguageModel};
use crate::technical::TechnicalDetails;

/// Appearance keywords anchoring character key-feature clauses.
const APPEARANCE_KEYWORDS: &[&str] = &["头发", "眼睛", "身高", "体型", "服装", "穿着", "戴着"];

/// Environment keywords anchoring scene key-feature clauses.
const ENVIRONMENT_KEYWORDS: &[&str] = &["光线", "氛围", "背景", "环境", "设备", "装饰"];

/// The outcome of one fusion call.
#[derive(Debug, Clone, Default)]
pub struct FusionResult {
    pub enhanced_description: String,
    pub technical_additions: Vec<String>,
    pub consistency_additions: Vec<String>,
    pub quality_score: f64,
    /// The strategy that actually produced the text. Differs from the
    /// requested one when intelligent fusion fell back.
    pub strategy_applied: FusionStrategy,
    /// True when the text came back from a language model rather than a
    /// deterministic strategy.
    pub model_generated: bool,
}

/// Inputs shared by all strategies, derived once per call.
struct Prepared {
    original: String,
    technical_parts: Vec<String>,
    consistency_parts: Vec<String>,
    original_chars: usize,
    has_terminal_punct: bool,
}

/// Merges description, technical details and consistency text.
pub struct ContentFuser {
    model: Option<Arc<dyn LanguageModel>>,
    model_timeout: Duration,
    quality: QualityConfig,
    doubled_punct: Regex,
    trailing_commas: Regex,
}

impl ContentFuser {
    pub fn new(quality: QualityConfig) -> Result<Self> {
        let doubled_punct = Regex::new(r"[，。]{2,}")
            .map_err(|e| Error::Fusion(format!("punctuation pattern: {e}")))?;
        let trailing_commas = Regex::new(r"[，,]+$")
            .map_err(|e| Error::Fusion(format!("trailing pattern: {e}")))?;
        Ok(Self {
            model: None,
            model_timeout: Duration::from_secs(60),
            quality,
            doubled_punct,
            trailing_commas,
        })
    }

    /// Attach a language model for the intelligent strategy.
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        self.model = Some(model);
        self.model_timeout = timeout;
        self
    }

    /// Merge the three inputs under `strategy`. Never errors.
    pub async fn fuse(
        &self,
        original: &str,
        technical: &TechnicalDetails,
        consistency: &ConsistencyInfo,
        strategy: FusionStrategy,
    ) -> FusionResult {
        let prepared = self.prepare(original, technical, consistency);
        tracing::debug!(
            %strategy,
            technical = prepared.technical_parts.len(),
            consistency = prepared.consistency_parts.len(),
            "fusing content"
        );

        let mut result = match strategy {
            FusionStrategy::Natural => self.natural(&prepared),
            FusionStrategy::Structured => self.structured(&prepared),
            FusionStrategy::Minimal => self.minimal(&prepared),
            FusionStrategy::Intelligent => self.intelligent(&prepared, consistency).await,
        };

        result.enhanced_description = self.tidy(&result.enhanced_description);
        if !result.model_generated {
            result.quality_score = self.score(&result);
        }
        tracing::debug!(score = result.quality_score, "fusion complete");
        result
    }

    fn prepare(
        &self,
        original: &str,
        technical: &TechnicalDetails,
        consistency: &ConsistencyInfo,
    ) -> Prepared {
        let trimmed = original.trim().to_string();
        let mut technical_parts = Vec::new();
        if !technical.shot_type.is_empty() {
            technical_parts.push(format!("{}镜头", technical.shot_type));
        }
        for field in [
            &technical.camera_angle,
            &technical.lighting,
            &technical.camera_movement,
            &technical.composition,
        ] {
            if !field.is_empty() {
                technical_parts.push(field.clone());
            }
        }

        let mut consistency_parts = Vec::new();
        for prompt in &consistency.characters {
            consistency_parts.extend(key_clauses(prompt, APPEARANCE_KEYWORDS, 20, 2));
        }
        for prompt in &consistency.scenes {
            consistency_parts.extend(key_clauses(prompt, ENVIRONMENT_KEYWORDS, 25, 1));
        }

        Prepared {
            original_chars: trimmed.chars().count(),
            has_terminal_punct: trimmed.ends_with(['。', '！', '？', '.', '!', '?']),
            original: trimmed,
            technical_parts,
            consistency_parts,
        }
    }

    /// Inline up to two technical phrases into the final clause, then append
    /// at most one consistency parenthetical.
    fn natural(&self, content: &Prepared) -> FusionResult {
        let mut result = FusionResult {
            strategy_applied: FusionStrategy::Natural,
            ..Default::default()
        };
        let mut text = content.original.clone();

        if !content.technical_parts.is_empty() {
            let picked: Vec<String> = content.technical_parts.iter().take(2).cloned().collect();
            let tech_text = picked.join("，");
            if content.has_terminal_punct {
                let trimmed = text.trim_end_matches(['。', '！', '？', '.', '!', '?']);
                text = format!("{trimmed}，{tech_text}。");
            } else {
                text = format!("{text}，{tech_text}");
            }
            result.technical_additions = picked;
        }

        if !content.consistency_parts.is_empty() {
            let picked: Vec<String> = content.consistency_parts.iter().take(2).cloned().collect();
            text.push_str(&format!("（{}）", picked.join("，")));
            result.consistency_additions = picked;
        }

        result.enhanced_description = text;
        result
    }

    /// Uncapped labeled sections on separate lines.
    fn structured(&self, content: &Prepared) -> FusionResult {
        let mut result = FusionResult {
            strategy_applied: FusionStrategy::Structured,
            ..Default::default()
        };
        let mut text = content.original.clone();

        if !content.technical_parts.is_empty() {
            text.push_str(&format!("\n技术规格：{}", content.technical_parts.join("，")));
            result.technical_additions = content.technical_parts.clone();
        }
        if !content.consistency_parts.is_empty() {
            text.push_str(&format!("\n一致性要求：{}", content.consistency_parts.join("，")));
            result.consistency_additions = content.consistency_parts.clone();
        }

        result.enhanced_description = text;
        result
    }

    /// One technical plus one consistency phrase in a single bracket suffix.
    fn minimal(&self, content: &Prepared) -> FusionResult {
        let mut result = FusionResult {
            strategy_applied: FusionStrategy::Minimal,
            ..Default::default()
        };
        let mut additions = Vec::new();

        if let Some(first) = content.technical_parts.first() {
            additions.push(first.clone());
            result.technical_additions = vec![first.clone()];
        }
        if let Some(first) = content.consistency_parts.first() {
            additions.push(first.clone());
            result.consistency_additions = vec![first.clone()];
        }

        result.enhanced_description = if additions.is_empty() {
            content.original.clone()
        } else {
            format!("{} [{}]", content.original, additions.join(","))
        };
        result
    }

    /// Model-backed merge when a model is attached, otherwise a deterministic
    /// strategy picked by input shape.
    async fn intelligent(&self, content: &Prepared, consistency: &ConsistencyInfo) -> FusionResult {
        if let Some(model) = &self.model {
            match self.model_fusion(model.as_ref(), content, consistency).await {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!(error = %e, "model fusion failed, using deterministic fallback");
                }
            }
        }
        self.shape_fallback(content)
    }

    /// Short originals with lots of supplements read better structured; long
    /// ones should stay minimal; the middle ground fuses naturally.
    fn shape_fallback(&self, content: &Prepared) -> FusionResult {
        let supplements = content.technical_parts.len() + content.consistency_parts.len();
        if content.original_chars < 20 && supplements > 3 {
            self.structured(content)
        } else if content.original_chars > 100 {
            self.minimal(content)
        } else {
            self.natural(content)
        }
    }

    async fn model_fusion(
        &self,
        model: &dyn LanguageModel,
        content: &Prepared,
        consistency: &ConsistencyInfo,
    ) -> Result<FusionResult> {
        // Embed each character's consistency text right after its name so the
        // model keeps the binding during the rewrite.
        let mut annotated = content.original.clone();
        for (name, prompt) in &consistency.character_details {
            let marker = format!("{name}（{prompt}）");
            if annotated.contains(name.as_str()) && !annotated.contains(&marker) {
                annotated = annotated.replacen(name.as_str(), &marker, 1);
            }
        }

        let technical_line = if content.technical_parts.is_empty() {
            "无".to_string()
        } else {
            content.technical_parts.join("、")
        };
        let prompt = format!(
            "请对以下画面描述进行智能增强，要求：\n\
             1. 保持原始描述的核心内容和风格\n\
             2. 自然融入提供的技术细节和一致性信息\n\
             3. 确保描述流畅自然，避免生硬拼接\n\
             4. 控制总长度在{}-{}字之间\n\n\
             原始描述：{}\n\n\
             技术细节补充：{}\n\n\
             请输出增强后的画面描述：",
            self.quality.min_length, self.quality.max_length, annotated, technical_line
        );

        let reply = complete_bounded(model, &prompt, self.model_timeout).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(Error::Fusion("model returned empty text".to_string()));
        }

        Ok(FusionResult {
            enhanced_description: reply.to_string(),
            technical_additions: content.technical_parts.clone(),
            consistency_additions: content.consistency_parts.clone(),
            quality_score: 0.85,
            strategy_applied: FusionStrategy::Intelligent,
            model_generated: true,
        })
    }

    /// Collapse doubled punctuation and turn a dangling comma into a period.
    fn tidy(&self, text: &str) -> String {
        let collapsed = self.doubled_punct.replace_all(text, "，");
        self.trailing_commas.replace(&collapsed, "。").into_owned()
    }

    /// Weighted sum of length balance, information density and coherence.
    fn score(&self, result: &FusionResult) -> f64 {
        let q = &self.quality;
        let length = result.enhanced_description.chars().count();

        let length_score = if length >= q.min_length && length <= q.max_length {
            1.0
        } else if length < q.min_length {
            length as f64 / q.min_length as f64
        } else {
            // Graceful decay past the upper bound, floored at 0.5
            ((q.max_length as f64 * 4.0 / 3.0) / length as f64).clamp(0.5, 1.0)
        };

        let additions = result.technical_additions.len() + result.consistency_additions.len();
        let density_score = (additions as f64 / q.density_target as f64).min(1.0);

        let mut coherence_score = 0.8;
        if result.enhanced_description.contains("，，")
            || result.enhanced_description.contains("。。")
        {
            coherence_score -= 0.2;
        }

        let score = length_score * q.length_weight
            + density_score * q.density_weight
            + coherence_score * q.coherence_weight;
        score.min(1.0)
    }
}

/// Clauses of `text` (split on 中文 comma) containing one of `keywords`,
/// shorter than `max_chars`, at most `limit` of them, one per keyword.
fn key_clauses(text: &str, keywords: &[&str], max_chars: usize, limit: usize) -> Vec<String> {
    let mut clauses = Vec::new();
    for keyword in keywords {
        if !text.contains(keyword) {
            continue;
        }
        let hit = text
            .split('，')
            .map(str::trim)
            .find(|clause| clause.contains(keyword) && clause.chars().count() < max_chars);
        if let Some(clause) = hit {
            let clause = clause.to_string();
            if !clauses.contains(&clause) {
                clauses.push(clause);
            }
        }
        if clauses.len() >= limit {
            break;
        }
    }
    clauses.truncate(limit);
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{FailingModel, ScriptedModel};
    use crate::technical::TechnicalAnalyzer;

    fn fuser() -> ContentFuser {
        ContentFuser::new(QualityConfig::default()).unwrap()
    }

    fn sample_technical() -> TechnicalDetails {
        TechnicalDetails {
            shot_type: "特写".to_string(),
            lighting: "人工光源".to_string(),
            ..Default::default()
        }
    }

    fn sample_consistency() -> ConsistencyInfo {
        ConsistencyInfo {
            character_names: vec!["叶文洁".to_string()],
            characters: vec!["中年女性，短发头发整齐，穿着灰色服装".to_string()],
            character_details: vec![(
                "叶文洁".to_string(),
                "中年女性，短发头发整齐，穿着灰色服装".to_string(),
            )],
            scene_names: vec![],
            scenes: vec![],
        }
    }

    #[tokio::test]
    async fn test_natural_fusion_inlines_and_parenthesizes() {
        let result = fuser()
            .fuse(
                "叶文洁凝视着屏幕。",
                &sample_technical(),
                &sample_consistency(),
                FusionStrategy::Natural,
            )
            .await;
        assert!(result.enhanced_description.contains("特写镜头"));
        assert!(result.enhanced_description.contains("（"));
        assert!(result.technical_additions.len() <= 2);
        assert!(result.consistency_additions.len() <= 2);
        assert!(!result.enhanced_description.contains("。，"));
    }

    #[tokio::test]
    async fn test_structured_fusion_uses_labeled_sections() {
        let result = fuser()
            .fuse(
                "叶文洁凝视着屏幕",
                &sample_technical(),
                &sample_consistency(),
                FusionStrategy::Structured,
            )
            .await;
        assert!(result.enhanced_description.contains("\n技术规格：特写镜头，人工光源"));
        assert!(result.enhanced_description.contains("\n一致性要求："));
    }

    #[tokio::test]
    async fn test_minimal_fusion_single_bracket() {
        let result = fuser()
            .fuse(
                "叶文洁凝视着屏幕",
                &sample_technical(),
                &sample_consistency(),
                FusionStrategy::Minimal,
            )
            .await;
        assert!(result.enhanced_description.ends_with(']'));
        assert_eq!(result.technical_additions, vec!["特写镜头".to_string()]);
        assert_eq!(result.consistency_additions.len(), 1);
    }

    #[tokio::test]
    async fn test_fusion_without_supplements_keeps_original() {
        let result = fuser()
            .fuse(
                "空旷的走廊",
                &TechnicalDetails::default(),
                &ConsistencyInfo::default(),
                FusionStrategy::Minimal,
            )
            .await;
        assert_eq!(result.enhanced_description, "空旷的走廊");
    }

    #[tokio::test]
    async fn test_intelligent_uses_model_reply() {
        let model = Arc::new(ScriptedModel::new("特写镜头下，叶文洁凝视着屏幕。"));
        let fuser = fuser().with_model(model.clone(), Duration::from_secs(1));
        let result = fuser
            .fuse(
                "叶文洁凝视着屏幕",
                &sample_technical(),
                &sample_consistency(),
                FusionStrategy::Intelligent,
            )
            .await;
        assert!(result.model_generated);
        assert_eq!(result.quality_score, 0.85);
        assert_eq!(model.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_intelligent_falls_back_on_model_error() {
        let fuser = fuser().with_model(Arc::new(FailingModel), Duration::from_secs(1));
        let result = fuser
            .fuse(
                "叶文洁凝视着屏幕",
                &sample_technical(),
                &sample_consistency(),
                FusionStrategy::Intelligent,
            )
            .await;
        assert!(!result.model_generated);
        assert!(!result.enhanced_description.is_empty());
    }

    #[tokio::test]
    async fn test_shape_fallback_short_dense_is_structured() {
        let consistency = sample_consistency();
        let mut technical = sample_technical();
        technical.camera_angle = "俯视角度".to_string();
        technical.composition = "对称构图".to_string();
        let result = fuser()
            .fuse("控制室", &technical, &consistency, FusionStrategy::Intelligent)
            .await;
        assert!(result.enhanced_description.contains("技术规格："));
    }

    #[tokio::test]
    async fn test_shape_fallback_long_is_minimal() {
        let long_original = "控制室里一片寂静，".repeat(12);
        let result = fuser()
            .fuse(
                &long_original,
                &sample_technical(),
                &sample_consistency(),
                FusionStrategy::Intelligent,
            )
            .await;
        assert!(result.enhanced_description.contains('['));
    }

    #[tokio::test]
    async fn test_quality_score_natural_scenario() {
        let result = fuser()
            .fuse(
                "叶文洁站在红岸基地的控制室里，面色凝重地凝视着雷达屏幕上跳动的波形。",
                &sample_technical(),
                &sample_consistency(),
                FusionStrategy::Natural,
            )
            .await;
        assert!(result.quality_score >= 0.3, "score: {}", result.quality_score);
        assert!(result.quality_score <= 1.0);
    }

    #[tokio::test]
    async fn test_tidy_collapses_doubled_punctuation() {
        let f = fuser();
        assert_eq!(f.tidy("夜色渐深，，雷达旋转"), "夜色渐深，雷达旋转");
        assert_eq!(f.tidy("夜色渐深，"), "夜色渐深。");
    }

    #[tokio::test]
    async fn test_deterministic_strategies_repeatable() {
        let f = fuser();
        let technical = sample_technical();
        let consistency = sample_consistency();
        for strategy in [
            FusionStrategy::Natural,
            FusionStrategy::Structured,
            FusionStrategy::Minimal,
        ] {
            let first = f
                .fuse("叶文洁凝视着屏幕", &technical, &consistency, strategy)
                .await;
            let second = f
                .fuse("叶文洁凝视着屏幕", &technical, &consistency, strategy)
                .await;
            assert_eq!(
                first.enhanced_description, second.enhanced_description,
                "strategy {strategy}"
            );
            assert_eq!(first.quality_score, second.quality_score, "strategy {strategy}");
        }
    }

    #[test]
    fn test_key_clauses_limits_and_bounds() {
        let prompt = "中年女性，短发头发整齐，穿着灰色服装，戴着一副旧眼镜";
        let clauses = key_clauses(prompt, APPEARANCE_KEYWORDS, 20, 2);
        assert_eq!(clauses.len(), 2);
        for clause in &clauses {
            assert!(clause.chars().count() < 20);
        }
        // Over-length clauses are skipped entirely
        let long_prompt = format!("头发{}", "很长".repeat(20));
        assert!(key_clauses(&long_prompt, APPEARANCE_KEYWORDS, 20, 2).is_empty());
    }
}
