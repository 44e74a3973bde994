//! Cinematic technical-detail inference
//!
//! Infers camera and photography attributes (shot type, angle, movement,
//! lighting, composition, depth of field, color tone) from a plain scene
//! description. Two passes run in a fixed order: explicit keyword rules
//! first, then a coarse content-based pass that only fills attributes the
//! rules left empty. Rule order inside each category is part of the
//! contract, earlier rules win.

use crate::error::{Error, Result};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

/// Inferred technical attributes of one shot. Empty string means the
/// attribute could not be inferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalDetails {
    #[serde(default)]
    pub shot_type: String,
    #[serde(default)]
    pub camera_angle: String,
    #[serde(default)]
    pub camera_movement: String,
    #[serde(default)]
    pub depth_of_field: String,
    #[serde(default)]
    pub lighting: String,
    #[serde(default)]
    pub composition: String,
    #[serde(default)]
    pub color_tone: String,
}

impl TechnicalDetails {
    /// Labeled comma-joined rendering, skipping empty attributes.
    pub fn to_description(&self) -> String {
        let fields = [
            ("镜头类型", &self.shot_type),
            ("机位角度", &self.camera_angle),
            ("镜头运动", &self.camera_movement),
            ("景深", &self.depth_of_field),
            ("光线", &self.lighting),
            ("构图", &self.composition),
            ("色调", &self.color_tone),
        ];
        fields
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(label, value)| format!("{label}：{value}"))
            .collect::<Vec<_>>()
            .join("，")
    }

    pub fn is_empty(&self) -> bool {
        self.shot_type.is_empty()
            && self.camera_angle.is_empty()
            && self.camera_movement.is_empty()
            && self.depth_of_field.is_empty()
            && self.lighting.is_empty()
            && self.composition.is_empty()
            && self.color_tone.is_empty()
    }
}

/// One rule category: ordered (pattern, label) pairs, first match wins.
struct RuleSet {
    rules: Vec<(regex::Regex, &'static str)>,
}

impl RuleSet {
    fn compile(pairs: &[(&str, &'static str)]) -> Result<Self> {
        let rules = pairs
            .iter()
            .map(|(pattern, label)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (re, *label))
                    .map_err(|e| Error::Config(format!("technical rule '{pattern}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    fn apply(&self, text: &str) -> String {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, label)| (*label).to_string())
            .unwrap_or_default()
    }
}

/// Infers [`TechnicalDetails`] from free-text descriptions.
pub struct TechnicalAnalyzer {
    shot_type: RuleSet,
    camera_angle: RuleSet,
    camera_movement: RuleSet,
    lighting: RuleSet,
    composition: RuleSet,
    depth: RuleSet,
    color_tone: RuleSet,
}

impl TechnicalAnalyzer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            shot_type: RuleSet::compile(&[
                (r"(特写|close.?up|特写镜头)", "特写"),
                (r"(近景|medium.?shot|中景)", "近景"),
                (r"(中景|medium.?shot)", "中景"),
                (r"(远景|long.?shot|全景)", "远景"),
                (r"(全景|wide.?shot|大全景)", "全景"),
                (r"(大全景|extreme.?wide)", "大全景"),
            ])?,
            camera_angle: RuleSet::compile(&[
                (r"(俯视|俯拍|bird.?eye|从上往下)", "俯视角度"),
                (r"(仰视|仰拍|worm.?eye|从下往上)", "仰视角度"),
                (r"(平视|水平|eye.?level)", "平视角度"),
                (r"(侧面|侧视|profile)", "侧面角度"),
            ])?,
            camera_movement: RuleSet::compile(&[
                (r"(推进|推镜|dolly.?in|zoom.?in)", "推镜"),
                (r"(拉远|拉镜|dolly.?out|zoom.?out)", "拉镜"),
                (r"(摇镜|摇摆|pan)", "摇镜"),
                (r"(跟拍|跟随|follow)", "跟拍"),
                (r"(环绕|围绕|orbit)", "环绕拍摄"),
                (r"(手持|晃动|handheld)", "手持拍摄"),
            ])?,
            lighting: RuleSet::compile(&[
                (r"(自然光|阳光|日光|daylight)", "自然光"),
                (r"(室内光|灯光|artificial)", "人工光源"),
                (r"(柔光|soft.?light)", "柔光"),
                (r"(硬光|hard.?light)", "硬光"),
                (r"(逆光|backlight)", "逆光"),
                (r"(侧光|side.?light)", "侧光"),
                (r"(顶光|top.?light)", "顶光"),
                (r"(暖光|warm.?light)", "暖色调光线"),
                (r"(冷光|cool.?light)", "冷色调光线"),
            ])?,
            composition: RuleSet::compile(&[
                (r"(三分法|rule.?of.?thirds)", "三分法构图"),
                (r"(对称|symmetr)", "对称构图"),
                (r"(对角线|diagonal)", "对角线构图"),
                (r"(中心|center)", "中心构图"),
                (r"(框架|frame)", "框架构图"),
                (r"(引导线|leading.?line)", "引导线构图"),
            ])?,
            depth: RuleSet::compile(&[
                (r"(浅景深|shallow.?depth)", "浅景深"),
                (r"(深景深|deep.?depth)", "深景深"),
                (r"(背景虚化|blur|bokeh)", "背景虚化"),
                (r"(前景|foreground)", "前景突出"),
                (r"(背景|background)", "背景清晰"),
            ])?,
            color_tone: RuleSet::compile(&[
                (r"(暖色调|warm.?tone)", "暖色调"),
                (r"(冷色调|cool.?tone)", "冷色调"),
                (r"(高对比|high.?contrast)", "高对比度"),
                (r"(低对比|low.?contrast)", "低对比度"),
                (r"(饱和|saturated)", "高饱和度"),
                (r"(淡雅|desaturated)", "低饱和度"),
                (r"(黑白|monochrome)", "黑白色调"),
            ])?,
        })
    }

    /// Full two-pass analysis. Deterministic and never errors.
    pub fn analyze(&self, description: &str) -> TechnicalDetails {
        let mut details = TechnicalDetails {
            shot_type: self.shot_type.apply(description),
            camera_angle: self.camera_angle.apply(description),
            camera_movement: self.camera_movement.apply(description),
            lighting: self.lighting.apply(description),
            composition: self.composition.apply(description),
            depth_of_field: self.depth.apply(description),
            color_tone: self.color_tone.apply(description),
        };
        self.infer_from_content(description, &mut details);
        details
    }

    /// Coarse second pass: fill attributes the keyword rules left empty from
    /// what the shot shows rather than explicit camera vocabulary.
    fn infer_from_content(&self, description: &str, details: &mut TechnicalDetails) {
        if details.shot_type.is_empty() {
            if contains_any(description, &["脸部", "表情", "眼神", "面部"]) {
                details.shot_type = "特写".to_string();
            } else if contains_any(description, &["全身", "整个人", "站立", "走路"]) {
                details.shot_type = "全景".to_string();
            } else if contains_any(description, &["上半身", "胸部以上", "肩膀"]) {
                details.shot_type = "中景".to_string();
            }
        }

        if details.lighting.is_empty() {
            if contains_any(description, &["室外", "阳光", "白天", "户外"]) {
                details.lighting = "自然光".to_string();
            } else if contains_any(description, &["室内", "灯光", "夜晚"]) {
                details.lighting = "人工光源".to_string();
            }
        }

        if details.camera_movement.is_empty() {
            if contains_any(description, &["走向", "靠近", "接近"]) {
                details.camera_movement = "推镜".to_string();
            } else if contains_any(description, &["远离", "后退", "离开"]) {
                details.camera_movement = "拉镜".to_string();
            } else if contains_any(description, &["转身", "环顾", "四周"]) {
                details.camera_movement = "摇镜".to_string();
            }
        }
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}
