//! Character and Scene record schemas
//!
//! Every nested block is an explicit struct with `#[serde(default)]`, so a
//! record loaded from an older or hand-edited JSON file always deserializes
//! into fully-populated (possibly empty) fields. Downstream readers never
//! need existence checks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Physical appearance block of a [`Character`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub age_range: String,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub hair: String,
    #[serde(default)]
    pub eyes: String,
    #[serde(default)]
    pub skin: String,
    #[serde(default)]
    pub build: String,
}

/// Clothing block of a [`Character`].
///
/// Invariant: after [`ColorResolver::optimize_character`] runs, `colors`
/// holds exactly one canonical entry.
///
/// [`ColorResolver::optimize_character`]: crate::colors::ColorResolver::optimize_character
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clothing {
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub accessories: Vec<String>,
}

/// Personality block of a [`Character`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub expressions: Vec<String>,
    #[serde(default)]
    pub mannerisms: Vec<String>,
}

/// A character record held in the entity store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Character {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub appearance: Appearance,
    #[serde(default)]
    pub clothing: Clothing,
    #[serde(default)]
    pub personality: Personality,
    /// Canonical natural-language description reinserted into every prompt
    /// referencing this character.
    #[serde(default)]
    pub consistency_prompt: String,
    #[serde(default)]
    pub extracted_from_text: bool,
    #[serde(default)]
    pub manual_edited: bool,
}

impl Character {
    /// Minimal record created by the keyword fallback: a name, everything
    /// else empty.
    pub fn minimal(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name_to_id(&name),
            name,
            extracted_from_text: true,
            ..Default::default()
        }
    }
}

/// Scene category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneCategory {
    Indoor,
    Outdoor,
    Special,
}

impl Default for SceneCategory {
    fn default() -> Self {
        SceneCategory::Indoor
    }
}

/// Environment block of a [`Scene`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub location_type: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub layout: String,
    #[serde(default)]
    pub decorations: Vec<String>,
    #[serde(default)]
    pub furniture: Vec<String>,
}

/// Lighting block of a [`Scene`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneLighting {
    #[serde(default)]
    pub time_of_day: String,
    #[serde(default)]
    pub light_source: String,
    #[serde(default)]
    pub brightness: String,
    #[serde(default)]
    pub mood: String,
}

/// Atmosphere block of a [`Scene`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Atmosphere {
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub weather: String,
}

/// A scene record held in the entity store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: SceneCategory,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub lighting: SceneLighting,
    #[serde(default)]
    pub atmosphere: Atmosphere,
    /// Detection keywords beyond the scene name.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub consistency_prompt: String,
    #[serde(default)]
    pub extracted_from_text: bool,
    #[serde(default)]
    pub manual_edited: bool,
}

impl Scene {
    /// Minimal record created by the keyword fallback.
    pub fn minimal(name: impl Into<String>, category: SceneCategory) -> Self {
        let name = name.into();
        Self {
            id: name_to_id(&name),
            name,
            category,
            extracted_from_text: true,
            ..Default::default()
        }
    }
}

/// On-disk shape of `characters.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterDatabase {
    #[serde(default)]
    pub characters: HashMap<String, Character>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default = "default_version")]
    pub version: String,
}

/// On-disk shape of `scenes.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDatabase {
    #[serde(default)]
    pub scenes: HashMap<String, Scene>,
    #[serde(default)]
    pub scene_categories: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for SceneDatabase {
    fn default() -> Self {
        let mut scene_categories = HashMap::new();
        scene_categories.insert(
            "indoor".to_string(),
            to_strings(&["家庭", "办公室", "教室", "餐厅", "卧室", "客厅", "厨房", "浴室"]),
        );
        scene_categories.insert(
            "outdoor".to_string(),
            to_strings(&["街道", "公园", "广场", "山林", "海边", "田野", "城市", "乡村"]),
        );
        scene_categories.insert(
            "special".to_string(),
            to_strings(&["梦境", "回忆", "幻想", "虚拟空间"]),
        );
        Self {
            scenes: HashMap::new(),
            scene_categories,
            last_updated: String::new(),
            version: default_version(),
        }
    }
}

/// Keyword-category tables driving fallback extraction, plus the optional
/// character→shot mapping. On-disk shape of `consistency_rules.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyRules {
    #[serde(default)]
    pub character_consistency: CharacterKeywords,
    #[serde(default)]
    pub scene_consistency: SceneKeywords,
    #[serde(default)]
    pub character_shot_mapping: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for ConsistencyRules {
    fn default() -> Self {
        Self {
            character_consistency: CharacterKeywords::default(),
            scene_consistency: SceneKeywords::default(),
            character_shot_mapping: HashMap::new(),
            last_updated: String::new(),
            version: default_version(),
        }
    }
}

/// Character-side keyword categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterKeywords {
    #[serde(default)]
    pub appearance_keywords: Vec<String>,
    #[serde(default)]
    pub clothing_keywords: Vec<String>,
    #[serde(default)]
    pub personality_keywords: Vec<String>,
}

impl Default for CharacterKeywords {
    fn default() -> Self {
        Self {
            appearance_keywords: to_strings(&["外貌", "长相", "身材", "发型", "眼睛", "肤色"]),
            clothing_keywords: to_strings(&["服装", "衣服", "穿着", "打扮", "装扮"]),
            personality_keywords: to_strings(&["性格", "气质", "表情", "神态", "情绪"]),
        }
    }
}

/// Scene-side keyword categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneKeywords {
    #[serde(default)]
    pub environment_keywords: Vec<String>,
    #[serde(default)]
    pub lighting_keywords: Vec<String>,
    #[serde(default)]
    pub atmosphere_keywords: Vec<String>,
}

impl Default for SceneKeywords {
    fn default() -> Self {
        Self {
            environment_keywords: to_strings(&["环境", "背景", "场所", "地点", "位置"]),
            lighting_keywords: to_strings(&["光线", "照明", "明暗", "阴影", "光影"]),
            atmosphere_keywords: to_strings(&["氛围", "气氛", "情调", "感觉", "风格"]),
        }
    }
}

/// Derive a stable record id from a display name.
pub fn name_to_id(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if slug.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        slug
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_deserializes_with_missing_blocks() {
        let record: Character = serde_json::from_str(r#"{"name": "王建国"}"#).unwrap();
        assert_eq!(record.name, "王建国");
        assert!(record.aliases.is_empty());
        assert!(record.appearance.hair.is_empty());
        assert!(record.clothing.colors.is_empty());
        assert!(!record.manual_edited);
    }

    #[test]
    fn test_scene_category_default_and_rename() {
        let scene: Scene = serde_json::from_str(r#"{"name": "控制室"}"#).unwrap();
        assert_eq!(scene.category, SceneCategory::Indoor);

        let outdoor: Scene =
            serde_json::from_str(r#"{"name": "街道", "category": "outdoor"}"#).unwrap();
        assert_eq!(outdoor.category, SceneCategory::Outdoor);
    }

    #[test]
    fn test_scene_database_default_categories() {
        let db = SceneDatabase::default();
        assert!(db.scene_categories["indoor"].contains(&"办公室".to_string()));
        assert!(db.scene_categories["special"].contains(&"梦境".to_string()));
    }

    #[test]
    fn test_name_to_id() {
        assert_eq!(name_to_id("Ye Wenjie"), "ye_wenjie");
        assert_eq!(name_to_id("叶文洁"), "叶文洁");
        // Empty names still get a usable id
        assert!(!name_to_id("").is_empty());
    }
}
