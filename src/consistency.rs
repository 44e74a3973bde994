//! Consistency detection and retrieval
//!
//! [`ConsistencyInjector`] figures out which stored characters and scenes a
//! shot description refers to and pulls their canonical consistency text out
//! of the entity store. Detection reads through the store's time-boxed
//! snapshot, so a description is matched against one internally consistent
//! view of both tables.

use std::sync::Arc;

use crate::entities::store::{EntitySnapshot, EntityStore};
use crate::entities::types::{Character, Scene};

/// Generic scene categories tried only when no stored scene matches. A hit
/// is reported as the pseudo-scene `通用<category>`, which is never a stored
/// id and never carries consistency text.
const GENERIC_SCENE_CATEGORIES: &[(&str, &[&str])] = &[
    ("室内", &["室内", "房间", "屋内", "内部", "里面"]),
    ("室外", &["室外", "户外", "外面", "野外", "街道"]),
    ("办公场所", &["办公室", "会议室", "工作室", "书房"]),
    ("居住场所", &["家", "客厅", "卧室", "厨房", "浴室"]),
    ("教育场所", &["学校", "教室", "实验室", "图书馆", "校园"]),
    ("自然环境", &["山", "海", "森林", "草原", "沙漠", "河流"]),
    ("城市环境", &["城市", "街道", "广场", "公园", "商场"]),
];

/// Consistency text gathered for one description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyInfo {
    /// Detected character names, each at most once, detection order.
    pub character_names: Vec<String>,
    /// Detected scene names (pseudo-scenes included), each at most once.
    pub scene_names: Vec<String>,
    /// Non-empty consistency prompts of detected characters.
    pub characters: Vec<String>,
    /// (name, prompt) pairs for characters with non-empty prompts, used to
    /// embed consistency text next to the name inside a description.
    pub character_details: Vec<(String, String)>,
    /// Non-empty consistency prompts of detected real scenes.
    pub scenes: Vec<String>,
}

impl ConsistencyInfo {
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.scenes.is_empty()
    }

    /// Labeled semicolon-joined rendering of all gathered text.
    pub fn to_description(&self) -> String {
        let mut parts = Vec::new();
        parts.extend(self.characters.iter().map(|c| format!("角色一致性：{c}")));
        parts.extend(self.scenes.iter().map(|s| format!("场景一致性：{s}")));
        parts.join("；")
    }
}

/// Detects entity references in descriptions and resolves consistency text.
pub struct ConsistencyInjector {
    store: Arc<EntityStore>,
}

impl ConsistencyInjector {
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self { store }
    }

    /// Extract consistency information for one description. Caller-supplied
    /// `known_characters` are checked before stored entities. Never errors;
    /// an unreadable store behaves like an empty one.
    pub async fn extract(&self, description: &str, known_characters: &[String]) -> ConsistencyInfo {
        let snapshot = self.store.snapshot().await;
        let mut info = ConsistencyInfo::default();

        for record in self.detect_characters(description, known_characters, &snapshot) {
            info.character_names.push(record.name.clone());
            if !record.consistency_prompt.is_empty() {
                info.characters.push(record.consistency_prompt.clone());
                info.character_details
                    .push((record.name.clone(), record.consistency_prompt.clone()));
            }
        }

        for detected in self.detect_scenes(description, &snapshot) {
            match detected {
                DetectedScene::Stored(record) => {
                    info.scene_names.push(record.name.clone());
                    if !record.consistency_prompt.is_empty() {
                        info.scenes.push(record.consistency_prompt.clone());
                    }
                }
                DetectedScene::Generic(category) => {
                    info.scene_names.push(format!("通用{category}"));
                }
            }
        }

        tracing::debug!(
            characters = info.character_names.len(),
            scenes = info.scene_names.len(),
            "consistency extraction"
        );
        info
    }

    /// Stored characters referenced by the description. Tries, in order:
    /// direct name, alias, feature keywords. Each record at most once;
    /// caller-supplied names take precedence in ordering.
    fn detect_characters<'a>(
        &self,
        description: &str,
        known_characters: &[String],
        snapshot: &'a EntitySnapshot,
    ) -> Vec<&'a Character> {
        let mut detected: Vec<&Character> = Vec::new();
        let push = |record: &'a Character, detected: &mut Vec<&'a Character>| {
            if !detected.iter().any(|c| c.id == record.id) {
                detected.push(record);
            }
        };

        for name in known_characters {
            if !name.is_empty() && description.contains(name.as_str()) {
                if let Some(record) = snapshot
                    .characters
                    .values()
                    .find(|c| &c.name == name || c.aliases.contains(name))
                {
                    push(record, &mut detected);
                }
            }
        }

        // Sort by id so multi-match output does not depend on map order
        let mut stored: Vec<&Character> = snapshot.characters.values().collect();
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        for record in stored {
            if character_matches(record, description) {
                push(record, &mut detected);
            }
        }

        detected
    }

    /// Stored scenes referenced by the description, by name or keyword. When
    /// nothing stored matches, the first generic category hit is reported as
    /// a pseudo-scene.
    fn detect_scenes<'a>(
        &self,
        description: &str,
        snapshot: &'a EntitySnapshot,
    ) -> Vec<DetectedScene<'a>> {
        let mut detected = Vec::new();
        let mut stored: Vec<&Scene> = snapshot.scenes.values().collect();
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        for record in stored {
            if scene_matches(record, description) {
                detected.push(DetectedScene::Stored(record));
            }
        }

        if detected.is_empty() {
            for (category, keywords) in GENERIC_SCENE_CATEGORIES {
                if keywords.iter().any(|k| description.contains(k)) {
                    detected.push(DetectedScene::Generic(category));
                    break;
                }
            }
        }

        detected
    }
}

enum DetectedScene<'a> {
    Stored(&'a Scene),
    Generic(&'static str),
}

fn character_matches(record: &Character, description: &str) -> bool {
    if !record.name.is_empty() && description.contains(record.name.as_str()) {
        return true;
    }
    if record
        .aliases
        .iter()
        .any(|alias| !alias.is_empty() && description.contains(alias.as_str()))
    {
        return true;
    }
    feature_tokens(record)
        .iter()
        .any(|token| description.contains(token.as_str()))
}

/// Structured-attribute tokens strong enough to identify a character without
/// a name mention. Single-character tokens are too ambiguous to count.
fn feature_tokens(record: &Character) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in [
        record.appearance.hair.as_str(),
        record.appearance.gender.as_str(),
        record.clothing.style.as_str(),
    ] {
        let token = raw.trim();
        if token.chars().count() > 1 {
            tokens.push(token.to_string());
        }
    }
    // Colloquial age references ("中年人" etc.) match by their stem.
    for stem in ["中年", "老年", "青年", "少年"] {
        if record.appearance.age_range.contains(stem) {
            tokens.push(stem.to_string());
        }
    }
    tokens
}

fn scene_matches(record: &Scene, description: &str) -> bool {
    if !record.name.is_empty() && description.contains(record.name.as_str()) {
        return true;
    }
    record
        .keywords
        .iter()
        .any(|k| !k.is_empty() && description.contains(k.as_str()))
}
