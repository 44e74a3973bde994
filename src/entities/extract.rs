//! LLM-assisted entity extraction with a deterministic keyword fallback
//!
//! The primary path sends a schema-describing prompt to the injected
//! language model and parses the first balanced JSON array/object found in
//! the reply, defaulting missing fields to empty. On LLM unavailability,
//! malformed output, or parse failure it falls back — never erroring — to
//! fixed-vocabulary keyword matching: relational nouns for characters,
//! indoor/outdoor/time/weather nouns for scenes. Every distinct hit becomes
//! a minimal record with empty attributes.

use crate::entities::store::EntityStore;
use crate::entities::types::*;
use crate::llm::{complete_bounded, LanguageModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Relational nouns recognized by the character fallback.
const CHARACTER_VOCABULARY: &[&str] = &[
    "主角", "主人公", "男主", "女主", "主要人物",
    "老师", "学生", "医生", "护士", "警察", "司机",
    "父亲", "母亲", "儿子", "女儿", "朋友", "同事",
];

/// Scene nouns recognized by the fallback, grouped by category.
/// Time-of-day and weather hits are filed under `special`.
const SCENE_VOCABULARY: &[(&str, SceneCategory)] = &[
    ("房间", SceneCategory::Indoor),
    ("屋内", SceneCategory::Indoor),
    ("室内", SceneCategory::Indoor),
    ("家里", SceneCategory::Indoor),
    ("办公室", SceneCategory::Indoor),
    ("教室", SceneCategory::Indoor),
    ("餐厅", SceneCategory::Indoor),
    ("卧室", SceneCategory::Indoor),
    ("客厅", SceneCategory::Indoor),
    ("厨房", SceneCategory::Indoor),
    ("商店", SceneCategory::Indoor),
    ("医院", SceneCategory::Indoor),
    ("街道", SceneCategory::Outdoor),
    ("马路", SceneCategory::Outdoor),
    ("公园", SceneCategory::Outdoor),
    ("广场", SceneCategory::Outdoor),
    ("山上", SceneCategory::Outdoor),
    ("海边", SceneCategory::Outdoor),
    ("田野", SceneCategory::Outdoor),
    ("森林", SceneCategory::Outdoor),
    ("花园", SceneCategory::Outdoor),
    ("院子", SceneCategory::Outdoor),
    ("早晨", SceneCategory::Special),
    ("中午", SceneCategory::Special),
    ("傍晚", SceneCategory::Special),
    ("晚上", SceneCategory::Special),
    ("深夜", SceneCategory::Special),
    ("黄昏", SceneCategory::Special),
    ("晴天", SceneCategory::Special),
    ("阴天", SceneCategory::Special),
    ("雨天", SceneCategory::Special),
    ("雪天", SceneCategory::Special),
];

/// Result summary of [`EntityExtractor::auto_extract_and_save`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub characters_extracted: usize,
    pub scenes_extracted: usize,
}

/// Extracts Character/Scene records from narrative text.
pub struct EntityExtractor {
    model: Option<Arc<dyn LanguageModel>>,
    timeout: Duration,
}

impl EntityExtractor {
    /// An extractor with no language model: fallback only.
    pub fn keyword_only() -> Self {
        Self {
            model: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// An extractor delegating to the given model, bounded by `timeout`.
    pub fn with_model(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self {
            model: Some(model),
            timeout,
        }
    }

    /// Extract character records from narrative text. Never errors.
    pub async fn extract_characters(&self, text: &str) -> Vec<Character> {
        if let Some(model) = &self.model {
            match complete_bounded(model.as_ref(), &character_prompt(text), self.timeout).await {
                Ok(reply) => {
                    let parsed = parse_character_reply(&reply);
                    if !parsed.is_empty() {
                        tracing::info!(count = parsed.len(), "characters extracted via model");
                        return parsed;
                    }
                    tracing::warn!("model reply held no parsable characters, using keyword fallback");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "character extraction via model failed, using keyword fallback");
                }
            }
        }
        fallback_characters(text)
    }

    /// Extract scene records from narrative text. Never errors.
    pub async fn extract_scenes(&self, text: &str) -> Vec<Scene> {
        if let Some(model) = &self.model {
            match complete_bounded(model.as_ref(), &scene_prompt(text), self.timeout).await {
                Ok(reply) => {
                    let parsed = parse_scene_reply(&reply);
                    if !parsed.is_empty() {
                        tracing::info!(count = parsed.len(), "scenes extracted via model");
                        return parsed;
                    }
                    tracing::warn!("model reply held no parsable scenes, using keyword fallback");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "scene extraction via model failed, using keyword fallback");
                }
            }
        }
        fallback_scenes(text)
    }

    /// Extract both kinds and persist every record into the store.
    pub async fn auto_extract_and_save(
        &self,
        text: &str,
        store: &EntityStore,
    ) -> crate::error::Result<ExtractionSummary> {
        let characters = self.extract_characters(text).await;
        for record in &characters {
            store.save_character(&record.id, record.clone()).await?;
        }

        let scenes = self.extract_scenes(text).await;
        for record in &scenes {
            store.save_scene(&record.id, record.clone()).await?;
        }

        let summary = ExtractionSummary {
            characters_extracted: characters.len(),
            scenes_extracted: scenes.len(),
        };
        tracing::info!(
            characters = summary.characters_extracted,
            scenes = summary.scenes_extracted,
            "auto extraction complete"
        );
        Ok(summary)
    }
}

fn character_prompt(text: &str) -> String {
    format!(
        r#"请分析以下文本，提取其中的所有角色信息，并严格按JSON格式返回：
{{
  "characters": [
    {{
      "name": "角色名称",
      "aliases": ["别名"],
      "description": "基本描述",
      "appearance": {{"gender": "", "age_range": "", "height": "", "hair": "", "eyes": "", "skin": "", "build": ""}},
      "clothing": {{"style": "", "colors": [], "accessories": []}},
      "personality": {{"traits": [], "expressions": [], "mannerisms": []}},
      "consistency_prompt": "适合AI绘画的角色一致性提示词"
    }}
  ]
}}

文本内容：
{text}

请只返回JSON："#
    )
}

fn scene_prompt(text: &str) -> String {
    format!(
        r#"请分析以下文本，提取其中的所有场景信息，并严格按JSON格式返回：
{{
  "scenes": [
    {{
      "name": "场景名称",
      "category": "indoor/outdoor/special",
      "description": "基本描述",
      "environment": {{"location_type": "", "size": "", "layout": "", "decorations": [], "furniture": []}},
      "lighting": {{"time_of_day": "", "light_source": "", "brightness": "", "mood": ""}},
      "atmosphere": {{"style": "", "colors": [], "mood": "", "weather": ""}},
      "consistency_prompt": "适合AI绘画的场景一致性提示词"
    }}
  ]
}}

文本内容：
{text}

请只返回JSON："#
    )
}

/// Locate the first balanced JSON array or object in free-form model output.
///
/// Tracks string/escape state so braces inside quoted values do not confuse
/// the nesting count. Returns the exact source slice.
fn first_balanced_json(reply: &str) -> Option<&str> {
    let bytes = reply.as_bytes();
    let start = reply.find(['[', '{'])?;
    let open = bytes[start];
    let close = if open == b'[' { b']' } else { b'}' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_character_reply(reply: &str) -> Vec<Character> {
    let Some(json) = first_balanced_json(reply) else {
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
        return Vec::new();
    };

    let items = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => match map.get("characters") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            // A well-formed record deserializes directly; a sloppy one is
            // salvaged as a minimal record if it at least names a character.
            match serde_json::from_value::<Character>(item.clone()) {
                Ok(mut record) => {
                    if record.name.trim().is_empty() {
                        return None;
                    }
                    if record.id.is_empty() {
                        record.id = name_to_id(&record.name);
                    }
                    record.extracted_from_text = true;
                    Some(record)
                }
                Err(_) => item
                    .get("name")
                    .and_then(|n| n.as_str())
                    .filter(|n| !n.trim().is_empty())
                    .map(Character::minimal),
            }
        })
        .collect()
}

fn parse_scene_reply(reply: &str) -> Vec<Scene> {
    let Some(json) = first_balanced_json(reply) else {
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
        return Vec::new();
    };

    let items = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => match map.get("scenes") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Scene>(item.clone()) {
            Ok(mut record) => {
                if record.name.trim().is_empty() {
                    return None;
                }
                if record.id.is_empty() {
                    record.id = name_to_id(&record.name);
                }
                record.extracted_from_text = true;
                Some(record)
            }
            Err(_) => item
                .get("name")
                .and_then(|n| n.as_str())
                .filter(|n| !n.trim().is_empty())
                .map(|n| Scene::minimal(n, SceneCategory::Indoor)),
        })
        .collect()
}

/// Deterministic character fallback over the fixed relational-noun
/// vocabulary. Vocabulary order fixes the output order.
fn fallback_characters(text: &str) -> Vec<Character> {
    CHARACTER_VOCABULARY
        .iter()
        .filter(|noun| text.contains(**noun))
        .map(|noun| Character::minimal(*noun))
        .collect()
}

/// Deterministic scene fallback over indoor/outdoor/time/weather nouns.
fn fallback_scenes(text: &str) -> Vec<Scene> {
    SCENE_VOCABULARY
        .iter()
        .filter(|(noun, _)| text.contains(*noun))
        .map(|(noun, category)| Scene::minimal(*noun, *category))
        .collect()
}
