//! Multi-shot storyboard enhancement
//!
//! Parses a markdown-ish storyboard script into scenes and shots, runs each
//! shot's description through the enhancement pipeline sequentially, and
//! persists the result as `texts/prompt.json` under the project directory.
//!
//! Scene headers pass through verbatim and are never enhanced; they only
//! group shots in the output artifact.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Enhancer;
use crate::config::FusionStrategy;
use crate::error::{Error, Result};

/// Per-style vocabulary appended to each shot description before fusion.
const STYLE_SUFFIXES: &[(&str, &str)] = &[
    ("电影风格", "电影感，戏剧性光影，超写实，4K，胶片颗粒，景深"),
    ("动漫风格", "动漫风，鲜艳色彩，干净线条，赛璐璐渲染，日本动画"),
    ("吉卜力风格", "吉卜力风，柔和色彩，奇幻，梦幻，丰富背景"),
    ("赛博朋克风格", "赛博朋克，霓虹灯，未来都市，雨夜，暗色氛围"),
    ("水彩插画风格", "水彩画风，柔和笔触，粉彩色，插画，温柔"),
    ("像素风格", "像素风，8位，复古，低分辨率，游戏风"),
    ("写实摄影风格", "真实光线，高细节，写实摄影，4K"),
];

const DEFAULT_SCENE: &str = "默认场景";

/// One enhanced shot with its diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotEnhancement {
    pub shot_number: u32,
    pub scene: String,
    pub characters: Vec<String>,
    pub original_description: String,
    pub enhanced_description: String,
    pub quality_score: f64,
    pub strategy_used: FusionStrategy,
}

/// Result of enhancing a whole storyboard script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryboardEnhancement {
    pub enhanced_script: String,
    pub shots: Vec<ShotEnhancement>,
}

/// The persisted `texts/prompt.json` artifact.
#[derive(Debug, Serialize, Deserialize)]
struct PromptArtifact {
    scenes: BTreeMap<String, Vec<PromptShot>>,
    timestamp: String,
    source: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PromptShot {
    shot_number: u32,
    original_description: String,
    enhanced_prompt: String,
}

/// A shot parsed out of the script, before enhancement.
struct ParsedShot {
    number: u32,
    scene: String,
    characters: Vec<String>,
    description: String,
}

impl Enhancer {
    /// Enhance every shot of a storyboard script sequentially, returning the
    /// rebuilt script plus per-shot diagnostics, and persist the result to
    /// `texts/prompt.json`. Only the artifact write can error.
    pub async fn enhance_storyboard(
        &self,
        script: &str,
        style: Option<&str>,
    ) -> Result<StoryboardEnhancement> {
        let suffix = style.and_then(|name| {
            let found = STYLE_SUFFIXES
                .iter()
                .find(|(style_name, _)| *style_name == name)
                .map(|(_, suffix)| *suffix);
            if found.is_none() {
                tracing::warn!(style = name, "unknown style, no suffix applied");
            }
            found
        });

        let parsed = parse_script(script)?;
        tracing::info!(shots = parsed.len(), ?style, "enhancing storyboard");

        let mut shots = Vec::with_capacity(parsed.len());
        for shot in parsed {
            let input = match suffix {
                Some(suffix) => format!("{}，{}", shot.description, suffix),
                None => shot.description.clone(),
            };
            let report = self.enhance_with_details(&input, &shot.characters).await;
            shots.push(ShotEnhancement {
                shot_number: shot.number,
                scene: shot.scene,
                characters: shot.characters,
                original_description: shot.description,
                enhanced_description: report.enhanced_description,
                quality_score: report.quality_score,
                strategy_used: report.strategy_used,
            });
        }

        let enhanced_script = rebuild_script(&shots);
        self.write_prompt_artifact(&shots).await?;

        Ok(StoryboardEnhancement {
            enhanced_script,
            shots,
        })
    }

    async fn write_prompt_artifact(&self, shots: &[ShotEnhancement]) -> Result<()> {
        let mut scenes: BTreeMap<String, Vec<PromptShot>> = BTreeMap::new();
        for shot in shots {
            scenes.entry(shot.scene.clone()).or_default().push(PromptShot {
                shot_number: shot.shot_number,
                original_description: shot.original_description.clone(),
                enhanced_prompt: shot.enhanced_description.clone(),
            });
        }
        let artifact = PromptArtifact {
            scenes,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            source: "sceneforge".to_string(),
            version: "1.0".to_string(),
        };

        let texts_dir = self.project_dir.join("texts");
        tokio::fs::create_dir_all(&texts_dir)
            .await
            .map_err(|e| Error::Storage(format!("create {}: {e}", texts_dir.display())))?;
        let path = texts_dir.join("prompt.json");
        let json = serde_json::to_string_pretty(&artifact)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::Storage(format!("write {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "storyboard prompts saved");
        Ok(())
    }
}

fn is_scene_header(line: &str) -> bool {
    line.starts_with("### 场景")
        || line.starts_with("## 场景")
        || (line.starts_with("场景") && line.contains('：'))
}

fn is_shot_header(line: &str) -> bool {
    line.starts_with("### 镜头")
        || line.starts_with("##镜头")
        || (line.contains("镜头") && line.ends_with("###"))
}

/// Strip a labeled field line (`- **label**：value`, both colon forms) down
/// to its value.
fn field_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    for prefix in [
        format!("- **{label}**："),
        format!("**{label}**："),
        format!("- **{label}**:"),
        format!("**{label}**:"),
    ] {
        if let Some(rest) = line.strip_prefix(&prefix) {
            return Some(rest.trim());
        }
    }
    None
}

fn parse_script(script: &str) -> Result<Vec<ParsedShot>> {
    let shot_number =
        Regex::new(r"镜头(\d+)").map_err(|e| Error::Storyboard(format!("shot pattern: {e}")))?;

    let mut shots = Vec::new();
    let mut current_scene = DEFAULT_SCENE.to_string();
    let mut current: Option<ParsedShot> = None;

    for raw in script.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if is_scene_header(line) {
            current_scene = line.to_string();
            continue;
        }

        if is_shot_header(line) {
            if let Some(shot) = current.take() {
                if !shot.description.is_empty() {
                    shots.push(shot);
                }
            }
            if let Some(number) = shot_number
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
            {
                current = Some(ParsedShot {
                    number,
                    scene: current_scene.clone(),
                    characters: Vec::new(),
                    description: String::new(),
                });
            }
            continue;
        }

        let Some(shot) = current.as_mut() else { continue };
        if let Some(value) = field_value(line, "镜头角色") {
            shot.characters = value
                .split(['、', '，', ','])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        } else if let Some(value) = field_value(line, "画面描述") {
            shot.description = value.to_string();
        }
    }

    if let Some(shot) = current.take() {
        if !shot.description.is_empty() {
            shots.push(shot);
        }
    }

    Ok(shots)
}

/// Rebuild the script with enhanced descriptions, grouping shots under
/// their verbatim scene headers.
fn rebuild_script(shots: &[ShotEnhancement]) -> String {
    let mut out = String::new();
    let mut last_scene: Option<&str> = None;

    for shot in shots {
        if shot.scene != DEFAULT_SCENE && last_scene != Some(shot.scene.as_str()) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&shot.scene);
            out.push('\n');
        }
        last_scene = Some(shot.scene.as_str());

        out.push_str(&format!("\n### 镜头{}\n", shot.shot_number));
        if !shot.characters.is_empty() {
            out.push_str(&format!("- **镜头角色**：{}\n", shot.characters.join("、")));
        }
        out.push_str(&format!("- **画面描述**：{}\n", shot.enhanced_description));
    }

    out
}
