//! Clothing-color conflict resolution
//!
//! Characters drift visually when a storyboard describes their clothing with
//! different colors across shots. [`ColorResolver`] enforces the invariant
//! that each subject converges to exactly one canonical clothing color: it
//! picks the primary color from a conflicting set and rewrites descriptions
//! so only that color appears in the subject's clothing clauses.
//!
//! Both entry points are total: unresolvable input comes back unchanged, and
//! `extract_primary` returns an empty string rather than erroring.

use crate::entities::types::Character;
use crate::error::{Error, Result};
use regex::Regex;

/// Canonical color labels, highest priority first. Position fixes the score,
/// so no two labels can tie.
const COLOR_PRIORITY: &[&str] = &[
    // Base colors
    "黑色", "白色", "红色", "蓝色", "绿色", "黄色", "紫色", "橙色", "粉色", "灰色",
    "棕色", "褐色", "咖啡色",
    // Shade variants
    "深蓝色", "浅蓝色", "深红色", "浅红色", "深绿色", "浅绿色", "深灰色", "浅灰色",
    "深紫色", "浅紫色", "深黄色", "浅黄色",
    // Special colors
    "金色", "银色", "海军蓝", "天蓝色", "米色", "卡其色", "青色", "洋红色",
    "草绿色", "玫瑰红", "橄榄色",
];

/// English/abbreviated synonyms normalized to canonical labels.
const COLOR_SYNONYMS: &[(&str, &str)] = &[
    ("black", "黑色"),
    ("white", "白色"),
    ("red", "红色"),
    ("blue", "蓝色"),
    ("green", "绿色"),
    ("yellow", "黄色"),
    ("purple", "紫色"),
    ("orange", "橙色"),
    ("pink", "粉色"),
    ("gray", "灰色"),
    ("grey", "灰色"),
    ("brown", "棕色"),
    ("gold", "金色"),
    ("silver", "银色"),
    ("navy", "海军蓝"),
    ("深蓝", "深蓝色"),
    ("浅蓝", "浅蓝色"),
    ("深红", "深红色"),
    ("浅红", "浅红色"),
    ("深绿", "深绿色"),
    ("浅绿", "浅绿色"),
    ("深灰", "深灰色"),
    ("浅灰", "浅灰色"),
    ("深紫", "深紫色"),
    ("浅紫", "浅紫色"),
    ("深黄", "深黄色"),
    ("浅黄", "浅黄色"),
    ("天蓝", "天蓝色"),
    ("草绿", "草绿色"),
    ("洋红", "洋红色"),
    ("橄榄", "橄榄色"),
    ("卡其", "卡其色"),
];

/// Verbs/nouns anchoring a clothing clause to its subject.
const CLOTHING_MARKERS: &[&str] = &["穿着", "身着", "服装", "衣服", "打扮", "装扮"];

/// Resolves conflicting color attributes to one canonical value per subject.
pub struct ColorResolver {
    token_patterns: Vec<Regex>,
}

impl ColorResolver {
    pub fn new() -> Result<Self> {
        let patterns = [
            r"(深|浅|亮|暗)?(黑|白|红|蓝|绿|黄|紫|橙|粉|灰|棕|褐|咖啡)色?",
            r"(海军蓝|天蓝|草绿|玫瑰红|洋红|橄榄|卡其|金|银|米|青)色?",
            r"(?i)(navy|blue|red|green|yellow|purple|orange|pink|gray|grey|brown|black|white|gold|silver)",
        ];
        let token_patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Config(format!("color pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { token_patterns })
    }

    /// Extract the primary color from free text holding zero or more color
    /// mentions. Multiple distinct colors resolve by the fixed priority
    /// table; no colors resolve to an empty string. Never errors.
    pub fn extract_primary(&self, text: &str) -> String {
        let colors = self.collect_colors(text);
        match colors.len() {
            0 => String::new(),
            1 => colors.into_iter().next().unwrap_or_default(),
            _ => {
                let primary = colors
                    .iter()
                    .max_by(|a, b| priority_score(a).cmp(&priority_score(b)))
                    .cloned()
                    .unwrap_or_default();
                tracing::debug!(input = text, %primary, "resolved color conflict");
                primary
            }
        }
    }

    /// All distinct canonical colors found in the text, first-seen order.
    fn collect_colors(&self, text: &str) -> Vec<String> {
        let mut colors = Vec::new();
        for part in text.split([',', '，']) {
            for pattern in &self.token_patterns {
                for m in pattern.find_iter(part) {
                    if let Some(color) = normalize_color(m.as_str()) {
                        if !colors.contains(&color) {
                            colors.push(color);
                        }
                    }
                }
            }
        }
        colors
    }

    /// Rewrite `description` so the subject's clothing is described only by
    /// `canonical_color`.
    ///
    /// Subject-scoped clothing clauses (subject name plus a wear/dress token
    /// in one span) have every other color replaced; clauses with no color
    /// get the canonical color inserted next to the clothing token. When no
    /// clause exists but the subject is mentioned and the color is absent, a
    /// parenthetical is appended after the first mention. Idempotent; never
    /// errors; unresolvable input is returned unchanged.
    pub fn apply_to_text(&self, description: &str, subject: &str, canonical_color: &str) -> String {
        if description.is_empty() || subject.is_empty() || canonical_color.is_empty() {
            return description.to_string();
        }

        let subject_escaped = regex::escape(subject);
        let markers = CLOTHING_MARKERS.join("|");
        let clause_patterns = [
            format!("{subject_escaped}[^，。！？,.!?]*?(?:{markers})[^，。！？,.!?]*"),
            format!("(?:{markers})[^，。！？,.!?]*?{subject_escaped}"),
        ];

        let mut result = description.to_string();
        let mut clause_found = false;

        for pattern in &clause_patterns {
            let Ok(re) = Regex::new(pattern) else { continue };
            // Every clause gets rewritten, scanning forward so a rewrite's
            // shifted byte offsets never re-match an earlier clause.
            let mut search_from = 0;
            while search_from <= result.len() {
                let Some(m) = re.find_at(&result, search_from) else { break };
                clause_found = true;
                let clause = m.as_str().to_string();
                let rewritten = self.rewrite_clause(&clause, canonical_color);
                if rewritten == clause {
                    search_from = m.end();
                } else {
                    search_from = m.start() + rewritten.len();
                    result.replace_range(m.range(), &rewritten);
                }
            }
        }

        // No clothing clause: annotate the subject's first mention unless the
        // canonical color is already present somewhere.
        if !clause_found && result.contains(subject) && !result.contains(canonical_color) {
            let annotated = format!("{subject}（身着{canonical_color}服装）");
            result = result.replacen(subject, &annotated, 1);
        }

        result
    }

    /// Rewrite one clothing clause: replace conflicting colors, or insert
    /// the canonical color when none is present.
    fn rewrite_clause(&self, clause: &str, canonical_color: &str) -> String {
        let present = self.collect_colors(clause);

        if present.iter().any(|c| c != canonical_color) {
            let mut rewritten = clause.to_string();
            for color in present.iter().filter(|c| c.as_str() != canonical_color) {
                rewritten = rewritten.replace(color.as_str(), canonical_color);
                // Bare shade forms ("深蓝") normalize to a canonical label the
                // clause may not literally contain; swap those too.
                if let Some((bare, _)) =
                    COLOR_SYNONYMS.iter().find(|(_, full)| *full == color.as_str())
                {
                    rewritten = rewritten.replace(bare, canonical_color);
                }
            }
            return rewritten;
        }

        if present.is_empty() {
            for marker in ["服装", "衣服"] {
                if clause.contains(marker) {
                    return clause.replacen(marker, &format!("{canonical_color}{marker}"), 1);
                }
            }
            for marker in ["穿着", "身着"] {
                if clause.contains(marker) {
                    return clause.replacen(marker, &format!("{marker}{canonical_color}"), 1);
                }
            }
        }

        clause.to_string()
    }

    /// Collapse `clothing.colors` to the single canonical entry.
    pub fn optimize_character(&self, mut record: Character) -> Character {
        if record.clothing.colors.len() > 1 {
            let joined = record.clothing.colors.join(", ");
            let primary = self.extract_primary(&joined);
            if primary.is_empty() {
                record.clothing.colors.truncate(1);
            } else {
                record.clothing.colors = vec![primary];
            }
        } else if let Some(only) = record.clothing.colors.first() {
            let normalized = self.extract_primary(only);
            if !normalized.is_empty() {
                record.clothing.colors = vec![normalized];
            }
        }
        record
    }

    /// The canonical clothing color of a stored character record.
    pub fn character_primary_color(&self, record: &Character) -> String {
        match record.clothing.colors.as_slice() {
            [] => String::new(),
            [only] => self.extract_primary(only),
            many => self.extract_primary(&many.join(", ")),
        }
    }
}

/// Normalize a matched token to its canonical label.
fn normalize_color(token: &str) -> Option<String> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    let lower = token.to_lowercase();
    let stripped = lower.strip_suffix('色').unwrap_or(&lower);

    for (synonym, canonical) in COLOR_SYNONYMS {
        if stripped == *synonym || lower == *synonym {
            return Some((*canonical).to_string());
        }
    }
    let with_suffix = format!("{stripped}色");
    if COLOR_PRIORITY.contains(&with_suffix.as_str()) {
        return Some(with_suffix);
    }
    if COLOR_PRIORITY.contains(&lower.as_str()) {
        return Some(lower);
    }
    None
}

/// Higher = stronger. Position in the fixed table; unknown colors score 0.
fn priority_score(color: &str) -> usize {
    COLOR_PRIORITY
        .iter()
        .position(|c| *c == color)
        .map(|i| COLOR_PRIORITY.len() - i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::types::Character;

    fn resolver() -> ColorResolver {
        ColorResolver::new().unwrap()
    }

    #[test]
    fn test_extract_primary_single() {
        assert_eq!(resolver().extract_primary("灰色"), "灰色");
        assert_eq!(resolver().extract_primary("navy"), "海军蓝");
    }

    #[test]
    fn test_extract_primary_conflict_uses_priority() {
        // 灰色 ranks above 深蓝色 in the fixed table
        assert_eq!(resolver().extract_primary("灰色, 深蓝色"), "灰色");
        assert_eq!(resolver().extract_primary("深蓝色，灰色"), "灰色");
        // Base colors outrank shades and specials
        assert_eq!(resolver().extract_primary("金色, 黑色"), "黑色");
    }

    #[test]
    fn test_extract_primary_empty() {
        assert_eq!(resolver().extract_primary(""), "");
        assert_eq!(resolver().extract_primary("没有提到任何服饰特征"), "");
    }

    #[test]
    fn test_priority_table_has_no_ties() {
        let mut seen = std::collections::HashSet::new();
        for color in COLOR_PRIORITY {
            assert!(seen.insert(priority_score(color)), "duplicate score for {color}");
            assert!(priority_score(color) > 0);
        }
    }

    #[test]
    fn test_apply_replaces_conflicting_color() {
        let r = resolver();
        let out = r.apply_to_text("叶文洁穿着蓝色衣服站在门口", "叶文洁", "灰色");
        assert!(out.contains("灰色衣服"), "got: {out}");
        assert!(!out.contains("蓝色"));
    }

    #[test]
    fn test_apply_rewrites_every_clothing_clause() {
        let r = resolver();
        let out = r.apply_to_text(
            "叶文洁穿着蓝色衣服走进大厅。叶文洁身着红色外套离开基地",
            "叶文洁",
            "灰色",
        );
        assert!(!out.contains("蓝色"), "got: {out}");
        assert!(!out.contains("红色"), "got: {out}");
        assert!(out.contains("灰色衣服"));
        assert!(out.contains("灰色外套"));
    }

    #[test]
    fn test_apply_inserts_color_when_absent() {
        let r = resolver();
        let out = r.apply_to_text("叶文洁穿着衣服走进来", "叶文洁", "灰色");
        assert!(out.contains("灰色"), "got: {out}");
    }

    #[test]
    fn test_apply_appends_parenthetical_without_clause() {
        let r = resolver();
        let out = r.apply_to_text("叶文洁站在控制室中操作设备", "叶文洁", "灰色");
        assert!(out.contains("叶文洁（身着灰色服装）"), "got: {out}");
    }

    #[test]
    fn test_apply_is_idempotent() {
        let r = resolver();
        for description in [
            "叶文洁穿着蓝色衣服站在门口",
            "叶文洁穿着衣服走进来",
            "叶文洁站在控制室中操作设备",
            "叶文洁穿着蓝色衣服走进大厅。叶文洁身着红色外套离开基地",
            "房间里空无一人",
        ] {
            let once = r.apply_to_text(description, "叶文洁", "灰色");
            let twice = r.apply_to_text(&once, "叶文洁", "灰色");
            assert_eq!(once, twice, "not idempotent for: {description}");
        }
    }

    #[test]
    fn test_apply_unresolvable_input_unchanged() {
        let r = resolver();
        assert_eq!(r.apply_to_text("空荡荡的走廊", "叶文洁", "灰色"), "空荡荡的走廊");
        assert_eq!(r.apply_to_text("叶文洁在看书", "叶文洁", ""), "叶文洁在看书");
        assert_eq!(r.apply_to_text("", "叶文洁", "灰色"), "");
    }

    #[test]
    fn test_optimize_character_collapses_colors() {
        let r = resolver();
        let mut record = Character::minimal("叶文洁");
        record.clothing.colors = vec!["深蓝色".to_string(), "灰色".to_string()];
        let optimized = r.optimize_character(record);
        assert_eq!(optimized.clothing.colors, vec!["灰色".to_string()]);
    }

    #[test]
    fn test_optimize_character_single_color_normalized() {
        let r = resolver();
        let mut record = Character::minimal("汪淼");
        record.clothing.colors = vec!["gray".to_string()];
        let optimized = r.optimize_character(record);
        assert_eq!(optimized.clothing.colors, vec!["灰色".to_string()]);
    }

    #[test]
    fn test_character_primary_color() {
        let r = resolver();
        let mut record = Character::minimal("叶文洁");
        assert_eq!(r.character_primary_color(&record), "");
        record.clothing.colors = vec!["深蓝色".to_string(), "灰色".to_string()];
        assert_eq!(r.character_primary_color(&record), "灰色");
    }
}
