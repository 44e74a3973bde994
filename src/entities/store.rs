//! Entity store with file-based JSON persistence
//!
//! One JSON file per record kind under the project directory:
//!
//! ```text
//! <project>/
//! ├── characters.json
//! ├── scenes.json
//! └── consistency_rules.json
//! ```
//!
//! The store is the sole writer of these files (read-modify-write per
//! mutation). Reads go through a time-boxed snapshot cache: concurrent
//! readers may see a stale-but-complete snapshot, refreshed atomically.
//! Write failures surface as [`Error::Storage`]; a failed read is treated as
//! "entity not found" and logged.

use crate::entities::types::*;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Whole-table snapshot handed to readers. Internally consistent: both
/// tables were loaded in the same refresh.
#[derive(Debug, Clone, Default)]
pub struct EntitySnapshot {
    pub characters: HashMap<String, Character>,
    pub scenes: HashMap<String, Scene>,
}

struct CachedSnapshot {
    snapshot: Arc<EntitySnapshot>,
    taken_at: Instant,
}

/// Durable keyed storage of Character/Scene records.
pub struct EntityStore {
    characters_file: PathBuf,
    scenes_file: PathBuf,
    rules_file: PathBuf,
    cache_ttl: Duration,
    cache: RwLock<Option<CachedSnapshot>>,
}

impl EntityStore {
    /// Snapshot cache time-to-live.
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

    /// Open (or initialize) the store under the given project directory.
    ///
    /// Missing database files are created with their default shapes so a
    /// fresh project starts from a known state.
    pub async fn open(project_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(project_dir).await?;

        let store = Self {
            characters_file: project_dir.join("characters.json"),
            scenes_file: project_dir.join("scenes.json"),
            rules_file: project_dir.join("consistency_rules.json"),
            cache_ttl: Self::DEFAULT_CACHE_TTL,
            cache: RwLock::new(None),
        };

        if !store.characters_file.exists() {
            store
                .write_json(&store.characters_file, &CharacterDatabase::default())
                .await?;
        }
        if !store.scenes_file.exists() {
            store
                .write_json(&store.scenes_file, &SceneDatabase::default())
                .await?;
        }
        if !store.rules_file.exists() {
            store
                .write_json(&store.rules_file, &ConsistencyRules::default())
                .await?;
        }

        Ok(store)
    }

    /// Default project directory (~/.sceneforge/default/)
    pub fn default_dir() -> PathBuf {
        dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sceneforge")
            .join("default")
    }

    /// Override the snapshot cache TTL (tests use a zero TTL).
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    // =========================================================================
    // Character CRUD
    // =========================================================================

    /// Upsert a character record and persist immediately.
    pub async fn save_character(&self, id: &str, mut record: Character) -> Result<()> {
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        let mut db = self.load_characters().await;
        db.characters.insert(id.to_string(), record);
        db.last_updated = now_string();
        self.write_json(&self.characters_file, &db).await?;
        self.invalidate_cache().await;
        tracing::info!(id, "character saved");
        Ok(())
    }

    /// Fetch a character by id. Read failures degrade to `None`.
    pub async fn get_character(&self, id: &str) -> Option<Character> {
        self.load_characters().await.characters.remove(id)
    }

    /// All character records, keyed by id.
    pub async fn all_characters(&self) -> HashMap<String, Character> {
        self.load_characters().await.characters
    }

    /// Delete a character record.
    pub async fn delete_character(&self, id: &str) -> Result<()> {
        let mut db = self.load_characters().await;
        if db.characters.remove(id).is_some() {
            db.last_updated = now_string();
            self.write_json(&self.characters_file, &db).await?;
            self.invalidate_cache().await;
            tracing::info!(id, "character deleted");
        }
        Ok(())
    }

    // =========================================================================
    // Scene CRUD
    // =========================================================================

    /// Upsert a scene record and persist immediately.
    pub async fn save_scene(&self, id: &str, mut record: Scene) -> Result<()> {
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        let mut db = self.load_scenes().await;
        db.scenes.insert(id.to_string(), record);
        db.last_updated = now_string();
        self.write_json(&self.scenes_file, &db).await?;
        self.invalidate_cache().await;
        tracing::info!(id, "scene saved");
        Ok(())
    }

    /// Fetch a scene by id. Read failures degrade to `None`.
    pub async fn get_scene(&self, id: &str) -> Option<Scene> {
        self.load_scenes().await.scenes.remove(id)
    }

    /// All scene records, keyed by id.
    pub async fn all_scenes(&self) -> HashMap<String, Scene> {
        self.load_scenes().await.scenes
    }

    /// The scene-category keyword table from `scenes.json`.
    pub async fn scene_categories(&self) -> HashMap<String, Vec<String>> {
        self.load_scenes().await.scene_categories
    }

    /// Delete a scene record.
    pub async fn delete_scene(&self, id: &str) -> Result<()> {
        let mut db = self.load_scenes().await;
        if db.scenes.remove(id).is_some() {
            db.last_updated = now_string();
            self.write_json(&self.scenes_file, &db).await?;
            self.invalidate_cache().await;
            tracing::info!(id, "scene deleted");
        }
        Ok(())
    }

    // =========================================================================
    // Snapshot cache
    // =========================================================================

    /// A stale-or-fresh snapshot of both tables. Refresh is atomic: readers
    /// never observe one table newer than the other.
    pub async fn snapshot(&self) -> Arc<EntitySnapshot> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.taken_at.elapsed() < self.cache_ttl {
                    return Arc::clone(&cached.snapshot);
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another refresher may have won the race while we waited.
        if let Some(cached) = cache.as_ref() {
            if cached.taken_at.elapsed() < self.cache_ttl {
                return Arc::clone(&cached.snapshot);
            }
        }

        let snapshot = Arc::new(EntitySnapshot {
            characters: self.load_characters().await.characters,
            scenes: self.load_scenes().await.scenes,
        });
        *cache = Some(CachedSnapshot {
            snapshot: Arc::clone(&snapshot),
            taken_at: Instant::now(),
        });
        tracing::debug!(
            characters = snapshot.characters.len(),
            scenes = snapshot.scenes.len(),
            "entity snapshot refreshed"
        );
        snapshot
    }

    async fn invalidate_cache(&self) {
        *self.cache.write().await = None;
    }

    // =========================================================================
    // Consistency rules
    // =========================================================================

    /// The fallback-extraction keyword tables and shot mapping.
    pub async fn consistency_rules(&self) -> ConsistencyRules {
        self.read_json(&self.rules_file).await.unwrap_or_default()
    }

    /// Replace the consistency rules file.
    pub async fn save_consistency_rules(&self, mut rules: ConsistencyRules) -> Result<()> {
        rules.last_updated = now_string();
        self.write_json(&self.rules_file, &rules).await
    }

    /// Record which shots a character appears in.
    pub async fn update_character_shot_mapping(
        &self,
        character_id: &str,
        shot_ids: Vec<String>,
    ) -> Result<()> {
        let mut rules = self.consistency_rules().await;
        rules
            .character_shot_mapping
            .insert(character_id.to_string(), shot_ids);
        self.save_consistency_rules(rules).await
    }

    /// Scan shot texts for stored character names and build the
    /// character→shot mapping (`shot_1`, `shot_2`, ... by position).
    pub async fn match_characters_to_shots(
        &self,
        shot_texts: &[String],
    ) -> HashMap<String, Vec<String>> {
        let characters = self.all_characters().await;
        let mut mapping = HashMap::new();

        for (id, character) in &characters {
            let name = character.name.to_lowercase();
            if name.is_empty() {
                continue;
            }
            let shots: Vec<String> = shot_texts
                .iter()
                .enumerate()
                .filter(|(_, text)| text.to_lowercase().contains(&name))
                .map(|(i, _)| format!("shot_{}", i + 1))
                .collect();
            mapping.insert(id.clone(), shots);
        }

        mapping
    }

    /// Join the stored consistency prompts of the given records into one
    /// labeled prompt string.
    pub async fn generate_consistency_prompt(
        &self,
        character_ids: &[String],
        scene_ids: &[String],
    ) -> String {
        let snapshot = self.snapshot().await;
        let mut parts = Vec::new();

        for id in character_ids {
            if let Some(character) = snapshot.characters.get(id) {
                if !character.consistency_prompt.is_empty() {
                    parts.push(format!("角色{}: {}", character.name, character.consistency_prompt));
                }
            }
        }
        for id in scene_ids {
            if let Some(scene) = snapshot.scenes.get(id) {
                if !scene.consistency_prompt.is_empty() {
                    parts.push(format!("场景{}: {}", scene.name, scene.consistency_prompt));
                }
            }
        }

        parts.join("; ")
    }

    // =========================================================================
    // File helpers
    // =========================================================================

    async fn load_characters(&self) -> CharacterDatabase {
        self.read_json(&self.characters_file).await.unwrap_or_default()
    }

    async fn load_scenes(&self) -> SceneDatabase {
        self.read_json(&self.scenes_file).await.unwrap_or_default()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Option<T> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse store file");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read store file");
                None
            }
        }
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| Error::Storage(format!("write {} failed: {e}", path.display())))
    }
}

fn now_string() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn make_store() -> (EntityStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = EntityStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    fn sample_character() -> Character {
        let mut c = Character::minimal("叶文洁");
        c.aliases = vec!["叶教授".to_string()];
        c.appearance.gender = "女".to_string();
        c.appearance.hair = "短发".to_string();
        c.clothing.colors = vec!["灰色".to_string()];
        c.consistency_prompt = "中年女性，短发，穿灰色服装".to_string();
        c
    }

    #[tokio::test]
    async fn test_open_initializes_default_files() {
        let dir = TempDir::new().unwrap();
        let _store = EntityStore::open(dir.path()).await.unwrap();
        assert!(dir.path().join("characters.json").exists());
        assert!(dir.path().join("scenes.json").exists());
        assert!(dir.path().join("consistency_rules.json").exists());
    }

    #[tokio::test]
    async fn test_character_round_trip() {
        let (store, _dir) = make_store().await;
        let record = sample_character();
        store.save_character("叶文洁", record.clone()).await.unwrap();

        let fetched = store.get_character("叶文洁").await.unwrap();
        assert_eq!(fetched, record);

        store.delete_character("叶文洁").await.unwrap();
        assert!(store.get_character("叶文洁").await.is_none());
    }

    #[tokio::test]
    async fn test_save_assigns_missing_id() {
        let (store, _dir) = make_store().await;
        let record = Character {
            name: "汪淼".to_string(),
            ..Default::default()
        };
        store.save_character("wang_miao", record).await.unwrap();
        let fetched = store.get_character("wang_miao").await.unwrap();
        assert_eq!(fetched.id, "wang_miao");
    }

    #[tokio::test]
    async fn test_scene_round_trip() {
        let (store, _dir) = make_store().await;
        let mut scene = Scene::minimal("控制室", SceneCategory::Indoor);
        scene.consistency_prompt = "红岸基地控制室，布满仪表".to_string();
        store.save_scene("控制室", scene.clone()).await.unwrap();

        let fetched = store.get_scene("控制室").await.unwrap();
        assert_eq!(fetched, scene);

        store.delete_scene("控制室").await.unwrap();
        assert!(store.get_scene("控制室").await.is_none());
    }

    #[tokio::test]
    async fn test_persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = EntityStore::open(dir.path()).await.unwrap();
            store
                .save_character("叶文洁", sample_character())
                .await
                .unwrap();
        }
        let store = EntityStore::open(dir.path()).await.unwrap();
        let fetched = store.get_character("叶文洁").await.unwrap();
        assert_eq!(fetched.name, "叶文洁");
    }

    #[tokio::test]
    async fn test_snapshot_reflects_writes() {
        let (store, _dir) = make_store().await;
        let first = store.snapshot().await;
        assert!(first.characters.is_empty());

        store
            .save_character("叶文洁", sample_character())
            .await
            .unwrap();

        // Writes invalidate the cache, so the next snapshot is fresh.
        let second = store.snapshot().await;
        assert!(second.characters.contains_key("叶文洁"));
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_within_ttl() {
        let (store, _dir) = make_store().await;
        let first = store.snapshot().await;
        let second = store.snapshot().await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let (store, dir) = make_store().await;
        tokio::fs::write(dir.path().join("characters.json"), "{not json")
            .await
            .unwrap();
        assert!(store.get_character("anyone").await.is_none());
        assert!(store.all_characters().await.is_empty());
    }

    #[tokio::test]
    async fn test_shot_mapping_round_trip() {
        let (store, _dir) = make_store().await;
        store
            .update_character_shot_mapping("叶文洁", vec!["shot_1".into(), "shot_3".into()])
            .await
            .unwrap();
        let rules = store.consistency_rules().await;
        assert_eq!(
            rules.character_shot_mapping["叶文洁"],
            vec!["shot_1".to_string(), "shot_3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_match_characters_to_shots() {
        let (store, _dir) = make_store().await;
        store
            .save_character("叶文洁", sample_character())
            .await
            .unwrap();

        let shots = vec![
            "叶文洁站在控制室中".to_string(),
            "一望无际的雪原".to_string(),
            "叶文洁按下发射按钮".to_string(),
        ];
        let mapping = store.match_characters_to_shots(&shots).await;
        assert_eq!(
            mapping["叶文洁"],
            vec!["shot_1".to_string(), "shot_3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_generate_consistency_prompt() {
        let (store, _dir) = make_store().await;
        store
            .save_character("叶文洁", sample_character())
            .await
            .unwrap();
        let mut scene = Scene::minimal("控制室", SceneCategory::Indoor);
        scene.consistency_prompt = "红岸基地控制室".to_string();
        store.save_scene("控制室", scene).await.unwrap();

        let prompt = store
            .generate_consistency_prompt(
                &["叶文洁".to_string()],
                &["控制室".to_string()],
            )
            .await;
        assert!(prompt.contains("角色叶文洁"));
        assert!(prompt.contains("场景控制室"));
    }
}
