//! Entity knowledge base: durable Character/Scene records
//!
//! [`EntityStore`] owns the JSON files; [`EntityExtractor`] populates them
//! from narrative text (model-assisted, keyword fallback).

pub mod extract;
pub mod store;
pub mod types;

pub use extract::{EntityExtractor, ExtractionSummary};
pub use store::{EntitySnapshot, EntityStore};
pub use types::{
    Appearance, Atmosphere, Character, CharacterDatabase, Clothing, ConsistencyRules,
    Environment, Personality, Scene, SceneCategory, SceneDatabase, SceneLighting,
};
