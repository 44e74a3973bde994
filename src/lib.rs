//! Sceneforge - Scene Description Enhancement Engine
//!
//! Sceneforge turns terse storyboard shot descriptions into production-ready
//! image prompts. It infers cinematic technical details, keeps characters and
//! scenes visually consistent across shots, and fuses everything back into
//! fluent text, optionally with the help of a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Enhancer                           │
//! │                                                            │
//! │  原始描述 ──► ColorResolver ──► TechnicalAnalyzer           │
//! │                (color pre-pass)   (shot/angle/light rules) │
//! │                                        │                   │
//! │              ┌─────────────────────────▼─────────────────┐ │
//! │              │            ConsistencyInjector            │ │
//! │              │  name / alias / feature detection against │ │
//! │              │  the EntityStore snapshot                 │ │
//! │              └─────────────────────────┬─────────────────┘ │
//! │                                        │                   │
//! │              ┌─────────────────────────▼─────────────────┐ │
//! │              │               ContentFuser                │ │
//! │              │  natural │ structured │ minimal │ LLM     │ │
//! │              │  + quality gate (one natural retry)       │ │
//! │              └─────────────────────────┬─────────────────┘ │
//! │                                        ▼                   │
//! │                                  增强后描述                 │
//! └────────────────────────────────────────────────────────────┘
//!            │                                      ▲
//!            ▼                                      │
//!  characters.json / scenes.json          LanguageModel (optional)
//! ```
//!
//! ## Modules
//!
//! - [`enhancer`]: pipeline orchestration and storyboard scripts
//! - [`entities`]: character/scene records, JSON store, text extraction
//! - [`colors`]: clothing-color conflict resolution
//! - [`technical`]: cinematic technical-detail inference
//! - [`consistency`]: entity detection and consistency retrieval
//! - [`fusion`]: content fusion strategies and quality scoring
//! - [`llm`]: language model capability and HTTP backend
//! - [`config`]: enhancer configuration and runtime updates

pub mod colors;
pub mod config;
pub mod consistency;
pub mod enhancer;
pub mod entities;
pub mod error;
pub mod fusion;
pub mod llm;
pub mod technical;

pub use config::EnhancerConfig;
pub use enhancer::Enhancer;
pub use error::{Error, Result};
