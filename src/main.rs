//! Sceneforge - Scene Description Enhancement Engine
//!
//! Command line front-end for the enhancement pipeline: single descriptions,
//! whole storyboard scripts, entity extraction and configuration management.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sceneforge::config::{ConfigUpdate, EnhancerConfig};
use sceneforge::entities::store::EntityStore;
use sceneforge::entities::EntityExtractor;
use sceneforge::llm::{HttpLanguageModel, HttpModelConfig};
use sceneforge::Enhancer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sceneforge")]
#[command(version)]
#[command(about = "Scene description enhancement for AI storyboards")]
struct Cli {
    /// Project directory holding the entity store and config
    #[arg(short, long, env = "SCENEFORGE_PROJECT")]
    project: Option<PathBuf>,

    /// Language model endpoint (OpenAI-compatible chat completions)
    #[arg(long, env = "SCENEFORGE_LLM_ENDPOINT")]
    llm_endpoint: Option<String>,

    /// Language model API key
    #[arg(long, env = "SCENEFORGE_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Language model name
    #[arg(long, env = "SCENEFORGE_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enhance a single shot description
    Enhance {
        /// The description to enhance
        description: String,

        /// Known character names present in the shot
        #[arg(short, long)]
        characters: Vec<String>,

        /// Fusion strategy override (natural, structured, minimal, intelligent)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Print the full report as JSON instead of just the text
        #[arg(long)]
        details: bool,
    },

    /// Enhance a storyboard script file and write texts/prompt.json
    Storyboard {
        /// Path to the script file
        script: PathBuf,

        /// Visual style to apply (e.g. 电影风格, 动漫风格)
        #[arg(short, long)]
        style: Option<String>,
    },

    /// Extract characters and scenes from a text file into the store
    Extract {
        /// Path to the narrative text file
        text: PathBuf,
    },

    /// Show or update the enhancer configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active configuration as JSON
    Show,
    /// Update one configuration key
    Set {
        /// Key (enable_technical_details, enable_consistency_injection,
        /// enhancement_level, fusion_strategy, quality_threshold)
        key: String,
        /// New value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sceneforge={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let project_dir = cli
        .project
        .clone()
        .unwrap_or_else(EntityStore::default_dir);
    let config_path = project_dir.join("enhancer_config.json");
    let config = EnhancerConfig::load(&config_path).await?;
    let model = build_model(&cli)?;

    match cli.command {
        Commands::Enhance {
            description,
            characters,
            strategy,
            details,
        } => {
            let mut config = config;
            if let Some(strategy) = strategy {
                config.apply_update(ConfigUpdate {
                    fusion_strategy: Some(strategy),
                    ..Default::default()
                })?;
            }
            let enhancer = build_enhancer(&project_dir, config, model).await?;
            let report = enhancer.enhance_with_details(&description, &characters).await;
            if details {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.enhanced_description);
            }
        }

        Commands::Storyboard { script, style } => {
            let content = tokio::fs::read_to_string(&script)
                .await
                .with_context(|| format!("reading script {}", script.display()))?;
            let enhancer = build_enhancer(&project_dir, config, model).await?;
            let result = enhancer
                .enhance_storyboard(&content, style.as_deref())
                .await?;
            println!("{}", result.enhanced_script);
            tracing::info!(
                shots = result.shots.len(),
                "storyboard enhanced, prompts written to {}",
                enhancer.project_dir().join("texts/prompt.json").display()
            );
        }

        Commands::Extract { text } => {
            let content = tokio::fs::read_to_string(&text)
                .await
                .with_context(|| format!("reading text {}", text.display()))?;
            let store = EntityStore::open(&project_dir).await?;
            let extractor = match model {
                Some(model) => EntityExtractor::with_model(model, config.llm_timeout()),
                None => EntityExtractor::keyword_only(),
            };
            let summary = extractor.auto_extract_and_save(&content, &store).await?;
            println!(
                "extracted {} characters and {} scenes",
                summary.characters_extracted, summary.scenes_extracted
            );
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Set { key, value } => {
                let mut config = config;
                config.apply_update(parse_update(&key, &value)?)?;
                config.save(&config_path).await?;
                println!("updated {key}");
            }
        },
    }

    Ok(())
}

async fn build_enhancer(
    project_dir: &Path,
    config: EnhancerConfig,
    model: Option<Arc<HttpLanguageModel>>,
) -> Result<Enhancer> {
    let enhancer = Enhancer::open(project_dir, config).await?;
    Ok(match model {
        Some(model) => enhancer.with_model(model),
        None => enhancer,
    })
}

fn build_model(cli: &Cli) -> Result<Option<Arc<HttpLanguageModel>>> {
    let Some(endpoint) = cli.llm_endpoint.clone() else {
        return Ok(None);
    };
    let config = HttpModelConfig::new(endpoint, cli.llm_model.clone())
        .with_api_key(cli.llm_api_key.clone().unwrap_or_default());
    Ok(Some(Arc::new(HttpLanguageModel::new(config)?)))
}

fn parse_update(key: &str, value: &str) -> Result<ConfigUpdate> {
    let mut update = ConfigUpdate::default();
    match key {
        "enable_technical_details" => {
            update.enable_technical_details = Some(value.parse().context("expected true/false")?)
        }
        "enable_consistency_injection" => {
            update.enable_consistency_injection =
                Some(value.parse().context("expected true/false")?)
        }
        "enhancement_level" => update.enhancement_level = Some(value.to_string()),
        "fusion_strategy" => update.fusion_strategy = Some(value.to_string()),
        "quality_threshold" => {
            update.quality_threshold = Some(value.parse().context("expected a number in [0,1]")?)
        }
        other => anyhow::bail!("unknown configuration key: {other}"),
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_flags_usable_with_any_subcommand() {
        // The model is built from the top-level flags alone, before the
        // subcommand is consumed.
        for args in [
            vec!["sceneforge", "--llm-endpoint", "http://localhost:1234/v1", "enhance", "x"],
            vec!["sceneforge", "--llm-endpoint", "http://localhost:1234/v1", "extract", "t.txt"],
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            assert!(build_model(&cli).unwrap().is_some());
        }
    }

    #[test]
    fn test_no_endpoint_means_no_model() {
        let cli = Cli::try_parse_from(["sceneforge", "enhance", "x"]).unwrap();
        assert!(build_model(&cli).unwrap().is_none());
    }

    #[test]
    fn test_parse_update_rejects_unknown_key() {
        assert!(parse_update("budget", "3").is_err());
        assert!(parse_update("quality_threshold", "0.4").is_ok());
    }
}
