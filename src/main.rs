mod config;
mod entities;
mod error;
mod http;
mod llm;
mod orchestrator;
mod persistence;
mod progress;
mod server;
mod tools;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use llm::{LlmClient, ModelRouter, Provider, TaskKind};
use orchestrator::Orchestrator;
use persistence::Persistence;
use std::path::PathBuf;
use tools::{DomainReputationTool, ScamRegistry, WebSearchTool};
use uuid::Uuid;

/// CLI override for LLM provider/model.
pub struct LlmOverride {
    pub provider: Provider,
    pub model: String,
}

fn make_llm_override(provider: Option<String>, model: Option<String>) -> Option<LlmOverride> {
    if provider.is_none() && model.is_none() {
        return None;
    }
    let provider = provider
        .map(|p| match p.as_str() {
            "anthropic" => Provider::Anthropic,
            "openai" => Provider::OpenAi,
            "groq" => Provider::Groq,
            _ => Provider::OpenRouter,
        })
        .unwrap_or_default();
    let model = model.unwrap_or_else(|| match &provider {
        Provider::Anthropic => "claude-sonnet-4-20250514".into(),
        _ => "arcee-ai/trinity-large-preview:free".into(),
    });
    Some(LlmOverride { provider, model })
}

#[derive(Parser)]
#[command(name = "scamwatch", about = "Multi-tool scam-detection orchestration engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the HTTP ingress, status, health, and progress-websocket server
    Serve {
        /// Address to bind, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Base URL advertised in agent-path responses, e.g. ws://localhost:8080
        #[arg(long, default_value = "ws://localhost:8080")]
        ws_base_url: String,

        /// Concurrent agent-task slots
        #[arg(long, default_value_t = 16)]
        worker_capacity: usize,
    },

    /// Extract entities from a piece of text and print them as JSON
    Extract {
        /// Text to extract entities from; reads stdin if omitted
        text: Option<String>,

        /// Default region for phone-number parsing
        #[arg(long, default_value = "US")]
        region: String,
    },

    /// Run the full orchestrator pipeline once against a piece of text
    Analyze {
        /// Text to analyze; reads stdin if omitted
        text: Option<String>,

        /// LLM provider override: anthropic, openrouter, openai, groq
        #[arg(long)]
        provider: Option<String>,

        /// LLM model override
        #[arg(long)]
        model: Option<String>,
    },

    /// Look up or report an entity against the scam registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
}

#[derive(clap::Subcommand)]
enum RegistryAction {
    /// Look up an entity
    Lookup {
        /// phone, url, email, bitcoin, payment
        entity_type: String,
        entity_value: String,
    },
    /// File a report against an entity
    Report {
        entity_type: String,
        entity_value: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

fn read_text_arg(text: Option<String>) -> Result<String> {
    match text {
        Some(t) => Ok(t),
        None => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf).context("reading stdin")?;
            Ok(buf)
        }
    }
}

fn build_llm_client(llm_config: &config::LlmConfig, llm_override: Option<&LlmOverride>) -> Result<LlmClient> {
    let provider = llm_override
        .map(|o| o.provider.clone())
        .unwrap_or_else(|| llm_config.provider.clone());
    let model = llm_override
        .map(|o| o.model.clone())
        .unwrap_or_else(|| llm_config.model.clone());
    let client = LlmClient::from_config(
        provider,
        model,
        llm_config.max_tokens,
        llm_config.api_key_env.clone(),
        llm_config.base_url.clone(),
    )?;
    Ok(client)
}

fn build_model_router(cfg: &Config, llm_override: Option<&LlmOverride>) -> Result<ModelRouter> {
    let default_client = build_llm_client(&cfg.llm, llm_override)?;
    Ok(ModelRouter::new(default_client).with_client(TaskKind::FastPathClassification, build_llm_client(&cfg.llm, llm_override)?))
}

async fn build_orchestrator(cfg: &Config, model_router: ModelRouter) -> Result<Orchestrator> {
    let http_client = http::HttpClient::new("scamwatch-agent/0.1.0")?;
    let persistence = Persistence::connect(&cfg.persistence).await?;
    let registry = ScamRegistry::new(persistence.pool().clone());
    let web_search = WebSearchTool::new(http_client.clone(), cfg.exa.clone());
    let domain_reputation = DomainReputationTool::new(http_client, cfg.domain_reputation.clone());

    Ok(Orchestrator {
        registry,
        web_search,
        domain_reputation,
        model_router,
        persistence,
        agent_config: cfg.agent.clone(),
        company_registry_config: cfg.company_registry.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "scamwatch_agent=info".parse().unwrap()),
        )
        .init();

    dotenvy::from_path("../.env").ok();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            ws_base_url,
            worker_capacity,
        } => {
            let cfg = Config::load(&cli.config)?;
            cfg.validate()?;
            let model_router = build_model_router(&cfg, None)?;
            let orchestrator = build_orchestrator(&cfg, model_router.clone()).await?;
            let persistence = orchestrator.persistence.clone();
            let state = server::build_state(&cfg, orchestrator, model_router, ws_base_url, worker_capacity);

            let retention_persistence = persistence.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(6 * 60 * 60));
                loop {
                    interval.tick().await;
                    server::run_retention_sweep(&retention_persistence).await;
                }
            });

            let app = server::router(state);
            let listener = tokio::net::TcpListener::bind(&bind).await.context("binding listener")?;
            tracing::info!(%bind, "scamwatch agent listening");
            axum::serve(listener, app).await.context("serving")?;
            Ok(())
        }

        Command::Extract { text, region } => {
            let text = read_text_arg(text)?;
            let opts = entities::ExtractOptions {
                default_region: region,
                ..Default::default()
            };
            let extracted = entities::extract(&text, &opts);
            println!("{}", serde_json::to_string_pretty(&extracted)?);
            Ok(())
        }

        Command::Analyze { text, provider, model } => {
            let text = read_text_arg(text)?;
            let cfg = Config::load(&cli.config)?;
            cfg.validate()?;
            let llm_override = make_llm_override(provider, model);
            let model_router = build_model_router(&cfg, llm_override.as_ref())?;
            let orchestrator = build_orchestrator(&cfg, model_router).await?;
            let result = orchestrator.execute(Uuid::new_v4(), &text, None).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }

        Command::Registry { action } => {
            let cfg = Config::load(&cli.config)?;
            let persistence = Persistence::connect(&cfg.persistence).await?;
            let registry = ScamRegistry::new(persistence.pool().clone());
            match action {
                RegistryAction::Lookup { entity_type, entity_value } => {
                    let result = match entity_type.as_str() {
                        "phone" => registry.check_phone(&entity_value).await?,
                        "url" => registry.check_url(&entity_value).await?,
                        "email" => registry.check_email(&entity_value).await?,
                        other => registry.check_payment(&entity_value, other).await?,
                    };
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                RegistryAction::Report {
                    entity_type,
                    entity_value,
                    notes,
                } => {
                    registry
                        .add_report(&entity_type, &entity_value, serde_json::json!({"source": "cli"}), notes.as_deref())
                        .await?;
                    println!("reported {entity_type}:{entity_value}");
                }
            }
            Ok(())
        }
    }
}
