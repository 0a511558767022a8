mod cli;
mod console;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kh_agent::{AgentDeps, AgentRegistry, InboundMessage};
use kh_codec::{FaceTable, Segment};
use kh_domain::config::Config;
use kh_mcp_client::McpManager;
use kh_providers::{ChatSummarizer, OpenAiCompatProvider};

use crate::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let path = cli::config_path(cli.config.as_deref());
    let config = cli::load_config(&path)?;

    match cli.command {
        Some(Command::Config(ConfigCommand::Validate)) => {
            println!("{}: ok", path.display());
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Run {
            message,
            group,
            json,
        }) => {
            let (registry, mcp) = bootstrap(Arc::new(config))?;
            let agent = registry.get_or_create(&group);
            agent
                .add_message(InboundMessage::new("m1", "you", "1", vec![Segment::text(message)]))
                .await;
            let result = console::run_turn(&agent, json).await;
            mcp.shutdown().await;
            result
        }
        None => {
            let (registry, mcp) = bootstrap(Arc::new(config))?;
            let agent = registry.get_or_create("console");
            let me = console::Speaker {
                name: "you".into(),
                uid: "1".into(),
            };
            let result = console::chat(agent, me).await;
            mcp.shutdown().await;
            result
        }
        Some(Command::Chat { group, name, uid }) => {
            let (registry, mcp) = bootstrap(Arc::new(config))?;
            let agent = registry.get_or_create(&group);
            let result = console::chat(agent, console::Speaker { name, uid }).await;
            mcp.shutdown().await;
            result
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,kh_agent=info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Wire the completion service, error summarizer, MCP servers and face
/// table into an agent registry.
fn bootstrap(config: Arc<Config>) -> anyhow::Result<(AgentRegistry, Arc<McpManager>)> {
    if let Some(faces) = &config.codec.faces_file {
        match FaceTable::load_json(Path::new(faces)) {
            Ok(table) => {
                tracing::info!(path = %faces, faces = table.len(), "face table loaded");
                FaceTable::install(table);
            }
            Err(e) => tracing::warn!(path = %faces, error = %e, "failed to load face table"),
        }
    }

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config.provider)?);
    let summarizer = Arc::new(ChatSummarizer::new(provider.clone(), config.agent.model.clone()));
    let mcp = Arc::new(McpManager::new(&config.mcp));

    let mut deps = AgentDeps::new(provider).with_summarizer(summarizer);
    if !mcp.is_empty() {
        deps = deps.with_discovery(mcp.clone());
    }

    Ok((AgentRegistry::new(config, deps), mcp))
}
