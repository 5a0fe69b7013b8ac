mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ImageCommands};
use llmdock::ai::{ChatMessage, ChatRequest, OllamaClient};
use llmdock::error::{Resource, RuntimeError};
use llmdock::monitoring::TracingConfig;
use llmdock::{DockConfig, DockError, ModelCatalog, Orchestrator, canonical_name};
use std::io::Write;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = TracingConfig::for_cli(cli.verbose, cli.json).init()?;

    info!("🚀 llmdock starting up...");

    if let Err(err) = run(cli).await {
        let kind = err.kind();
        eprintln!("❌ {} [{}, HTTP {}]", err, kind, kind.http_status());
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> llmdock::Result<()> {
    let config = match &cli.config {
        Some(path) => DockConfig::from_path(path)?,
        None => DockConfig::load()?,
    };
    let orchestrator = Orchestrator::connect_local(config).await;

    match cli.command {
        Commands::Ping => {
            orchestrator.try_connect().await?;
            println!("✅ Container daemon reachable");
        }

        Commands::Ps => {
            let containers = orchestrator.try_list_available().await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&containers)?);
                return Ok(());
            }
            if containers.is_empty() {
                info!("No engine containers found");
                return Ok(());
            }

            println!(
                "{:<28} {:<15} {:<8} {:<20} {:<10}",
                "NAME", "STATUS", "PORT", "MODEL", "PARAMETERS"
            );
            println!("{}", "─".repeat(84));
            for container in &containers {
                println!(
                    "{:<28} {:<15} {:<8} {:<20} {:<10}",
                    container.name,
                    container.status,
                    container.port.as_deref().unwrap_or("-"),
                    container.environment.model.as_deref().unwrap_or("-"),
                    container.environment.parameters.as_deref().unwrap_or("-"),
                );
            }
        }

        Commands::Image { command } => match command {
            ImageCommands::Status => {
                let pulled = orchestrator.try_is_image_pulled().await?;
                let image = orchestrator.config().engine.image_ref();
                if pulled {
                    println!("✅ {} is pulled", image);
                } else {
                    println!("⬇️  {} is not pulled", image);
                }
            }
            ImageCommands::Pull => {
                let image = orchestrator.try_pull_image().await?;
                println!("✅ Pulled {} ({})", image.tags.join(", "), image.id);
            }
        },

        Commands::Get { name } => {
            let record = orchestrator
                .try_get_container(&name)
                .await?
                .ok_or_else(|| RuntimeError::not_found(Resource::Container, &name))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Run { model, parameters } => {
            let catalog = ModelCatalog::load(&cli.catalog)?;
            let (ai_model, version) =
                catalog
                    .resolve(&model, &parameters)
                    .ok_or_else(|| RuntimeError::InvalidRequest {
                        reason: format!("{}:{} is not in the catalog", model, parameters),
                    })?;

            let record = orchestrator.try_run_container(ai_model, version).await?;
            println!("🚀 {} is {:?}", record.name, record.state);
        }

        Commands::Stop { model, parameters } => {
            let name = canonical_name(&model, &parameters)?;
            orchestrator.try_stop_container(&name).await?;
            println!("⏹️  Stopped {}", name);
        }

        Commands::Rm { model, parameters } => {
            let name = canonical_name(&model, &parameters)?;
            orchestrator.try_remove_container(&name).await?;
            println!("🗑️  Removed {}", name);
        }

        Commands::Port { model, parameters } => {
            let port = orchestrator
                .try_get_container_port(&model, &parameters)
                .await?
                .ok_or_else(|| not_running(&model, &parameters))?;
            println!("{}", port);
        }

        Commands::Env { name, key } => match key {
            Some(key) => match orchestrator.try_get_container_env(&name, &key).await? {
                Some(value) => println!("{}", value),
                None => println!("{} is not set on {}", key, name),
            },
            None => {
                let record = orchestrator
                    .try_get_container(&name)
                    .await?
                    .ok_or_else(|| RuntimeError::not_found(Resource::Container, &name))?;
                for entry in &record.env {
                    println!("{}", entry);
                }
            }
        },

        Commands::SetEnv { name, assignment } => {
            let (key, value) =
                assignment
                    .split_once('=')
                    .ok_or_else(|| RuntimeError::InvalidRequest {
                        reason: format!("expected KEY=VALUE, got '{}'", assignment),
                    })?;
            let record = orchestrator.try_set_container_env(&name, key, value).await?;
            println!("♻️  Recreated {} with {}={}", record.name, key, value);
        }

        Commands::Chat {
            model,
            parameters,
            stream,
            image,
            message,
        } => {
            let port = orchestrator
                .try_get_container_port(&model, &parameters)
                .await?
                .ok_or_else(|| not_running(&model, &parameters))?;
            let client = OllamaClient::for_endpoint(&orchestrator.config().engine.host, &port);

            let mut message = ChatMessage::user(message);
            if let Some(image) = image.as_deref() {
                message = message.with_image(image);
            }
            let request = ChatRequest::for_model(&model, &parameters, Vec::new(), message);

            if stream {
                client
                    .chat_stream(&request, |token| {
                        print!("{}", token);
                        let _ = std::io::stdout().flush();
                    })
                    .await?;
                println!();
            } else {
                let reply = client.chat(&request).await?;
                println!("{}", reply);
            }
        }
    }

    Ok(())
}

fn not_running(model: &str, parameters: &str) -> DockError {
    RuntimeError::not_found(
        Resource::Container,
        format!("{}:{} (not running)", model, parameters),
    )
    .into()
}
