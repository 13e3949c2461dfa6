mod app;
mod assemble;
mod cli;
mod cms;
mod config;
mod credentials;
mod daemon;
mod db;
mod error;
mod handlers;
mod images;
mod mail;
mod media;
mod model_cache;
mod models;
mod orchestrator;
mod prompt;
mod providers;
mod registry;
mod schedule;
mod server;
mod settings;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::app::App;
use crate::cli::{CategoryCommands, Cli, Commands, ConfigCommands, KeyCommands};
use crate::config::{load_config, validate_config};
use crate::credentials::{KeySource, Vendor};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.autoinsight.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!("config validated successfully");

    let Some(command) = cli.command else {
        return daemon::run(config).await;
    };

    if let Commands::Validate = command {
        println!("Configuration is valid.");
        return Ok(());
    }

    let (pool, app) = daemon::open(config).await?;

    match command {
        Commands::Validate => {}
        Commands::Generate => {
            let outcome = handlers::run_manual(&app).await?;
            println!("{} (post #{}: {})", handlers::SUCCESS_MESSAGE, outcome.post_id, outcome.title);
            if let Some(media_id) = outcome.featured_media {
                println!("Featured image: media #{media_id}");
            }
        }
        Commands::Models { remote } => print_models(&app, remote).await?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = app.generation_config().await?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigCommands::Set { field, value } => {
                let mut config = app.generation_config().await?;
                config.apply_field(&field, &value)?;
                let saved = app.save_generation_config(config).await?;
                println!("{}", serde_json::to_string_pretty(&saved)?);
            }
        },
        Commands::Key { command } => match command {
            KeyCommands::Set { vendor } => {
                let vendor = Vendor::parse(&vendor)
                    .ok_or_else(|| anyhow::anyhow!("unknown vendor '{vendor}' (openai, claude, gemini, stability)"))?;
                let key = rpassword::prompt_password_stdout(&format!("{vendor} API key: "))
                    .context("reading API key")?;
                let key = key.trim();
                if key.is_empty() {
                    anyhow::bail!("API key must not be empty");
                }
                app.cms.store_option(vendor.option_key(), key).await?;
                println!("{vendor} API key stored.");
            }
            KeyCommands::Status => {
                let credentials = app.credentials().await?;
                for vendor in Vendor::ALL {
                    let source = match credentials.source(vendor) {
                        KeySource::Environment => format!("set via {}", vendor.env_var()),
                        KeySource::Stored => "stored".to_string(),
                        KeySource::Missing => "not set".to_string(),
                    };
                    println!("{vendor:<10} {source}");
                }
            }
        },
        Commands::Category { command } => match command {
            CategoryCommands::Add { name } => {
                let id = store::add_category(&pool, &name).await?;
                println!("Category #{id}: {}", name.trim());
            }
            CategoryCommands::List => {
                let categories = store::list_categories(&pool).await?;
                if categories.is_empty() {
                    println!("No categories.");
                }
                for category in categories {
                    println!("{:>4}  {}", category.id, category.name);
                }
            }
        },
        Commands::Schedule => {
            let info = schedule::next_run(app.cms.as_ref()).await?;
            println!("{}", schedule::describe(info.as_ref(), app.config.timezone()));
        }
    }

    pool.close().await;
    Ok(())
}

async fn print_models(app: &App, remote: bool) -> Result<()> {
    for group in registry::list_models() {
        println!("{}:", group.provider.name());
        for model in group.models {
            println!("  {:<28} {} ({})", model.id, model.display_name, model.description);
        }
    }

    if remote {
        match app.custom_endpoint_models().await? {
            Some(models) => {
                println!("custom endpoint:");
                for model in models.iter() {
                    println!("  {:<28} {}", model.id, model.name);
                }
            }
            None => println!("No custom endpoint configured."),
        }
    }
    Ok(())
}
