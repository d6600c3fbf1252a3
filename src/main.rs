mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "symbol_tree_index=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(&cli)?;

    match cli.command {
        Commands::Index { path } => {
            cli::index_directory(&path, &config)?;
        }
        Commands::Find {
            name,
            path,
            source,
            ignore_case,
            fuzzy,
            regex,
            limit,
        } => {
            cli::find_symbols(
                &config,
                &path,
                source.as_deref(),
                &name,
                ignore_case,
                fuzzy,
                regex,
                limit,
            )
            .await?;
        }
        Commands::Derived { base, path } => {
            cli::find_derived(&config, &path, &base).await?;
        }
        Commands::Extensions {
            receiver,
            path,
            complex,
        } => {
            cli::list_extensions(&config, &path, receiver.as_deref(), complex).await?;
        }
        Commands::Watch { path } => {
            cli::watch_directory(&config, &path).await?;
        }
        Commands::Stats => {
            cli::show_stats(&config)?;
        }
    }

    Ok(())
}
