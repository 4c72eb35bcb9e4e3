use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use freshet::app::AppContext;
use freshet::cli::commands::{self, AddOptions};
use freshet::cli::{Cli, Commands};
use freshet::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("freshet={}", default_level))),
        )
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Add {
            url,
            title,
            disabled,
            timeout,
            max_age,
        } => {
            commands::add_resource(
                &ctx,
                &url,
                AddOptions {
                    title,
                    disabled,
                    timeout,
                    max_age,
                },
            )?;
        }
        Commands::List => {
            commands::list_resources(&ctx)?;
        }
        Commands::Items { limit, order_by } => {
            commands::list_items(&ctx, limit, &order_by)?;
        }
        Commands::Poll { sweep } => {
            commands::poll(&ctx, &sweep).await?;
        }
        Commands::Watch { interval, sweep } => {
            commands::watch(&ctx, interval, &sweep).await?;
        }
    }

    Ok(())
}
