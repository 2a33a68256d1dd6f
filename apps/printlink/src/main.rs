//! printlink entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Peer-to-peer print job transfer.
#[derive(Parser, Debug)]
#[command(name = "printlink", version, about)]
struct Cli {
    /// Configuration file to use instead of the platform default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submits files from an in-process sender and prints them on an in-process agent.
    Demo(app::DemoArgs),
    /// Prints the effective configuration.
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %config.name,
        "starting printlink"
    );

    match cli.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Demo(args) => {
            // One cooperative event loop drives both participants.
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let summary = rt.block_on(app::run_demo(&config, args))?;
            println!("job {} {}", summary.job_id, summary.status);
            if let Some(cost) = summary.cost {
                println!("cost {cost:.2}");
            }
            for output in &summary.outputs {
                println!("printed {}", output.display());
            }
        }
    }
    Ok(())
}
