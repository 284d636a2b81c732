use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use crate::core::settings::Settings;
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod core;
mod daemon;
mod fetcher;

#[derive(Parser)]
#[command(name = "eats-bar")]
#[command(author, version, about = "Linux daemon that tracks food-delivery order status")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the polling daemon
    Daemon,

    /// Show current order status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Filter by account name
        #[arg(long)]
        account: Option<String>,

        /// Ask the running daemon instead of fetching directly
        #[arg(long)]
        daemon: bool,
    },

    /// Trigger daemon refresh via D-Bus
    Refresh,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging() {
    // Config errors are reported again, with logging up, by whoever loads it next.
    let default_filter = Settings::load()
        .map(|s| s.default_log_filter())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon => {
            init_logging();
            daemon::run().await
        }
        Commands::Status {
            json,
            account,
            daemon,
        } => {
            init_logging();
            cli::status::run(json, account, daemon).await
        }
        Commands::Refresh => {
            init_logging();
            cli::refresh::run().await
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
