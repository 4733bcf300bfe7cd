//! Campus CLI - Command-line interface for Campus Virtual
//!
//! Usage:
//!   campus                         - Start interactive mode (/login, /signup, /logout, ...)
//!   campus status [--json]         - Show who is signed in
//!   campus open <path>             - Resolve a route for the current session
//!   campus roles                   - List roles
//!
//! Each process starts a fresh in-memory backend seeded from `--fixture`
//! (demo accounts without one), so a sign-in does not outlive the process.
//! Sign in through the REPL, or set `signedInAs` in the fixture to run the
//! one-shot commands as a persisted session.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cli::app::App;
use cli::commands::{OpenCommand, RolesCommand, StatusCommand};
use cli::interactive::InteractiveCli;
use cli::notifier::ConsoleNotifier;

#[derive(Parser)]
#[command(name = "campus")]
#[command(about = "Campus Virtual - session and role aware navigation")]
#[command(after_help = "Sign in with the interactive mode (run without a subcommand), or set `signedInAs` in the fixture.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Session configuration file (JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend seed data (JSON or YAML)
    #[arg(short, long, global = true)]
    fixture: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current auth state
    Status(StatusCommand),
    /// Resolve a route against the current auth state
    Open(OpenCommand),
    /// List roles
    Roles(RolesCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let app = App::load(
        cli.config.as_deref(),
        cli.fixture.as_deref(),
        Arc::new(ConsoleNotifier),
    )?;

    let Some(command) = cli.command else {
        // No subcommand - start interactive mode
        let mut interactive = InteractiveCli::new(app);
        return interactive.run().await;
    };

    app.start(false).await;
    let result = match command {
        Commands::Status(cmd) => cmd.run(&app).await,
        Commands::Open(cmd) => cmd.run(&app).await,
        Commands::Roles(cmd) => cmd.run(&app).await,
    };
    app.manager.teardown();
    result
}
