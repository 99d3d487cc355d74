mod approval;
mod chat;
mod commands;
mod config;
mod logging;
mod render;

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "pg", version)]
#[command(about = "Local-first coding agent that can only propose reviewable diffs")]
struct Cli {
    /// Repository to operate on. Defaults to the current directory.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,
    /// User configuration file. Defaults to `<config dir>/pg/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, short, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new session with a goal and make it active.
    Start { goal: String },
    /// Show the active session.
    Status,
    /// Run the agent once on a request within the active session.
    Ask {
        prompt: String,
        #[arg(long, action = ArgAction::SetTrue)]
        stream: bool,
        /// Run model-requested commands without asking.
        #[arg(long = "yes", action = ArgAction::SetTrue)]
        approve_commands: bool,
    },
    /// Ask the model for a structured plan.
    Plan { goal: String },
    /// Interactive chat with the agent.
    Agent {
        #[arg(long)]
        resume: Option<String>,
    },
    /// Show pending patches.
    Review,
    /// Apply pending patches to the working tree.
    Apply {
        #[arg(long, action = ArgAction::SetTrue)]
        yes: bool,
    },
    /// Drop pending patches without applying them.
    Discard,
    /// Make an existing session active again.
    Resume { id: String },
    /// List sessions in this repository.
    Sessions,
    /// Record the working tree under a label.
    Snapshot { label: String },
    /// Put the working tree back to a labelled snapshot.
    Restore { label: String },
    /// List snapshots.
    Snapshots,
    /// Show changes to one file since the last recorded state.
    Diff { path: String },
    /// Write a starter user configuration.
    Setup {
        /// Configure the local llama-cli provider with this GGUF model.
        #[arg(long)]
        local_model: Option<PathBuf>,
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = run(cli).await;
    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, String> {
    let user_config = cli.config.or_else(config::user_config_path);
    let repo_dir = cli.repo;
    let open = || commands::Repo::open(repo_dir.as_deref(), user_config.clone());

    match cli.command {
        Commands::Setup { local_model, force } => {
            commands::setup(user_config.as_deref(), local_model, force)
        }
        Commands::Start { goal } => commands::start(&open()?, &goal),
        Commands::Status => commands::status(&open()?),
        Commands::Ask {
            prompt,
            stream,
            approve_commands,
        } => commands::ask(&open()?, &prompt, stream, approve_commands).await,
        Commands::Plan { goal } => commands::plan(&open()?, &goal).await,
        Commands::Agent { resume } => chat::run(&open()?, resume.as_deref()).await,
        Commands::Review => commands::review(&open()?),
        Commands::Apply { yes } => commands::apply(&open()?, yes),
        Commands::Discard => commands::discard(&open()?),
        Commands::Resume { id } => commands::resume(&open()?, &id),
        Commands::Sessions => commands::sessions(&open()?),
        Commands::Snapshot { label } => commands::snapshot(&open()?, &label),
        Commands::Restore { label } => commands::restore(&open()?, &label),
        Commands::Snapshots => commands::snapshots(&open()?),
        Commands::Diff { path } => commands::diff(&open()?, &path),
    }
}
