//! `pg agent`: a conversational loop over one locked session.

use crate::approval::{ConsoleApprover, read_line};
use crate::commands::{Repo, apply_pending, report_apply};
use crate::render::{ConsoleEventEmitter, print_review, print_status};
use pg_agent::AgentMode;
use pg_session::{Session, SessionLock};
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_GOAL: &str = "Interactive coding session";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChatCommand {
    Review,
    Apply,
    Status,
    Help,
    Exit,
}

impl ChatCommand {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "review" => Some(Self::Review),
            "apply" => Some(Self::Apply),
            "status" => Some(Self::Status),
            "help" => Some(Self::Help),
            "exit" | "quit" => Some(Self::Exit),
            _ => None,
        }
    }
}

pub async fn run(repo: &Repo, resume: Option<&str>) -> Result<ExitCode, String> {
    let config = repo.config()?;
    let (mut session, _lock) = open_session(repo, resume).await?;

    let emitter = Arc::new(ConsoleEventEmitter::default());
    let agent = repo
        .agent(&config, AgentMode::Interactive, Arc::new(ConsoleApprover))?
        .with_emitter(emitter.clone());

    print_welcome(repo, &session);
    loop {
        let Some(input) = prompt("\nYou: ").await else {
            break;
        };
        if input.is_empty() {
            continue;
        }

        match ChatCommand::parse(&input) {
            Some(ChatCommand::Exit) => break,
            Some(ChatCommand::Review) => print_review(&session),
            Some(ChatCommand::Status) => print_status(&session, None),
            Some(ChatCommand::Help) => print_help(),
            Some(ChatCommand::Apply) => match apply_pending(repo, &config, &mut session, false) {
                Ok(outcome) => {
                    if let Some(code) = report_apply(outcome) {
                        return Ok(code);
                    }
                }
                Err(error) => println!("Error: {error}"),
            },
            None => {
                let before = session.pending_patches().len();
                print!("\nAgent: ");
                let result = agent.run_streaming(&mut session, &input).await;
                emitter.finish_line();
                if let Err(error) = result {
                    println!("Error: {error}");
                }
                if session.pending_patches().len() > before {
                    println!();
                    println!("Type 'review' to see the changes, or 'apply' to accept them.");
                }
                if let Err(error) = repo.save(&session) {
                    eprintln!("warning: failed to save session: {error}");
                }
            }
        }
    }

    repo.save(&session)?;
    println!("Session {} saved", session.id());
    Ok(ExitCode::SUCCESS)
}

async fn open_session(repo: &Repo, resume: Option<&str>) -> Result<(Session, SessionLock), String> {
    let store = repo.store();
    let id = match resume {
        Some(id) => id.to_string(),
        None => {
            let goal = prompt("What's your goal for this session? ")
                .await
                .filter(|goal| !goal.is_empty())
                .unwrap_or_else(|| DEFAULT_GOAL.to_string());
            let id = store
                .generate_session_id()
                .map_err(|error| error.to_string())?;
            let session =
                Session::new(&id, repo.root(), goal).map_err(|error| error.to_string())?;
            repo.save(&session)?;
            id
        }
    };

    let (session, lock) = repo.lock_session(&id)?;
    if session.repo() != repo.root() {
        return Err(format!(
            "session {id} is for repository {}, but this is {}",
            session.repo().display(),
            repo.root().display()
        ));
    }
    store
        .set_active_session_id(&id)
        .map_err(|error| error.to_string())?;
    Ok((session, lock))
}

async fn prompt(text: &'static str) -> Option<String> {
    tokio::task::spawn_blocking(move || read_line(text))
        .await
        .ok()
        .flatten()
}

fn print_welcome(repo: &Repo, session: &Session) {
    println!("pg agent");
    println!("Session: {}", session.id());
    println!("Goal: {}", session.goal());
    println!("Workspace: {}", repo.workspace().kind());
    println!();
    print_help();
    println!();
    println!("Anything else is sent to the agent. Changes only happen through 'apply'.");
}

fn print_help() {
    println!("Commands:");
    println!("  review   show pending patches");
    println!("  apply    apply pending patches");
    println!("  status   show session status");
    println!("  help     show this list");
    println!("  exit     leave agent mode");
}
