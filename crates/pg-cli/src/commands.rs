use crate::approval::{ConsoleApprover, is_yes, read_line};
use crate::config::{self, PgConfig};
use crate::render::{ConsoleEventEmitter, print_review, print_status};
use pg_agent::prompts::PLANNER_PROMPT;
use pg_agent::{
    AgentLoop, AgentMode, AutoApprove, CommandApprover, LocalExecutionEnvironment, PatchApplicator,
    Plan, ToolContext,
};
use pg_llm::{Message, Provider, Request, build_provider};
use pg_session::{Session, SessionLock, SessionStore};
use pg_workspace::{SnapshotOutcome, Workspace, open_workspace};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Exit status when a failed patch could not be rolled back.
const RESTORE_FAILURE_EXIT: u8 = 3;

/// The repository a command runs against, with its workspace backend and session store.
pub struct Repo {
    root: PathBuf,
    workspace: Box<dyn Workspace>,
    store: SessionStore,
    user_config: Option<PathBuf>,
}

impl Repo {
    pub fn open(dir: Option<&Path>, user_config: Option<PathBuf>) -> Result<Self, String> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()
                .map_err(|error| format!("failed to get current directory: {error}"))?,
        };
        let dir = dir
            .canonicalize()
            .map_err(|error| format!("cannot open repository {}: {error}", dir.display()))?;
        let workspace = open_workspace(&dir);
        let root = workspace.root().to_path_buf();
        tracing::debug!(root = %root.display(), kind = workspace.kind(), "repository opened");
        Ok(Self {
            store: SessionStore::for_repo(&root),
            root,
            workspace,
            user_config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn workspace(&self) -> &dyn Workspace {
        self.workspace.as_ref()
    }

    pub fn config(&self) -> Result<PgConfig, String> {
        config::load(self.user_config.as_deref(), &self.root).map_err(|error| error.to_string())
    }

    /// Builds the configured provider. `.env` in the repository root is read first so the
    /// key variable named by `provider.api_key_env` can live there.
    pub fn provider(&self, config: &PgConfig) -> Result<Arc<dyn Provider>, String> {
        let env_file = self.root.join(".env");
        match dotenvy::from_path(&env_file) {
            Ok(()) => tracing::debug!(path = %env_file.display(), "loaded .env"),
            Err(error) if error.not_found() => {}
            Err(error) => {
                tracing::warn!(path = %env_file.display(), %error, "ignoring unreadable .env");
            }
        }
        let provider_config = config
            .provider_config(|name| std::env::var(name).ok())
            .map_err(|error| error.to_string())?;
        let provider = build_provider(&provider_config).map_err(|error| error.to_string())?;
        tracing::debug!(provider = provider.name(), "provider ready");
        Ok(provider)
    }

    pub fn active_session(&self) -> Result<Session, String> {
        let id = self
            .store
            .active_session_id()
            .map_err(|error| error.to_string())?
            .ok_or_else(no_active_session)?;
        self.store.load(&id).map_err(|error| error.to_string())
    }

    /// Loads the active session under its lock.
    pub fn lock_active(&self) -> Result<(Session, SessionLock), String> {
        let id = self
            .store
            .active_session_id()
            .map_err(|error| error.to_string())?
            .ok_or_else(no_active_session)?;
        self.lock_session(&id)
    }

    pub fn lock_session(&self, id: &str) -> Result<(Session, SessionLock), String> {
        let lock = self
            .store
            .acquire_lock(id)
            .map_err(|error| error.to_string())?;
        let session = self.store.load(id).map_err(|error| error.to_string())?;
        Ok((session, lock))
    }

    pub fn save(&self, session: &Session) -> Result<(), String> {
        self.store.save(session).map_err(|error| error.to_string())
    }

    pub fn agent(
        &self,
        config: &PgConfig,
        mode: AgentMode,
        approver: Arc<dyn CommandApprover>,
    ) -> Result<AgentLoop, String> {
        let provider = self.provider(config)?;
        let agent_config = config.agent_config(mode).map_err(|error| error.to_string())?;
        let context = ToolContext::new(
            Arc::new(LocalExecutionEnvironment::new(self.root.clone())),
            approver,
        );
        Ok(
            AgentLoop::new(provider, context, Arc::new(self.store.clone()))
                .with_config(agent_config),
        )
    }
}

fn no_active_session() -> String {
    "no active session (run 'pg start <goal>')".to_string()
}

pub fn setup(
    path: Option<&Path>,
    local_model: Option<PathBuf>,
    force: bool,
) -> Result<ExitCode, String> {
    let path = path.ok_or("no user config directory on this platform; pass --config")?;
    if path.exists() && !force {
        println!("Configuration already exists: {}", path.display());
        println!("Re-run with --force to overwrite it.");
        return Ok(ExitCode::SUCCESS);
    }
    let local = local_model.is_some();
    config::write_file(path, &PgConfig::starter(local_model)).map_err(|error| error.to_string())?;
    println!("Wrote configuration: {}", path.display());
    if local {
        println!("Provider: local llama-cli");
    } else {
        println!(
            "Provider: openai (export {} or put it in .env)",
            config::DEFAULT_API_KEY_ENV
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub fn start(repo: &Repo, goal: &str) -> Result<ExitCode, String> {
    let store = repo.store();
    let id = store
        .generate_session_id()
        .map_err(|error| error.to_string())?;
    let session = Session::new(&id, repo.root(), goal).map_err(|error| error.to_string())?;
    repo.save(&session)?;
    store
        .set_active_session_id(&id)
        .map_err(|error| error.to_string())?;

    println!("Started session {id}");
    println!("  Goal: {goal}");
    println!("  Repo: {}", repo.root().display());
    println!("  Workspace: {}", repo.workspace().kind());
    Ok(ExitCode::SUCCESS)
}

pub fn status(repo: &Repo) -> Result<ExitCode, String> {
    let store = repo.store();
    let Some(id) = store
        .active_session_id()
        .map_err(|error| error.to_string())?
    else {
        println!("No active session");
        println!();
        println!("Start one with: pg start \"<goal>\"");
        return Ok(ExitCode::SUCCESS);
    };
    let session = store.load(&id).map_err(|error| error.to_string())?;
    let holder = store.lock_holder(&id).map_err(|error| error.to_string())?;
    print_status(&session, holder.as_ref());
    Ok(ExitCode::SUCCESS)
}

pub async fn ask(
    repo: &Repo,
    prompt: &str,
    stream: bool,
    approve_commands: bool,
) -> Result<ExitCode, String> {
    let config = repo.config()?;
    let (mut session, lock) = repo.lock_active()?;
    let approver: Arc<dyn CommandApprover> = if approve_commands {
        Arc::new(AutoApprove)
    } else {
        Arc::new(ConsoleApprover)
    };
    let agent = repo.agent(&config, AgentMode::Command, approver)?;
    let before = session.pending_patches().len();

    let result = if stream {
        let emitter = Arc::new(ConsoleEventEmitter::default());
        let agent = agent.with_emitter(emitter.clone());
        let result = agent.run_streaming(&mut session, prompt).await;
        emitter.finish_line();
        result.map(|_| ())
    } else {
        let agent = agent.with_emitter(Arc::new(ConsoleEventEmitter::default()));
        agent
            .run(&mut session, prompt)
            .await
            .map(|answer| println!("{answer}"))
    };
    // Whatever the loop got to is kept, including on failure.
    repo.save(&session)?;
    drop(lock);
    result.map_err(|error| error.to_string())?;

    let proposed = session.pending_patches().len().saturating_sub(before);
    if proposed > 0 {
        println!();
        println!("{proposed} patch(es) proposed. Review with 'pg review', apply with 'pg apply'.");
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn plan(repo: &Repo, goal: &str) -> Result<ExitCode, String> {
    let config = repo.config()?;
    let provider = repo.provider(&config)?;
    let response = provider
        .complete(Request {
            messages: vec![Message::system(PLANNER_PROMPT), Message::user(goal)],
            tools: Vec::new(),
        })
        .await
        .map_err(|error| error.to_string())?;
    let plan = Plan::from_planner_output(&response.content).map_err(|error| error.to_string())?;
    print!("{plan}");

    // The plan becomes the active session's context when there is one to attach it to.
    if let Some(id) = repo
        .store()
        .active_session_id()
        .map_err(|error| error.to_string())?
    {
        let (mut session, _lock) = repo.lock_session(&id)?;
        session.set_context_summary(plan.to_json_pretty());
        repo.save(&session)?;
        println!();
        println!("Plan saved to session {id}");
    }
    Ok(ExitCode::SUCCESS)
}

pub fn review(repo: &Repo) -> Result<ExitCode, String> {
    let session = repo.active_session()?;
    print_review(&session);
    Ok(ExitCode::SUCCESS)
}

/// What an apply request ended with, short of an error.
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    NothingPending,
    Cancelled,
    Applied(usize),
    /// A failed patch left its file in an unknown state.
    RestoreFailed(String),
}

/// Applies the session's pending patches in order. Applied patches leave the queue even
/// when a later one fails; the session is saved either way.
pub fn apply_pending(
    repo: &Repo,
    config: &PgConfig,
    session: &mut Session,
    confirmed: bool,
) -> Result<ApplyOutcome, String> {
    let total = session.pending_patches().len();
    if total == 0 {
        return Ok(ApplyOutcome::NothingPending);
    }
    if !confirmed {
        println!("About to apply {total} patch(es) to {}.", repo.root().display());
        let answer = read_line("Apply all patches? [y/N] ").unwrap_or_default();
        if !is_yes(&answer) {
            println!("Patch application cancelled");
            return Ok(ApplyOutcome::Cancelled);
        }
    }

    let applicator = PatchApplicator::with_backend(repo.root(), config.patch_backend().backend());
    let outcome = apply_queue(&applicator, session);
    repo.save(session)?;
    outcome
}

/// Runs the queue through `applicator` and drops whatever got applied from it.
fn apply_queue(
    applicator: &PatchApplicator,
    session: &mut Session,
) -> Result<ApplyOutcome, String> {
    let patches = session.pending_patches().to_vec();
    match applicator.apply_batch(&patches) {
        Ok(applied) => {
            session.clear_pending_patches();
            Ok(ApplyOutcome::Applied(applied))
        }
        Err(batch) => {
            session.remove_applied_patches(batch.applied);
            if batch.source.is_restore_failure() {
                Ok(ApplyOutcome::RestoreFailed(batch.to_string()))
            } else {
                Err(batch.to_string())
            }
        }
    }
}

/// Prints an apply outcome. Returns the exit code to stop with after a failed rollback.
pub fn report_apply(outcome: ApplyOutcome) -> Option<ExitCode> {
    match outcome {
        ApplyOutcome::NothingPending => println!("No pending patches to apply"),
        ApplyOutcome::Cancelled => {}
        ApplyOutcome::Applied(count) => println!("Applied {count} patch(es)"),
        ApplyOutcome::RestoreFailed(message) => {
            eprintln!("error: {message}");
            eprintln!("warning: inspect the repository before continuing");
            return Some(ExitCode::from(RESTORE_FAILURE_EXIT));
        }
    }
    None
}

pub fn apply(repo: &Repo, yes: bool) -> Result<ExitCode, String> {
    let config = repo.config()?;
    let (mut session, _lock) = repo.lock_active()?;
    let outcome = apply_pending(repo, &config, &mut session, yes)?;
    Ok(report_apply(outcome).unwrap_or(ExitCode::SUCCESS))
}

pub fn discard(repo: &Repo) -> Result<ExitCode, String> {
    let (mut session, _lock) = repo.lock_active()?;
    let dropped = session.clear_pending_patches();
    repo.save(&session)?;
    println!("Discarded {} patch(es)", dropped.len());
    Ok(ExitCode::SUCCESS)
}

pub fn resume(repo: &Repo, id: &str) -> Result<ExitCode, String> {
    let session = repo.store().load(id).map_err(|error| error.to_string())?;
    if session.repo() != repo.root() {
        return Err(format!(
            "session {id} is for repository {}, but this is {}",
            session.repo().display(),
            repo.root().display()
        ));
    }
    repo.store()
        .set_active_session_id(id)
        .map_err(|error| error.to_string())?;
    println!("Resumed session {id}");
    println!("  Goal: {}", session.goal());
    println!("  Pending patches: {}", session.pending_patches().len());
    Ok(ExitCode::SUCCESS)
}

pub fn sessions(repo: &Repo) -> Result<ExitCode, String> {
    let store = repo.store();
    let ids = store.list().map_err(|error| error.to_string())?;
    if ids.is_empty() {
        println!("No sessions");
        return Ok(ExitCode::SUCCESS);
    }
    let active = store
        .active_session_id()
        .map_err(|error| error.to_string())?;
    for id in ids {
        let marker = if active.as_deref() == Some(id.as_str()) { "*" } else { " " };
        match store.load(&id) {
            Ok(session) => println!(
                "{marker} {id}  {}  ({} pending)",
                session.goal(),
                session.pending_patches().len()
            ),
            Err(error) => println!("{marker} {id}  <unreadable: {error}>"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn snapshot(repo: &Repo, label: &str) -> Result<ExitCode, String> {
    match repo
        .workspace()
        .snapshot(label)
        .map_err(|error| error.to_string())?
    {
        SnapshotOutcome::Created(info) => match info.files {
            Some(files) => println!("Created snapshot '{}' ({files} files)", info.label),
            None => println!("Created snapshot '{}'", info.label),
        },
        SnapshotOutcome::Clean => println!("Working tree is clean; nothing to snapshot"),
    }
    Ok(ExitCode::SUCCESS)
}

pub fn restore(repo: &Repo, label: &str) -> Result<ExitCode, String> {
    repo.workspace()
        .restore(label)
        .map_err(|error| error.to_string())?;
    println!("Restored snapshot '{label}'");
    Ok(ExitCode::SUCCESS)
}

pub fn snapshots(repo: &Repo) -> Result<ExitCode, String> {
    let snapshots = repo
        .workspace()
        .list_snapshots()
        .map_err(|error| error.to_string())?;
    if snapshots.is_empty() {
        println!("No snapshots");
        return Ok(ExitCode::SUCCESS);
    }
    for info in snapshots {
        let created = info
            .created_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        match info.files {
            Some(files) => println!("{}  {created}  {files} files", info.label),
            None => println!("{}  {created}", info.label),
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn diff(repo: &Repo, path: &str) -> Result<ExitCode, String> {
    let diff = repo
        .workspace()
        .diff(path)
        .map_err(|error| error.to_string())?;
    if diff.trim().is_empty() {
        println!("No changes");
    } else {
        print!("{diff}");
    }
    Ok(ExitCode::SUCCESS)
}
