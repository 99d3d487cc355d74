use pg_agent::{AgentError, AgentEvent, EventEmitter};
use pg_session::{LockHolder, Session};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

const RECENT_TOOL_CALLS: usize = 5;

/// Prints streamed text to stdout as it arrives and tool activity to stderr.
#[derive(Debug, Default)]
pub struct ConsoleEventEmitter {
    mid_line: AtomicBool,
}

impl ConsoleEventEmitter {
    /// Ends a partially printed line, if any.
    pub fn finish_line(&self) {
        if self.mid_line.swap(false, Ordering::Relaxed) {
            println!();
        }
    }
}

impl EventEmitter for ConsoleEventEmitter {
    fn emit(&self, event: AgentEvent) -> Result<(), AgentError> {
        match event {
            AgentEvent::TextDelta { text } => {
                let mut stdout = io::stdout();
                write!(stdout, "{text}")
                    .and_then(|()| stdout.flush())
                    .map_err(|error| AgentError::Emitter(error.to_string()))?;
                self.mid_line.store(!text.ends_with('\n'), Ordering::Relaxed);
            }
            AgentEvent::ToolCallStarted { name } => {
                self.finish_line();
                eprintln!("[tool] {name}");
            }
            AgentEvent::ToolCallFinished { name, is_error } if is_error => {
                eprintln!("[tool] {name} failed");
            }
            AgentEvent::PatchProposed { file_path } => {
                eprintln!("[patch] proposed for {file_path}");
            }
            AgentEvent::IterationStarted { iteration, max } => {
                tracing::debug!(iteration, max, "agent iteration");
            }
            AgentEvent::ToolCallFinished { .. } | AgentEvent::Finished => {}
        }
        Ok(())
    }
}

pub fn print_status(session: &Session, lock: Option<&LockHolder>) {
    println!("Session: {}", session.id());
    println!("Goal: {}", session.goal());
    println!("Repository: {}", session.repo().display());
    println!(
        "Created: {}",
        session.created_at().format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(holder) = lock {
        println!("Locked by: pid {}", holder.pid);
    }
    println!();
    println!("Pending patches: {}", session.pending_patches().len());
    println!("Tool history: {} calls", session.tool_history().len());

    let history = session.tool_history();
    if !history.is_empty() {
        println!();
        println!("Recent tool calls:");
        let start = history.len().saturating_sub(RECENT_TOOL_CALLS);
        for call in &history[start..] {
            let status = if call.is_error() { "error" } else { "ok" };
            println!(
                "  {} {status} {}",
                call.timestamp.format("%H:%M:%S"),
                call.tool_name
            );
        }
    }

    if !session.context_summary().is_empty() {
        println!();
        println!("Context:");
        println!("{}", session.context_summary());
    }
}

pub fn print_review(session: &Session) {
    let patches = session.pending_patches();
    if patches.is_empty() {
        println!("No pending patches");
        return;
    }
    println!("Session: {}", session.id());
    println!("Pending patches: {}", patches.len());
    for (index, patch) in patches.iter().enumerate() {
        println!();
        println!("=== Patch {}/{}: {} ===", index + 1, patches.len(), patch.file_path);
        println!("Proposed: {}", patch.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!();
        print!("{}", patch.unified_diff);
        if !patch.unified_diff.ends_with('\n') {
            println!();
        }
    }
}
