use crate::config::AgentMode;
use pg_session::Session;

const TOOL_SUMMARY: &str = "\
AVAILABLE TOOLS:
- read_file(path): read a file's contents
- list_files(path): list the entries of a directory
- git_status(): show the repository status
- git_diff(): show uncommitted changes
- run_command(command): run a shell command (the operator must approve it)
- propose_patch(file_path, unified_diff): propose a change as a unified diff";

const DIFF_RULES: &str = "\
RULES:
1. You can never write files directly.
2. Every code change must go through propose_patch as a unified diff.
3. Diffs need '--- <path>' and '+++ <path>' headers and '@@ -a,b +c,d @@' hunks; use
   '--- /dev/null' to create a new file.
4. Read a file before proposing a change to it, so context lines match exactly.
5. Keep each patch to one logical change.";

const COMMAND_MODE_INTRO: &str = "\
You are a coding assistant running inside pg, a command-line tool for reviewable,
diff-only changes. Answer the request concisely and stay focused on the goal.";

const COMMAND_MODE_WORKFLOW: &str = "\
WORKFLOW:
1. Understand the request.
2. Explore with read_file and list_files.
3. Propose changes with propose_patch.
4. Finish with a short explanation of what you proposed.";

const INTERACTIVE_MODE_INTRO: &str = "\
You are the pg agent, pair programming with the operator in an interactive chat.
Explain your reasoning before proposing changes and ask when requirements are unclear.";

const INTERACTIVE_MODE_WORKFLOW: &str = "\
WORKFLOW:
1. State your plan and assumptions.
2. Explore the code with the read-only tools.
3. Propose incremental changes with propose_patch.
4. Never assume a patch was applied: the operator types 'review' to inspect pending
   patches and 'apply' to accept them.
End every reply that proposed changes with: \"Type 'review' to see the changes, or 'apply' to accept them.\"";

pub const PLANNER_PROMPT: &str = "\
You are the planning stage of pg. Produce a plan for the goal below as a single JSON
object and nothing else:
{\"goal\": \"...\", \"constraints\": [\"...\"], \"steps\": [\"...\"], \"files_to_inspect\": [\"...\"]}
The goal must be non-empty and there must be at least one step.";

pub fn system_prompt(mode: AgentMode) -> String {
    let (intro, workflow) = match mode {
        AgentMode::Command => (COMMAND_MODE_INTRO, COMMAND_MODE_WORKFLOW),
        AgentMode::Interactive => (INTERACTIVE_MODE_INTRO, INTERACTIVE_MODE_WORKFLOW),
    };
    format!("{intro}\n\n{DIFF_RULES}\n\n{TOOL_SUMMARY}\n\n{workflow}")
}

/// The opening user message. A plan stored on the session by `pg plan` travels with
/// the request; otherwise the input goes out as typed.
pub fn seed_user_message(session: &Session, input: &str) -> String {
    let plan = session.context_summary().trim();
    if plan.is_empty() {
        return input.to_string();
    }
    format!(
        "Session goal: {}\n\nPlan:\n{plan}\n\nRequest:\n{input}",
        session.goal()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_differ_by_mode_and_share_rules() {
        let command = system_prompt(AgentMode::Command);
        let interactive = system_prompt(AgentMode::Interactive);
        assert_ne!(command, interactive);
        for prompt in [&command, &interactive] {
            assert!(prompt.contains("propose_patch(file_path, unified_diff)"));
            assert!(prompt.contains("never write files directly"));
        }
        assert!(interactive.contains("'review'"));
    }

    #[test]
    fn stored_plan_is_folded_into_the_request() {
        let mut session = Session::new("pg-1", "/repo", "add auth").expect("session");
        assert_eq!(seed_user_message(&session, "start"), "start");

        session.set_context_summary("{\"steps\": [\"read main.rs\"]}");
        let message = seed_user_message(&session, "start");
        assert!(message.starts_with("Session goal: add auth\n\nPlan:\n{"), "{message}");
        assert!(message.ends_with("\n\nRequest:\nstart"), "{message}");
    }
}
