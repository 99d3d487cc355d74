use async_trait::async_trait;
use pg_agent::CommandApprover;
use std::io::{self, Write};

/// Asks on the terminal before a model-requested command runs. Anything but `y`/`yes`
/// denies, including end of input.
#[derive(Debug, Default)]
pub struct ConsoleApprover;

#[async_trait]
impl CommandApprover for ConsoleApprover {
    async fn approve(&self, command: &str) -> bool {
        let command = command.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            println!();
            println!("The agent wants to run: {command}");
            read_line("Allow this command? [y/N] ")
        })
        .await;
        match answer {
            Ok(Some(answer)) => is_yes(&answer),
            Ok(None) => false,
            Err(error) => {
                tracing::warn!(%error, "approval prompt task failed");
                false
            }
        }
    }
}

/// Prompts on stdout and reads one trimmed line. `None` at end of input.
pub fn read_line(prompt: &str) -> Option<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}").ok()?;
    stdout.flush().ok()?;

    let mut raw = String::new();
    match io::stdin().read_line(&mut raw) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(raw.trim().to_string()),
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
