use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Decides whether a model-requested shell command may run.
#[async_trait]
pub trait CommandApprover: Send + Sync {
    async fn approve(&self, command: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl CommandApprover for AutoApprove {
    async fn approve(&self, _command: &str) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct DenyAll;

#[async_trait]
impl CommandApprover for DenyAll {
    async fn approve(&self, _command: &str) -> bool {
        false
    }
}

/// Answers from a prepared queue and records every command it was asked about.
/// Denies once the queue is empty.
#[derive(Debug, Default)]
pub struct QueueApprover {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl QueueApprover {
    pub fn with_answers<I>(answers: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked
            .lock()
            .expect("queue approver mutex should lock")
            .clone()
    }
}

#[async_trait]
impl CommandApprover for QueueApprover {
    async fn approve(&self, command: &str) -> bool {
        self.asked
            .lock()
            .expect("queue approver mutex should lock")
            .push(command.to_string());
        self.answers
            .lock()
            .expect("queue approver mutex should lock")
            .pop_front()
            .unwrap_or(false)
    }
}
