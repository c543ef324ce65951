//! Operator input: free-form answers and "continue anyway?" decisions.
//!
//! Everything a scripted run needs is carried by [`Overrides`], an explicit
//! value handed to whichever [`Operator`] the run uses.

use std::collections::HashMap;
use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

/// Values the setup asks the operator for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptField {
    Network,
    KeyWorkflow,
    AccountPubkey,
    PublicHost,
}

impl PromptField {
    pub fn question(&self) -> &'static str {
        match self {
            PromptField::Network => "Network to join",
            PromptField::KeyWorkflow => "Account key workflow (local/external)",
            PromptField::AccountPubkey => "Account public key (from the external key holder)",
            PromptField::PublicHost => "Public host or IP of this node",
        }
    }
}

/// Points where a failure may be downgraded to a warning by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionPoint {
    LowDiskSpace,
    ContinueAfterPullFailure,
    ContinueAfterSyncTimeout,
    ContinueAfterModelLoadTimeout,
    ContinueAfterHealthTimeout,
}

impl DecisionPoint {
    pub const ALL: [DecisionPoint; 5] = [
        DecisionPoint::LowDiskSpace,
        DecisionPoint::ContinueAfterPullFailure,
        DecisionPoint::ContinueAfterSyncTimeout,
        DecisionPoint::ContinueAfterModelLoadTimeout,
        DecisionPoint::ContinueAfterHealthTimeout,
    ];

    /// Stable name used on the command line (`--continue-on <key>`).
    pub fn key(&self) -> &'static str {
        match self {
            DecisionPoint::LowDiskSpace => "low-disk",
            DecisionPoint::ContinueAfterPullFailure => "pull-failure",
            DecisionPoint::ContinueAfterSyncTimeout => "sync-timeout",
            DecisionPoint::ContinueAfterModelLoadTimeout => "model-load-timeout",
            DecisionPoint::ContinueAfterHealthTimeout => "health-timeout",
        }
    }

    pub fn from_key(key: &str) -> Option<DecisionPoint> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }

    pub fn question(&self) -> &'static str {
        match self {
            DecisionPoint::LowDiskSpace => "Free disk space is below the recommended minimum. Continue anyway?",
            DecisionPoint::ContinueAfterPullFailure => "Pulling images failed. Continue with locally cached images?",
            DecisionPoint::ContinueAfterSyncTimeout => "The chain is still catching up. Continue anyway?",
            DecisionPoint::ContinueAfterModelLoadTimeout => "The model has not finished loading. Continue anyway?",
            DecisionPoint::ContinueAfterHealthTimeout => "Some health checks are still failing. Continue anyway?",
        }
    }

    /// Answer used when nobody is asked. Always the conservative one: stop,
    /// keep progress, let a re-run resume.
    pub fn default_answer(&self) -> bool {
        false
    }
}

/// Pre-supplied answers for a run.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub non_interactive: bool,
    pub answers: HashMap<PromptField, String>,
    pub decisions: HashMap<DecisionPoint, bool>,
    /// Replaces the recommended model.
    pub model: Option<String>,
    /// Replaces the recommended tensor-parallel size.
    pub tensor_parallel: Option<u32>,
}

impl Overrides {
    pub fn answer(&self, field: PromptField) -> Option<&str> {
        self.answers
            .get(&field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn decision(&self, point: DecisionPoint) -> Option<bool> {
        self.decisions.get(&point).copied()
    }

    pub fn set_answer(&mut self, field: PromptField, value: Option<String>) {
        if let Some(v) = value {
            self.answers.insert(field, v);
        }
    }
}

#[async_trait]
pub trait Operator: Send + Sync {
    async fn choose(&self, field: PromptField, default: &str) -> String;

    async fn decide(&self, point: DecisionPoint) -> bool;
}

/// Answers from overrides, then defaults. Never blocks.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOperator {
    overrides: Overrides,
}

impl ScriptedOperator {
    pub fn new(overrides: Overrides) -> Self {
        Self { overrides }
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn choose(&self, field: PromptField, default: &str) -> String {
        self.overrides
            .answer(field)
            .unwrap_or(default)
            .to_string()
    }

    async fn decide(&self, point: DecisionPoint) -> bool {
        self.overrides
            .decision(point)
            .unwrap_or_else(|| point.default_answer())
    }
}

/// Answer source shared by every prompt of a run.
type Input = Box<dyn AsyncBufRead + Send + Unpin>;

/// Asks on the terminal for anything the overrides leave open.
///
/// One buffered reader lives for the whole run; piped answers that arrive
/// together stay queued for the prompts that follow.
pub struct TerminalOperator {
    overrides: Overrides,
    input: Mutex<Input>,
}

impl TerminalOperator {
    pub fn new(overrides: Overrides) -> Self {
        Self::with_input(overrides, BufReader::new(tokio::io::stdin()))
    }

    pub fn with_input(overrides: Overrides, input: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            overrides,
            input: Mutex::new(Box::new(input)),
        }
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        {
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "{prompt} ");
            let _ = err.flush();
        }
        let mut line = String::new();
        let mut input = self.input.lock().await;
        match input.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn choose(&self, field: PromptField, default: &str) -> String {
        if let Some(v) = self.overrides.answer(field) {
            return v.to_string();
        }
        let prompt = format!("{} [{}]:", field.question(), default);
        match self.ask(&prompt).await {
            Some(v) if !v.is_empty() => v,
            _ => default.to_string(),
        }
    }

    async fn decide(&self, point: DecisionPoint) -> bool {
        if let Some(v) = self.overrides.decision(point) {
            return v;
        }
        let hint = if point.default_answer() { "Y/n" } else { "y/N" };
        let prompt = format!("{} [{hint}]", point.question());
        match self.ask(&prompt).await.as_deref().map(str::to_ascii_lowercase) {
            Some(a) if a == "y" || a == "yes" => true,
            Some(a) if a == "n" || a == "no" => false,
            _ => point.default_answer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_prefers_overrides() {
        let mut overrides = Overrides::default();
        overrides.set_answer(PromptField::Network, Some("testnet".into()));
        overrides.set_answer(PromptField::PublicHost, None);
        overrides
            .decisions
            .insert(DecisionPoint::ContinueAfterSyncTimeout, true);
        let op = ScriptedOperator::new(overrides);

        assert_eq!(op.choose(PromptField::Network, "mainnet").await, "testnet");
        assert_eq!(op.choose(PromptField::PublicHost, "1.2.3.4").await, "1.2.3.4");
        assert!(op.decide(DecisionPoint::ContinueAfterSyncTimeout).await);
        assert!(!op.decide(DecisionPoint::ContinueAfterHealthTimeout).await);
    }

    #[tokio::test]
    async fn test_terminal_keeps_buffered_answers_across_prompts() {
        let input: &'static [u8] = b"testnet\n203.0.113.7\nyes\n";
        let op = TerminalOperator::with_input(Overrides::default(), input);

        assert_eq!(op.choose(PromptField::Network, "mainnet").await, "testnet");
        assert_eq!(op.choose(PromptField::PublicHost, "").await, "203.0.113.7");
        assert!(op.decide(DecisionPoint::LowDiskSpace).await);
        // input exhausted
        assert_eq!(op.choose(PromptField::KeyWorkflow, "local").await, "local");
    }

    #[tokio::test]
    async fn test_terminal_skips_prompt_when_overridden() {
        let mut overrides = Overrides::default();
        overrides.set_answer(PromptField::Network, Some("testnet".into()));
        let input: &'static [u8] = b"203.0.113.7\n";
        let op = TerminalOperator::with_input(overrides, input);

        assert_eq!(op.choose(PromptField::Network, "mainnet").await, "testnet");
        assert_eq!(op.choose(PromptField::PublicHost, "").await, "203.0.113.7");
    }

    #[test]
    fn test_decision_keys_round_trip() {
        for point in DecisionPoint::ALL {
            assert_eq!(DecisionPoint::from_key(point.key()), Some(point));
        }
        assert_eq!(DecisionPoint::from_key("whatever"), None);
    }
}
