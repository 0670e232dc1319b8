//! Confirmation gate: the synchronous boundary where an operator supplies
//! a value or approves a risky step.
//!
//! The reconciler only sees [`ConfirmationGate`]. Whether the answer comes
//! from a terminal, preset CLI flags, or a presenter on the other side of a
//! channel (see [`crate::worker`]) is up to the implementation.

use crate::reconcile::secret::{SecretCheck, classify_secret};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

pub trait ConfirmationGate {
    /// Ask for a value. `Ok(None)` means the operator cancelled.
    fn request_value(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Ask a yes/no question. Anything but an explicit yes is a no.
    fn request_approval(&mut self, message: &str) -> Result<bool>;

    /// Tell the operator something without asking anything.
    fn notify(&mut self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Outcome of checking one candidate value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Usable, but only after the operator approves this question
    Confirm(String),
    /// Discard and ask again
    Reject(String),
}

/// Ask until `validate` accepts a value, at most `attempts` times.
///
/// Cancellation ends the loop immediately with [`Error::Cancelled`]; running
/// out of attempts is [`Error::AttemptsExhausted`]. A value needing
/// confirmation that the operator declines counts as a used attempt.
pub fn request_validated<G, F>(
    gate: &mut G,
    prompt: &str,
    attempts: u32,
    validate: F,
) -> Result<String>
where
    G: ConfirmationGate + ?Sized,
    F: Fn(&str) -> Verdict,
{
    for attempt in 1..=attempts {
        let Some(raw) = gate.request_value(prompt)? else {
            return Err(Error::Cancelled("no value provided".to_string()));
        };
        let value = raw.trim().to_string();

        match validate(&value) {
            Verdict::Accept => return Ok(value),
            Verdict::Confirm(question) => {
                if gate.request_approval(&question)? {
                    return Ok(value);
                }
            }
            Verdict::Reject(reason) => {
                let left = attempts - attempt;
                if left > 0 {
                    gate.notify(&format!("{} ({} attempts left)", reason, left));
                } else {
                    gate.notify(&reason);
                }
            }
        }
    }
    Err(Error::AttemptsExhausted(attempts))
}

/// Validation rule for the server secret.
pub fn secret_verdict(placeholder: &str) -> impl Fn(&str) -> Verdict + '_ {
    move |value| match classify_secret(value, placeholder) {
        SecretCheck::Empty => Verdict::Reject("The secret must not be empty".to_string()),
        SecretCheck::Placeholder => {
            Verdict::Reject("That is the template placeholder, not a secret".to_string())
        }
        SecretCheck::Weak => Verdict::Confirm(
            "This does not look like a server secret (expected a UUID or at least 16 characters). Use it anyway?"
                .to_string(),
        ),
        SecretCheck::Valid => Verdict::Accept,
    }
}

/// Ask for the server secret with the shape check and extra approval.
pub fn acquire_secret<G>(gate: &mut G, placeholder: &str, attempts: u32) -> Result<String>
where
    G: ConfirmationGate + ?Sized,
{
    request_validated(
        gate,
        "Paste the server secret from the admin console (参数管理 → server.secret)",
        attempts,
        secret_verdict(placeholder),
    )
}

/// Line-oriented prompts. Questions go to `output` so stdout stays clean
/// for JSON results.
pub struct TerminalGate<R, W> {
    input: R,
    output: W,
}

impl TerminalGate<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// `None` on end of input.
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }
}

impl<R: BufRead, W: Write> ConfirmationGate for TerminalGate<R, W> {
    fn request_value(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{}: ", prompt)?;
        self.output.flush()?;
        self.read_line()
    }

    fn request_approval(&mut self, message: &str) -> Result<bool> {
        write!(self.output, "{} [y/N]: ", message)?;
        self.output.flush()?;
        Ok(self
            .read_line()?
            .is_some_and(|answer| is_yes(answer.trim())))
    }

    fn notify(&mut self, message: &str) {
        let _ = writeln!(self.output, "{}", message);
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.to_lowercase().as_str(), "y" | "yes" | "是")
}

/// Answers fixed in advance, for flags like `--secret` and `--yes` and for
/// runs without a terminal.
#[derive(Debug, Default)]
pub struct PresetGate {
    values: VecDeque<String>,
    approvals: VecDeque<bool>,
    /// Answer once `approvals` is used up
    default_approval: bool,
    /// Every prompt and question seen, in order
    pub asked: Vec<String>,
}

impl PresetGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.values.push_back(value.into());
        self
    }

    pub fn with_approval(mut self, approve: bool) -> Self {
        self.approvals.push_back(approve);
        self
    }

    pub fn approve_all(mut self, approve: bool) -> Self {
        self.default_approval = approve;
        self
    }
}

impl ConfirmationGate for PresetGate {
    fn request_value(&mut self, prompt: &str) -> Result<Option<String>> {
        self.asked.push(prompt.to_string());
        Ok(self.values.pop_front())
    }

    fn request_approval(&mut self, message: &str) -> Result<bool> {
        self.asked.push(message.to_string());
        Ok(self.approvals.pop_front().unwrap_or(self.default_approval))
    }

    fn notify(&mut self, message: &str) {
        tracing::info!("{}", message);
    }
}
