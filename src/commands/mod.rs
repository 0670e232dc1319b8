//! Command implementations for the Onekey CLI.
//!
//! Each command resolves its inputs, runs the library operation, and returns
//! a value implementing [`CommandResult`] for `main` to print. Commands are
//! organized by area:
//! - `config` - server config reconciliation
//! - `db` - bundled MySQL bootstrap
//! - `update` - update checks
//! - `launch` - interactive launcher, menu and service starts
//! - `marker` - one-time step markers

mod config;
mod db;
mod launch;
mod marker;
mod update;

pub use config::{config_init, config_set_secret, config_status};
pub use db::{db_init, db_write_password};
pub use launch::{first_run, launch, menu, start};
pub use marker::marker_list;
pub use update::update_check;

use crate::gate::{ConfirmationGate, PresetGate, TerminalGate};
use crate::{Error, Result};
use serde::Serialize;

/// Exit status when the operator chose to stop and update first.
pub const EXIT_UPDATE_REQUESTED: i32 = 2;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait CommandResult {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;

    /// Process exit status once the result is printed.
    fn exit_code(&self) -> i32 {
        0
    }
}

/// A flow that either finished or was cleanly cancelled by the operator.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Done {
        #[serde(flatten)]
        result: T,
    },
    Cancelled {
        reason: String,
    },
}

impl<T> Outcome<T> {
    /// Turn cancellation errors into [`Outcome::Cancelled`]; other errors pass through.
    pub fn from_result(result: Result<T>) -> Result<Self> {
        match result {
            Ok(result) => Ok(Outcome::Done { result }),
            Err(Error::Cancelled(reason)) => Ok(Outcome::Cancelled { reason }),
            Err(Error::Interrupted) => Ok(Outcome::Cancelled {
                reason: "interrupted".to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

impl<T: Serialize + CommandResult> CommandResult for Outcome<T> {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        match self {
            Outcome::Done { result } => result.to_human(),
            Outcome::Cancelled { reason } => format!("Cancelled: {}", reason),
        }
    }

    fn exit_code(&self) -> i32 {
        match self {
            Outcome::Done { result } => result.exit_code(),
            Outcome::Cancelled { .. } => 0,
        }
    }
}

/// Approves every question, asks the wrapped gate for values.
struct AutoApprove<G>(G);

impl<G: ConfirmationGate> ConfirmationGate for AutoApprove<G> {
    fn request_value(&mut self, prompt: &str) -> Result<Option<String>> {
        self.0.request_value(prompt)
    }

    fn request_approval(&mut self, message: &str) -> Result<bool> {
        self.0.notify(&format!("{} [yes]", message));
        Ok(true)
    }

    fn notify(&mut self, message: &str) {
        self.0.notify(message)
    }
}

/// Pick the gate for a command from its flags.
///
/// A preset value or `--non-interactive` means nothing is read from the
/// terminal; `--yes` alone still prompts for values but approves questions.
fn gate_for(value: Option<String>, yes: bool, non_interactive: bool) -> Box<dyn ConfirmationGate> {
    match (value, non_interactive) {
        (Some(value), _) => Box::new(PresetGate::new().with_value(value).approve_all(yes)),
        (None, true) => Box::new(PresetGate::new().approve_all(yes)),
        (None, false) if yes => Box::new(AutoApprove(TerminalGate::stdio())),
        (None, false) => Box::new(TerminalGate::stdio()),
    }
}

fn list_lines(items: &[String], indent: &str) -> String {
    items
        .iter()
        .map(|item| format!("{}{}", indent, item))
        .collect::<Vec<_>>()
        .join("\n")
}
