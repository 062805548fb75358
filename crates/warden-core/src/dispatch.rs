use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};
use warden_sdk::{CapabilityId, CommandArgs, Module};

use crate::commands::{CommandTree, Resolution};
use crate::error::DispatchError;
use crate::modules::TerminalModule;
use crate::registry::Registry;

/// Split an operator line into tokens.
///
/// Whitespace separates tokens. A double-quoted run forms part of a single
/// token with the quotes removed; an unterminated quote runs to the end of
/// the line and `""` yields an empty token.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            ch if ch.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            ch => {
                current.push(ch);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Blank input.
    Ignored,
    /// A handler ran to completion.
    Executed { owner: CapabilityId, usage: String },
}

/// Routes operator lines to command handlers and reports every failure on
/// the terminal.
pub struct Dispatcher {
    tree: CommandTree,
    registry: Arc<Registry>,
    terminal: Arc<TerminalModule>,
}

impl Dispatcher {
    pub fn new(tree: CommandTree, registry: Arc<Registry>, terminal: Arc<TerminalModule>) -> Self {
        Self {
            tree,
            registry,
            terminal,
        }
    }

    /// Handle one line. Errors have already been reported to the operator
    /// when this returns; they never need to stop the loop.
    pub fn dispatch(&self, line: &str) -> Result<DispatchOutcome, DispatchError> {
        let tokens = tokenize(line);
        if tokens.is_empty() {
            return Ok(DispatchOutcome::Ignored);
        }

        let Resolution { command, args } = match self.tree.resolve(&tokens) {
            Ok(resolution) => resolution,
            Err(err) => {
                self.terminal.warn(self.terminal.name(), &err.to_string());
                return Err(err);
            }
        };

        let owner = command.owner().clone();
        let instance = match self.registry.resolve(&owner) {
            Ok(instance) => instance,
            Err(err) => {
                self.terminal.error(self.terminal.name(), &err.to_string());
                return Err(err.into());
            }
        };
        let tag = instance
            .module()
            .map(|module| module.name().to_string())
            .unwrap_or_else(|| owner.to_string());

        if args.len() != command.arity() {
            let err = DispatchError::ArgumentArityMismatch {
                expected: command.arity(),
                received: args.len(),
            };
            self.terminal
                .error(&tag, &format!("Could not parse input: {err}"));
            return Err(err);
        }

        let usage = command.usage();
        debug!(capability = %owner, command = %usage, "dispatching");
        let args = CommandArgs::new(args);
        match catch_unwind(AssertUnwindSafe(|| command.invoke(&instance, &args))) {
            Ok(Ok(())) => Ok(DispatchOutcome::Executed { owner, usage }),
            Ok(Err(err)) => {
                self.terminal.error(&tag, &err.to_string());
                Err(err.into())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(capability = %owner, command = %usage, "command panicked: {message}");
                self.terminal
                    .critical(&tag, &format!("Command failed unexpectedly: {message}"));
                Err(DispatchError::Panicked(message))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("bases", &self.tree.bases())
            .finish()
    }
}
