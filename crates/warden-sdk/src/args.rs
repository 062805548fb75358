use std::any::type_name;
use std::str::FromStr;

use thiserror::Error;

/// Errors a command handler reports back to the dispatcher.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("argument {index} is missing")]
    MissingArgument { index: usize },
    #[error("argument {index} ({value:?}) is not a valid {expected}")]
    ArgumentType {
        index: usize,
        value: String,
        expected: &'static str,
    },
    #[error("{0}")]
    Rejected(String),
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

/// Positional arguments that followed the matched command alias.
///
/// Always present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    values: Vec<String>,
}

impl CommandArgs {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&str, CommandError> {
        self.values
            .get(index)
            .map(String::as_str)
            .ok_or(CommandError::MissingArgument { index })
    }

    /// Coerce argument `index` into `T`.
    pub fn parse<T: FromStr>(&self, index: usize) -> Result<T, CommandError> {
        let raw = self.get(index)?;
        raw.parse::<T>().map_err(|_| CommandError::ArgumentType {
            index,
            value: raw.to_string(),
            expected: short_type_name::<T>(),
        })
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
