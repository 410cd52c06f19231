// CommandRegistry: the allow-list of commands this runner may execute.
// Loaded once at startup and shared read-only by every dispatch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tuberun_common::CommandRequest;

/// One allow-listed command as described in the registry file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDefinition {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Path", alias = "path")]
    pub path: String,
    /// Parameter template. Informational only; parameters always come from
    /// the request.
    #[serde(default, rename = "Parameters", alias = "parameters")]
    pub parameters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommandSet {
    #[serde(rename = "Commands", alias = "commands")]
    commands: Vec<CommandDefinition>,
}

/// Reasons a set of definitions is refused.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("command '{0}' has an empty path")]
    EmptyPath(String),
    #[error("command '{0}' is defined more than once")]
    DuplicateName(String),
}

/// A command accepted for execution: the request's name and parameters,
/// paired with the executable path from the registry.
///
/// Only [`CommandRegistry::resolve`] builds one, so `path` is always the
/// registry's non-empty path for `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCommand {
    name: String,
    path: String,
    params: Vec<String>,
}

impl RuntimeCommand {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for RuntimeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        Ok(())
    }
}

/// Immutable name → definition map.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandDefinition>,
}

impl CommandRegistry {
    /// An allow-list that accepts nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read and validate the registry file. Every failure here is fatal for
    /// the runner; there is no partially loaded registry.
    pub fn load(path: &Path) -> Result<Self> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("Command file '{}' could not be read", path.display()))?;
        Self::from_json(&buf)
            .with_context(|| format!("Command file '{}' is invalid", path.display()))
    }

    /// Parse the registry file format:
    /// `{"Commands": [{"Name": ..., "Path": ..., "Parameters": [...]}]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let set: CommandSet =
            serde_json::from_str(json).context("Failed to parse command set")?;
        Ok(Self::from_definitions(set.commands)?)
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = CommandDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut commands = HashMap::new();
        for (index, definition) in definitions.into_iter().enumerate() {
            if definition.name.trim().is_empty() {
                return Err(RegistryError::EmptyName { index });
            }
            if definition.path.trim().is_empty() {
                return Err(RegistryError::EmptyPath(definition.name));
            }
            if commands.contains_key(&definition.name) {
                return Err(RegistryError::DuplicateName(definition.name));
            }
            commands.insert(definition.name.clone(), definition);
        }
        Ok(Self { commands })
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.get(name)
    }

    /// Turn a request into something runnable, or `None` if its name is not
    /// allow-listed.
    pub fn resolve(&self, request: &CommandRequest) -> Option<RuntimeCommand> {
        self.lookup(&request.name).map(|definition| RuntimeCommand {
            name: request.name.clone(),
            path: definition.path.clone(),
            params: request.params.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
