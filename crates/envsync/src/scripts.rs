// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Script tables and their expansion into flat command lists.
//!
//! A script is a named list of commands. A command whose first word names
//! another script is replaced by that script's commands, with the rest of
//! the invoking command appended to each of them:
//!
//! ```yaml
//! scripts:
//!   test: pytest
//!   cov: "test --cov"        # -> pytest --cov
//!   all: ["- lint", "cov"]   # a leading "- " ignores the exit code
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./scripts_test.rs"]
mod scripts_test;

/// Prefix marking a command whose exit code should be ignored.
pub const IGNORE_EXIT_CODE_PREFIX: &str = "- ";

/// Ordered mapping of script name to raw command templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScriptTable {
    scripts: IndexMap<String, Vec<String>>,
}

impl ScriptTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(
        &mut self,
        name: impl Into<String>,
        commands: impl IntoIterator<Item = S>,
    ) {
        self.scripts
            .insert(name.into(), commands.into_iter().map(Into::into).collect());
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.scripts.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Merge two tables where `extra` only contributes names that `primary`
    /// does not define.
    pub fn merged(primary: &ScriptTable, extra: &ScriptTable) -> ScriptTable {
        let mut scripts = primary.scripts.clone();
        for (name, commands) in &extra.scripts {
            if !scripts.contains_key(name) {
                scripts.insert(name.clone(), commands.clone());
            }
        }
        ScriptTable { scripts }
    }

    /// Expand every script in the table, in table order.
    ///
    /// Any cycle between scripts is reported, even one unreachable from the
    /// script a caller is ultimately interested in.
    pub fn expand(&self) -> Result<ExpandedScripts> {
        let mut expansion = Expansion {
            table: self,
            seen: HashMap::new(),
            active: Vec::new(),
        };
        for name in self.names() {
            expansion.expand(name)?;
        }
        let mut scripts = IndexMap::with_capacity(self.len());
        for name in self.names() {
            if let Some(commands) = expansion.seen.remove(name) {
                scripts.insert(name.to_string(), commands);
            }
        }
        Ok(ExpandedScripts { scripts })
    }
}

impl<K, S> FromIterator<(K, Vec<S>)> for ScriptTable
where
    K: Into<String>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, Vec<S>)>>(iter: T) -> Self {
        let mut table = ScriptTable::new();
        for (name, commands) in iter {
            table.insert(name, commands);
        }
        table
    }
}

/// One fully expanded command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub command: String,
    pub ignore_exit_code: bool,
}

impl Command {
    /// Split off a leading `- ` marker.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(IGNORE_EXIT_CODE_PREFIX) {
            Some(command) => Self {
                command: command.to_string(),
                ignore_exit_code: true,
            },
            None => Self {
                command: raw.to_string(),
                ignore_exit_code: false,
            },
        }
    }

    /// Copy of this command with `args` appended.
    fn forwarding(&self, args: &str, ignore_exit_code: bool) -> Self {
        let command = if args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {args}", self.command)
        };
        Self {
            command,
            ignore_exit_code: self.ignore_exit_code || ignore_exit_code,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ignore_exit_code {
            f.write_str(IGNORE_EXIT_CODE_PREFIX)?;
        }
        f.write_str(&self.command)
    }
}

/// Split a command into its first word and the remaining text.
pub fn split_command(command: &str) -> (&str, &str) {
    match command.split_once(' ') {
        Some((head, remainder)) => (head, remainder),
        None => (command, ""),
    }
}

struct Expansion<'a> {
    table: &'a ScriptTable,
    seen: HashMap<String, Vec<Command>>,
    active: Vec<String>,
}

impl Expansion<'_> {
    fn expand(&mut self, name: &str) -> Result<()> {
        if self.seen.contains_key(name) {
            return Ok(());
        }
        if self.active.iter().any(|active| active == name) {
            let mut chain = self.active.clone();
            chain.push(name.to_string());
            return Err(Error::CircularExpansion { chain });
        }
        let Some(raw_commands) = self.table.get(name) else {
            return Ok(());
        };

        self.active.push(name.to_string());
        let mut commands = Vec::new();
        for raw in raw_commands {
            let command = Command::parse(raw);
            let (head, remainder) = split_command(&command.command);
            if !self.table.contains(head) {
                commands.push(command);
                continue;
            }
            self.expand(head)?;
            if let Some(expanded) = self.seen.get(head) {
                commands.extend(
                    expanded
                        .iter()
                        .map(|sub| sub.forwarding(remainder, command.ignore_exit_code)),
                );
            }
        }
        self.active.pop();

        tracing::trace!(script = name, count = commands.len(), "expanded script");
        self.seen.insert(name.to_string(), commands);
        Ok(())
    }
}

/// A script table with every script flattened into plain commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedScripts {
    scripts: IndexMap<String, Vec<Command>>,
}

impl ExpandedScripts {
    pub fn get(&self, name: &str) -> Option<&[Command]> {
        self.scripts.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Command])> {
        self.scripts
            .iter()
            .map(|(name, commands)| (name.as_str(), commands.as_slice()))
    }

    /// Resolve one command: a script name expands (forwarding any trailing
    /// text), anything else passes through unchanged.
    pub fn resolve_command(&self, raw: &str) -> Vec<Command> {
        let command = Command::parse(raw);
        let (head, remainder) = split_command(&command.command);
        match self.scripts.get(head) {
            Some(expanded) => expanded
                .iter()
                .map(|sub| sub.forwarding(remainder, command.ignore_exit_code))
                .collect(),
            None => vec![command],
        }
    }

    /// Resolve every command in order and concatenate the results.
    pub fn resolve_commands<S: AsRef<str>>(&self, commands: &[S]) -> Vec<Command> {
        commands
            .iter()
            .flat_map(|c| self.resolve_command(c.as_ref()))
            .collect()
    }
}

/// Expand a single script of `table`.
///
/// A name that is not in the table is treated as a literal command.
pub fn expand(name: &str, table: &ScriptTable) -> Result<Vec<Command>> {
    Ok(table.expand()?.resolve_command(name))
}

/// Expand every command of `commands` against `table`.
pub fn resolve_commands<S: AsRef<str>>(
    commands: &[S],
    table: &ScriptTable,
) -> Result<Vec<Command>> {
    Ok(table.expand()?.resolve_commands(commands))
}
