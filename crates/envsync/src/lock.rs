// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Lockfile generation through an external resolver.
//!
//! Environments that write the same lockfile are merged into one
//! [`LockGroup`], each group is resolved by one resolver process and its
//! output is validated before it replaces the lockfile.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::FormatContext;
use crate::environment::{EDITABLE_PREFIX, Environment};
use crate::requirement::Requirement;
use crate::spec::LockConfig;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./lock_test.rs"]
mod lock_test;

/// Header line holding the digest of the resolver input.
pub const DIGEST_HEADER: &str = "# envsync-input: sha256:";

/// Environments resolved together into one lockfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGroup {
    output: PathBuf,
    environments: Vec<String>,
    python: Option<String>,
    dependencies: Vec<String>,
}

impl LockGroup {
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Names of the environments merged into this group, in order.
    pub fn environments(&self) -> &[String] {
        &self.environments
    }

    pub fn python(&self) -> Option<&str> {
        self.python.as_deref()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The requirements file handed to the resolver.
    pub fn input(&self) -> String {
        let mut input = String::new();
        for dependency in &self.dependencies {
            input.push_str(dependency);
            input.push('\n');
        }
        input
    }

    /// Digest of everything that determines the resolver's output.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.python.as_deref().unwrap_or_default());
        hasher.update([0u8]);
        hasher.update(self.input());
        format!("{:x}", hasher.finalize())
    }

    /// Comment lines written above the resolver output.
    pub fn header(&self) -> String {
        format!(
            "# This file was generated by envsync {} at {}\n# environments: {}\n{DIGEST_HEADER}{}\n",
            env!("CARGO_PKG_VERSION"),
            Utc::now().to_rfc3339(),
            self.environments.join(", "),
            self.digest(),
        )
    }
}

/// Group environments by lockfile, merging the dependencies of those that
/// share one.
///
/// Dependencies keep the order they are first seen in and exact duplicates
/// are dropped. Environments sharing a lockfile must not target different
/// interpreter versions.
pub fn plan_locks<'a, I>(environments: I) -> Result<Vec<LockGroup>>
where
    I: IntoIterator<Item = &'a Environment>,
{
    let mut groups: IndexMap<PathBuf, (LockGroup, Vec<Option<String>>)> = IndexMap::new();
    for env in environments {
        let output = env.lock_path()?;
        let (group, pythons) = groups.entry(output.clone()).or_insert_with(|| {
            (
                LockGroup {
                    output,
                    environments: Vec::new(),
                    python: None,
                    dependencies: Vec::new(),
                },
                Vec::new(),
            )
        });
        group.environments.push(env.name().to_string());
        pythons.push(env.python().map(str::to_string));
        if group.python.is_none() {
            group.python = env.python().map(str::to_string);
        }
        for dependency in env.dependency_strings()? {
            if !group.dependencies.contains(&dependency) {
                group.dependencies.push(dependency);
            }
        }
    }

    groups
        .into_values()
        .map(|(group, pythons)| {
            let mut versions: Vec<String> = pythons.iter().flatten().cloned().collect();
            versions.sort();
            versions.dedup();
            if versions.len() > 1 {
                return Err(Error::IncompatiblePythonVersions {
                    output: group.output,
                    environments: group.environments,
                    versions,
                });
            }
            Ok(group)
        })
        .collect()
}

/// Whether the lockfile of `group` was generated from its current input.
pub fn lock_is_current(group: &LockGroup) -> Result<bool> {
    let content = match std::fs::read_to_string(&group.output) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(error) => {
            return Err(Error::ReadFailed {
                path: group.output.clone(),
                error,
            });
        }
    };
    let digest = group.digest();
    Ok(content
        .lines()
        .take_while(|line| line.starts_with('#'))
        .filter_map(|line| line.strip_prefix(DIGEST_HEADER))
        .any(|recorded| recorded.trim() == digest))
}

/// Check that resolver output only holds pinned requirements.
pub fn validate_lock_output(output: &Path, content: &str) -> Result<()> {
    let invalid = |reason: String| Error::InvalidLockOutput {
        output: output.to_path_buf(),
        reason,
    };
    for line in logical_lines(content) {
        let line = strip_comment(&line);
        if line.is_empty() {
            continue;
        }
        if let Some(editable) = line.strip_prefix(EDITABLE_PREFIX) {
            // editable lines hold a bare locator
            if editable.trim().is_empty() {
                return Err(invalid("editable line without a locator".to_string()));
            }
            continue;
        }
        if line.starts_with('-') {
            // resolver options such as --index-url
            continue;
        }
        let requirement =
            Requirement::parse(line, false).map_err(|err| invalid(err.to_string()))?;
        if requirement.source().is_none() && !requirement.is_pinned() {
            return Err(invalid(format!("`{line}` is not pinned to a single version")));
        }
    }
    Ok(())
}

/// Join backslash continued lines, dropping per-requirement options.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        match line.trim_end().strip_suffix('\\') {
            Some(start) => {
                current.push_str(start);
                current.push(' ');
            }
            None => {
                current.push_str(line);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
        .into_iter()
        .map(|line| match line.find(" --") {
            // eg: --hash=sha256:...
            Some(index) if !line.trim_start().starts_with('-') => line[..index].to_string(),
            _ => line,
        })
        .collect()
}

fn strip_comment(line: &str) -> &str {
    let line = line.trim();
    if line.starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(index) => line[..index].trim_end(),
        None => line,
    }
}

/// Runs the external resolver command for a lock group.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    argv: Vec<String>,
    python_flag: Option<String>,
    timeout: Option<Duration>,
}

impl Resolver {
    /// A resolver run from `root` with the project's lock settings.
    pub fn new(root: impl Into<PathBuf>, config: &LockConfig) -> Self {
        Self {
            root: root.into(),
            argv: config.resolver.clone(),
            python_flag: config.python_flag.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line for one resolver run.
    pub fn command_line(
        &self,
        group: &LockGroup,
        input: &Path,
        output: &Path,
    ) -> Result<Vec<String>> {
        let context = FormatContext::new(&self.root);
        let input = input.display().to_string();
        let output = output.display().to_string();
        let named = [("input", input.as_str()), ("output", output.as_str())];
        let mut argv = self
            .argv
            .iter()
            .map(|arg| context.format(arg, &[], &named))
            .collect::<Result<Vec<_>>>()?;
        if let (Some(flag), Some(python)) = (&self.python_flag, group.python()) {
            argv.push(flag.clone());
            argv.push(python.to_string());
        }
        Ok(argv)
    }

    /// Resolve `group` and atomically replace its lockfile.
    pub async fn resolve(&self, group: &LockGroup) -> Result<()> {
        let output = group.output();
        let dir = output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&dir).await?;

        let mut input = tempfile::Builder::new()
            .prefix(".envsync-input-")
            .suffix(".in")
            .tempfile_in(&dir)?;
        std::io::Write::write_all(&mut input, group.input().as_bytes())?;
        let staged = tempfile::Builder::new()
            .prefix(".envsync-lock-")
            .suffix(".txt")
            .tempfile_in(&dir)?
            .into_temp_path();

        let argv = self.command_line(group, input.path(), &staged)?;
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::InvalidLockOutput {
                output: output.to_path_buf(),
                reason: "the resolver command is empty".to_string(),
            });
        };
        tracing::info!(output = ?output, environments = ?group.environments(), "locking");
        tracing::debug!(?argv, "running resolver");

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(&self.root)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        let run = command.output();
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| {
                Error::ResolverTimeout {
                    program: program.clone(),
                    output: output.to_path_buf(),
                    timeout,
                }
            })?,
            None => run.await,
        }?;
        if !result.status.success() {
            return Err(Error::ResolverFailed {
                program: program.clone(),
                output: output.to_path_buf(),
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        let resolved = tokio::fs::read_to_string(&staged).await?;
        validate_lock_output(output, &resolved)?;
        tokio::fs::write(&staged, format!("{}{resolved}", group.header())).await?;
        staged.persist(output).map_err(|err| err.error)?;
        tracing::debug!(output = ?output, "lockfile written");
        Ok(())
    }
}

/// Resolve every group, running at most `jobs` resolvers at once.
///
/// Returns the written lockfiles in group order. The first failure is
/// returned and any resolvers still running are terminated.
pub async fn lock_all(
    groups: Vec<LockGroup>,
    resolver: Arc<Resolver>,
    jobs: usize,
) -> Result<Vec<PathBuf>> {
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut join_set = JoinSet::new();
    let count = groups.len();
    for (index, group) in groups.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let resolver = Arc::clone(&resolver);
        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|err| Error::Io(std::io::Error::other(err)))?;
            resolver.resolve(&group).await?;
            Ok::<_, Error>((index, group.output))
        });
    }

    let mut written: Vec<Option<PathBuf>> = vec![None; count];
    while let Some(joined) = join_set.join_next().await {
        let (index, output) = joined.map_err(|err| Error::Io(std::io::Error::other(err)))??;
        written[index] = Some(output);
    }
    Ok(written.into_iter().flatten().collect())
}
