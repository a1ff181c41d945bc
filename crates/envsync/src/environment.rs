// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Environments of a project, one per configured name and matrix instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;

use crate::context::FormatContext;
use crate::matrix::{self, MatrixValues, PYTHON_AXIS};
use crate::requirement::Requirement;
use crate::scripts::{Command, ExpandedScripts};
use crate::snapshot::DistributionSnapshot;
use crate::spec::{DEFAULT_ENVIRONMENT, EnvConfig, EnvironmentType, ProjectConfig};
use crate::{Error, Result, discovery, sync};

#[cfg(test)]
#[path = "./environment_test.rs"]
mod environment_test;

/// Dependency prefix marking an editable install, as in requirements files.
pub const EDITABLE_PREFIX: &str = "-e ";

/// Where the distributions of an environment live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentKind {
    /// A virtual environment rooted at `path`.
    Virtual { path: PathBuf },
    /// An existing installation with the given site directories.
    System { site_dirs: Vec<PathBuf> },
}

impl EnvironmentKind {
    pub fn env_type(&self) -> EnvironmentType {
        match self {
            Self::Virtual { .. } => EnvironmentType::Virtual,
            Self::System { .. } => EnvironmentType::System,
        }
    }

    /// The site directories searched for installed distributions.
    pub fn search_path(&self, python: Option<&str>) -> Vec<PathBuf> {
        match self {
            Self::System { site_dirs } => site_dirs.clone(),
            Self::Virtual { path } => virtual_site_dirs(path, python),
        }
    }
}

#[cfg(windows)]
fn virtual_site_dirs(path: &Path, _python: Option<&str>) -> Vec<PathBuf> {
    vec![path.join("Lib").join("site-packages")]
}

#[cfg(not(windows))]
fn virtual_site_dirs(path: &Path, python: Option<&str>) -> Vec<PathBuf> {
    let lib = path.join("lib");
    let mut found: Vec<PathBuf> = std::fs::read_dir(&lib)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_name().to_string_lossy().starts_with("python"))
                .map(|entry| entry.path().join("site-packages"))
                .filter(|site| site.is_dir())
                .collect()
        })
        .unwrap_or_default();
    found.sort();
    if found.is_empty() {
        // not created yet, so nothing can be installed in it
        if let Some(python) = python {
            let short: Vec<&str> = python.split('.').take(2).collect();
            found.push(lib.join(format!("python{}", short.join("."))).join("site-packages"));
        }
    }
    found
}

/// A loaded project: its configuration and root directory.
#[derive(Debug, Clone)]
pub struct Project {
    config: ProjectConfig,
    root: PathBuf,
}

impl Project {
    pub fn new(config: ProjectConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            root: root.into(),
        }
    }

    /// Discover and load the project containing `start_path`.
    pub fn discover<P: AsRef<Path>>(start_path: P) -> Result<Self> {
        let config = discovery::discover_project(start_path)?;
        let root = config
            .root()
            .map(|root| dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()))
            .unwrap_or_default();
        Ok(Self::new(config, root))
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every environment instance, in configuration order.
    ///
    /// An environment with a matrix yields one instance per combination,
    /// later duplicates of an instance name are dropped.
    pub fn environments(&self) -> Vec<Environment> {
        let mut instances: IndexMap<String, Environment> = IndexMap::new();
        for (name, config) in &self.config.envs {
            let config = Arc::new(config.clone());
            if config.matrix.is_empty() {
                let env =
                    Environment::new(name, Arc::clone(&config), MatrixValues::new(), &self.root);
                instances.entry(name.clone()).or_insert(env);
                continue;
            }
            for table in &config.matrix {
                for values in matrix::expand_matrix(table) {
                    let env = Environment::new(name, Arc::clone(&config), values, &self.root);
                    instances.entry(env.name().to_string()).or_insert(env);
                }
            }
        }
        instances.into_values().collect()
    }

    /// Find one environment instance by name.
    pub fn environment(&self, name: &str) -> Result<Environment> {
        let environments = self.environments();
        let names: Vec<String> = environments.iter().map(|e| e.name().to_string()).collect();
        environments
            .into_iter()
            .find(|env| env.name() == name)
            .ok_or_else(|| Error::UnknownEnvironment {
                name: name.to_string(),
                similar: similar_names(name, &names),
            })
    }
}

/// Names within a small edit distance of `name`, or containing it.
fn similar_names(name: &str, candidates: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter(|candidate| {
            candidate.contains(name)
                || name.contains(candidate.as_str())
                || edit_distance(name, candidate) <= 2
        })
        .cloned()
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}

/// One environment instance.
///
/// Dependencies, scripts and the environment kind are computed on first use
/// and kept for the life of the instance.
#[derive(Debug, Clone)]
pub struct Environment {
    name: String,
    base_name: String,
    config: Arc<EnvConfig>,
    matrix: MatrixValues,
    root: PathBuf,
    kind: OnceCell<EnvironmentKind>,
    dependencies: OnceCell<Vec<Requirement>>,
    scripts: OnceCell<ExpandedScripts>,
}

impl Environment {
    pub fn new(
        base_name: &str,
        config: Arc<EnvConfig>,
        matrix: MatrixValues,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: matrix::instance_name(base_name, &matrix),
            base_name: base_name.to_string(),
            config,
            matrix,
            root: root.into(),
            kind: OnceCell::new(),
            dependencies: OnceCell::new(),
            scripts: OnceCell::new(),
        }
    }

    /// The instance name, eg: `test.py3.11`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the configured environment this is an instance of.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn matrix(&self) -> &MatrixValues {
        &self.matrix
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn env_type(&self) -> EnvironmentType {
        self.config.env_type
    }

    /// The target interpreter version, a matrix value taking precedence.
    pub fn python(&self) -> Option<&str> {
        self.matrix
            .get(PYTHON_AXIS)
            .map(String::as_str)
            .or(self.config.python.as_deref())
    }

    /// The formatting context of this environment.
    pub fn context(&self, verbosity: i32, args: Option<String>) -> FormatContext {
        FormatContext::new(&self.root)
            .with_env_overrides(self.config.env_vars.clone())
            .with_verbosity(verbosity)
            .with_matrix(self.matrix.clone())
            .with_args(args)
            .with_environment(&self.name, self.env_type().as_str())
    }

    pub fn kind(&self) -> Result<&EnvironmentKind> {
        self.kind.get_or_try_init(|| -> Result<EnvironmentKind> {
            let context = self.context(0, None);
            let kind = match self.config.env_type {
                EnvironmentType::Virtual => {
                    let template = match &self.config.path {
                        Some(path) => path.clone(),
                        None if self.name == DEFAULT_ENVIRONMENT => ".venv".to_string(),
                        None => ".venvs/{env_name}".to_string(),
                    };
                    EnvironmentKind::Virtual {
                        path: self.root.join(context.format_template(&template)?),
                    }
                }
                EnvironmentType::System => EnvironmentKind::System {
                    site_dirs: self
                        .config
                        .search_path
                        .iter()
                        .map(|dir| -> Result<PathBuf> {
                            Ok(self.root.join(context.format_template(dir)?))
                        })
                        .collect::<Result<_>>()?,
                },
            };
            Ok(kind)
        })
    }

    /// The site directories searched for installed distributions.
    pub fn search_path(&self) -> Result<Vec<PathBuf>> {
        Ok(self.kind()?.search_path(self.python()))
    }

    /// Every dependency string, formatted.
    pub fn dependency_strings(&self) -> Result<Vec<String>> {
        let context = self.context(0, None);
        self.config
            .dependencies
            .iter()
            .map(|dep| context.format_template(dep))
            .collect()
    }

    /// The parsed dependencies of this environment.
    ///
    /// Relative paths resolve against the project root and a leading `-e `
    /// marks the dependency editable.
    pub fn dependencies(&self) -> Result<&[Requirement]> {
        self.dependencies
            .get_or_try_init(|| -> Result<Vec<Requirement>> {
                self.dependency_strings()?
                    .iter()
                    .map(|dep| match dep.strip_prefix(EDITABLE_PREFIX) {
                        Some(dep) => Requirement::parse_relative_to(dep.trim(), true, &self.root),
                        None => Requirement::parse_relative_to(dep, false, &self.root),
                    })
                    .collect()
            })
            .map(Vec::as_slice)
    }

    pub fn scripts(&self) -> Result<&ExpandedScripts> {
        self.scripts.get_or_try_init(|| self.config.scripts.expand())
    }

    /// Expand `commands` through the scripts of this environment and format
    /// the results.
    pub fn resolve_commands<S: AsRef<str>>(
        &self,
        commands: &[S],
        args: Option<String>,
        verbosity: i32,
    ) -> Result<Vec<Command>> {
        let context = self.context(verbosity, args);
        self.scripts()?
            .resolve_commands(commands)
            .into_iter()
            .map(|command| -> Result<Command> {
                Ok(Command {
                    command: context.format_template(&command.command)?,
                    ignore_exit_code: command.ignore_exit_code,
                })
            })
            .collect()
    }

    /// Whether the installed distributions satisfy every dependency.
    pub fn dependencies_in_sync(&self) -> Result<bool> {
        let dependencies = self.dependencies()?;
        if dependencies.is_empty() {
            return Ok(true);
        }
        let snapshot = DistributionSnapshot::cached(&self.search_path()?)?;
        match sync::out_of_sync(dependencies, &snapshot) {
            Some(requirement) => {
                tracing::info!(env = %self.name, %requirement, "environment is out of sync");
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Where the lockfile of this environment is written.
    pub fn lock_path(&self) -> Result<PathBuf> {
        let template = match &self.config.lock_filename {
            Some(template) => template.as_str(),
            None if self.name == DEFAULT_ENVIRONMENT => "requirements.txt",
            None => "requirements/requirements-{env_name}.txt",
        };
        let path = self.context(0, None).format_template(template)?;
        Ok(self.root.join(path))
    }
}
