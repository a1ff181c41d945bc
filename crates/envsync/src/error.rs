// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for envsync operations.

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Convenience Result type with envsync Error.
pub type Result<T> = std::result::Result<T, Error>;

/// A single problem found while validating a project configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    /// Dotted path of the offending field, eg: `envs.test.scripts.lint`
    pub field: String,
    pub message: String,
}

impl ConfigViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Field `{}` {}", self.field, self.message)
    }
}

/// Errors that can occur during envsync operations.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// No envsync.yaml found in directory tree
    #[error("No envsync.yaml found in {0:?} or any parent directory")]
    #[diagnostic(
        code(envsync::not_found_in_tree),
        help("Create an envsync.yaml file at the project root or specify a path with -f")
    )]
    NotFoundInTree(PathBuf),

    /// Invalid YAML in the project file
    #[error("Invalid envsync.yaml file: {error}")]
    #[diagnostic(
        code(envsync::invalid_yaml),
        help("Check YAML syntax and ensure 'api: envsync/v0' is present")
    )]
    InvalidYaml {
        #[source]
        error: serde_yaml::Error,
        yaml_content: String,
    },

    /// Failed to read file
    #[error("Failed to read file: {path:?}")]
    #[diagnostic(code(envsync::read_failed))]
    ReadFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// One or more fields of the configuration have the wrong shape
    #[error("Invalid configuration:\n{}", list_violations(violations))]
    #[diagnostic(code(envsync::invalid_config))]
    InvalidConfig { violations: Vec<ConfigViolation> },

    /// A context field could not be resolved
    #[error("Unable to format field `{field}`: {reason}")]
    #[diagnostic(code(envsync::format))]
    Format { field: String, reason: String },

    /// Scripts that reference each other in a loop
    #[error("Circular expansion detected for field `scripts`: {}", chain.join(" -> "))]
    #[diagnostic(
        code(envsync::circular_expansion),
        help("Remove one of the script references in the chain")
    )]
    CircularExpansion { chain: Vec<String> },

    /// Dependency specifier that could not be parsed
    #[error("Invalid requirement `{requirement}`: {reason}")]
    #[diagnostic(code(envsync::invalid_requirement))]
    InvalidRequirement { requirement: String, reason: String },

    /// Version or version specifier that could not be parsed
    #[error("Invalid version `{version}`: {reason}")]
    #[diagnostic(code(envsync::invalid_version))]
    InvalidVersion { version: String, reason: String },

    /// The same matrix variable given twice on the command line
    #[error("Duplicate included/excluded matrix variable: {0}")]
    #[diagnostic(code(envsync::duplicate_matrix_variable))]
    DuplicateMatrixVariable(String),

    /// Unknown environment name
    #[error("Unknown environment: {name}")]
    #[diagnostic(
        code(envsync::unknown_environment),
        help("{}", suggestion_message(similar))
    )]
    UnknownEnvironment { name: String, similar: Vec<String> },

    /// Environments sharing a lockfile that target different interpreters
    #[error(
        "Environments {} share the lockfile {output:?} but target different Python versions: {}",
        environments.join(", "),
        versions.join(", ")
    )]
    #[diagnostic(
        code(envsync::incompatible_python_versions),
        help("Give each environment its own `lock-filename` or align their `python` options")
    )]
    IncompatiblePythonVersions {
        output: PathBuf,
        environments: Vec<String>,
        versions: Vec<String>,
    },

    /// The external resolver exited unsuccessfully
    #[error("Resolver `{program}` failed for {output:?} with exit code {}", display_code(*code))]
    #[diagnostic(code(envsync::resolver_failed))]
    ResolverFailed {
        program: String,
        output: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    /// The external resolver did not finish in time
    #[error("Resolver `{program}` timed out after {timeout:?} for {output:?}")]
    #[diagnostic(code(envsync::resolver_timeout))]
    ResolverTimeout {
        program: String,
        output: PathBuf,
        timeout: Duration,
    },

    /// The resolver produced something that is not a pinned manifest
    #[error("Invalid resolver output for {output:?}: {reason}")]
    #[diagnostic(code(envsync::invalid_lock_output))]
    InvalidLockOutput { output: PathBuf, reason: String },

    /// IO error passthrough
    #[error(transparent)]
    #[diagnostic(code(envsync::io_error))]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::Format`] error.
    pub fn format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The exit code a command line front-end should use for this error.
    ///
    /// External resolver failures propagate the process's own exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ResolverFailed {
                code: Some(code), ..
            } => *code,
            _ => 1,
        }
    }
}

fn suggestion_message(similar: &[String]) -> String {
    if similar.is_empty() {
        "Check that the environment name is correct".to_string()
    } else {
        format!("Did you mean one of: {}?", similar.join(", "))
    }
}

fn list_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn display_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "<terminated by signal>".to_string(),
    }
}
