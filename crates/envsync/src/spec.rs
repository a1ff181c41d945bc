// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Project file parsing and data types for envsync.yaml files.
//!
//! The file is validated in full when it is loaded, every problem found is
//! reported together in a single [`Error::InvalidConfig`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::ConfigViolation;
use crate::matrix;
use crate::scripts::ScriptTable;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./spec_test.rs"]
mod spec_test;

/// Name of the environment every other environment inherits from.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// API version for project files.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum ApiVersion {
    #[serde(rename = "envsync/v0")]
    V0,
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::V0
    }
}

/// Helper for two-stage deserialization to determine API version first.
#[derive(Deserialize)]
struct ApiVersionMapping {
    #[serde(default)]
    api: ApiVersion,
}

/// How an environment is materialized.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    /// An isolated virtual environment owned by envsync.
    #[default]
    Virtual,
    /// An existing interpreter installation.
    System,
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of one environment, after template inheritance.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct EnvConfig {
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,

    /// The environment this one inherited from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Target interpreter version, eg: "3.11"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,

    /// Dependency specifiers, including any `extra-dependencies`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env_vars: IndexMap<String, String>,

    #[serde(skip_serializing_if = "ScriptTable::is_empty")]
    pub scripts: ScriptTable,

    /// Matrix tables, each expanding into one environment per combination.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matrix: Vec<IndexMap<String, Vec<String>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_filename: Option<String>,

    /// Location of a virtual environment, relative to the project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Site directories of a system environment.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_path: Vec<String>,
}

/// Settings for the external lock resolver.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LockConfig {
    /// Resolver command line, `{input}` and `{output}` are substituted.
    pub resolver: Vec<String>,

    /// Flag used to pass the target interpreter version, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_flag: Option<String>,

    /// Seconds before the resolver is terminated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Maximum number of concurrent resolver processes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            resolver: [
                "uv",
                "pip",
                "compile",
                "--generate-hashes",
                "--quiet",
                "--output-file",
                "{output}",
                "{input}",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            python_flag: Some("--python-version".to_string()),
            timeout: None,
            jobs: None,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
        })
    }
}

/// The contents of an envsync.yaml file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectConfig {
    /// API version identifier.
    pub api: ApiVersion,

    /// Environments in file order, `default` always present.
    pub envs: IndexMap<String, EnvConfig>,

    pub lock: LockConfig,

    /// Path to the file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl ProjectConfig {
    /// Parse a project from YAML string.
    pub fn from_yaml<S: Into<String>>(yaml: S) -> Result<Self> {
        let yaml = yaml.into();

        // Stage 1: Parse to get API version
        let mut value: Value = serde_yaml::from_str(&yaml).map_err(|e| Error::InvalidYaml {
            error: e,
            yaml_content: yaml.clone(),
        })?;
        if value.is_null() {
            value = Value::Mapping(Mapping::new());
        }

        let with_version: ApiVersionMapping =
            serde_yaml::from_value(value.clone()).map_err(|e| Error::InvalidYaml {
                error: e,
                yaml_content: yaml.clone(),
            })?;

        // Stage 2: Validate based on version
        match with_version.api {
            ApiVersion::V0 => Self::from_v0(&value),
        }
    }

    /// Load a project from file path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::ReadFailed {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config = Self::from_yaml(yaml)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// The directory holding the project file.
    pub fn root(&self) -> Option<&Path> {
        self.source_path.as_deref().and_then(Path::parent)
    }

    pub fn env(&self, name: &str) -> Option<&EnvConfig> {
        self.envs.get(name)
    }

    fn from_v0(value: &Value) -> Result<Self> {
        let mut v = Validator::default();
        let mut raw_envs = IndexMap::new();
        let mut lock = LockConfig::default();

        if let Some(root) = v.mapping("<root>", value) {
            for (key, value) in root {
                let Some(key) = v.key("<root>", key) else {
                    continue;
                };
                match key.as_str() {
                    "api" => {}
                    "envs" => raw_envs = v.envs(value),
                    "lock" => lock = v.lock(value),
                    _ => v.report(&key, "is not a recognized field"),
                }
            }
        }

        let envs = Inheritance::new(&raw_envs, &mut v).resolve_all();
        if !v.violations.is_empty() {
            return Err(Error::InvalidConfig {
                violations: v.violations,
            });
        }
        Ok(Self {
            api: ApiVersion::V0,
            envs,
            lock,
            source_path: None,
        })
    }
}

/// One environment as written, before template inheritance.
#[derive(Debug, Clone, Default)]
struct RawEnv {
    template: Option<String>,
    env_type: Option<EnvironmentType>,
    description: Option<String>,
    python: Option<String>,
    dependencies: Option<Vec<String>>,
    extra_dependencies: Vec<String>,
    env_vars: IndexMap<String, String>,
    scripts: ScriptTable,
    matrix: Option<Vec<IndexMap<String, Vec<String>>>>,
    lock_filename: Option<String>,
    path: Option<String>,
    search_path: Option<Vec<String>>,
}

/// Collects every violation found while walking the document.
#[derive(Default)]
struct Validator {
    violations: Vec<ConfigViolation>,
}

impl Validator {
    fn report(&mut self, field: &str, message: impl Into<String>) {
        self.violations.push(ConfigViolation::new(field, message));
    }

    fn mapping<'v>(&mut self, field: &str, value: &'v Value) -> Option<&'v Mapping> {
        match value {
            Value::Mapping(mapping) => Some(mapping),
            _ => {
                self.report(field, "must be a table");
                None
            }
        }
    }

    fn key(&mut self, field: &str, key: &Value) -> Option<String> {
        match key {
            Value::String(s) => Some(s.clone()),
            _ => {
                self.report(field, "must only have string keys");
                None
            }
        }
    }

    fn string(&mut self, field: &str, value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => {
                self.report(field, "must be a string");
                None
            }
        }
    }

    /// A string, boolean or integer, as a string.
    fn scalar(&mut self, field: &str, value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            _ => {
                self.report(field, "must be a string");
                None
            }
        }
    }

    fn string_list(&mut self, field: &str, value: &Value) -> Option<Vec<String>> {
        match value {
            Value::Sequence(items) => Some(
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| self.string(&format!("{field}.{i}"), item))
                    .collect(),
            ),
            _ => {
                self.report(field, "must be an array");
                None
            }
        }
    }

    fn positive(&mut self, field: &str, value: &Value) -> Option<u64> {
        match value.as_u64() {
            Some(n) if n > 0 => Some(n),
            _ => {
                self.report(field, "must be a positive integer");
                None
            }
        }
    }

    fn envs(&mut self, value: &Value) -> IndexMap<String, RawEnv> {
        let mut envs = IndexMap::new();
        let Some(mapping) = self.mapping("envs", value) else {
            return envs;
        };
        for (key, value) in mapping {
            let Some(name) = self.key("envs", key) else {
                continue;
            };
            let field = format!("envs.{name}");
            if name.is_empty() || name.contains(char::is_whitespace) {
                self.report(&field, "must be a name without whitespace");
                continue;
            }
            let env = self.env(&field, value);
            envs.insert(name, env);
        }
        envs
    }

    fn env(&mut self, field: &str, value: &Value) -> RawEnv {
        let mut env = RawEnv::default();
        if value.is_null() {
            return env;
        }
        let Some(mapping) = self.mapping(field, value) else {
            return env;
        };
        for (key, value) in mapping {
            let Some(key) = self.key(field, key) else {
                continue;
            };
            let field = format!("{field}.{key}");
            match key.as_str() {
                "template" => env.template = self.string(&field, value),
                "type" => {
                    env.env_type = match self.string(&field, value).as_deref() {
                        Some("virtual") => Some(EnvironmentType::Virtual),
                        Some("system") => Some(EnvironmentType::System),
                        Some(_) => {
                            self.report(&field, "must be one of: virtual, system");
                            None
                        }
                        None => None,
                    }
                }
                "description" => env.description = self.string(&field, value),
                "python" => env.python = self.string(&field, value),
                "dependencies" => env.dependencies = self.string_list(&field, value),
                "extra-dependencies" => {
                    env.extra_dependencies = self.string_list(&field, value).unwrap_or_default()
                }
                "env-vars" => env.env_vars = self.env_vars(&field, value),
                "scripts" => env.scripts = self.scripts(&field, value),
                "matrix" => env.matrix = self.matrix(&field, value),
                "lock-filename" => env.lock_filename = self.string(&field, value),
                "path" => env.path = self.string(&field, value),
                "search-path" => env.search_path = self.string_list(&field, value),
                _ => self.report(&field, "is not a recognized field"),
            }
        }
        env
    }

    fn env_vars(&mut self, field: &str, value: &Value) -> IndexMap<String, String> {
        let mut vars = IndexMap::new();
        let Some(mapping) = self.mapping(field, value) else {
            return vars;
        };
        for (key, value) in mapping {
            let Some(name) = self.key(field, key) else {
                continue;
            };
            if let Some(value) = self.scalar(&format!("{field}.{name}"), value) {
                vars.insert(name, value);
            }
        }
        vars
    }

    fn scripts(&mut self, field: &str, value: &Value) -> ScriptTable {
        let mut table = ScriptTable::new();
        let Some(mapping) = self.mapping(field, value) else {
            return table;
        };
        for (key, value) in mapping {
            let Some(name) = self.key(field, key) else {
                continue;
            };
            let script_field = format!("{field}.{name}");
            if name.is_empty() || name.contains(char::is_whitespace) {
                self.report(&script_field, "must be a name without whitespace");
                continue;
            }
            match value {
                Value::String(command) => table.insert(name, [command.clone()]),
                Value::Sequence(items) => {
                    let commands: Vec<String> = items
                        .iter()
                        .enumerate()
                        .filter_map(|(i, item)| self.string(&format!("{script_field}.{i}"), item))
                        .collect();
                    table.insert(name, commands);
                }
                _ => self.report(&script_field, "must be a string or an array of strings"),
            }
        }
        table
    }

    fn matrix(&mut self, field: &str, value: &Value) -> Option<Vec<IndexMap<String, Vec<String>>>> {
        let Value::Sequence(tables) = value else {
            self.report(field, "must be an array");
            return None;
        };
        let mut matrices = Vec::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            let table_field = format!("{field}.{i}");
            let Some(mapping) = self.mapping(&table_field, table) else {
                continue;
            };
            let mut axes: IndexMap<String, Vec<String>> = IndexMap::new();
            for (key, value) in mapping {
                let Some(axis) = self.key(&table_field, key) else {
                    continue;
                };
                let axis_field = format!("{table_field}.{axis}");
                let axis = matrix::axis_name(&axis).to_string();
                if axes.contains_key(&axis) {
                    self.report(&axis_field, "is defined more than once");
                    continue;
                }
                let Value::Sequence(items) = value else {
                    self.report(&axis_field, "must be an array");
                    continue;
                };
                if items.is_empty() {
                    self.report(&axis_field, "must not be empty");
                    continue;
                }
                let values = items
                    .iter()
                    .enumerate()
                    .filter_map(|(j, item)| self.scalar(&format!("{axis_field}.{j}"), item))
                    .collect();
                axes.insert(axis, values);
            }
            if axes.is_empty() {
                self.report(&table_field, "must define at least one variable");
            } else {
                matrices.push(axes);
            }
        }
        Some(matrices)
    }

    fn lock(&mut self, value: &Value) -> LockConfig {
        let mut lock = LockConfig::default();
        let Some(mapping) = self.mapping("lock", value) else {
            return lock;
        };
        for (key, value) in mapping {
            let Some(key) = self.key("lock", key) else {
                continue;
            };
            let field = format!("lock.{key}");
            match key.as_str() {
                "resolver" => match self.string_list(&field, value) {
                    Some(argv) if argv.is_empty() => self.report(&field, "must not be empty"),
                    Some(argv) => lock.resolver = argv,
                    None => {}
                },
                "python-flag" => {
                    lock.python_flag = match value {
                        Value::Null => None,
                        _ => self.string(&field, value),
                    }
                }
                "timeout" => lock.timeout = self.positive(&field, value),
                "jobs" => lock.jobs = self.positive(&field, value).map(|n| n as usize),
                _ => self.report(&field, "is not a recognized field"),
            }
        }
        lock
    }
}

/// Resolves `template` inheritance between environments.
struct Inheritance<'a> {
    raw: &'a IndexMap<String, RawEnv>,
    validator: &'a mut Validator,
    resolved: HashMap<String, EnvConfig>,
    failed: HashSet<String>,
    active: Vec<String>,
}

impl<'a> Inheritance<'a> {
    fn new(raw: &'a IndexMap<String, RawEnv>, validator: &'a mut Validator) -> Self {
        Self {
            raw,
            validator,
            resolved: HashMap::new(),
            failed: HashSet::new(),
            active: Vec::new(),
        }
    }

    fn resolve_all(mut self) -> IndexMap<String, EnvConfig> {
        let mut names: Vec<String> = self.raw.keys().cloned().collect();
        if !self.raw.contains_key(DEFAULT_ENVIRONMENT) {
            names.insert(0, DEFAULT_ENVIRONMENT.to_string());
        }
        for name in &names {
            self.resolve(name);
        }
        names
            .into_iter()
            .filter_map(|name| self.resolved.remove(&name).map(|env| (name, env)))
            .collect()
    }

    fn resolve(&mut self, name: &str) -> Option<EnvConfig> {
        if let Some(env) = self.resolved.get(name) {
            return Some(env.clone());
        }
        if self.failed.contains(name) {
            return None;
        }
        let raw = self.raw;
        let implicit_default = RawEnv::default();
        let env = match raw.get(name) {
            Some(env) => env,
            None if name == DEFAULT_ENVIRONMENT => &implicit_default,
            None => return None,
        };

        let template = match env.template.as_deref() {
            // an environment naming itself opts out of inheritance
            Some(template) if template == name => None,
            Some(template) => Some(template),
            None if name == DEFAULT_ENVIRONMENT => None,
            None => Some(DEFAULT_ENVIRONMENT),
        };

        let base = match template {
            None => EnvConfig::default(),
            Some(template) => {
                let field = format!("envs.{name}.template");
                if let Some(start) = self.active.iter().position(|a| a == template) {
                    let mut chain = self.active[start..].to_vec();
                    chain.push(name.to_string());
                    chain.push(template.to_string());
                    self.validator
                        .report(&field, format!("forms a cycle: {}", chain.join(" -> ")));
                    self.failed.insert(name.to_string());
                    return None;
                }
                if template != DEFAULT_ENVIRONMENT && !raw.contains_key(template) {
                    self.validator.report(
                        &field,
                        format!("refers to an unknown environment `{template}`"),
                    );
                    self.failed.insert(name.to_string());
                    return None;
                }
                self.active.push(name.to_string());
                let base = self.resolve(template);
                self.active.pop();
                match base {
                    Some(base) => base,
                    None => {
                        self.failed.insert(name.to_string());
                        return None;
                    }
                }
            }
        };

        let mut dependencies = env.dependencies.clone().unwrap_or(base.dependencies);
        dependencies.extend(env.extra_dependencies.iter().cloned());
        let mut env_vars = base.env_vars;
        env_vars.extend(env.env_vars.clone());

        let resolved = EnvConfig {
            env_type: env.env_type.unwrap_or(base.env_type),
            template: template.map(str::to_string),
            description: env.description.clone(),
            python: env.python.clone().or(base.python),
            dependencies,
            env_vars,
            scripts: ScriptTable::merged(&env.scripts, &base.scripts),
            matrix: env.matrix.clone().unwrap_or_default(),
            lock_filename: env.lock_filename.clone().or(base.lock_filename),
            path: env.path.clone(),
            search_path: env.search_path.clone().unwrap_or(base.search_path),
        };
        tracing::trace!(env = name, template = ?template, "resolved environment config");
        self.resolved.insert(name.to_string(), resolved.clone());
        Some(resolved)
    }
}
