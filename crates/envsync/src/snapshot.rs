// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Snapshots of the distributions installed in a set of site directories.
//!
//! A snapshot is built by walking the `*.dist-info` directories of each
//! search path entry. Building one is comparatively expensive, so
//! [`DistributionSnapshot::cached`] builds it at most once for any given
//! search path during the life of the process.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::{Lazy, OnceCell};
use pep440_rs::Version;
use pep508_rs::{MarkerEnvironment, MarkerEnvironmentBuilder};
use serde::Deserialize;
use url::Url;

use crate::requirement::{PackageName, Requirement, normalize_name};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./snapshot_test.rs"]
mod snapshot_test;

type SnapshotCell = Arc<OnceCell<Arc<DistributionSnapshot>>>;

/// Global cache of snapshots, keyed by search path.
static SNAPSHOTS: Lazy<Mutex<HashMap<Vec<PathBuf>, SnapshotCell>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Where an installed distribution came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Installed from a package index.
    Registry,
    /// Installed from an archive url.
    Url { url: Url },
    Vcs {
        vcs: String,
        url: Url,
        commit_id: String,
        requested_revision: Option<String>,
    },
    /// Installed from a local directory.
    Directory { url: Url, editable: bool },
}

impl Origin {
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Directory { editable: true, .. })
    }
}

/// One installed distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub name: PackageName,
    pub version: Version,
    /// Normalized extras whose dependencies are all installed.
    pub extras: BTreeSet<String>,
    pub origin: Origin,
}

impl Distribution {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: PackageName::new(name),
            version,
            extras: BTreeSet::new(),
            origin: Origin::Registry,
        }
    }

    pub fn with_extras<I, S>(mut self, extras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extras = extras
            .into_iter()
            .map(|e| normalize_name(e.as_ref()))
            .collect();
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

/// The marker environment of a CPython interpreter of the given version on
/// the current platform.
pub fn marker_environment(python: &str) -> Result<MarkerEnvironment> {
    let python = python.trim();
    let python_version = python.split('.').take(2).collect::<Vec<_>>().join(".");
    let (os_name, sys_platform, platform_system) = match std::env::consts::OS {
        "windows" => ("nt", "win32", "Windows"),
        "macos" => ("posix", "darwin", "Darwin"),
        "linux" => ("posix", "linux", "Linux"),
        other => ("posix", other, other),
    };
    MarkerEnvironment::try_from(MarkerEnvironmentBuilder {
        implementation_name: "cpython",
        implementation_version: python,
        os_name,
        platform_machine: std::env::consts::ARCH,
        platform_python_implementation: "CPython",
        platform_release: "",
        platform_system,
        platform_version: "",
        python_full_version: python,
        python_version: &python_version,
        sys_platform,
    })
    .map_err(|err| Error::InvalidVersion {
        version: python.to_string(),
        reason: err.to_string(),
    })
}

/// An immutable view of the installed distributions of one interpreter.
#[derive(Debug, Clone)]
pub struct DistributionSnapshot {
    /// Unset when the interpreter version is unknown.
    environment: Option<MarkerEnvironment>,
    distributions: BTreeMap<String, Distribution>,
}

impl DistributionSnapshot {
    /// Build a snapshot from known distributions; the first distribution
    /// of any name wins.
    pub fn new(
        environment: Option<MarkerEnvironment>,
        distributions: impl IntoIterator<Item = Distribution>,
    ) -> Self {
        let mut by_name = BTreeMap::new();
        for dist in distributions {
            by_name
                .entry(dist.name.as_str().to_string())
                .or_insert(dist);
        }
        Self {
            environment,
            distributions: by_name,
        }
    }

    /// Walk the site directories of `search_path`, in order.
    pub fn load(search_path: &[PathBuf]) -> Result<Self> {
        let environment = match infer_python_version(search_path) {
            Some(python) => match marker_environment(&python) {
                Ok(environment) => Some(environment),
                Err(err) => {
                    tracing::warn!(?search_path, %err, "ignoring interpreter version");
                    None
                }
            },
            None => {
                tracing::warn!(
                    ?search_path,
                    "unable to determine the interpreter version, only extra markers apply"
                );
                None
            }
        };
        Self::load_with_environment(search_path, environment)
    }

    /// Walk the site directories of `search_path` for a known interpreter.
    pub fn load_with_environment(
        search_path: &[PathBuf],
        environment: Option<MarkerEnvironment>,
    ) -> Result<Self> {
        let mut found: Vec<InstalledMetadata> = Vec::new();
        let mut seen = BTreeSet::new();
        for dir in search_path {
            if !dir.is_dir() {
                tracing::debug!(path = ?dir, "skipping missing site directory");
                continue;
            }
            let mut entries = std::fs::read_dir(dir)
                .map_err(|error| Error::ReadFailed {
                    path: dir.clone(),
                    error,
                })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_dir()
                        && path
                            .extension()
                            .is_some_and(|ext| ext == "dist-info")
                })
                .collect::<Vec<_>>();
            entries.sort();

            for dist_info in entries {
                match InstalledMetadata::read(&dist_info) {
                    Ok(metadata) => {
                        if seen.insert(metadata.name.as_str().to_string()) {
                            found.push(metadata);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            path = ?dist_info,
                            %err,
                            "skipping unreadable distribution"
                        );
                    }
                }
            }
        }

        let mut extras = ExtrasResolver::new(environment.as_ref(), &found);
        let distributions: Vec<Distribution> = found
            .iter()
            .map(|metadata| Distribution {
                name: metadata.name.clone(),
                version: metadata.version.clone(),
                extras: extras.installed_extras(metadata),
                origin: metadata.origin.clone(),
            })
            .collect();
        tracing::debug!(count = distributions.len(), "loaded distribution snapshot");
        Ok(Self::new(environment, distributions))
    }

    /// Load a snapshot, reusing any previously built for the same
    /// search path.
    pub fn cached(search_path: &[PathBuf]) -> Result<Arc<Self>> {
        let cell = {
            let mut cache = SNAPSHOTS.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(search_path.to_vec()).or_default())
        };
        if let Some(snapshot) = cell.get() {
            tracing::debug!(?search_path, "reusing distribution snapshot");
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = cell.get_or_try_init(|| Self::load(search_path).map(Arc::new))?;
        Ok(Arc::clone(snapshot))
    }

    pub fn environment(&self) -> Option<&MarkerEnvironment> {
        self.environment.as_ref()
    }

    /// Find a distribution by name, in any spelling.
    pub fn get(&self, name: &str) -> Option<&Distribution> {
        self.distributions.get(&normalize_name(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions.values()
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }
}

/// What is read out of a single `.dist-info` directory.
#[derive(Debug)]
struct InstalledMetadata {
    name: PackageName,
    version: Version,
    provides_extras: Vec<String>,
    requires: Vec<Requirement>,
    origin: Origin,
}

impl InstalledMetadata {
    fn read(dist_info: &Path) -> Result<Self> {
        let metadata_path = dist_info.join("METADATA");
        let metadata = std::fs::read_to_string(&metadata_path).map_err(|error| {
            Error::ReadFailed {
                path: metadata_path.clone(),
                error,
            }
        })?;
        let headers = parse_headers(&metadata);
        let name = header_values(&headers, "Name")
            .next()
            .ok_or_else(|| Error::InvalidRequirement {
                requirement: metadata_path.display().to_string(),
                reason: "missing `Name` header".to_string(),
            })?;
        let raw_version = header_values(&headers, "Version")
            .next()
            .ok_or_else(|| Error::InvalidVersion {
                version: metadata_path.display().to_string(),
                reason: "missing `Version` header".to_string(),
            })?;
        let version = raw_version
            .parse::<Version>()
            .map_err(|err| Error::InvalidVersion {
                version: raw_version.to_string(),
                reason: err.to_string(),
            })?;

        let provides_extras = header_values(&headers, "Provides-Extra")
            .map(normalize_name)
            .collect();
        let requires = header_values(&headers, "Requires-Dist")
            .filter_map(|spec| match Requirement::parse(spec, false) {
                Ok(req) => Some(req),
                Err(err) => {
                    tracing::warn!(package = name, %err, "ignoring unparsable dependency");
                    None
                }
            })
            .collect();

        let origin = read_origin(&dist_info.join("direct_url.json"))?;
        Ok(Self {
            name: PackageName::new(name),
            version,
            provides_extras,
            requires,
            origin,
        })
    }
}

type ExtraKey = (String, String);

/// Decides which declared extras of each distribution are installed.
///
/// An extra is installed when every dependency gated on it is installed at
/// a satisfying version, together with the extras that dependency asks for.
/// A distribution without any `Requires-Dist` provides no extras.
struct ExtrasResolver<'a> {
    environment: Option<&'a MarkerEnvironment>,
    installed: HashMap<&'a str, &'a InstalledMetadata>,
    resolved: HashMap<ExtraKey, bool>,
    active: HashSet<ExtraKey>,
}

impl<'a> ExtrasResolver<'a> {
    fn new(environment: Option<&'a MarkerEnvironment>, found: &'a [InstalledMetadata]) -> Self {
        Self {
            environment,
            installed: found.iter().map(|m| (m.name.as_str(), m)).collect(),
            resolved: HashMap::new(),
            active: HashSet::new(),
        }
    }

    fn installed_extras(&mut self, metadata: &InstalledMetadata) -> BTreeSet<String> {
        metadata
            .provides_extras
            .iter()
            .filter(|extra| self.has_extra(metadata.name.as_str(), extra))
            .cloned()
            .collect()
    }

    fn has_extra(&mut self, name: &str, extra: &str) -> bool {
        let key = (name.to_string(), extra.to_string());
        if let Some(known) = self.resolved.get(&key) {
            return *known;
        }
        let Some(metadata) = self.installed.get(name).copied() else {
            return false;
        };
        if metadata.requires.is_empty() || !metadata.provides_extras.iter().any(|e| e == extra) {
            return false;
        }
        if !self.active.insert(key.clone()) {
            // extras that require each other in a loop
            return true;
        }
        let environment = self.environment;
        let installed = metadata
            .requires
            .iter()
            .filter(|req| req.is_gated_on(environment, extra))
            .all(|req| self.satisfies(req));
        self.active.remove(&key);
        self.resolved.insert(key, installed);
        installed
    }

    fn satisfies(&mut self, requirement: &Requirement) -> bool {
        let Some(dist) = self.installed.get(requirement.name().as_str()).copied() else {
            return false;
        };
        requirement.specifier().contains(&dist.version)
            && requirement
                .extras()
                .iter()
                .all(|extra| self.has_extra(dist.name.as_str(), extra))
    }
}

/// Parse the RFC 822 style header block of a `METADATA` file.
fn parse_headers(content: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            // the body follows the first blank line
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    headers
}

fn header_values<'a>(
    headers: &'a [(String, String)],
    key: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .iter()
        .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

#[derive(Deserialize)]
struct DirectUrl {
    url: String,
    #[serde(default)]
    dir_info: Option<DirInfo>,
    #[serde(default)]
    vcs_info: Option<VcsInfo>,
}

#[derive(Deserialize)]
struct DirInfo {
    #[serde(default)]
    editable: bool,
}

#[derive(Deserialize)]
struct VcsInfo {
    vcs: String,
    commit_id: String,
    #[serde(default)]
    requested_revision: Option<String>,
}

fn read_origin(path: &Path) -> Result<Origin> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Origin::Registry),
        Err(error) => {
            return Err(Error::ReadFailed {
                path: path.to_path_buf(),
                error,
            });
        }
    };
    let direct: DirectUrl = match serde_json::from_str(&content) {
        Ok(direct) => direct,
        Err(err) => {
            tracing::warn!(?path, %err, "ignoring invalid direct_url.json");
            return Ok(Origin::Registry);
        }
    };
    let url = match Url::parse(&direct.url) {
        Ok(url) => url,
        Err(err) => {
            tracing::warn!(?path, %err, "ignoring invalid url in direct_url.json");
            return Ok(Origin::Registry);
        }
    };
    Ok(match (direct.vcs_info, direct.dir_info) {
        (Some(vcs), _) => Origin::Vcs {
            vcs: vcs.vcs,
            url,
            commit_id: vcs.commit_id,
            requested_revision: vcs.requested_revision,
        },
        (None, Some(dir)) => Origin::Directory {
            url,
            editable: dir.editable,
        },
        (None, None) => Origin::Url { url },
    })
}

/// Find the interpreter version of a site directory from `pyvenv.cfg` or
/// from a `pythonX.Y` path component.
pub fn infer_python_version(search_path: &[PathBuf]) -> Option<String> {
    for dir in search_path {
        for ancestor in dir.ancestors() {
            let cfg = ancestor.join("pyvenv.cfg");
            let version = std::fs::read_to_string(&cfg)
                .ok()
                .and_then(|content| pyvenv_version(&content));
            if version.is_some() {
                return version;
            }
        }
        let from_component = dir.components().rev().find_map(|c| {
            let name = c.as_os_str().to_str()?;
            let version = name.strip_prefix("python")?;
            let mut parts = version.split('.');
            let valid = parts.next().is_some_and(is_number)
                && parts.next().is_some_and(is_number)
                && parts.next().is_none();
            valid.then(|| version.to_string())
        });
        if from_component.is_some() {
            return from_component;
        }
    }
    None
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn pyvenv_version(content: &str) -> Option<String> {
    let mut fallback = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "version" => return Some(value.to_string()),
            "version_info" => {
                // eg: 3.11.4.final.0
                let version: Vec<&str> = value.split('.').take_while(|p| is_number(p)).collect();
                if !version.is_empty() {
                    fallback = Some(version.join("."));
                }
            }
            _ => {}
        }
    }
    fallback
}
