// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Dependency requirements such as `requests[socks]>=2.31; python_version >= "3.8"`
//! or `mylib @ git+https://github.com/org/mylib@v1.0`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use itertools::Itertools;
use pep440_rs::{Operator, VersionSpecifiers};
use pep508_rs::{ExtraName, MarkerEnvironment, MarkerTree, Pep508Url, VersionOrUrl};
use serde::Serialize;
use url::Url;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./requirement_test.rs"]
mod requirement_test;

const VCS_SCHEMES: &[&str] = &["git", "hg", "svn", "bzr"];

/// Normalize a package or extra name: lowercase, with every run of
/// `-`, `_` and `.` collapsed into a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            in_separator = true;
            continue;
        }
        if in_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        in_separator = false;
        normalized.push(c.to_ascii_lowercase());
    }
    normalized
}

/// A package name that compares by its normalized form.
#[derive(Debug, Clone)]
pub struct PackageName {
    original: String,
    normalized: String,
}

impl PackageName {
    pub fn new(name: impl Into<String>) -> Self {
        let original = name.into();
        let normalized = normalize_name(&original);
        Self {
            original,
            normalized,
        }
    }

    /// The normalized identity of this name.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// The name as it was written.
    pub fn original(&self) -> &str {
        &self.original
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for PackageName {}

impl std::hash::Hash for PackageName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

impl std::borrow::Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.normalized
    }
}

/// A version control reference, `git+https://host/repo@revision#fragment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsReference {
    pub vcs: String,
    /// The repository url without the revision or fragment.
    pub url: Url,
    pub revision: Option<String>,
    /// Installer hints such as `egg=name` or `subdirectory=path`.
    pub fragment: Option<String>,
}

impl std::fmt::Display for VcsReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut url = self.url.clone();
        if let Some(revision) = &self.revision {
            let path = format!("{}@{revision}", url.path());
            url.set_path(&path);
        }
        url.set_fragment(self.fragment.as_deref());
        write!(f, "{}+{url}", self.vcs)
    }
}

/// Where a directly referenced requirement comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectReference {
    /// An archive or local path; local paths are `file:` urls.
    Url(Url),
    Vcs(VcsReference),
}

impl DirectReference {
    fn parse(locator: &str, base: Option<&Path>) -> std::result::Result<Self, String> {
        if locator.contains(['{', '}']) {
            return Err(format!("invalid URL `{locator}`: unresolved context field"));
        }
        if looks_like_path(locator) {
            let path = Path::new(locator);
            let path = match (path.is_absolute(), base) {
                (true, _) => path.to_path_buf(),
                (false, Some(base)) => base.join(path),
                (false, None) => {
                    return Err(format!(
                        "relative path `{locator}` must be given as a file: URL"
                    ));
                }
            };
            return Url::from_file_path(&path)
                .map(Self::Url)
                .map_err(|()| format!("invalid path `{locator}`"));
        }

        let vcs_transport = locator
            .split_once('+')
            .filter(|(vcs, _)| VCS_SCHEMES.contains(vcs));
        if let Some((vcs, transport)) = vcs_transport {
            let mut url = Url::parse(transport)
                .map_err(|err| format!("invalid URL `{locator}`: {err}"))?;
            let fragment = url.fragment().map(str::to_string);
            url.set_fragment(None);
            let path = url.path().to_string();
            let last_segment_start = path.rfind('/').map_or(0, |i| i + 1);
            let revision = match path[last_segment_start..].rfind('@') {
                Some(at) => {
                    let at = last_segment_start + at;
                    url.set_path(&path[..at]);
                    Some(path[at + 1..].to_string())
                }
                None => None,
            };
            return Ok(Self::Vcs(VcsReference {
                vcs: vcs.to_string(),
                url,
                revision: revision.filter(|r| !r.is_empty()),
                fragment,
            }));
        }

        Url::parse(locator)
            .map(Self::Url)
            .map_err(|err| format!("invalid URL `{locator}`: {err}"))
    }
}

/// A locator that could not be turned into a [`DirectReference`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidLocator(String);

impl Pep508Url for DirectReference {
    type Err = InvalidLocator;

    fn parse_url(url: &str, working_dir: Option<&Path>) -> std::result::Result<Self, Self::Err> {
        Self::parse(url, working_dir).map_err(InvalidLocator)
    }
}

impl std::fmt::Display for DirectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url.as_str()),
            Self::Vcs(vcs) => vcs.fmt(f),
        }
    }
}

fn looks_like_path(locator: &str) -> bool {
    let bytes = locator.as_bytes();
    locator.starts_with(['/', '.', '\\'])
        || (bytes.len() > 2
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && matches!(bytes[2], b'\\' | b'/'))
}

/// A parsed dependency specifier.
///
/// The grammar itself is handled by [`pep508_rs`]; this type adds the
/// editable flag, keeps the name as it was written and resolves relative
/// path sources against a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    name: PackageName,
    extras: BTreeSet<String>,
    specifier: VersionSpecifiers,
    marker: MarkerTree,
    source: Option<DirectReference>,
    editable: bool,
}

impl Requirement {
    /// Parse a requirement; `editable` requires a local directory source.
    pub fn parse(spec: &str, editable: bool) -> Result<Self> {
        Self::parse_inner(spec, editable, None)
    }

    /// Like [`Requirement::parse`], resolving relative path sources
    /// against `base`.
    pub fn parse_relative_to(spec: &str, editable: bool, base: &Path) -> Result<Self> {
        Self::parse_inner(spec, editable, Some(base))
    }

    fn parse_inner(spec: &str, editable: bool, base: Option<&Path>) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidRequirement {
            requirement: spec.to_string(),
            reason,
        };
        let parsed = match base {
            Some(base) => pep508_rs::Requirement::<DirectReference>::parse(spec, base),
            None => pep508_rs::Requirement::<DirectReference>::from_str(spec),
        }
        .map_err(|err| invalid(err.message.to_string()))?;

        let (specifier, source) = match parsed.version_or_url {
            Some(VersionOrUrl::VersionSpecifier(specifier)) => (specifier, None),
            Some(VersionOrUrl::Url(source)) => (std::iter::empty().collect(), Some(source)),
            None => (std::iter::empty().collect(), None),
        };
        let requirement = Self {
            name: PackageName::new(written_name(spec)),
            extras: parsed.extras.iter().map(ToString::to_string).collect(),
            specifier,
            marker: parsed.marker,
            source,
            editable,
        };
        if editable && requirement.path().is_none() {
            return Err(invalid(
                "editable requirements must point to a local directory".to_string(),
            ));
        }
        Ok(requirement)
    }

    pub fn name(&self) -> &PackageName {
        &self.name
    }

    /// Normalized extra names.
    pub fn extras(&self) -> &BTreeSet<String> {
        &self.extras
    }

    pub fn specifier(&self) -> &VersionSpecifiers {
        &self.specifier
    }

    pub fn marker(&self) -> Option<&MarkerTree> {
        (!self.marker.is_true()).then_some(&self.marker)
    }

    pub fn source(&self) -> Option<&DirectReference> {
        self.source.as_ref()
    }

    pub fn url(&self) -> Option<&Url> {
        match &self.source {
            Some(DirectReference::Url(url)) => Some(url),
            Some(DirectReference::Vcs(vcs)) => Some(&vcs.url),
            None => None,
        }
    }

    pub fn editable(&self) -> bool {
        self.editable
    }

    /// The local path of a `file:` source, percent-decoded.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.source {
            Some(DirectReference::Url(url)) if url.scheme() == "file" => url.to_file_path().ok(),
            _ => None,
        }
    }

    /// True if the specifier selects exactly one version with `==` or `===`.
    pub fn is_pinned(&self) -> bool {
        self.specifier
            .iter()
            .any(|s| matches!(s.operator(), Operator::Equal | Operator::ExactEqual))
    }

    /// Whether this requirement applies to `env` at all.
    ///
    /// Without an environment only `extra` markers are evaluated.
    pub fn applies_to(&self, env: Option<&MarkerEnvironment>) -> bool {
        self.marker.evaluate_optional_environment(env, &[])
    }

    /// Whether this requirement only applies when `extra` is requested.
    pub fn is_gated_on(&self, env: Option<&MarkerEnvironment>, extra: &str) -> bool {
        let Ok(extra) = extra.parse::<ExtraName>() else {
            return false;
        };
        self.marker
            .evaluate_optional_environment(env, std::slice::from_ref(&extra))
            && !self.marker.evaluate_optional_environment(env, &[])
    }
}

impl FromStr for Requirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, false)
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name.original())?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.iter().join(","))?;
        }
        match &self.source {
            Some(source) => write!(f, " @ {source}")?,
            None => write!(f, "{}", self.specifier.iter().join(","))?,
        }
        if let Some(marker) = self.marker.contents() {
            // a space keeps the `;` from being read as part of a url
            let sep = if self.source.is_some() { " ; " } else { "; " };
            write!(f, "{sep}{marker}")?;
        }
        Ok(())
    }
}

impl Serialize for Requirement {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// The package name exactly as it appears at the start of `spec`.
fn written_name(spec: &str) -> &str {
    let spec = spec.trim_start();
    let end = spec
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(spec.len());
    &spec[..end]
}
