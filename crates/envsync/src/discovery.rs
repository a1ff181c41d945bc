// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Locating the envsync.yaml file of a project.

use std::path::{Path, PathBuf};

use crate::{ENVSYNC_FILENAME, Error, ProjectConfig, Result};

#[cfg(test)]
#[path = "./discovery_test.rs"]
mod discovery_test;

/// Find the project file for `start_path`.
///
/// A path naming a file is used as-is, otherwise the directory and each of
/// its parents are searched for the first envsync.yaml.
pub fn find_project_file<P: AsRef<Path>>(start_path: P) -> Result<PathBuf> {
    let start = resolve_start_path(start_path.as_ref());
    if start.is_file() {
        return Ok(start);
    }

    let mut current = start.clone();
    loop {
        let candidate = current.join(ENVSYNC_FILENAME);
        if candidate.is_file() {
            tracing::debug!(path = ?candidate, "found project file");
            return Ok(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    Err(Error::NotFoundInTree(start))
}

/// Find and load the project file for `start_path`.
pub fn discover_project<P: AsRef<Path>>(start_path: P) -> Result<ProjectConfig> {
    let path = find_project_file(start_path)?;
    ProjectConfig::load(path)
}

/// Resolve starting path, preferring $PWD to preserve symlinks.
fn resolve_start_path(start_path: &Path) -> PathBuf {
    if start_path.is_absolute() {
        start_path.to_owned()
    } else {
        match std::env::var("PWD").ok() {
            Some(pwd) => PathBuf::from(pwd).join(start_path),
            None => std::env::current_dir()
                .unwrap_or_default()
                .join(start_path),
        }
    }
}
