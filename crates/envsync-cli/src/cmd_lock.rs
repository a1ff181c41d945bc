// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Generate or verify the lockfiles of envsync environments.

use std::sync::Arc;

use clap::Args;
use miette::Result;

use crate::{MatrixFlags, ProjectFlags};

/// Generate or verify lockfiles
#[derive(Debug, Args)]
pub struct CmdLock {
    #[clap(flatten)]
    project: ProjectFlags,

    #[clap(flatten)]
    matrix: MatrixFlags,

    /// Verify lockfiles are current (exit 1 if not)
    #[clap(long)]
    check: bool,

    /// Regenerate lockfiles even if they are current
    #[clap(long)]
    force: bool,

    /// Maximum number of resolvers to run at once
    #[clap(short, long)]
    jobs: Option<usize>,
}

impl CmdLock {
    pub async fn run(&mut self) -> Result<i32> {
        let project = self.project.load()?;
        let environments = self.matrix.select(project.environments())?;
        let groups = envsync::plan_locks(&environments)?;

        let mut stale = Vec::new();
        for group in groups {
            if !self.force && envsync::lock_is_current(&group)? {
                tracing::debug!(output = ?group.output(), "lockfile is current");
                continue;
            }
            stale.push(group);
        }

        if self.check {
            if stale.is_empty() {
                println!("Lockfiles are up to date");
                return Ok(0);
            }
            eprintln!("Lockfiles are out of date:");
            for group in &stale {
                eprintln!(
                    "  - {} ({})",
                    group.output().display(),
                    group.environments().join(", ")
                );
            }
            return Ok(1);
        }

        if stale.is_empty() {
            println!("Lockfiles are up to date");
            return Ok(0);
        }

        let lock = &project.config().lock;
        let jobs = self.jobs.unwrap_or_else(|| lock.jobs());
        let resolver = Arc::new(envsync::Resolver::new(project.root(), lock));
        for output in envsync::lock_all(stale, resolver, jobs).await? {
            println!("Generated lockfile: {}", output.display());
        }

        Ok(0)
    }
}
