// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Verify that installed environments satisfy their dependencies.

use clap::Args;
use colored::Colorize;
use miette::Result;

use crate::{MatrixFlags, ProjectFlags};

/// Verify installed environments satisfy their dependencies
#[derive(Debug, Args)]
pub struct CmdCheck {
    #[clap(flatten)]
    project: ProjectFlags,

    #[clap(flatten)]
    matrix: MatrixFlags,

    /// Environments to check, all of them by default
    #[clap(short = 'e', long = "env")]
    envs: Vec<String>,
}

impl CmdCheck {
    pub async fn run(&mut self) -> Result<i32> {
        let project = self.project.load()?;
        let environments = if self.envs.is_empty() {
            project.environments()
        } else {
            self.envs
                .iter()
                .map(|name| project.environment(name))
                .collect::<envsync::Result<Vec<_>>>()?
        };
        let environments = self.matrix.select(environments)?;

        let mut stale = 0;
        for env in &environments {
            if env.dependencies_in_sync()? {
                println!("{} {}", "✓".green(), env.name());
            } else {
                println!("{} {} is out of sync", "✗".red(), env.name());
                stale += 1;
            }
        }

        if stale > 0 {
            eprintln!("\n{stale} environment(s) need to be synced");
            return Ok(1);
        }
        Ok(0)
    }
}
