// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `envsync show` command.

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use envsync::{EnvConfig, Environment, MatrixValues};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use crate::{MatrixFlags, ProjectFlags};

/// Display the resolved environments
#[derive(Debug, Args)]
pub struct CmdShow {
    #[clap(flatten)]
    project: ProjectFlags,

    #[clap(flatten)]
    matrix: MatrixFlags,

    /// Output format: table, yaml, json
    #[clap(long, default_value = "table")]
    format: String,
}

/// One environment instance as shown by yaml and json output.
#[derive(Debug, Serialize)]
struct ShownEnvironment<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "MatrixValues::is_empty")]
    matrix: &'a MatrixValues,
    lockfile: PathBuf,
    #[serde(flatten)]
    config: &'a EnvConfig,
}

impl CmdShow {
    pub async fn run(&mut self) -> Result<i32> {
        let project = self.project.load()?;
        let environments = self.matrix.select(project.environments())?;

        let shown = environments
            .iter()
            .map(|env| {
                Ok::<_, miette::Report>(ShownEnvironment {
                    name: env.name(),
                    matrix: env.matrix(),
                    lockfile: env.lock_path()?,
                    config: env.config(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        match self.format.as_str() {
            "yaml" => {
                let yaml = serde_yaml::to_string(&shown).into_diagnostic()?;
                print!("{yaml}");
            }
            "json" => {
                let json = serde_json::to_string_pretty(&shown).into_diagnostic()?;
                println!("{json}");
            }
            "table" => self.show_table(&environments)?,
            other => {
                return Err(miette::miette!(
                    "Unknown output format '{other}', expected one of: table, yaml, json"
                ));
            }
        }

        Ok(0)
    }

    fn show_table(&self, environments: &[Environment]) -> Result<()> {
        println!("{}", "Environments:".bold());
        println!();

        for (i, env) in environments.iter().enumerate() {
            let config = env.config();
            let python = env
                .python()
                .map(|p| format!(" [python {p}]"))
                .unwrap_or_default();
            println!(
                "  {}. {} ({}){}",
                i + 1,
                env.name().cyan(),
                config.env_type,
                python.yellow()
            );

            if let Some(desc) = &config.description {
                println!("     {}", desc.dimmed());
            }
            for dependency in &config.dependencies {
                println!("     - {}", dependency.green());
            }
            let scripts: Vec<&str> = config.scripts.names().collect();
            if !scripts.is_empty() {
                println!("     scripts: {}", scripts.join(", ").blue());
            }
        }

        println!();
        println!("Total: {} environment(s)", environments.len());

        Ok(())
    }
}
