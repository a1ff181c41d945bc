// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! envsync - Python Environment Resolution
//!
//! This crate provides the core library for resolving the environments of a
//! project described by an `envsync.yaml` file: formatting the context
//! fields of configuration strings, expanding scripts, checking whether an
//! installed environment satisfies its dependencies, selecting matrix
//! instances and generating lockfiles through an external resolver.
//!
//! # Example
//!
//! ```yaml
//! # envsync.yaml
//! api: envsync/v0
//!
//! envs:
//!   default:
//!     python: "3.11"
//!     dependencies:
//!       - requests>=2
//!       - -e mypkg @ {root:uri}/src/mypkg
//!     scripts:
//!       test: pytest {args:tests}
//!
//!   # one environment per interpreter, eg: test.py3.11
//!   test:
//!     extra-dependencies: [pytest]
//!     matrix:
//!       - python: ["3.11", "3.12"]
//! ```

pub mod context;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod lock;
pub mod matrix;
pub mod requirement;
pub mod scripts;
pub mod snapshot;
pub mod spec;
pub mod sync;

pub use context::FormatContext;
pub use discovery::{discover_project, find_project_file};
pub use environment::{Environment, EnvironmentKind, Project};
pub use error::{ConfigViolation, Error, Result};
pub use lock::{LockGroup, Resolver, lock_all, lock_is_current, plan_locks};
pub use matrix::{MatrixFilter, MatrixValues};
pub use pep440_rs::{Version, VersionSpecifiers};
pub use pep508_rs::{MarkerEnvironment, MarkerTree};
pub use requirement::{PackageName, Requirement};
pub use scripts::{Command, ScriptTable};
pub use snapshot::{Distribution, DistributionSnapshot, Origin, marker_environment};
pub use spec::{ApiVersion, EnvConfig, EnvironmentType, LockConfig, ProjectConfig};
pub use sync::in_sync;

/// Well-known filename for project files.
pub const ENVSYNC_FILENAME: &str = "envsync.yaml";
