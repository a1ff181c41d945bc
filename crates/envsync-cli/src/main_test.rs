// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use clap::CommandFactory;
use rstest::rstest;

use super::*;

const PROJECT: &str = r#"
api: envsync/v0
envs:
  test:
    matrix:
      - python: ["3.10", "3.11"]
        db: [postgres, sqlite]
  lint: {}
"#;

fn project() -> Project {
    let config = envsync::ProjectConfig::from_yaml(PROJECT).expect("Should parse project");
    Project::new(config, "/work")
}

fn flags(include: &[&str], exclude: &[&str]) -> MatrixFlags {
    MatrixFlags {
        include: include.iter().map(|s| s.to_string()).collect(),
        exclude: exclude.iter().map(|s| s.to_string()).collect(),
    }
}

fn names(environments: &[Environment]) -> Vec<&str> {
    environments.iter().map(Environment::name).collect()
}

#[rstest]
fn test_cli_definition() {
    Opt::command().debug_assert();
}

#[rstest]
fn test_no_filter_keeps_everything() {
    let selected = flags(&[], &[]).select(project().environments()).unwrap();
    assert_eq!(
        names(&selected),
        vec![
            "default",
            "test.py3.10-postgres",
            "test.py3.10-sqlite",
            "test.py3.11-postgres",
            "test.py3.11-sqlite",
            "lint",
        ]
    );
}

#[rstest]
#[case(&["py=3.11"], &[], &["test.py3.11-postgres", "test.py3.11-sqlite"])]
#[case(&["python=3.10"], &["db=sqlite"], &["test.py3.10-postgres"])]
#[case(&[], &["db"], &[])]
fn test_matrix_selection(
    #[case] include: &[&str],
    #[case] exclude: &[&str],
    #[case] expected: &[&str],
) {
    let selected = flags(include, exclude).select(project().environments()).unwrap();
    assert_eq!(names(&selected), expected);
}

#[rstest]
fn test_duplicate_selection_is_an_error() {
    let result = flags(&["py=3.10", "python=3.11"], &[]).select(project().environments());
    assert!(result.is_err());
}

#[rstest]
#[case(&["envsync", "show"], 0)]
#[case(&["envsync", "-vv", "show"], 2)]
#[case(&["envsync", "show", "-q"], -1)]
fn test_verbosity(#[case] args: &[&str], #[case] expected: i32) {
    let opt = Opt::try_parse_from(args).expect("Should parse arguments");
    assert_eq!(opt.logging.verbosity(), expected);
}
