// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::*;
use crate::snapshot::marker_environment;

fn req(s: &str) -> Requirement {
    s.parse().unwrap()
}

fn snapshot(distributions: Vec<Distribution>) -> DistributionSnapshot {
    let environment = marker_environment("3.11.4").unwrap();
    DistributionSnapshot::new(Some(environment), distributions)
}

fn dist(name: &str, version: &str) -> Distribution {
    Distribution::new(name, version.parse().unwrap())
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[rstest]
fn test_false_marker_is_vacuously_satisfied() {
    let empty = snapshot(vec![]);
    assert!(in_sync(&[req(r#"pkg; python_version < "1""#)], &empty));
    assert!(!in_sync(&[req("pkg")], &empty));
}

#[rstest]
fn test_unknown_interpreter_only_checks_extras() {
    let empty = DistributionSnapshot::new(None, vec![]);
    assert!(!in_sync(&[req(r#"pkg; python_version < "1""#)], &empty));
    assert!(in_sync(&[req(r#"pkg; extra == "test""#)], &empty));
}

#[rstest]
fn test_extras_must_have_been_installed() {
    let installed = snapshot(vec![dist("pkg", "2.25.1").with_extras(["security"])]);
    assert!(in_sync(&[req("pkg[security]==2.25.1")], &installed));
    assert!(!in_sync(&[req("pkg[other_extra]")], &installed));
}

#[rstest]
#[case("Pkg_Name>=1.0", true)]
#[case("pkg-name<1.0", false)]
#[case("pkg.name==1.2.*", true)]
#[case("missing", false)]
fn test_versions_and_names(#[case] requirement: &str, #[case] expected: bool) {
    let installed = snapshot(vec![dist("pkg-name", "1.2.3")]);
    assert_eq!(in_sync(&[req(requirement)], &installed), expected);
}

#[rstest]
fn test_out_of_sync_names_first_failure() {
    let installed = snapshot(vec![dist("a", "1.0")]);
    let requirements = vec![req("a"), req("b"), req("c")];
    assert_eq!(
        out_of_sync(&requirements, &installed).map(|r| r.name().as_str()),
        Some("b")
    );
}

fn vcs_snapshot() -> DistributionSnapshot {
    snapshot(vec![dist("pkg", "1.0").with_origin(Origin::Vcs {
        vcs: "git".to_string(),
        url: url("https://github.com/org/pkg"),
        commit_id: "abc123".to_string(),
        requested_revision: Some("v1.0".to_string()),
    })])
}

#[rstest]
#[case("pkg @ git+https://github.com/org/pkg", true)]
#[case("pkg @ git+https://github.com/org/pkg@v1.0", true)]
#[case("pkg @ git+https://github.com/org/pkg@abc123", true)]
#[case("pkg @ git+https://github.com/org/pkg@v1.0#egg=pkg", true)]
#[case("pkg @ git+https://github.com/org/pkg#subdirectory=src", true)]
#[case("pkg @ git+https://github.com/org/pkg@v2.0", false)]
#[case("pkg @ git+https://github.com/org/fork", false)]
#[case("pkg @ hg+https://github.com/org/pkg", false)]
#[case("pkg @ https://github.com/org/pkg", false)]
#[case("pkg", true)]
fn test_vcs_origins(#[case] requirement: &str, #[case] expected: bool) {
    assert_eq!(in_sync(&[req(requirement)], &vcs_snapshot()), expected);
}

#[cfg(unix)]
#[rstest]
fn test_editable_origins() {
    let editable = snapshot(vec![dist("pkg", "0.1").with_origin(Origin::Directory {
        url: url("file:///src/pkg"),
        editable: true,
    })]);
    let plain = snapshot(vec![dist("pkg", "0.1").with_origin(Origin::Directory {
        url: url("file:///src/pkg"),
        editable: false,
    })]);
    let editable_req = Requirement::parse("pkg @ file:///src/pkg", true).unwrap();
    let plain_req = req("pkg @ file:///src/pkg");

    assert!(in_sync(std::slice::from_ref(&editable_req), &editable));
    assert!(!in_sync(std::slice::from_ref(&plain_req), &editable));
    assert!(in_sync(std::slice::from_ref(&plain_req), &plain));
    assert!(!in_sync(std::slice::from_ref(&editable_req), &plain));
    assert!(!in_sync(&[req("pkg @ file:///src/other")], &plain));
}

#[rstest]
fn test_archive_origin() {
    let installed = snapshot(vec![dist("pkg", "1.0").with_origin(Origin::Url {
        url: url("https://example.com/pkg-1.0.tar.gz"),
    })]);
    assert!(in_sync(&[req("pkg @ https://example.com/pkg-1.0.tar.gz")], &installed));
    assert!(!in_sync(&[req("pkg @ https://example.com/pkg-2.0.tar.gz")], &installed));
    assert!(in_sync(
        &[req("pkg @ https://example.com/pkg-1.0.tar.gz#sha256=abc")],
        &installed
    ));
}
