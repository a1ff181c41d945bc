// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

#[fixture]
fn tmpdir() -> TempDir {
    tempfile::Builder::new()
        .prefix("envsync-test-")
        .tempdir()
        .expect("create a temp directory for test files")
}

fn write_dist(site: &Path, dir_name: &str, metadata: &str, direct_url: Option<&str>) {
    let dist_info = site.join(format!("{dir_name}.dist-info"));
    std::fs::create_dir_all(&dist_info).unwrap();
    std::fs::write(dist_info.join("METADATA"), metadata).unwrap();
    if let Some(direct_url) = direct_url {
        std::fs::write(dist_info.join("direct_url.json"), direct_url).unwrap();
    }
}

fn site(tmpdir: &TempDir) -> PathBuf {
    let site = tmpdir.path().join("lib").join("python3.11").join("site-packages");
    std::fs::create_dir_all(&site).unwrap();
    site
}

#[rstest]
fn test_load_reads_metadata(tmpdir: TempDir) {
    let site = site(&tmpdir);
    write_dist(
        &site,
        "Requests-2.25.1",
        "Metadata-Version: 2.1\nName: Requests\nVersion: 2.25.1\n\nName: not-a-header\n",
        None,
    );
    let snapshot = DistributionSnapshot::load(&[site]).unwrap();
    assert_eq!(snapshot.len(), 1);
    let dist = snapshot.get("requests").unwrap();
    assert_eq!(dist.name.original(), "Requests");
    assert_eq!(dist.version.to_string(), "2.25.1");
    assert_eq!(dist.origin, Origin::Registry);
    assert!(snapshot.environment().is_some());
}

#[rstest]
fn test_installed_extras_require_their_dependencies(tmpdir: TempDir) {
    let site = site(&tmpdir);
    write_dist(
        &site,
        "requests-2.25.1",
        "Name: requests\n\
         Version: 2.25.1\n\
         Provides-Extra: security\n\
         Provides-Extra: socks\n\
         Requires-Dist: idna>=2.5\n\
         Requires-Dist: pyOpenSSL>=0.14; extra == \"security\"\n\
         Requires-Dist: PySocks>=1.5.6; extra == \"socks\"\n",
        None,
    );
    write_dist(&site, "idna-3.4", "Name: idna\nVersion: 3.4\n", None);
    write_dist(&site, "pyOpenSSL-23.0.0", "Name: pyOpenSSL\nVersion: 23.0.0\n", None);
    let snapshot = DistributionSnapshot::load(&[site]).unwrap();
    let requests = snapshot.get("requests").unwrap();
    let extras: Vec<_> = requests.extras.iter().map(String::as_str).collect();
    assert_eq!(extras, vec!["security"]);
}

fn extras_of<'a>(snapshot: &'a DistributionSnapshot, name: &str) -> Vec<&'a str> {
    let dist = snapshot.get(name).expect("Should find the distribution");
    dist.extras.iter().map(String::as_str).collect()
}

#[rstest]
#[case(false, &[], &[])]
#[case(true, &["x"], &["y"])]
fn test_extras_need_the_extras_they_request(
    tmpdir: TempDir,
    #[case] with_c: bool,
    #[case] a_extras: &[&str],
    #[case] b_extras: &[&str],
) {
    let site = site(&tmpdir);
    write_dist(
        &site,
        "a-1.0",
        "Name: a\nVersion: 1.0\nProvides-Extra: x\nRequires-Dist: b[y]; extra == \"x\"\n",
        None,
    );
    write_dist(
        &site,
        "b-1.0",
        "Name: b\nVersion: 1.0\nProvides-Extra: y\nRequires-Dist: c; extra == \"y\"\n",
        None,
    );
    if with_c {
        write_dist(&site, "c-1.0", "Name: c\nVersion: 1.0\n", None);
    }
    let snapshot = DistributionSnapshot::load(&[site]).unwrap();
    assert_eq!(extras_of(&snapshot, "a"), a_extras);
    assert_eq!(extras_of(&snapshot, "b"), b_extras);

    let requirements = vec!["a[x]".parse::<Requirement>().unwrap()];
    assert_eq!(crate::sync::in_sync(&requirements, &snapshot), with_c);
}

#[rstest]
fn test_extras_without_dependencies_are_not_installed(tmpdir: TempDir) {
    let site = site(&tmpdir);
    write_dist(
        &site,
        "pkg-1.0",
        "Name: pkg\nVersion: 1.0\nProvides-Extra: empty\n",
        None,
    );
    let snapshot = DistributionSnapshot::load(&[site]).unwrap();
    assert!(extras_of(&snapshot, "pkg").is_empty());
}

#[rstest]
fn test_extras_requiring_each_other(tmpdir: TempDir) {
    let site = site(&tmpdir);
    write_dist(
        &site,
        "a-1.0",
        "Name: a\nVersion: 1.0\nProvides-Extra: x\nRequires-Dist: b[y]; extra == \"x\"\n",
        None,
    );
    write_dist(
        &site,
        "b-1.0",
        "Name: b\nVersion: 1.0\nProvides-Extra: y\nRequires-Dist: a[x]; extra == \"y\"\n",
        None,
    );
    let snapshot = DistributionSnapshot::load(&[site]).unwrap();
    assert_eq!(extras_of(&snapshot, "a"), vec!["x"]);
    assert_eq!(extras_of(&snapshot, "b"), vec!["y"]);
}

#[rstest]
fn test_first_occurrence_wins(tmpdir: TempDir) {
    let first = tmpdir.path().join("first");
    let second = tmpdir.path().join("second");
    write_dist(&first, "pkg-1.0", "Name: pkg\nVersion: 1.0\n", None);
    write_dist(&second, "pkg-2.0", "Name: pkg\nVersion: 2.0\n", None);
    let snapshot = DistributionSnapshot::load(&[first, second]).unwrap();
    assert_eq!(snapshot.get("pkg").unwrap().version.to_string(), "1.0");
}

#[rstest]
fn test_unreadable_distributions_are_skipped(tmpdir: TempDir) {
    let site = site(&tmpdir);
    write_dist(&site, "broken-1.0", "Summary: no name here\n", None);
    write_dist(&site, "ok-1.0", "Name: ok\nVersion: 1.0\n", None);
    let snapshot = DistributionSnapshot::load(&[site, tmpdir.path().join("missing")]).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.get("ok").is_some());
}

#[rstest]
fn test_direct_url_origins(tmpdir: TempDir) {
    let site = site(&tmpdir);
    write_dist(
        &site,
        "editable-0.1",
        "Name: editable\nVersion: 0.1\n",
        Some(r#"{"url": "file:///src/editable", "dir_info": {"editable": true}}"#),
    );
    write_dist(
        &site,
        "vcs-1.0",
        "Name: vcs\nVersion: 1.0\n",
        Some(
            r#"{"url": "https://github.com/org/vcs", "vcs_info": {"vcs": "git", "commit_id": "abc123", "requested_revision": "v1.0"}}"#,
        ),
    );
    write_dist(
        &site,
        "archive-1.0",
        "Name: archive\nVersion: 1.0\n",
        Some(r#"{"url": "https://example.com/archive-1.0.tar.gz", "archive_info": {}}"#),
    );
    let snapshot = DistributionSnapshot::load(&[site]).unwrap();

    assert!(snapshot.get("editable").unwrap().origin.is_editable());
    match &snapshot.get("vcs").unwrap().origin {
        Origin::Vcs {
            vcs,
            commit_id,
            requested_revision,
            ..
        } => {
            assert_eq!(vcs, "git");
            assert_eq!(commit_id, "abc123");
            assert_eq!(requested_revision.as_deref(), Some("v1.0"));
        }
        other => panic!("unexpected origin {other:?}"),
    }
    assert!(matches!(
        snapshot.get("archive").unwrap().origin,
        Origin::Url { .. }
    ));
}

#[rstest]
fn test_infer_python_version_from_pyvenv(tmpdir: TempDir) {
    let site = tmpdir.path().join("Lib").join("site-packages");
    std::fs::create_dir_all(&site).unwrap();
    std::fs::write(
        tmpdir.path().join("pyvenv.cfg"),
        "home = /usr/bin\nversion_info = 3.12.1.final.0\n",
    )
    .unwrap();
    assert_eq!(infer_python_version(&[site]).as_deref(), Some("3.12.1"));
}

#[rstest]
fn test_infer_python_version_from_path() {
    let site = PathBuf::from("/opt/venv/lib/python3.10/site-packages");
    assert_eq!(infer_python_version(&[site]).as_deref(), Some("3.10"));
    assert_eq!(infer_python_version(&[PathBuf::from("/opt/site")]), None);
}

#[rstest]
fn test_cached_snapshot_is_built_once(tmpdir: TempDir) {
    let site = site(&tmpdir);
    write_dist(&site, "pkg-1.0", "Name: pkg\nVersion: 1.0\n", None);
    let search_path = vec![site.clone()];
    let first = DistributionSnapshot::cached(&search_path).unwrap();

    // later installs are not visible through the cache
    write_dist(&site, "other-1.0", "Name: other\nVersion: 1.0\n", None);
    let second = DistributionSnapshot::cached(&search_path).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.get("other").is_none());
}

#[rstest]
fn test_parse_headers_continuation() {
    let headers = parse_headers("Name: pkg\nSummary: first\n  second\n\nbody: ignored");
    assert_eq!(
        headers,
        vec![
            ("Name".to_string(), "pkg".to_string()),
            ("Summary".to_string(), "first second".to_string()),
        ]
    );
}
