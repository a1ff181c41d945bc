// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;
use tempfile::TempDir;

use super::*;
use crate::environment::Project;
use crate::spec::ProjectConfig;

fn environments(yaml: &str, root: &Path) -> Vec<Environment> {
    let config = ProjectConfig::from_yaml(yaml).expect("Should parse project config");
    Project::new(config, root).environments()
}

fn group(root: &Path, dependencies: &[&str], python: Option<&str>) -> LockGroup {
    LockGroup {
        output: root.join("requirements.txt"),
        environments: vec!["default".to_string()],
        python: python.map(str::to_string),
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
    }
}

fn resolver(root: &Path, argv: &[&str]) -> Resolver {
    let config = LockConfig {
        resolver: argv.iter().map(|a| a.to_string()).collect(),
        python_flag: None,
        timeout: None,
        jobs: None,
    };
    Resolver::new(root, &config)
}

#[rstest]
fn test_plan_merges_shared_outputs() {
    let yaml = r#"
api: envsync/v0
envs:
  default:
    dependencies: [requests]
  a:
    lock-filename: shared.txt
    dependencies: [numpy, requests]
  b:
    lock-filename: shared.txt
    dependencies: [pandas, numpy]
  c: {}
"#;
    let envs = environments(yaml, Path::new("/work"));
    let groups = plan_locks(&envs).expect("Should plan lock groups");

    let outputs: Vec<_> = groups.iter().map(|g| g.output().to_path_buf()).collect();
    assert_eq!(
        outputs,
        vec![
            PathBuf::from("/work/requirements.txt"),
            PathBuf::from("/work/shared.txt"),
            PathBuf::from("/work/requirements/requirements-c.txt"),
        ]
    );
    assert_eq!(groups[1].environments(), ["a", "b"]);
    assert_eq!(groups[1].dependencies(), ["numpy", "requests", "pandas"]);
    assert_eq!(groups[1].input(), "numpy\nrequests\npandas\n");
}

#[rstest]
fn test_plan_rejects_mixed_python_versions() {
    let yaml = r#"
api: envsync/v0
envs:
  test:
    lock-filename: requirements/test.txt
    matrix:
      - python: ["3.10", "3.11"]
"#;
    let envs = environments(yaml, Path::new("/work"));
    match plan_locks(&envs) {
        Err(Error::IncompatiblePythonVersions {
            output,
            environments,
            versions,
        }) => {
            assert_eq!(output, PathBuf::from("/work/requirements/test.txt"));
            assert_eq!(environments, vec!["test.py3.10", "test.py3.11"]);
            assert_eq!(versions, vec!["3.10", "3.11"]);
        }
        other => panic!("expected incompatible python versions, got {other:?}"),
    }
}

#[rstest]
fn test_plan_allows_unset_python() {
    let yaml = r#"
api: envsync/v0
envs:
  a:
    python: "3.12"
    lock-filename: shared.txt
  b:
    lock-filename: shared.txt
"#;
    let envs = environments(yaml, Path::new("/work"));
    let groups = plan_locks(&envs).expect("Should plan lock groups");
    assert_eq!(groups[1].python(), Some("3.12"));
}

#[rstest]
fn test_digest_tracks_input() {
    let root = Path::new("/work");
    let base = group(root, &["requests"], Some("3.11"));
    assert_eq!(base.digest(), group(root, &["requests"], Some("3.11")).digest());
    assert_ne!(base.digest(), group(root, &["requests", "numpy"], Some("3.11")).digest());
    assert_ne!(base.digest(), group(root, &["requests"], Some("3.12")).digest());
    assert_eq!(base.digest().len(), 64);
}

#[rstest]
fn test_lock_is_current() {
    let tmp = TempDir::new().unwrap();
    let locked = group(tmp.path(), &["requests"], None);
    assert!(!lock_is_current(&locked).unwrap());

    std::fs::write(locked.output(), format!("{}requests==2.31.0\n", locked.header())).unwrap();
    assert!(lock_is_current(&locked).unwrap());

    let changed = group(tmp.path(), &["requests", "numpy"], None);
    assert!(!lock_is_current(&changed).unwrap());
}

#[rstest]
#[case("requests==2.31.0\n", true)]
#[case("requests==2.31.0 \\\n    --hash=sha256:abc \\\n    --hash=sha256:def\n    # via app\n", true)]
#[case("--index-url https://pypi.org/simple\n\nidna===3.4\n", true)]
#[case("-e file:///src/pkg\n", true)]
#[case("pkg @ https://example.com/pkg-1.0.tar.gz\n", true)]
#[case("pywin32==306 ; sys_platform == \"win32\"\n", true)]
#[case("requests>=2\n", false)]
#[case("requests==2.*\n", false)]
#[case("requests\n", false)]
#[case("not a requirement!\n", false)]
fn test_validate_lock_output(#[case] content: &str, #[case] valid: bool) {
    let result = validate_lock_output(Path::new("requirements.txt"), content);
    assert_eq!(result.is_ok(), valid, "{result:?}");
}

#[rstest]
fn test_command_line() {
    let root = Path::new("/work");
    let config = LockConfig::default();
    let resolver = Resolver::new(root, &config);
    let argv = resolver
        .command_line(
            &group(root, &[], Some("3.11")),
            Path::new("/tmp/in.txt"),
            Path::new("/tmp/out.txt"),
        )
        .expect("Should format the resolver command");
    assert_eq!(
        argv,
        vec![
            "uv",
            "pip",
            "compile",
            "--generate-hashes",
            "--quiet",
            "--output-file",
            "/tmp/out.txt",
            "/tmp/in.txt",
            "--python-version",
            "3.11",
        ]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_resolve_writes_lockfile() {
    let tmp = TempDir::new().unwrap();
    let group = LockGroup {
        output: tmp.path().join("locks").join("requirements.txt"),
        ..group(tmp.path(), &["requests==2.31.0", "idna==3.4"], None)
    };
    resolver(tmp.path(), &["cp", "{input}", "{output}"])
        .resolve(&group)
        .await
        .expect("Should resolve lock group");

    let content = std::fs::read_to_string(group.output()).unwrap();
    assert!(content.ends_with("requests==2.31.0\nidna==3.4\n"));
    assert!(lock_is_current(&group).unwrap());

    let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("locks"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .collect();
    assert_eq!(leftovers.len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unpinned_output_keeps_previous_lockfile() {
    let tmp = TempDir::new().unwrap();
    let group = group(tmp.path(), &["requests>=2"], None);
    std::fs::write(group.output(), "previous\n").unwrap();

    let result = resolver(tmp.path(), &["cp", "{input}", "{output}"])
        .resolve(&group)
        .await;
    assert!(matches!(result, Err(Error::InvalidLockOutput { .. })));
    assert_eq!(std::fs::read_to_string(group.output()).unwrap(), "previous\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_resolver_failure_keeps_exit_code() {
    let tmp = TempDir::new().unwrap();
    let result = resolver(tmp.path(), &["sh", "-c", "exit 3"])
        .resolve(&group(tmp.path(), &["requests"], None))
        .await;
    match result {
        Err(err @ Error::ResolverFailed { .. }) => assert_eq!(err.exit_code(), 3),
        other => panic!("expected resolver failure, got {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_resolver_timeout() {
    let tmp = TempDir::new().unwrap();
    let result = resolver(tmp.path(), &["sleep", "5"])
        .with_timeout(Some(Duration::from_millis(100)))
        .resolve(&group(tmp.path(), &["requests"], None))
        .await;
    assert!(matches!(result, Err(Error::ResolverTimeout { .. })));
}

#[cfg(unix)]
#[tokio::test]
async fn test_lock_all_returns_outputs_in_order() {
    let tmp = TempDir::new().unwrap();
    let groups: Vec<LockGroup> = ["a", "b", "c"]
        .iter()
        .map(|name| LockGroup {
            output: tmp.path().join(format!("{name}.txt")),
            environments: vec![name.to_string()],
            python: None,
            dependencies: vec![format!("{name}==1.0")],
        })
        .collect();
    let resolver = Arc::new(resolver(tmp.path(), &["cp", "{input}", "{output}"]));

    let written = lock_all(groups, resolver, 2).await.expect("Should lock all groups");
    assert_eq!(
        written,
        vec![
            tmp.path().join("a.txt"),
            tmp.path().join("b.txt"),
            tmp.path().join("c.txt"),
        ]
    );
    assert!(
        std::fs::read_to_string(tmp.path().join("b.txt"))
            .unwrap()
            .ends_with("b==1.0\n")
    );
}
