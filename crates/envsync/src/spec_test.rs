// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;
use tempfile::TempDir;

use super::*;

fn violations(yaml: &str) -> Vec<String> {
    match ProjectConfig::from_yaml(yaml) {
        Err(Error::InvalidConfig { violations }) => {
            violations.iter().map(ToString::to_string).collect()
        }
        other => panic!("expected an invalid config, got {other:?}"),
    }
}

#[rstest]
fn test_parse_minimal_config() {
    let yaml = r#"
api: envsync/v0
"#;
    let config = ProjectConfig::from_yaml(yaml).expect("Should parse minimal config");
    assert_eq!(config.api, ApiVersion::V0);
    assert_eq!(config.envs.len(), 1);
    assert!(config.env(DEFAULT_ENVIRONMENT).is_some());
    assert_eq!(config.lock, LockConfig::default());
}

#[rstest]
fn test_parse_empty_document() {
    let config = ProjectConfig::from_yaml("").expect("Should parse an empty file");
    assert!(config.env("default").is_some());
}

#[rstest]
fn test_parse_full_config() {
    let yaml = r#"
api: envsync/v0
envs:
  default:
    python: "3.11"
    dependencies:
      - requests>=2
    env-vars:
      DEBUG: true
      LEVEL: 3
    scripts:
      test: pytest {args}
  lint:
    type: system
    description: Static checks
    search-path:
      - /usr/lib/python3/dist-packages
    scripts:
      check:
        - ruff check .
        - "- mypy ."
lock:
  resolver: [pip-compile, -o, "{output}", "{input}"]
  python-flag: null
  timeout: 30
  jobs: 2
"#;
    let config = ProjectConfig::from_yaml(yaml).expect("Should parse full config");
    let names: Vec<_> = config.envs.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["default", "lint"]);

    let default = config.env("default").unwrap();
    assert_eq!(default.python.as_deref(), Some("3.11"));
    assert_eq!(default.env_vars["DEBUG"], "true");
    assert_eq!(default.env_vars["LEVEL"], "3");

    let lint = config.env("lint").unwrap();
    assert_eq!(lint.env_type, EnvironmentType::System);
    assert_eq!(lint.template.as_deref(), Some("default"));
    assert_eq!(lint.description.as_deref(), Some("Static checks"));
    assert_eq!(lint.search_path, vec!["/usr/lib/python3/dist-packages"]);
    assert_eq!(lint.scripts.get("check").map(<[String]>::len), Some(2));

    assert_eq!(config.lock.resolver[0], "pip-compile");
    assert_eq!(config.lock.python_flag, None);
    assert_eq!(config.lock.timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.lock.jobs(), 2);
}

#[rstest]
fn test_template_inheritance() {
    let yaml = r#"
api: envsync/v0
envs:
  default:
    python: "3.12"
    dependencies: [requests]
    env-vars:
      A: base
      B: base
    scripts:
      test: pytest
      lint: ruff check
    path: .venv
  test:
    extra-dependencies: [pytest]
    env-vars:
      B: child
    scripts:
      test: pytest -x
  docs:
    template: test
    dependencies: [sphinx]
"#;
    let config = ProjectConfig::from_yaml(yaml).expect("Should parse inheriting config");

    let test = config.env("test").unwrap();
    assert_eq!(test.python.as_deref(), Some("3.12"));
    assert_eq!(test.dependencies, vec!["requests", "pytest"]);
    assert_eq!(test.env_vars["A"], "base");
    assert_eq!(test.env_vars["B"], "child");
    assert_eq!(test.scripts.get("test"), Some(&["pytest -x".to_string()][..]));
    assert!(test.scripts.contains("lint"));
    assert_eq!(test.path, None);

    let docs = config.env("docs").unwrap();
    assert_eq!(docs.template.as_deref(), Some("test"));
    assert_eq!(docs.dependencies, vec!["sphinx"]);
    assert_eq!(docs.env_vars["B"], "child");
}

#[rstest]
fn test_matrix_is_not_inherited() {
    let yaml = r#"
api: envsync/v0
envs:
  test:
    matrix:
      - py: ["3.10", "3.11"]
        db: [postgres]
  child:
    template: test
"#;
    let config = ProjectConfig::from_yaml(yaml).expect("Should parse matrix config");
    let test = config.env("test").unwrap();
    assert_eq!(test.matrix.len(), 1);
    let axes: Vec<_> = test.matrix[0].keys().map(String::as_str).collect();
    assert_eq!(axes, vec!["python", "db"]);
    assert!(config.env("child").unwrap().matrix.is_empty());
}

#[rstest]
fn test_self_template_opts_out() {
    let yaml = r#"
api: envsync/v0
envs:
  default:
    dependencies: [requests]
  bare:
    template: bare
"#;
    let config = ProjectConfig::from_yaml(yaml).expect("Should parse config");
    let bare = config.env("bare").unwrap();
    assert!(bare.dependencies.is_empty());
    assert_eq!(bare.template, None);
}

#[rstest]
fn test_template_cycle() {
    let yaml = r#"
api: envsync/v0
envs:
  a:
    template: b
  b:
    template: a
"#;
    assert_eq!(
        violations(yaml),
        vec!["Field `envs.b.template` forms a cycle: a -> b -> a"]
    );
}

#[rstest]
fn test_unknown_template() {
    let yaml = r#"
api: envsync/v0
envs:
  a:
    template: missing
"#;
    assert_eq!(
        violations(yaml),
        vec!["Field `envs.a.template` refers to an unknown environment `missing`"]
    );
}

#[rstest]
fn test_all_violations_are_reported() {
    let yaml = r#"
api: envsync/v0
colour: blue
envs:
  x:
    type: container
    python: 3.11
    dependencies: requests
    scripts:
      foo: 1
    matrix:
      - python: []
  y:
    dependencies:
      - ok
      - [nested]
    matrix:
      - py: ["3.10"]
        python: ["3.11"]
lock:
  timeout: 0
"#;
    assert_eq!(
        violations(yaml),
        vec![
            "Field `colour` is not a recognized field",
            "Field `envs.x.type` must be one of: virtual, system",
            "Field `envs.x.python` must be a string",
            "Field `envs.x.dependencies` must be an array",
            "Field `envs.x.scripts.foo` must be a string or an array of strings",
            "Field `envs.x.matrix.0.python` must not be empty",
            "Field `envs.x.matrix.0` must define at least one variable",
            "Field `envs.y.dependencies.1` must be a string",
            "Field `envs.y.matrix.0.python` is defined more than once",
            "Field `lock.timeout` must be a positive integer",
        ]
    );
}

#[rstest]
fn test_invalid_yaml() {
    let result = ProjectConfig::from_yaml("envs: [unclosed");
    assert!(matches!(result, Err(Error::InvalidYaml { .. })));
}

#[rstest]
fn test_unknown_api_version() {
    let result = ProjectConfig::from_yaml("api: envsync/v9\n");
    assert!(matches!(result, Err(Error::InvalidYaml { .. })));
}

#[rstest]
fn test_load_records_source() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("envsync.yaml");
    std::fs::write(&path, "api: envsync/v0\n").unwrap();

    let config = ProjectConfig::load(&path).expect("Should load config from file");
    assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
    assert_eq!(config.root(), Some(tmp.path()));
}

#[rstest]
fn test_load_missing_file() {
    let tmp = TempDir::new().unwrap();
    let result = ProjectConfig::load(tmp.path().join("envsync.yaml"));
    assert!(matches!(result, Err(Error::ReadFailed { .. })));
}

#[rstest]
fn test_serialize_resolved_env() {
    let yaml = r#"
api: envsync/v0
envs:
  test:
    type: virtual
    lock-filename: locks/test.txt
"#;
    let config = ProjectConfig::from_yaml(yaml).expect("Should parse config");
    let rendered = serde_yaml::to_string(config.env("test").unwrap()).unwrap();
    assert_eq!(
        rendered,
        "type: virtual\ntemplate: default\nlock-filename: locks/test.txt\n"
    );
}
