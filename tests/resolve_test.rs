//! Integration tests for source discovery and the env, paths and tokens passes.
//!
//! These tests verify that:
//! - unresolvable references fail with the pass that could not finish
//! - references across sources converge regardless of declaration order
//! - every resolved path stays inside the safe paths
//! - globs and getters expand deterministically

mod common;

use common::Project;
use doitoml::{DoitomlError, ErrorCategory, UnresolvedKind};
use serde_json::{Value, json};
use std::collections::BTreeMap;

fn key(prefix: &str, name: &str) -> (String, String) {
    (prefix.to_string(), name.to_string())
}

// === Discovery ===

#[test]
fn test_empty_project_has_no_config() {
    let project = Project::new();
    let err = project.load().unwrap_err();
    assert!(matches!(err, DoitomlError::NoConfig { .. }), "{err}");
    assert!(err.to_string().starts_with("No config found"), "{err}");
    assert_eq!(err.category(), ErrorCategory::Discovery);
}

#[test]
fn test_explicit_missing_config_is_an_io_error() {
    let project = Project::new();
    let err = project.load_with(project.options().config_path("nope/pyproject.toml")).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Io, "{err}");
}

#[test]
fn test_unknown_config_format_is_rejected() {
    let project = Project::new();
    project.write("doit.ini", "[doitoml]\n");
    let err = project.load_with(project.options().config_path("doit.ini")).unwrap_err();
    assert!(matches!(err, DoitomlError::UnknownConfig { .. }), "{err}");
}

#[test]
fn test_pyproject_and_package_json_are_discovered() {
    let project = Project::with_pyproject("prefix = \"py\"\ntokens = { hi = [\"echo\", \"hi\"] }\n");
    project.write(
        "package.json",
        r#"{"name": "x", "doitoml": {"prefix": "js", "tokens": {"hi": ["node", "-e", "1"]}}}"#,
    );
    let doitoml = project.load().unwrap();
    let config = doitoml.config();
    assert_eq!(config.sorted_prefixes(), vec!["js", "py"]);
    assert_eq!(config.tokens().get(&key("py", "hi")).map(Vec::len), Some(2));
    assert_eq!(config.tokens().get(&key("js", "hi")).map(Vec::len), Some(3));
}

#[test]
fn test_package_json_without_config_is_skipped() {
    let project = Project::with_pyproject("tokens = { a = [\"1\"] }\n");
    project.write("package.json", r#"{"name": "just-a-package"}"#);
    let doitoml = project.load().unwrap();
    assert_eq!(doitoml.config().sources().len(), 1);
}

#[test]
fn test_prefix_collision_names_both_sources() {
    let project = Project::with_pyproject("prefix = \"a\"\nconfig_paths = [\"js/package.json\"]\n");
    project.write("js/package.json", r#"{"doitoml": {"prefix": "a"}}"#);
    let err = project.load().unwrap_err();
    match &err {
        DoitomlError::Prefix {
            source_desc,
            prefix,
            claimed_by,
        } => {
            assert_eq!(prefix, "a");
            assert!(source_desc.contains("package.json"), "{source_desc}");
            assert!(claimed_by.contains("pyproject.toml"), "{claimed_by}");
        }
        other => unreachable!("expected a prefix error, got {other}"),
    }
}

#[test]
fn test_config_paths_may_be_wrapped_by_a_getter() {
    let project = Project::with_pyproject(
        "config_paths = [\":get::json::vendor/settings.json::nested::doitoml\"]\n",
    );
    project.write(
        "vendor/settings.json",
        r#"{"nested": {"doitoml": {"prefix": "w", "tokens": {"hi": ["echo", "hi"]}}}}"#,
    );
    let doitoml = project.load().unwrap();
    assert_eq!(
        doitoml.config().tokens().get(&key("w", "hi")),
        Some(&vec!["echo".to_string(), "hi".to_string()])
    );
}

// === Env ===

#[test]
fn test_missing_env_reference_is_an_env_resolution_error() {
    let project = Project::with_pyproject("env = { a = \"${b}\" }\n");
    let err = project.load().unwrap_err();
    assert!(
        matches!(
            err,
            DoitomlError::Unresolved {
                kind: UnresolvedKind::EnvironmentVariables,
                ..
            }
        ),
        "{err}"
    );
    assert!(err.to_string().contains("environment variables"), "{err}");
}

#[test]
fn test_env_references_resolve_in_any_order_and_first_writer_wins() {
    let project = Project::with_pyproject(
        "config_paths = [\"js/package.json\"]\nenv = { GREETING = \"${WORD}, ${WHO}\", WORD = \"hello\" }\n",
    );
    project.write(
        "js/package.json",
        r#"{"doitoml": {"prefix": "js", "env": {"WHO": "world", "WORD": "ignored"}}}"#,
    );
    let doitoml = project.load().unwrap();
    let env = doitoml.config().env();
    assert_eq!(env.get("GREETING").map(String::as_str), Some("hello, world"));
    assert_eq!(env.get("WORD").map(String::as_str), Some("hello"));
}

#[test]
fn test_process_env_is_visible_but_never_written() {
    let project = Project::with_pyproject("env = { B = \"${A}-b\" }\n");
    let options = project
        .options()
        .process_env(BTreeMap::from([("A".to_string(), "a".to_string())]));
    let doitoml = project.load_with(options).unwrap();
    assert_eq!(doitoml.get_env("B").unwrap(), "a-b");
    assert_eq!(doitoml.get_env("A").unwrap(), "a");
    assert!(matches!(doitoml.get_env("C"), Err(DoitomlError::EnvVar(_))));
}

#[test]
fn test_env_values_join_many_and_reject_none() {
    let project = Project::with_pyproject("env = { WORDS = \":get::json::package.json::keywords\" }\n");
    project.write("package.json", r#"{"keywords": ["a", "b"]}"#);
    let doitoml = project.load().unwrap();
    assert_eq!(doitoml.get_env("WORDS").unwrap(), "a b");

    project.write("package.json", r#"{"keywords": []}"#);
    let err = project.load().unwrap_err();
    assert!(matches!(err, DoitomlError::Config(_)), "{err}");
    assert!(err.to_string().contains("WORDS"), "{err}");
}

// === Paths and tokens ===

#[test]
fn test_missing_path_reference_is_a_paths_resolution_error() {
    let project = Project::with_pyproject("paths = { a = [\"::b\"] }\n");
    let err = project.load().unwrap_err();
    assert!(
        matches!(
            err,
            DoitomlError::Unresolved {
                kind: UnresolvedKind::Paths,
                ..
            }
        ),
        "{err}"
    );
}

#[test]
fn test_circular_references_report_every_member() {
    let project = Project::with_pyproject("tokens = { a = [\"::b\"], b = [\"::c\"], c = [\"::a\"] }\n");
    let err = project.load().unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Failed to resolve commands"), "{message}");
    for member in ["\":a\"", "\":b\"", "\":c\""] {
        assert!(message.contains(member), "{member} missing from {message}");
    }
}

#[test]
fn test_paths_resolve_across_sources_and_are_absolute() {
    let project = Project::with_pyproject(
        "prefix = \"py\"\nconfig_paths = [\"js/package.json\"]\n\n[tool.doitoml.paths]\nall = [\"::js::lib\", \"::src\"]\nsrc = [\"src/b.py\", \"src/a.py\", \"src/a.py\"]\n",
    );
    project.write("js/package.json", r#"{"doitoml": {"prefix": "js", "paths": {"lib": ["lib/index.js"]}}}"#);
    let doitoml = project.load().unwrap();
    let paths = doitoml.config().paths();
    assert_eq!(
        paths.get(&key("py", "src")),
        Some(&vec![project.posix("src/a.py"), project.posix("src/b.py")])
    );
    assert_eq!(
        paths.get(&key("py", "all")),
        Some(&vec![
            project.posix("js/lib/index.js"),
            project.posix("src/a.py"),
            project.posix("src/b.py"),
        ])
    );
}

#[test]
fn test_wildcard_prefixes_collect_every_match() {
    let project = Project::with_pyproject(
        "config_paths = [\"a/package.json\", \"b/package.json\"]\ntokens = { every = [\"::*::name\"] }\n",
    );
    project.write("a/package.json", r#"{"doitoml": {"prefix": "pkg-a", "tokens": {"name": ["a"]}}}"#);
    project.write("b/package.json", r#"{"doitoml": {"prefix": "pkg-b", "tokens": {"name": ["b"]}}}"#);
    let doitoml = project.load().unwrap();
    assert_eq!(
        doitoml.config().tokens().get(&key("", "every")),
        Some(&vec!["a".to_string(), "b".to_string()])
    );
}

#[test]
fn test_tokens_are_not_made_into_paths() {
    let project = Project::with_pyproject("tokens = { py = [\"python\", \"-m\", \"pytest\"] }\n");
    let doitoml = project.load().unwrap();
    assert_eq!(
        doitoml.config().tokens().get(&key("", "py")),
        Some(&vec!["python".to_string(), "-m".to_string(), "pytest".to_string()])
    );
}

// === Safe paths ===

#[test]
fn test_paths_outside_the_project_are_unsafe() {
    let project = Project::new();
    project.write("inner/pyproject.toml", "[tool.doitoml]\npaths = { out = [\"../elsewhere.txt\"] }\n");
    let err = project
        .load_with(project.options().config_path("inner/pyproject.toml"))
        .unwrap_err();
    assert!(matches!(err, DoitomlError::UnsafePath { .. }), "{err}");
    assert_eq!(err.category(), ErrorCategory::Safety);
}

#[test]
fn test_declared_safe_paths_extend_the_roots() {
    let project = Project::new();
    project.write(
        "inner/pyproject.toml",
        "[tool.doitoml]\nsafe_paths = [\"..\"]\npaths = { out = [\"../elsewhere.txt\"] }\n",
    );
    let doitoml = project
        .load_with(project.options().config_path("inner/pyproject.toml"))
        .unwrap();
    assert_eq!(
        doitoml.config().paths().get(&key("", "out")),
        Some(&vec![project.posix("elsewhere.txt")])
    );
}

#[test]
fn test_config_paths_outside_the_project_are_unsafe() {
    let project = Project::new();
    project.write("inner/pyproject.toml", "[tool.doitoml]\nconfig_paths = [\"../package.json\"]\n");
    project.write("package.json", r#"{"doitoml": {"prefix": "outer"}}"#);
    let err = project
        .load_with(project.options().config_path("inner/pyproject.toml"))
        .unwrap_err();
    assert!(matches!(err, DoitomlError::UnsafePath { .. }), "{err}");
}

// === Globs ===

fn glob_project(paths: &str) -> Project {
    let project = Project::with_pyproject(&format!("[tool.doitoml.paths]\n{}", paths));
    for file in ["src/b.py", "src/a.py", "src/test_a.py", "src/sub/c.py", "src/notes.txt"] {
        project.write(file, "");
    }
    project
}

#[test]
fn test_glob_is_sorted_and_honors_excludes() {
    let project = glob_project("py = [\":glob::src::*.py::!test_\"]\n");
    let doitoml = project.load().unwrap();
    assert_eq!(
        doitoml.config().paths().get(&key("", "py")),
        Some(&vec![project.posix("src/a.py"), project.posix("src/b.py")])
    );
}

#[test]
fn test_rglob_descends_and_dedupes() {
    let project = glob_project("py = [\":rglob::src::*.py::!test_::*.py\"]\n");
    let doitoml = project.load().unwrap();
    assert_eq!(
        doitoml.config().paths().get(&key("", "py")),
        Some(&vec![
            project.posix("src/a.py"),
            project.posix("src/b.py"),
            project.posix("src/sub/c.py"),
        ])
    );
}

#[test]
fn test_glob_substitutions_apply_to_every_match() {
    let project = glob_project("pyc = [':glob::src::/s/\\.py$/.pyc/::*.py::!test_']\n");
    let doitoml = project.load().unwrap();
    assert_eq!(
        doitoml.config().paths().get(&key("", "pyc")),
        Some(&vec![project.posix("src/a.pyc"), project.posix("src/b.pyc")])
    );
}

#[test]
fn test_glob_without_matches_resolves_to_nothing() {
    let project = glob_project("none = [\":glob::src::*.rs\"]\n");
    let doitoml = project.load().unwrap();
    assert_eq!(doitoml.config().paths().get(&key("", "none")), Some(&vec![]));
}

// === Getters ===

#[test]
fn test_getter_reads_values_from_other_files() {
    let project = Project::with_pyproject(
        "env = { VERSION = \":get::json::package.json::version\" }\ntokens = { keywords = [\":get::json::package.json::keywords\"] }\n",
    );
    project.write("package.json", r#"{"version": "1.2.3", "keywords": ["a", "b"]}"#);
    let doitoml = project.load().unwrap();
    assert_eq!(doitoml.config().env().get("VERSION").map(String::as_str), Some("1.2.3"));
    assert_eq!(
        doitoml.config().tokens().get(&key("", "keywords")),
        Some(&vec!["a".to_string(), "b".to_string()])
    );
}

#[test]
fn test_getter_default_covers_missing_files_and_keys() {
    let project = Project::with_pyproject(
        "tokens = { v = [\":get|0.0.0::json::package.json::version\"], w = [\":get|none::toml::pyproject.toml::tool::nothing\"] }\n",
    );
    let doitoml = project.load().unwrap();
    let tokens = doitoml.config().tokens();
    assert_eq!(tokens.get(&key("", "v")), Some(&vec!["0.0.0".to_string()]));
    assert_eq!(tokens.get(&key("", "w")), Some(&vec!["none".to_string()]));
}

// === Export ===

#[test]
fn test_to_dict_nests_paths_and_tokens_by_prefix() {
    let project = Project::with_pyproject(
        "prefix = \"p\"\nenv = { Z = \"1\", A = \"2\" }\ntokens = { t = [\"x\"] }\npaths = { f = [\"f.txt\"] }\n",
    );
    let dict = project.load().unwrap().to_dict();
    assert_eq!(dict["env"], json!({"A": "2", "Z": "1"}));
    assert_eq!(dict["tokens"], json!({"p": {"t": ["x"]}}));
    assert_eq!(dict["paths"], json!({"p": {"f": [project.posix("f.txt")]}}));
    assert_eq!(dict["tasks"], json!({}));

    let keys: Vec<&String> = dict.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["env", "paths", "tasks", "templates", "tokens"]);
}

fn assert_keys_sorted(value: &Value) {
    match value {
        Value::Object(map) => {
            let keys: Vec<&String> = map.keys().collect();
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted);
            map.values().for_each(assert_keys_sorted);
        }
        Value::Array(items) => items.iter().for_each(assert_keys_sorted),
        _ => {}
    }
}

#[test]
fn test_to_dict_survives_a_json_round_trip() {
    let project = Project::with_pyproject(
        r#"prefix = "p"
env = { B = "2", A = "1" }
tokens = { t = ["x", "y"] }

[tool.doitoml.tasks.build]
doc = "build"
actions = [["echo", "::t"]]
verbosity = 2
custom = { n = 1, f = 2.5, b = true, nested = { z = [1, "a", [true]], a = {} } }
"#,
    );
    let dict = project.load().unwrap().to_dict();
    let text = serde_json::to_string(&dict).unwrap();
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, dict);
    assert_keys_sorted(&parsed);
    assert_eq!(
        parsed["tasks"]["p:build"]["custom"],
        json!({"b": true, "f": 2.5, "n": 1, "nested": {"a": {}, "z": [1, "a", [true]]}})
    );
}

