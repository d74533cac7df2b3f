// src/core/interpolator.rs

//! # Token DSL
//!
//! Every string in `env`, `paths`, `tokens` and task fields is a candidate
//! token. The registered [`Dsl`] transformers are tried in rank order and the
//! first whose pattern matches decides: `Ok(None)` means "not yet", which
//! drives the retrying passes in the resolver; `Ok(Some(values))` is the
//! token's expansion, possibly empty.

use crate::core::config_resolver::Config;
use crate::core::entry_points::Plugin;
use crate::core::paths::{normalize_path, to_posix};
use crate::errors::{DoitomlError, Result};
use crate::sources::{ConfigSource, FileSource};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

lazy_static! {
    static ref PATH_REF_RE: Regex =
        Regex::new(r"^::((?P<prefix>[^:]*)::)?(?P<ref>[^:]+)$").unwrap();
    static ref ENV_RE: Regex = Regex::new(r"\$\{([^\}]+)\}").unwrap();
    static ref GLOB_RE: Regex = Regex::new(r"^:(?P<kind>(r?glob))::(?P<rest>:{0,2}.*)$").unwrap();
    static ref BACKREF_RE: Regex = Regex::new(r"\\(\d+)").unwrap();
}

const WILDCARDS: [char; 3] = ['*', '?', '['];

/// A ranked token transformer.
pub trait Dsl: Plugin + fmt::Debug {
    /// Tokens this transformer claims.
    fn pattern(&self) -> &Regex;

    /// Expands a token whose text matched [`Dsl::pattern`].
    ///
    /// `Ok(None)` leaves the token unresolved for a later attempt.
    fn transform_token(
        &self,
        config: &Config,
        source: &ConfigSource,
        captures: &Captures<'_>,
        raw_token: &str,
    ) -> Result<Option<Vec<String>>>;
}

// --- PATH AND TOKEN REFERENCES ---

/// `::name` and `::prefix::name`: a previously resolved path or token.
#[derive(Debug, Default)]
pub struct PathRef;

impl Plugin for PathRef {
    fn rank(&self) -> i64 {
        80
    }
}

impl Dsl for PathRef {
    fn pattern(&self) -> &Regex {
        &PATH_REF_RE
    }

    fn transform_token(
        &self,
        config: &Config,
        source: &ConfigSource,
        captures: &Captures<'_>,
        _raw_token: &str,
    ) -> Result<Option<Vec<String>>> {
        let reference = captures.name("ref").map_or("", |m| m.as_str());
        let prefix = captures
            .name("prefix")
            .map_or_else(|| source.prefix(), |m| m.as_str());

        let prefixes: Vec<String> = if prefix.contains(WILDCARDS) {
            let matcher = glob::Pattern::new(prefix)
                .map_err(|e| DoitomlError::Dsl(format!("{} bad prefix pattern '{}': {}", source, prefix, e)))?;
            config
                .sorted_prefixes()
                .into_iter()
                .filter(|p| matcher.matches(p))
                .collect()
        } else {
            vec![prefix.to_string()]
        };

        let mut found: Option<Vec<String>> = None;
        for prefix in prefixes {
            let key = (prefix, reference.to_string());
            // Tokens shadow paths of the same name.
            if let Some(values) = config.tokens().get(&key).or_else(|| config.paths().get(&key)) {
                found.get_or_insert_with(Vec::new).extend(values.iter().cloned());
            }
        }
        Ok(found)
    }
}

// --- ENVIRONMENT ---

/// `${NAME}`: substituted everywhere in the token, never retried.
#[derive(Debug, Default)]
pub struct EnvReplacer;

impl Plugin for EnvReplacer {
    fn rank(&self) -> i64 {
        90
    }
}

impl Dsl for EnvReplacer {
    fn pattern(&self) -> &Regex {
        &ENV_RE
    }

    fn transform_token(
        &self,
        config: &Config,
        _source: &ConfigSource,
        _captures: &Captures<'_>,
        raw_token: &str,
    ) -> Result<Option<Vec<String>>> {
        let mut failure = None;
        let replaced = ENV_RE.replace_all(raw_token, |caps: &Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            match config.get_env(name) {
                Ok(value) => value,
                Err(err) => {
                    failure.get_or_insert(err);
                    String::new()
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(Some(vec![replaced.into_owned()])),
        }
    }
}

// --- GLOBS ---

/// The chunks of a `:glob::` or `:rglob::` token after the root.
#[derive(Debug, Default)]
pub struct GlobSpec {
    /// Directory the patterns are anchored at, relative to the source.
    pub root: String,
    /// Glob patterns; matches are merged.
    pub includes: Vec<String>,
    /// Matches whose relative path hits any of these are dropped.
    pub excludes: Vec<Regex>,
    /// Substitutions applied to every surviving match.
    pub replacers: Vec<(Regex, String)>,
}

impl GlobSpec {
    /// Splits `root::chunk[::chunk...]`. Excludes (`!regex`) and substitutions
    /// (`/s/regex/repl`, or `/s/::regex::repl`) may appear anywhere.
    pub fn parse(rest: &str) -> Result<Self> {
        let (root, chunks) = rest
            .split_once("::")
            .ok_or_else(|| DoitomlError::Dsl(format!("glob needs a root and a pattern: {}", rest)))?;
        let mut spec = Self {
            root: root.to_string(),
            ..Self::default()
        };
        let mut chunks: VecDeque<&str> = chunks.split("::").collect();
        while let Some(chunk) = chunks.pop_front() {
            if let Some(exclude) = chunk.strip_prefix('!') {
                spec.excludes.push(compile(exclude)?);
            } else if let Some(inline) = chunk.strip_prefix("/s/") {
                let (pattern, replacement) = if inline.is_empty() {
                    match (chunks.pop_front(), chunks.pop_front()) {
                        (Some(p), Some(r)) => (p, r),
                        _ => {
                            return Err(DoitomlError::Dsl(format!(
                                "substitution needs a pattern and a replacement: {}",
                                rest
                            )));
                        }
                    }
                } else {
                    let inline = inline.strip_suffix('/').unwrap_or(inline);
                    inline.split_once('/').ok_or_else(|| {
                        DoitomlError::Dsl(format!("expected /s/pattern/replacement, found {}", chunk))
                    })?
                };
                spec.replacers.push((compile(pattern)?, backrefs(replacement)));
            } else {
                spec.includes.push(chunk.to_string());
            }
        }
        Ok(spec)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| DoitomlError::Dsl(format!("bad regular expression '{}': {}", pattern, e)))
}

/// Rewrites `\1` back-references into `${1}`.
fn backrefs(replacement: &str) -> String {
    BACKREF_RE.replace_all(replacement, "$${${1}}").into_owned()
}

/// `:glob::root::pattern...` and `:rglob::root::pattern...`.
#[derive(Debug, Default)]
pub struct Globber;

impl Plugin for Globber {}

impl Dsl for Globber {
    fn pattern(&self) -> &Regex {
        &GLOB_RE
    }

    fn transform_token(
        &self,
        config: &Config,
        source: &ConfigSource,
        captures: &Captures<'_>,
        _raw_token: &str,
    ) -> Result<Option<Vec<String>>> {
        let recursive = captures.name("kind").is_some_and(|m| m.as_str() == "rglob");
        let spec = GlobSpec::parse(captures.name("rest").map_or("", |m| m.as_str()))?;
        let root = normalize_path(&source.parent().join(&spec.root));
        config.safe_paths().check(&root)?;

        let mut matched = Vec::new();
        for include in &spec.includes {
            if recursive {
                matched.extend(rglob(&root, include)?);
            } else {
                matched.extend(glob_in(&root, include)?);
            }
        }

        let parent = normalize_path(source.parent());
        let mut results = BTreeSet::new();
        for path in matched {
            let mut text = to_posix(&path);
            if !spec.excludes.is_empty() {
                let relative = path.strip_prefix(&parent).map_or_else(|_| text.clone(), to_posix);
                if !relative.is_empty() && spec.excludes.iter().any(|ex| ex.is_match(&relative)) {
                    continue;
                }
            }
            for (pattern, replacement) in &spec.replacers {
                text = pattern.replace_all(&text, replacement.as_str()).into_owned();
            }
            results.insert(text);
        }
        Ok(Some(results.into_iter().collect()))
    }
}

fn bad_glob(pattern: &str, err: impl fmt::Display) -> DoitomlError {
    DoitomlError::Dsl(format!("bad glob '{}': {}", pattern, err))
}

fn glob_in(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!("{}/{}", glob::Pattern::escape(&to_posix(root)), pattern);
    let mut found = Vec::new();
    for entry in glob::glob(&full).map_err(|e| bad_glob(pattern, e))? {
        match entry {
            Ok(path) => found.push(path),
            Err(err) => log::warn!("Skipping unreadable glob match: {}", err),
        }
    }
    Ok(found)
}

fn rglob(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let direct = glob::Pattern::new(pattern).map_err(|e| bad_glob(pattern, e))?;
    let nested = glob::Pattern::new(&format!("**/{}", pattern)).map_err(|e| bad_glob(pattern, e))?;
    let options = glob::MatchOptions {
        require_literal_separator: true,
        ..glob::MatchOptions::new()
    };
    let mut found = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("Skipping unreadable path under {}: {}", root.display(), err);
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = to_posix(relative);
        if direct.matches_with(&relative, options) || nested.matches_with(&relative, options) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

// --- CROSS-FILE VALUES ---

/// Builds the `:get[|default]::parser::path::key...` pattern for the loaded parsers.
pub fn getter_pattern(parser_names: &[String]) -> Result<Regex> {
    let mut names: Vec<String> = parser_names.iter().map(|n| regex::escape(n)).collect();
    names.sort();
    Regex::new(&format!(
        r"^:get(?P<default>\|[^:]*)?::(?P<parser>{})::(?P<path>.+?)::(?P<rest>:{{0,2}}.*)$",
        names.join("|")
    ))
    .map_err(|e| DoitomlError::Dsl(format!("cannot build getter pattern: {}", e)))
}

/// A parsed getter token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSpec {
    /// Returned when the file or key is missing.
    pub default: Option<String>,
    /// Parser name.
    pub parser: String,
    /// File to read, relative to the source.
    pub path: String,
    /// Keys or indices to walk into the document.
    pub bits: Vec<String>,
}

impl GetSpec {
    /// Reads the spec out of a match of the getter pattern.
    pub fn from_captures(captures: &Captures<'_>) -> Self {
        let group = |name: &str| captures.name(name).map_or("", |m| m.as_str());
        let rest = group("rest");
        let bits = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split("::").map(str::to_string).collect()
        };
        Self {
            default: captures
                .name("default")
                .map(|m| m.as_str().trim_start_matches('|').to_string()),
            parser: group("parser").to_string(),
            path: group("path").to_string(),
            bits,
        }
    }

    /// The file this spec reads, relative to `base` and inside the safe paths.
    pub fn file_source(&self, config: &Config, base: &Path) -> Result<FileSource> {
        let parser = config
            .entry_points()
            .parsers
            .get(&self.parser)
            .ok_or_else(|| DoitomlError::Dsl(format!("parser {} is not supported", self.parser)))?;
        let path = normalize_path(&base.join(&self.path));
        config.safe_paths().check(&path)?;
        if !path.exists() {
            return Err(DoitomlError::Dsl(format!(
                "{} does not exist, can't get {:?}",
                to_posix(&path),
                self.bits
            )));
        }
        Ok(FileSource::new(path, parser.clone()))
    }
}

/// Renders a fetched value: strings verbatim, lists item by item, the rest as JSON.
pub fn value_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(text) => vec![text.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

/// `:get::parser::path::key...`, with an optional `|default` on any failure.
#[derive(Debug)]
pub struct Getter {
    pattern: Regex,
}

impl Getter {
    /// A getter that accepts any of `parser_names`.
    pub fn new(parser_names: &[String]) -> Result<Self> {
        Ok(Self {
            pattern: getter_pattern(parser_names)?,
        })
    }
}

impl Plugin for Getter {}

impl Dsl for Getter {
    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn transform_token(
        &self,
        config: &Config,
        source: &ConfigSource,
        captures: &Captures<'_>,
        raw_token: &str,
    ) -> Result<Option<Vec<String>>> {
        let spec = GetSpec::from_captures(captures);
        let fetched = spec
            .file_source(config, source.parent())
            .and_then(|file| file.get(&spec.bits));
        match (fetched, spec.default) {
            (Ok(value), _) => Ok(Some(value_to_strings(&value))),
            (Err(err), Some(default)) => {
                log::debug!("{} using default '{}' for {}: {}", source, default, raw_token, err);
                Ok(Some(vec![default]))
            }
            (Err(err), None) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_chunks_split_into_includes_excludes_and_substitutions() {
        let spec = GlobSpec::parse("src::!test_::*.py::/s/::\\.py$::.pyc::/s/src/dist::*.txt").unwrap();
        assert_eq!(spec.root, "src");
        assert_eq!(spec.includes, vec!["*.py", "*.txt"]);
        assert_eq!(spec.excludes.len(), 1);
        let replacements: Vec<&str> = spec.replacers.iter().map(|(_, r)| r.as_str()).collect();
        assert_eq!(replacements, vec![".pyc", "dist"]);
    }

    #[test]
    fn glob_without_pattern_is_an_error() {
        assert!(matches!(GlobSpec::parse("src"), Err(DoitomlError::Dsl(_))));
    }

    #[test]
    fn back_references_are_rewritten() {
        assert_eq!(backrefs(r"\1-\2"), "${1}-${2}");
        let re = Regex::new(r"(\w+)\.py").unwrap();
        assert_eq!(re.replace_all("mod.py", backrefs(r"\1.pyc").as_str()), "mod.pyc");
    }

    #[test]
    fn getter_pattern_captures_default_and_bits() {
        let pattern = getter_pattern(&["json".to_string(), "toml".to_string()]).unwrap();
        let captures = pattern
            .captures(":get|fallback::toml::../pyproject.toml::project::version")
            .unwrap();
        let spec = GetSpec::from_captures(&captures);
        assert_eq!(spec.default.as_deref(), Some("fallback"));
        assert_eq!(spec.parser, "toml");
        assert_eq!(spec.path, "../pyproject.toml");
        assert_eq!(spec.bits, vec!["project", "version"]);
        assert!(pattern.captures(":get::ini::setup.cfg::x").is_none());
    }

    #[test]
    fn fetched_values_render_as_strings() {
        assert_eq!(value_to_strings(&json!("1.0")), vec!["1.0"]);
        assert_eq!(value_to_strings(&json!(["a", 1, {"b": 2}])), vec!["a", "1", "{\"b\":2}"]);
        assert_eq!(value_to_strings(&json!({"k": true})), vec!["{\"k\":true}"]);
        assert_eq!(value_to_strings(&json!(null)), vec!["null"]);
    }

    #[test]
    fn rglob_matches_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a").join("b")).unwrap();
        std::fs::write(dir.path().join("top.py"), "").unwrap();
        std::fs::write(dir.path().join("a").join("b").join("deep.py"), "").unwrap();
        std::fs::write(dir.path().join("a").join("skip.txt"), "").unwrap();
        let found = rglob(dir.path(), "*.py").unwrap();
        let names: Vec<String> = found
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"top.py".to_string()));
        assert!(names.contains(&"deep.py".to_string()));
    }
}
