//! Configuration loading and validation.
//!
//! The config file is TOML. It holds run defaults and named patchsets; each
//! patchset lists its patches inline or points at a JSON, YAML or TOML file.
//! Payloads may live in fragment files so a golden template (the standard
//! header, the cart modal) exists in exactly one place.
//!
//! Everything is compiled and validated up front: a config that loads is a
//! config whose regexes, globs and fragment files are all usable.
//!
//! ```toml
//! [run]
//! extensions = [".html"]
//!
//! [patchsets.cart]
//! description = "Global cart script"
//!
//! [[patchsets.cart.patches]]
//! name = "cart-script"
//! operation = "append_to_parent"
//! payload = '<script src="js/cart.js"></script>'
//! anchor = { kind = "tag", tag = "body" }
//! guard = { kind = "attribute", tag = "script", name = "src", value = "js/cart.js" }
//! ```

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::anchor::{AnchorPredicate, AnchorSpec};
use crate::error::ConfigError;
use crate::patch::{OnMultiple, Operation, PatchDescriptor};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    run: RunConfig,
    #[serde(default)]
    patchsets: BTreeMap<String, RawPatchset>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// File extensions to process when `--ext` is not given.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Globs (relative to the run root) excluded on top of the defaults.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Write a timestamped `.backup` copy before changing a file.
    #[serde(default)]
    pub backup: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            backup: false,
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec![".html".to_string()]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPatchset {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    patches: Vec<PatchSpec>,
    /// External patch list, relative to the config file.
    #[serde(default)]
    file: Option<PathBuf>,
}

/// Contents of an external patchset file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchsetFile {
    #[serde(default)]
    description: Option<String>,
    patches: Vec<PatchSpec>,
}

/// One patch as written in a config or patchset file.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PatchSpec {
    pub name: String,
    pub anchor: AnchorSpec,
    pub operation: Operation,
    #[serde(default)]
    pub payload: Option<String>,
    /// Fragment file holding the payload, relative to the declaring file.
    #[serde(default)]
    pub payload_file: Option<PathBuf>,
    #[serde(default)]
    pub guard: Option<AnchorSpec>,
    #[serde(default)]
    pub on_multiple: OnMultiple,
    /// Relative-path globs; the patch is evaluated only for matching files.
    #[serde(default)]
    pub files: Vec<String>,
}

/// A named, ordered list of compiled patches.
#[derive(Debug, Clone)]
pub struct Patchset {
    pub name: String,
    pub description: Option<String>,
    pub patches: Vec<PatchDescriptor>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub run: RunConfig,
    /// Keyed and iterated by name.
    pub patchsets: BTreeMap<String, Patchset>,
}

impl Config {
    /// Patches of the named patchsets in the order given, or of every
    /// patchset (by name) when `names` is empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<PatchDescriptor>, ConfigError> {
        if self.patchsets.is_empty() {
            return Err(ConfigError::Invalid(
                "no patchsets are configured".to_string(),
            ));
        }
        if names.is_empty() {
            return Ok(self
                .patchsets
                .values()
                .flat_map(|set| set.patches.iter().cloned())
                .collect());
        }
        let mut patches = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            let set = self
                .patchsets
                .get(name)
                .ok_or_else(|| ConfigError::UnknownPatchset(name.clone()))?;
            if seen.insert(name.as_str()) {
                patches.extend(set.patches.iter().cloned());
            }
        }
        Ok(patches)
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let raw: RawConfig = toml::from_str(&content).map_err(|e| ConfigError::Syntax {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // Validate run defaults
    if raw.run.extensions.iter().all(|e| e.trim_matches('.').is_empty()) {
        return Err(ConfigError::Invalid(
            "run.extensions must name at least one extension".to_string(),
        ));
    }
    build_globset(&raw.run.exclude_globs)?;

    let base_dir = path.parent().unwrap_or(Path::new("."));
    let mut patchsets = BTreeMap::new();
    let mut names = HashSet::new();

    for (set_name, raw_set) in raw.patchsets {
        let (description, specs, spec_dir) = match raw_set.file {
            Some(file) => {
                if !raw_set.patches.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "patchset '{}' sets both 'file' and inline 'patches'",
                        set_name
                    )));
                }
                let file = base_dir.join(file);
                let parsed = load_patchset_file(&file)?;
                let dir = file.parent().unwrap_or(base_dir).to_path_buf();
                (
                    raw_set.description.or(parsed.description),
                    parsed.patches,
                    dir,
                )
            }
            None => (raw_set.description, raw_set.patches, base_dir.to_path_buf()),
        };

        if specs.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "patchset '{}' has no patches",
                set_name
            )));
        }

        let mut patches = Vec::with_capacity(specs.len());
        for spec in &specs {
            if !names.insert(spec.name.clone()) {
                return Err(ConfigError::Patch {
                    patch: spec.name.clone(),
                    message: "duplicate patch name".to_string(),
                });
            }
            patches.push(compile_patch(spec, &spec_dir)?);
        }

        patchsets.insert(
            set_name.clone(),
            Patchset {
                name: set_name,
                description,
                patches,
            },
        );
    }

    Ok(Config {
        run: raw.run,
        patchsets,
    })
}

/// Reads a standalone patchset file. The format follows the extension:
/// `.json`, `.yaml`/`.yml` or `.toml`.
fn load_patchset_file(path: &Path) -> Result<PatchsetFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let syntax = |message: String| ConfigError::Syntax {
        path: path.to_path_buf(),
        message,
    };
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "json" => serde_json::from_str(&content).map_err(|e| syntax(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| syntax(e.to_string())),
        "toml" => toml::from_str(&content).map_err(|e| syntax(e.to_string())),
        other => Err(syntax(format!(
            "unsupported patchset format '.{}'; use .json, .yaml, .yml or .toml",
            other
        ))),
    }
}

/// Validates one patch entry and compiles it into a descriptor. Relative fragment
/// paths resolve against `dir`.
pub fn compile_patch(spec: &PatchSpec, dir: &Path) -> Result<PatchDescriptor, ConfigError> {
    let invalid = |message: &str| ConfigError::Patch {
        patch: spec.name.clone(),
        message: message.to_string(),
    };

    if spec.name.trim().is_empty() {
        return Err(ConfigError::Invalid("patch name must not be empty".to_string()));
    }

    let payload = match (&spec.payload, &spec.payload_file) {
        (Some(_), Some(_)) => return Err(invalid("set either 'payload' or 'payload_file', not both")),
        (Some(p), None) => Some(p.clone()),
        (None, Some(file)) => {
            let file = dir.join(file);
            let text = std::fs::read_to_string(&file).map_err(|source| ConfigError::Read {
                path: file.clone(),
                source,
            })?;
            Some(text)
        }
        (None, None) => None,
    };

    let payload = match (spec.operation.takes_payload(), payload) {
        (true, Some(p)) => p,
        (true, None) => {
            return Err(invalid(&format!(
                "operation '{}' needs a 'payload' or 'payload_file'",
                spec.operation
            )))
        }
        (false, Some(_)) => return Err(invalid("operation 'remove' takes no payload")),
        (false, None) => String::new(),
    };

    let anchor = AnchorPredicate::compile(&spec.anchor, &spec.name)?;
    let mut patch = PatchDescriptor::new(spec.name.clone(), anchor, spec.operation)
        .with_payload(payload)
        .with_on_multiple(spec.on_multiple);

    if let Some(guard) = &spec.guard {
        patch = patch.with_guard(AnchorPredicate::compile(guard, &spec.name)?);
    }
    if let Some(reason) = patch.reapply_hazard() {
        return Err(invalid(&reason));
    }
    if !spec.files.is_empty() {
        patch = patch.with_files(build_globset(&spec.files)?);
    }
    Ok(patch)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ConfigError::Glob {
            glob: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::Glob {
        glob: patterns.join(", "),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASIC: &str = r#"
[run]
extensions = [".html", ".js"]
backup = true

[patchsets.cart]
description = "cart everywhere"

[[patchsets.cart.patches]]
name = "cart-script"
operation = "append_to_parent"
payload = '<script src="js/cart.js"></script>'
anchor = { kind = "tag", tag = "body" }
guard = { kind = "attribute", tag = "script", name = "src", value = "js/cart.js" }

[[patchsets.cart.patches]]
name = "drop-widget"
operation = "remove"
anchor = { kind = "id", id = "messenger-widget-container" }
on_multiple = "all"
files = ["**/*.html"]
"#;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("sitepatch.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_inline_patchset() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&write_config(&tmp, BASIC)).unwrap();
        assert_eq!(config.run.extensions, vec![".html", ".js"]);
        assert!(config.run.backup);
        let set = &config.patchsets["cart"];
        assert_eq!(set.description.as_deref(), Some("cart everywhere"));
        assert_eq!(set.patches.len(), 2);
        assert_eq!(set.patches[0].operation, Operation::AppendToParent);
        assert!(set.patches[0].guard.is_some());
        assert_eq!(set.patches[1].on_multiple, OnMultiple::All);
        assert!(set.patches[1].applies_to(Path::new("a/b.html")));
        assert!(!set.patches[1].applies_to(Path::new("a/b.js")));
    }

    #[test]
    fn test_defaults_without_run_section() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&write_config(
            &tmp,
            r#"
[[patchsets.x.patches]]
name = "p"
operation = "remove"
anchor = { kind = "text", text = "TODO" }
"#,
        ))
        .unwrap();
        assert_eq!(config.run.extensions, vec![".html"]);
        assert!(!config.run.backup);
        assert!(!config.run.follow_symlinks);
    }

    #[test]
    fn test_payload_file_and_external_patchsets() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("patchsets/fragments")).unwrap();
        fs::write(
            tmp.path().join("patchsets/fragments/header.html"),
            "<header id=\"std\"></header>",
        )
        .unwrap();
        fs::write(
            tmp.path().join("patchsets/header.yaml"),
            r#"
description: Standard header
patches:
  - name: standard-header
    operation: replace_with
    payload_file: fragments/header.html
    anchor: { kind: tag, tag: header }
    guard: { kind: id, id: std }
"#,
        )
        .unwrap();
        fs::write(
            tmp.path().join("patchsets/js.json"),
            r#"{"patches": [{"name": "order-by", "operation": "replace_with",
                "payload": "$1.orderBy('t')",
                "anchor": {"kind": "regex", "pattern": "(query\\(\\w+\\))"},
                "guard": {"kind": "text", "text": "orderBy('t')"}}]}"#,
        )
        .unwrap();

        let config = load_config(&write_config(
            &tmp,
            r#"
[patchsets.header]
file = "patchsets/header.yaml"

[patchsets.js]
file = "patchsets/js.json"
"#,
        ))
        .unwrap();

        let header = &config.patchsets["header"];
        assert_eq!(header.description.as_deref(), Some("Standard header"));
        assert_eq!(header.patches[0].payload, "<header id=\"std\"></header>");
        assert_eq!(config.patchsets["js"].patches[0].name, "order-by");
    }

    #[test]
    fn test_select() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&write_config(&tmp, BASIC)).unwrap();
        assert_eq!(config.select(&[]).unwrap().len(), 2);
        assert_eq!(config.select(&["cart".to_string()]).unwrap().len(), 2);
        assert!(matches!(
            config.select(&["nope".to_string()]),
            Err(ConfigError::UnknownPatchset(_))
        ));
    }

    #[test]
    fn test_validation_errors() {
        let tmp = TempDir::new().unwrap();
        let cases = [
            // bad regex
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "remove"
anchor = { kind = "regex", pattern = "(" }
"#,
            // payload missing
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "insert_after"
anchor = { kind = "id", id = "x" }
"#,
            // payload on remove
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "remove"
payload = "x"
anchor = { kind = "id", id = "x" }
"#,
            // duplicate names
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "remove"
anchor = { kind = "id", id = "x" }
[[patchsets.b.patches]]
name = "p"
operation = "remove"
anchor = { kind = "id", id = "y" }
"#,
            // unknown operation
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "explode"
anchor = { kind = "id", id = "x" }
"#,
            // missing fragment
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "insert_after"
payload_file = "nope.html"
anchor = { kind = "id", id = "x" }
"#,
            // insert without a guard
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "insert_after"
payload = '<a href="contact.html">Support</a>'
anchor = { kind = "attribute", tag = "a", name = "href", value = "about.html" }
"#,
            // regex replacement reusing captures without a guard
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "replace_with"
payload = "$1.orderBy('t')"
anchor = { kind = "regex", pattern = '(query\(\w+\))' }
"#,
            // bad glob
            r#"
[[patchsets.a.patches]]
name = "p"
operation = "remove"
anchor = { kind = "id", id = "x" }
files = ["a/{b"]
"#,
        ];
        for (i, case) in cases.iter().enumerate() {
            let path = write_config(&tmp, case);
            assert!(load_config(&path).is_err(), "case {} should fail", i);
        }
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
