//! Package spec model.
//!
//! A spec is loaded once per build, after build-arg expansion, and is
//! read-only from then on.

mod expand;
mod load;
mod source;

pub use expand::expand_args;
pub use load::load_spec;
pub use source::{BytesSpecSource, FileSpecSource, SpecSource};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null(()),
}

impl Scalar {
    fn into_string(self) -> Option<String> {
        match self {
            Scalar::Str(s) => Some(s),
            Scalar::Int(i) => Some(i.to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            Scalar::Bool(b) => Some(b.to_string()),
            Scalar::Null(()) => None,
        }
    }
}

/// Accepts `1`, `1.5` and `"1"` alike for version-like fields.
fn deserialize_scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Scalar::deserialize(deserializer)?
        .into_string()
        .unwrap_or_default())
}

fn deserialize_args<'de, D>(deserializer: D) -> Result<BTreeMap<String, Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Scalar>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.into_string()))
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub license: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packager: Option<String>,

    #[serde(default, deserialize_with = "deserialize_scalar_string")]
    pub version: String,
    #[serde(default, deserialize_with = "deserialize_scalar_string")]
    pub revision: String,

    /// Declared build args and their defaults.
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: BTreeMap<String, Option<String>>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub sources: BTreeMap<String, Source>,
    /// Source name -> names of sources applied to it as patches.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub patches: BTreeMap<String, Vec<String>>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub dependencies: Dependencies,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub build: BuildSteps,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub artifacts: Artifacts,
}

/// One upstream input to the package. Exactly one of the kind fields is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineSource>,

    /// Subdirectory of the fetched tree to use instead of its root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum SourceKind<'a> {
    Git(&'a GitSource),
    Http(&'a HttpSource),
    Context(&'a ContextSource),
    Inline(&'a InlineSource),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitSource {
    pub url: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub commit: String,
    #[serde(default)]
    pub keep_git_dir: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpSource {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSource {
    #[serde(default = "default_context_name")]
    pub name: String,
}

fn default_context_name() -> String {
    "context".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<InlineFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<InlineDir>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineFile {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub contents: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineDir {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub files: BTreeMap<String, InlineFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Package name -> version constraints (`>= 1.2`).
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub build: BTreeMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub runtime: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSteps {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub env: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub steps: Vec<BuildStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildStep {
    pub command: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    /// Path in the build tree -> install config.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub binaries: BTreeMap<String, ArtifactConfig>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub manpages: BTreeMap<String, ArtifactConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Subdirectory under the install location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
    /// Installed file name; defaults to the source file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Source {
    pub fn kind(&self) -> Option<SourceKind<'_>> {
        if let Some(git) = &self.git {
            return Some(SourceKind::Git(git));
        }
        if let Some(http) = &self.http {
            return Some(SourceKind::Http(http));
        }
        if let Some(context) = &self.context {
            return Some(SourceKind::Context(context));
        }
        self.inline.as_ref().map(SourceKind::Inline)
    }

    fn kind_count(&self) -> usize {
        [
            self.git.is_some(),
            self.http.is_some(),
            self.context.is_some(),
            self.inline.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Whether this source yields a directory tree (packed as a tarball)
    /// rather than a single file (copied as is).
    pub fn is_dir(&self) -> bool {
        match self.kind() {
            Some(SourceKind::Http(_)) => false,
            Some(SourceKind::Inline(inline)) => inline.file.is_none(),
            _ => true,
        }
    }
}

/// Package and source names end up in file paths and shell commands, so
/// they are limited to the characters RPM accepts in a package name.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}

impl Spec {
    /// Checks the structural rules that serde cannot express.
    pub fn validate(&self) -> Result<(), crate::SpecError> {
        use crate::SpecError;

        if self.name.trim().is_empty() {
            return Err(SpecError::MissingField("name"));
        }
        if !is_valid_name(&self.name) {
            return Err(SpecError::Invalid(format!(
                "invalid package name '{}' (allowed: A-Z a-z 0-9 . _ + -)",
                self.name
            )));
        }
        if self.version.trim().is_empty() {
            return Err(SpecError::MissingField("version"));
        }
        if self.revision.trim().is_empty() {
            return Err(SpecError::MissingField("revision"));
        }

        for (name, source) in &self.sources {
            if !is_valid_name(name) {
                return Err(SpecError::Invalid(format!(
                    "invalid source name '{}' (allowed: A-Z a-z 0-9 . _ + -)",
                    name
                )));
            }
            match source.kind_count() {
                1 => {}
                0 => {
                    return Err(SpecError::Invalid(format!(
                        "source '{}' has no type (expected one of git, http, context, inline)",
                        name
                    )))
                }
                _ => {
                    return Err(SpecError::Invalid(format!(
                        "source '{}' sets more than one type",
                        name
                    )))
                }
            }
            if let Some(inline) = &source.inline {
                if inline.file.is_some() == inline.dir.is_some() {
                    return Err(SpecError::Invalid(format!(
                        "inline source '{}' must set exactly one of file or dir",
                        name
                    )));
                }
            }
            if source.path.is_some() && !source.is_dir() {
                return Err(SpecError::Invalid(format!(
                    "source '{}' is a single file and cannot select a path",
                    name
                )));
            }
        }

        for (target, patches) in &self.patches {
            if !self.sources.contains_key(target) {
                return Err(SpecError::Invalid(format!(
                    "patches reference unknown source '{}'",
                    target
                )));
            }
            for patch in patches {
                match self.sources.get(patch) {
                    None => {
                        return Err(SpecError::Invalid(format!(
                            "patch '{}' for source '{}' is not a declared source",
                            patch, target
                        )))
                    }
                    Some(source) if source.is_dir() => {
                        return Err(SpecError::Invalid(format!(
                            "patch '{}' must be a single file source",
                            patch
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize spec to YAML")
    }

    /// Names of sources that are only used as patches.
    pub fn patch_sources(&self) -> impl Iterator<Item = &str> {
        self.patches.values().flatten().map(String::as_str)
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.revision)
    }
}
