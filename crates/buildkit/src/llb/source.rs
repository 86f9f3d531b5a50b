use super::state::{State, Vertex};
use crate::proto::pb;
use std::collections::BTreeMap;

/// Options for a `local://` context source.
#[derive(Debug, Clone, Default)]
pub struct LocalOptions {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub shared_key_hint: Option<String>,
}

impl State {
    /// A registry image. Short references are normalized to their fully
    /// qualified form (`alpine` -> `docker.io/library/alpine:latest`).
    pub fn image(reference: &str) -> Self {
        Self::source(
            format!("docker-image://{}", normalize_image_ref(reference)),
            BTreeMap::new(),
        )
    }

    /// A named context provided by the client.
    pub fn local_with(name: &str, opts: &LocalOptions) -> Self {
        let mut attrs = BTreeMap::new();
        if !opts.include_patterns.is_empty() {
            attrs.insert(
                "local.includepattern".to_string(),
                json_list(&opts.include_patterns),
            );
        }
        if !opts.exclude_patterns.is_empty() {
            attrs.insert(
                "local.excludepatterns".to_string(),
                json_list(&opts.exclude_patterns),
            );
        }
        if let Some(hint) = &opts.shared_key_hint {
            attrs.insert("local.sharedkeyhint".to_string(), hint.clone());
        }
        Self::source(format!("local://{}", name), attrs)
    }

    /// A git checkout of `reference` (commit, tag or branch).
    pub fn git(remote: &str, reference: &str, keep_git_dir: bool) -> Self {
        let mut attrs = BTreeMap::new();
        let stripped = match remote.split_once("://") {
            Some((_, rest)) => {
                attrs.insert("git.fullurl".to_string(), remote.to_string());
                rest
            }
            None => remote,
        };
        if keep_git_dir {
            attrs.insert("git.keepgitdir".to_string(), "true".to_string());
        }

        let mut identifier = format!("git://{}", stripped);
        if !reference.is_empty() {
            identifier.push('#');
            identifier.push_str(reference);
        }
        Self::source(identifier, attrs)
    }

    /// A single file downloaded over http(s).
    pub fn http(url: &str, filename: Option<&str>) -> Self {
        let mut attrs = BTreeMap::new();
        if let Some(filename) = filename {
            attrs.insert("http.filename".to_string(), filename.to_string());
        }
        Self::source(url.to_string(), attrs)
    }

    fn source(identifier: String, attrs: BTreeMap<String, String>) -> Self {
        State::from_vertex(
            Vertex {
                op: pb::op::Op::Source(pb::SourceOp { identifier, attrs }),
                inputs: vec![],
                platform: None,
                custom_name: None,
            },
            0,
        )
    }
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub fn normalize_image_ref(reference: &str) -> String {
    let (name, digest) = match reference.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (reference, None),
    };

    let (name, tag) = match name.rfind(':') {
        Some(pos) if !name[pos..].contains('/') => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    };

    let has_domain = match name.split_once('/') {
        Some((first, _)) => first.contains('.') || first.contains(':') || first == "localhost",
        None => false,
    };

    let mut full = if has_domain {
        name.to_string()
    } else if name.contains('/') {
        format!("docker.io/{}", name)
    } else {
        format!("docker.io/library/{}", name)
    };

    match (tag, digest) {
        (Some(tag), Some(digest)) => {
            full.push(':');
            full.push_str(tag);
            full.push('@');
            full.push_str(digest);
        }
        (Some(tag), None) => {
            full.push(':');
            full.push_str(tag);
        }
        (None, Some(digest)) => {
            full.push('@');
            full.push_str(digest);
        }
        (None, None) => full.push_str(":latest"),
    }
    full
}
