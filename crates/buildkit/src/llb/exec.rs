use super::state::{join_path, State, Vertex};
use crate::proto::pb;
use anyhow::{bail, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub use crate::proto::pb::SecurityMode;

/// Ordered environment; setting an existing key replaces it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvList(Vec<(String, String)>);

impl EnvList {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `KEY=value` strings, in insertion order.
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSharing {
    Shared,
    Private,
    Locked,
}

impl From<CacheSharing> for pb::CacheSharingOpt {
    fn from(sharing: CacheSharing) -> Self {
        match sharing {
            CacheSharing::Shared => pb::CacheSharingOpt::Shared,
            CacheSharing::Private => pb::CacheSharingOpt::Private,
            CacheSharing::Locked => pb::CacheSharingOpt::Locked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    /// Persistent volume shared across builds by id.
    Cache { id: String, sharing: CacheSharing },
    /// Ephemeral, never persisted.
    Tmpfs { size: i64 },
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub dest: String,
    pub source: State,
    pub selector: Option<String>,
    pub readonly: bool,
    pub kind: MountKind,
}

impl Mount {
    pub fn bind(dest: impl Into<String>, source: &State) -> Self {
        Self {
            dest: dest.into(),
            source: source.clone(),
            selector: None,
            readonly: false,
            kind: MountKind::Bind,
        }
    }

    pub fn cache(dest: impl Into<String>, id: impl Into<String>, sharing: CacheSharing) -> Self {
        Self::cache_from(dest, &State::scratch(), id, sharing)
    }

    /// A cache volume seeded from `source` the first time it is created.
    pub fn cache_from(
        dest: impl Into<String>,
        source: &State,
        id: impl Into<String>,
        sharing: CacheSharing,
    ) -> Self {
        Self {
            dest: dest.into(),
            source: source.clone(),
            selector: None,
            readonly: false,
            kind: MountKind::Cache {
                id: id.into(),
                sharing,
            },
        }
    }

    pub fn tmpfs(dest: impl Into<String>) -> Self {
        Self {
            dest: dest.into(),
            source: State::scratch(),
            selector: None,
            readonly: false,
            kind: MountKind::Tmpfs { size: 0 },
        }
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Mount only `path` of the source.
    pub fn source_path(mut self, path: impl Into<String>) -> Self {
        self.selector = Some(path.into());
        self
    }

    pub fn cache_id(&self) -> Option<&str> {
        match &self.kind {
            MountKind::Cache { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Mutable configuration of one exec step, accumulated from `RunOption`s.
#[derive(Debug, Clone)]
pub struct ExecInfo {
    pub args: Vec<String>,
    pub env: EnvList,
    pub cwd: String,
    pub mounts: Vec<Mount>,
    pub security: SecurityMode,
    pub custom_name: Option<String>,
}

impl ExecInfo {
    pub fn new(state: &State) -> Self {
        Self {
            args: vec![],
            env: state.env.clone(),
            cwd: state.get_dir().to_string(),
            mounts: vec![],
            security: SecurityMode::Sandbox,
            custom_name: None,
        }
    }

    pub fn with_options(state: &State, opts: &[RunOption]) -> Self {
        let mut info = Self::new(state);
        for opt in opts {
            opt.apply(&mut info);
        }
        info
    }

    pub fn mount(&self, dest: &str) -> Option<&Mount> {
        self.mounts.iter().find(|m| m.dest == dest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.args.is_empty() {
            bail!("exec requires at least one argument");
        }

        let mut seen = HashSet::new();
        for mount in &self.mounts {
            if !mount.dest.starts_with('/') {
                bail!("mount destination must be absolute: {}", mount.dest);
            }
            if mount.dest == "/" {
                bail!("root mount is implicit and cannot be added");
            }
            if !seen.insert(mount.dest.as_str()) {
                bail!("duplicate mount destination: {}", mount.dest);
            }
            if let MountKind::Cache { id, .. } = &mount.kind {
                if id.is_empty() {
                    bail!("cache mount at {} has an empty id", mount.dest);
                }
            }
        }
        Ok(())
    }
}

/// A mutator of `ExecInfo`. Options compose by sequential application.
#[derive(Clone)]
pub struct RunOption(Arc<dyn Fn(&mut ExecInfo) + Send + Sync>);

impl RunOption {
    pub fn new(f: impl Fn(&mut ExecInfo) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, info: &mut ExecInfo) {
        (self.0)(info)
    }
}

impl fmt::Debug for RunOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RunOption")
    }
}

pub fn args<I, S>(argv: I) -> RunOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
    RunOption::new(move |ei| ei.args = argv.clone())
}

/// `/bin/sh -c <script>`
pub fn sh(script: impl Into<String>) -> RunOption {
    let script = script.into();
    args(["/bin/sh".to_string(), "-c".to_string(), script])
}

pub fn add_env(key: impl Into<String>, value: impl Into<String>) -> RunOption {
    let key = key.into();
    let value = value.into();
    RunOption::new(move |ei| ei.env.set(key.clone(), value.clone()))
}

pub fn dir(path: impl Into<String>) -> RunOption {
    let path = path.into();
    RunOption::new(move |ei| ei.cwd = join_path(&ei.cwd, &path))
}

/// Adds a mount, replacing any earlier mount at the same destination.
pub fn add_mount(mount: Mount) -> RunOption {
    RunOption::new(move |ei| {
        ei.mounts.retain(|m| m.dest != mount.dest);
        ei.mounts.push(mount.clone());
    })
}

pub fn security(mode: SecurityMode) -> RunOption {
    RunOption::new(move |ei| ei.security = mode)
}

pub fn custom_name(name: impl Into<String>) -> RunOption {
    let name = name.into();
    RunOption::new(move |ei| ei.custom_name = Some(name.clone()))
}

/// Bundle several options into one, applied in order.
pub fn with_run_options(opts: impl IntoIterator<Item = RunOption>) -> RunOption {
    let opts: Vec<RunOption> = opts.into_iter().collect();
    RunOption::new(move |ei| {
        for opt in &opts {
            opt.apply(ei);
        }
    })
}

/// Result of `State::run`: the root filesystem plus any writable mounts.
#[derive(Debug, Clone)]
pub struct ExecState {
    root: State,
    vertex: Arc<Vertex>,
    outputs: Vec<(String, i64)>,
}

impl ExecState {
    pub(crate) fn new(base: &State, vertex: Arc<Vertex>, outputs: Vec<(String, i64)>) -> Self {
        let mut root = State::from_arc(vertex.clone(), 0);
        root.cwd = base.cwd.clone();
        root.env = base.env.clone();
        Self {
            root,
            vertex,
            outputs,
        }
    }

    pub fn root(&self) -> State {
        self.root.clone()
    }

    /// The filesystem left in the writable mount at `dest` after the step.
    pub fn get_mount(&self, dest: &str) -> Result<State> {
        match self.outputs.iter().find(|(d, _)| d == dest) {
            Some((_, index)) => Ok(State::from_arc(self.vertex.clone(), *index)),
            None => bail!("no writable mount at {}", dest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_option_wins() {
        let info = ExecInfo::with_options(
            &State::scratch(),
            &[
                dir("/a"),
                add_env("X", "1"),
                dir("/b"),
                add_env("X", "2"),
                security(SecurityMode::Insecure),
            ],
        );
        assert_eq!(info.cwd, "/b");
        assert_eq!(info.env.get("X"), Some("2"));
        assert_eq!(info.security, SecurityMode::Insecure);
    }

    #[test]
    fn test_add_mount_replaces_same_dest() {
        let info = ExecInfo::with_options(
            &State::scratch(),
            &[
                add_mount(Mount::cache("/c", "one", CacheSharing::Shared)),
                add_mount(Mount::cache("/c", "two", CacheSharing::Locked)),
            ],
        );
        assert_eq!(info.mounts.len(), 1);
        assert_eq!(info.mount("/c").unwrap().cache_id(), Some("two"));
    }

    #[test]
    fn test_with_run_options_is_repeatable() {
        let bundle = with_run_options([
            add_mount(Mount::tmpfs("/tmp/x")),
            add_env("A", "b"),
        ]);
        let first = ExecInfo::with_options(&State::scratch(), &[bundle.clone()]);
        let second = ExecInfo::with_options(&State::scratch(), &[bundle.clone(), bundle]);
        assert_eq!(first.env, second.env);
        assert_eq!(first.mounts.len(), second.mounts.len());
        assert_eq!(first.mounts[0].kind, second.mounts[0].kind);
    }

    #[test]
    fn test_validate_rejects_bad_mounts() {
        let relative = ExecInfo::with_options(
            &State::scratch(),
            &[sh("true"), add_mount(Mount::tmpfs("tmp"))],
        );
        assert!(relative.validate().is_err());

        let empty_id = ExecInfo::with_options(
            &State::scratch(),
            &[sh("true"), add_mount(Mount::cache("/c", "", CacheSharing::Locked))],
        );
        assert!(empty_id.validate().is_err());

        let mut dup = ExecInfo::with_options(&State::scratch(), &[sh("true")]);
        dup.mounts.push(Mount::tmpfs("/t"));
        dup.mounts.push(Mount::tmpfs("/t"));
        assert!(dup.validate().is_err());
    }

    #[test]
    fn test_env_inherited_from_state() {
        let st = State::scratch().add_env("PATH", "/bin").dir("/src");
        let info = ExecInfo::new(&st);
        assert_eq!(info.env.get("PATH"), Some("/bin"));
        assert_eq!(info.cwd, "/src");
    }
}
