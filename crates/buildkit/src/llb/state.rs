use super::definition::Definition;
use super::exec::{EnvList, ExecInfo, ExecState, MountKind, RunOption};
use super::file::FileAction;
use super::platform::Platform;
use crate::proto::pb;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_PATH_ENV: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// One node of the graph. Inputs are referenced by position from the op
/// (mount inputs, file action inputs, merge inputs).
#[derive(Debug)]
pub(crate) struct Vertex {
    pub(crate) op: pb::op::Op,
    pub(crate) inputs: Vec<Output>,
    pub(crate) platform: Option<Platform>,
    pub(crate) custom_name: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct Output {
    pub(crate) vertex: Arc<Vertex>,
    pub(crate) index: i64,
}

impl Output {
    fn same_as(&self, other: &Output) -> bool {
        Arc::ptr_eq(&self.vertex, &other.vertex) && self.index == other.index
    }
}

/// Returns the position of `output` in `inputs`, appending it if new.
/// Scratch maps to -1.
pub(crate) fn input_index(inputs: &mut Vec<Output>, output: Option<&Output>) -> i64 {
    let Some(output) = output else {
        return -1;
    };
    if let Some(pos) = inputs.iter().position(|o| o.same_as(output)) {
        return pos as i64;
    }
    inputs.push(output.clone());
    (inputs.len() - 1) as i64
}

/// An immutable filesystem state: a base plus the steps applied to it.
///
/// Cloning is cheap; parents are shared. Working directory and environment
/// travel with the state and seed every exec derived from it.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub(crate) output: Option<Output>,
    pub(crate) cwd: Option<String>,
    pub(crate) env: EnvList,
}

impl State {
    pub fn scratch() -> Self {
        Self::default()
    }

    pub(crate) fn from_vertex(vertex: Vertex, index: i64) -> Self {
        Self::from_arc(Arc::new(vertex), index)
    }

    pub(crate) fn from_arc(vertex: Arc<Vertex>, index: i64) -> Self {
        Self {
            output: Some(Output { vertex, index }),
            cwd: None,
            env: EnvList::default(),
        }
    }

    pub fn is_scratch(&self) -> bool {
        self.output.is_none()
    }

    pub fn dir(mut self, path: impl AsRef<str>) -> Self {
        self.cwd = Some(join_path(self.get_dir(), path.as_ref()));
        self
    }

    pub fn get_dir(&self) -> &str {
        self.cwd.as_deref().unwrap_or("/")
    }

    pub fn add_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.get(key)
    }

    /// Run a command on top of this state. Options are applied in order;
    /// when two options write the same field the later one wins.
    pub fn run(&self, opts: &[RunOption]) -> Result<ExecState> {
        let info = ExecInfo::with_options(self, opts);
        info.validate()?;

        let mut inputs = Vec::new();
        let root_input = input_index(&mut inputs, self.output.as_ref());

        let mut extra = info.mounts.clone();
        extra.sort_by(|a, b| a.dest.cmp(&b.dest));

        let mut mounts = vec![pb::Mount {
            input: root_input,
            selector: String::new(),
            dest: "/".to_string(),
            output: 0,
            readonly: false,
            mount_type: pb::MountType::Bind as i32,
            tmpfs_opt: None,
            cache_opt: None,
            result_id: String::new(),
        }];
        let mut mount_outputs = vec![("/".to_string(), 0)];
        let mut next_output = 1;

        for mount in &extra {
            let input = input_index(&mut inputs, mount.source.output.as_ref());
            let selector = mount.selector.clone().unwrap_or_default();
            let pb_mount = match &mount.kind {
                MountKind::Bind => {
                    let output = if mount.readonly {
                        -1
                    } else {
                        let out = next_output;
                        next_output += 1;
                        mount_outputs.push((mount.dest.clone(), out));
                        out
                    };
                    pb::Mount {
                        input,
                        selector,
                        dest: mount.dest.clone(),
                        output,
                        readonly: mount.readonly,
                        mount_type: pb::MountType::Bind as i32,
                        tmpfs_opt: None,
                        cache_opt: None,
                        result_id: String::new(),
                    }
                }
                MountKind::Cache { id, sharing } => pb::Mount {
                    input,
                    selector,
                    dest: mount.dest.clone(),
                    output: -1,
                    readonly: false,
                    mount_type: pb::MountType::Cache as i32,
                    tmpfs_opt: None,
                    cache_opt: Some(pb::CacheOpt {
                        id: id.clone(),
                        sharing: pb::CacheSharingOpt::from(*sharing) as i32,
                    }),
                    result_id: String::new(),
                },
                MountKind::Tmpfs { size } => pb::Mount {
                    input: -1,
                    selector: String::new(),
                    dest: mount.dest.clone(),
                    output: -1,
                    readonly: false,
                    mount_type: pb::MountType::Tmpfs as i32,
                    tmpfs_opt: Some(pb::TmpfsOpt { size: *size }),
                    cache_opt: None,
                    result_id: String::new(),
                },
            };
            mounts.push(pb_mount);
        }

        let mut env = info.env.to_vec();
        if info.env.get("PATH").is_none() {
            env.push(format!("PATH={}", DEFAULT_PATH_ENV));
        }

        let meta = pb::Meta {
            args: info.args.clone(),
            env,
            cwd: info.cwd.clone(),
            user: String::new(),
            hostname: String::new(),
            cgroup_parent: String::new(),
            remove_mount_stubs_recursive: false,
        };

        debug!(
            "exec {:?} ({} mounts, security={:?})",
            info.args,
            mounts.len(),
            info.security
        );

        let vertex = Arc::new(Vertex {
            op: pb::op::Op::Exec(pb::ExecOp {
                meta: Some(meta),
                mounts,
                network: pb::NetMode::Unset as i32,
                security: info.security as i32,
            }),
            inputs,
            platform: None,
            custom_name: info.custom_name.clone(),
        });

        Ok(ExecState::new(self, vertex, mount_outputs))
    }

    /// Apply a chain of file actions to this state.
    pub fn file(&self, action: FileAction) -> State {
        let (op, inputs, custom_name) = action.into_op(self);
        let mut state = State::from_vertex(
            Vertex {
                op: pb::op::Op::File(op),
                inputs,
                platform: None,
                custom_name,
            },
            0,
        );
        state.cwd = self.cwd.clone();
        state.env = self.env.clone();
        state
    }

    /// Layer `states` on top of each other, later states winning on conflict.
    /// Scratch inputs are skipped.
    pub fn merge(states: &[State]) -> State {
        let layers: Vec<&State> = states.iter().filter(|s| !s.is_scratch()).collect();
        match layers.as_slice() {
            [] => State::scratch(),
            [single] => (*single).clone(),
            _ => {
                let mut inputs = Vec::new();
                let merge_inputs = layers
                    .iter()
                    .map(|s| pb::MergeInput {
                        input: input_index(&mut inputs, s.output.as_ref()),
                    })
                    .collect();
                State::from_vertex(
                    Vertex {
                        op: pb::op::Op::Merge(pb::MergeOp {
                            inputs: merge_inputs,
                        }),
                        inputs,
                        platform: None,
                        custom_name: None,
                    },
                    0,
                )
            }
        }
    }

    /// Serialize the graph rooted at this state.
    pub fn marshal(&self, platform: &Platform) -> Result<Definition> {
        Definition::marshal(self, platform)
    }
}

/// Resolve `path` against `base` the way a shell `cd` would.
pub(crate) fn join_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        format!("/{}", path)
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llb::exec::{sh, Mount};
    use crate::llb::CacheSharing;

    #[test]
    fn test_scratch_has_no_output() {
        assert!(State::scratch().is_scratch());
        assert!(!State::image("alpine").is_scratch());
    }

    #[test]
    fn test_dir_joins_relative_paths() {
        let st = State::scratch().dir("/usr/local").dir("toolkit");
        assert_eq!(st.get_dir(), "/usr/local/toolkit");
        let st = st.dir("/build");
        assert_eq!(st.get_dir(), "/build");
    }

    #[test]
    fn test_run_outputs_writable_bind_mounts_only() {
        let base = State::image("alpine");
        let src = State::image("busybox");
        let exec = base
            .run(&[
                sh("true"),
                crate::llb::add_mount(Mount::bind("/out", &State::scratch())),
                crate::llb::add_mount(Mount::bind("/src", &src).readonly()),
                crate::llb::add_mount(Mount::cache("/cache", "c", CacheSharing::Locked)),
                crate::llb::add_mount(Mount::tmpfs("/tmp")),
            ])
            .unwrap();

        assert!(exec.get_mount("/out").is_ok());
        assert!(exec.get_mount("/src").is_err());
        assert!(exec.get_mount("/cache").is_err());
        assert!(exec.get_mount("/tmp").is_err());
    }

    #[test]
    fn test_run_rejects_missing_args() {
        let err = State::image("alpine").run(&[]).unwrap_err();
        assert!(err.to_string().contains("argument"));
    }

    #[test]
    fn test_merge_skips_scratch() {
        let a = State::image("alpine");
        assert!(State::merge(&[]).is_scratch());
        let merged = State::merge(&[State::scratch(), a.clone()]);
        assert!(Arc::ptr_eq(
            &merged.output.as_ref().unwrap().vertex,
            &a.output.as_ref().unwrap().vertex
        ));
    }

    #[test]
    fn test_exec_root_keeps_state_metadata() {
        let st = State::image("alpine").dir("/work").add_env("A", "1");
        let root = st.run(&[sh("true")]).unwrap().root();
        assert_eq!(root.get_dir(), "/work");
        assert_eq!(root.get_env("A"), Some("1"));
    }
}
