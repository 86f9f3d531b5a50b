use super::state::{input_index, join_path, Output, State};
use crate::proto::pb;

/// Copy behaviour flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyInfo {
    pub dir_contents_only: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub create_dest_path: bool,
    pub allow_wildcard: bool,
    pub allow_empty_wildcard: bool,
}

impl CopyInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir_contents_only(mut self) -> Self {
        self.dir_contents_only = true;
        self
    }

    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn create_dest_path(mut self) -> Self {
        self.create_dest_path = true;
        self
    }

    pub fn allow_wildcard(mut self) -> Self {
        self.allow_wildcard = true;
        self
    }
}

#[derive(Debug, Clone)]
enum Action {
    Copy {
        source: State,
        src: String,
        dest: String,
        info: CopyInfo,
    },
    Mkfile {
        path: String,
        mode: i32,
        data: Vec<u8>,
    },
    Mkdir {
        path: String,
        mode: i32,
        make_parents: bool,
    },
}

/// A chain of filesystem actions applied in order to one base state.
#[derive(Debug, Clone)]
pub struct FileAction {
    actions: Vec<Action>,
    custom_name: Option<String>,
}

impl FileAction {
    fn single(action: Action) -> Self {
        Self {
            actions: vec![action],
            custom_name: None,
        }
    }

    pub fn copy(
        source: &State,
        src: impl Into<String>,
        dest: impl Into<String>,
        info: CopyInfo,
    ) -> Self {
        Self::single(Action::Copy {
            source: source.clone(),
            src: src.into(),
            dest: dest.into(),
            info,
        })
    }

    pub fn mkfile(path: impl Into<String>, mode: i32, data: impl Into<Vec<u8>>) -> Self {
        Self::single(Action::Mkfile {
            path: path.into(),
            mode,
            data: data.into(),
        })
    }

    pub fn mkdir(path: impl Into<String>, mode: i32, make_parents: bool) -> Self {
        Self::single(Action::Mkdir {
            path: path.into(),
            mode,
            make_parents,
        })
    }

    pub fn then(mut self, next: FileAction) -> Self {
        self.actions.extend(next.actions);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    /// Each action after the first takes the previous action's result as
    /// its input, addressed past the end of the op inputs. Only the last
    /// action produces output 0.
    pub(crate) fn into_op(self, base: &State) -> (pb::FileOp, Vec<Output>, Option<String>) {
        let cwd = base.get_dir().to_string();
        let mut inputs = Vec::new();
        let base_index = input_index(&mut inputs, base.output.as_ref());

        let secondaries: Vec<i64> = self
            .actions
            .iter()
            .map(|action| match action {
                Action::Copy { source, .. } => input_index(&mut inputs, source.output.as_ref()),
                _ => -1,
            })
            .collect();

        let n_inputs = inputs.len() as i64;
        let last = self.actions.len().saturating_sub(1);

        let actions = self
            .actions
            .into_iter()
            .zip(secondaries)
            .enumerate()
            .map(|(i, (action, secondary_input))| {
                let input = if i == 0 {
                    base_index
                } else {
                    n_inputs + (i as i64 - 1)
                };
                let output = if i == last { 0 } else { -1 };
                let action = match action {
                    Action::Copy {
                        source,
                        src,
                        dest,
                        info,
                    } => pb::file_action::Action::Copy(pb::FileActionCopy {
                        src: join_path(source.get_dir(), &src),
                        dest: join_path(&cwd, &dest),
                        mode: -1,
                        follow_symlink: false,
                        dir_copy_contents: info.dir_contents_only,
                        attempt_unpack_docker_compatibility: false,
                        create_dest_path: info.create_dest_path,
                        allow_wildcard: info.allow_wildcard,
                        allow_empty_wildcard: info.allow_empty_wildcard,
                        timestamp: -1,
                        include_patterns: info.include_patterns,
                        exclude_patterns: info.exclude_patterns,
                    }),
                    Action::Mkfile { path, mode, data } => {
                        pb::file_action::Action::Mkfile(pb::FileActionMkFile {
                            path: join_path(&cwd, &path),
                            mode,
                            data,
                            timestamp: -1,
                        })
                    }
                    Action::Mkdir {
                        path,
                        mode,
                        make_parents,
                    } => pb::file_action::Action::Mkdir(pb::FileActionMkDir {
                        path: join_path(&cwd, &path),
                        mode,
                        make_parents,
                        timestamp: -1,
                    }),
                };
                pb::FileAction {
                    input,
                    secondary_input,
                    output,
                    action: Some(action),
                }
            })
            .collect();

        (pb::FileOp { actions }, inputs, self.custom_name)
    }
}
