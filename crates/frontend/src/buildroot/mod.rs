//! The rpmbuild tree: `SPECS/<name>/<name>.spec` and `SOURCES/`.

mod sources;
pub mod specfile;

pub use sources::sources;

use crate::context::BuildContext;
use anyhow::Result;
use rpmbundle_buildkit::llb::{CopyInfo, FileAction, State};
use rpmbundle_core::Spec;
use tracing::debug;

pub const SPECS_DIR: &str = "/SPECS";
pub const SOURCES_DIR: &str = "/SOURCES";

/// Path of the generated spec inside the buildroot.
pub fn spec_path(spec: &Spec) -> String {
    format!("{}/{}/{}.spec", SPECS_DIR, spec.name, spec.name)
}

/// A tree holding only the generated `.spec`.
pub fn spec_files(spec: &Spec) -> State {
    let dir = format!("{}/{}", SPECS_DIR, spec.name);
    State::scratch().file(
        FileAction::mkdir(dir, 0o755, true)
            .then(FileAction::mkfile(spec_path(spec), 0o644, specfile::render(spec)))
            .named(format!("[spec] {}", spec_path(spec))),
    )
}

/// `SPECS/` and `SOURCES/` together, sources packed by `worker`.
pub fn buildroot(spec: &Spec, worker: &State, ctx: &BuildContext) -> Result<State> {
    let sources = sources(spec, worker, ctx)?;
    debug!("Assembling buildroot for {}", spec);
    Ok(combine(&[spec_files(spec), sources], ctx))
}

/// Layer trees onto one filesystem, later trees winning. Without merge
/// support each tree is copied in turn onto scratch.
pub(crate) fn combine(parts: &[State], ctx: &BuildContext) -> State {
    if ctx.supports_merge() {
        return State::merge(parts);
    }

    let mut chain: Option<FileAction> = None;
    for part in parts {
        let copy = FileAction::copy(
            part,
            "/",
            "/",
            CopyInfo::new()
                .dir_contents_only()
                .create_dest_path()
                .allow_wildcard(),
        );
        chain = Some(match chain {
            Some(prev) => prev.then(copy),
            None => copy,
        });
    }
    match chain {
        Some(chain) => State::scratch().file(chain),
        None => State::scratch(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpmbundle_buildkit::Platform;

    fn spec() -> Spec {
        serde_yaml::from_str(
            r#"
name: hello
version: "1.0"
revision: "2"
sources:
  src:
    git:
      url: https://github.com/example/hello.git
      commit: v1.0
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_spec_path_layout() {
        assert_eq!(spec_path(&spec()), "/SPECS/hello/hello.spec");
    }

    #[test]
    fn test_spec_files_holds_rendered_spec() {
        let def = spec_files(&spec()).marshal(&Platform::default()).unwrap();
        let files: Vec<_> = def.file_ops().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].actions.len(), 2);

        let dump = def.describe();
        assert!(dump.contains("MKDIR /SPECS/hello"));
        assert!(dump.contains("MKFILE /SPECS/hello/hello.spec"));
        assert_eq!(def.exec_ops().count(), 0);
    }

    #[test]
    fn test_buildroot_layers_specs_and_sources() {
        let ctx = BuildContext::new(Platform::default());
        let worker = State::image("example.com/worker:1");
        let def = buildroot(&spec(), &worker, &ctx)
            .unwrap()
            .marshal(&ctx.platform)
            .unwrap();
        let dump = def.describe();
        assert!(dump.contains("MERGE"));
        assert!(dump.contains("MKFILE /SPECS/hello/hello.spec"));
        assert!(dump.contains("src.tar.gz"));
    }

    #[test]
    fn test_combine_without_merge_copies() {
        let ctx = BuildContext::new(Platform::default()).with_caps(Vec::<String>::new());
        let a = State::scratch().file(FileAction::mkdir("/a", 0o755, true));
        let b = State::scratch().file(FileAction::mkdir("/b", 0o755, true));

        let def = combine(&[a, b], &ctx).marshal(&ctx.platform).unwrap();
        let dump = def.describe();
        assert!(!dump.contains("MERGE"));
        assert_eq!(dump.matches("COPY / /").count(), 2);
    }
}
