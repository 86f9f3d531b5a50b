use super::specfile::source_file_name;
use super::{combine, SOURCES_DIR};
use crate::context::BuildContext;
use anyhow::{Context, Result};
use rpmbundle_buildkit::llb::{self, CopyInfo, FileAction, LocalOptions, Mount, State};
use rpmbundle_core::spec::{InlineFile, InlineSource};
use rpmbundle_core::{Source, SourceKind, Spec};
use tracing::debug;

const DEFAULT_FILE_MODE: i32 = 0o644;

/// `SOURCES/` with one entry per spec source: directory sources packed as
/// `<name>.tar.gz` by `worker`, file sources copied as is.
pub fn sources(spec: &Spec, worker: &State, ctx: &BuildContext) -> Result<State> {
    let mut parts = Vec::with_capacity(spec.sources.len());
    for (name, source) in &spec.sources {
        let part = source_layer(spec, name, source, worker, ctx)
            .with_context(|| format!("Failed to prepare source '{}'", name))?;
        parts.push(part);
    }

    if parts.is_empty() {
        return Ok(State::scratch().file(FileAction::mkdir(SOURCES_DIR, 0o755, true)));
    }
    Ok(combine(&parts, ctx))
}

fn source_layer(
    spec: &Spec,
    name: &str,
    source: &Source,
    worker: &State,
    ctx: &BuildContext,
) -> Result<State> {
    let file = source_file_name(spec, name);
    let dest = format!("{}/{}", SOURCES_DIR, file);

    let kind = source
        .kind()
        .with_context(|| format!("source '{}' has no type", name))?;
    debug!("Preparing source '{}' as {}", name, dest);

    match kind {
        SourceKind::Http(http) => {
            let fetched = State::http(&http.url, Some(name));
            Ok(State::scratch().file(FileAction::copy(
                &fetched,
                format!("/{}", name),
                dest,
                CopyInfo::new().create_dest_path(),
            )))
        }
        SourceKind::Inline(InlineSource {
            file: Some(inline), ..
        }) => Ok(State::scratch().file(
            FileAction::mkdir(SOURCES_DIR, 0o755, true).then(mkfile(&dest, inline)),
        )),
        _ => {
            let (tree, filtered) = fetch_tree(name, source, kind, ctx);
            let tree = select(source, tree, filtered);
            pack(name, &tree, &file, worker)
        }
    }
}

fn mkfile(path: &str, inline: &InlineFile) -> FileAction {
    let mode = inline
        .permissions
        .map(|p| p as i32)
        .unwrap_or(DEFAULT_FILE_MODE);
    FileAction::mkfile(path, mode, inline.contents.as_bytes())
}

/// The source tree, and whether the include/exclude filters were already
/// applied while fetching it.
fn fetch_tree(
    name: &str,
    source: &Source,
    kind: SourceKind<'_>,
    ctx: &BuildContext,
) -> (State, bool) {
    let tree = match kind {
        SourceKind::Git(git) => State::git(&git.url, &git.commit, git.keep_git_dir),
        SourceKind::Context(context) => match ctx.named_context(&context.name) {
            Some(state) => state.clone(),
            // local sources filter on the client
            None => {
                let local = State::local_with(
                    &context.name,
                    &LocalOptions {
                        include_patterns: source.includes.clone(),
                        exclude_patterns: source.excludes.clone(),
                        shared_key_hint: Some(context.name.clone()),
                    },
                );
                return (local, true);
            }
        },
        SourceKind::Inline(inline) => {
            let files = inline.dir.as_ref().map(|d| &d.files);
            let mut action: Option<FileAction> = None;
            for (file, content) in files.into_iter().flatten() {
                let next = mkfile(&format!("/{}", file), content);
                action = Some(match action {
                    Some(prev) => prev.then(next),
                    None => next,
                });
            }
            match action {
                Some(action) => State::scratch().file(action.named(format!("inline {}", name))),
                None => State::scratch(),
            }
        }
        SourceKind::Http(http) => State::http(&http.url, Some(name)),
    };
    (tree, false)
}

/// Narrow a fetched tree to `path` and the include/exclude filters.
fn select(source: &Source, tree: State, filters_applied: bool) -> State {
    let has_filters =
        !filters_applied && (!source.includes.is_empty() || !source.excludes.is_empty());
    if source.path.is_none() && !has_filters {
        return tree;
    }

    let mut info = CopyInfo::new().dir_contents_only().create_dest_path();
    if !filters_applied {
        info = info
            .include(source.includes.iter().cloned())
            .exclude(source.excludes.iter().cloned());
    }
    let from = source.path.as_deref().unwrap_or("/");
    State::scratch().file(FileAction::copy(&tree, from, "/", info))
}

fn pack(name: &str, tree: &State, file: &str, worker: &State) -> Result<State> {
    let script = format!(
        "mkdir -p /out{dir} && tar --sort=name --owner=0 --group=0 --numeric-owner -C /src -cf - . | gzip -n > /out{dir}/{file}",
        dir = SOURCES_DIR,
        file = file
    );
    let exec = worker.run(&[
        llb::sh(script),
        llb::add_mount(Mount::bind("/src", tree).readonly()),
        llb::add_mount(Mount::bind("/out", &State::scratch())),
        llb::custom_name(format!("[sources] pack {}", name)),
    ])?;
    exec.get_mount("/out")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpmbundle_buildkit::proto::pb;
    use rpmbundle_buildkit::Platform;

    fn worker() -> State {
        State::image("example.com/rpmbundle/worker:1")
    }

    fn spec(yaml: &str) -> Spec {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn mixed() -> Spec {
        spec(
            r#"
name: hello
version: "1"
revision: "1"
sources:
  src:
    git:
      url: https://github.com/example/hello.git
      commit: v1
    path: cmd
  notes.txt:
    inline:
      file:
        contents: hi
        permissions: 384
  vendor.tgz:
    http:
      url: https://example.com/vendor.tgz
"#,
        )
    }

    fn merge_count(def: &rpmbundle_buildkit::Definition) -> usize {
        def.ops()
            .filter(|(_, op)| matches!(op.op, Some(pb::op::Op::Merge(_))))
            .count()
    }

    #[test]
    fn test_only_directories_are_packed() {
        let ctx = BuildContext::new(Platform::default());
        let def = sources(&mixed(), &worker(), &ctx)
            .unwrap()
            .marshal(&ctx.platform)
            .unwrap();

        let scripts: Vec<String> = def
            .exec_ops()
            .map(|e| e.meta.as_ref().unwrap().args.join(" "))
            .collect();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("/out/SOURCES/src.tar.gz"));

        let ids = def.source_identifiers();
        assert!(ids.contains(&"git://github.com/example/hello.git#v1"));
        assert!(ids.contains(&"https://example.com/vendor.tgz"));
        assert_eq!(merge_count(&def), 1);
    }

    #[test]
    fn test_chained_copies_without_merge() {
        let ctx = BuildContext::new(Platform::default()).with_caps(Vec::<String>::new());
        let def = sources(&mixed(), &worker(), &ctx)
            .unwrap()
            .marshal(&ctx.platform)
            .unwrap();
        assert_eq!(merge_count(&def), 0);
        assert_eq!(def.exec_ops().count(), 1);
    }

    #[test]
    fn test_context_source_prefers_named_context() {
        let spec = spec(
            r#"
name: hello
version: "1"
revision: "1"
sources:
  app:
    context:
      name: app
"#,
        );
        let ctx = BuildContext::new(Platform::default())
            .with_named_context("app", State::image("example.com/app-src:1"));
        let def = sources(&spec, &worker(), &ctx)
            .unwrap()
            .marshal(&ctx.platform)
            .unwrap();
        let ids = def.source_identifiers();
        assert!(ids.contains(&"docker-image://example.com/app-src:1"));
        assert!(!ids.iter().any(|id| id.starts_with("local://")));

        let plain = BuildContext::new(Platform::default());
        let def = sources(&spec, &worker(), &plain)
            .unwrap()
            .marshal(&plain.platform)
            .unwrap();
        assert!(def.source_identifiers().contains(&"local://app"));
    }

    #[test]
    fn test_named_context_keeps_source_filters() {
        let spec = spec(
            r#"
name: hello
version: "1"
revision: "1"
sources:
  app:
    context:
      name: app
    includes: ["src/**"]
    excludes: ["secrets/**"]
"#,
        );
        let ctx = BuildContext::new(Platform::default())
            .with_named_context("app", State::image("example.com/app-src:1"));
        let def = sources(&spec, &worker(), &ctx)
            .unwrap()
            .marshal(&ctx.platform)
            .unwrap();
        let dump = def.describe();
        assert!(dump.contains("include=src/**"), "{}", dump);
        assert!(dump.contains("exclude=secrets/**"), "{}", dump);

        // the local source carries the filters itself, no extra copy
        let plain = BuildContext::new(Platform::default());
        let def = sources(&spec, &worker(), &plain)
            .unwrap()
            .marshal(&plain.platform)
            .unwrap();
        assert!(!def.describe().contains("exclude=secrets/**"));
    }

    #[test]
    fn test_no_sources_still_creates_dir() {
        let spec = spec("name: a\nversion: '1'\nrevision: '1'\n");
        let ctx = BuildContext::new(Platform::default());
        let def = sources(&spec, &worker(), &ctx)
            .unwrap()
            .marshal(&ctx.platform)
            .unwrap();
        assert_eq!(def.exec_ops().count(), 0);
        assert_eq!(def.file_ops().count(), 1);
        assert!(def.describe().contains("/SOURCES"));
    }
}
