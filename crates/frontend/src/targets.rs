//! Build targets and dispatch.

use crate::buildroot;
use crate::context::BuildContext;
use crate::distro::DistroHandler;
use crate::error::{FrontendError, Stage, StageContext};
use crate::rpm;
use anyhow::Context;
use rpmbundle_buildkit::llb::{FileAction, State};
use rpmbundle_buildkit::ImageConfig;
use rpmbundle_core::Spec;
use serde::Serialize;
use tracing::info;

pub const TARGET_BUILDROOT: &str = "buildroot";
pub const TARGET_RESOLVE: &str = "resolve";
pub const TARGET_SPEC: &str = "spec";
pub const TARGET_SOURCES: &str = "sources";
pub const TARGET_RPM: &str = "rpm";

/// File name of the `resolve` target output.
pub const RESOLVED_SPEC_FILE: &str = "spec.yml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

const TARGETS: [Target; 5] = [
    Target {
        name: TARGET_BUILDROOT,
        description: "Outputs an rpm buildroot suitable for passing to rpmbuild.",
        default: false,
    },
    Target {
        name: TARGET_RESOLVE,
        description: "Outputs the resolved yaml spec with build args expanded. This is primarily intended for debugging purposes.",
        default: false,
    },
    Target {
        name: TARGET_SPEC,
        description: "Like buildroot but outputs just SPECS/. This is useful for putting the generated spec into a VCS repository.",
        default: false,
    },
    Target {
        name: TARGET_SOURCES,
        description: "Like buildroot but outputs just SOURCES/. This is useful to pre-hydrate the sources directory.",
        default: false,
    },
    Target {
        name: TARGET_RPM,
        description: "Builds the rpm and outputs to RPMS/<rpmarch>.",
        default: true,
    },
];

pub fn list_targets() -> &'static [Target] {
    &TARGETS
}

pub fn default_target() -> &'static Target {
    // the table always carries exactly one default
    TARGETS.iter().find(|t| t.default).unwrap_or(&TARGETS[4])
}

/// Resolve a requested name; empty selects the default target.
pub fn lookup(name: &str) -> Result<&'static Target, FrontendError> {
    if name.is_empty() {
        return Ok(default_target());
    }
    TARGETS
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| FrontendError::UnknownTarget(name.to_string()))
}

/// Build the graph for `target`. The returned image config is the platform
/// default; none of the targets produce a runnable image.
pub fn dispatch(
    target: &str,
    spec: &Spec,
    distro: &dyn DistroHandler,
    ctx: &BuildContext,
) -> Result<(State, ImageConfig), FrontendError> {
    let target = lookup(target)?;
    info!(
        "Dispatching target '{}' for {} on {} ({})",
        target.name,
        spec,
        distro.full_name(),
        ctx.platform
    );

    let state = match target.name {
        TARGET_BUILDROOT => {
            let worker = distro.base(ctx).stage(Stage::Base)?;
            buildroot::buildroot(spec, &worker, ctx).stage(Stage::Buildroot)?
        }
        TARGET_RESOLVE => resolve(spec).stage(Stage::Resolve)?,
        TARGET_SPEC => buildroot::spec_files(spec),
        TARGET_SOURCES => {
            let worker = distro.base(ctx).stage(Stage::Base)?;
            buildroot::sources(spec, &worker, ctx).stage(Stage::Sources)?
        }
        TARGET_RPM => rpm::build_rpm(spec, distro, ctx)?,
        other => return Err(FrontendError::UnknownTarget(other.to_string())),
    };

    Ok((state, ImageConfig::for_platform(&ctx.platform)))
}

fn resolve(spec: &Spec) -> anyhow::Result<State> {
    let yaml = spec.to_yaml().context("Failed to render resolved spec")?;
    Ok(State::scratch().file(
        FileAction::mkfile(format!("/{}", RESOLVED_SPEC_FILE), 0o644, yaml)
            .named("[resolve] spec.yml"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::{DistroRegistry, TdnfDistro};
    use rpmbundle_buildkit::proto::pb;
    use rpmbundle_buildkit::{Definition, Platform};
    use yare::parameterized;

    fn spec() -> Spec {
        serde_yaml::from_str(
            r#"
name: hello
version: 1.2.3
revision: 4
sources:
  src:
    git:
      url: https://github.com/example/hello.git
      commit: v1.2.3
"#,
        )
        .unwrap()
    }

    fn compile(target: &str, distro: &dyn DistroHandler) -> Definition {
        let ctx = BuildContext::new(Platform::default());
        let (state, _) = dispatch(target, &spec(), distro, &ctx).unwrap();
        state.marshal(&ctx.platform).unwrap()
    }

    #[test]
    fn test_exactly_one_default() {
        let defaults: Vec<_> = list_targets().iter().filter(|t| t.default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, TARGET_RPM);
        assert_eq!(default_target().name, TARGET_RPM);
    }

    #[test]
    fn test_target_names_unique() {
        let mut names: Vec<_> = list_targets().iter().map(|t| t.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), list_targets().len());
    }

    #[parameterized(
        mariner2 = { "mariner2" },
        azlinux3 = { "azlinux3" },
        almalinux9 = { "almalinux9" },
    )]
    fn test_empty_target_is_default(key: &str) {
        let distro = DistroRegistry::with_defaults(None).get(key).unwrap();
        let empty = compile("", distro.as_ref());
        let rpm = compile(TARGET_RPM, distro.as_ref());
        assert_eq!(empty.to_bytes(), rpm.to_bytes());
    }

    #[test]
    fn test_unknown_target() {
        let ctx = BuildContext::new(Platform::default());
        let err = dispatch("nonexistent-target", &spec(), &TdnfDistro::mariner2(), &ctx)
            .unwrap_err();
        assert!(matches!(err, FrontendError::UnknownTarget(ref n) if n == "nonexistent-target"));
        assert!(err.to_string().contains("nonexistent-target"));
    }

    #[test]
    fn test_sources_target_outputs_only_sources() {
        let def = compile(TARGET_SOURCES, &TdnfDistro::mariner2());
        let dump = def.describe();
        assert!(dump.contains("/out/SOURCES/src.tar.gz"));
        assert!(!dump.contains("SPECS"));
        assert!(!def.exec_ops().any(|e| e
            .meta
            .as_ref()
            .unwrap()
            .args
            .join(" ")
            .contains("rpmbuild")));
    }

    #[test]
    fn test_spec_target_needs_no_worker() {
        let def = compile(TARGET_SPEC, &TdnfDistro::mariner2());
        assert_eq!(def.exec_ops().count(), 0);
        assert!(def.source_identifiers().is_empty());
        assert!(def.describe().contains("MKFILE /SPECS/hello/hello.spec"));
    }

    #[test]
    fn test_resolve_target_writes_yaml() {
        let def = compile(TARGET_RESOLVE, &TdnfDistro::photon5());
        let file = def.file_ops().next().unwrap();
        match &file.actions[0].action {
            Some(pb::file_action::Action::Mkfile(f)) => {
                assert_eq!(f.path, "/spec.yml");
                let yaml = String::from_utf8(f.data.clone()).unwrap();
                let back: Spec = serde_yaml::from_str(&yaml).unwrap();
                assert_eq!(back, spec());
            }
            other => panic!("expected mkfile, got {:?}", other),
        }
    }

    #[test]
    fn test_buildroot_target_has_specs_and_sources() {
        let def = compile(TARGET_BUILDROOT, &TdnfDistro::azlinux3());
        let dump = def.describe();
        assert!(dump.contains("MKFILE /SPECS/hello/hello.spec"));
        assert!(dump.contains("/out/SOURCES/src.tar.gz"));
    }

    #[test]
    fn test_rpm_target_on_toolkit_distro() {
        let def = compile(TARGET_RPM, &TdnfDistro::mariner2());
        let build = def
            .exec_ops()
            .find(|e| e.meta.as_ref().unwrap().args.join(" ").contains("build-packages"))
            .unwrap();
        let env = &build.meta.as_ref().unwrap().env;
        assert!(env.contains(&"VERSION=1.2.3".to_string()));
        assert!(env.contains(&"BUILD_NUMBER=4".to_string()));
        assert!(def
            .describe()
            .contains("COPY /build/out / include=RPMS,SRPMS"));
    }

    #[test]
    fn test_concurrent_dispatch_on_two_platforms() {
        let spec = spec();
        let distro = TdnfDistro::mariner2();
        let platforms = [
            Platform::new("linux", "amd64"),
            Platform::new("linux", "arm64"),
        ];

        let results: Vec<Vec<u8>> = std::thread::scope(|s| {
            let handles: Vec<_> = platforms
                .iter()
                .map(|platform| {
                    let spec = &spec;
                    let distro = &distro;
                    s.spawn(move || {
                        let ctx = BuildContext::new(platform.clone());
                        let (state, config) = dispatch(TARGET_RPM, spec, distro, &ctx).unwrap();
                        assert_eq!(config.architecture, platform.architecture);
                        state.marshal(platform).unwrap().to_bytes()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_ne!(results[0], results[1]);

        // each run matches a sequential compile for the same platform
        for (platform, bytes) in platforms.iter().zip(&results) {
            let ctx = BuildContext::new(platform.clone());
            let (state, _) = dispatch(TARGET_RPM, &spec, &distro, &ctx).unwrap();
            assert_eq!(&state.marshal(platform).unwrap().to_bytes(), bytes);
        }
    }
}
