use super::{extract_packages, with_log_fallback};
use crate::buildroot::{self, SPECS_DIR};
use crate::context::BuildContext;
use crate::distro::{CachePurpose, CacheTable, DistroHandler, Toolkit};
use crate::error::{FrontendError, Stage, StageContext};
use anyhow::{anyhow, Context, Result};
use rpmbundle_buildkit::llb::{self, CacheSharing, Mount, RunOption, SecurityMode, State};
use rpmbundle_core::Spec;
use tracing::{debug, info};

const TOOLCHAIN_CMD: &str = "make -j$(nproc) toolchain chroot-tools REBUILD_TOOLS=y";
const BUILD_PACKAGES_CMD: &str = "make -j$(nproc) build-packages";

fn cache_id(caches: &CacheTable, purpose: CachePurpose) -> Result<&str> {
    caches
        .get(purpose)
        .with_context(|| format!("no cache id configured for {:?}", purpose))
}

/// Toolkit checkout, chroot scratch space and the toolkit RPM cache.
///
/// The same option is applied to every toolkit step so the mounts are
/// identical each time.
pub fn toolkit_mounts(toolkit: &Toolkit, caches: &CacheTable) -> Result<RunOption> {
    let toolkit_cache = cache_id(caches, CachePurpose::Toolkit)?;
    let rpm_cache = cache_id(caches, CachePurpose::ToolkitRpms)?;

    Ok(llb::with_run_options([
        llb::add_mount(Mount::cache_from(
            toolkit.path.as_str(),
            &State::image(&toolkit.image),
            toolkit_cache,
            CacheSharing::Private,
        )),
        llb::add_env("CHROOT_DIR", toolkit.chroot_dir.as_str()),
        llb::add_mount(Mount::tmpfs(toolkit.chroot_dir.as_str())),
        llb::add_env("CACHED_RPMS_DIR", toolkit.cached_rpms_dir.as_str()),
        llb::add_mount(Mount::cache(
            toolkit.cached_rpms_dir.as_str(),
            rpm_cache,
            CacheSharing::Locked,
        )),
    ]))
}

/// Environment the toolkit reads when building packages. `VERSION` and
/// `BUILD_NUMBER` are taken verbatim from the spec.
pub fn package_build_env(spec: &Spec, toolkit: &Toolkit) -> RunOption {
    llb::with_run_options([
        llb::add_env("SPECS_DIR", toolkit.specs_dir.as_str()),
        llb::add_env("OUT_DIR", toolkit.out_dir.as_str()),
        llb::add_env("PROJECT_DIR", toolkit.project_dir.as_str()),
        llb::add_env("VERSION", spec.version.as_str()),
        llb::add_env("BUILD_NUMBER", spec.revision.as_str()),
        llb::add_env("REFRESH_WORKER_CHROOT", "n"),
    ])
}

fn pkgbuild_scratch(toolkit: &Toolkit) -> RunOption {
    llb::with_run_options([
        llb::add_env("PKGBUILD_DIR", toolkit.pkgbuild_dir.as_str()),
        llb::add_mount(Mount::tmpfs(toolkit.pkgbuild_dir.as_str())),
    ])
}

fn go_caches(toolkit: &Toolkit, caches: &CacheTable) -> Result<RunOption> {
    Ok(llb::with_run_options([
        llb::add_mount(Mount::cache(
            toolkit.go_build_cache_dir.as_str(),
            cache_id(caches, CachePurpose::GoBuild)?,
            CacheSharing::Shared,
        )),
        llb::add_mount(Mount::cache(
            toolkit.go_mod_cache_dir.as_str(),
            cache_id(caches, CachePurpose::GoMod)?,
            CacheSharing::Shared,
        )),
    ]))
}

pub(super) fn build(
    spec: &Spec,
    distro: &dyn DistroHandler,
    ctx: &BuildContext,
) -> Result<State, FrontendError> {
    let toolkit = distro
        .toolkit()
        .ok_or_else(|| anyhow!("{} has no build toolkit configured", distro.full_name()))
        .stage(Stage::Toolchain)?;
    let caches = distro.cache_table();
    let tag = distro.key();

    info!("[1/5] Preparing {} toolkit environment", distro.full_name());
    let base = distro.base(ctx).stage(Stage::Base)?;

    info!("[2/5] Assembling buildroot");
    let buildroot = buildroot::buildroot(spec, &base, ctx).stage(Stage::Buildroot)?;

    info!("[3/5] Bootstrapping toolkit toolchain");
    let mounts = toolkit_mounts(toolkit, caches).stage(Stage::Toolchain)?;
    let toolchain = base
        .dir(&toolkit.path)
        .run(&[
            llb::sh(TOOLCHAIN_CMD),
            mounts.clone(),
            llb::custom_name(format!("[{}] build toolkit toolchain", tag)),
        ])
        .stage(Stage::Toolchain)?
        .root();

    info!("[4/5] Building packages");
    let go = go_caches(toolkit, caches).stage(Stage::PackageBuild)?;
    let script = with_log_fallback(BUILD_PACKAGES_CMD, &toolkit.log_glob);
    debug!("Package build command: {}", script);
    let built = toolchain
        .run(&[
            llb::sh(script),
            mounts,
            pkgbuild_scratch(toolkit),
            llb::add_mount(
                Mount::bind(toolkit.specs_dir.as_str(), &buildroot)
                    .source_path(SPECS_DIR)
                    .readonly(),
            ),
            package_build_env(spec, toolkit),
            llb::security(SecurityMode::Insecure),
            go,
            llb::custom_name(format!("[{}] build packages for {}", tag, spec)),
        ])
        .stage(Stage::PackageBuild)?
        .root();

    info!("[5/5] Extracting RPMS and SRPMS");
    Ok(extract_packages(&built, &toolkit.out_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::TdnfDistro;
    use rpmbundle_buildkit::proto::pb;
    use rpmbundle_buildkit::{Definition, Platform};

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

    fn compile() -> Definition {
        let ctx = BuildContext::new(Platform::default());
        build(&spec(), &TdnfDistro::mariner2(), &ctx)
            .unwrap()
            .marshal(&ctx.platform)
            .unwrap()
    }

    fn exec_running<'a>(def: &'a Definition, needle: &str) -> &'a pb::ExecOp {
        def.exec_ops()
            .find(|e| e.meta.as_ref().unwrap().args.join(" ").contains(needle))
            .unwrap_or_else(|| panic!("no exec running {}", needle))
    }

    fn toolkit_mount_set(exec: &pb::ExecOp) -> Vec<(String, i32, Option<String>)> {
        let toolkit = Toolkit::mariner2();
        let dests = [toolkit.path, toolkit.chroot_dir, toolkit.cached_rpms_dir];
        exec.mounts
            .iter()
            .filter(|m| dests.contains(&m.dest))
            .map(|m| {
                (
                    m.dest.clone(),
                    m.mount_type,
                    m.cache_opt.as_ref().map(|c| c.id.clone()),
                )
            })
            .collect()
    }

    #[test]
    fn test_package_build_env() {
        let def = compile();
        let exec = exec_running(&def, "build-packages");
        let env = &exec.meta.as_ref().unwrap().env;
        for want in [
            "VERSION=1.2.3",
            "BUILD_NUMBER=4",
            "SPECS_DIR=/build/rpmbuild/SPECS",
            "OUT_DIR=/build/out",
            "PROJECT_DIR=/build/project",
            "REFRESH_WORKER_CHROOT=n",
            "PKGBUILD_DIR=/tmp/pkg_build_dir",
            "CHROOT_DIR=/tmp/chroot",
            "CACHED_RPMS_DIR=/root/.cache/mariner2-toolkit-rpm-cache",
        ] {
            assert!(env.iter().any(|e| e == want), "{} not in {:?}", want, env);
        }
        assert_eq!(exec.security, pb::SecurityMode::Insecure as i32);
        assert_eq!(exec.meta.as_ref().unwrap().cwd, "/usr/local/toolkit");
    }

    #[test]
    fn test_build_command_falls_back_to_logs() {
        let def = compile();
        let exec = exec_running(&def, "build-packages");
        assert_eq!(
            exec.meta.as_ref().unwrap().args[2],
            "make -j$(nproc) build-packages || (cat /usr/local/build/logs/pkggen/rpmbuilding/*; exit 1)"
        );
    }

    #[test]
    fn test_specs_mounted_readonly_from_buildroot() {
        let def = compile();
        let exec = exec_running(&def, "build-packages");
        let specs = exec
            .mounts
            .iter()
            .find(|m| m.dest == "/build/rpmbuild/SPECS")
            .unwrap();
        assert!(specs.readonly);
        assert_eq!(specs.selector, "/SPECS");
        assert_eq!(specs.output, -1);
        assert_eq!(specs.mount_type, pb::MountType::Bind as i32);
    }

    #[test]
    fn test_toolkit_mounts_identical_across_stages() {
        let def = compile();
        let toolchain = exec_running(&def, "toolchain chroot-tools");
        let packages = exec_running(&def, "build-packages");

        let a = toolkit_mount_set(toolchain);
        assert_eq!(a.len(), 3);
        assert_eq!(a, toolkit_mount_set(packages));
        assert!(a.contains(&(
            "/usr/local/toolkit".to_string(),
            pb::MountType::Cache as i32,
            Some("mariner2-toolkit-cache".to_string())
        )));
        assert!(a.contains(&(
            "/tmp/chroot".to_string(),
            pb::MountType::Tmpfs as i32,
            None
        )));
    }

    #[test]
    fn test_cache_sharing_modes() {
        let def = compile();
        let exec = exec_running(&def, "build-packages");
        let sharing = |dest: &str| {
            exec.mounts
                .iter()
                .find(|m| m.dest == dest)
                .and_then(|m| m.cache_opt.as_ref())
                .map(|c| c.sharing)
                .unwrap()
        };
        assert_eq!(sharing("/usr/local/toolkit"), pb::CacheSharingOpt::Private as i32);
        assert_eq!(
            sharing("/root/.cache/mariner2-toolkit-rpm-cache"),
            pb::CacheSharingOpt::Locked as i32
        );
        assert_eq!(sharing("/root/.cache/go-build"), pb::CacheSharingOpt::Shared as i32);
        assert_eq!(sharing("/go/pkg/mod"), pb::CacheSharingOpt::Shared as i32);
    }

    #[test]
    fn test_toolchain_stage_uses_toolkit_image() {
        let def = compile();
        assert!(def
            .source_identifiers()
            .contains(&"docker-image://docker.io/cpuguy83/mariner-toolkit:f3fee7cccffb21f1d7abf5ff940ba7db599fd4a2"));
        assert!(def
            .source_identifiers()
            .contains(&"docker-image://mcr.microsoft.com/cbl-mariner/base/core:2.0"));
    }

    #[test]
    fn test_distro_without_toolkit_fails_in_toolchain_stage() {
        let ctx = BuildContext::new(Platform::default());
        let err = build(&spec(), &TdnfDistro::photon5(), &ctx).unwrap_err();
        assert!(matches!(
            err,
            FrontendError::Stage {
                stage: Stage::Toolchain,
                ..
            }
        ));
        assert!(err.to_string().contains("Photon 5"));
    }
}
