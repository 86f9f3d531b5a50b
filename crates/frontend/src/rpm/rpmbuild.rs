use super::{extract_packages, with_log_fallback};
use crate::buildroot::{self, SOURCES_DIR};
use crate::context::BuildContext;
use crate::distro::{DistroHandler, InstallOpts};
use crate::error::{FrontendError, Stage, StageContext};
use rpmbundle_buildkit::llb::{self, Mount, State};
use rpmbundle_core::Spec;
use tracing::{debug, info};

const BUILDROOT_DIR: &str = "/build/buildroot";
const TOP_DIR: &str = "/build/top";
const OUT_DIR: &str = "/build/out";
const LOG_FILE: &str = "/build/logs/rpmbuild.log";

fn rpmbuild_script(spec: &Spec) -> String {
    let command = format!(
        "rpmbuild -ba \
         --define '_topdir {top}' \
         --define '_sourcedir {root}{sources}' \
         --define '_rpmdir {out}/RPMS' \
         --define '_srcrpmdir {out}/SRPMS' \
         {root}{spec} > {log} 2>&1",
        top = TOP_DIR,
        root = BUILDROOT_DIR,
        sources = SOURCES_DIR,
        out = OUT_DIR,
        spec = buildroot::spec_path(spec),
        log = LOG_FILE,
    );
    format!(
        "mkdir -p /build/logs; {}",
        with_log_fallback(&command, LOG_FILE)
    )
}

pub(super) fn build(
    spec: &Spec,
    distro: &dyn DistroHandler,
    ctx: &BuildContext,
) -> Result<State, FrontendError> {
    let tag = distro.key();

    info!("Preparing {} build environment", distro.full_name());
    let base = distro.base(ctx).stage(Stage::Base)?;

    let buildroot = buildroot::buildroot(spec, &base, ctx).stage(Stage::Buildroot)?;

    let deps: Vec<String> = spec.dependencies.build.keys().cloned().collect();
    let worker = if deps.is_empty() {
        base
    } else {
        info!("Installing {} build dependencies", deps.len());
        base.run(&[
            distro.install(&deps, &InstallOpts::default()),
            llb::custom_name(format!("[{}] install build dependencies", tag)),
        ])
        .stage(Stage::BuildDeps)?
        .root()
    };

    let script = rpmbuild_script(spec);
    debug!("rpmbuild command: {}", script);
    let built = worker
        .run(&[
            llb::sh(script),
            llb::add_mount(Mount::bind(BUILDROOT_DIR, &buildroot).readonly()),
            llb::add_mount(Mount::bind(OUT_DIR, &State::scratch())),
            llb::custom_name(format!("[{}] rpmbuild {}", tag, spec)),
        ])
        .stage(Stage::PackageBuild)?;

    let out = built.get_mount(OUT_DIR).stage(Stage::Extract)?;
    Ok(extract_packages(&out, "/"))
}
