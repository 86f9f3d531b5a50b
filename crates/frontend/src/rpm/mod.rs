//! RPM pipelines. Toolkit distros go through the mariner toolkit, the rest
//! through plain `rpmbuild`.

mod rpmbuild;
mod toolkit;

pub use toolkit::{package_build_env, toolkit_mounts};

use crate::context::BuildContext;
use crate::distro::{DistroHandler, Pipeline};
use crate::error::FrontendError;
use rpmbundle_buildkit::llb::{CopyInfo, FileAction, State};
use rpmbundle_core::Spec;
use tracing::info;

/// Top level directories kept from a build's output tree.
pub const PACKAGE_DIRS: [&str; 2] = ["RPMS", "SRPMS"];

/// Build the packages for `spec` on `distro`. The result holds only
/// `RPMS/` and `SRPMS/`.
pub fn build_rpm(
    spec: &Spec,
    distro: &dyn DistroHandler,
    ctx: &BuildContext,
) -> Result<State, FrontendError> {
    info!(
        "Building {} for {} via {:?} pipeline",
        spec,
        distro.full_name(),
        distro.pipeline()
    );
    match distro.pipeline() {
        Pipeline::Toolkit => toolkit::build(spec, distro, ctx),
        Pipeline::Rpmbuild => rpmbuild::build(spec, distro, ctx),
    }
}

/// Copy the package directories under `out_dir` of `st` onto scratch.
pub(crate) fn extract_packages(st: &State, out_dir: &str) -> State {
    State::scratch().file(
        FileAction::copy(
            st,
            out_dir,
            "/",
            CopyInfo::new()
                .dir_contents_only()
                .include(PACKAGE_DIRS)
                .create_dest_path(),
        )
        .named("[extract] RPMS SRPMS"),
    )
}

/// Run `command`; on failure print every file matching `log_glob` and
/// exit 1 so the build logs land in the step output.
pub fn with_log_fallback(command: &str, log_glob: &str) -> String {
    format!("{} || (cat {}; exit 1)", command, log_glob)
}
