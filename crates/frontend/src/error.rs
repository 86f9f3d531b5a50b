use rpmbundle_core::SpecError;
use std::fmt;
use thiserror::Error;

/// Graph-construction steps, named in stage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Distro base image plus build tooling.
    Base,
    Buildroot,
    Sources,
    Resolve,
    /// Toolkit bootstrap (`make toolchain chroot-tools`).
    Toolchain,
    /// Spec build dependencies for the rpmbuild path.
    BuildDeps,
    PackageBuild,
    Extract,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Base => "base",
            Stage::Buildroot => "buildroot",
            Stage::Sources => "sources",
            Stage::Resolve => "resolve",
            Stage::Toolchain => "toolchain",
            Stage::BuildDeps => "build-deps",
            Stage::PackageBuild => "package-build",
            Stage::Extract => "extract",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("unknown target {0:?}")]
    UnknownTarget(String),

    #[error("unknown distro {name:?} (available: {available})")]
    UnknownDistro { name: String, available: String },

    #[error("could not resolve image config for {distro}: {error:#}")]
    DistroResolution { distro: String, error: anyhow::Error },

    #[error("{stage} stage failed: {error:#}")]
    Stage { stage: Stage, error: anyhow::Error },

    #[error("error marshalling llb: {0:#}")]
    Marshal(anyhow::Error),

    #[error("solve failed: {0:#}")]
    Solve(anyhow::Error),
}

/// Attach a stage to a construction error.
pub(crate) trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, FrontendError>;
}

impl<T> StageContext<T> for anyhow::Result<T> {
    fn stage(self, stage: Stage) -> Result<T, FrontendError> {
        self.map_err(|error| FrontendError::Stage { stage, error })
    }
}
