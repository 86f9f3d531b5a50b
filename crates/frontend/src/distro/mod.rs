//! Distro handlers.
//!
//! Everything distro specific (base image, package manager, cache ids) sits
//! behind [`DistroHandler`] so target and pipeline code never name a distro.

mod dnf;
mod tdnf;

pub use dnf::DnfDistro;
pub use tdnf::TdnfDistro;

use crate::context::BuildContext;
use crate::error::FrontendError;
use anyhow::Result;
use async_trait::async_trait;
use rpmbundle_buildkit::llb::{self, RunOption, State};
use rpmbundle_buildkit::{ImageConfig, ImageMetaResolver, Platform};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How RPMs are produced for a distro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// The external mariner build toolkit (`make build-packages`).
    Toolkit,
    /// Plain `rpmbuild -ba` inside the distro image.
    Rpmbuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CachePurpose {
    PackageManager,
    Toolkit,
    ToolkitRpms,
    GoBuild,
    GoMod,
}

/// Cache volume ids owned by one handler. Ids are derived from the distro
/// key so two distros never share a volume.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheTable(BTreeMap<CachePurpose, String>);

impl CacheTable {
    pub fn new(distro: &str, package_manager: &str) -> Self {
        let mut ids = BTreeMap::new();
        ids.insert(
            CachePurpose::PackageManager,
            format!("{}-{}-cache", distro, package_manager),
        );
        Self(ids)
    }

    pub fn with_toolkit(mut self, distro: &str) -> Self {
        self.0
            .insert(CachePurpose::Toolkit, format!("{}-toolkit-cache", distro));
        self.0.insert(
            CachePurpose::ToolkitRpms,
            format!("{}-toolkit-rpm-cache", distro),
        );
        self.0
            .insert(CachePurpose::GoBuild, format!("{}-go-build-cache", distro));
        self.0
            .insert(CachePurpose::GoMod, format!("{}-go-pkg-mod", distro));
        self
    }

    pub fn get(&self, purpose: CachePurpose) -> Option<&str> {
        self.0.get(&purpose).map(String::as_str)
    }

    pub fn package_manager(&self) -> &str {
        self.get(CachePurpose::PackageManager).unwrap_or_default()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }
}

/// Where and how the mariner toolkit runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolkit {
    pub image: String,
    pub path: String,
    pub chroot_dir: String,
    pub cached_rpms_dir: String,
    pub pkgbuild_dir: String,
    pub specs_dir: String,
    pub out_dir: String,
    pub project_dir: String,
    /// Logs written by failed package builds.
    pub log_glob: String,
    pub go_build_cache_dir: String,
    pub go_mod_cache_dir: String,
}

pub const MARINER_TOOLKIT_IMAGE: &str =
    "cpuguy83/mariner-toolkit:f3fee7cccffb21f1d7abf5ff940ba7db599fd4a2";

impl Toolkit {
    pub fn mariner2() -> Self {
        Self {
            image: MARINER_TOOLKIT_IMAGE.to_string(),
            path: "/usr/local/toolkit".to_string(),
            chroot_dir: "/tmp/chroot".to_string(),
            cached_rpms_dir: "/root/.cache/mariner2-toolkit-rpm-cache".to_string(),
            pkgbuild_dir: "/tmp/pkg_build_dir".to_string(),
            specs_dir: "/build/rpmbuild/SPECS".to_string(),
            out_dir: "/build/out".to_string(),
            project_dir: "/build/project".to_string(),
            log_glob: "/usr/local/build/logs/pkggen/rpmbuilding/*".to_string(),
            go_build_cache_dir: "/root/.cache/go-build".to_string(),
            go_mod_cache_dir: "/go/pkg/mod".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOpts {
    /// Install into this directory instead of `/`.
    pub root: Option<String>,
}

impl InstallOpts {
    pub fn root(path: impl Into<String>) -> Self {
        Self {
            root: Some(path.into()),
        }
    }
}

/// Capabilities every supported distro provides.
#[async_trait]
pub trait DistroHandler: Send + Sync + fmt::Debug {
    /// Stable lookup key, e.g. `mariner2`.
    fn key(&self) -> &str;

    /// Human readable name for logs and labels.
    fn full_name(&self) -> &str;

    /// Canonical upstream image the base is derived from.
    fn image_ref(&self) -> &str;

    fn pipeline(&self) -> Pipeline;

    fn cache_table(&self) -> &CacheTable;

    /// Packages `base` installs on top of the upstream image.
    fn toolchain_packages(&self) -> &[String];

    /// Packages every produced image must contain.
    fn base_packages(&self) -> Vec<String>;

    /// A step that installs `packages` with the native package manager,
    /// with this distro's package cache mounted (locked).
    fn install(&self, packages: &[String], opts: &InstallOpts) -> RunOption;

    fn toolkit(&self) -> Option<&Toolkit> {
        None
    }

    /// Named context that, when supplied, replaces the computed base.
    fn worker_context_name(&self) -> String {
        format!("rpmbundle-{}-worker", self.key())
    }

    fn base(&self, ctx: &BuildContext) -> Result<State> {
        if let Some(worker) = ctx.named_context(&self.worker_context_name()) {
            debug!(
                "Using worker override '{}' for {}",
                self.worker_context_name(),
                self.full_name()
            );
            return Ok(worker.clone());
        }

        let exec = State::image(self.image_ref()).run(&[
            self.install(self.toolchain_packages(), &InstallOpts::default()),
            llb::custom_name(format!("[{}] install build toolchain", self.key())),
        ])?;
        Ok(exec.root())
    }

    async fn default_image_config(
        &self,
        resolver: &dyn ImageMetaResolver,
        platform: &Platform,
    ) -> Result<ImageConfig> {
        let raw = resolver
            .resolve_image_config(self.image_ref(), platform)
            .await?;
        ImageConfig::from_json(&raw)
    }
}

/// Install command shared by tdnf and dnf, which take the same flags.
pub(crate) fn install_script(
    manager: &str,
    packages: &[String],
    release_version: Option<&str>,
    opts: &InstallOpts,
) -> String {
    let mut cmd = format!("{} install -y", manager);
    // releasever cannot be read from an empty installroot
    if let Some(root) = &opts.root {
        if let Some(version) = release_version {
            cmd.push_str(&format!(" --releasever={}", version));
        }
        cmd.push_str(&format!(" --installroot={}", root));
    }
    for pkg in packages {
        cmd.push(' ');
        cmd.push_str(pkg);
    }
    cmd
}

pub(crate) fn cache_dir_under(root: Option<&str>, dir: &str) -> String {
    match root {
        Some(root) => format!(
            "{}/{}",
            root.trim_end_matches('/'),
            dir.trim_start_matches('/')
        ),
        None => dir.to_string(),
    }
}

/// Handlers by key.
#[derive(Debug, Clone, Default)]
pub struct DistroRegistry {
    handlers: Vec<Arc<dyn DistroHandler>>,
}

impl DistroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in distros; `toolkit_image` overrides the pinned toolkit.
    pub fn with_defaults(toolkit_image: Option<&str>) -> Self {
        let mut mariner = TdnfDistro::mariner2();
        if let Some(image) = toolkit_image {
            mariner = mariner.with_toolkit_image(image);
        }

        let mut registry = Self::new();
        registry.register(Arc::new(mariner));
        registry.register(Arc::new(TdnfDistro::azlinux3()));
        registry.register(Arc::new(TdnfDistro::photon5()));
        registry.register(Arc::new(DnfDistro::almalinux9()));
        registry.register(Arc::new(DnfDistro::rockylinux9()));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn DistroHandler>) {
        self.handlers.retain(|h| h.key() != handler.key());
        self.handlers.push(handler);
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn DistroHandler>, FrontendError> {
        self.handlers
            .iter()
            .find(|h| h.key() == key)
            .cloned()
            .ok_or_else(|| FrontendError::UnknownDistro {
                name: key.to_string(),
                available: self.keys().join(", "),
            })
    }

    pub fn keys(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.key()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DistroHandler>> {
        self.handlers.iter()
    }
}
