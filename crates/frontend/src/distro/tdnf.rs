use super::{
    cache_dir_under, install_script, CacheTable, DistroHandler, InstallOpts, Pipeline, Toolkit,
};
use async_trait::async_trait;
use rpmbundle_buildkit::llb::{self, CacheSharing, Mount, RunOption};

const MARINER2_REF: &str = "mcr.microsoft.com/cbl-mariner/base/core:2.0";
const AZLINUX3_REF: &str = "mcr.microsoft.com/azurelinux/base/core:3.0";
const PHOTON5_REF: &str = "docker.io/photon:5";

/// A tdnf based distro (CBL-Mariner, Azure Linux, Photon).
#[derive(Debug, Clone)]
pub struct TdnfDistro {
    key: String,
    full_name: String,
    image: String,
    release_version: Option<String>,
    cache_dir: String,
    cache_table: CacheTable,
    toolchain: Vec<String>,
    base_packages: Vec<String>,
    toolkit: Option<Toolkit>,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl TdnfDistro {
    /// CBL-Mariner 2.0, built with the mariner toolkit.
    pub fn mariner2() -> Self {
        Self {
            key: "mariner2".to_string(),
            full_name: "CBL-Mariner 2.0".to_string(),
            image: MARINER2_REF.to_string(),
            release_version: Some("2.0".to_string()),
            cache_dir: "/var/tdnf/cache".to_string(),
            cache_table: CacheTable::new("mariner2", "tdnf").with_toolkit("mariner2"),
            toolchain: owned(&[
                "binutils",
                "bison",
                "ca-certificates",
                "curl",
                "gawk",
                "git",
                "glibc-devel",
                "kernel-headers",
                "make",
                "msft-golang",
                "python",
                "rpm",
                "rpm-build",
                "tar",
                "wget",
            ]),
            base_packages: owned(&["distroless-packages-minimal", "prebuilt-ca-certificates"]),
            toolkit: Some(Toolkit::mariner2()),
        }
    }

    pub fn azlinux3() -> Self {
        Self {
            key: "azlinux3".to_string(),
            full_name: "Azure Linux 3".to_string(),
            image: AZLINUX3_REF.to_string(),
            release_version: Some("3.0".to_string()),
            cache_dir: "/var/cache/tdnf".to_string(),
            cache_table: CacheTable::new("azlinux3", "tdnf"),
            toolchain: owned(&[
                "rpm-build",
                "azurelinux-rpm-macros",
                "build-essential",
                "ca-certificates",
                "tar",
            ]),
            base_packages: owned(&["distroless-packages-minimal", "prebuilt-ca-certificates"]),
            toolkit: None,
        }
    }

    pub fn photon5() -> Self {
        Self {
            key: "photon5".to_string(),
            full_name: "Photon 5".to_string(),
            image: PHOTON5_REF.to_string(),
            release_version: Some("5.0".to_string()),
            cache_dir: "/var/cache/tdnf".to_string(),
            cache_table: CacheTable::new("photon5", "tdnf"),
            toolchain: owned(&[
                "rpm-build",
                "mariner-rpm-macros",
                "build-essential",
                "ca-certificates",
                "tar",
            ]),
            base_packages: owned(&["ca-certificates"]),
            toolkit: None,
        }
    }

    /// Swap the pinned toolkit image. No effect on distros without a toolkit.
    pub fn with_toolkit_image(mut self, image: impl Into<String>) -> Self {
        if let Some(toolkit) = self.toolkit.as_mut() {
            toolkit.image = image.into();
        }
        self
    }
}

#[async_trait]
impl DistroHandler for TdnfDistro {
    fn key(&self) -> &str {
        &self.key
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn image_ref(&self) -> &str {
        &self.image
    }

    fn pipeline(&self) -> Pipeline {
        if self.toolkit.is_some() {
            Pipeline::Toolkit
        } else {
            Pipeline::Rpmbuild
        }
    }

    fn cache_table(&self) -> &CacheTable {
        &self.cache_table
    }

    fn toolchain_packages(&self) -> &[String] {
        &self.toolchain
    }

    fn base_packages(&self) -> Vec<String> {
        self.base_packages.clone()
    }

    fn toolkit(&self) -> Option<&Toolkit> {
        self.toolkit.as_ref()
    }

    fn install(&self, packages: &[String], opts: &InstallOpts) -> RunOption {
        let script = install_script("tdnf", packages, self.release_version.as_deref(), opts);
        let cache_dir = cache_dir_under(opts.root.as_deref(), &self.cache_dir);
        llb::with_run_options([
            llb::sh(script),
            llb::add_mount(Mount::cache(
                cache_dir,
                self.cache_table.package_manager(),
                CacheSharing::Locked,
            )),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpmbundle_buildkit::llb::{ExecInfo, State};

    #[test]
    fn test_mariner2_uses_toolkit() {
        let distro = TdnfDistro::mariner2();
        assert_eq!(distro.pipeline(), Pipeline::Toolkit);
        assert_eq!(distro.cache_table().package_manager(), "mariner2-tdnf-cache");
        assert_eq!(distro.image_ref(), MARINER2_REF);
        assert_eq!(distro.worker_context_name(), "rpmbundle-mariner2-worker");
    }

    #[test]
    fn test_photon5_identity() {
        let distro = TdnfDistro::photon5();
        assert_eq!(distro.full_name(), "Photon 5");
        assert_eq!(distro.base_packages(), vec!["ca-certificates"]);
        assert_eq!(distro.pipeline(), Pipeline::Rpmbuild);
        assert!(distro.toolkit().is_none());
        // photon and azure linux must not share a package cache
        assert_ne!(
            distro.cache_table().package_manager(),
            TdnfDistro::azlinux3().cache_table().package_manager()
        );
    }

    #[test]
    fn test_install_command() {
        let distro = TdnfDistro::mariner2();
        let info = ExecInfo::with_options(
            &State::scratch(),
            &[distro.install(&owned(&["jq", "zlib-devel"]), &InstallOpts::default())],
        );
        assert_eq!(info.args, vec!["/bin/sh", "-c", "tdnf install -y jq zlib-devel"]);
        assert_eq!(info.mounts.len(), 1);
        assert_eq!(info.mounts[0].dest, "/var/tdnf/cache");
    }

    #[test]
    fn test_install_into_root_pins_release() {
        let distro = TdnfDistro::azlinux3();
        let info = ExecInfo::with_options(
            &State::scratch(),
            &[distro.install(&owned(&["bash"]), &InstallOpts::root("/out/"))],
        );
        assert_eq!(
            info.args[2],
            "tdnf install -y --releasever=3.0 --installroot=/out/ bash"
        );
        assert_eq!(info.mounts[0].dest, "/out/var/cache/tdnf");
    }

    #[test]
    fn test_toolkit_image_override() {
        let distro = TdnfDistro::mariner2().with_toolkit_image("example.com/toolkit:dev");
        assert_eq!(distro.toolkit().unwrap().image, "example.com/toolkit:dev");

        let photon = TdnfDistro::photon5().with_toolkit_image("example.com/toolkit:dev");
        assert!(photon.toolkit().is_none());
    }
}
