use super::{cache_dir_under, install_script, CacheTable, DistroHandler, InstallOpts, Pipeline};
use async_trait::async_trait;
use rpmbundle_buildkit::llb::{self, CacheSharing, Mount, RunOption};

const DNF_CACHE_DIR: &str = "/var/cache/dnf";

/// A dnf based enterprise linux rebuild (AlmaLinux, Rocky Linux).
#[derive(Debug, Clone)]
pub struct DnfDistro {
    key: String,
    full_name: String,
    image: String,
    release_version: String,
    cache_table: CacheTable,
    toolchain: Vec<String>,
}

impl DnfDistro {
    fn el9(key: &str, full_name: &str, image: &str) -> Self {
        Self {
            key: key.to_string(),
            full_name: full_name.to_string(),
            image: image.to_string(),
            release_version: "9".to_string(),
            cache_table: CacheTable::new(key, "dnf"),
            toolchain: [
                "rpm-build",
                "redhat-rpm-config",
                "gcc",
                "make",
                "ca-certificates",
                "tar",
                "gzip",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    pub fn almalinux9() -> Self {
        Self::el9("almalinux9", "AlmaLinux 9", "docker.io/library/almalinux:9")
    }

    pub fn rockylinux9() -> Self {
        Self::el9("rockylinux9", "Rocky Linux 9", "docker.io/library/rockylinux:9")
    }
}

#[async_trait]
impl DistroHandler for DnfDistro {
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
        Pipeline::Rpmbuild
    }

    fn cache_table(&self) -> &CacheTable {
        &self.cache_table
    }

    fn toolchain_packages(&self) -> &[String] {
        &self.toolchain
    }

    fn base_packages(&self) -> Vec<String> {
        vec!["ca-certificates".to_string()]
    }

    fn install(&self, packages: &[String], opts: &InstallOpts) -> RunOption {
        // dnf drops downloaded packages unless told to keep them
        let script = install_script(
            "dnf --setopt=keepcache=True",
            packages,
            Some(&self.release_version),
            opts,
        );
        let cache_dir = cache_dir_under(opts.root.as_deref(), DNF_CACHE_DIR);
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
