//! Rendering of the `.spec` file consumed by rpmbuild and the toolkit.

use rpmbundle_core::spec::ArtifactConfig;
use rpmbundle_core::Spec;
use std::collections::{BTreeMap, BTreeSet};

/// File name a source takes inside `SOURCES/`.
pub fn source_file_name(spec: &Spec, name: &str) -> String {
    match spec.sources.get(name) {
        Some(source) if source.is_dir() => format!("{}.tar.gz", name),
        _ => name.to_string(),
    }
}

/// Render the complete RPM spec for `spec`.
pub fn render(spec: &Spec) -> String {
    let mut out = String::new();
    write_preamble(&mut out, spec);
    write_description(&mut out, spec);
    write_prep(&mut out, spec);
    write_build(&mut out, spec);
    write_install(&mut out, spec);
    write_files(&mut out, spec);
    out
}

fn write_preamble(out: &mut String, spec: &Spec) {
    out.push_str(&format!("Name: {}\n", spec.name));
    out.push_str(&format!("Version: {}\n", spec.version));
    out.push_str(&format!("Release: {}%{{?dist}}\n", spec.revision));
    if !spec.license.is_empty() {
        out.push_str(&format!("License: {}\n", spec.license));
    }
    out.push_str(&format!("Summary: {}\n", summary(spec)));
    if let Some(website) = &spec.website {
        out.push_str(&format!("URL: {}\n", website));
    }
    if let Some(vendor) = &spec.vendor {
        out.push_str(&format!("Vendor: {}\n", vendor));
    }
    if let Some(packager) = &spec.packager {
        out.push_str(&format!("Packager: {}\n", packager));
    }
    out.push('\n');

    for (idx, name) in spec.sources.keys().enumerate() {
        out.push_str(&format!("Source{}: {}\n", idx, source_file_name(spec, name)));
    }
    out.push('\n');

    write_requirements(out, "BuildRequires", &spec.dependencies.build);
    write_requirements(out, "Requires", &spec.dependencies.runtime);
}

fn summary(spec: &Spec) -> &str {
    spec.description
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(&spec.name)
}

fn write_requirements(out: &mut String, tag: &str, deps: &BTreeMap<String, Vec<String>>) {
    if deps.is_empty() {
        return;
    }
    for (pkg, constraints) in deps {
        if constraints.is_empty() {
            out.push_str(&format!("{}: {}\n", tag, pkg));
        }
        for constraint in constraints {
            out.push_str(&format!("{}: {} {}\n", tag, pkg, constraint));
        }
    }
    out.push('\n');
}

fn write_description(out: &mut String, spec: &Spec) {
    out.push_str("%description\n");
    let description = spec.description.trim();
    if description.is_empty() {
        out.push_str(&spec.name);
    } else {
        out.push_str(description);
    }
    out.push_str("\n\n");
}

fn write_prep(out: &mut String, spec: &Spec) {
    out.push_str("%prep\n");
    let patches: BTreeSet<&str> = spec.patch_sources().collect();

    for (name, source) in &spec.sources {
        if patches.contains(name.as_str()) {
            continue;
        }
        let file = source_file_name(spec, name);
        if source.is_dir() {
            out.push_str(&format!("mkdir -p \"%{{_builddir}}/{}\"\n", name));
            out.push_str(&format!(
                "tar -C \"%{{_builddir}}/{}\" -xzf \"%{{_sourcedir}}/{}\"\n",
                name,
                file
            ));
        } else {
            out.push_str(&format!(
                "cp -a \"%{{_sourcedir}}/{}\" \"%{{_builddir}}/{}\"\n",
                file,
                name
            ));
        }
    }

    for (target, patches) in &spec.patches {
        for patch in patches {
            out.push_str(&format!(
                "patch -d \"%{{_builddir}}/{}\" -p1 -s --input \"%{{_sourcedir}}/{}\"\n",
                target,
                source_file_name(spec, patch)
            ));
        }
    }
    out.push('\n');
}

fn write_build(out: &mut String, spec: &Spec) {
    out.push_str("%build\n");
    if spec.build.steps.is_empty() {
        out.push('\n');
        return;
    }

    out.push_str("set -e\n");
    for (key, value) in &spec.build.env {
        out.push_str(&format!("export {}=\"{}\"\n", key, value));
    }
    for step in &spec.build.steps {
        if step.env.is_empty() {
            out.push_str(&format!("{}\n", step.command.trim_end()));
            continue;
        }
        // step env is scoped to the step
        out.push_str("(\n");
        for (key, value) in &step.env {
            out.push_str(&format!("export {}=\"{}\"\n", key, value));
        }
        out.push_str(&format!("{}\n", step.command.trim_end()));
        out.push_str(")\n");
    }
    out.push('\n');
}

fn installed_dir(root: &str, cfg: &ArtifactConfig) -> String {
    match cfg.subpath.as_deref().map(|s| s.trim_matches('/')) {
        Some(sub) if !sub.is_empty() => format!("{}/{}", root, sub),
        _ => root.to_string(),
    }
}

fn installed_name<'a>(path: &'a str, cfg: &'a ArtifactConfig) -> &'a str {
    cfg.name
        .as_deref()
        .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path))
}

fn write_install(out: &mut String, spec: &Spec) {
    out.push_str("%install\n");
    let groups = [
        ("%{_bindir}", &spec.artifacts.binaries, "0755"),
        ("%{_mandir}", &spec.artifacts.manpages, "0644"),
    ];
    for (root, artifacts, mode) in groups {
        for (path, cfg) in artifacts {
            let dir = installed_dir(root, cfg);
            out.push_str(&format!("mkdir -p \"%{{buildroot}}{}\"\n", dir));
            out.push_str(&format!(
                "install -m {} \"{}\" \"%{{buildroot}}{}/{}\"\n",
                mode,
                path,
                dir,
                installed_name(path, cfg)
            ));
        }
    }
    out.push('\n');
}

fn write_files(out: &mut String, spec: &Spec) {
    out.push_str("%files\n");
    for (path, cfg) in &spec.artifacts.binaries {
        out.push_str(&format!(
            "{}/{}\n",
            installed_dir("%{_bindir}", cfg),
            installed_name(path, cfg)
        ));
    }
    // brp-compress gzips man pages after install
    for (path, cfg) in &spec.artifacts.manpages {
        out.push_str(&format!(
            "{}/{}*\n",
            installed_dir("%{_mandir}", cfg),
            installed_name(path, cfg)
        ));
    }
}
