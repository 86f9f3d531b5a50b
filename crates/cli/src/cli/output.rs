//! Output formatting for the listing commands.

use anyhow::{Context, Result};
use rpmbundle_frontend::{DistroRegistry, Pipeline, Target};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned text for terminals
    Human,
    /// Pretty printed JSON
    Json,
    Yaml,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistroInfo {
    pub name: String,
    pub full_name: String,
    pub image: String,
    pub pipeline: String,
    pub worker_context: String,
    pub cache_ids: Vec<String>,
}

impl DistroInfo {
    pub fn collect(registry: &DistroRegistry) -> Vec<Self> {
        registry
            .iter()
            .map(|d| Self {
                name: d.key().to_string(),
                full_name: d.full_name().to_string(),
                image: d.image_ref().to_string(),
                pipeline: match d.pipeline() {
                    Pipeline::Toolkit => "toolkit".to_string(),
                    Pipeline::Rpmbuild => "rpmbuild".to_string(),
                },
                worker_context: d.worker_context_name(),
                cache_ids: d.cache_table().ids().map(str::to_string).collect(),
            })
            .collect()
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_targets(&self, targets: &[Target]) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(targets)
                .context("Failed to serialize targets to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(targets).context("Failed to serialize targets to YAML")
            }
            OutputFormat::Human => Ok(self.format_targets_human(targets)),
        }
    }

    pub fn format_distros(&self, distros: &[DistroInfo]) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(distros)
                .context("Failed to serialize distros to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(distros).context("Failed to serialize distros to YAML")
            }
            OutputFormat::Human => Ok(self.format_distros_human(distros)),
        }
    }

    fn format_targets_human(&self, targets: &[Target]) -> String {
        let width = targets.iter().map(|t| t.name.len()).max().unwrap_or(0);
        let mut output = String::new();
        for target in targets {
            let marker = if target.default { " (default)" } else { "" };
            output.push_str(&format!(
                "{:<width$}  {}{}\n",
                target.name,
                target.description,
                marker,
                width = width
            ));
        }
        output
    }

    fn format_distros_human(&self, distros: &[DistroInfo]) -> String {
        let width = distros.iter().map(|d| d.name.len()).max().unwrap_or(0);
        let mut output = String::new();
        for distro in distros {
            output.push_str(&format!(
                "{:<width$}  {} [{}]\n",
                distro.name,
                distro.full_name,
                distro.pipeline,
                width = width
            ));
            output.push_str(&format!(
                "{:<width$}  image: {}\n",
                "",
                distro.image,
                width = width
            ));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_human_marks_default() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter
            .format_targets(rpmbundle_frontend::list_targets())
            .unwrap();
        let rpm = output.lines().find(|l| l.starts_with("rpm ")).unwrap();
        assert!(rpm.ends_with("(default)"));
        assert_eq!(output.matches("(default)").count(), 1);
    }

    #[test]
    fn test_targets_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter
            .format_targets(rpmbundle_frontend::list_targets())
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let list = parsed.as_array().unwrap();
        assert_eq!(list.len(), 5);
        assert_eq!(list.iter().filter(|t| t["default"] == true).count(), 1);
    }

    #[test]
    fn test_distros_yaml() {
        let distros = DistroInfo::collect(&DistroRegistry::with_defaults(Some("example.com/tk:1")));
        let output = OutputFormatter::new(OutputFormat::Yaml)
            .format_distros(&distros)
            .unwrap();
        let parsed: Vec<serde_yaml::Value> = serde_yaml::from_str(&output).unwrap();
        assert_eq!(parsed.len(), distros.len());
        assert!(output.contains("worker_context: rpmbundle-photon5-worker"));
    }

    #[test]
    fn test_distros_human() {
        let distros = DistroInfo::collect(&DistroRegistry::with_defaults(None));
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_distros(&distros)
            .unwrap();
        let mariner = output.lines().find(|l| l.starts_with("mariner2 ")).unwrap();
        assert!(mariner.ends_with("CBL-Mariner 2.0 [toolkit]"));
        assert!(output.contains("image: docker.io/photon:5"));
    }

    #[test]
    fn test_distros_json_lists_cache_ids() {
        let distros = DistroInfo::collect(&DistroRegistry::with_defaults(None));
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_distros(&distros)
            .unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&output).unwrap();
        let mariner = parsed.iter().find(|d| d["name"] == "mariner2").unwrap();
        assert!(mariner["cache_ids"]
            .as_array()
            .unwrap()
            .iter()
            .any(|id| id == "mariner2-toolkit-rpm-cache"));
    }
}
