use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_DISTRO: &str = "mariner2";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// Settings that can come from the environment. CLI flags take precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmbundleConfig {
    pub distro: String,
    /// `os/arch[/variant]`; `None` means the default platform.
    pub platform: Option<String>,
    pub log_level: String,
    /// Replaces the pinned toolkit image for toolkit-based distros.
    pub toolkit_image: Option<String>,
    pub spec_file: Option<PathBuf>,
}

impl Default for RpmbundleConfig {
    fn default() -> Self {
        let distro = env::var("RPMBUNDLE_DISTRO")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| DEFAULT_DISTRO.to_string());

        let platform = env::var("RPMBUNDLE_PLATFORM")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let log_level = env::var("RPMBUNDLE_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let toolkit_image = env::var("RPMBUNDLE_TOOLKIT_IMAGE")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let spec_file = env::var("RPMBUNDLE_SPEC_FILE").ok().map(PathBuf::from);

        Self {
            distro,
            platform,
            log_level,
            toolkit_image,
            spec_file,
        }
    }
}

impl RpmbundleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.distro.is_empty()
            || !self
                .distro
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid distro name: '{}'",
                self.distro
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        if let Some(platform) = &self.platform {
            let parts: Vec<&str> = platform.split('/').collect();
            if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
                return Err(ConfigError::ParseError {
                    field: "RPMBUNDLE_PLATFORM".to_string(),
                    error: format!("'{}' is not of the form os/arch[/variant]", platform),
                });
            }
        }

        if let Some(image) = &self.toolkit_image {
            if image.contains(char::is_whitespace) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid toolkit image reference: '{}'",
                    image
                )));
            }
        }

        Ok(())
    }

    pub fn to_display_map(&self) -> std::collections::BTreeMap<String, String> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("distro".to_string(), self.distro.clone());
        map.insert(
            "platform".to_string(),
            self.platform.clone().unwrap_or_else(|| "default".to_string()),
        );
        map.insert("log_level".to_string(), self.log_level.clone());
        if let Some(image) = &self.toolkit_image {
            map.insert("toolkit_image".to_string(), image.clone());
        }
        if let Some(path) = &self.spec_file {
            map.insert("spec_file".to_string(), path.display().to_string());
        }
        map
    }
}

impl fmt::Display for RpmbundleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rpmbundle Configuration:")?;
        writeln!(f, "  Distro: {}", self.distro)?;
        writeln!(
            f,
            "  Platform: {}",
            self.platform.as_deref().unwrap_or("default")
        )?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        if let Some(image) = &self.toolkit_image {
            writeln!(f, "  Toolkit Image: {}", image)?;
        }
        if let Some(path) = &self.spec_file {
            writeln!(f, "  Spec File: {}", path.display())?;
        }
        Ok(())
    }
}
