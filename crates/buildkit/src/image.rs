use crate::llb::{normalize_image_ref, Platform};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Image configuration as found in an OCI/Docker image config blob. Only the
/// fields a frontend forwards to the exporter are modelled; unknown fields
/// are ignored on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default)]
    pub config: ContainerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ImageConfig {
    pub fn for_platform(platform: &Platform) -> Self {
        Self {
            architecture: platform.architecture.clone(),
            os: platform.os.clone(),
            variant: platform.variant.clone(),
            config: ContainerConfig::default(),
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse image config")
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize image config")
    }
}

/// Looks up the config blob of a registry image.
#[async_trait]
pub trait ImageMetaResolver: Send + Sync {
    async fn resolve_image_config(&self, reference: &str, platform: &Platform) -> Result<Vec<u8>>;
}

/// Resolver backed by a fixed map, keyed by normalized reference.
#[derive(Debug, Clone, Default)]
pub struct StaticImageMetaResolver {
    configs: HashMap<String, Vec<u8>>,
}

impl StaticImageMetaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(mut self, reference: &str, raw: impl Into<Vec<u8>>) -> Self {
        self.configs
            .insert(normalize_image_ref(reference), raw.into());
        self
    }

    pub fn with_config(self, reference: &str, config: &ImageConfig) -> Result<Self> {
        let raw = config.to_json()?;
        Ok(self.with_raw(reference, raw))
    }
}

#[async_trait]
impl ImageMetaResolver for StaticImageMetaResolver {
    async fn resolve_image_config(&self, reference: &str, _platform: &Platform) -> Result<Vec<u8>> {
        let key = normalize_image_ref(reference);
        self.configs
            .get(&key)
            .cloned()
            .with_context(|| format!("No image config known for {}", key))
    }
}
