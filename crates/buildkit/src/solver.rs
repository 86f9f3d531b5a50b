use crate::image::ImageConfig;
use crate::llb::{Definition, Platform};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const IMAGE_CONFIG_KEY: &str = "containerimage.config";

#[derive(Debug, Clone)]
pub struct SolveRequest {
    pub id: String,
    pub definition: Definition,
    pub image_config: ImageConfig,
    pub platform: Platform,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveResponse {
    /// Reference to the solved result (root digest for offline solvers).
    pub reference: String,
    pub metadata: BTreeMap<String, Vec<u8>>,
}

/// Executes a marshalled definition.
#[async_trait]
pub trait Solver: Send + Sync {
    async fn solve(&self, request: SolveRequest) -> Result<SolveResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    /// Protobuf, accepted by `buildctl build` on stdin.
    Binary,
    /// Graph dump for humans.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

/// Solver that writes the definition out instead of executing it.
#[derive(Debug, Clone)]
pub struct DefinitionWriter {
    target: OutputTarget,
    format: DefinitionFormat,
}

impl DefinitionWriter {
    pub fn new(target: OutputTarget, format: DefinitionFormat) -> Self {
        Self { target, format }
    }

    pub fn stdout(format: DefinitionFormat) -> Self {
        Self::new(OutputTarget::Stdout, format)
    }

    pub fn file(path: impl Into<PathBuf>, format: DefinitionFormat) -> Self {
        Self::new(OutputTarget::File(path.into()), format)
    }
}

#[async_trait]
impl Solver for DefinitionWriter {
    async fn solve(&self, request: SolveRequest) -> Result<SolveResponse> {
        let bytes = match self.format {
            DefinitionFormat::Binary => request.definition.to_bytes(),
            DefinitionFormat::Text => request.definition.describe().into_bytes(),
        };
        debug!(
            "Writing {} ops ({} bytes) for request {}",
            request.definition.len(),
            bytes.len(),
            request.id
        );

        match &self.target {
            OutputTarget::Stdout => {
                let mut out = tokio::io::stdout();
                out.write_all(&bytes)
                    .await
                    .context("Failed to write definition to stdout")?;
                out.flush().await.context("Failed to flush stdout")?;
            }
            OutputTarget::File(path) => {
                tokio::fs::write(path, &bytes)
                    .await
                    .with_context(|| format!("Failed to write definition to {}", path.display()))?;
                info!("Definition written to {}", path.display());
            }
        }

        let reference = request
            .definition
            .head()
            .map(|d| d.to_string())
            .unwrap_or_default();

        let mut metadata = BTreeMap::new();
        metadata.insert(IMAGE_CONFIG_KEY.to_string(), request.image_config.to_json()?);

        Ok(SolveResponse {
            reference,
            metadata,
        })
    }
}
