use crate::context::{BuildContext, CAP_MERGE_OP};
use crate::distro::DistroRegistry;
use crate::error::FrontendError;
use crate::targets::{self, Target};
use anyhow::anyhow;
use rpmbundle_buildkit::llb::State;
use rpmbundle_buildkit::{
    ImageConfig, ImageMetaResolver, Platform, SolveRequest, SolveResponse, Solver,
};
use rpmbundle_core::{load_spec, Spec, SpecSource};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// One build invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Target name; empty selects the default.
    pub target: String,
    pub platform: Platform,
    pub distro: String,
    pub build_args: BTreeMap<String, String>,
    pub named_contexts: BTreeMap<String, State>,
    /// Solver capabilities, e.g. `mergeop`.
    pub caps: BTreeSet<String>,
}

impl BuildRequest {
    pub fn new(target: impl Into<String>, distro: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            platform: Platform::default(),
            distro: distro.into(),
            build_args: BTreeMap::new(),
            named_contexts: BTreeMap::new(),
            caps: BTreeSet::from([CAP_MERGE_OP.to_string()]),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }

    pub fn with_named_context(mut self, name: impl Into<String>, state: State) -> Self {
        self.named_contexts.insert(name.into(), state);
        self
    }

    pub fn with_caps<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.caps = caps.into_iter().map(Into::into).collect();
        self
    }

    /// The requested target name, with the empty name resolved to the
    /// default target.
    pub fn target_name(&self) -> &str {
        if self.target.is_empty() {
            targets::default_target().name
        } else {
            &self.target
        }
    }

    fn context(&self) -> BuildContext {
        BuildContext {
            platform: self.platform.clone(),
            named_contexts: self.named_contexts.clone(),
            caps: self.caps.clone(),
        }
    }
}

/// Loads the spec, compiles the requested target and hands the graph to
/// the solver.
pub struct Frontend {
    spec_source: Box<dyn SpecSource>,
    solver: Arc<dyn Solver>,
    resolver: Option<Arc<dyn ImageMetaResolver>>,
    distros: DistroRegistry,
}

impl Frontend {
    pub fn new(spec_source: Box<dyn SpecSource>, solver: Arc<dyn Solver>) -> Self {
        Self {
            spec_source,
            solver,
            resolver: None,
            distros: DistroRegistry::with_defaults(None),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ImageMetaResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_distros(mut self, distros: DistroRegistry) -> Self {
        self.distros = distros;
        self
    }

    pub fn distros(&self) -> &DistroRegistry {
        &self.distros
    }

    pub fn load_spec(&self, build_args: &BTreeMap<String, String>) -> Result<Spec, FrontendError> {
        debug!("Reading spec from {}", self.spec_source.describe());
        let data = self.spec_source.read()?;
        Ok(load_spec(&data, build_args)?)
    }

    /// The target table. The spec is loaded first so a broken spec fails
    /// discovery too.
    pub fn list_targets(&self) -> Result<&'static [Target], FrontendError> {
        self.load_spec(&BTreeMap::new())?;
        Ok(targets::list_targets())
    }

    pub async fn build(&self, request: BuildRequest) -> Result<SolveResponse, FrontendError> {
        let spec = self.load_spec(&request.build_args)?;
        let distro = self.distros.get(&request.distro)?;
        let ctx = request.context();

        let (state, image_config) = targets::dispatch(&request.target, &spec, distro.as_ref(), &ctx)?;
        let definition = state
            .marshal(&request.platform)
            .map_err(FrontendError::Marshal)?;

        let solve = SolveRequest {
            id: Uuid::new_v4().to_string(),
            definition,
            image_config,
            platform: request.platform.clone(),
        };
        info!(
            "Submitting {} ops for {} (request {})",
            solve.definition.len(),
            spec,
            solve.id
        );
        self.solver.solve(solve).await.map_err(FrontendError::Solve)
    }

    /// Config of the distro's upstream image, via the configured resolver.
    pub async fn base_image_config(
        &self,
        distro: &str,
        platform: &Platform,
    ) -> Result<ImageConfig, FrontendError> {
        let handler = self.distros.get(distro)?;
        let resolver = self.resolver.as_ref().ok_or_else(|| FrontendError::DistroResolution {
            distro: distro.to_string(),
            error: anyhow!("no image metadata resolver configured"),
        })?;
        handler
            .default_image_config(resolver.as_ref(), platform)
            .await
            .map_err(|error| FrontendError::DistroResolution {
                distro: distro.to_string(),
                error,
            })
    }
}
