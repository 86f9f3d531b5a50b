use rpmbundle_buildkit::llb::{Platform, State};
use std::collections::{BTreeMap, BTreeSet};

/// Capability advertised by solvers that implement merge ops.
pub const CAP_MERGE_OP: &str = "mergeop";

/// Per-invocation inputs every pipeline builder sees.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub platform: Platform,
    /// Caller-supplied states by name, e.g. a prebuilt worker image.
    pub named_contexts: BTreeMap<String, State>,
    pub caps: BTreeSet<String>,
}

impl BuildContext {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            named_contexts: BTreeMap::new(),
            caps: BTreeSet::from([CAP_MERGE_OP.to_string()]),
        }
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

    pub fn named_context(&self, name: &str) -> Option<&State> {
        self.named_contexts.get(name)
    }

    pub fn supports_merge(&self) -> bool {
        self.caps.contains(CAP_MERGE_OP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_advertised_by_default() {
        assert!(BuildContext::new(Platform::default()).supports_merge());
        let ctx = BuildContext::new(Platform::default()).with_caps(Vec::<String>::new());
        assert!(!ctx.supports_merge());
    }

    #[test]
    fn test_named_context_lookup() {
        let ctx = BuildContext::new(Platform::default())
            .with_named_context("worker", State::image("alpine"));
        assert!(ctx.named_context("worker").is_some());
        assert!(ctx.named_context("other").is_none());
    }
}
