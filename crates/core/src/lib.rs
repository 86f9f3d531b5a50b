pub mod config;
pub mod error;
pub mod spec;

pub use config::{ConfigError, RpmbundleConfig};
pub use error::SpecError;
pub use spec::{
    load_spec, BytesSpecSource, FileSpecSource, Source, SourceKind, Spec, SpecSource,
};
