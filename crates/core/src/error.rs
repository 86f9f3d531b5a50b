use std::path::PathBuf;
use thiserror::Error;

/// Failure to obtain a usable package spec. Always fatal to the build.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("could not read spec file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error loading spec: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("undefined build arg: {0}")]
    UndefinedArg(String),

    #[error("spec is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid spec: {0}")]
    Invalid(String),
}
