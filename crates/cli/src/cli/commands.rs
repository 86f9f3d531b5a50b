use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Compile package specs into BuildKit build graphs that produce RPMs
#[derive(Parser, Debug)]
#[command(
    name = "rpmbundle",
    about = "Compile package specs into BuildKit build graphs that produce RPMs",
    version,
    author,
    long_about = "rpmbundle reads a distro-agnostic package spec and compiles it into a \
                  BuildKit LLB definition that builds RPMs for the selected distro. The \
                  definition is written out for `buildctl build` to execute."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "List the build targets a spec supports",
        long_about = "Loads the spec and prints the available build targets. A spec that \
                      fails to load fails this command too.\n\n\
                      Examples:\n  \
                      rpmbundle targets --spec hello.yml\n  \
                      rpmbundle targets --spec hello.yml --format json"
    )]
    Targets(TargetsArgs),

    #[command(about = "List the supported distros")]
    Distros(DistrosArgs),

    #[command(
        about = "Compile a spec target into an LLB definition",
        long_about = "Compiles the requested target for one distro and platform and writes \
                      the resulting definition.\n\n\
                      Examples:\n  \
                      rpmbundle build --spec hello.yml | buildctl build --output type=local,dest=out\n  \
                      rpmbundle build --spec hello.yml --distro azlinux3 --target buildroot\n  \
                      rpmbundle build --spec hello.yml --build-arg VERSION=1.2.3 --format text"
    )]
    Build(BuildArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct TargetsArgs {
    #[arg(
        short = 's',
        long,
        value_name = "FILE",
        help = "Spec file (defaults to RPMBUNDLE_SPEC_FILE)"
    )]
    pub spec: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct DistrosArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        short = 's',
        long,
        value_name = "FILE",
        help = "Spec file (defaults to RPMBUNDLE_SPEC_FILE)"
    )]
    pub spec: Option<PathBuf>,

    #[arg(
        short = 't',
        long,
        value_name = "TARGET",
        default_value = "",
        hide_default_value = true,
        help = "Target to build (defaults to rpm)"
    )]
    pub target: String,

    #[arg(
        short = 'd',
        long,
        value_name = "DISTRO",
        help = "Distro to build for (defaults to RPMBUNDLE_DISTRO or mariner2)"
    )]
    pub distro: Option<String>,

    #[arg(long, value_name = "OS/ARCH", help = "Target platform, e.g. linux/arm64")]
    pub platform: Option<String>,

    #[arg(
        long = "build-arg",
        value_name = "KEY=VALUE",
        value_parser = parse_key_val,
        help = "Set a build arg declared by the spec (repeatable)"
    )]
    pub build_args: Vec<(String, String)>,

    #[arg(
        long = "build-context",
        value_name = "NAME=IMAGE",
        value_parser = parse_key_val,
        help = "Provide a named context from an image, e.g. rpmbundle-mariner2-worker=my/worker (repeatable)"
    )]
    pub build_contexts: Vec<(String, String)>,

    #[arg(long, help = "Do not use merge ops (for solvers without the mergeop capability)")]
    pub no_merge_op: bool,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the definition to a file instead of stdout"
    )]
    pub output: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "definition",
        help = "Definition encoding"
    )]
    pub format: DefinitionFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Human,
    Json,
    Yaml,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => super::output::OutputFormat::Human,
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormatArg {
    /// Binary protobuf for `buildctl build`
    Definition,
    /// Readable graph dump
    Text,
}

impl From<DefinitionFormatArg> for rpmbundle_buildkit::DefinitionFormat {
    fn from(arg: DefinitionFormatArg) -> Self {
        match arg {
            DefinitionFormatArg::Definition => rpmbundle_buildkit::DefinitionFormat::Binary,
            DefinitionFormatArg::Text => rpmbundle_buildkit::DefinitionFormat::Text,
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid value '{}': expected KEY=VALUE", s)),
    }
}
