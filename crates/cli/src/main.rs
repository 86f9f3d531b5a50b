use rpmbundle_buildkit::{DefinitionFormat, DefinitionWriter, Platform, Solver, State};
use rpmbundle_cli::cli::commands::{BuildArgs, CliArgs, Commands, DistrosArgs, TargetsArgs};
use rpmbundle_cli::cli::output::{DistroInfo, OutputFormat, OutputFormatter};
use rpmbundle_cli::{NAME, VERSION};
use rpmbundle_core::{FileSpecSource, RpmbundleConfig};
use rpmbundle_frontend::{BuildRequest, DistroRegistry, Frontend, CAP_MERGE_OP};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let result = match load_config() {
        Ok(config) => match &args.command {
            Commands::Targets(targets_args) => handle_targets(targets_args, &config),
            Commands::Distros(distros_args) => handle_distros(distros_args, &config),
            Commands::Build(build_args) => handle_build(build_args, &config).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn init_logging_from_args(args: &CliArgs) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let level = if let Some(level_str) = &args.log_level {
            parse_level(level_str)
        } else if args.verbose {
            Level::DEBUG
        } else if args.quiet {
            Level::ERROR
        } else {
            let level_str = env::var("RPMBUNDLE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            parse_level(&level_str)
        };

        let mut filter = EnvFilter::from_default_env();

        if env::var("RUST_LOG").is_err() {
            for crate_name in [
                "rpmbundle",
                "rpmbundle_cli",
                "rpmbundle_core",
                "rpmbundle_buildkit",
                "rpmbundle_frontend",
            ] {
                if let Ok(directive) = format!("{}={}", crate_name, level).parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    });
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn load_config() -> Result<RpmbundleConfig> {
    let config = RpmbundleConfig::default();
    config.validate().context("Invalid configuration")?;
    for (key, value) in config.to_display_map() {
        debug!("config {} = {}", key, value);
    }
    Ok(config)
}

fn spec_path(flag: &Option<PathBuf>, config: &RpmbundleConfig) -> Result<PathBuf> {
    flag.clone()
        .or_else(|| config.spec_file.clone())
        .ok_or_else(|| anyhow!("No spec file given: pass --spec or set RPMBUNDLE_SPEC_FILE"))
}

fn frontend_for(spec: PathBuf, solver: Arc<dyn Solver>, config: &RpmbundleConfig) -> Frontend {
    Frontend::new(Box::new(FileSpecSource::new(spec)), solver)
        .with_distros(DistroRegistry::with_defaults(config.toolkit_image.as_deref()))
}

fn handle_targets(args: &TargetsArgs, config: &RpmbundleConfig) -> Result<()> {
    let spec = spec_path(&args.spec, config)?;
    let frontend = frontend_for(
        spec,
        Arc::new(DefinitionWriter::stdout(DefinitionFormat::Text)),
        config,
    );
    let targets = frontend.list_targets()?;

    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    print!("{}", formatter.format_targets(targets)?);
    Ok(())
}

fn handle_distros(args: &DistrosArgs, config: &RpmbundleConfig) -> Result<()> {
    let registry = DistroRegistry::with_defaults(config.toolkit_image.as_deref());
    let distros = DistroInfo::collect(&registry);

    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    print!("{}", formatter.format_distros(&distros)?);
    Ok(())
}

async fn handle_build(args: &BuildArgs, config: &RpmbundleConfig) -> Result<()> {
    let spec = spec_path(&args.spec, config)?;
    let distro = args.distro.clone().unwrap_or_else(|| config.distro.clone());

    let platform: Platform = match args.platform.as_ref().or(config.platform.as_ref()) {
        Some(p) => p.parse().with_context(|| format!("Invalid platform '{}'", p))?,
        None => Platform::default(),
    };

    let format = DefinitionFormat::from(args.format);
    let writer = match &args.output {
        Some(path) => DefinitionWriter::file(path, format),
        None => DefinitionWriter::stdout(format),
    };

    let mut request = BuildRequest::new(args.target.clone(), distro).with_platform(platform);
    for (key, value) in &args.build_args {
        request = request.with_build_arg(key, value);
    }
    for (name, image) in &args.build_contexts {
        debug!("Named context {} from image {}", name, image);
        request = request.with_named_context(name, State::image(image));
    }
    if args.no_merge_op {
        request = request.with_caps(Vec::<String>::new());
    } else {
        request = request.with_caps([CAP_MERGE_OP]);
    }

    info!(
        "Compiling {} (target '{}', distro {}, platform {})",
        spec.display(),
        request.target_name(),
        request.distro,
        request.platform
    );

    let frontend = frontend_for(spec, Arc::new(writer), config);
    let response = frontend.build(request).await?;
    info!("Build graph head: {}", response.reference);
    Ok(())
}
