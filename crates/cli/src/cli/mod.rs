pub mod commands;
pub mod output;

pub use commands::{BuildArgs, CliArgs, Commands, DistrosArgs, TargetsArgs};
pub use output::{DistroInfo, OutputFormat, OutputFormatter};
