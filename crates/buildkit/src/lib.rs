pub mod digest;
pub mod image;
pub mod llb;
pub mod proto;
pub mod solver;

pub use digest::Digest;
pub use image::{ContainerConfig, ImageConfig, ImageMetaResolver, StaticImageMetaResolver};
pub use llb::{Definition, Platform, State};
pub use solver::{
    DefinitionFormat, DefinitionWriter, OutputTarget, SolveRequest, SolveResponse, Solver,
    IMAGE_CONFIG_KEY,
};
