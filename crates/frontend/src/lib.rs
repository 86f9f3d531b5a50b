//! Compiles package specs into BuildKit graphs that produce RPMs.
//!
//! [`Frontend`] is the entry point: it loads a spec, picks a
//! [`DistroHandler`] and dispatches the requested target.

pub mod buildroot;
pub mod context;
pub mod distro;
pub mod error;
pub mod frontend;
pub mod rpm;
pub mod targets;

pub use context::{BuildContext, CAP_MERGE_OP};
pub use distro::{DistroHandler, DistroRegistry, DnfDistro, InstallOpts, Pipeline, TdnfDistro};
pub use error::{FrontendError, Stage};
pub use frontend::{BuildRequest, Frontend};
pub use targets::{dispatch, list_targets, Target};
