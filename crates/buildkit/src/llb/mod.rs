mod definition;
mod exec;
mod file;
mod platform;
mod source;
mod state;

pub use definition::Definition;
pub use exec::{
    add_env, add_mount, args, custom_name, dir, security, sh, with_run_options, CacheSharing,
    EnvList, ExecInfo, ExecState, Mount, MountKind, RunOption, SecurityMode,
};
pub use file::{CopyInfo, FileAction};
pub use platform::Platform;
pub use source::{normalize_image_ref, LocalOptions};
pub use state::State;
