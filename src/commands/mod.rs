pub mod deploy;
pub mod diff;
pub mod status;

pub use deploy::DeployCommand;
pub use diff::DiffCommand;
pub use status::{StatusArgs, StatusCommand};
