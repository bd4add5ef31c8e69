pub mod command;
pub mod filesystem;
pub mod output;
pub mod runtime;
pub mod user_input;

pub use command::{CommandExecutor, RealCommandExecutor};
pub use filesystem::{FileSystem, RealFileSystem};
pub use output::{Output, TerminalOutput};
pub use runtime::{ContainerInstance, ContainerRuntime, DockerCliRuntime, InstanceFilter};
pub use user_input::{InquireUserInput, SelectOption, UserInput};

#[cfg(test)]
pub use command::MockCommandExecutor;
#[cfg(test)]
pub use filesystem::MockFileSystem;
#[cfg(test)]
pub use output::MockOutput;
#[cfg(test)]
pub use runtime::MockContainerRuntime;
#[cfg(test)]
pub use user_input::{MockResponse, MockUserInput};
