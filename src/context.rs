use crate::traits::{
    CommandExecutor, ContainerRuntime, DockerCliRuntime, FileSystem, InquireUserInput, Output,
    RealCommandExecutor, RealFileSystem, TerminalOutput, UserInput,
};
use std::sync::Arc;

/// Application context that holds all dependencies for dependency injection
pub struct Context {
    pub fs: Arc<dyn FileSystem>,
    pub input: Arc<dyn UserInput>,
    pub output: Arc<dyn Output>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

impl Context {
    /// Create a new context with real implementations (for production use)
    pub fn new() -> Self {
        let command: Arc<dyn CommandExecutor> = Arc::new(RealCommandExecutor::new());
        Self {
            fs: Arc::new(RealFileSystem),
            input: Arc::new(InquireUserInput),
            output: Arc::new(TerminalOutput),
            runtime: Arc::new(DockerCliRuntime::new(command)),
        }
    }

    /// Create a test context with specific mock implementations
    #[cfg(test)]
    pub fn test_with(
        fs: Arc<dyn FileSystem>,
        input: Arc<dyn UserInput>,
        output: Arc<dyn Output>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            fs,
            input,
            output,
            runtime,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            input: Arc::clone(&self.input),
            output: Arc::clone(&self.output),
            runtime: Arc::clone(&self.runtime),
        }
    }
}
