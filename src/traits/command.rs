use anyhow::{Context, Result};
use std::process::{Command, Output};

/// Trait for executing system commands, allowing for mocking in tests
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion and capture its output
    fn execute(&self, command: &str, args: &[&str]) -> Result<Output>;
}

/// Real command executor using std::process::Command
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, command: &str, args: &[&str]) -> Result<Output> {
        Command::new(command)
            .args(args)
            .output()
            .with_context(|| format!("Failed to run `{} {}`", command, args.join(" ")))
    }
}

/// Mock command executor for testing
#[cfg(test)]
pub struct MockCommandExecutor {
    outputs: std::sync::Mutex<Vec<MockCommandResult>>,
    calls: std::sync::Mutex<Vec<Vec<String>>>,
}

#[cfg(test)]
#[derive(Clone, Debug)]
pub struct MockCommandResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Simulate the binary being missing from PATH
    pub spawn_error: bool,
}

#[cfg(test)]
impl MockCommandResult {
    pub fn ok(command: &str, stdout: &str) -> Self {
        Self {
            command: command.to_string(),
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            spawn_error: false,
        }
    }

    pub fn failed(command: &str, exit_code: i32, stderr: &str) -> Self {
        Self {
            command: command.to_string(),
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            spawn_error: false,
        }
    }

    pub fn missing(command: &str) -> Self {
        Self {
            spawn_error: true,
            ..Self::failed(command, -1, "")
        }
    }
}

#[cfg(test)]
impl MockCommandExecutor {
    pub fn new() -> Self {
        Self::with_outputs(Vec::new())
    }

    pub fn with_outputs(outputs: Vec<MockCommandResult>) -> Self {
        Self {
            outputs: std::sync::Mutex::new(outputs),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Every invocation as `[command, args...]`
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Default for MockCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl CommandExecutor for MockCommandExecutor {
    fn execute(&self, command: &str, args: &[&str]) -> Result<Output> {
        let mut call = vec![command.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(call);

        let mut outputs = self.outputs.lock().unwrap();
        let Some(index) = outputs.iter().position(|r| r.command == command) else {
            return Ok(Output {
                status: create_exit_status(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
        };
        let result = outputs.remove(index);
        if result.spawn_error {
            anyhow::bail!("Failed to run `{}`: No such file or directory", command);
        }
        Ok(Output {
            status: create_exit_status(result.exit_code),
            stdout: result.stdout.into_bytes(),
            stderr: result.stderr.into_bytes(),
        })
    }
}

#[cfg(test)]
fn create_exit_status(code: i32) -> std::process::ExitStatus {
    // ExitStatus can't be constructed directly
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // Raw wait status: the exit code lives in the high byte
        std::process::ExitStatus::from_raw(code << 8)
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(code as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_executor_returns_configured_output() {
        let executor =
            MockCommandExecutor::with_outputs(vec![MockCommandResult::ok("docker", "hello")]);

        let output = executor.execute("docker", &["ps"]).unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "hello");
        assert_eq!(executor.calls(), vec![vec!["docker".to_string(), "ps".to_string()]]);
    }

    #[test]
    fn test_mock_executor_reports_exit_code() {
        let executor =
            MockCommandExecutor::with_outputs(vec![MockCommandResult::failed("docker", 1, "boom")]);

        let output = executor.execute("docker", &["ps"]).unwrap();
        assert!(!output.status.success());
        assert_eq!(output.status.code(), Some(1));
    }

    #[test]
    fn test_mock_executor_spawn_error() {
        let executor = MockCommandExecutor::with_outputs(vec![MockCommandResult::missing("docker")]);
        assert!(executor.execute("docker", &["ps"]).is_err());
    }
}
