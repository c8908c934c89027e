//! External command execution
//!
//! Every collaborator this crate talks to (`az`, `kubectl`, `curl`) is a
//! command line tool. They all go through a [`CommandRunner`] so the
//! wrappers can be exercised against scripted output in unit tests.

use std::fmt;
use std::process::Command;
use tracing::{debug, instrument};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a command that exited 0
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Output of a command that exited non-zero
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with code 0
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from running external commands
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CliError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("failed to execute {program}: {reason}")]
    ExecutionFailed { program: String, reason: String },

    #[error("`{command}` exited with status {exit_code}: {stderr}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stderr: String,
    },
}

/// Something that can run a program to completion
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run `program` with `args` and capture its output
    ///
    /// Returns `Err` only when the process could not be started; a non-zero
    /// exit is reported through [`CommandOutput::exit_code`].
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CliError>;

    /// Run and return stdout, treating a non-zero exit as an error
    fn stdout(&self, program: &str, args: &[&str]) -> Result<String, CliError> {
        let output = self.output(program, args)?;
        if output.passed() {
            Ok(output.stdout)
        } else {
            Err(CliError::NonZeroExit {
                command: render_command(program, args),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on the local machine via [`std::process::Command`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    #[instrument(skip(self, args), fields(command = %render_command(program, args)))]
    fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CliError> {
        let output = Command::new(program).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CliError::CommandNotFound(program.to_string())
            } else {
                CliError::ExecutionFailed {
                    program: program.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        debug!(exit_code = result.exit_code, "Command finished");
        Ok(result)
    }
}

/// Shell-like rendering of a command line, for logs and error messages
pub fn render_command(program: &str, args: &[&str]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            rendered.push_str(&format!("{arg:?}"));
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for exercising the CLI wrappers

    use super::{CliError, CommandOutput, CommandRunner};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned outputs and records every invocation
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        responses: Mutex<VecDeque<Result<CommandOutput, CliError>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, output: CommandOutput) -> Self {
            self.responses.lock().unwrap().push_back(Ok(output));
            self
        }

        pub fn respond_err(self, err: CliError) -> Self {
            self.responses.lock().unwrap().push_back(Err(err));
            self
        }

        /// Every invocation so far, program first
        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CliError> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|a| (*a).to_string()));
            self.calls.lock().unwrap().push(call);

            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted response for {program} {args:?}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_passed() {
        assert!(CommandOutput::success("ok").passed());
        assert!(!CommandOutput::failure(1, "boom").passed());
    }

    #[test]
    fn test_run_simple_command() {
        let output = SystemRunner.output("echo", &["hello"]).unwrap();

        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("hello"));
        assert!(output.passed());
    }

    #[test]
    fn test_run_failing_command() {
        let output = SystemRunner.output("sh", &["-c", "exit 3"]).unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(!output.passed());
    }

    #[test]
    fn test_run_captures_stderr() {
        let output = SystemRunner
            .output("sh", &["-c", "echo error >&2"])
            .unwrap();

        assert!(output.stderr.contains("error"));
    }

    #[test]
    fn test_stdout_rejects_non_zero_exit() {
        let err = SystemRunner
            .stdout("sh", &["-c", "echo nope >&2; exit 2"])
            .unwrap_err();

        match err {
            CliError::NonZeroExit {
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(command, "sh -c \"echo nope >&2; exit 2\"");
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "nope");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[test]
    fn test_command_not_found() {
        let err = SystemRunner
            .output("nonexistent_command_xyz", &[])
            .unwrap_err();

        assert_eq!(
            err,
            CliError::CommandNotFound("nonexistent_command_xyz".to_string())
        );
    }

    #[test]
    fn test_render_command_quotes_whitespace() {
        assert_eq!(
            render_command("kubectl", &["get", "pods", "-n", "web"]),
            "kubectl get pods -n web"
        );
        assert_eq!(render_command("curl", &["", "a b"]), "curl \"\" \"a b\"");
    }

    #[test]
    fn test_cli_error_display() {
        let err = CliError::CommandNotFound("az".to_string());
        assert!(err.to_string().contains("az"));

        let err = CliError::ExecutionFailed {
            program: "kubectl".to_string(),
            reason: "spawn error".to_string(),
        };
        assert!(err.to_string().contains("spawn"));
    }
}
