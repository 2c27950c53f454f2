//! External vendor tool execution

use std::io;
use std::process::Command;

use tracing::{debug, warn};

/// Runs a vendor tool and returns its combined stdout and stderr
#[cfg_attr(test, mockall::automock)]
pub trait ToolRunner: Send + Sync {
    /// A non-zero exit status is not an error; only a failure to launch is
    fn run(&self, program: &str, args: &[String]) -> io::Result<String>;
}

/// [`ToolRunner`] backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRunner;

impl ToolRunner for CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<String> {
        debug!(program = %program, args = %args.join(" "), "Running tool");
        let output = Command::new(program).args(args).output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            warn!(program = %program, status = ?output.status, "Tool exited with failure");
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_runner_captures_output() {
        let out = CommandRunner
            .run("sh", &["-c".to_string(), "echo out; echo err >&2".to_string()])
            .unwrap();
        assert_eq!(out, "out\nerr\n");
    }

    #[test]
    fn test_command_runner_nonzero_exit_is_ok() {
        let out = CommandRunner.run("sh", &["-c".to_string(), "echo x; exit 3".to_string()]);
        assert_eq!(out.unwrap(), "x\n");
    }

    #[test]
    fn test_command_runner_missing_program() {
        assert!(CommandRunner.run("/nonexistent/ubxtool", &[]).is_err());
    }
}
