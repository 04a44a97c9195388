// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The process runner: every external invocation in the harness goes through
//! [`run_stage`], so timeout, crash and missing-binary handling is written once.

use camino::Utf8PathBuf;
use duct::cmd;
use std::{
    ffi::OsString,
    io,
    thread,
    time::{Duration, Instant},
};

/// How often a running stage is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A single external command to be executed by the process runner.
#[derive(Clone, Debug)]
pub struct StageCommand {
    /// Stage name, used in diagnostics ("translate", "emulate", ...).
    pub stage: &'static str,

    /// The program to invoke.
    pub program: OsString,

    /// Arguments passed to the program.
    pub args: Vec<OsString>,

    /// The working directory, if it should be changed.
    pub cwd: Option<Utf8PathBuf>,

    /// Text written to the child's stdin. `None` means stdin is left closed.
    pub stdin: Option<String>,

    /// Time budget for the stage. The process is killed once it is exceeded.
    pub timeout: Duration,
}

impl StageCommand {
    pub fn new(stage: &'static str, program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            stage,
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }
}

/// How a stage's process ended.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum StageStatus {
    /// The process ran to completion and exited with this code.
    Exited { code: i32 },

    /// The process was terminated by a signal before producing an exit code.
    Crashed,

    /// The process exceeded its time budget and was killed.
    TimedOut,

    /// The program could not be found at launch time.
    ToolMissing { program: String },

    /// The process failed to launch for some other reason.
    SpawnFailed { message: String },
}

impl StageStatus {
    /// Returns true if the process completed successfully (exit code 0).
    pub fn success(&self) -> bool {
        matches!(self, StageStatus::Exited { code: 0 })
    }

    /// Returns true if the process ran to completion at all, successfully or
    /// not. Timeouts, crashes and launch failures are incomplete: they yield
    /// verdict ERROR rather than FAIL.
    pub fn completed(&self) -> bool {
        matches!(self, StageStatus::Exited { .. })
    }
}

/// The captured result of one external invocation.
#[derive(Clone, Debug, serde::Serialize)]
pub struct StageResult {
    pub stage: &'static str,
    pub status: StageStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl StageResult {
    /// A one-line description of why this stage did not succeed.
    pub fn failure_summary(&self) -> String {
        match &self.status {
            StageStatus::Exited { code } => format!("{} exited with code {}", self.stage, code),
            StageStatus::Crashed => format!("{} was terminated by a signal", self.stage),
            StageStatus::TimedOut => {
                format!("{} timed out after {:.1}s", self.stage, self.elapsed.as_secs_f64())
            }
            StageStatus::ToolMissing { program } => {
                format!("{}: program not found: {}", self.stage, program)
            }
            StageStatus::SpawnFailed { message } => {
                format!("{} failed to launch: {}", self.stage, message)
            }
        }
    }
}

/// Runs one external command to completion or timeout.
///
/// Never returns an error: launch failures and timeouts are encoded in the
/// returned [`StageStatus`] so callers handle every outcome through one type.
/// The child process and its I/O handles are released on every path; on
/// timeout the process is killed and reaped before this function returns.
pub fn run_stage(command: &StageCommand) -> StageResult {
    let start = Instant::now();

    let mut expression = cmd(&command.program, &command.args)
        .stdout_capture()
        .stderr_capture()
        .unchecked();
    if let Some(dir) = &command.cwd {
        expression = expression.dir(dir.as_std_path());
    }
    match &command.stdin {
        Some(text) => {
            expression = expression.stdin_bytes(text.as_bytes().to_vec());
        }
        None => {
            expression = expression.stdin_null();
        }
    }

    let handle = match expression.start() {
        Ok(handle) => handle,
        Err(err) => {
            return StageResult {
                stage: command.stage,
                status: spawn_failure(&command.program, &err),
                stdout: String::new(),
                stderr: String::new(),
                elapsed: start.elapsed(),
            };
        }
    };

    let deadline = start + command.timeout;
    loop {
        match handle.try_wait() {
            Ok(Some(_)) => {
                // Completed within budget; into_output returns immediately.
                return match handle.into_output() {
                    Ok(output) => {
                        let status = match output.status.code() {
                            Some(code) => StageStatus::Exited { code },
                            None => StageStatus::Crashed,
                        };
                        StageResult {
                            stage: command.stage,
                            status,
                            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                            elapsed: start.elapsed(),
                        }
                    }
                    Err(err) => StageResult {
                        stage: command.stage,
                        status: StageStatus::SpawnFailed {
                            message: err.to_string(),
                        },
                        stdout: String::new(),
                        stderr: String::new(),
                        elapsed: start.elapsed(),
                    },
                };
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    // Kill and reap, then salvage whatever output was captured.
                    let _ = handle.kill();
                    let (stdout, stderr) = match handle.into_output() {
                        Ok(output) => (
                            String::from_utf8_lossy(&output.stdout).into_owned(),
                            String::from_utf8_lossy(&output.stderr).into_owned(),
                        ),
                        Err(_) => (String::new(), String::new()),
                    };
                    return StageResult {
                        stage: command.stage,
                        status: StageStatus::TimedOut,
                        stdout,
                        stderr,
                        elapsed: start.elapsed(),
                    };
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                let _ = handle.kill();
                return StageResult {
                    stage: command.stage,
                    status: StageStatus::SpawnFailed {
                        message: err.to_string(),
                    },
                    stdout: String::new(),
                    stderr: String::new(),
                    elapsed: start.elapsed(),
                };
            }
        }
    }
}

fn spawn_failure(program: &OsString, err: &io::Error) -> StageStatus {
    if err.kind() == io::ErrorKind::NotFound {
        StageStatus::ToolMissing {
            program: program.to_string_lossy().into_owned(),
        }
    } else {
        StageStatus::SpawnFailed {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_success() {
        assert!(StageStatus::Exited { code: 0 }.success());
        assert!(!StageStatus::Exited { code: 1 }.success());
        assert!(!StageStatus::TimedOut.success());
    }

    #[test]
    fn status_completed() {
        assert!(StageStatus::Exited { code: 0 }.completed());
        assert!(StageStatus::Exited { code: 3 }.completed());
        assert!(!StageStatus::TimedOut.completed());
        assert!(!StageStatus::Crashed.completed());
        assert!(!StageStatus::ToolMissing {
            program: "gcc".to_owned()
        }
        .completed());
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn captures_stdout() {
            let result = run_stage(
                &StageCommand::new("echo", "sh", Duration::from_secs(5))
                    .args(["-c", "echo hello; echo oops >&2"]),
            );
            assert_eq!(result.status, StageStatus::Exited { code: 0 });
            assert_eq!(result.stdout, "hello\n");
            assert_eq!(result.stderr, "oops\n");
        }

        #[test]
        fn feeds_stdin() {
            let result = run_stage(
                &StageCommand::new("cat", "cat", Duration::from_secs(5)).stdin("1 2 3\n"),
            );
            assert_eq!(result.status, StageStatus::Exited { code: 0 });
            assert_eq!(result.stdout, "1 2 3\n");
        }

        #[test]
        fn nonzero_exit_is_reported_not_propagated() {
            let result = run_stage(
                &StageCommand::new("false", "sh", Duration::from_secs(5)).args(["-c", "exit 3"]),
            );
            assert_eq!(result.status, StageStatus::Exited { code: 3 });
        }

        #[test]
        fn kills_on_timeout() {
            let start = Instant::now();
            let result = run_stage(
                &StageCommand::new("sleep", "sleep", Duration::from_millis(150)).arg("30"),
            );
            assert_eq!(result.status, StageStatus::TimedOut);
            assert!(
                start.elapsed() < Duration::from_secs(10),
                "timed-out process was reaped promptly"
            );
        }

        #[test]
        fn missing_tool_is_distinct() {
            let result = run_stage(&StageCommand::new(
                "missing",
                "difftester-no-such-binary",
                Duration::from_secs(5),
            ));
            assert_eq!(
                result.status,
                StageStatus::ToolMissing {
                    program: "difftester-no-such-binary".to_owned()
                }
            );
        }
    }
}
