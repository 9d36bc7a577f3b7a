// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Elevated command execution.

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL_MS: u64 = 100;

/// Runs commands with elevated privileges, through `sudo` unless already root.
#[derive(Debug, Clone)]
pub struct Sudo {
    timeout_secs: u64,
    elevated: bool,
}

impl Sudo {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            elevated: running_as_root(),
        }
    }

    /// True when no password prompt will be needed for elevated commands.
    pub fn has_sudo(&self) -> Result<bool> {
        if self.elevated || cfg!(windows) {
            return Ok(true);
        }
        interpret_probe(
            Command::new("sudo")
                .args(["-n", "true"])
                .stdin(Stdio::null())
                .output(),
        )
    }

    /// Run `program` elevated. Fails with `SudoFailed` if authentication was refused.
    pub fn run<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> Result<Output> {
        self.run_with_input(program, args, None)
    }

    /// Like [`Sudo::run`], but a non-zero exit becomes `Error::TrustStore` with `context`.
    pub fn run_checked<S: AsRef<OsStr>>(
        &self,
        program: &str,
        args: &[S],
        context: &str,
    ) -> Result<Output> {
        let output = self.run(program, args)?;
        if !output.status.success() {
            return Err(Error::TrustStore(format!(
                "{}: {}",
                context,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    /// Run `program` elevated, feeding `input` on stdin.
    pub fn run_with_input<S: AsRef<OsStr>>(
        &self,
        program: &str,
        args: &[S],
        input: Option<&[u8]>,
    ) -> Result<Output> {
        let mut command = if self.elevated || cfg!(windows) {
            Command::new(program)
        } else {
            let mut sudo = Command::new("sudo");
            sudo.arg("--").arg(program);
            sudo
        };
        command.args(args);

        let command_line = if self.elevated || cfg!(windows) {
            program.to_string()
        } else {
            format!("sudo {}", program)
        };
        tracing::debug!(command = %command_line, "running elevated command");

        let output =
            run_command_with_timeout(&mut command, &command_line, input, self.timeout_secs)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !self.elevated && is_sudo_auth_failure(&stderr) {
                return Err(Error::SudoFailed);
            }
        }

        Ok(output)
    }
}

/// Probe result of `sudo -n true` as a yes/no answer.
/// Only "a password is required" means no; any other failure is unexpected.
pub fn interpret_probe(result: std::io::Result<Output>) -> Result<bool> {
    let output = result.map_err(|e| Error::SudoProbe(e.to_string()))?;
    if output.status.success() {
        return Ok(true);
    }
    let message = String::from_utf8_lossy(&output.stderr);
    if message.trim() == "sudo: a password is required" {
        return Ok(false);
    }
    Err(Error::SudoProbe(message.trim().to_string()))
}

/// Run a command with a timeout. Returns the command output or an error.
fn run_command_with_timeout(
    command: &mut Command,
    display: &str,
    input: Option<&[u8]>,
    timeout_secs: u64,
) -> Result<Output> {
    let mut child = command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit() // Allow sudo to prompt for password
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                let program = display.split_whitespace().next().unwrap_or(display);
                Error::CommandNotFound {
                    command: program.to_string(),
                    hint: get_install_hint(program),
                }
            } else {
                Error::Command {
                    command: display.to_string(),
                    stderr: e.to_string(),
                }
            }
        })?;

    // Pipes are drained while the child runs; a full pipe would block it
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(bytes).map_err(|e| Error::Command {
            command: display.to_string(),
            stderr: e.to_string(),
        })?;
        // stdin is closed on drop so the child sees EOF
    }

    let timeout = Duration::from_secs(timeout_secs);
    let start = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    // Reap the child so it does not linger as a zombie
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::TrustStoreTimeout {
                        seconds: timeout_secs,
                    });
                }
                thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
            Err(e) => {
                return Err(Error::Command {
                    command: display.to_string(),
                    stderr: e.to_string(),
                });
            }
        }
    };

    Ok(Output {
        status,
        stdout: collect(stdout_reader, display)?,
        stderr: collect(stderr_reader, display)?,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(reader: thread::JoinHandle<io::Result<Vec<u8>>>, display: &str) -> Result<Vec<u8>> {
    let failed = |message: String| Error::Command {
        command: display.to_string(),
        stderr: message,
    };
    reader
        .join()
        .map_err(|_| failed("output reader panicked".into()))?
        .map_err(|e| failed(e.to_string()))
}

/// Get installation hint for missing commands
pub fn get_install_hint(command: &str) -> String {
    match command {
        "sudo" => {
            "Sudo is required for trust store operations. Please install sudo or run as root."
                .to_string()
        }
        "update-ca-certificates" => {
            "Install ca-certificates package: sudo apt install ca-certificates".to_string()
        }
        "certutil" if cfg!(target_os = "macos") => {
            "Install NSS tools for Firefox support: brew install nss".to_string()
        }
        "certutil" => {
            "Install certutil for Firefox and Chrome support: sudo apt install libnss3-tools"
                .to_string()
        }
        "openssl" => "Install OpenSSL and make sure it is on your PATH".to_string(),
        _ => format!("Please install the '{}' command", command),
    }
}

/// Check if sudo error indicates authentication failure
fn is_sudo_auth_failure(stderr: &str) -> bool {
    stderr.contains("sudo: no password was provided")
        || stderr.contains("sudo: a password is required")
        || stderr.contains("Sorry, try again")
        || stderr.contains("sudo: 3 incorrect password attempts")
        || stderr.contains("Authentication failure")
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn output(code: i32, stderr: &str) -> std::io::Result<Output> {
        Ok(Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        })
    }

    #[test]
    fn test_probe_success_means_sudo() {
        assert!(interpret_probe(output(0, "")).expect("probe should succeed"));
    }

    #[test]
    fn test_probe_password_required_means_no_sudo() {
        let result = interpret_probe(output(1, "sudo: a password is required\n"));
        assert!(!result.expect("password prompt is an expected answer"));
    }

    #[test]
    fn test_probe_other_failure_is_error() {
        let err = interpret_probe(output(1, "sudo: unable to resolve host")).unwrap_err();
        assert!(matches!(err, Error::SudoProbe(_)));
        assert!(err
            .to_string()
            .starts_with("Unexpected error while trying to detect sudo elevation:"));
    }

    #[test]
    fn test_probe_spawn_failure_is_error() {
        let err = interpret_probe(Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "sudo missing",
        )))
        .unwrap_err();
        assert!(matches!(err, Error::SudoProbe(_)));
    }

    #[test]
    fn test_auth_failure_detection() {
        assert!(is_sudo_auth_failure("Sorry, try again.\n"));
        assert!(is_sudo_auth_failure("sudo: a password is required"));
        assert!(!is_sudo_auth_failure("cp: cannot stat 'x'"));
    }

    #[test]
    fn test_run_with_timeout_kills_slow_command() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let err = run_command_with_timeout(&mut command, "sleep", None, 1).unwrap_err();
        assert!(matches!(err, Error::TrustStoreTimeout { seconds: 1 }));
    }

    #[test]
    fn test_run_with_input_feeds_stdin() {
        let mut command = Command::new("cat");
        let output = run_command_with_timeout(&mut command, "cat", Some(b"hello"), 5)
            .expect("cat should run");
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn test_large_output_does_not_stall() {
        // Well past a pipe buffer; the child only exits once it is all read
        let mut command = Command::new("head");
        command.args(["-c", "1048576", "/dev/zero"]);
        let output = run_command_with_timeout(&mut command, "head", None, 5)
            .expect("head should finish before the timeout");
        assert!(output.status.success());
        assert_eq!(output.stdout.len(), 1_048_576);
    }

    #[test]
    fn test_missing_command_has_hint() {
        let mut command = Command::new("certin-no-such-tool");
        let err =
            run_command_with_timeout(&mut command, "certin-no-such-tool", None, 5).unwrap_err();
        assert!(matches!(err, Error::CommandNotFound { .. }));
    }
}
