//! Synchronous launching of external tools
//!
//! Every external collaborator (resolver, bundler, publishers) runs as a
//! child process. A launch blocks until the process exits or the timeout
//! elapses; a timeout of zero waits forever.

use std::{
    fmt,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A program plus the arguments placed before any launch-specific ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ToolCommand {
    /// Build from an argv vector; `None` when it is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: None,
        })
    }

    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Output of a process that exited successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Why a launch did not succeed
#[derive(Debug)]
pub enum LaunchError {
    /// The process could not be started or waited on
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// The process exited with a non-zero status, `None` when killed by a signal
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    /// The process was killed after running past its timeout
    TimedOut { program: String, seconds: u64 },
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "failed to run '{program}': {source}"),
            Self::Failed {
                program,
                exit_code,
                stderr,
            } => {
                match exit_code {
                    Some(code) => write!(f, "'{program}' exited with code {code}")?,
                    None => write!(f, "'{program}' was terminated by a signal")?,
                }
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::TimedOut { program, seconds } => {
                write!(f, "'{program}' killed by timeout after {seconds}s")
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Run `command` followed by `extra_args`, waiting at most `timeout_seconds`
pub fn launch(
    command: &ToolCommand,
    extra_args: &[String],
    timeout_seconds: u64,
) -> Result<LaunchOutput, LaunchError> {
    let program = command.program.clone();
    debug!(
        "Launching {program} {} {}",
        command.args.join(" "),
        extra_args.join(" ")
    );

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &command.working_dir {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: program.clone(),
        source,
    })?;

    // Drain both pipes while waiting so a chatty tool cannot block on a full pipe
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match wait_with_timeout(&mut child, timeout_seconds) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate(&mut child);
            return Err(LaunchError::TimedOut {
                program,
                seconds: timeout_seconds,
            });
        }
        Err(source) => {
            terminate(&mut child);
            return Err(LaunchError::Spawn { program, source });
        }
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    let duration = start.elapsed();
    trace!("{program} finished in {}ms", duration.as_millis());

    if !status.success() {
        return Err(LaunchError::Failed {
            program,
            exit_code: status.code(),
            stderr,
        });
    }

    Ok(LaunchOutput {
        stdout,
        stderr,
        duration,
    })
}

fn wait_with_timeout(
    child: &mut Child,
    timeout_seconds: u64,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    if timeout_seconds == 0 {
        return child.wait().map(Some);
    }

    let timeout = Duration::from_secs(timeout_seconds);
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill a child and reap it, ignoring a process that already exited
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

/// Split a free-form argument line on whitespace
pub fn split_args(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_owned).collect()
}

/// Render a path the way P2 tools expect repository locations
pub fn file_url(path: &Path) -> String {
    format!("file:{}", path.display())
}
