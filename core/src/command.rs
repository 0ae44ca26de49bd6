use std::{
    env,
    ffi::OsStr,
    io::{self, Read},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to wait for {program}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// collected output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub runtime: Duration,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();

        if let Some(mut pipe) = pipe {
            if let Err(error) = pipe.read_to_string(&mut buffer) {
                warn!(error = ?error, "Failed to read command output");
            }
        }

        buffer
    })
}

fn collect(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn kill(child: &mut Child, program: &str) {
    if let Err(error) = child.kill() {
        warn!(error = ?error, program, "Failed to kill timed out command");
    }
    // reap, the exit status of a killed child is irrelevant
    let _ = child.wait();
}

/// Run `program` with `args`, failing on a non-zero exit status
///
/// Output pipes are drained while waiting so chatty commands cannot block on a
/// full pipe. Without a timeout the call waits for as long as the command runs.
pub fn run<S, I>(
    program: &str,
    args: I,
    timeout: Option<Duration>,
) -> Result<CommandOutput, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("Running {command:?}");
    let start = Instant::now();

    let mut child = command.spawn().map_err(|source| CommandError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        Some(timeout) => match child.wait_timeout(timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                kill(&mut child, program);

                return Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            Err(source) => {
                return Err(CommandError::Wait {
                    program: program.to_string(),
                    source,
                })
            }
        },
        None => child.wait().map_err(|source| CommandError::Wait {
            program: program.to_string(),
            source,
        })?,
    };

    let output = CommandOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
        runtime: start.elapsed(),
    };

    debug!(
        "{program} finished in {} ms | status: {status}",
        output.runtime.as_millis()
    );

    if status.success() {
        Ok(output)
    } else {
        Err(CommandError::Failed {
            program: program.to_string(),
            status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Locate an executable on `PATH`
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;

    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| crate::config::check_executable(candidate).unwrap_or(false))
}
