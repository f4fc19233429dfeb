use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, warn};

use super::{QueryError, ResultGrid};

/// Feed the grid rows to `<shell> -c <command>` and return its stdout
///
/// Rows are written as comma-joined lines. A command that cannot start or
/// exits unsuccessfully is a [`QueryError::PipeCommand`].
pub fn pipe_to_shell(shell: &str, command: &str, grid: &ResultGrid) -> Result<String, QueryError> {
    debug!(command = %command, rows = grid.rows.len(), "Piping result to shell");

    let mut child = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| QueryError::PipeCommand(e.to_string()))?;

    // stdin is fed from its own thread while stdout is collected here
    let writer = child.stdin.take().map(|mut stdin| {
        let input = grid.to_lines();
        thread::spawn(move || {
            // A command that ignores its input may close the pipe early
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                debug!(error = %e, "Pipe command closed stdin");
            }
        })
    });

    let output = child
        .wait_with_output()
        .map_err(|e| QueryError::PipeCommand(e.to_string()));
    if let Some(writer) = writer {
        if writer.join().is_err() {
            warn!(command = %command, "Pipe writer panicked");
        }
    }
    let output = output?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(command = %command, status = %output.status, "Pipe command failed");
        return Err(QueryError::PipeCommand(if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        }));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
