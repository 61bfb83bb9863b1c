//! Running external media tools.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::ProcessError;

/// Longest error excerpt kept from a tool's stderr.
const MAX_ERROR_EXCERPT: usize = 500;

/// Captured output of a successful run.
#[derive(Debug, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` with `args`, feeding each stdout line to `on_line`.
///
/// The child is killed if the returned future is dropped, which is what
/// makes the scheduler's job deadline effective.
pub async fn run_tool<F>(
    program: &Path,
    args: &[OsString],
    mut on_line: F,
) -> Result<ToolOutput, ProcessError>
where
    F: FnMut(&str),
{
    let tool = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    debug!(tool = %tool, args = ?args, "Spawning tool");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Tools echo raw metadata bytes; decode lossily so output is never an I/O error.
    let read_stdout = async {
        let mut collected = String::new();
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf).await? == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                on_line(line);
                collected.push_str(line);
                collected.push('\n');
            }
        }
        Ok::<_, std::io::Error>(collected)
    };
    let read_stderr = async {
        let mut raw = Vec::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_end(&mut raw).await?;
        }
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&raw).into_owned())
    };

    let (stdout, stderr) = tokio::try_join!(read_stdout, read_stderr)?;
    let status = child.wait().await?;

    if !status.success() {
        return Err(ProcessError::ToolFailed {
            tool,
            status: status.to_string(),
            stderr: error_excerpt(&stderr),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// The most telling line of a tool's stderr, bounded in size.
pub fn error_excerpt(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let line = lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR"))
        .or_else(|| lines.last())
        .copied()
        .unwrap_or("no error output");

    if line.chars().count() <= MAX_ERROR_EXCERPT {
        line.to_string()
    } else {
        let mut excerpt: String = line.chars().take(MAX_ERROR_EXCERPT).collect();
        excerpt.push_str("...");
        excerpt
    }
}
