//! Document conversion boundary.
//!
//! docfetch does not convert documents itself. A [`Converter`] receives the
//! path of a sniffed, size-checked file and a time budget, and returns
//! Markdown. [`CommandConverter`] runs an external program for this.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;

/// Bytes of stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 2048;

/// Default ceiling on converter stdout.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;

pub type ConvertFut<'a> = Pin<Box<dyn Future<Output = Result<String, ConvertError>> + Send + 'a>>;

/// Converts a local file to Markdown within a time budget.
pub trait Converter: Send + Sync {
    fn convert<'a>(&'a self, path: &'a Path, budget: Duration) -> ConvertFut<'a>;
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to start converter {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("converter exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("conversion timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("converter output is not valid UTF-8")]
    InvalidOutput,
    #[error("converter output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
    #[error("converter I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConvertError::Timeout(_))
    }
}

/// Runs `program [args...] <path>` and reads Markdown from stdout.
///
/// The child is killed if the budget elapses, stdout grows past the output
/// ceiling, or the future is dropped.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
    args: Vec<OsString>,
    max_output_bytes: usize,
}

impl CommandConverter {
    pub const DEFAULT_PROGRAM: &'static str = "markitdown";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    /// Argument placed before the file path.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, path: &Path, budget: Duration) -> Result<String, ConvertError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ConvertError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;

        let collect = async {
            let (stdout, stderr) = tokio::try_join!(
                read_capped(stdout, limit),
                read_tail(stderr, STDERR_TAIL_BYTES),
            )?;
            let status = child.wait().await?;
            Ok::<_, ConvertError>((status, stdout, stderr))
        };

        let (status, stdout, stderr) = match timeout(budget, collect).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                if let ConvertError::OutputTooLarge { limit } = &e {
                    tracing::warn!(
                        program = %self.program.display(),
                        limit = *limit,
                        "Converter output too large"
                    );
                }
                return Err(e);
            }
            Err(_) => {
                tracing::error!(
                    program = %self.program.display(),
                    timeout_secs = budget.as_secs(),
                    "Conversion timed out"
                );
                return Err(ConvertError::Timeout(budget));
            }
        };

        if !status.success() {
            return Err(ConvertError::Failed {
                status,
                stderr: stderr_tail(&stderr),
            });
        }

        String::from_utf8(stdout).map_err(|_| ConvertError::InvalidOutput)
    }
}

impl Default for CommandConverter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PROGRAM)
    }
}

impl Converter for CommandConverter {
    fn convert<'a>(&'a self, path: &'a Path, budget: Duration) -> ConvertFut<'a> {
        Box::pin(async move {
            tracing::debug!(
                program = %self.program.display(),
                path = %path.display(),
                "Starting conversion"
            );
            self.run(path, budget).await
        })
    }
}

/// Read at most `limit` bytes; one more is an error.
async fn read_capped<R>(pipe: Option<R>, limit: usize) -> Result<Vec<u8>, ConvertError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let Some(pipe) = pipe else {
        return Ok(buf);
    };
    pipe.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        return Err(ConvertError::OutputTooLarge { limit });
    }
    Ok(buf)
}

/// Drain the pipe, keeping only its last `keep` bytes (roughly).
async fn read_tail<R>(pipe: Option<R>, keep: usize) -> Result<Vec<u8>, ConvertError>
where
    R: AsyncRead + Unpin,
{
    let mut tail = Vec::new();
    let Some(mut pipe) = pipe else {
        return Ok(tail);
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(tail);
        }
        tail.extend_from_slice(&chunk[..n]);
        if tail.len() > keep * 2 {
            tail.drain(..tail.len() - keep);
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::{ConvertError, read_capped, read_tail, stderr_tail};

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = format!("{}END", "x".repeat(5000));
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.len(), 2048);
        assert!(tail.ends_with("END"));
        assert_eq!(stderr_tail(b"  boom\n"), "boom");
    }

    #[tokio::test]
    async fn capped_read_allows_exactly_the_limit() {
        let exact = read_capped(Some(&b"abcd"[..]), 4).await.unwrap();
        assert_eq!(exact, b"abcd");
        let err = read_capped(Some(&b"abcde"[..]), 4).await.unwrap_err();
        assert!(matches!(err, ConvertError::OutputTooLarge { limit: 4 }), "{err}");
    }

    #[tokio::test]
    async fn tail_read_drains_everything_and_keeps_the_end() {
        let noisy = format!("{}END", "x".repeat(100_000));
        let tail = read_tail(Some(noisy.as_bytes()), 16).await.unwrap();
        assert!(tail.len() <= 32);
        assert!(tail.ends_with(b"END"));
    }
}
