#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Subprocess helper for running synthesized programs under a deadline.

use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::Stdio,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncReadExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
    time::timeout,
};

/// Drop guard that kills a spawned child if it is abandoned, e.g. when the
/// deadline expires while waiting on it.
struct ChildDropGuard(Option<Child>);

impl ChildDropGuard {
    /// Wraps the provided child process with the drop guard.
    fn new(child: Child) -> Self {
        Self(Some(child))
    }

    /// Returns a mutable reference to the underlying child process.
    fn child_mut(&mut self) -> Result<&mut Child> {
        self.0
            .as_mut()
            .context("child process already taken from guard")
    }

    /// Prevents the guard from killing the process on drop.
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for ChildDropGuard {
    fn drop(&mut self) {
        if let Some(child) = self.0.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct Collected {
    /// Exit status returned by the process.
    pub status: std::process::ExitStatus,
    /// Contents written to stdout.
    pub stdout: Vec<u8>,
    /// Contents written to stderr.
    pub stderr: Vec<u8>,
}

/// Reads `stream` to the end on a separate task.
fn drain<R>(stream: R, label: &'static str) -> JoinHandle<Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("failed to read {label}"))?;
        Ok(buf)
    })
}

/// Spawns `program` with no stdin and collects its stdout and stderr.
///
/// * `cwd`: working directory for the child, if not the current one
/// * `deadline`: the child is killed and an error returned once it elapses
pub async fn run_collect(
    program: impl AsRef<OsStr>,
    args: &[OsString],
    cwd: Option<&Path>,
    deadline: Option<Duration>,
) -> Result<Collected> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut guard = ChildDropGuard::new(cmd.spawn().context("failed to spawn process")?);

    let stdout = guard
        .child_mut()?
        .stdout
        .take()
        .context("missing stdout pipe")?;
    let stderr = guard
        .child_mut()?
        .stderr
        .take()
        .context("missing stderr pipe")?;

    let out_task = drain(stdout, "stdout");
    let err_task = drain(stderr, "stderr");

    let wait_future = async move {
        let mut guard = guard;
        let status = guard
            .child_mut()?
            .wait()
            .await
            .context("failed to wait on process")?;
        let stdout = out_task.await.context("stdout task join error")??;
        let stderr = err_task.await.context("stderr task join error")??;
        guard.disarm();
        Ok(Collected {
            status,
            stdout,
            stderr,
        })
    };

    match deadline {
        Some(limit) => timeout(limit, wait_future)
            .await
            .with_context(|| format!("subprocess timed out after {}s", limit.as_secs()))?,
        None => wait_future.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_output_of_a_python_child() {
        let Ok(python) = crate::util::python_path() else {
            return;
        };
        let args = vec![OsString::from("-c"), OsString::from("print('hello')")];

        let collected = run_collect(&python, &args, None, Some(Duration::from_secs(30)))
            .await
            .expect("python runs");

        assert!(collected.status.success());
        assert_eq!(String::from_utf8_lossy(&collected.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn deadline_kills_the_child() {
        let Ok(python) = crate::util::python_path() else {
            return;
        };
        let args = vec![
            OsString::from("-c"),
            OsString::from("import time; time.sleep(30)"),
        ];

        let outcome = run_collect(&python, &args, None, Some(Duration::from_millis(200))).await;

        assert!(outcome.is_err());
    }
}
