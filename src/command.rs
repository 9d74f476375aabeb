//! External process execution
//!
//! `deploy` shells out to `helm` and `install_flux.sh`, `k3d create` and
//! `k3d destroy` to `k3d-dev.sh`, the AWS accessor to the `aws` CLI. `k3d ssh`
//! runs attached to the terminal. Commands are boxed behind [`CommandRunner`] so handlers can
//! redirect their streams and tests can substitute canned output.

use crate::streams::{SharedWriter, write_locked};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Program and arguments, for logging
    fn describe(&self) -> String;

    fn set_stdin(&mut self, input: Vec<u8>);

    fn set_stdout(&mut self, out: SharedWriter);

    fn set_stderr(&mut self, err: SharedWriter);

    /// Attach the child to the terminal instead of the configured streams
    fn set_interactive(&mut self);

    /// Run to completion; a non-zero exit status is an error
    async fn run(&mut self) -> Result<()>;
}

/// A child process backed by `tokio::process`
pub struct CommandWrapper {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    stdout: Option<SharedWriter>,
    stderr: Option<SharedWriter>,
    interactive: bool,
}

impl CommandWrapper {
    pub fn new(program: impl Into<String>, args: &[String]) -> Self {
        Self {
            program: program.into(),
            args: args.to_vec(),
            stdin: None,
            stdout: None,
            stderr: None,
            interactive: false,
        }
    }

    async fn run_attached(&self) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("error running {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for CommandWrapper {
    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn set_stdin(&mut self, input: Vec<u8>) {
        self.stdin = Some(input);
    }

    fn set_stdout(&mut self, out: SharedWriter) {
        self.stdout = Some(out);
    }

    fn set_stderr(&mut self, err: SharedWriter) {
        self.stderr = Some(err);
    }

    fn set_interactive(&mut self) {
        self.interactive = true;
    }

    async fn run(&mut self) -> Result<()> {
        tracing::debug!("running {}", self.describe());
        if self.interactive {
            return self.run_attached().await;
        }
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("error starting {}", self.program))?;

        if let (Some(input), Some(mut pipe)) = (self.stdin.take(), child.stdin.take()) {
            pipe.write_all(&input)
                .await
                .with_context(|| format!("error writing stdin of {}", self.program))?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("error waiting for {}", self.program))?;

        if let Some(out) = &self.stdout {
            write_locked(out, &output.stdout)?;
        }
        if let Some(err) = &self.stderr {
            write_locked(err, &output.stderr)?;
        }
        if !output.status.success() {
            bail!("{} exited with {}", self.program, output.status);
        }
        Ok(())
    }
}
