//! Command execution inside a pod

use crate::streams::{SharedWriter, write_locked};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, AttachParams};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A command bound to a pod container, run once
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command, copying its output to the bound writers until it exits
    async fn stream(&mut self) -> Result<()>;
}

/// [`CommandExecutor`] over the pod `exec` websocket
pub struct PodCommandExecutor {
    api: Api<Pod>,
    pod: String,
    container: String,
    command: Vec<String>,
    stdout: SharedWriter,
    stderr: SharedWriter,
}

impl PodCommandExecutor {
    pub fn new(
        client: Client,
        pod: &Pod,
        container: &str,
        command: &[String],
        stdout: SharedWriter,
        stderr: SharedWriter,
    ) -> Result<Self> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow!("pod has no name"))?;
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        Ok(Self {
            api: Api::namespaced(client, namespace),
            pod: name,
            container: container.to_string(),
            command: command.to_vec(),
            stdout,
            stderr,
        })
    }
}

async fn pump(reader: Option<impl AsyncRead + Unpin>, writer: &SharedWriter) -> Result<()> {
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        write_locked(writer, &buf[..n])?;
    }
}

#[async_trait]
impl CommandExecutor for PodCommandExecutor {
    async fn stream(&mut self) -> Result<()> {
        let params = AttachParams::default()
            .container(self.container.clone())
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut process = self
            .api
            .exec(&self.pod, self.command.clone(), &params)
            .await
            .with_context(|| format!("error executing command in pod {}", self.pod))?;

        let status = process.take_status();
        let stdout = process.stdout();
        let stderr = process.stderr();
        tokio::try_join!(pump(stdout, &self.stdout), pump(stderr, &self.stderr))?;

        if let Some(status) = status
            && let Some(status) = status.await
            && status.status.as_deref() == Some("Failure")
        {
            bail!(
                "command {:?} failed: {}",
                self.command,
                status.message.unwrap_or_default()
            );
        }
        process.join().await.context("error waiting for exec to finish")?;
        Ok(())
    }
}
