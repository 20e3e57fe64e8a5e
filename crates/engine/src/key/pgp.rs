//! PGP backend: pipes the armored data key through a local gpg agent.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use common::KeyEntry;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{BackendError, BackendKind, KeyBackend};

/// A channel to a local decryption agent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Decrypt an ASCII-armored message, returning the raw plaintext.
    async fn decrypt(&self, armored: &str) -> Result<Vec<u8>, BackendError>;
}

/// Runs `<exec> --use-agent -d` once per call, with the message on stdin.
#[derive(Debug, Clone)]
pub struct GpgAgent {
    exec: String,
}

impl GpgAgent {
    pub fn new(exec: impl Into<String>) -> Self {
        Self { exec: exec.into() }
    }
}

#[async_trait]
impl AgentChannel for GpgAgent {
    async fn decrypt(&self, armored: &str) -> Result<Vec<u8>, BackendError> {
        let mut child = Command::new(&self.exec)
            .args(["--use-agent", "-d"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Agent(format!("failed to start `{}`: {e}", self.exec)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // The agent may exit before reading its input.
            match stdin.write_all(armored.as_bytes()).await {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => {
                    return Err(BackendError::Agent(format!("failed to write to `{}`: {e}", self.exec)))
                }
                _ => {}
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BackendError::Agent(format!("`{}` did not complete: {e}", self.exec)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Agent(format!(
                "`{}` exited with {}: {}",
                self.exec,
                output.status,
                stderr.trim()
            )));
        }
        debug!(exec = %self.exec, "agent decrypt completed");
        Ok(output.stdout)
    }
}

/// Reads the `pgp` branch: armored `enc`, `fp` informational only.
pub struct PgpBackend<C> {
    channel: C,
}

impl<C: AgentChannel> PgpBackend<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl<C: AgentChannel> KeyBackend for PgpBackend<C> {
    fn kind(&self) -> BackendKind {
        BackendKind::Pgp
    }

    async fn unwrap_key(&self, entry: &KeyEntry) -> Result<Vec<u8>, BackendError> {
        let armored = entry
            .ciphertext()
            .ok_or_else(|| BackendError::InvalidCiphertext("entry has no `enc` value".into()))?;
        debug!(fp = entry.fp.as_deref().unwrap_or("-"), "unwrapping via agent");
        self.channel.decrypt(armored).await
    }
}
