//! Host automation: the collaborator that actually sends messages and marks
//! conversations read on the host.
//!
//! The relay never writes to the message store itself. Both operations go
//! through an external program (`COURIER_HOST_COMMAND`) so the scripting
//! bridge to the host messaging app can evolve on its own.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host automation is not configured")]
    Unavailable,

    #[error("failed to run host command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("host command exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub recipient: String,
    pub text: String,
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_service() -> String {
    "iMessage".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub delivered: bool,
    pub detail: Option<String>,
}

#[async_trait]
pub trait HostAutomation: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, HostError>;
    async fn mark_read(&self, conversation_id: &str) -> Result<(), HostError>;
}

/// Runs the configured program once per operation.
///
/// `send <service> -- <recipient>` receives the text on stdin so message
/// bodies never show up in process listings. Client-supplied values always
/// follow `--` so they cannot be read as options.
#[derive(Debug, Clone, Default)]
pub struct CommandHost {
    program: Option<PathBuf>,
}

impl CommandHost {
    pub fn new(program: Option<PathBuf>) -> Self {
        Self { program }
    }

    fn program(&self) -> Result<&PathBuf, HostError> {
        self.program.as_ref().ok_or(HostError::Unavailable)
    }
}

#[async_trait]
impl HostAutomation for CommandHost {
    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, HostError> {
        let mut child = Command::new(self.program()?)
            .arg("send")
            .arg(&request.service)
            .arg("--")
            .arg(&request.recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(request.text.as_bytes()).await {
                Ok(()) => {}
                // The program may not read the body at all.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;
        let delivered = output.status.success();
        let detail = if delivered {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        };

        tracing::info!(
            recipient = %request.recipient,
            service = %request.service,
            delivered,
            "host send finished"
        );

        Ok(SendReceipt {
            delivered,
            detail: (!detail.is_empty()).then_some(detail),
        })
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<(), HostError> {
        let output = Command::new(self.program()?)
            .arg("mark-read")
            .arg("--")
            .arg(conversation_id)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(HostError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::debug!(conversation_id, "marked read");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every call and reports success.
    #[derive(Default)]
    pub struct RecordingHost {
        pub sent: Mutex<Vec<SendRequest>>,
        pub read: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HostAutomation for RecordingHost {
        async fn send(&self, request: &SendRequest) -> Result<SendReceipt, HostError> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(SendReceipt {
                delivered: true,
                detail: None,
            })
        }

        async fn mark_read(&self, conversation_id: &str) -> Result<(), HostError> {
            self.read.lock().unwrap().push(conversation_id.to_string());
            Ok(())
        }
    }

    /// Every call fails the way a crashing host program would.
    pub struct FailingHost;

    impl FailingHost {
        pub const STDERR: &'static str = "osascript: /Users/me/bridge.scpt line 12";

        fn failure() -> HostError {
            HostError::Failed {
                code: Some(1),
                stderr: Self::STDERR.to_string(),
            }
        }
    }

    #[async_trait]
    impl HostAutomation for FailingHost {
        async fn send(&self, _request: &SendRequest) -> Result<SendReceipt, HostError> {
            Err(Self::failure())
        }

        async fn mark_read(&self, _conversation_id: &str) -> Result<(), HostError> {
            Err(Self::failure())
        }
    }
}
