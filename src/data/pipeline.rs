//! Refresh pipeline contract and a command-based implementation
//!
//! A refresh pipeline pulls fresh data for a symbol from upstream providers
//! and loads it into the persistent store. Its internals are opaque here; the
//! orchestrator only needs to know whether a run succeeded.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Errors that can occur while running a refresh
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline process could not be started
    #[error("Failed to start refresh command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The pipeline ran but reported failure
    #[error("Refresh command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// Any other pipeline-specific failure
    #[error("Refresh failed: {0}")]
    Other(String),
}

/// External refresh pipeline that writes fresh records into the store
#[async_trait]
pub trait RefreshPipeline: Send + Sync {
    /// Runs a refresh for one symbol; may take seconds
    async fn run_refresh(&self, symbol: &str) -> Result<(), PipelineError>;
}

/// Runs an external program as the refresh pipeline
///
/// The symbol is appended as the last argument. The child process is not
/// killed when the orchestrator stops waiting, so a slow run still finishes
/// and loads its data.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    program: String,
    args: Vec<String>,
}

impl CommandPipeline {
    /// Creates a pipeline from an argv list; returns `None` when it is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl RefreshPipeline for CommandPipeline {
    async fn run_refresh(&self, symbol: &str) -> Result<(), PipelineError> {
        tracing::debug!(program = %self.program, symbol, "Running refresh command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(symbol)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .output()
            .await
            .map_err(|source| PipelineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(PipelineError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
