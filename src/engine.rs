use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A single py_eval invocation
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Python source to run
    pub code: String,
    /// Wall-clock deadline
    pub timeout: Duration,
    /// Exposed to the code as `CSV_PATH`; also the working directory
    pub csv_path: PathBuf,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, timeout: Duration, csv_path: impl Into<PathBuf>) -> Self {
        Self {
            code: code.into(),
            timeout,
            csv_path: csv_path.into(),
        }
    }
}

/// Structured result of a py_eval invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ExecutionOutcome {
    /// Failure that happened outside the user's code (spawn, timeout, host I/O)
    pub fn failed(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.into()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Capabilities of a Python execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Engine name
    pub name: String,
    /// Interpreter the engine launches
    pub python_path: PathBuf,
    /// Whether the child can interrupt itself with SIGALRM before the hard kill
    pub cooperative_deadline: bool,
    /// Whether the host can kill the child's whole process group on expiry
    pub hard_kill: bool,
}

/// Trait for Python execution engines
#[async_trait]
pub trait PythonEngine: Send + Sync {
    /// Execute code in a fresh namespace. Faults in the user's code come back
    /// inside the outcome; `Err` is reserved for host-side failures.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome>;

    /// Get engine capabilities
    fn capabilities(&self) -> EngineCapabilities;
}
