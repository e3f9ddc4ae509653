use crate::{
    engine::{EngineCapabilities, ExecutionOutcome, ExecutionRequest, PythonEngine},
    errors::{Result, ToolboxError},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const TIMEOUT_ENV: &str = "TOOLBOX_TIMEOUT_SECS";
const CSV_PATH_ENV: &str = "TOOLBOX_CSV_PATH";
const REPORT_PATH_ENV: &str = "TOOLBOX_REPORT_PATH";

/// Extra time the child gets to report its own SIGALRM timeout before the
/// host kills the process group. Covers interpreter start-up and the
/// pandas/numpy imports, which run before the in-process timer is armed.
const HARD_KILL_GRACE: Duration = Duration::from_secs(3);

/// Runs inside the child interpreter. Reads user code from stdin, executes it
/// in a fresh namespace and writes one JSON report to `TOOLBOX_REPORT_PATH`.
/// The report never travels over the child's stdout, so processes the code
/// leaves behind cannot hold up or corrupt it.
const WRAPPER: &str = r#"
import io
import json
import os
import signal
import sys
import time
import traceback

_real_stdout = sys.stdout
_real_stderr = sys.stderr
_code = sys.stdin.read()
_timeout = float(os.environ.get("TOOLBOX_TIMEOUT_SECS", "5"))

class _Deadline(BaseException):
    pass

def _on_alarm(signum, frame):
    raise _Deadline()

_namespace = {
    "__name__": "__main__",
    "__builtins__": __builtins__,
    "CSV_PATH": os.environ.get("TOOLBOX_CSV_PATH", os.getcwd()),
}
try:
    import pandas as pd
    _namespace["pd"] = pd
except Exception:
    pass
try:
    import numpy as np
    _namespace["np"] = np
except Exception:
    pass

_cooperative = hasattr(signal, "SIGALRM") and hasattr(signal, "setitimer")
_out = io.StringIO()
_err = io.StringIO()
_error = None
_timed_out = False

sys.stdout = _out
sys.stderr = _err
_started = time.perf_counter()
try:
    try:
        if _cooperative:
            signal.signal(signal.SIGALRM, _on_alarm)
            signal.setitimer(signal.ITIMER_REAL, _timeout)
        exec(compile(_code, "<py_eval>", "exec"), _namespace)
    finally:
        if _cooperative:
            signal.setitimer(signal.ITIMER_REAL, 0)
except _Deadline:
    _timed_out = True
except SystemExit as e:
    if e.code not in (None, 0):
        _error = traceback.format_exc()
except BaseException:
    _error = traceback.format_exc()
_elapsed_ms = (time.perf_counter() - _started) * 1000.0

sys.stdout = _real_stdout
sys.stderr = _real_stderr

_report = {
    "stdout": _out.getvalue(),
    "stderr": _err.getvalue(),
    "error": _error,
    "timed_out": _timed_out,
    "cooperative": _cooperative,
    "elapsed_ms": _elapsed_ms,
}
with open(os.environ["TOOLBOX_REPORT_PATH"], "w", encoding="utf-8") as _f:
    json.dump(_report, _f)
"#;

/// Report printed by the wrapper script
#[derive(Debug, Deserialize)]
struct WrapperReport {
    stdout: String,
    stderr: String,
    error: Option<String>,
    timed_out: bool,
    #[serde(default)]
    cooperative: bool,
    elapsed_ms: Option<f64>,
}

/// Out-of-process Python engine: one interpreter per call, killed on expiry
pub struct NativePythonEngine {
    python_path: PathBuf,
}

impl NativePythonEngine {
    /// Create a new native Python engine (finds Python in PATH)
    pub fn new() -> Result<Self> {
        let python_path = which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|_| ToolboxError::PythonNotFound)?;

        Ok(Self { python_path })
    }

    /// Create with explicit Python path. Bare names are looked up on PATH.
    pub fn with_python_path(python_path: PathBuf) -> Result<Self> {
        let resolved = if python_path.components().count() == 1 && !python_path.is_absolute() {
            which::which(&python_path).map_err(|_| ToolboxError::PythonNotFound)?
        } else {
            python_path
        };
        if !resolved.exists() {
            return Err(ToolboxError::PythonNotFound);
        }

        Ok(Self {
            python_path: resolved,
        })
    }

    /// Use the configured interpreter when given, PATH lookup otherwise
    pub fn from_config(python_path: Option<&PathBuf>) -> Result<Self> {
        match python_path {
            Some(path) => Self::with_python_path(path.clone()),
            None => Self::new(),
        }
    }

    /// Get the Python executable path being used
    pub fn python_path(&self) -> &PathBuf {
        &self.python_path
    }

    /// stdout is discarded: everything the code prints is captured in-process.
    /// stderr goes to a file so interpreter start-up failures can be reported.
    fn build_command(&self, request: &ExecutionRequest, report: &Path, stderr: File) -> Command {
        let mut cmd = Command::new(&self.python_path);
        cmd.arg("-c")
            .arg(WRAPPER)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .env("PYTHONIOENCODING", "utf-8")
            .env(TIMEOUT_ENV, request.timeout.as_secs_f64().to_string())
            .env(CSV_PATH_ENV, &request.csv_path)
            .env(REPORT_PATH_ENV, report)
            .kill_on_drop(true);

        if request.csv_path.is_dir() {
            cmd.current_dir(&request.csv_path);
        }

        // Own process group so a timeout can take down anything the code spawned
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Take down the interpreter and anything it spawned
    #[cfg(unix)]
    fn kill_process_group(pid: Option<u32>) {
        if let Some(pid) = pid {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_process_group(_pid: Option<u32>) {
        // kill_on_drop reaps the direct child; there is no group to signal
    }
}

/// Turn the wrapper's report into an outcome
fn parse_report(
    report: &str,
    stderr: &str,
    timeout: Duration,
    host_elapsed: Duration,
) -> Result<ExecutionOutcome> {
    if report.trim().is_empty() {
        let detail = stderr.trim();
        return Err(ToolboxError::MalformedOutput(if detail.is_empty() {
            "interpreter produced no report".to_string()
        } else {
            detail.to_string()
        }));
    }
    let report: WrapperReport = serde_json::from_str(report)?;

    if !report.cooperative {
        debug!("interpreter has no SIGALRM; relying on host-side kill only");
    }

    let elapsed_ms = report
        .elapsed_ms
        .map(|ms| ms.max(0.0).round() as u64)
        .unwrap_or_else(|| host_elapsed.as_millis() as u64);

    let error = if report.timed_out {
        Some(ToolboxError::Timeout(timeout.as_secs_f64()).to_string())
    } else {
        report.error
    };

    Ok(ExecutionOutcome {
        success: error.is_none(),
        stdout: report.stdout,
        stderr: report.stderr,
        error,
        elapsed_ms,
    })
}

fn read_all(file: &mut File) -> Result<String> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

#[async_trait]
impl PythonEngine for NativePythonEngine {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let report = tempfile::Builder::new()
            .prefix("toolbox-report-")
            .suffix(".json")
            .tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        let mut child = self
            .build_command(request, report.path(), stderr.try_clone()?)
            .spawn()?;
        let pid = child.id();

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.code.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        // Wait on the interpreter itself, not its pipes: background processes
        // started by the code must not keep the call open.
        let waited =
            tokio::time::timeout(request.timeout.saturating_add(HARD_KILL_GRACE), child.wait())
                .await;
        Self::kill_process_group(pid);

        match waited {
            Ok(Ok(status)) => {
                let stderr = read_all(&mut stderr)?;
                if !stderr.trim().is_empty() {
                    debug!("interpreter stderr ({}): {}", status, stderr.trim());
                }
                let report = std::fs::read_to_string(report.path())?;
                parse_report(&report, &stderr, request.timeout, started.elapsed())
            }
            Ok(Err(e)) => Err(ToolboxError::IoError(e)),
            Err(_) => {
                warn!(
                    "py_eval exceeded {:?} plus grace; killed process group",
                    request.timeout
                );
                let _ = child.kill().await;
                Ok(ExecutionOutcome::failed(
                    ToolboxError::Timeout(request.timeout.as_secs_f64()).to_string(),
                    started.elapsed(),
                ))
            }
        }
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            name: "Native Python (out-of-process)".to_string(),
            python_path: self.python_path.clone(),
            cooperative_deadline: cfg!(unix),
            hard_kill: cfg!(unix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Option<NativePythonEngine> {
        NativePythonEngine::new().ok()
    }

    fn request(code: &str, timeout_ms: u64) -> ExecutionRequest {
        ExecutionRequest::new(code, Duration::from_millis(timeout_ms), std::env::temp_dir())
    }

    #[test]
    fn test_parse_report() {
        let report = r#"{"stdout":"hi\n","stderr":"","error":null,"timed_out":false,"cooperative":true,"elapsed_ms":1.6}"#;
        let outcome = parse_report(report, "", Duration::from_secs(5), Duration::ZERO).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.stdout, "hi\n");
        assert_eq!(outcome.elapsed_ms, 2);
    }

    #[test]
    fn test_parse_report_timeout_message() {
        let report = r#"{"stdout":"partial","stderr":"","error":null,"timed_out":true,"elapsed_ms":500.0}"#;
        let outcome =
            parse_report(report, "", Duration::from_millis(500), Duration::ZERO).unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Execution timed out after 0.5 seconds")
        );
    }

    #[test]
    fn test_parse_missing_report_is_error() {
        let err = parse_report("", "boom", Duration::from_secs(1), Duration::ZERO).unwrap_err();
        assert!(matches!(err, ToolboxError::MalformedOutput(ref m) if m == "boom"));
    }

    #[tokio::test]
    async fn test_stdout_is_captured_exactly() {
        let Some(engine) = engine() else { return };
        let outcome = engine
            .execute(&request("print('hello')\nprint('world', end='')", 5000))
            .await
            .unwrap();
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.stdout, "hello\nworld");
        assert_eq!(outcome.error, None);
    }

    #[tokio::test]
    async fn test_stderr_is_captured() {
        let Some(engine) = engine() else { return };
        let outcome = engine
            .execute(&request("import sys\nsys.stderr.write('careful')", 5000))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.stderr, "careful");
    }

    #[tokio::test]
    async fn test_runtime_fault_returns_traceback() {
        let Some(engine) = engine() else { return };
        let outcome = engine
            .execute(&request("print('before')\n1 / 0", 5000))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.stdout, "before\n");
        let error = outcome.error.unwrap();
        assert!(error.starts_with("Traceback"));
        assert!(error.contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_syntax_error_is_a_fault() {
        let Some(engine) = engine() else { return };
        let outcome = engine.execute(&request("def broken(:", 5000)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("SyntaxError"));
    }

    #[tokio::test]
    async fn test_namespace_is_fresh_per_call() {
        let Some(engine) = engine() else { return };
        let first = engine.execute(&request("leaked = 1", 5000)).await.unwrap();
        assert!(first.success);
        let second = engine
            .execute(&request("print('leaked' in globals())", 5000))
            .await
            .unwrap();
        assert_eq!(second.stdout, "False\n");
    }

    #[tokio::test]
    async fn test_csv_path_is_injected() {
        let Some(engine) = engine() else { return };
        let dir = tempfile::tempdir().unwrap();
        let req = ExecutionRequest::new("print(CSV_PATH)", Duration::from_secs(5), dir.path());
        let outcome = engine.execute(&req).await.unwrap();
        assert_eq!(outcome.stdout.trim_end(), dir.path().to_string_lossy());
    }

    #[tokio::test]
    async fn test_sleep_past_deadline_times_out() {
        let Some(engine) = engine() else { return };
        let outcome = engine
            .execute(&request("import time\nprint('start')\ntime.sleep(10)", 500))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
        assert!(outcome.elapsed_ms >= 400, "elapsed {}", outcome.elapsed_ms);
        assert!(outcome.elapsed_ms < 5000, "elapsed {}", outcome.elapsed_ms);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_process_does_not_hold_the_call() {
        let Some(engine) = engine() else { return };
        if which::which("sleep").is_err() {
            return;
        }
        let code = "import subprocess\nsubprocess.Popen(['sleep', '20'])\nprint('done')";
        let started = Instant::now();
        let outcome = engine.execute(&request(code, 1000)).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_raw_fd_writes_do_not_corrupt_the_report() {
        let Some(engine) = engine() else { return };
        let code = "import os\nos.write(1, b'{not json')\nprint('ok')";
        let outcome = engine.execute(&request(code, 5000)).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.stdout, "ok\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ignored_alarm_falls_back_to_hard_kill() {
        let Some(engine) = engine() else { return };
        let code = "import signal, time\nsignal.signal(signal.SIGALRM, signal.SIG_IGN)\ntime.sleep(30)";
        let started = Instant::now();
        let outcome = engine.execute(&request(code, 300)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_interpreter_path() {
        let result = NativePythonEngine::with_python_path(PathBuf::from(
            "/definitely/not/here/python3",
        ));
        assert!(matches!(result, Err(ToolboxError::PythonNotFound)));
    }
}
