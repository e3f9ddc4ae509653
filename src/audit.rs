//! Request audit trail.
//!
//! Every tool invocation is written to its own JSON file under `requests/`,
//! named `{timestamp_ms}-{tool_name}-{requester}.json`. Writing never fails
//! the calling tool: problems are logged and swallowed.

use crate::errors::Result;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// String outputs longer than this are cut before they reach disk
pub const MAX_OUTPUT_CHARS: usize = 50_000;

/// One logged invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp_ms: i64,
    pub timestamp_iso: String,
    pub requester: String,
    pub tool_name: String,
    pub input_params: Value,
    pub output_result: Value,
}

/// Writes and queries the per-call JSON records
#[derive(Debug, Clone)]
pub struct RequestLogger {
    requests_dir: PathBuf,
}

impl RequestLogger {
    pub fn new(requests_dir: impl Into<PathBuf>) -> Self {
        Self {
            requests_dir: requests_dir.into(),
        }
    }

    pub fn requests_dir(&self) -> &Path {
        &self.requests_dir
    }

    /// Record a tool call. Returns the file path, or `None` if writing failed.
    pub fn log_request(
        &self,
        requester: &str,
        tool_name: &str,
        input_params: Value,
        output_result: Value,
    ) -> Option<PathBuf> {
        self.log_request_at(Utc::now(), requester, tool_name, input_params, output_result)
    }

    pub(crate) fn log_request_at(
        &self,
        now: DateTime<Utc>,
        requester: &str,
        tool_name: &str,
        input_params: Value,
        output_result: Value,
    ) -> Option<PathBuf> {
        let timestamp_ms = now.timestamp_millis();
        let stem = format!(
            "{}-{}-{}",
            timestamp_ms,
            sanitize_component(tool_name),
            sanitize_component(requester)
        );

        let record = RequestRecord {
            timestamp_ms,
            timestamp_iso: now.to_rfc3339_opts(SecondsFormat::Micros, false),
            requester: requester.to_string(),
            tool_name: tool_name.to_string(),
            input_params,
            output_result: truncate_output(output_result),
        };

        match self.write_record(&stem, &record) {
            Ok(path) => {
                debug!("Logged request to {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Failed to log request: {}", e);
                None
            }
        }
    }

    /// Write `{stem}.json`, or `{stem}-N.json` if calls collide within a millisecond
    fn write_record(&self, stem: &str, record: &RequestRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.requests_dir)?;
        let body = serde_json::to_string_pretty(record)?;

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}-{}.json", stem, attempt)
            };
            let path = self.requests_dir.join(name);
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 1000 => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// All records at or after `since`, ascending by time
    pub fn records_since(&self, since: DateTime<Utc>) -> Result<Vec<RequestRecord>> {
        let since_ms = since.timestamp_millis();
        let mut records = Vec::new();

        if !self.requests_dir.exists() {
            return Ok(records);
        }

        for entry in std::fs::read_dir(&self.requests_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            // Cheap pre-filter on the filename prefix before parsing the body
            if let Some(ms) = filename_timestamp(&path) {
                if ms < since_ms {
                    continue;
                }
            }

            let record = match std::fs::read_to_string(&path)
                .map_err(crate::errors::ToolboxError::from)
                .and_then(|s| Ok(serde_json::from_str::<RequestRecord>(&s)?))
            {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable request log {}: {}", path.display(), e);
                    continue;
                }
            };
            if record.timestamp_ms >= since_ms {
                records.push(record);
            }
        }

        records.sort_by(|a, b| {
            a.timestamp_ms
                .cmp(&b.timestamp_ms)
                .then_with(|| a.tool_name.cmp(&b.tool_name))
        });
        Ok(records)
    }
}

/// Keep ASCII alphanumerics, `-` and `_`; everything else becomes `_`
pub fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Cut oversized string outputs, leaving a marker with the original length
pub fn truncate_output(output: Value) -> Value {
    match output {
        Value::String(s) => {
            let total = s.chars().count();
            if total > MAX_OUTPUT_CHARS {
                let kept: String = s.chars().take(MAX_OUTPUT_CHARS).collect();
                Value::String(format!("{}\n... [TRUNCATED, total length: {}]", kept, total))
            } else {
                Value::String(s)
            }
        }
        other => other,
    }
}

/// First `max` characters of `value`
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn filename_timestamp(path: &Path) -> Option<i64> {
    path.file_name()?
        .to_str()?
        .split('-')
        .next()?
        .parse::<i64>()
        .ok()
}

/// Millisecond timestamp helper, mostly for tests
pub fn utc_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logger() -> (tempfile::TempDir, RequestLogger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = RequestLogger::new(dir.path().join("requests"));
        (dir, logger)
    }

    #[test]
    fn test_sanitize_requester() {
        assert_eq!(sanitize_component("agent-1_ok"), "agent-1_ok");
        assert_eq!(sanitize_component("a b/c.d@é"), "a_b_c_d__");
    }

    #[test]
    fn test_filename_and_fields() {
        let (_dir, logger) = logger();
        let now = utc_from_millis(1_700_000_000_123).unwrap();
        let path = logger
            .log_request_at(now, "claude desktop", "py_eval", json!({"code": "1"}), json!("ok"))
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "1700000000123-py_eval-claude_desktop.json"
        );
        let record: RequestRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(record.requester, "claude desktop");
        assert_eq!(record.tool_name, "py_eval");
        assert_eq!(record.output_result, json!("ok"));
        assert!(record.timestamp_iso.starts_with("2023-11-14T22:13:20.123"));
    }

    #[test]
    fn test_same_millisecond_calls_do_not_overwrite() {
        let (_dir, logger) = logger();
        let now = utc_from_millis(5_000).unwrap();
        let a = logger.log_request_at(now, "r", "t", json!({"n": 1}), json!(null)).unwrap();
        let b = logger.log_request_at(now, "r", "t", json!({"n": 2}), json!(null)).unwrap();
        assert_ne!(a, b);
        assert!(b.to_string_lossy().ends_with("5000-t-r-1.json"));
        assert_eq!(logger.records_since(now).unwrap().len(), 2);
    }

    #[test]
    fn test_long_output_is_truncated() {
        let long = "x".repeat(MAX_OUTPUT_CHARS + 10);
        let Value::String(cut) = truncate_output(Value::String(long)) else {
            panic!("expected string");
        };
        assert!(cut.starts_with(&"x".repeat(MAX_OUTPUT_CHARS)));
        assert!(cut.ends_with(&format!("[TRUNCATED, total length: {}]", MAX_OUTPUT_CHARS + 10)));

        let obj = json!({"k": "v"});
        assert_eq!(truncate_output(obj.clone()), obj);
    }

    #[test]
    fn test_records_since_filters_and_sorts() {
        let (_dir, logger) = logger();
        for (ms, tool) in [(3_000, "c"), (1_000, "a"), (2_000, "b")] {
            logger.log_request_at(utc_from_millis(ms).unwrap(), "r", tool, json!({}), json!(null));
        }
        std::fs::write(logger.requests_dir().join("9999-bad-r.json"), "not json").unwrap();

        let all = logger.records_since(utc_from_millis(0).unwrap()).unwrap();
        let tools: Vec<_> = all.iter().map(|r| r.tool_name.as_str()).collect();
        assert_eq!(tools, vec!["a", "b", "c"]);

        let later = logger.records_since(utc_from_millis(2_000).unwrap()).unwrap();
        assert_eq!(later.len(), 2);

        let future = logger.records_since(Utc::now() + chrono::Duration::days(1)).unwrap();
        assert!(future.is_empty());
    }

    #[test]
    fn test_missing_directory_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let logger = RequestLogger::new(dir.path().join("nope"));
        assert!(logger.records_since(utc_from_millis(0).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let logger = RequestLogger::new(blocker.join("requests"));
        assert!(logger.log_request("r", "t", json!({}), json!(null)).is_none());
    }
}
