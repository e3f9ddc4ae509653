//! Tool handlers and their JSON schemas.
//!
//! Handlers never fail at the transport level: every problem is turned into a
//! text or JSON payload with `is_error` set. Each call is written to the
//! audit log after it completes.

use crate::{
    audit::{truncate_chars, RequestLogger},
    config::ServerConfig,
    engine::{ExecutionOutcome, ExecutionRequest, PythonEngine},
    errors::{Result, ToolboxError},
    native::NativePythonEngine,
    notes::NotesStore,
    perplexity::{
        extract_reasoning_json, first_choice_content, PerplexityClient, ReasoningEffort,
        SearchModel,
    },
    tabular::{format_csv_response, parse_datetime, Table},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Logged `code` parameters are cut to this many characters
pub const MAX_LOGGED_CODE_CHARS: usize = 500;

pub const PY_EVAL: &str = "py_eval";
pub const SAVE_TOOL_NOTES: &str = "save_tool_notes";
pub const READ_TOOL_NOTES: &str = "read_tool_notes";
pub const GET_REQUEST_LOG: &str = "get_request_log";

/// What a tool call hands back to the protocol layer
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Option<Value>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            is_error: true,
        }
    }

    /// `{"error": ...}` envelope, pretty printed
    pub fn error_envelope(err: &ToolboxError) -> Self {
        let message = match err {
            ToolboxError::InvalidArgument(m) => m.clone(),
            other => other.to_string(),
        };
        Self::error(pretty(&json!({ "error": message })))
    }

    /// MCP `tools/call` result
    pub fn into_call_result(self) -> Value {
        let mut result = json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error,
        });
        if let (Some(structured), Some(obj)) = (self.structured, result.as_object_mut()) {
            obj.insert("structuredContent".to_string(), structured);
        }
        result
    }

    /// Value recorded as `output_result` in the audit log
    fn audit_value(&self) -> Value {
        self.structured
            .clone()
            .unwrap_or_else(|| Value::String(self.text.clone()))
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[derive(Debug, Deserialize)]
struct PyEvalArgs {
    code: String,
    #[serde(default)]
    timeout_sec: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SaveNotesArgs {
    tool_name: String,
    markdown_notes: String,
}

#[derive(Debug, Deserialize)]
struct ReadNotesArgs {
    tool_name: String,
}

#[derive(Debug, Deserialize)]
struct RequestLogArgs {
    since_datetime: String,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    request: String,
    #[serde(default)]
    reasoning_effort: Option<String>,
}

fn decode<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| ToolboxError::InvalidArgument(e.to_string()))
}

/// All tools behind one dispatcher
pub struct Toolbox {
    config: ServerConfig,
    engine: Option<Box<dyn PythonEngine>>,
    notes: NotesStore,
    audit: RequestLogger,
    search: PerplexityClient,
}

impl Toolbox {
    /// Build from config. A missing interpreter is not fatal: py_eval reports it per call.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let engine: Option<Box<dyn PythonEngine>> =
            match NativePythonEngine::from_config(config.python_path.as_ref()) {
                Ok(engine) => {
                    let caps = engine.capabilities();
                    info!(
                        "py_eval engine: {} at {} (cooperative deadline: {}, hard kill: {})",
                        caps.name,
                        caps.python_path.display(),
                        caps.cooperative_deadline,
                        caps.hard_kill
                    );
                    Some(Box::new(engine))
                }
                Err(e) => {
                    warn!("py_eval disabled: {}", e);
                    None
                }
            };
        Self::with_engine(config, engine)
    }

    /// Build with an explicit engine (or none)
    pub fn with_engine(
        config: ServerConfig,
        engine: Option<Box<dyn PythonEngine>>,
    ) -> Result<Self> {
        config.ensure_layout()?;
        let search = PerplexityClient::new(
            config.api_base_url.clone(),
            config.api_key.clone(),
            config.http_timeout,
        )?;
        Ok(Self {
            notes: NotesStore::new(config.notes_dir()),
            audit: RequestLogger::new(config.requests_dir()),
            engine,
            search,
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn audit_log(&self) -> &RequestLogger {
        &self.audit
    }

    /// Dispatch a `tools/call` and record it in the audit log
    pub async fn call_tool(&self, name: &str, args: &Value) -> ToolOutput {
        let requester = args
            .get("requester")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        info!("{} invoked by {}", name, requester);

        let output = match self.dispatch(name, args).await {
            Ok(output) => output,
            Err(e) => ToolOutput::error(e.to_string()),
        };

        self.audit
            .log_request(&requester, name, audit_params(name, args), output.audit_value());
        output
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Result<ToolOutput> {
        match name {
            PY_EVAL => {
                let args: PyEvalArgs = decode(args)?;
                let outcome = self.py_eval(&args.code, args.timeout_sec).await;
                Ok(outcome_output(outcome))
            }
            SAVE_TOOL_NOTES => {
                let args: SaveNotesArgs = decode(args)?;
                Ok(self.save_tool_notes(&args.tool_name, &args.markdown_notes))
            }
            READ_TOOL_NOTES => {
                let args: ReadNotesArgs = decode(args)?;
                Ok(self.read_tool_notes(&args.tool_name))
            }
            GET_REQUEST_LOG => {
                let args: RequestLogArgs = decode(args)?;
                Ok(self.get_request_log(&args.since_datetime))
            }
            other => match SearchModel::from_tool_name(other) {
                Some(model) => {
                    let args: SearchArgs = decode(args)?;
                    Ok(self
                        .search(model, &args.request, args.reasoning_effort.as_deref())
                        .await)
                }
                None => Ok(ToolOutput::error(format!("Unknown tool: {}", other))),
            },
        }
    }

    fn resolve_timeout(&self, timeout_sec: Option<f64>) -> Result<Duration> {
        let secs = timeout_sec.unwrap_or(self.config.default_timeout);
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ToolboxError::InvalidArgument(format!(
                "timeout_sec must be a positive number of seconds, got {}",
                secs
            )));
        }
        let secs = if secs > self.config.max_timeout {
            warn!(
                "timeout_sec {} above ceiling, clamping to {}",
                secs, self.config.max_timeout
            );
            self.config.max_timeout
        } else {
            secs
        };
        Duration::try_from_secs_f64(secs).map_err(|_| {
            ToolboxError::InvalidArgument(format!("timeout_sec {} is out of range", secs))
        })
    }

    /// Run code in a fresh interpreter. Always yields an outcome.
    pub async fn py_eval(&self, code: &str, timeout_sec: Option<f64>) -> ExecutionOutcome {
        let started = Instant::now();
        let call_id = uuid::Uuid::new_v4();

        let timeout = match self.resolve_timeout(timeout_sec) {
            Ok(t) => t,
            Err(e) => return ExecutionOutcome::failed(e.to_string(), started.elapsed()),
        };
        let Some(engine) = self.engine.as_ref() else {
            return ExecutionOutcome::failed(
                ToolboxError::PythonNotFound.to_string(),
                started.elapsed(),
            );
        };

        info!(
            "[py_eval {}] running {} chars with {:.1}s deadline",
            call_id,
            code.chars().count(),
            timeout.as_secs_f64()
        );

        let request = ExecutionRequest::new(code, timeout, self.config.data_dir.clone());
        match engine.execute(&request).await {
            Ok(outcome) => {
                info!(
                    "[py_eval {}] finished success={} in {}ms",
                    call_id, outcome.success, outcome.elapsed_ms
                );
                outcome
            }
            Err(e) => {
                error!("[py_eval {}] host failure: {}", call_id, e);
                ExecutionOutcome::failed(e.to_string(), started.elapsed())
            }
        }
    }

    pub fn save_tool_notes(&self, tool_name: &str, markdown_notes: &str) -> ToolOutput {
        match self.notes.save(tool_name, markdown_notes) {
            Ok(saved) => ToolOutput::text(format!(
                "✓ Notes saved successfully\n\nTool: {}\nFile: tool_notes/{}\nTimestamp: {}",
                tool_name, saved.file_name, saved.timestamp
            )),
            Err(e) => {
                error!("Error saving tool notes: {}", e);
                ToolOutput::error(format!("✗ Error saving notes: {}", e))
            }
        }
    }

    pub fn read_tool_notes(&self, tool_name: &str) -> ToolOutput {
        match self.notes.read(tool_name) {
            Ok(Some(content)) => ToolOutput::text(content),
            Ok(None) => ToolOutput::text(format!(
                "No notes found for tool: {}\n\nUse save_tool_notes() to create the first note for this tool.",
                tool_name
            )),
            Err(e) => {
                error!("Error reading tool notes: {}", e);
                ToolOutput::error(format!("✗ Error reading notes: {}", e))
            }
        }
    }

    /// Export audit records since `since_datetime` to a CSV artifact
    pub fn get_request_log(&self, since_datetime: &str) -> ToolOutput {
        match self.export_request_log(since_datetime) {
            Ok(text) => ToolOutput::text(text),
            Err(e) => {
                error!("Error in get_request_log: {}", e);
                ToolOutput::error_envelope(&e)
            }
        }
    }

    fn export_request_log(&self, since_datetime: &str) -> Result<String> {
        let since = parse_datetime(since_datetime)?;
        let records = self.audit.records_since(since)?;
        info!("{} request records since {}", records.len(), since);

        let mut table = Table::new(
            [
                "timestamp_iso",
                "timestamp_ms",
                "requester",
                "tool_name",
                "input_params",
                "output_result",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
        );
        for record in records {
            table.push_row(vec![
                record.timestamp_iso,
                record.timestamp_ms.to_string(),
                record.requester,
                record.tool_name,
                cell(&record.input_params),
                cell(&record.output_result),
            ]);
        }

        let path = self.artifact_path("request_log", "csv");
        table.write_csv(&path)?;
        format_csv_response(&path, &table, &self.config.data_dir)
    }

    /// Call a search model and return the raw JSON response
    pub async fn search(
        &self,
        model: SearchModel,
        request: &str,
        reasoning_effort: Option<&str>,
    ) -> ToolOutput {
        info!(
            "{} invoked with request: {}...",
            model.tool_name(),
            truncate_chars(request, 100)
        );

        // Validate before anything goes on the wire
        let effort = if model.accepts_reasoning_effort() {
            match reasoning_effort.map(str::parse::<ReasoningEffort>).transpose() {
                Ok(effort) => {
                    let effort = effort.unwrap_or_default();
                    info!("Reasoning effort: {}", effort.as_str());
                    Some(effort)
                }
                Err(e) => return ToolOutput::error_envelope(&e),
            }
        } else {
            None
        };

        match self.search.chat(model, request, effort).await {
            Ok(response) => {
                info!("Response received from Perplexity API");
                self.save_search_artifact(model, &response);
                ToolOutput::text(pretty(&response))
            }
            Err(e) => {
                error!("Error in {}: {}", model.tool_name(), e);
                ToolOutput::error_envelope(&e)
            }
        }
    }

    fn save_search_artifact(&self, model: SearchModel, response: &Value) {
        let mut artifact = response.clone();
        if model.is_reasoning() {
            let parsed = first_choice_content(response).and_then(extract_reasoning_json);
            if let (Some(parsed), Some(obj)) = (parsed, artifact.as_object_mut()) {
                obj.insert("parsed_content".to_string(), parsed);
            }
        }

        let path = self.artifact_path(&model.api_name().replace('-', "_"), "json");
        match std::fs::write(&path, pretty(&artifact)) {
            Ok(()) => info!("Saved {} response to {}", model, path.display()),
            Err(e) => warn!("Failed to save {} response: {}", model, e),
        }
    }

    fn artifact_path(&self, prefix: &str, extension: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        self.config
            .data_dir
            .join(format!("{}_{}.{}", prefix, stamp, extension))
    }
}

fn outcome_output(outcome: ExecutionOutcome) -> ToolOutput {
    let structured = serde_json::to_value(&outcome).unwrap_or(Value::Null);
    ToolOutput {
        text: pretty(&structured),
        is_error: !outcome.success,
        structured: Some(structured),
    }
}

/// Strings go in as-is; everything else as compact JSON
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Input parameters as they should appear in the audit log
fn audit_params(name: &str, args: &Value) -> Value {
    let mut params = args.clone();
    if let Some(obj) = params.as_object_mut() {
        obj.remove("requester");
        if name == PY_EVAL {
            if let Some(Value::String(code)) = obj.get_mut("code") {
                *code = truncate_chars(code, MAX_LOGGED_CODE_CHARS);
            }
        }
    }
    params
}

/// Schemas for `tools/list`
pub fn tools_list() -> Vec<Value> {
    let requester = json!({
        "type": "string",
        "description": "Identifier of the caller, recorded in the audit log."
    });

    let mut tools = vec![
        json!({
            "name": PY_EVAL,
            "description": "Execute Python code in a fresh interpreter with pandas (pd), numpy (np) and CSV_PATH pre-loaded. Variables do not persist between calls. Returns JSON with success, stdout, stderr, error and elapsed_ms.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "requester": requester,
                    "code": { "type": "string", "description": "Python code to execute. Use print() for output." },
                    "timeout_sec": { "type": "number", "exclusiveMinimum": 0, "default": 5.0, "description": "Wall-clock timeout in seconds." }
                },
                "required": ["requester", "code"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": SAVE_TOOL_NOTES,
            "description": "Save usage notes and lessons learned about any tool. Notes are appended with a timestamp, never overwritten.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "requester": requester,
                    "tool_name": { "type": "string", "description": "Name of the tool to document, e.g. 'py_eval'." },
                    "markdown_notes": { "type": "string", "description": "Concise Markdown notes: gotchas, working patterns, fixes." }
                },
                "required": ["requester", "tool_name", "markdown_notes"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": READ_TOOL_NOTES,
            "description": "Read all historical usage notes for a tool. Check before calling complex tools.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "requester": requester,
                    "tool_name": { "type": "string", "description": "Name of the tool to read notes for." }
                },
                "required": ["requester", "tool_name"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": GET_REQUEST_LOG,
            "description": "Export logged tool calls since a point in time to a CSV file, oldest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "requester": requester,
                    "since_datetime": { "type": "string", "description": "ISO 8601 datetime or date, e.g. '2025-01-31T09:00:00Z'. Naive values are UTC." }
                },
                "required": ["requester", "since_datetime"],
                "additionalProperties": false
            }
        }),
    ];

    for model in SearchModel::ALL {
        let mut properties = json!({
            "requester": requester,
            "request": { "type": "string", "description": "Search query or research question." }
        });
        if model.accepts_reasoning_effort() {
            if let Some(obj) = properties.as_object_mut() {
                obj.insert(
                    "reasoning_effort".to_string(),
                    json!({
                        "type": "string",
                        "enum": ["low", "medium", "high"],
                        "default": "medium",
                        "description": "Speed vs thoroughness."
                    }),
                );
            }
        }
        tools.push(json!({
            "name": model.tool_name(),
            "description": model.description(),
            "inputSchema": {
                "type": "object",
                "properties": properties,
                "required": ["requester", "request"],
                "additionalProperties": false
            }
        }));
    }

    tools
}
