use serde_json::{json, Value};

pub const DOCUMENTATION_URI: &str = "toolbox://documentation";

const DOCUMENTATION: &str = r#"# Toolbox MCP Documentation

## Overview

Web search and research through Perplexity, a Python evaluation tool for
analysing the results, persistent tool notes, and an audit log of every call.
Tools follow a CSV-first workflow: fetch data, receive a file path, analyse it
with `py_eval`, decide.

Every tool takes a `requester` string identifying the caller. It is only used
for the audit log.

## Available Tools

### py_eval
Execute Python code in a fresh interpreter.

**Parameters:**
- `code` (required): Python code to execute
- `timeout_sec` (optional): Execution timeout in seconds (default: 5.0)

**Available Variables:**
- `pd`: pandas, when installed
- `np`: numpy, when installed
- `CSV_PATH`: string path of the data folder (also the working directory)

**Important Notes:**
- Each call starts fresh: variables do NOT persist between calls
- Reload CSV files in every call that needs them
- Standard library modules are available for import
- The result is JSON: `success`, `stdout`, `stderr`, `error`, `elapsed_ms`

**Example:**
```python
import os
files = [f for f in os.listdir(CSV_PATH) if f.endswith('.csv')]
print(f"Found {len(files)} CSV files")
for f in files[:5]:
    print(f"  - {f}")
```

### perplexity_sonar, perplexity_sonar_pro
Search with real-time web results. `request` is the query.

### perplexity_sonar_reasoning, perplexity_sonar_reasoning_pro
Chain-of-Thought reasoning over search results. The response content starts
with a `<think>` section.

### perplexity_sonar_deep_research
Exhaustive multi-source research. `reasoning_effort` is `low`, `medium`
(default) or `high`; any other value is rejected without calling the API.

Search responses are returned as JSON and also saved as JSON files in the
data folder.

### save_tool_notes / read_tool_notes
Keep usage notes per tool. Notes are appended with a timestamp, never
overwritten. Read them before calling a complex tool.

### get_request_log
Export logged tool calls since `since_datetime` (ISO 8601, e.g.
`2025-01-31T09:00:00Z` or `2025-01-31`) to a CSV file, sorted oldest first.

## CSV Responses

Every CSV response includes:
- File name, row count and file size
- JSON schema with sniffed column types
  (boolean, integer, float, datetime, string, string (empty))
- The first row as a Markdown table
- A pandas snippet to load the file

## Best Practices

1. **Always reload data**: start each py_eval with file discovery and loading
2. **Check before loading**: confirm the file exists
3. **Keep analysis focused**: one goal per py_eval call
4. **Print progress**: stdout is all you get back
5. **Document learnings**: record insights with save_tool_notes
"#;

/// Entries for `resources/list`
pub fn resources_list() -> Vec<Value> {
    vec![json!({
        "uri": DOCUMENTATION_URI,
        "name": "Toolbox MCP Documentation",
        "description": "Documentation for the search, py_eval, notes and audit tools",
        "mimeType": "text/markdown"
    })]
}

/// Body of a resource, `None` for unknown URIs
pub fn read_resource(uri: &str) -> Option<Value> {
    match uri {
        DOCUMENTATION_URI => Some(json!({
            "contents": [{
                "uri": DOCUMENTATION_URI,
                "mimeType": "text/markdown",
                "text": DOCUMENTATION
            }]
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documentation_resource() {
        let listed = resources_list();
        assert_eq!(listed[0]["uri"], DOCUMENTATION_URI);

        let read = read_resource(DOCUMENTATION_URI).unwrap();
        let text = read["contents"][0]["text"].as_str().unwrap();
        assert!(text.contains("### py_eval"));
        assert!(text.contains("CSV_PATH"));
        assert!(read_resource("toolbox://nope").is_none());
    }
}
