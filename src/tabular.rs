//! CSV artifacts and their human-readable summaries.
//!
//! Column types are sniffed with a fixed, ordered checklist over the non-empty
//! cells: boolean, integer, float, datetime, then string. A column with no
//! non-empty cells is `Empty`.

use crate::errors::{Result, ToolboxError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;
use tracing::info;

/// Closed set of sniffed column kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Integer,
    Float,
    Datetime,
    String,
    Empty,
}

impl ColumnKind {
    pub fn label(&self) -> &'static str {
        match self {
            ColumnKind::Boolean => "boolean",
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Datetime => "datetime",
            ColumnKind::String => "string",
            ColumnKind::Empty => "string (empty)",
        }
    }
}

/// Sniff the kind of a column from its cell values. Empty cells are nulls.
pub fn sniff_column<'a, I>(values: I) -> ColumnKind
where
    I: IntoIterator<Item = &'a str>,
{
    let present: Vec<&str> = values
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if present.is_empty() {
        return ColumnKind::Empty;
    }
    if present.iter().all(|v| is_boolean(v)) {
        return ColumnKind::Boolean;
    }
    if present.iter().all(|v| v.parse::<i64>().is_ok()) {
        return ColumnKind::Integer;
    }
    if present
        .iter()
        .all(|v| v.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false))
    {
        return ColumnKind::Float;
    }
    if present.iter().all(|v| parse_datetime(v).is_ok()) {
        return ColumnKind::Datetime;
    }
    ColumnKind::String
}

fn is_boolean(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "0" | "1" | "true" | "false"
    )
}

/// Parse RFC 3339, `YYYY-MM-DD[T| ]HH:MM:SS[.f]` or `YYYY-MM-DD`. Naive values are UTC.
pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(ToolboxError::InvalidDatetime(value.to_string()))
}

/// In-memory table of string cells; empty string stands for a missing value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str).unwrap_or(""))
    }

    /// Column name -> sniffed kind, in header order
    pub fn schema(&self) -> Vec<(String, ColumnKind)> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), sniff_column(self.column(i))))
            .collect()
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        info!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}

/// `N bytes`, `N.N KB` or `N.N MB`
pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn sample_table(table: &Table) -> String {
    let Some(first) = table.rows.first() else {
        return "(empty dataset)".to_string();
    };

    let values: Vec<String> = (0..table.headers.len())
        .map(|i| {
            let v = first.get(i).map(String::as_str).unwrap_or("");
            if v.chars().count() > 50 {
                format!("{}...", v.chars().take(50).collect::<String>())
            } else {
                v.to_string()
            }
        })
        .collect();

    let header_row = format!("| {} |", table.headers.join(" | "));
    let separator = format!(
        "|{}|",
        table
            .headers
            .iter()
            .map(|h| "-".repeat(h.chars().count() + 2))
            .collect::<Vec<_>>()
            .join("|")
    );
    let value_row = format!("| {} |", values.join(" | "));
    format!("{}\n{}\n{}", header_row, separator, value_row)
}

/// Pretty JSON object of column -> kind label, keys in header order
fn schema_json(schema: &[(String, ColumnKind)]) -> Result<String> {
    if schema.is_empty() {
        return Ok("{}".to_string());
    }
    let entries = schema
        .iter()
        .map(|(name, kind)| -> Result<String> {
            Ok(format!(
                "  {}: {}",
                serde_json::to_string(name)?,
                serde_json::to_string(kind.label())?
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("{{\n{}\n}}", entries.join(",\n")))
}

/// Standard response for a freshly written CSV artifact: file info, schema,
/// first row and a pandas snippet to load it
pub fn format_csv_response(path: &Path, table: &Table, data_dir: &Path) -> Result<String> {
    let size = human_size(std::fs::metadata(path)?.len());
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let schema_json = schema_json(&table.schema())?;

    let data_dir = data_dir.to_string_lossy();
    let data_dir = data_dir.trim_end_matches('/');

    Ok(format!(
        "✓ Data saved to CSV\n\n\
         File: {filename}\n\
         Rows: {rows}\n\
         Size: {size}\n\n\
         Schema (JSON):\n{schema_json}\n\n\
         Sample (first row):\n{sample}\n\n\
         Python snippet to load:\n\
         ```python\n\
         import pandas as pd\n\
         df = pd.read_csv('{data_dir}/{filename}')\n\
         print(df.info())\n\
         print(df.head())\n\
         ```",
        rows = table.len(),
        sample = sample_table(table),
    ))
}
