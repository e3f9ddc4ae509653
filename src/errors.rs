use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolboxError>;

#[derive(Error, Debug)]
pub enum ToolboxError {
    #[error("Python not installed or not found in PATH")]
    PythonNotFound,

    #[error("{0} environment variable is not set. Please set it in your .env.local file.")]
    MissingApiKey(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid since_datetime '{0}': expected RFC 3339 or YYYY-MM-DD[ HH:MM:SS]")]
    InvalidDatetime(String),

    #[error("Execution timed out after {0} seconds")]
    Timeout(f64),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Malformed interpreter output: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}
