use crate::errors::{Result, ToolboxError};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the search API key
pub const API_KEY_ENV: &str = "PERPLEXITY_API_KEY";

/// Largest accepted `--max-timeout-secs`: one day
pub const MAX_TIMEOUT_CEILING_SECS: f64 = 86_400.0;

/// Command-line and environment options for the tool server
#[derive(Debug, Clone, Parser)]
#[command(name = "toolbox-mcp", version, about = "MCP tool server: py_eval, search, notes, audit")]
pub struct ServerArgs {
    /// Root directory for artifacts, notes and request logs
    #[arg(long, env = "TOOLBOX_DATA_DIR", default_value = "data/mcp-perplexity")]
    pub data_dir: PathBuf,

    /// Python interpreter used by py_eval (defaults to python3/python on PATH)
    #[arg(long, env = "TOOLBOX_PYTHON")]
    pub python: Option<PathBuf>,

    /// Deadline applied when a py_eval call does not pass one
    #[arg(long, env = "TOOLBOX_DEFAULT_TIMEOUT_SECS", default_value_t = 5.0)]
    pub default_timeout_secs: f64,

    /// Upper bound for caller-supplied py_eval deadlines
    #[arg(long, env = "TOOLBOX_MAX_TIMEOUT_SECS", default_value_t = 300.0)]
    pub max_timeout_secs: f64,

    /// Base URL of the chat-completions endpoint
    #[arg(long, env = "PERPLEXITY_API_URL", default_value = "https://api.perplexity.ai")]
    pub api_base_url: String,

    /// Ceiling for a single outbound search call
    #[arg(long, env = "PERPLEXITY_HTTP_TIMEOUT_SECS", default_value_t = 120)]
    pub http_timeout_secs: u64,

    #[arg(long, env = API_KEY_ENV, hide_env_values = true, hide = true)]
    pub api_key: Option<String>,
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub python_path: Option<PathBuf>,
    pub default_timeout: f64,
    pub max_timeout: f64,
    pub api_base_url: String,
    pub http_timeout: Duration,
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/mcp-perplexity"),
            python_path: None,
            default_timeout: 5.0,
            max_timeout: 300.0,
            api_base_url: "https://api.perplexity.ai".to_string(),
            http_timeout: Duration::from_secs(120),
            api_key: None,
        }
    }
}

impl ServerConfig {
    /// Build a config from parsed arguments, rejecting nonsensical deadlines
    pub fn from_args(args: ServerArgs) -> Result<Self> {
        if !args.default_timeout_secs.is_finite() || args.default_timeout_secs <= 0.0 {
            return Err(ToolboxError::InvalidArgument(format!(
                "default timeout must be a positive number, got {}",
                args.default_timeout_secs
            )));
        }
        if !args.max_timeout_secs.is_finite() || args.max_timeout_secs < args.default_timeout_secs
        {
            return Err(ToolboxError::InvalidArgument(format!(
                "max timeout ({}) must be at least the default timeout ({})",
                args.max_timeout_secs, args.default_timeout_secs
            )));
        }
        if args.max_timeout_secs > MAX_TIMEOUT_CEILING_SECS {
            return Err(ToolboxError::InvalidArgument(format!(
                "max timeout ({}) must not exceed {} seconds",
                args.max_timeout_secs, MAX_TIMEOUT_CEILING_SECS
            )));
        }

        Ok(Self {
            data_dir: args.data_dir,
            python_path: args.python,
            default_timeout: args.default_timeout_secs,
            max_timeout: args.max_timeout_secs,
            api_base_url: args.api_base_url.trim_end_matches('/').to_string(),
            http_timeout: Duration::from_secs(args.http_timeout_secs),
            api_key: args.api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Config rooted at `data_dir` with every other option at its default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.data_dir.join("tool_notes")
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.data_dir.join("requests")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create the data directory and its fixed subdirectories
    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.notes_dir())?;
        std::fs::create_dir_all(self.requests_dir())?;
        Ok(())
    }
}

/// Load `.env.local` then `.env` from the working directory, if present
pub fn load_dotenv() {
    for file in [".env.local", ".env"] {
        if dotenvy::from_filename(file).is_ok() {
            tracing::debug!("loaded environment from {}", file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_args() {
        let args = ServerArgs::parse_from(["toolbox-mcp", "--data-dir", "/tmp/toolbox"]);
        let cfg = ServerConfig::from_args(args).unwrap();
        assert_eq!(cfg.default_timeout, 5.0);
        assert_eq!(cfg.http_timeout, Duration::from_secs(120));
        assert_eq!(cfg.requests_dir(), PathBuf::from("/tmp/toolbox/requests"));
        assert_eq!(cfg.notes_dir(), PathBuf::from("/tmp/toolbox/tool_notes"));
    }

    #[test]
    fn test_rejects_bad_timeouts() {
        let args = ServerArgs::parse_from(["toolbox-mcp", "--default-timeout-secs", "0"]);
        assert!(ServerConfig::from_args(args).is_err());

        let args = ServerArgs::parse_from([
            "toolbox-mcp",
            "--default-timeout-secs",
            "10",
            "--max-timeout-secs",
            "5",
        ]);
        assert!(ServerConfig::from_args(args).is_err());

        let args = ServerArgs::parse_from(["toolbox-mcp", "--max-timeout-secs", "1e20"]);
        let err = ServerConfig::from_args(args).unwrap_err();
        assert!(err.to_string().contains("must not exceed"));

        let args = ServerArgs::parse_from(["toolbox-mcp", "--max-timeout-secs", "86400"]);
        assert!(ServerConfig::from_args(args).is_ok());
    }

    #[test]
    fn test_ensure_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::with_data_dir(dir.path().join("data"));
        cfg.ensure_layout().unwrap();
        assert!(cfg.notes_dir().is_dir());
        assert!(cfg.requests_dir().is_dir());
    }
}
