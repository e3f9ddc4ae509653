//! MCP tool server: sandboxed Python evaluation, web search pass-through,
//! per-tool notes and a request audit log.

pub mod audit;
pub mod config;
pub mod engine;
pub mod errors;
pub mod native;
pub mod notes;
pub mod perplexity;
pub mod resources;
pub mod server;
pub mod tabular;
pub mod toolbox;

pub use audit::{RequestLogger, RequestRecord};
pub use config::{load_dotenv, ServerArgs, ServerConfig};
pub use engine::{EngineCapabilities, ExecutionOutcome, ExecutionRequest, PythonEngine};
pub use errors::{Result, ToolboxError};
pub use native::NativePythonEngine;
pub use notes::NotesStore;
pub use perplexity::{PerplexityClient, ReasoningEffort, SearchModel};
pub use server::{handle_message, serve, serve_stdio};
pub use toolbox::{tools_list, ToolOutput, Toolbox};
