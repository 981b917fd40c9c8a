//! Tool-use orchestration engine for a local OpenAI-compatible LM Studio
//! endpoint: a round loop that drives a model through tool calls with
//! mandatory progress checkpoints, MCP tool discovery, history compression,
//! and endpoint recovery on timeout.

pub mod config;
pub mod error;
pub mod history;
pub mod mcp;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod recovery;
pub mod stream;
pub mod tool;
pub mod transport;

pub use config::Config;
pub use error::{LmStudioError, Result};
pub use model::{Conversation, ConversationSettings, Message, Role};
pub use orchestrator::{Orchestrator, OrchestratorLimits, ToolEvent, ToolExecutor};
