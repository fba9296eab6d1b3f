// Services module
// Assistant engine, LLM gateway client, terminals and workspace filesystem

pub mod assistant;
pub mod gateway;
pub mod terminal;
pub mod workspace_fs;

pub use assistant::{AssistantDeps, AssistantError, AssistantService, TurnOutcome};
pub use gateway::{GatewayError, HttpGateway, LlmGateway};
pub use terminal::{PtyBackend, TerminalBackend, TerminalRegistry};
pub use workspace_fs::{LocalFs, WorkspaceFs};
