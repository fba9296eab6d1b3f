// Assistant Module
// Turns model replies into files on disk and commands in a terminal, repairs
// failed commands and keeps the prompt within a bounded context window.

pub mod completion;
pub mod confirmation;
pub mod context_manager;
pub mod coordinator;
pub mod error;
pub mod failure;
pub mod materializer;
pub mod parser;
pub mod prompt_builder;
pub mod repair;
pub mod sanitizer;
pub mod service;
pub mod state_extractor;
pub mod stream;

pub use completion::{CompletionDetector, CompletionReason, CompletionResult};
pub use confirmation::ConfirmationGate;
pub use context_manager::{ContextManager, PreparedContext};
pub use coordinator::{BatchOutcome, CommandFailure, CommandRun, ExecutionCoordinator, PreviewSink};
pub use error::{AssistantError, AssistantErrorCode, AssistantResult};
pub use materializer::{ArtifactMaterializer, MaterializeOutcome, WorkspaceListener};
pub use parser::{parse, IncrementalParser};
pub use repair::{RepairLoop, RepairState, RetryContext};
pub use sanitizer::OutputSanitizer;
pub use service::{AssistantDeps, AssistantService, TurnOutcome};
pub use stream::{CancelFlag, EventEmitter, StreamManager};
