// Assistant data models
// Messages, artifacts, commands, confirmation requests and failure analysis

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Conversation
// ============================================================================

/// Message entity - one turn of the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Message author role
    pub role: MessageRole,
    /// Message text content
    pub content: String,
    /// Streaming / delivery status
    pub status: MessageStatus,
    /// When message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn with_role(role: MessageRole, content: String, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            status,
            created_at: Utc::now(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content.into(), MessageStatus::Complete)
    }

    /// Create a new assistant message that is still receiving tokens
    pub fn assistant_streaming() -> Self {
        Self::with_role(MessageRole::Assistant, String::new(), MessageStatus::Streaming)
    }

    /// Create a complete assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content.into(), MessageStatus::Complete)
    }

    /// Create a system notice
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content.into(), MessageStatus::Complete)
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }
}

/// Message author role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

/// Message status
///
/// A message is `Streaming` while tokens arrive, then frozen as `Complete`,
/// `Truncated` (stream cancelled) or `Error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Streaming,
    Complete,
    Truncated,
    Error,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Streaming => write!(f, "streaming"),
            MessageStatus::Complete => write!(f, "complete"),
            MessageStatus::Truncated => write!(f, "truncated"),
            MessageStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "streaming" => Ok(MessageStatus::Streaming),
            "complete" => Ok(MessageStatus::Complete),
            "truncated" => Ok(MessageStatus::Truncated),
            "error" => Ok(MessageStatus::Error),
            _ => Err(format!("Invalid message status: {}", s)),
        }
    }
}

// ============================================================================
// Artifacts & Commands
// ============================================================================

/// A complete file extracted from a fenced code block carrying `filename=`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub language: String,
    /// Workspace-relative path, never empty
    pub filename: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Extracted,
    Creating,
    Created,
    Failed,
}

/// A shell command extracted from a response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub text: String,
    /// Position in first-seen order
    pub order: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Extracted,
    PendingConfirmation,
    Confirmed,
    Cancelled,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandStatus::Extracted => "extracted",
            CommandStatus::PendingConfirmation => "pending_confirmation",
            CommandStatus::Confirmed => "confirmed",
            CommandStatus::Cancelled => "cancelled",
            CommandStatus::Running => "running",
            CommandStatus::Succeeded => "succeeded",
            CommandStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Everything the parser recovered from one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub artifacts: Vec<Artifact>,
    pub commands: Vec<Command>,
}

impl ParsedResponse {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.commands.is_empty()
    }

    pub fn command_texts(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.text.clone()).collect()
    }
}

// ============================================================================
// Confirmation
// ============================================================================

/// A batch of commands waiting for the user's approval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub id: String,
    pub commands: Vec<String>,
    pub is_auto_fix: bool,
}

impl ConfirmationRequest {
    pub fn new(commands: Vec<String>, is_auto_fix: bool) -> Self {
        Self {
            id: format!("confirm_{}", Uuid::new_v4().simple()),
            commands,
            is_auto_fix,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Confirmed,
    Cancelled,
}

// ============================================================================
// Failure Analysis
// ============================================================================

/// Failure classification shown to the user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    MissingModule,
    CommandNotFound,
    FileNotFound,
    SyntaxError,
    TypeError,
    ReferenceError,
    PermissionError,
    NpmError,
    BuildError,
    PortInUse,
    GitError,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::MissingModule => "missing_module",
            ErrorType::CommandNotFound => "command_not_found",
            ErrorType::FileNotFound => "file_not_found",
            ErrorType::SyntaxError => "syntax_error",
            ErrorType::TypeError => "type_error",
            ErrorType::ReferenceError => "reference_error",
            ErrorType::PermissionError => "permission_error",
            ErrorType::NpmError => "npm_error",
            ErrorType::BuildError => "build_error",
            ErrorType::PortInUse => "port_in_use",
            ErrorType::GitError => "git_error",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of classifying a failed command's output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAnalysis {
    pub error_type: ErrorType,
    pub issue: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub fix_plan: Vec<String>,
}

// ============================================================================
// Events
// ============================================================================

/// Events published to the host UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssistantEvent {
    /// Streaming token received
    #[serde(rename = "token")]
    Token {
        #[serde(rename = "messageId")]
        message_id: String,
        token: String,
    },
    /// Assistant message frozen
    #[serde(rename = "message_complete")]
    MessageComplete {
        #[serde(rename = "messageId")]
        message_id: String,
        status: MessageStatus,
    },
    #[serde(rename = "artifact_status")]
    ArtifactStatus {
        filename: String,
        status: ArtifactStatus,
        error: Option<String>,
    },
    #[serde(rename = "confirmation_requested")]
    ConfirmationRequested { request: ConfirmationRequest },
    #[serde(rename = "command_status")]
    CommandStatus {
        command: String,
        status: CommandStatus,
    },
    #[serde(rename = "preview_ready")]
    PreviewReady { url: String },
    #[serde(rename = "repair_state")]
    RepairState { state: String },
    /// User-visible system notice
    #[serde(rename = "notice")]
    Notice { message: String },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}
