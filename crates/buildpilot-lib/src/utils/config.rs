// Assistant configuration
// Loaded from a TOML file; every field has a default so a missing or partial
// file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier used for config and data directories
pub const APP_IDENTIFIER: &str = "buildpilot";

/// Config file name
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    pub gateway: GatewayConfig,
    pub completion: CompletionConfig,
    pub context: ContextConfig,
    pub execution: ExecutionConfig,
    pub repair: RepairConfig,
}

/// LLM gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Streaming chat endpoint
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: u32,
    /// Whole-request limit for non-streaming completions
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Longest silence tolerated while waiting for response headers or the
    /// next chunk of a streamed reply
    pub stream_idle_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001/api/claude".to_string(),
            api_key: None,
            model: None,
            max_tokens: 8192,
            request_timeout_ms: 300_000,
            connect_timeout_ms: 10_000,
            stream_idle_timeout_ms: 60_000,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

/// Completion detector timings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    pub poll_interval_ms: u64,
    /// Wait after a completion pattern matches
    pub grace_period_ms: u64,
    /// Unchanged output for this long counts as finished
    pub stability_window_ms: u64,
    /// Long-running commands are detached after this long
    pub long_running_exit_ms: u64,
    /// Hard upper bound for any single command
    pub absolute_timeout_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 300,
            grace_period_ms: 500,
            stability_window_ms: 1_500,
            long_running_exit_ms: 5_000,
            absolute_timeout_ms: 20 * 60 * 1_000,
        }
    }
}

impl CompletionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn long_running_exit(&self) -> Duration {
        Duration::from_millis(self.long_running_exit_ms)
    }

    pub fn absolute_timeout(&self) -> Duration {
        Duration::from_millis(self.absolute_timeout_ms)
    }
}

/// Context window management thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    /// Summarize once the conversation has more turns than this
    pub conversation_threshold: usize,
    pub keep_initial_messages: usize,
    pub keep_recent_messages: usize,
    /// Uncovered middle turns tolerated before the summary is regenerated
    pub summary_refresh_interval: usize,
    /// Number of leading user messages scanned for project facts
    pub extraction_window: usize,
    pub goal_max_chars: usize,
    /// Per-message cap when rendering the summarize request
    pub summary_message_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            conversation_threshold: 30,
            keep_initial_messages: 2,
            keep_recent_messages: 10,
            summary_refresh_interval: 10,
            extraction_window: 3,
            goal_max_chars: 500,
            summary_message_chars: 500,
        }
    }
}

/// Command execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Ask before running generated commands
    pub require_confirmation: bool,
    /// `cd` into the workspace before the first command of a batch
    pub cd_into_workspace: bool,
    pub busy_wait_timeout_ms: u64,
    /// Delay between writing a file and notifying listeners
    pub settle_delay_ms: u64,
    /// Per-terminal output buffer capacity in bytes
    pub output_buffer_bytes: usize,
    /// Attach the file listing, key files and recent terminal output to each prompt
    pub include_workspace_context: bool,
    /// Workspace file paths listed in that context
    pub max_listed_files: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            cd_into_workspace: true,
            busy_wait_timeout_ms: 30_000,
            settle_delay_ms: 100,
            output_buffer_bytes: 50_000,
            include_workspace_context: true,
            max_listed_files: 200,
        }
    }
}

impl ExecutionConfig {
    pub fn busy_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_wait_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Auto-repair loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    /// Automatic repair attempts per failing batch
    pub max_auto_repairs: u32,
    /// Conversation turns sent along with a repair request
    pub history_turns: usize,
    /// Characters of command output included in a repair prompt
    pub output_tail_chars: usize,
    /// Workspace file paths listed in a repair prompt
    pub max_listed_files: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_auto_repairs: 1,
            history_turns: 6,
            output_tail_chars: 2_000,
            max_listed_files: 50,
        }
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            log::debug!("[Config] {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Invalid config: {}", e))
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self, String> {
        Self::load(&get_config_path()?)
    }
}

/// Get the default config file path
pub fn get_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|p| p.join(APP_IDENTIFIER).join(CONFIG_FILE))
        .ok_or_else(|| "Could not determine configuration directory".to_string())
}
